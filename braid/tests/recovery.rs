use std::cell::{Cell, RefCell};
use std::path::Path;
use std::rc::Rc;

use braid::{Error, Worker, WorkerConfig};
use braid::checkpoint::{Checkpointable, LogReader, LogSink};
use braid::communication::Allocator;
use braid::communication::allocator::Thread;
use braid::dataflow::{Receiver, Vertex, VertexInput};
use braid::dataflow::channels::Pact;
use braid::dataflow::operators::{Input, InputHandle, Loops};
use braid::progress::Pointstamp;

/// Handles to the summing dataflow.
struct Summing {
    input: InputHandle<Pointstamp, u64>,
    receiver: Rc<Receiver<Pointstamp, u64>>,
    vertex: Vertex<Pointstamp>,
    sum: Rc<Cell<u64>>,
    downstream: Rc<Cell<usize>>,
}

/// Builds `input -> Sum -> Count`, where `Sum` adds up its records and forwards them.
fn summing(worker: &mut Worker, log: Option<&Path>) -> Summing {
    let sum = Rc::new(Cell::new(0));
    let downstream = Rc::new(Cell::new(0));
    let endpoint = Rc::new(RefCell::new(None));

    let (total, counted, slot) = (Rc::clone(&sum), Rc::clone(&downstream), Rc::clone(&endpoint));
    let input = worker.dataflow::<Pointstamp, _, _>(move |graph| {
        let (input, stream) = graph.new_input::<u64>()?;

        let mut stage = graph.stage("Sum");
        let records = stage.new_input(&stream, Pact::Pipeline)?;
        let (port, forwarded) = stage.new_output::<u64>();
        stage.build(|vertex| {
            if let Some(path) = log {
                vertex.handle().set_log_sink(LogSink::create(path)?);
            }
            let output = vertex.output(&port)?;
            let total = Rc::clone(&total);
            let receiver = vertex.on_receive(&records, move |message| {
                total.set(total.get() + message.data.iter().sum::<u64>());
                output.session(&message.time).give_vec(&mut message.data);
            })?;
            *slot.borrow_mut() = Some((receiver, vertex.handle()));
            Ok(())
        })?;

        let mut count = graph.stage("Count");
        let forwarded = count.new_input(&forwarded, Pact::Pipeline)?;
        count.build(|vertex| {
            let counted = Rc::clone(&counted);
            vertex.on_receive(&forwarded, move |message| counted.set(counted.get() + message.data.len()))?;
            Ok(())
        })?;
        Ok(input)
    }).unwrap();

    let (receiver, vertex) = endpoint.borrow_mut().take().unwrap();
    Summing { input, receiver, vertex, sum, downstream }
}

fn worker(config: WorkerConfig) -> Worker {
    Worker::new(config, Allocator::Thread(Thread))
}

#[test]
fn replayed_logs_rebuild_vertex_state() {
    let directory = tempfile::tempdir().unwrap();
    let path = directory.path().join("sum.log");

    {
        let mut worker = worker(WorkerConfig::default());
        let mut sum = summing(&mut worker, Some(&path));
        sum.receiver.set_logging_enabled(true).unwrap();
        assert!(sum.receiver.logging_enabled());
        for record in 1 ..= 3 {
            sum.input.send(record);
        }
        sum.input.advance_to(Pointstamp::new(1));
        sum.input.send(4);
        sum.input.close();
        worker.join();
        assert_eq!(sum.sum.get(), 10);
        assert_eq!(sum.downstream.get(), 4);
    }

    let mut worker = worker(WorkerConfig::default());
    let mut recovered = summing(&mut worker, None);
    let replayed = recovered.vertex.replay(LogReader::open(&path).unwrap()).unwrap();
    assert_eq!(replayed, 2);
    assert_eq!(recovered.sum.get(), 10);
    assert_eq!(recovered.downstream.get(), 0);

    recovered.input.send(5);
    recovered.input.close();
    worker.join();
    assert_eq!(recovered.sum.get(), 15);
    assert_eq!(recovered.downstream.get(), 1);
}

#[test]
fn logging_requires_a_sink_or_directory() {
    let mut plain = worker(WorkerConfig::default());
    let sum = summing(&mut plain, None);
    assert!(matches!(sum.receiver.set_logging_enabled(true), Err(Error::NotSupported(_))));
    assert!(!sum.receiver.logging_enabled());
    drop(sum);
    plain.join();

    let directory = tempfile::tempdir().unwrap();
    let mut configured = worker(WorkerConfig::default().log_directory(directory.path()));
    let mut sum = summing(&mut configured, None);
    sum.receiver.set_logging_enabled(true).unwrap();
    assert!(sum.vertex.has_log_sink());

    sum.input.send(7);
    sum.input.close();
    configured.join();

    let stage = sum.vertex.stage();
    drop(sum);
    let path = LogSink::path_for(directory.path(), stage, 0);
    let entries = LogReader::open(path).unwrap().messages::<Pointstamp, u64>().collect::<Result<Vec<_>, _>>().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].data, vec![7]);
    assert_eq!(entries[0].time, Pointstamp::new(0));
}

#[test]
fn checkpoints_restore_queued_deliveries() {
    let mut worker = worker(WorkerConfig::default());
    let mut sum = summing(&mut worker, None);
    assert!(sum.receiver.stateful());

    sum.vertex.set_available_entrancy(-1);
    sum.input.send(1);
    sum.input.send(2);
    sum.input.flush();
    sum.input.advance_to(Pointstamp::new(1));
    sum.input.send(3);
    sum.input.flush();
    worker.step();
    assert_eq!(sum.receiver.queued(), 2);
    assert_eq!(sum.sum.get(), 0);

    let mut checkpoint = Vec::new();
    sum.receiver.checkpoint(&mut checkpoint).unwrap();
    assert!(!checkpoint.is_empty());
    sum.receiver.restore(&mut &checkpoint[..]).unwrap();
    assert_eq!(sum.receiver.queued(), 2);

    sum.vertex.set_available_entrancy(0);
    sum.input.close();
    worker.join();
    assert_eq!(sum.sum.get(), 6);
    assert_eq!(sum.downstream.get(), 3);
}

#[test]
fn restoring_an_empty_checkpoint_retires_the_mailbox() {
    let mut worker = worker(WorkerConfig::default());
    let mut sum = summing(&mut worker, None);

    sum.vertex.set_available_entrancy(-1);
    sum.input.send(1);
    sum.input.flush();
    assert_eq!(sum.receiver.queued(), 1);
    sum.receiver.restore(&mut std::io::empty()).unwrap();
    assert_eq!(sum.receiver.queued(), 0);

    sum.vertex.set_available_entrancy(0);
    sum.input.close();
    worker.join();
    assert_eq!(sum.sum.get(), 0);
}

#[test]
fn stateless_endpoints_do_not_checkpoint() {
    let mut worker = worker(WorkerConfig::default());
    let (input, scope) = worker.dataflow::<Pointstamp, _, _>(|graph| {
        let (input, stream) = graph.new_input::<u64>()?;
        let scope = graph.new_loop();
        let entered = scope.enter(&stream)?;
        scope.exit(&entered)?;
        Ok((input, scope))
    }).unwrap();

    let mut sink = Vec::new();
    assert!(matches!(input.checkpoint(&mut sink), Err(Error::NotSupported(_))));
    assert!(matches!(input.restore(&mut &sink[..]), Err(Error::NotSupported(_))));
    assert!(!input.stateful());
    assert!(matches!(scope.checkpoint(&mut sink), Err(Error::NotSupported(_))));
    assert!(!scope.stateful());
    assert!(sink.is_empty());

    drop(input);
    worker.join();
}

#[test]
fn logged_batches_reach_the_file_before_the_callback() {
    let directory = tempfile::tempdir().unwrap();
    let path = directory.path().join("observed.log");
    let mut worker = worker(WorkerConfig::default());

    let observed = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&observed);
    let log = path.clone();
    let endpoint = Rc::new(RefCell::new(None));
    let slot = Rc::clone(&endpoint);
    let mut input = worker.dataflow::<Pointstamp, _, _>(move |graph| {
        let (input, stream) = graph.new_input::<u64>()?;
        let mut stage = graph.stage("Observe");
        let records = stage.new_input(&stream, Pact::Pipeline)?;
        stage.build(|vertex| {
            vertex.handle().set_log_sink(LogSink::create(&log)?);
            let (sink, log) = (Rc::clone(&sink), log.clone());
            let receiver = vertex.on_receive(&records, move |message| {
                let on_disk = LogReader::open(&log).unwrap().messages::<Pointstamp, u64>().count();
                sink.borrow_mut().push((message.data.clone(), on_disk));
            })?;
            *slot.borrow_mut() = Some(receiver);
            Ok(())
        })?;
        Ok(input)
    }).unwrap();
    let receiver: Rc<Receiver<Pointstamp, u64>> = endpoint.borrow_mut().take().unwrap();
    receiver.set_logging_enabled(true).unwrap();

    input.send(5);
    input.flush();
    input.send(6);
    input.flush();
    assert_eq!(*observed.borrow(), vec![(vec![5], 1), (vec![6], 2)]);

    input.close();
    worker.join();
}

/// A writer that accepts bytes but cannot flush them.
struct Unflushable;

impl std::io::Write for Unflushable {
    fn write(&mut self, bytes: &[u8]) -> std::io::Result<usize> { Ok(bytes.len()) }
    fn flush(&mut self) -> std::io::Result<()> {
        Err(std::io::Error::other("device gone"))
    }
}

#[test]
#[should_panic(expected = "failed to append to its log")]
fn unflushable_logs_stop_the_vertex() {
    let mut worker = worker(WorkerConfig::default());
    let mut sum = summing(&mut worker, None);
    sum.vertex.set_log_sink(LogSink::new(Unflushable));
    sum.receiver.set_logging_enabled(true).unwrap();
    sum.input.send(1);
    sum.input.flush();
}

#[test]
#[should_panic(expected = "failed to flush its log")]
fn unflushable_logs_fail_at_shutdown() {
    let mut worker = worker(WorkerConfig::default());
    let mut sum = summing(&mut worker, None);
    sum.vertex.set_log_sink(LogSink::new(Unflushable));
    sum.input.close();
    worker.join();
}
