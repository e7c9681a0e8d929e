use std::cell::RefCell;
use std::rc::Rc;

use braid::{Config, Worker, WorkerConfig};
use braid::communication::{Allocator, Config as CommunicationConfig};
use braid::communication::allocator::Thread;
use braid::dataflow::channels::Pact;
use braid::dataflow::operators::{Input, Loops, Probe};
use braid::progress::Pointstamp;

type Record = (u64, String);

/// Sends two keyed records from worker zero into a two-vertex stage, collecting what each
/// vertex receives.
fn route_by_key(config: Config) -> Vec<(usize, Record)> {
    let guards = braid::execute(config, |worker| {
        let received = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&received);
        let mut input = worker.dataflow::<Pointstamp, _, _>(move |graph| {
            let (input, stream) = graph.new_input::<Record>()?;
            let mut stage = graph.stage("Keyed").parallelism(2);
            let records = stage.new_input(&stream, Pact::exchange(|(key, _): &Record| *key))?;
            stage.build(|vertex| {
                let index = vertex.index();
                let sink = Rc::clone(&sink);
                vertex.on_receive_records(&records, move |record, _time| sink.borrow_mut().push((index, record)))?;
                Ok(())
            })?;
            Ok(input)
        }).unwrap();

        if worker.index() == 0 {
            input.send((1, "x".to_owned()));
            input.send((2, "y".to_owned()));
        }
        input.close();
        worker.join();
        received.take()
    }).unwrap();

    let mut routed: Vec<_> = guards.join().into_iter().flat_map(|result| result.unwrap()).collect();
    routed.sort();
    routed
}

fn expected_routing() -> Vec<(usize, Record)> {
    vec![(0, (2, "y".to_owned())), (1, (1, "x".to_owned()))]
}

#[test]
fn keyed_routing_single_worker() {
    assert_eq!(route_by_key(Config::thread()), expected_routing());
}

#[test]
fn keyed_routing_shared_process() {
    assert_eq!(route_by_key(Config::process(2)), expected_routing());
}

#[test]
fn keyed_routing_serialized() {
    assert_eq!(route_by_key(Config::process_binary(2)), expected_routing());
}

/// Runs one record around a loop of three iterations, under `config`.
///
/// Returns the batches leaving the loop and every entrancy the loop body observed.
fn iterate_three_times(config: WorkerConfig) -> (Vec<(Pointstamp, Vec<u64>)>, Vec<i32>) {
    let mut worker = Worker::new(config, Allocator::Thread(Thread));
    let batches = Rc::new(RefCell::new(Vec::new()));
    let entrancies = Rc::new(RefCell::new(Vec::new()));
    let (sink, observed) = (Rc::clone(&batches), Rc::clone(&entrancies));

    let (mut input, probe, scope) = worker.dataflow::<Pointstamp, _, _>(move |graph| {
        let (input, stream) = graph.new_input::<u64>()?;
        let scope = graph.new_loop();
        let entered = scope.enter(&stream)?;
        let (handle, cycle) = scope.feedback::<u64>(3)?;

        let mut body = graph.stage("Body");
        let first = body.new_input(&entered, Pact::Pipeline)?;
        let again = body.new_input(&cycle, Pact::Pipeline)?;
        let (port, iterated) = body.new_output::<u64>();
        body.build(|vertex| {
            let output = vertex.output(&port)?;
            let forward = output.clone();
            let (this, seen) = (vertex.handle(), Rc::clone(&observed));
            vertex.on_receive(&first, move |message| {
                seen.borrow_mut().push(this.available_entrancy());
                forward.session(&message.time).give_vec(&mut message.data);
            })?;
            let (this, seen) = (vertex.handle(), Rc::clone(&observed));
            vertex.on_receive(&again, move |message| {
                seen.borrow_mut().push(this.available_entrancy());
                output.session(&message.time).give_vec(&mut message.data);
            })?;
            Ok(())
        })?;
        handle.connect_loop(&iterated)?;
        let exited = scope.exit(&iterated)?;

        let mut consumer = graph.stage("Consumer");
        let results = consumer.new_input(&exited, Pact::Pipeline)?;
        consumer.build(|vertex| {
            let sink = Rc::clone(&sink);
            vertex.on_receive(&results, move |message| sink.borrow_mut().push((message.time.clone(), message.data.clone())))?;
            Ok(())
        })?;
        Ok((input, exited.probe()?, scope))
    }).unwrap();

    input.send(7);
    input.advance_to(Pointstamp::new(1));
    worker.step_while(|| probe.less_than(&Pointstamp::new(1)));
    assert!(scope.complete(&Pointstamp::new(0)));

    input.close();
    worker.join();
    let batches = batches.take();
    let entrancies = entrancies.take();
    (batches, entrancies)
}

fn assert_three_iterations(batches: &[(Pointstamp, Vec<u64>)]) {
    assert_eq!(batches.len(), 3);
    for (time, data) in batches.iter() {
        assert_eq!(time, &Pointstamp::new(0));
        assert_eq!(data, &vec![7]);
    }
}

#[test]
fn loop_iterations_leave_at_the_entry_epoch() {
    let (batches, entrancies) = iterate_three_times(WorkerConfig::default());
    assert_three_iterations(&batches);
    assert_eq!(entrancies, vec![-1, -1, -1]);
}

#[test]
fn loops_run_with_nested_entry() {
    let (batches, entrancies) = iterate_three_times(WorkerConfig::default().default_entrancy(1));
    assert_three_iterations(&batches);
    assert_eq!(entrancies.len(), 3);
    assert!(entrancies.iter().all(|entrancy| *entrancy >= -1));
    assert_eq!(entrancies[0], 0);
}

#[test]
fn large_volumes_cross_processes_in_order() {
    let config = Config {
        communication: CommunicationConfig::ProcessBinary(2),
        worker: WorkerConfig::default().page_size(1024),
    };
    let guards = braid::execute(config, |worker| {
        let received = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&received);
        let mut input = worker.dataflow::<Pointstamp, _, _>(move |graph| {
            let (input, stream) = graph.new_input::<u64>()?;
            let mut stage = graph.stage("Collect").parallelism(2);
            let records = stage.new_input(&stream, Pact::exchange(|_: &u64| 1))?;
            stage.build(|vertex| {
                let sink = Rc::clone(&sink);
                vertex.on_receive_records(&records, move |record, _time| sink.borrow_mut().push(record))?;
                Ok(())
            })?;
            Ok(input)
        }).unwrap();

        if worker.index() == 0 {
            for record in 0 .. 10_000u64 {
                input.send(record);
            }
        }
        input.close();
        worker.join();
        (worker.index(), received.take())
    }).unwrap();

    for result in guards.join() {
        let (index, records) = result.unwrap();
        if index == 1 {
            assert_eq!(records, (0 .. 10_000).collect::<Vec<_>>());
        }
        else {
            assert!(records.is_empty());
        }
    }
}
