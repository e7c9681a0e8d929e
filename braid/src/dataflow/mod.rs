//! Abstractions for braid dataflow programming.
//!
//! Braid dataflow programs are assembled from stages, each a logical operator instantiated as
//! vertices spread over the workers. A worker declares the graph through a [`Graph`], wiring
//! each stage's [`Stream`]s to the inputs of others under a partitioning contract, and then
//! steps the activated dataflow.
//!
//! ```
//! use braid::dataflow::channels::Pact;
//! use braid::dataflow::operators::{Input, Probe};
//! use braid::progress::Pointstamp;
//!
//! braid::execute_directly(|worker| {
//!     let (mut input, probe) = worker.dataflow::<Pointstamp, _, _>(|graph| {
//!         let (input, stream) = graph.new_input::<u64>()?;
//!         let mut stage = graph.stage("Double");
//!         let records = stage.new_input(&stream, Pact::exchange(|x: &u64| *x))?;
//!         let (port, doubled) = stage.new_output::<u64>();
//!         stage.build(|vertex| {
//!             let output = vertex.output(&port)?;
//!             vertex.on_receive_records(&records, move |record, time| {
//!                 output.session(time).give(2 * record);
//!             })?;
//!             Ok(())
//!         })?;
//!         Ok((input, doubled.probe()?))
//!     }).unwrap();
//!
//!     for round in 0 .. 3 {
//!         input.send(round);
//!         input.advance_to(Pointstamp::new(round + 1));
//!         worker.step_while(|| probe.less_than(input.time()));
//!     }
//! });
//! ```

pub use self::graph::{Graph, InputPort, OutputPort, StageBuilder, Stream, VertexBuilder};
pub use self::stage::{Stage, StageInput, StageOutput};
pub use self::vertex::Vertex;
pub use self::endpoints::{Callback, Receiver, VertexInput, VertexOutput};

pub mod channels;
pub mod operators;
pub mod stage;
pub mod vertex;
pub mod endpoints;
pub mod graph;

pub(crate) mod cable;
pub(crate) mod context;
pub(crate) mod runtime;
