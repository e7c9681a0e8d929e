//! Traits, implementations, and macros related to logging braid events.

use serde::{Deserialize, Serialize};

/// Logger for braid dataflow system events.
pub type BraidLogger = braid_logging::Logger<BraidEvent>;

pub use braid_communication::logging::{CommunicationEvent, CommunicationLogger};

/// The name under which `BraidEvent`s are logged.
pub const BRAID_LOG: &str = "braid";
/// The name under which communication events are logged.
pub const COMMUNICATION_LOG: &str = "braid/communication";

#[derive(Serialize, Deserialize, Debug, Clone, Hash, Eq, PartialEq)]
/// The creation of a stage.
pub struct StageEvent {
    /// Worker-unique dataflow identifier.
    pub dataflow: usize,
    /// Dataflow-unique stage identifier.
    pub stage: usize,
    /// A helpful name.
    pub name: String,
    /// Number of vertices across all workers.
    pub parallelism: usize,
    /// Vertices hosted by this worker.
    pub local_vertices: Vec<usize>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Hash, Eq, PartialEq)]
/// The wiring of a stage output to a stage input.
pub struct ChannelEvent {
    /// Worker-unique dataflow identifier.
    pub dataflow: usize,
    /// Communication channel identifier.
    pub channel: usize,
    /// Source descriptor, indicating stage and output port.
    pub source: (usize, usize),
    /// Target descriptor, indicating stage and input port.
    pub target: (usize, usize),
    /// The partitioning contract.
    pub pact: String,
    /// Send-fibers instantiated on this worker.
    pub fibers: usize,
}

#[derive(Serialize, Deserialize, Debug, Clone, Hash, Eq, PartialEq)]
/// Message send or receive event.
pub struct MessagesEvent {
    /// `true` if send event, `false` if receive event.
    pub is_send: bool,
    /// Channel identifier.
    pub channel: usize,
    /// Sending `(worker, vertex)`.
    pub source: (usize, usize),
    /// Receiving `(worker, vertex)`.
    pub target: (usize, usize),
    /// Message sequence number.
    pub seq_no: usize,
    /// Number of typed records in the message.
    pub length: usize,
    /// `true` if the message crossed a process boundary in serialized form.
    pub serialized: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, Hash, Eq, PartialEq)]
/// Send or receive of progress information.
pub struct ProgressEvent {
    /// `true` if the event is a send, and `false` if it is a receive.
    pub is_send: bool,
    /// Source worker index.
    pub source: usize,
    /// Communication channel identifier.
    pub channel: usize,
    /// Message sequence number.
    pub seq_no: usize,
    /// Worker-unique dataflow identifier.
    pub dataflow: usize,
    /// List of message updates, containing Target descriptor, timestamp as string, and delta.
    pub messages: Vec<(usize, usize, String, i64)>,
    /// List of capability updates, containing Source descriptor, timestamp as string, and delta.
    pub internal: Vec<(usize, usize, String, i64)>,
}

/// Records the starting and stopping of a vertex callback.
#[derive(Serialize, Deserialize, Debug, Clone, Hash, Eq, PartialEq)]
pub enum StartStop {
    /// Callback starts.
    Start,
    /// Callback stops.
    Stop,
}

/// What a vertex was invoked for.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub enum Invocation {
    /// Delivery of a message on an input.
    Receive,
    /// Delivery of a notification.
    Notify,
}

#[derive(Serialize, Deserialize, Debug, Clone, Hash, Eq, PartialEq)]
/// Vertex callback start or stop.
pub struct ScheduleEvent {
    /// Stage identifier.
    pub stage: usize,
    /// Vertex identifier within the stage.
    pub vertex: usize,
    /// The reason for the invocation.
    pub invocation: Invocation,
    /// `Start` if the callback is starting, `Stop` if it is stopping.
    pub start_stop: StartStop,
}

impl ScheduleEvent {
    /// Creates a new start scheduling event.
    pub fn start(stage: usize, vertex: usize, invocation: Invocation) -> Self {
        ScheduleEvent { stage, vertex, invocation, start_stop: StartStop::Start }
    }
    /// Creates a new stop scheduling event.
    pub fn stop(stage: usize, vertex: usize, invocation: Invocation) -> Self {
        ScheduleEvent { stage, vertex, invocation, start_stop: StartStop::Stop }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Hash, Eq, PartialEq)]
/// An event in a braid worker.
pub enum BraidEvent {
    /// Stage creation.
    Stage(StageEvent),
    /// Channel wiring.
    Channel(ChannelEvent),
    /// Message send or receive.
    Messages(MessagesEvent),
    /// Progress broadcast or receipt.
    Progress(ProgressEvent),
    /// Vertex callback start or stop.
    Schedule(ScheduleEvent),
    /// Unstructured event.
    Text(String),
}

impl From<StageEvent> for BraidEvent {
    fn from(v: StageEvent) -> BraidEvent { BraidEvent::Stage(v) }
}

impl From<ChannelEvent> for BraidEvent {
    fn from(v: ChannelEvent) -> BraidEvent { BraidEvent::Channel(v) }
}

impl From<MessagesEvent> for BraidEvent {
    fn from(v: MessagesEvent) -> BraidEvent { BraidEvent::Messages(v) }
}

impl From<ProgressEvent> for BraidEvent {
    fn from(v: ProgressEvent) -> BraidEvent { BraidEvent::Progress(v) }
}

impl From<ScheduleEvent> for BraidEvent {
    fn from(v: ScheduleEvent) -> BraidEvent { BraidEvent::Schedule(v) }
}

impl From<String> for BraidEvent {
    fn from(v: String) -> BraidEvent { BraidEvent::Text(v) }
}
