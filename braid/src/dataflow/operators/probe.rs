//! Monitor progress at a `Stream`.

use std::rc::Rc;

use crate::Data;
use crate::dataflow::channels::Pact;
use crate::dataflow::context::Context;
use crate::dataflow::graph::Stream;
use crate::error::Error;
use crate::progress::Timestamp;
use crate::progress::frontier::Antichain;

/// Monitors progress at a `Stream`.
pub trait Probe<T: Timestamp> {
    /// Constructs a progress probe which indicates which timestamps have elapsed at the stream.
    ///
    /// Records reaching the probe are discarded.
    fn probe(&self) -> Result<ProbeHandle<T>, Error>;
}

impl<T: Timestamp, D: Data> Probe<T> for Stream<T, D> {
    fn probe(&self) -> Result<ProbeHandle<T>, Error> {
        let mut stage = self.graph().stage("Probe").parallelism(self.parallelism());
        let input = stage.new_input(self, Pact::Pipeline)?;
        let handle = ProbeHandle { stage: stage.id(), context: self.graph().context() };
        stage.build(|vertex| {
            vertex.on_receive(&input, |message| message.data.clear())?;
            Ok(())
        })?;
        Ok(handle)
    }
}

/// Reports information about progress at the probe.
pub struct ProbeHandle<T: Timestamp> {
    stage: usize,
    context: Rc<Context<T>>,
}

impl<T: Timestamp> Clone for ProbeHandle<T> {
    fn clone(&self) -> Self {
        ProbeHandle { stage: self.stage, context: Rc::clone(&self.context) }
    }
}

impl<T: Timestamp> ProbeHandle<T> {
    /// The times that may still arrive at the probe.
    ///
    /// Before the dataflow activates, every time may still arrive.
    pub fn frontier(&self) -> Antichain<T> {
        match self.context.tracker.borrow().as_ref() {
            Some(tracker) => tracker.frontier(self.stage, 0).to_owned(),
            None => Antichain::from_elem(T::minimum()),
        }
    }

    /// Returns true iff the frontier is strictly less than `time`.
    #[inline]
    pub fn less_than(&self, time: &T) -> bool { self.frontier().less_than(time) }
    /// Returns true iff the frontier is less than or equal to `time`.
    #[inline]
    pub fn less_equal(&self, time: &T) -> bool { self.frontier().less_equal(time) }
    /// Returns true iff the frontier is empty: nothing further can arrive.
    #[inline]
    pub fn done(&self) -> bool { self.frontier().is_empty() }
}
