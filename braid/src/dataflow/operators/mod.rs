//! Extension traits for `Graph` and `Stream` implementing the basic operators.
//!
//! Every operator here is an ordinary stage, built with `Graph::stage` like any other. They
//! introduce records, carry them around loops, and observe what comes out.

pub use self::input::{Input, InputHandle};
pub use self::loops::{FeedbackHandle, LoopContext, Loops};
pub use self::probe::{Probe, ProbeHandle};
pub use self::subscribe::Subscribe;

pub mod input;
pub mod loops;
pub mod probe;
pub mod subscribe;
