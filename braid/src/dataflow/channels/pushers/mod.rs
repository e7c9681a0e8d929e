pub use self::tee::Output;
pub use self::buffer::{Buffer, OutputHandle, Session};
pub use self::exchange::Exchange;
pub use self::fiber::SendFiber;

pub mod tee;
pub mod buffer;
pub mod exchange;
pub mod fiber;
