#[cfg(test)]
pub mod mock;
pub mod serial;
pub mod traits;

pub use serial::{SerialTransport, DEFAULT_BAUD_RATE};
pub use traits::Transport;
