//! Transport trait abstraction for pluggable byte-stream backends

use async_trait::async_trait;
use std::io;

/// A half-duplex byte stream to the servo bus.
///
/// The dispatcher owns the transport exclusively and never issues overlapping
/// reads and writes. Implementations carry no protocol knowledge.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Write the whole buffer to the bus.
    async fn write_all(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Read whatever bytes are available, waiting for at least one.
    /// Returning `Ok(0)` means the stream has ended.
    async fn read_some(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Close the transport gracefully.
    async fn shutdown(&mut self) -> io::Result<()>;
}
