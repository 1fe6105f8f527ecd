//! Serial port transport backed by tokio-serial

use async_trait::async_trait;
use std::io;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::debug;

use super::Transport;

/// Default baud rate for the supported servo brands.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// A `Transport` over a physical serial port.
pub struct SerialTransport {
    stream: SerialStream,
    port: String,
}

impl SerialTransport {
    /// Open a serial port at the given baud rate.
    pub fn open(port: &str, baud_rate: u32) -> tokio_serial::Result<Self> {
        let stream = tokio_serial::new(port, baud_rate).open_native_async()?;
        debug!(port, baud_rate, "serial port opened");
        Ok(SerialTransport {
            stream,
            port: port.to_string(),
        })
    }

    /// Open with the brand-typical default baud rate.
    pub fn open_default(port: &str) -> tokio_serial::Result<Self> {
        Self::open(port, DEFAULT_BAUD_RATE)
    }

    pub fn port(&self) -> &str {
        &self.port
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.stream.write_all(bytes).await?;
        self.stream.flush().await
    }

    async fn read_some(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf).await
    }

    async fn shutdown(&mut self) -> io::Result<()> {
        // Serial lines have no shutdown handshake; flushing is all there is.
        self.stream.flush().await
    }
}
