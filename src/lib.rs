//! Multi-brand serial servo driver
//!
//! Servos from different vendors speak different wire protocols over the
//! same kind of half-duplex serial bus, where only one request may be in
//! flight at a time. This crate splits the problem into three layers:
//!
//! - [`transport`]: raw byte I/O, with [`SerialTransport`] for real hardware
//!   and a trait seam for anything else.
//! - [`bus`]: the [`CommandDispatcher`], a single task that owns the
//!   transport, serialises commands FIFO, and drives the timeout and retry
//!   policy. Callers get back a [`Pending`] they can await, block on, or
//!   attach a callback to.
//! - [`codec`]: per-brand encode and decode, behind the [`Codec`] trait.
//!
//! [`ServoDriver`] ties the layers together into named operations:
//!
//! ```no_run
//! use std::sync::Arc;
//! use servobus::{BusConfig, CommandDispatcher, SerialTransport, ServoDriver};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let port = SerialTransport::open_default("/dev/ttyUSB0")?;
//! let bus = Arc::new(CommandDispatcher::new(port, BusConfig::default()));
//! let driver = ServoDriver::futaba(bus);
//!
//! driver.set_torque_enable(true, 1)?.resolve().await?;
//! driver.set_target_position(45.0, 1)?.resolve().await?;
//! let volts = driver.get_voltage(1)?.resolve().await?;
//! println!("servo 1 runs at {volts} V");
//! # Ok(())
//! # }
//! ```

pub mod bus;
pub mod codec;
pub mod error;
pub mod servo;
pub mod transport;

pub use bus::{BusConfig, CommandDispatcher, Pending, ResponseDecoder, ResponseSpec};
pub use codec::{Codec, Frame, FutabaCodec, Operation, RobotisP20Codec, Value};
pub use error::{BusError, ProtocolError};
pub use servo::ServoDriver;
pub use transport::{SerialTransport, Transport, DEFAULT_BAUD_RATE};
