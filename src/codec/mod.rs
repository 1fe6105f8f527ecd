//! Brand codec boundary
//!
//! A `Codec` maps logical servo operations to wire bytes and back. Framing
//! (headers, checksums, addressing) is entirely brand-defined; the dispatcher
//! only ever sees opaque byte buffers plus the completeness/decode hooks a
//! codec provides. Codecs are stateless and shared behind an `Arc`.

pub mod futaba;
pub mod robotis;

use std::ops::RangeInclusive;

use bytes::Bytes;

use crate::error::{BusError, ProtocolError};

pub use futaba::FutabaCodec;
pub use robotis::RobotisP20Codec;

/// A logical servo operation, brand-independent.
///
/// Units are physical: degrees, volts, degrees Celsius. Each codec translates
/// to its own register layout and raw units.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// Confirm the device at this id is alive.
    Ping,
    GetTorqueEnable,
    SetTorqueEnable(bool),
    /// Present input voltage, in volts.
    GetVoltage,
    /// Internal temperature, in degrees Celsius.
    GetTemperature,
    /// Commanded goal position, in degrees.
    GetTargetPosition,
    SetTargetPosition(f64),
    /// Measured present position, in degrees.
    GetCurrentPosition,
    /// Raw memory-map read, for registers without a named operation.
    ReadMemory { address: u16, length: u16 },
    /// Raw memory-map write.
    WriteMemory { address: u16, data: Vec<u8> },
}

/// A decoded response value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Write acknowledged (or fire-and-forget write sent).
    None,
    Bool(bool),
    Degrees(f64),
    Volts(f64),
    Celsius(f64),
    Raw(Bytes),
}

impl Value {
    pub fn into_unit(self) -> Result<(), BusError> {
        match self {
            Value::None => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    pub fn into_bool(self) -> Result<bool, BusError> {
        match self {
            Value::Bool(b) => Ok(b),
            other => Err(unexpected(&other)),
        }
    }

    pub fn into_degrees(self) -> Result<f64, BusError> {
        match self {
            Value::Degrees(d) => Ok(d),
            other => Err(unexpected(&other)),
        }
    }

    pub fn into_volts(self) -> Result<f64, BusError> {
        match self {
            Value::Volts(v) => Ok(v),
            other => Err(unexpected(&other)),
        }
    }

    pub fn into_celsius(self) -> Result<f64, BusError> {
        match self {
            Value::Celsius(c) => Ok(c),
            other => Err(unexpected(&other)),
        }
    }

    pub fn into_raw(self) -> Result<Bytes, BusError> {
        match self {
            Value::Raw(b) => Ok(b),
            other => Err(unexpected(&other)),
        }
    }
}

fn unexpected(value: &Value) -> BusError {
    ProtocolError::UnexpectedPayload(format!("decoder produced {value:?}")).into()
}

/// One encoded command ready for the wire.
#[derive(Debug, Clone)]
pub struct Frame {
    pub bytes: Bytes,
    /// Whether the device will answer. Brand-dependent even for the same
    /// logical operation (Futaba writes are silent, Robotis writes ACK).
    pub expects_response: bool,
}

impl Frame {
    pub fn request(bytes: Bytes) -> Self {
        Frame {
            bytes,
            expects_response: true,
        }
    }

    pub fn fire_and_forget(bytes: Bytes) -> Self {
        Frame {
            bytes,
            expects_response: false,
        }
    }
}

/// Brand-specific encoder/decoder between logical operations and wire bytes.
pub trait Codec: Send + Sync + 'static {
    /// Brand name, used in logs and `NotSupported` errors.
    fn name(&self) -> &'static str;

    /// Valid unicast servo ids on this brand's bus.
    fn servo_ids(&self) -> RangeInclusive<u8>;

    /// Mechanical target-position range, in degrees.
    fn position_range(&self) -> RangeInclusive<f64>;

    /// Encode an operation for one servo. `BusError::NotSupported` if the
    /// brand has no rendition of the operation; `BusError::Validation` if an
    /// argument cannot be expressed on the wire.
    fn encode(&self, sid: u8, op: &Operation) -> Result<Frame, BusError>;

    /// Has a whole response frame arrived? Called on every accumulated
    /// receive buffer; must be a pure length/shape check.
    fn frame_complete(&self, buf: &[u8]) -> bool;

    /// Decode a complete response frame into a typed value.
    fn decode(&self, sid: u8, op: &Operation, buf: &[u8]) -> Result<Value, ProtocolError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_accessors_reject_mismatches() {
        assert!(Value::Bool(true).into_bool().unwrap());
        assert!(Value::Bool(true).into_volts().is_err());
        assert!(Value::None.into_unit().is_ok());
        assert_eq!(Value::Degrees(12.5).into_degrees().unwrap(), 12.5);
    }
}
