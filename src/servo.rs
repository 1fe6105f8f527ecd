//! Per-brand servo facade
//!
//! `ServoDriver` binds one brand codec to one dispatcher and exposes the
//! named operations. Every method validates its arguments first (an invalid
//! argument never touches the bus), encodes through the codec, and returns a
//! `Pending` usable in any of the three calling styles.

use std::sync::Arc;

use bytes::Bytes;

use crate::bus::{CommandDispatcher, Pending, ResponseDecoder};
use crate::codec::{Codec, FutabaCodec, Operation, RobotisP20Codec, Value};
use crate::error::{BusError, ProtocolError};

/// Carries one command's codec knowledge across the dispatch boundary.
struct OpDecoder {
    codec: Arc<dyn Codec>,
    sid: u8,
    op: Operation,
}

impl ResponseDecoder for OpDecoder {
    fn is_complete(&self, buf: &[u8]) -> bool {
        self.codec.frame_complete(buf)
    }

    fn decode(&self, buf: &[u8]) -> Result<Value, ProtocolError> {
        self.codec.decode(self.sid, &self.op, buf)
    }
}

/// High-level driver for every servo of one brand on a bus.
///
/// Methods take the servo id explicitly, so a single driver addresses the
/// whole multi-drop bus. Several drivers may share one dispatcher.
pub struct ServoDriver {
    codec: Arc<dyn Codec>,
    bus: Arc<CommandDispatcher>,
}

impl ServoDriver {
    pub fn new(bus: Arc<CommandDispatcher>, codec: Arc<dyn Codec>) -> Self {
        ServoDriver { codec, bus }
    }

    /// Driver for Futaba RS30x servos.
    pub fn futaba(bus: Arc<CommandDispatcher>) -> Self {
        Self::new(bus, Arc::new(FutabaCodec::new()))
    }

    /// Driver for Robotis Protocol 2.0 servos.
    pub fn robotis_p20(bus: Arc<CommandDispatcher>) -> Self {
        Self::new(bus, Arc::new(RobotisP20Codec::new()))
    }

    pub fn codec(&self) -> &dyn Codec {
        self.codec.as_ref()
    }

    /// Close the underlying bus for every driver sharing it.
    pub fn close(&self) {
        self.bus.close();
    }

    fn check_sid(&self, sid: u8) -> Result<(), BusError> {
        let range = self.codec.servo_ids();
        if !range.contains(&sid) {
            return Err(BusError::Validation(format!(
                "servo id {sid} outside {}..={} for {}",
                range.start(),
                range.end(),
                self.codec.name()
            )));
        }
        Ok(())
    }

    fn submit_op(&self, sid: u8, op: Operation) -> Result<Pending<Value>, BusError> {
        self.check_sid(sid)?;
        let frame = self.codec.encode(sid, &op)?;
        let response = if frame.expects_response {
            Some(self.bus.response_spec(Box::new(OpDecoder {
                codec: self.codec.clone(),
                sid,
                op,
            })))
        } else {
            None
        };
        self.bus.submit(frame.bytes, response)
    }

    /// Is the servo at this id alive?
    pub fn ping(&self, sid: u8) -> Result<Pending<bool>, BusError> {
        Ok(self.submit_op(sid, Operation::Ping)?.with_type(Value::into_bool))
    }

    pub fn get_torque_enable(&self, sid: u8) -> Result<Pending<bool>, BusError> {
        Ok(self
            .submit_op(sid, Operation::GetTorqueEnable)?
            .with_type(Value::into_bool))
    }

    pub fn set_torque_enable(&self, enabled: bool, sid: u8) -> Result<Pending<()>, BusError> {
        Ok(self
            .submit_op(sid, Operation::SetTorqueEnable(enabled))?
            .with_type(Value::into_unit))
    }

    /// Present input voltage, in volts.
    pub fn get_voltage(&self, sid: u8) -> Result<Pending<f64>, BusError> {
        Ok(self
            .submit_op(sid, Operation::GetVoltage)?
            .with_type(Value::into_volts))
    }

    /// Internal temperature, in degrees Celsius.
    pub fn get_temperature(&self, sid: u8) -> Result<Pending<f64>, BusError> {
        Ok(self
            .submit_op(sid, Operation::GetTemperature)?
            .with_type(Value::into_celsius))
    }

    /// Commanded goal position, in degrees.
    pub fn get_target_position(&self, sid: u8) -> Result<Pending<f64>, BusError> {
        Ok(self
            .submit_op(sid, Operation::GetTargetPosition)?
            .with_type(Value::into_degrees))
    }

    /// Command a goal position, in degrees. Fails with `Validation` when the
    /// angle is outside the brand's mechanical range; nothing is sent.
    pub fn set_target_position(&self, degrees: f64, sid: u8) -> Result<Pending<()>, BusError> {
        let range = self.codec.position_range();
        if !range.contains(&degrees) {
            return Err(BusError::Validation(format!(
                "target position {degrees} outside {}..={} degrees for {}",
                range.start(),
                range.end(),
                self.codec.name()
            )));
        }
        Ok(self
            .submit_op(sid, Operation::SetTargetPosition(degrees))?
            .with_type(Value::into_unit))
    }

    /// Measured present position, in degrees.
    pub fn get_current_position(&self, sid: u8) -> Result<Pending<f64>, BusError> {
        Ok(self
            .submit_op(sid, Operation::GetCurrentPosition)?
            .with_type(Value::into_degrees))
    }

    /// Raw memory-map read, the escape hatch for registers without a named
    /// operation.
    pub fn read_memory(
        &self,
        sid: u8,
        address: u16,
        length: u16,
    ) -> Result<Pending<Bytes>, BusError> {
        Ok(self
            .submit_op(sid, Operation::ReadMemory { address, length })?
            .with_type(Value::into_raw))
    }

    /// Raw memory-map write.
    pub fn write_memory(
        &self,
        sid: u8,
        address: u16,
        data: Vec<u8>,
    ) -> Result<Pending<()>, BusError> {
        Ok(self
            .submit_op(sid, Operation::WriteMemory { address, data })?
            .with_type(Value::into_unit))
    }
}
