//! Robotis Dynamixel Protocol 2.0 codec
//!
//! Instruction packet: `FF FF FD 00 | ID | LEN_L LEN_H | INST | Params... | CRC_L CRC_H`
//! Status packet:      `FF FF FD 00 | ID | LEN_L LEN_H | 0x55 | ERR | Params... | CRC_L CRC_H`
//!
//! LEN counts everything after itself (instruction + params + CRC). The CRC
//! is CRC-16/IBM (poly 0x8005, init 0) over every byte before the CRC field.
//! Unlike Futaba, a write is answered with a status packet, so writes occupy
//! the in-flight slot until that status arrives.

use std::ops::RangeInclusive;

use bytes::{BufMut, Bytes, BytesMut};

use super::{Codec, Frame, Operation, Value};
use crate::error::{BusError, ProtocolError};

const INSTRUCTION_PING: u8 = 0x01;
const INSTRUCTION_READ: u8 = 0x02;
const INSTRUCTION_WRITE: u8 = 0x03;
const STATUS_INSTRUCTION: u8 = 0x55;

const HEADER: [u8; 4] = [0xFF, 0xFF, 0xFD, 0x00];
const STATUS_PARAM_INDEX: usize = 9;

// Control table addresses (X-series).
const ADDR_TORQUE_ENABLE: u16 = 64;
const ADDR_GOAL_POSITION: u16 = 116;
const ADDR_PRESENT_POSITION: u16 = 132;
const ADDR_PRESENT_VOLTAGE: u16 = 144;
const ADDR_PRESENT_TEMPERATURE: u16 = 146;

/// One full turn is 4096 pulses; 0 pulses is -180 degrees.
const PULSES_PER_TURN: f64 = 4096.0;

/// Codec for Robotis servos speaking Protocol 2.0.
#[derive(Debug, Default, Clone, Copy)]
pub struct RobotisP20Codec;

impl RobotisP20Codec {
    pub fn new() -> Self {
        RobotisP20Codec
    }

    fn read_command(&self, sid: u8, address: u16, length: u16) -> Frame {
        let mut params = Vec::with_capacity(4);
        params.extend_from_slice(&address.to_le_bytes());
        params.extend_from_slice(&length.to_le_bytes());
        Frame::request(build_packet(sid, INSTRUCTION_READ, &params))
    }

    fn write_command(&self, sid: u8, address: u16, data: &[u8]) -> Frame {
        let mut params = Vec::with_capacity(2 + data.len());
        params.extend_from_slice(&address.to_le_bytes());
        params.extend_from_slice(data);
        Frame::request(build_packet(sid, INSTRUCTION_WRITE, &params))
    }

    /// Validate a status packet and return its parameter field.
    fn payload<'a>(&self, sid: u8, buf: &'a [u8]) -> Result<&'a [u8], ProtocolError> {
        if buf.len() < 11 || buf[..4] != HEADER {
            return Err(ProtocolError::Malformed(format!(
                "status packet too short or bad header ({} bytes)",
                buf.len()
            )));
        }
        let length = u16::from_le_bytes([buf[5], buf[6]]) as usize;
        if buf.len() != 7 + length || length < 4 {
            return Err(ProtocolError::Malformed(format!(
                "length field {} disagrees with packet size {}",
                length,
                buf.len()
            )));
        }
        let expected = crc16_ibm(&buf[..buf.len() - 2]);
        let got = u16::from_le_bytes([buf[buf.len() - 2], buf[buf.len() - 1]]);
        if expected != got {
            return Err(ProtocolError::Checksum { expected, got });
        }
        if buf[7] != STATUS_INSTRUCTION {
            return Err(ProtocolError::Malformed(format!(
                "instruction {:#04x} is not a status packet",
                buf[7]
            )));
        }
        if buf[4] != sid {
            return Err(ProtocolError::WrongServo {
                expected: sid,
                got: buf[4],
            });
        }
        if buf[8] != 0 {
            return Err(ProtocolError::DeviceFault(buf[8]));
        }
        Ok(&buf[STATUS_PARAM_INDEX..buf.len() - 2])
    }
}

impl Codec for RobotisP20Codec {
    fn name(&self) -> &'static str {
        "robotis-p2.0"
    }

    fn servo_ids(&self) -> RangeInclusive<u8> {
        0..=252
    }

    fn position_range(&self) -> RangeInclusive<f64> {
        -180.0..=180.0
    }

    fn encode(&self, sid: u8, op: &Operation) -> Result<Frame, BusError> {
        let frame = match op {
            Operation::Ping => Frame::request(build_packet(sid, INSTRUCTION_PING, &[])),
            Operation::GetTorqueEnable => self.read_command(sid, ADDR_TORQUE_ENABLE, 1),
            Operation::SetTorqueEnable(on) => {
                self.write_command(sid, ADDR_TORQUE_ENABLE, &[u8::from(*on)])
            }
            Operation::GetVoltage => self.read_command(sid, ADDR_PRESENT_VOLTAGE, 2),
            Operation::GetTemperature => self.read_command(sid, ADDR_PRESENT_TEMPERATURE, 1),
            Operation::GetTargetPosition => self.read_command(sid, ADDR_GOAL_POSITION, 4),
            Operation::SetTargetPosition(degrees) => {
                let raw = degrees_to_pulses(*degrees);
                self.write_command(sid, ADDR_GOAL_POSITION, &raw.to_le_bytes())
            }
            Operation::GetCurrentPosition => self.read_command(sid, ADDR_PRESENT_POSITION, 4),
            Operation::ReadMemory { address, length } => {
                self.read_command(sid, *address, *length)
            }
            Operation::WriteMemory { address, data } => {
                if data.is_empty() {
                    return Err(BusError::Validation("empty write".into()));
                }
                self.write_command(sid, *address, data)
            }
        };
        Ok(frame)
    }

    fn frame_complete(&self, buf: &[u8]) -> bool {
        if buf.len() < 7 {
            return false;
        }
        let length = u16::from_le_bytes([buf[5], buf[6]]) as usize;
        buf.len() >= 7 + length
    }

    fn decode(&self, sid: u8, op: &Operation, buf: &[u8]) -> Result<Value, ProtocolError> {
        let data = self.payload(sid, buf)?;
        match op {
            // A well-formed status from the right id is proof of life; the
            // parameters carry model number and firmware version.
            Operation::Ping => Ok(Value::Bool(true)),
            Operation::GetTorqueEnable => Ok(Value::Bool(byte(data)? == 0x01)),
            // Present input voltage is reported in 0.1 V units.
            Operation::GetVoltage => Ok(Value::Volts(f64::from(word(data)?) / 10.0)),
            Operation::GetTemperature => Ok(Value::Celsius(f64::from(byte(data)? as i8))),
            Operation::GetTargetPosition | Operation::GetCurrentPosition => {
                Ok(Value::Degrees(pulses_to_degrees(dword(data)?)))
            }
            Operation::SetTorqueEnable(_)
            | Operation::SetTargetPosition(_)
            | Operation::WriteMemory { .. } => {
                // Error byte already checked; the ACK carries no payload.
                Ok(Value::None)
            }
            Operation::ReadMemory { length, .. } => {
                if data.len() != *length as usize {
                    return Err(ProtocolError::UnexpectedPayload(format!(
                        "asked for {length} bytes, servo returned {}",
                        data.len()
                    )));
                }
                Ok(Value::Raw(Bytes::copy_from_slice(data)))
            }
        }
    }
}

fn build_packet(sid: u8, instruction: u8, params: &[u8]) -> Bytes {
    let length = (1 + params.len() + 2) as u16;
    let mut buf = BytesMut::with_capacity(10 + params.len());
    buf.put_slice(&HEADER);
    buf.put_u8(sid);
    buf.put_u16_le(length);
    buf.put_u8(instruction);
    buf.put_slice(params);
    let crc = crc16_ibm(&buf);
    buf.put_u16_le(crc);
    buf.freeze()
}

/// CRC-16/IBM: polynomial 0x8005, initial value 0, no reflection.
fn crc16_ibm(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &b in data {
        crc ^= u16::from(b) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x8005
            } else {
                crc << 1
            };
        }
    }
    crc
}

fn degrees_to_pulses(degrees: f64) -> i32 {
    ((degrees + 180.0) * PULSES_PER_TURN / 360.0).round() as i32
}

fn pulses_to_degrees(pulses: i32) -> f64 {
    f64::from(pulses) * 360.0 / PULSES_PER_TURN - 180.0
}

fn byte(data: &[u8]) -> Result<u8, ProtocolError> {
    match data {
        [b] => Ok(*b),
        _ => Err(ProtocolError::UnexpectedPayload(format!(
            "expected 1 parameter byte, got {}",
            data.len()
        ))),
    }
}

fn word(data: &[u8]) -> Result<u16, ProtocolError> {
    match data {
        [lo, hi] => Ok(u16::from_le_bytes([*lo, *hi])),
        _ => Err(ProtocolError::UnexpectedPayload(format!(
            "expected 2 parameter bytes, got {}",
            data.len()
        ))),
    }
}

fn dword(data: &[u8]) -> Result<i32, ProtocolError> {
    match data {
        [a, b, c, d] => Ok(i32::from_le_bytes([*a, *b, *c, *d])),
        _ => Err(ProtocolError::UnexpectedPayload(format!(
            "expected 4 parameter bytes, got {}",
            data.len()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a status packet with a valid CRC for tests.
    fn status_packet(sid: u8, error: u8, params: &[u8]) -> Vec<u8> {
        let length = (2 + params.len() + 2) as u16;
        let mut buf = Vec::new();
        buf.extend_from_slice(&HEADER);
        buf.push(sid);
        buf.extend_from_slice(&length.to_le_bytes());
        buf.push(STATUS_INSTRUCTION);
        buf.push(error);
        buf.extend_from_slice(params);
        let crc = crc16_ibm(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        buf
    }

    #[test]
    fn ping_packet_matches_reference_vector() {
        // PING to id 1, from the Robotis e-manual.
        let codec = RobotisP20Codec::new();
        let frame = codec.encode(1, &Operation::Ping).unwrap();
        assert_eq!(
            frame.bytes.as_ref(),
            &[0xFF, 0xFF, 0xFD, 0x00, 0x01, 0x03, 0x00, 0x01, 0x19, 0x4E]
        );
    }

    #[test]
    fn ping_status_from_reference_vector_decodes() {
        // XM430-W210 answering PING: model 1030, firmware 0x26.
        let codec = RobotisP20Codec::new();
        let packet = [
            0xFF, 0xFF, 0xFD, 0x00, 0x01, 0x07, 0x00, 0x55, 0x00, 0x06, 0x04, 0x26, 0x65, 0x5D,
        ];
        assert!(codec.frame_complete(&packet));
        assert_eq!(
            codec.decode(1, &Operation::Ping, &packet).unwrap(),
            Value::Bool(true)
        );
    }

    #[test]
    fn goal_position_maps_degrees_to_pulses() {
        assert_eq!(degrees_to_pulses(0.0), 2048);
        assert_eq!(degrees_to_pulses(-180.0), 0);
        assert_eq!(degrees_to_pulses(180.0), 4096);
        assert!((pulses_to_degrees(2048) - 0.0).abs() < 1e-9);

        let codec = RobotisP20Codec::new();
        let frame = codec.encode(1, &Operation::SetTargetPosition(0.0)).unwrap();
        assert!(frame.expects_response, "P2.0 writes are acknowledged");
        // Params: address 116 LE then 2048 LE over 4 bytes.
        assert_eq!(&frame.bytes[8..14], &[116, 0, 0x00, 0x08, 0x00, 0x00]);
    }

    #[test]
    fn write_ack_decodes_to_unit() {
        let codec = RobotisP20Codec::new();
        let packet = status_packet(1, 0, &[]);
        let value = codec
            .decode(1, &Operation::SetTorqueEnable(true), &packet)
            .unwrap();
        assert_eq!(value, Value::None);
    }

    #[test]
    fn device_error_byte_is_a_fault() {
        let codec = RobotisP20Codec::new();
        let packet = status_packet(1, 0x04, &[]);
        let err = codec
            .decode(1, &Operation::SetTargetPosition(10.0), &packet)
            .unwrap_err();
        assert_eq!(err, ProtocolError::DeviceFault(0x04));
    }

    #[test]
    fn corrupted_crc_is_detected() {
        let codec = RobotisP20Codec::new();
        let mut packet = status_packet(1, 0, &[0x01]);
        let flip = packet.len() - 3; // last parameter byte
        packet[flip] ^= 0x01;
        let err = codec
            .decode(1, &Operation::GetTorqueEnable, &packet)
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Checksum { .. }));
    }

    #[test]
    fn voltage_uses_tenth_volt_units() {
        let codec = RobotisP20Codec::new();
        let packet = status_packet(1, 0, &120u16.to_le_bytes());
        assert_eq!(
            codec.decode(1, &Operation::GetVoltage, &packet).unwrap(),
            Value::Volts(12.0)
        );
    }

    #[test]
    fn frame_complete_honours_length_field() {
        let codec = RobotisP20Codec::new();
        let packet = status_packet(1, 0, &[0x01, 0x02, 0x03, 0x04]);
        for cut in 0..packet.len() {
            assert!(!codec.frame_complete(&packet[..cut]), "cut at {cut}");
        }
        assert!(codec.frame_complete(&packet));
    }
}
