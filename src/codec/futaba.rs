//! Futaba RS30x-series short-packet codec
//!
//! Command packet:  `FA AF | ID | Flag | Address | Length | Count | Data... | Sum`
//! Return packet:   `FD DF | ID | Flag | Address | Length | Count | Data... | Sum`
//!
//! Sum is the XOR of every byte from ID through the end of Data. Reads use
//! the memory-map-select flag (0x0F) with Count 0; writes use flag 0 and get
//! no return packet at all, so they complete as soon as the bytes are out.

use std::ops::RangeInclusive;

use bytes::{BufMut, Bytes, BytesMut};

use super::{Codec, Frame, Operation, Value};
use crate::error::{BusError, ProtocolError};

// Memory map addresses (RS304MD datasheet).
const ADDR_SERVO_ID: u8 = 4;
const ADDR_GOAL_POSITION: u8 = 30;
const ADDR_TORQUE_ENABLE: u8 = 36;
const ADDR_PRESENT_POSITION: u8 = 42;
const ADDR_TEMPERATURE: u8 = 50;
const ADDR_VOLTAGE: u8 = 52;

const FLAG_MEM_MAP_SELECT: u8 = 0x0F;

const RETURN_HEADER: [u8; 2] = [0xFD, 0xDF];
const RETURN_DATA_INDEX: usize = 7;

/// Codec for Futaba RS30x command servos.
#[derive(Debug, Default, Clone, Copy)]
pub struct FutabaCodec;

impl FutabaCodec {
    pub fn new() -> Self {
        FutabaCodec
    }

    fn read_command(&self, sid: u8, address: u8, length: u8) -> Frame {
        Frame::request(build_packet(sid, FLAG_MEM_MAP_SELECT, address, length, 0, &[]))
    }

    fn write_command(&self, sid: u8, address: u8, data: &[u8]) -> Frame {
        Frame::fire_and_forget(build_packet(sid, 0x00, address, data.len() as u8, 1, data))
    }

    /// Validate framing and extract the data field of a return packet.
    fn payload<'a>(&self, sid: u8, buf: &'a [u8]) -> Result<&'a [u8], ProtocolError> {
        if buf.len() < 8 || buf[..2] != RETURN_HEADER {
            return Err(ProtocolError::Malformed(format!(
                "return packet too short or bad header ({} bytes)",
                buf.len()
            )));
        }
        let expected = xor_checksum(&buf[2..buf.len() - 1]);
        let got = buf[buf.len() - 1];
        if expected != got {
            return Err(ProtocolError::Checksum {
                expected: expected.into(),
                got: got.into(),
            });
        }
        if buf[2] != sid {
            return Err(ProtocolError::WrongServo {
                expected: sid,
                got: buf[2],
            });
        }
        let length = buf[5] as usize;
        if buf.len() != 8 + length {
            return Err(ProtocolError::Malformed(format!(
                "length field {} disagrees with packet size {}",
                length,
                buf.len()
            )));
        }
        Ok(&buf[RETURN_DATA_INDEX..RETURN_DATA_INDEX + length])
    }
}

impl Codec for FutabaCodec {
    fn name(&self) -> &'static str {
        "futaba"
    }

    fn servo_ids(&self) -> RangeInclusive<u8> {
        1..=127
    }

    fn position_range(&self) -> RangeInclusive<f64> {
        -150.0..=150.0
    }

    fn encode(&self, sid: u8, op: &Operation) -> Result<Frame, BusError> {
        let frame = match op {
            // No PING instruction on this brand: read back the servo-id
            // register and let decode compare it.
            Operation::Ping => self.read_command(sid, ADDR_SERVO_ID, 1),
            Operation::GetTorqueEnable => self.read_command(sid, ADDR_TORQUE_ENABLE, 1),
            Operation::SetTorqueEnable(on) => {
                self.write_command(sid, ADDR_TORQUE_ENABLE, &[u8::from(*on)])
            }
            Operation::GetVoltage => self.read_command(sid, ADDR_VOLTAGE, 2),
            Operation::GetTemperature => self.read_command(sid, ADDR_TEMPERATURE, 2),
            Operation::GetTargetPosition => self.read_command(sid, ADDR_GOAL_POSITION, 2),
            Operation::SetTargetPosition(degrees) => {
                // Wire unit is 0.1 degree, signed little-endian.
                let raw = (degrees * 10.0).round() as i16;
                self.write_command(sid, ADDR_GOAL_POSITION, &raw.to_le_bytes())
            }
            Operation::GetCurrentPosition => self.read_command(sid, ADDR_PRESENT_POSITION, 2),
            Operation::ReadMemory { address, length } => {
                let address = narrow(*address, "address")?;
                let length = narrow(*length, "length")?;
                self.read_command(sid, address, length)
            }
            Operation::WriteMemory { address, data } => {
                let address = narrow(*address, "address")?;
                if data.is_empty() || data.len() > u8::MAX as usize {
                    return Err(BusError::Validation(format!(
                        "write of {} bytes does not fit a short packet",
                        data.len()
                    )));
                }
                self.write_command(sid, address, data)
            }
        };
        Ok(frame)
    }

    fn frame_complete(&self, buf: &[u8]) -> bool {
        if buf.len() < 6 {
            return false;
        }
        buf.len() >= 8 + buf[5] as usize
    }

    fn decode(&self, sid: u8, op: &Operation, buf: &[u8]) -> Result<Value, ProtocolError> {
        let data = self.payload(sid, buf)?;
        match op {
            Operation::Ping => Ok(Value::Bool(byte(data)? == sid)),
            Operation::GetTorqueEnable => Ok(Value::Bool(byte(data)? == 0x01)),
            Operation::GetVoltage => Ok(Value::Volts(f64::from(word(data)?) / 100.0)),
            Operation::GetTemperature => Ok(Value::Celsius(f64::from(word(data)?))),
            Operation::GetTargetPosition | Operation::GetCurrentPosition => {
                Ok(Value::Degrees(f64::from(word(data)?) / 10.0))
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
            // Writes never reach decode on this brand.
            Operation::SetTorqueEnable(_)
            | Operation::SetTargetPosition(_)
            | Operation::WriteMemory { .. } => Err(ProtocolError::UnexpectedPayload(
                "unsolicited response to a silent write".into(),
            )),
        }
    }
}

fn build_packet(sid: u8, flag: u8, address: u8, length: u8, count: u8, data: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(8 + data.len());
    buf.put_slice(&[0xFA, 0xAF, sid, flag, address, length, count]);
    buf.put_slice(data);
    let sum = xor_checksum(&buf[2..]);
    buf.put_u8(sum);
    buf.freeze()
}

fn xor_checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |acc, b| acc ^ b)
}

fn narrow(value: u16, what: &str) -> Result<u8, BusError> {
    u8::try_from(value)
        .map_err(|_| BusError::Validation(format!("{what} {value} is outside the memory map")))
}

fn byte(data: &[u8]) -> Result<u8, ProtocolError> {
    match data {
        [b] => Ok(*b),
        _ => Err(ProtocolError::UnexpectedPayload(format!(
            "expected 1 data byte, got {}",
            data.len()
        ))),
    }
}

fn word(data: &[u8]) -> Result<i16, ProtocolError> {
    match data {
        [lo, hi] => Ok(i16::from_le_bytes([*lo, *hi])),
        _ => Err(ProtocolError::UnexpectedPayload(format!(
            "expected 2 data bytes, got {}",
            data.len()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a well-formed return packet for tests.
    fn return_packet(sid: u8, address: u8, data: &[u8]) -> Vec<u8> {
        let mut buf = vec![0xFD, 0xDF, sid, 0x00, address, data.len() as u8, 1];
        buf.extend_from_slice(data);
        buf.push(xor_checksum(&buf[2..]));
        buf
    }

    #[test]
    fn torque_on_packet_bytes() {
        let codec = FutabaCodec::new();
        let frame = codec.encode(1, &Operation::SetTorqueEnable(true)).unwrap();
        assert!(!frame.expects_response);
        assert_eq!(
            frame.bytes.as_ref(),
            &[0xFA, 0xAF, 0x01, 0x00, 0x24, 0x01, 0x01, 0x01, 0x24]
        );
    }

    #[test]
    fn voltage_read_roundtrip() {
        let codec = FutabaCodec::new();
        let frame = codec.encode(1, &Operation::GetVoltage).unwrap();
        assert!(frame.expects_response);
        // Read command: flag 0x0F, length 2, count 0, no data.
        assert_eq!(frame.bytes[3], 0x0F);
        assert_eq!(frame.bytes[5], 2);

        // 7.4 V on the wire is 740 in 0.01 V units.
        let packet = return_packet(1, ADDR_VOLTAGE, &740i16.to_le_bytes());
        assert!(codec.frame_complete(&packet));
        let value = codec.decode(1, &Operation::GetVoltage, &packet).unwrap();
        assert_eq!(value, Value::Volts(7.4));
    }

    #[test]
    fn position_uses_tenth_degree_units() {
        let codec = FutabaCodec::new();
        let frame = codec
            .encode(2, &Operation::SetTargetPosition(-30.5))
            .unwrap();
        // -305 little-endian in the data field.
        assert_eq!(&frame.bytes[7..9], &(-305i16).to_le_bytes());

        let packet = return_packet(2, ADDR_PRESENT_POSITION, &(-305i16).to_le_bytes());
        let value = codec
            .decode(2, &Operation::GetCurrentPosition, &packet)
            .unwrap();
        assert_eq!(value, Value::Degrees(-30.5));
    }

    #[test]
    fn frame_complete_waits_for_full_packet() {
        let codec = FutabaCodec::new();
        let packet = return_packet(1, ADDR_VOLTAGE, &[0xE4, 0x02]);
        for cut in 0..packet.len() {
            assert!(!codec.frame_complete(&packet[..cut]), "cut at {cut}");
        }
        assert!(codec.frame_complete(&packet));
    }

    #[test]
    fn corrupted_checksum_is_a_protocol_error() {
        let codec = FutabaCodec::new();
        let mut packet = return_packet(1, ADDR_TORQUE_ENABLE, &[0x01]);
        *packet.last_mut().unwrap() ^= 0xFF;
        let err = codec
            .decode(1, &Operation::GetTorqueEnable, &packet)
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Checksum { .. }));
    }

    #[test]
    fn response_from_wrong_servo_is_rejected() {
        let codec = FutabaCodec::new();
        let packet = return_packet(3, ADDR_TORQUE_ENABLE, &[0x01]);
        let err = codec
            .decode(1, &Operation::GetTorqueEnable, &packet)
            .unwrap_err();
        assert_eq!(err, ProtocolError::WrongServo { expected: 1, got: 3 });
    }

    #[test]
    fn ping_compares_servo_id_register() {
        let codec = FutabaCodec::new();
        let packet = return_packet(5, ADDR_SERVO_ID, &[5]);
        assert_eq!(
            codec.decode(5, &Operation::Ping, &packet).unwrap(),
            Value::Bool(true)
        );
    }

    #[test]
    fn memory_map_bounds_are_validated() {
        let codec = FutabaCodec::new();
        let err = codec
            .encode(
                1,
                &Operation::ReadMemory {
                    address: 300,
                    length: 2,
                },
            )
            .unwrap_err();
        assert!(matches!(err, BusError::Validation(_)));
    }
}
