//! Modbus-RTU frame codec for "read holding registers" (function 0x03).
//!
//! Request frame:
//!
//! ```text
//! | slave | 0x03 | start (BE u16) | count (BE u16) | crc (LE u16) |
//! ```
//!
//! Response frame:
//!
//! ```text
//! | slave | 0x03 | byte count | registers (BE u16 each) | crc (LE u16) |
//! ```
//!
//! Exception frame (function code echoed with the high bit set):
//!
//! ```text
//! | slave | 0x83 | exception code | crc (LE u16) |
//! ```
//!
//! All functions here are pure.

use crc::{CRC_16_MODBUS, Crc};
use thiserror::Error;

/// Function code for "read holding registers".
pub const READ_HOLDING_REGISTERS: u8 = 0x03;

/// High bit set by a slave in the echoed function code to signal an exception.
pub const EXCEPTION_FLAG: u8 = 0x80;

/// Length of an encoded read request.
pub const REQUEST_FRAME_LEN: usize = 8;

/// Length of an exception response.
pub const EXCEPTION_FRAME_LEN: usize = 5;

/// Maximum registers a single 0x03 request may ask for.
pub const MAX_REGISTERS_PER_REQUEST: u16 = 125;

/// Smallest frame that can carry a CRC: address, function, one byte, CRC.
const MIN_FRAME_LEN: usize = 5;

const CRC_MODBUS: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// Compute CRC-16/MODBUS (poly 0xA001 reflected, init 0xFFFF).
pub fn crc16(data: &[u8]) -> u16 {
    CRC_MODBUS.checksum(data)
}

/// Frame decoding errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("Frame too short: {len} bytes")]
    TooShort { len: usize },

    #[error("CRC mismatch: computed {computed:#06x}, received {received:#06x}")]
    CrcMismatch { computed: u16, received: u16 },

    #[error("Response from slave {actual}, expected slave {expected}")]
    UnexpectedSlave { expected: u8, actual: u8 },

    #[error("Unexpected function code {0:#04x}")]
    UnexpectedFunction(u8),

    #[error("Malformed length: expected {expected} data bytes, got {actual}")]
    MalformedLength { expected: usize, actual: usize },

    #[error("Device exception: {0}")]
    DeviceException(ExceptionCode),

    #[error("{count} registers do not fit in one frame (max 125)")]
    TooManyRegisters { count: usize },
}

impl CodecError {
    /// Whether the failed transaction may be retried.
    ///
    /// A device exception is a deliberate answer from the slave and
    /// repeating the request will not change it.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, CodecError::DeviceException(_))
    }
}

/// Exception codes a Modbus slave may report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExceptionCode {
    IllegalFunction,
    IllegalDataAddress,
    IllegalDataValue,
    ServerDeviceFailure,
    Acknowledge,
    ServerDeviceBusy,
    MemoryParityError,
    GatewayPathUnavailable,
    GatewayTargetFailedToRespond,
    Unknown(u8),
}

impl ExceptionCode {
    /// Raw exception code byte.
    pub fn code(&self) -> u8 {
        match self {
            ExceptionCode::IllegalFunction => 0x01,
            ExceptionCode::IllegalDataAddress => 0x02,
            ExceptionCode::IllegalDataValue => 0x03,
            ExceptionCode::ServerDeviceFailure => 0x04,
            ExceptionCode::Acknowledge => 0x05,
            ExceptionCode::ServerDeviceBusy => 0x06,
            ExceptionCode::MemoryParityError => 0x08,
            ExceptionCode::GatewayPathUnavailable => 0x0A,
            ExceptionCode::GatewayTargetFailedToRespond => 0x0B,
            ExceptionCode::Unknown(code) => *code,
        }
    }
}

impl From<u8> for ExceptionCode {
    fn from(code: u8) -> Self {
        match code {
            0x01 => ExceptionCode::IllegalFunction,
            0x02 => ExceptionCode::IllegalDataAddress,
            0x03 => ExceptionCode::IllegalDataValue,
            0x04 => ExceptionCode::ServerDeviceFailure,
            0x05 => ExceptionCode::Acknowledge,
            0x06 => ExceptionCode::ServerDeviceBusy,
            0x08 => ExceptionCode::MemoryParityError,
            0x0A => ExceptionCode::GatewayPathUnavailable,
            0x0B => ExceptionCode::GatewayTargetFailedToRespond,
            other => ExceptionCode::Unknown(other),
        }
    }
}

impl std::fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ExceptionCode::IllegalFunction => "illegal function",
            ExceptionCode::IllegalDataAddress => "illegal data address",
            ExceptionCode::IllegalDataValue => "illegal data value",
            ExceptionCode::ServerDeviceFailure => "server device failure",
            ExceptionCode::Acknowledge => "acknowledge",
            ExceptionCode::ServerDeviceBusy => "server device busy",
            ExceptionCode::MemoryParityError => "memory parity error",
            ExceptionCode::GatewayPathUnavailable => "gateway path unavailable",
            ExceptionCode::GatewayTargetFailedToRespond => "gateway target failed to respond",
            ExceptionCode::Unknown(_) => "unknown exception",
        };
        write!(f, "{} ({:#04x})", name, self.code())
    }
}

/// A "read holding registers" request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadHoldingRequest {
    /// Slave address (1-247).
    pub slave: u8,
    /// First register address.
    pub start: u16,
    /// Number of registers to read.
    pub count: u16,
}

impl ReadHoldingRequest {
    pub fn new(slave: u8, start: u16, count: u16) -> Self {
        Self {
            slave,
            start,
            count,
        }
    }

    /// Number of payload bytes a well-formed response carries.
    pub fn expected_byte_count(&self) -> usize {
        2 * self.count as usize
    }

    /// Total length of a well-formed (non-exception) response frame.
    pub fn expected_response_len(&self) -> usize {
        3 + self.expected_byte_count() + 2
    }
}

/// A decoded "read holding registers" response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadHoldingResponse {
    pub slave: u8,
    pub function: u8,
    pub byte_count: u8,
    pub registers: Vec<u16>,
    pub crc: u16,
}

/// Encode a request into an RTU frame.
pub fn encode(request: &ReadHoldingRequest) -> Vec<u8> {
    let mut frame = Vec::with_capacity(REQUEST_FRAME_LEN);
    frame.push(request.slave);
    frame.push(READ_HOLDING_REGISTERS);
    frame.extend_from_slice(&request.start.to_be_bytes());
    frame.extend_from_slice(&request.count.to_be_bytes());
    append_crc(&mut frame);
    frame
}

/// Encode a response frame the way a slave answers a 0x03 request.
///
/// The byte count field is one byte wide, so at most
/// [`MAX_REGISTERS_PER_REQUEST`] registers fit in a frame.
pub fn encode_response(slave: u8, registers: &[u16]) -> Result<Vec<u8>, CodecError> {
    if registers.len() > MAX_REGISTERS_PER_REQUEST as usize {
        return Err(CodecError::TooManyRegisters {
            count: registers.len(),
        });
    }

    let mut frame = Vec::with_capacity(3 + registers.len() * 2 + 2);
    frame.push(slave);
    frame.push(READ_HOLDING_REGISTERS);
    frame.push((registers.len() * 2) as u8);
    for register in registers {
        frame.extend_from_slice(&register.to_be_bytes());
    }
    append_crc(&mut frame);
    Ok(frame)
}

/// Encode an exception frame for a 0x03 request.
pub fn encode_exception(slave: u8, code: ExceptionCode) -> Vec<u8> {
    let mut frame = vec![slave, READ_HOLDING_REGISTERS | EXCEPTION_FLAG, code.code()];
    append_crc(&mut frame);
    frame
}

fn append_crc(frame: &mut Vec<u8>) {
    let crc = crc16(frame);
    frame.extend_from_slice(&crc.to_le_bytes());
}

/// Decode a response frame received for `request`.
///
/// Checks are applied in wire order of trust: length, CRC, slave address,
/// exception flag, function code, byte count.
pub fn decode(
    frame: &[u8],
    request: &ReadHoldingRequest,
) -> Result<ReadHoldingResponse, CodecError> {
    if frame.len() < MIN_FRAME_LEN {
        return Err(CodecError::TooShort { len: frame.len() });
    }

    let (body, crc_bytes) = frame.split_at(frame.len() - 2);
    let received = u16::from_le_bytes([crc_bytes[0], crc_bytes[1]]);
    let computed = crc16(body);
    if computed != received {
        return Err(CodecError::CrcMismatch { computed, received });
    }

    let slave = body[0];
    if slave != request.slave {
        return Err(CodecError::UnexpectedSlave {
            expected: request.slave,
            actual: slave,
        });
    }

    let function = body[1];
    if function & EXCEPTION_FLAG != 0 {
        if function & !EXCEPTION_FLAG != READ_HOLDING_REGISTERS {
            return Err(CodecError::UnexpectedFunction(function));
        }
        return Err(CodecError::DeviceException(ExceptionCode::from(body[2])));
    }
    if function != READ_HOLDING_REGISTERS {
        return Err(CodecError::UnexpectedFunction(function));
    }

    let byte_count = body[2];
    let payload = &body[3..];
    let expected = request.expected_byte_count();
    if byte_count as usize != expected {
        return Err(CodecError::MalformedLength {
            expected,
            actual: byte_count as usize,
        });
    }
    if payload.len() != expected {
        return Err(CodecError::MalformedLength {
            expected,
            actual: payload.len(),
        });
    }

    let registers = payload
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect();

    Ok(ReadHoldingResponse {
        slave,
        function,
        byte_count,
        registers,
        crc: received,
    })
}

/// Total frame length implied by the first two bytes received so far.
///
/// Returns `None` until the function code byte has arrived.
pub fn response_len_hint(received: &[u8], request: &ReadHoldingRequest) -> Option<usize> {
    let function = *received.get(1)?;
    if function & EXCEPTION_FLAG != 0 {
        Some(EXCEPTION_FRAME_LEN)
    } else {
        Some(request.expected_response_len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn npk_request() -> ReadHoldingRequest {
        ReadHoldingRequest::new(1, 0x001E, 3)
    }

    #[test]
    fn test_crc_known_vector() {
        // Classic example from the Modbus over serial line guide.
        assert_eq!(crc16(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x02]), 0x0BC4);
    }

    #[test]
    fn test_encode_request() {
        let frame = encode(&npk_request());
        assert_eq!(frame, vec![0x01, 0x03, 0x00, 0x1E, 0x00, 0x03, 0x65, 0xCD]);
    }

    #[test]
    fn test_decode_npk_response() {
        let frame = [
            0x01, 0x03, 0x06, 0x00, 0x5F, 0x00, 0x41, 0x00, 0x52, 0x64, 0x91,
        ];
        let response = decode(&frame, &npk_request()).unwrap();

        assert_eq!(response.slave, 1);
        assert_eq!(response.byte_count, 6);
        assert_eq!(response.registers, vec![95, 65, 82]);
        assert_eq!(response.crc, 0x9164);
    }

    #[test]
    fn test_encode_response_matches_wire_bytes() {
        assert_eq!(
            encode_response(1, &[95, 65, 82]).unwrap(),
            vec![0x01, 0x03, 0x06, 0x00, 0x5F, 0x00, 0x41, 0x00, 0x52, 0x64, 0x91]
        );
    }

    #[test]
    fn test_encode_response_rejects_oversized_payload() {
        let registers = vec![0u16; MAX_REGISTERS_PER_REQUEST as usize];
        let frame = encode_response(1, &registers).unwrap();
        assert_eq!(frame[2], 250);

        let registers = vec![0u16; 128];
        assert_eq!(
            encode_response(1, &registers),
            Err(CodecError::TooManyRegisters { count: 128 })
        );
    }

    #[test]
    fn test_response_roundtrip_recovers_payload() {
        let request = ReadHoldingRequest::new(7, 100, 5);
        let registers = [0u16, 1, 0x7FFF, 0x8000, 0xFFFE];
        let frame = encode_response(7, &registers).unwrap();

        let response = decode(&frame, &request).unwrap();
        assert_eq!(response.registers, registers);
    }

    #[test]
    fn test_any_single_bit_flip_is_crc_mismatch() {
        let frame = encode_response(1, &[95, 65, 82]).unwrap();

        for byte in 0..frame.len() {
            for bit in 0..8 {
                let mut corrupted = frame.clone();
                corrupted[byte] ^= 1 << bit;
                assert!(
                    matches!(
                        decode(&corrupted, &npk_request()),
                        Err(CodecError::CrcMismatch { .. })
                    ),
                    "flip of byte {} bit {} not detected",
                    byte,
                    bit
                );
            }
        }
    }

    #[test]
    fn test_decode_exception() {
        let frame = [0x01, 0x83, 0x02, 0xC0, 0xF1];
        let err = decode(&frame, &npk_request()).unwrap_err();

        assert_eq!(
            err,
            CodecError::DeviceException(ExceptionCode::IllegalDataAddress)
        );
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_decode_wrong_byte_count() {
        let frame = encode_response(1, &[95, 65]).unwrap();
        let err = decode(&frame, &npk_request()).unwrap_err();

        assert_eq!(
            err,
            CodecError::MalformedLength {
                expected: 6,
                actual: 4
            }
        );
        assert!(err.is_retryable());
    }

    #[test]
    fn test_decode_byte_count_disagrees_with_frame() {
        // Byte count claims 6 bytes but only 4 follow; CRC is valid.
        let mut frame = vec![0x01, 0x03, 0x06, 0x00, 0x5F, 0x00, 0x41];
        let crc = crc16(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());

        assert!(matches!(
            decode(&frame, &npk_request()),
            Err(CodecError::MalformedLength { .. })
        ));
    }

    #[test]
    fn test_decode_too_short() {
        assert_eq!(
            decode(&[0x01, 0x03, 0x00], &npk_request()),
            Err(CodecError::TooShort { len: 3 })
        );
    }

    #[test]
    fn test_decode_wrong_slave() {
        let frame = encode_response(2, &[95, 65, 82]).unwrap();
        assert_eq!(
            decode(&frame, &npk_request()),
            Err(CodecError::UnexpectedSlave {
                expected: 1,
                actual: 2
            })
        );
    }

    #[test]
    fn test_exception_code_conversion() {
        assert_eq!(ExceptionCode::from(0x04), ExceptionCode::ServerDeviceFailure);
        assert_eq!(ExceptionCode::from(0x42), ExceptionCode::Unknown(0x42));
        assert_eq!(ExceptionCode::Unknown(0x42).code(), 0x42);
        assert_eq!(
            ExceptionCode::IllegalFunction.to_string(),
            "illegal function (0x01)"
        );
    }

    #[test]
    fn test_response_len_hint() {
        let request = npk_request();
        assert_eq!(response_len_hint(&[0x01], &request), None);
        assert_eq!(response_len_hint(&[0x01, 0x03], &request), Some(11));
        assert_eq!(response_len_hint(&[0x01, 0x83], &request), Some(5));
    }
}
