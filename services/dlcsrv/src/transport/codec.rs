//! Modbus RTU frame encoding/decoding
//!
//! Only the two function codes the thermostats speak: FC03 read holding
//! registers and FC06 write single register. Pure functions, no I/O.

use crate::error::{DlcSrvError, Result};

pub const FC_READ_HOLDING: u8 = 0x03;
pub const FC_WRITE_SINGLE: u8 = 0x06;

/// CRC-16/Modbus over the frame body
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc >>= 1;
                crc ^= 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

fn push_crc(frame: &mut Vec<u8>) {
    let crc = crc16(frame);
    frame.push((crc & 0xFF) as u8);
    frame.push((crc >> 8) as u8);
}

fn check_crc(frame: &[u8]) -> Result<()> {
    if frame.len() < 4 {
        return Err(DlcSrvError::protocol(format!(
            "frame too short: {} bytes",
            frame.len()
        )));
    }
    let body = &frame[..frame.len() - 2];
    let expected = crc16(body);
    let received =
        u16::from(frame[frame.len() - 2]) | (u16::from(frame[frame.len() - 1]) << 8);
    if expected != received {
        return Err(DlcSrvError::protocol(format!(
            "CRC mismatch: expected {expected:04X}, received {received:04X}"
        )));
    }
    Ok(())
}

/// Build an FC03 request for `count` registers starting at `address`
pub fn build_read_request(slave: u8, address: u16, count: u16) -> Vec<u8> {
    let mut frame = vec![
        slave,
        FC_READ_HOLDING,
        (address >> 8) as u8,
        (address & 0xFF) as u8,
        (count >> 8) as u8,
        (count & 0xFF) as u8,
    ];
    push_crc(&mut frame);
    frame
}

/// Build an FC06 request writing `value` at `address`
pub fn build_write_request(slave: u8, address: u16, value: u16) -> Vec<u8> {
    let mut frame = vec![
        slave,
        FC_WRITE_SINGLE,
        (address >> 8) as u8,
        (address & 0xFF) as u8,
        (value >> 8) as u8,
        (value & 0xFF) as u8,
    ];
    push_crc(&mut frame);
    frame
}

fn check_exception(frame: &[u8], function: u8) -> Result<()> {
    if frame.len() >= 2 && frame[1] == function | 0x80 {
        let code = frame.get(2).copied().unwrap_or(0);
        return Err(DlcSrvError::protocol(format!(
            "exception response, function {function:02X}, code {code}"
        )));
    }
    Ok(())
}

/// Parse an FC03 response into register values
pub fn parse_read_response(slave: u8, frame: &[u8]) -> Result<Vec<u16>> {
    check_crc(frame)?;
    check_exception(frame, FC_READ_HOLDING)?;
    if frame[0] != slave {
        return Err(DlcSrvError::protocol(format!(
            "response from unexpected slave {} (wanted {slave})",
            frame[0]
        )));
    }
    if frame[1] != FC_READ_HOLDING {
        return Err(DlcSrvError::protocol(format!(
            "unexpected function {:02X} in read response",
            frame[1]
        )));
    }
    let byte_count = frame[2] as usize;
    if byte_count % 2 != 0 || frame.len() != 3 + byte_count + 2 {
        return Err(DlcSrvError::protocol(format!(
            "malformed read response: byte count {byte_count}, frame {} bytes",
            frame.len()
        )));
    }
    let values = frame[3..3 + byte_count]
        .chunks_exact(2)
        .map(|pair| (u16::from(pair[0]) << 8) | u16::from(pair[1]))
        .collect();
    Ok(values)
}

/// Parse an FC06 response, returning the echoed value
pub fn parse_write_response(slave: u8, address: u16, frame: &[u8]) -> Result<u16> {
    check_crc(frame)?;
    check_exception(frame, FC_WRITE_SINGLE)?;
    if frame.len() != 8 {
        return Err(DlcSrvError::protocol(format!(
            "malformed write response: {} bytes",
            frame.len()
        )));
    }
    if frame[0] != slave || frame[1] != FC_WRITE_SINGLE {
        return Err(DlcSrvError::protocol(
            "write response header mismatch".to_string(),
        ));
    }
    let echoed_address = (u16::from(frame[2]) << 8) | u16::from(frame[3]);
    if echoed_address != address {
        return Err(DlcSrvError::protocol(format!(
            "write echoed address {echoed_address}, wanted {address}"
        )));
    }
    Ok((u16::from(frame[4]) << 8) | u16::from(frame[5]))
}

/// Expected length of the remainder of a response once the first three
/// bytes (slave, function, third byte) are in hand
pub fn remaining_response_len(function: u8, third_byte: u8) -> Result<usize> {
    if function & 0x80 != 0 {
        // exception: third byte was the code, only CRC remains
        return Ok(2);
    }
    match function {
        FC_READ_HOLDING => Ok(third_byte as usize + 2),
        // third byte was address high; value + CRC remain after address low
        FC_WRITE_SINGLE => Ok(5),
        _ => Err(DlcSrvError::protocol(format!(
            "unsupported function {function:02X} in response"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc16_known_vector() {
        // 01 03 00 D1 00 01 -> CRC D4 33 (low byte first on the wire)
        let frame = [0x01, 0x03, 0x00, 0xD1, 0x00, 0x01];
        assert_eq!(crc16(&frame), 0x33D4);
    }

    #[test]
    fn test_build_read_request_layout() {
        let frame = build_read_request(5, 209, 1);
        assert_eq!(frame.len(), 8);
        assert_eq!(&frame[..6], &[5, 0x03, 0x00, 0xD1, 0x00, 0x01]);
        check_crc(&frame).unwrap();
    }

    #[test]
    fn test_build_write_request_layout() {
        let frame = build_write_request(3, 254, 31);
        assert_eq!(&frame[..6], &[3, 0x06, 0x00, 0xFE, 0x00, 0x1F]);
        check_crc(&frame).unwrap();
    }

    #[test]
    fn test_read_response_roundtrip() {
        // simulate a device echoing one register with value 725
        let mut frame = vec![5, 0x03, 0x02, 0x02, 0xD5];
        push_crc(&mut frame);
        let values = parse_read_response(5, &frame).unwrap();
        assert_eq!(values, vec![725]);
    }

    #[test]
    fn test_read_response_multi_register() {
        let mut frame = vec![1, 0x03, 0x04, 0x00, 0x0A, 0x01, 0x00];
        push_crc(&mut frame);
        let values = parse_read_response(1, &frame).unwrap();
        assert_eq!(values, vec![10, 256]);
    }

    #[test]
    fn test_read_response_rejects_bad_crc() {
        let mut frame = vec![5, 0x03, 0x02, 0x02, 0xD5];
        push_crc(&mut frame);
        frame[3] ^= 0xFF;
        assert!(parse_read_response(5, &frame).is_err());
    }

    #[test]
    fn test_read_response_rejects_wrong_slave() {
        let mut frame = vec![6, 0x03, 0x02, 0x02, 0xD5];
        push_crc(&mut frame);
        assert!(parse_read_response(5, &frame).is_err());
    }

    #[test]
    fn test_exception_response_is_error() {
        let mut frame = vec![5, 0x83, 0x02];
        push_crc(&mut frame);
        let err = parse_read_response(5, &frame).unwrap_err();
        assert!(err.to_string().contains("exception"));
    }

    #[test]
    fn test_write_response_echo() {
        let frame = build_write_request(7, 209, 9);
        // FC06 response is a byte-for-byte echo of the request
        let value = parse_write_response(7, 209, &frame).unwrap();
        assert_eq!(value, 9);
    }

    #[test]
    fn test_write_response_rejects_wrong_address() {
        let frame = build_write_request(7, 210, 9);
        assert!(parse_write_response(7, 209, &frame).is_err());
    }

    #[test]
    fn test_remaining_response_len() {
        assert_eq!(remaining_response_len(0x03, 2).unwrap(), 4);
        assert_eq!(remaining_response_len(0x06, 0).unwrap(), 5);
        assert_eq!(remaining_response_len(0x83, 2).unwrap(), 2);
        assert!(remaining_response_len(0x10, 0).is_err());
    }
}
