//! Variable-length integer primitives shared by the framing layer and the
//! packet handlers.
//!
//! A varint carries 7 payload bits per byte in little-endian group order;
//! bit 7 marks a continuation byte. Five bytes cover the whole 32-bit range,
//! so anything longer is rejected instead of letting a hostile stream run
//! the reader forever.

use std::io::Read;

use crate::error::PingError;

const MAX_VARINT_BYTES: usize = 5;

/// Reads a varint from any `Read` implementation.
pub fn read_varint<R: Read>(reader: &mut R) -> Result<i32, PingError> {
    let mut result: i32 = 0;
    let mut num_read = 0;
    loop {
        let mut byte = [0u8; 1];
        reader.read_exact(&mut byte)?;
        result |= ((byte[0] & 0x7F) as i32) << (7 * num_read);
        num_read += 1;
        if byte[0] & 0x80 == 0 {
            return Ok(result);
        }
        if num_read >= MAX_VARINT_BYTES {
            return Err(PingError::MalformedVarint);
        }
    }
}

/// Appends a varint to the buffer.
pub fn write_varint(value: i32, out: &mut Vec<u8>) {
    let mut value = value as u32;
    while value & !0x7F != 0 {
        out.push((value & 0x7F) as u8 | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

/// Non-consuming lookahead: can a whole varint be read from `buf` right now?
///
/// Five buffered bytes are always enough for a valid varint; with fewer, a
/// terminating byte (high bit clear) must already be present.
pub fn readable_varint(buf: &[u8]) -> bool {
    if buf.len() >= MAX_VARINT_BYTES {
        return true;
    }
    buf.iter().any(|byte| byte & 0x80 == 0)
}

/// Reads a varint-length-prefixed byte array, bounded by `max_length`.
pub fn read_byte_array<R: Read>(reader: &mut R, max_length: usize) -> Result<Vec<u8>, PingError> {
    let length = read_varint(reader)?;
    if length < 0 {
        return Err(PingError::NegativeLength);
    }
    if length as usize > max_length {
        return Err(PingError::LengthExceeded {
            length,
            limit: max_length,
        });
    }
    let mut data = vec![0u8; length as usize];
    reader.read_exact(&mut data)?;
    Ok(data)
}

/// Appends a varint length prefix followed by the raw bytes.
pub fn write_byte_array(data: &[u8], out: &mut Vec<u8>) {
    write_varint(data.len() as i32, out);
    out.extend_from_slice(data);
}
