//! Length-prefixed framing for the modern protocol.
//!
//! Inbound bytes accumulate until a whole `varint(length) || payload` frame
//! is buffered; frames that arrive coalesced in one read all come out in
//! order. A frame cut short by the network stays buffered untouched until
//! the next read completes it.

use std::io::Cursor;

use bytes::{Buf, Bytes, BytesMut};

use crate::error::PingError;
use crate::varint::{read_varint, readable_varint, write_varint};

#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a freshly read chunk to the partial-frame buffer.
    pub fn extend(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Pulls the next complete frame out of the buffer.
    ///
    /// `Ok(None)` means not enough bytes have arrived; nothing has been
    /// consumed and the caller should wait for more data.
    pub fn next_frame(&mut self) -> Result<Option<Bytes>, PingError> {
        if !readable_varint(&self.buffer) {
            return Ok(None);
        }
        let mut cursor = Cursor::new(&self.buffer[..]);
        let length = read_varint(&mut cursor)?;
        if length < 0 {
            return Err(PingError::NegativeLength);
        }
        let header_len = cursor.position() as usize;
        let length = length as usize;
        if self.buffer.len() - header_len < length {
            return Ok(None);
        }
        self.buffer.advance(header_len);
        Ok(Some(self.buffer.split_to(length).freeze()))
    }
}

/// Prefixes an outgoing payload with its varint-encoded length.
pub fn frame(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 5);
    write_varint(payload.len() as i32, &mut out);
    out.extend_from_slice(payload);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames(n: usize) -> (Vec<Vec<u8>>, Vec<u8>) {
        let payloads: Vec<Vec<u8>> = (0..n)
            .map(|i| (0..=(i as u8 * 40 + 3)).collect())
            .collect();
        let mut wire = Vec::new();
        for payload in &payloads {
            wire.extend_from_slice(&frame(payload));
        }
        (payloads, wire)
    }

    #[test]
    fn coalesced_frames_come_out_in_order() {
        let (payloads, wire) = frames(4);
        let mut decoder = FrameDecoder::new();
        decoder.extend(&wire);
        for payload in &payloads {
            assert_eq!(decoder.next_frame().unwrap().unwrap(), &payload[..]);
        }
        assert!(decoder.next_frame().unwrap().is_none());
    }

    #[test]
    fn arbitrary_chunk_boundaries_lose_nothing() {
        let (payloads, wire) = frames(5);
        for chunk_size in [1, 2, 3, 7, 64] {
            let mut decoder = FrameDecoder::new();
            let mut out = Vec::new();
            for chunk in wire.chunks(chunk_size) {
                decoder.extend(chunk);
                while let Some(payload) = decoder.next_frame().unwrap() {
                    out.push(payload.to_vec());
                }
            }
            assert_eq!(out, payloads, "chunk size {chunk_size}");
        }
    }

    #[test]
    fn partial_frame_stays_buffered() {
        let payload = vec![0xABu8; 32];
        let wire = frame(&payload);
        let mut decoder = FrameDecoder::new();

        decoder.extend(&wire[..10]);
        assert!(decoder.next_frame().unwrap().is_none());
        // A second poll must not have eaten the length prefix.
        assert!(decoder.next_frame().unwrap().is_none());

        decoder.extend(&wire[10..]);
        assert_eq!(decoder.next_frame().unwrap().unwrap(), &payload[..]);
    }

    #[test]
    fn empty_frame_is_a_valid_frame() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(&frame(&[]));
        assert_eq!(decoder.next_frame().unwrap().unwrap().len(), 0);
    }

    #[test]
    fn outbound_framing_is_parseable() {
        let framed = frame(&[1, 2, 3]);
        assert_eq!(framed, vec![3, 1, 2, 3]);
    }
}
