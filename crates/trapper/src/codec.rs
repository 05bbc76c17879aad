/*
 * SPDX-FileCopyrightText: 2024 A3Mailer Project
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Sender protocol framing
//!
//! A frame is the signature `ZBXD`, one flags byte, the payload length as a
//! 64-bit little-endian integer and the JSON payload itself.

use crate::error::TrapperError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Frame signature
pub const SIGNATURE: &[u8; 4] = b"ZBXD";

/// Flag of a plain protocol frame
pub const FLAG_PROTOCOL: u8 = 0x01;

/// Flag of a compressed payload
pub const FLAG_COMPRESSED: u8 = 0x02;

/// Signature, flags and length
pub const HEADER_LEN: usize = 13;

/// Encodes and decodes sender protocol frames
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_bytes: u64,
}

impl FrameCodec {
    pub fn new(max_frame_bytes: u64) -> Self {
        Self { max_frame_bytes }
    }

    pub fn max_frame_bytes(&self) -> u64 {
        self.max_frame_bytes
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = TrapperError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Reject a wrong signature as soon as its first bytes arrive
        let prefix = buf.len().min(SIGNATURE.len());
        if buf[..prefix] != SIGNATURE[..prefix] {
            return Err(TrapperError::InvalidHeader);
        }
        if buf.len() < HEADER_LEN {
            buf.reserve(HEADER_LEN - buf.len());
            return Ok(None);
        }

        let flags = buf[4];
        if flags & FLAG_COMPRESSED != 0 || flags & FLAG_PROTOCOL == 0 {
            return Err(TrapperError::UnsupportedFlags(flags));
        }

        let mut length = [0u8; 8];
        length.copy_from_slice(&buf[5..HEADER_LEN]);
        let size = u64::from_le_bytes(length);
        if size > self.max_frame_bytes {
            return Err(TrapperError::FrameTooLarge {
                size,
                max: self.max_frame_bytes,
            });
        }

        // Bounded by max_frame_bytes above
        let size = size as usize;
        if buf.len() < HEADER_LEN + size {
            buf.reserve(HEADER_LEN + size - buf.len());
            return Ok(None);
        }

        buf.advance(HEADER_LEN);
        Ok(Some(buf.split_to(size).freeze()))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(buf)? {
            Some(frame) => Ok(Some(frame)),
            None if buf.is_empty() => Ok(None),
            None => Err(TrapperError::Truncated(buf.len())),
        }
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = TrapperError;

    fn encode(&mut self, payload: Bytes, buf: &mut BytesMut) -> Result<(), Self::Error> {
        put_frame(&payload, buf);
        Ok(())
    }
}

/// Encode one payload as a frame
pub fn frame(payload: &[u8]) -> Vec<u8> {
    let mut buf = BytesMut::new();
    put_frame(payload, &mut buf);
    buf.to_vec()
}

fn put_frame(payload: &[u8], buf: &mut BytesMut) {
    buf.reserve(HEADER_LEN + payload.len());
    buf.put_slice(SIGNATURE);
    buf.put_u8(FLAG_PROTOCOL);
    buf.put_u64_le(payload.len() as u64);
    buf.put_slice(payload);
}
