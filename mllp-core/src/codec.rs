//! MLLP envelope codec.
//!
//! ```text
//! 0x0B <payload bytes> 0x1C 0x0D
//! ```
//!
//! `MllpCodec` plugs into `tokio_util::codec::Framed`. Bytes that arrive
//! before a start block are discarded; the trailing carriage return is
//! consumed when it is already buffered, or skipped on the next read.

use std::borrow::Cow;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{FramingError, MllpError};

/// Start-of-block marker.
pub const START_BLOCK: u8 = 0x0B;
/// End-of-block marker.
pub const END_BLOCK: u8 = 0x1C;
/// Trailer sent after the end block.
pub const CARRIAGE_RETURN: u8 = 0x0D;

/// Default upper bound for a single inbound payload.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

// ── RawFrame ─────────────────────────────────────────────────────

/// The bytes found between a start block and an end block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    payload: Bytes,
}

impl RawFrame {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Payload as UTF-8. Invalid sequences become U+FFFD.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }

    pub fn into_text(self) -> String {
        self.text().into_owned()
    }
}

// ── MllpCodec ────────────────────────────────────────────────────

#[derive(Debug)]
pub struct MllpCodec {
    max_frame_size: usize,
    /// A start block has been consumed and the end block is still pending.
    in_frame: bool,
    /// Bytes of the current payload already searched for an end block.
    scanned: usize,
    /// The last frame ended exactly at the buffer boundary, so its trailer
    /// may still arrive.
    trailer_pending: bool,
    frames_decoded: u64,
}

impl Default for MllpCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl MllpCodec {
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            max_frame_size,
            in_frame: false,
            scanned: 0,
            trailer_pending: false,
            frames_decoded: 0,
        }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded
    }

    fn too_large(&self, size: usize) -> MllpError {
        FramingError::FrameTooLarge {
            size,
            max: self.max_frame_size,
        }
        .into()
    }
}

impl Decoder for MllpCodec {
    type Item = RawFrame;
    type Error = MllpError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if self.trailer_pending && !src.is_empty() {
            if src[0] == CARRIAGE_RETURN {
                src.advance(1);
            }
            self.trailer_pending = false;
        }

        if !self.in_frame {
            match src.iter().position(|&b| b == START_BLOCK) {
                Some(start) => {
                    src.advance(start + 1);
                    self.in_frame = true;
                    self.scanned = 0;
                }
                None => {
                    src.clear();
                    return Ok(None);
                }
            }
        }

        let end = src[self.scanned..]
            .iter()
            .position(|&b| b == END_BLOCK)
            .map(|offset| self.scanned + offset);

        let Some(end) = end else {
            if src.len() > self.max_frame_size {
                return Err(self.too_large(src.len()));
            }
            self.scanned = src.len();
            return Ok(None);
        };

        if end > self.max_frame_size {
            return Err(self.too_large(end));
        }

        let payload = src.split_to(end).freeze();
        src.advance(1);
        self.in_frame = false;
        self.scanned = 0;

        match src.first() {
            Some(&CARRIAGE_RETURN) => src.advance(1),
            Some(_) => {}
            None => self.trailer_pending = true,
        }

        self.frames_decoded += 1;
        Ok(Some(RawFrame { payload }))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        if self.in_frame {
            return Err(FramingError::IncompleteFrame.into());
        }
        if self.frames_decoded > 0 {
            return Ok(None);
        }
        Err(FramingError::NoStartMarker.into())
    }
}

impl Encoder<String> for MllpCodec {
    type Error = MllpError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(item.len() + 3);
        dst.put_u8(START_BLOCK);
        dst.extend_from_slice(item.as_bytes());
        dst.put_u8(END_BLOCK);
        dst.put_u8(CARRIAGE_RETURN);
        Ok(())
    }
}

// ── In-memory helpers ────────────────────────────────────────────

/// Wrap `payload` in a complete MLLP envelope.
pub fn encode_frame(payload: &str) -> Bytes {
    let mut dst = BytesMut::with_capacity(payload.len() + 3);
    dst.put_u8(START_BLOCK);
    dst.extend_from_slice(payload.as_bytes());
    dst.put_u8(END_BLOCK);
    dst.put_u8(CARRIAGE_RETURN);
    dst.freeze()
}

/// Decode the first frame of a complete byte stream.
pub fn decode_frame(bytes: &[u8]) -> Result<RawFrame, MllpError> {
    let mut codec = MllpCodec::new();
    let mut buf = BytesMut::from(bytes);
    codec
        .decode_eof(&mut buf)?
        .ok_or(MllpError::Framing(FramingError::NoStartMarker))
}
