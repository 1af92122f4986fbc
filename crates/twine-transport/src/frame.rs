//! Frame codec for multipart messages.
//!
//! Frame format: `[length: u32 LE][flags: u8][payload]`, with MORE (bit 0)
//! set on every frame of a message except the last. A logical message is
//! the burst of frames ending at the first frame whose MORE bit is clear;
//! bursts are parsed and surfaced atomically.

use bytes::{BufMut, Bytes, BytesMut};

/// Maximum frame size (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Size of the fixed frame header.
pub const FRAME_HEADER: usize = 5;

/// Frame flag bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameFlags(u8);

impl FrameFlags {
    pub const MORE: u8 = 0b0000_0001;

    pub fn new(bits: u8) -> Self {
        Self(bits)
    }

    pub fn more(more: bool) -> Self {
        Self(if more { Self::MORE } else { 0 })
    }

    pub fn has_more(&self) -> bool {
        self.0 & Self::MORE != 0
    }

    pub fn as_u8(&self) -> u8 {
        self.0
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame too large: {0} bytes (max {MAX_FRAME_SIZE})")]
    FrameTooLarge(usize),
}

/// Append one encoded frame to `buf`.
pub fn encode_frame(payload: &[u8], more: bool, buf: &mut BytesMut) {
    buf.put_u32_le(payload.len() as u32);
    buf.put_u8(FrameFlags::more(more).as_u8());
    buf.put_slice(payload);
}

/// Try to extract one complete burst from `buf`.
///
/// Returns `Ok(None)` when more data is needed. Bytes are consumed from
/// `buf` only once the final frame of the burst is present, so a partial
/// burst never surfaces.
pub fn parse_burst(buf: &mut BytesMut) -> Result<Option<Vec<(Bytes, bool)>>, FrameError> {
    let mut offset = 0usize;
    let mut bounds = Vec::new();

    loop {
        if buf.len() < offset + FRAME_HEADER {
            return Ok(None);
        }
        let length = u32::from_le_bytes([
            buf[offset],
            buf[offset + 1],
            buf[offset + 2],
            buf[offset + 3],
        ]) as usize;
        if length > MAX_FRAME_SIZE {
            return Err(FrameError::FrameTooLarge(length));
        }
        let flags = FrameFlags::new(buf[offset + FRAME_HEADER - 1]);
        if buf.len() < offset + FRAME_HEADER + length {
            return Ok(None);
        }
        bounds.push((offset + FRAME_HEADER, length, flags.has_more()));
        offset += FRAME_HEADER + length;
        if !flags.has_more() {
            break;
        }
    }

    let burst = buf.split_to(offset).freeze();
    Ok(Some(
        bounds
            .into_iter()
            .map(|(start, length, more)| (burst.slice(start..start + length), more))
            .collect(),
    ))
}
