use crate::{Error, Result};

pub const FRAME_HEADER_LEN: usize = 9;
/// HTTP/2 default max frame size; DATA frames are chunked at this boundary.
pub const MAX_FRAME_SIZE: usize = 16384;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Data,
    Headers,
    Priority,
    RstStream,
    Settings,
    PushPromise,
    Ping,
    GoAway,
    WindowUpdate,
    Continuation,
    Unknown(u8),
}

impl From<u8> for FrameType {
    fn from(v: u8) -> Self {
        match v {
            0x0 => Self::Data,
            0x1 => Self::Headers,
            0x2 => Self::Priority,
            0x3 => Self::RstStream,
            0x4 => Self::Settings,
            0x5 => Self::PushPromise,
            0x6 => Self::Ping,
            0x7 => Self::GoAway,
            0x8 => Self::WindowUpdate,
            0x9 => Self::Continuation,
            other => Self::Unknown(other),
        }
    }
}

impl From<FrameType> for u8 {
    fn from(t: FrameType) -> u8 {
        match t {
            FrameType::Data => 0x0,
            FrameType::Headers => 0x1,
            FrameType::Priority => 0x2,
            FrameType::RstStream => 0x3,
            FrameType::Settings => 0x4,
            FrameType::PushPromise => 0x5,
            FrameType::Ping => 0x6,
            FrameType::GoAway => 0x7,
            FrameType::WindowUpdate => 0x8,
            FrameType::Continuation => 0x9,
            FrameType::Unknown(v) => v,
        }
    }
}

pub mod flags {
    pub const END_STREAM: u8 = 0x1;
    pub const ACK: u8 = 0x1;
    pub const END_HEADERS: u8 = 0x4;
    pub const PADDED: u8 = 0x8;
    pub const PRIORITY: u8 = 0x20;
}
pub use flags as Flags;

#[derive(Debug, Clone)]
pub struct Frame {
    pub frame_type: FrameType,
    pub flags: u8,
    pub stream_id: u32,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn has_flag(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }

    /// Serializes a frame: 24-bit length, 8-bit type, 8-bit flags, 31-bit
    /// stream id (high bit reserved/zero).
    pub fn encode(frame_type: FrameType, flags: u8, stream_id: u32, payload: &[u8]) -> Vec<u8> {
        let len = payload.len() as u32;
        let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
        frame.push(((len >> 16) & 0xFF) as u8);
        frame.push(((len >> 8) & 0xFF) as u8);
        frame.push((len & 0xFF) as u8);
        frame.push(frame_type.into());
        frame.push(flags);
        frame.push(((stream_id >> 24) & 0x7F) as u8);
        frame.push(((stream_id >> 16) & 0xFF) as u8);
        frame.push(((stream_id >> 8) & 0xFF) as u8);
        frame.push((stream_id & 0xFF) as u8);
        frame.extend_from_slice(payload);
        frame
    }

    /// Parses the 9-byte header from the front of `buf`, returning
    /// `(frame_type, flags, stream_id, payload_len)`. Does not consume
    /// the payload; the caller waits for `payload_len` further bytes.
    pub fn parse_header(buf: &[u8]) -> Result<(FrameType, u8, u32, usize)> {
        if buf.len() < FRAME_HEADER_LEN {
            return Err(Error::TruncatedHeader);
        }
        let len = ((buf[0] as usize) << 16) | ((buf[1] as usize) << 8) | buf[2] as usize;
        let frame_type = FrameType::from(buf[3]);
        let flags = buf[4];
        let stream_id = ((buf[5] as u32 & 0x7F) << 24)
            | ((buf[6] as u32) << 16)
            | ((buf[7] as u32) << 8)
            | buf[8] as u32;
        Ok((frame_type, flags, stream_id, len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_header_fields() {
        let encoded = Frame::encode(FrameType::Headers, Flags::END_HEADERS, 7, b"hello");
        let (ty, flags, stream_id, len) = Frame::parse_header(&encoded).unwrap();
        assert_eq!(ty, FrameType::Headers);
        assert_eq!(flags, Flags::END_HEADERS);
        assert_eq!(stream_id, 7);
        assert_eq!(len, 5);
        assert_eq!(&encoded[FRAME_HEADER_LEN..], b"hello");
    }

    #[test]
    fn truncated_header_errors() {
        assert!(Frame::parse_header(&[0u8; 4]).is_err());
    }

    #[test]
    fn stream_id_high_bit_is_masked_off() {
        let encoded = Frame::encode(FrameType::Data, 0, 0x8000_0001, &[]);
        let (_, _, stream_id, _) = Frame::parse_header(&encoded).unwrap();
        assert_eq!(stream_id, 1);
    }
}
