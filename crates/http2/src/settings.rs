use crate::frame::{Flags, Frame, FrameType};

/// SETTINGS_INITIAL_WINDOW_SIZE sent at connection start, 16 MiB.
/// Deliberately not unified with [`CONNECTION_WINDOW_BOOST`] — both are
/// sent, matching `handle_io_.c++`.
pub const DEFAULT_INITIAL_WINDOW_SIZE: u32 = 0x0100_0000;
/// One-time connection-level WINDOW_UPDATE sent right after the TLS
/// handshake completes, 64 MiB.
pub const CONNECTION_WINDOW_BOOST: u32 = 64 * 1024 * 1024;

/// SETTINGS_MAX_CONCURRENT_STREAMS=100, SETTINGS_INITIAL_WINDOW_SIZE=16MiB.
pub fn build_server_settings() -> Vec<u8> {
    let mut payload = Vec::with_capacity(12);
    payload.extend_from_slice(&[0x00, 0x03]);
    payload.extend_from_slice(&100u32.to_be_bytes());
    payload.extend_from_slice(&[0x00, 0x04]);
    payload.extend_from_slice(&DEFAULT_INITIAL_WINDOW_SIZE.to_be_bytes());
    Frame::encode(FrameType::Settings, 0, 0, &payload)
}

pub fn build_settings_ack() -> Vec<u8> {
    Frame::encode(FrameType::Settings, Flags::ACK, 0, &[])
}

pub fn build_window_update(stream_id: u32, increment: u32) -> Vec<u8> {
    let mut payload = Vec::with_capacity(4);
    payload.push(((increment >> 24) & 0x7F) as u8);
    payload.push(((increment >> 16) & 0xFF) as u8);
    payload.push(((increment >> 8) & 0xFF) as u8);
    payload.push((increment & 0xFF) as u8);
    Frame::encode(FrameType::WindowUpdate, 0, stream_id, &payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FRAME_HEADER_LEN;

    #[test]
    fn settings_ack_has_empty_payload_and_ack_flag() {
        let frame = build_settings_ack();
        let (ty, flags, stream_id, len) = Frame::parse_header(&frame).unwrap();
        assert_eq!(ty, FrameType::Settings);
        assert_eq!(flags, Flags::ACK);
        assert_eq!(stream_id, 0);
        assert_eq!(len, 0);
    }

    #[test]
    fn window_update_encodes_increment_in_payload() {
        let frame = build_window_update(3, CONNECTION_WINDOW_BOOST);
        let (_, _, stream_id, len) = Frame::parse_header(&frame).unwrap();
        assert_eq!(stream_id, 3);
        assert_eq!(len, 4);
        let payload = &frame[FRAME_HEADER_LEN..];
        let increment = ((payload[0] as u32 & 0x7F) << 24)
            | ((payload[1] as u32) << 16)
            | ((payload[2] as u32) << 8)
            | payload[3] as u32;
        assert_eq!(increment, CONNECTION_WINDOW_BOOST);
    }
}
