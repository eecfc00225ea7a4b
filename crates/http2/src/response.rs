use crate::frame::{Flags, Frame, FrameType, MAX_FRAME_SIZE};

/// HPACK integer encoding with an N-bit prefix, grounded on
/// `http2_listener/helper/encode_integer.c++`.
fn encode_integer(out: &mut Vec<u8>, mut value: u32, prefix_bits: u8, first_byte_prefix: u8) {
    let max_prefix = (1u32 << prefix_bits) - 1;
    if value < max_prefix {
        out.push(first_byte_prefix | value as u8);
        return;
    }
    out.push(first_byte_prefix | max_prefix as u8);
    value -= max_prefix;
    while value >= 128 {
        out.push(((value & 0x7F) | 0x80) as u8);
        value >>= 7;
    }
    out.push(value as u8);
}

/// Un-huffman-coded string literal (`H=0`).
fn encode_string(out: &mut Vec<u8>, s: &str) {
    encode_integer(out, s.len() as u32, 7, 0x00);
    out.extend_from_slice(s.as_bytes());
}

fn encode_literal_header_no_index(out: &mut Vec<u8>, name_index: u32, value: &str) {
    encode_integer(out, name_index, 4, 0x00);
    encode_string(out, value);
}

fn encode_header_literal_name(out: &mut Vec<u8>, name: &str, value: &str) {
    out.push(0x00);
    encode_string(out, name);
    encode_string(out, value);
}

pub fn build_response_frames(out: &mut Vec<u8>, stream_id: u32, status: u16, content_type: &str, body: &[u8]) {
    build_response_frames_with_headers(out, stream_id, status, content_type, &[], body)
}

/// Builds a HEADERS frame (indexed `:status` for 200/404/500, literal
/// otherwise, literal `content-type` at static index 31, then any extra
/// headers) followed by DATA frames chunked at 16384 bytes, grounded on
/// `http2_listener/helper/build_response_frames.c++`.
pub fn build_response_frames_with_headers(
    out: &mut Vec<u8>,
    stream_id: u32,
    status: u16,
    content_type: &str,
    extra_headers: &[(String, String)],
    body: &[u8],
) {
    let mut headers_block = Vec::new();
    match status {
        200 => headers_block.push(0x88),
        404 => headers_block.push(0x8D),
        500 => headers_block.push(0x8E),
        other => encode_literal_header_no_index(&mut headers_block, 8, &other.to_string()),
    }
    encode_literal_header_no_index(&mut headers_block, 31, content_type);
    for (name, value) in extra_headers {
        encode_header_literal_name(&mut headers_block, name, value);
    }

    out.extend_from_slice(&Frame::encode(FrameType::Headers, Flags::END_HEADERS, stream_id, &headers_block));

    if body.is_empty() {
        out.extend_from_slice(&Frame::encode(FrameType::Data, Flags::END_STREAM, stream_id, &[]));
        return;
    }

    let mut offset = 0;
    while offset < body.len() {
        let chunk_size = MAX_FRAME_SIZE.min(body.len() - offset);
        let is_last = offset + chunk_size >= body.len();
        let flags = if is_last { Flags::END_STREAM } else { 0 };
        out.extend_from_slice(&Frame::encode(FrameType::Data, flags, stream_id, &body[offset..offset + chunk_size]));
        offset += chunk_size;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FRAME_HEADER_LEN;

    #[test]
    fn empty_body_emits_single_end_stream_data_frame() {
        let mut out = Vec::new();
        build_response_frames(&mut out, 1, 200, "text/plain", &[]);
        let data_frame_start = out.len() - FRAME_HEADER_LEN;
        assert_eq!(out[data_frame_start + 3], 0x0);
        assert_eq!(out[data_frame_start + 4], Flags::END_STREAM);
    }

    #[test]
    fn body_exactly_one_frame_is_not_split() {
        let mut out = Vec::new();
        let body = vec![0u8; MAX_FRAME_SIZE];
        build_response_frames(&mut out, 1, 200, "application/octet-stream", &body);
        // headers frame + exactly one data frame
        let (_, _, _, headers_len) = crate::frame::Frame::parse_header(&out).unwrap();
        let rest = &out[FRAME_HEADER_LEN + headers_len..];
        let (_, flags, _, len) = crate::frame::Frame::parse_header(rest).unwrap();
        assert_eq!(len, MAX_FRAME_SIZE);
        assert_eq!(flags, Flags::END_STREAM);
    }

    #[test]
    fn body_one_byte_over_boundary_splits_into_two_frames() {
        let mut out = Vec::new();
        let body = vec![0u8; MAX_FRAME_SIZE + 1];
        build_response_frames(&mut out, 1, 200, "application/octet-stream", &body);
        let (_, _, _, headers_len) = crate::frame::Frame::parse_header(&out).unwrap();
        let mut rest = &out[FRAME_HEADER_LEN + headers_len..];
        let (_, flags1, _, len1) = crate::frame::Frame::parse_header(rest).unwrap();
        assert_eq!(len1, MAX_FRAME_SIZE);
        assert_eq!(flags1, 0);
        rest = &rest[FRAME_HEADER_LEN + len1..];
        let (_, flags2, _, len2) = crate::frame::Frame::parse_header(rest).unwrap();
        assert_eq!(len2, 1);
        assert_eq!(flags2, Flags::END_STREAM);
    }
}
