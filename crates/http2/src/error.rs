#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("truncated frame header")]
    TruncatedHeader,
    #[error("truncated frame payload: need {needed}, have {have}")]
    TruncatedPayload { needed: usize, have: usize },
    #[error("frame exceeds max size: {0}")]
    FrameTooLarge(u32),
    #[error("hpack decode failed")]
    HpackDecode,
    #[error("request missing required pseudo-header :path")]
    MissingPath,
}
