//! Hand-rolled HTTP/2 frame codec and HPACK pseudo-header extraction.
//!
//! Frame layout, response assembly and settings/window-update
//! sequencing are grounded on
//! `neonsignal/http2_listener/helper/{build_frame,build_response_frames,
//! build_server_settings,build_settings_ack}.c++` and
//! `spin/http2_listener/helper/build_window_update.c++`. Pseudo-header
//! extraction is grounded on `spin/hpack_decoder/decode.c++`.

#![warn(clippy::all)]

mod content_type;
mod error;
mod frame;
mod hpack_headers;
mod response;
mod settings;

pub use content_type::guess_content_type;
pub use error::Error;
pub use frame::{Frame, FrameType, Flags, FRAME_HEADER_LEN, MAX_FRAME_SIZE};
pub use hpack_headers::{HpackDecoder, Request};
pub use response::{build_response_frames, build_response_frames_with_headers};
pub use settings::{build_server_settings, build_settings_ack, build_window_update, DEFAULT_INITIAL_WINDOW_SIZE, CONNECTION_WINDOW_BOOST};

pub type Result<T> = std::result::Result<T, Error>;
