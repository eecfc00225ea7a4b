//! Embedded persistence for users, sessions, verification tokens,
//! challenges and background-task artifacts.
//!
//! Grounded on `neonsignal/database/{database,serialization}.c++` for
//! the table/submap layout and per-family monotonic counters. The
//! original hand-rolls a B+tree; this port uses `redb` (a pure-Rust
//! embedded key-value store with the same transactional B-tree shape)
//! and encodes records as JSON via `serde`/`serde_json` instead of the
//! original's hand-rolled escaping serializer.

#![warn(clippy::all)]

mod base64url;
mod db;
mod error;
mod models;

pub use db::Database;
pub use error::Error;
pub use models::{ArtifactStore, Challenge, CodexRecord, Session, SessionKind, User, VerificationToken};

pub type Result<T> = std::result::Result<T, Error>;

pub(crate) fn base64url_encode(bytes: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}
