use crate::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: u64,
    pub email: String,
    pub display_name: String,
    pub verified: bool,
    #[serde(with = "crate::base64url::option", default, skip_serializing_if = "Option::is_none")]
    pub credential_id: Option<Vec<u8>>,
    #[serde(with = "crate::base64url::option", default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<Vec<u8>>,
    pub sign_count: u32,
    pub created_at: i64,
    pub last_login: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionKind {
    /// Issued between a passed challenge and a not-yet-completed
    /// registration; 5 minute TTL.
    PreWebauthn,
    /// Fully authenticated session; 5 day TTL, extended by 8 hours on
    /// every successful `validate_session` read (see `webauthn.c++`).
    Auth,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub user_id: u64,
    pub kind: SessionKind,
    pub expires_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationToken {
    pub token: String,
    pub user_id: u64,
    pub expires_at: i64,
    /// Set the first time the token is consumed. Kept instead of
    /// deleting the row so a replayed token can be told apart from one
    /// that never existed.
    #[serde(default)]
    pub used_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Challenge {
    #[serde(with = "crate::base64url")]
    pub challenge: Vec<u8>,
    pub user_id: Option<u64>,
    pub expires_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodexRecord {
    pub id: u64,
    pub kind: String,
    pub payload: serde_json::Value,
    pub created_at: i64,
}

/// Narrow interface for the `codex`/mail subprocess runners — those
/// runners themselves are out-of-scope external collaborators (see
/// SPEC_FULL.md §1); this only models the persistence they need.
pub trait ArtifactStore: Send + Sync {
    fn put_codex_record(&self, record: &CodexRecord) -> Result<()>;
    fn get_codex_record(&self, id: u64) -> Result<Option<CodexRecord>>;
    fn list_codex_records(&self) -> Result<Vec<CodexRecord>>;
}
