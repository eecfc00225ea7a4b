//! Email/token account lifecycle that sits in front of WebAuthn
//! enrollment: register -> verify -> enroll. Grounded on
//! `api_handler/{user_register,user_verify,user_enroll}.c++`.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine;
use sha2::{Digest, Sha256};

use storage::{Database, SessionKind, User, VerificationToken};
use webauthn::{session_ttl_secs, WebAuthnManager};

const ENGINE: base64::engine::GeneralPurpose = base64::engine::general_purpose::URL_SAFE_NO_PAD;
const VERIFICATION_TTL_SECS: i64 = 24 * 3600;

/// Demo-scale cap mirroring the original's hardcoded single-tenant limit.
const MAX_USERS: u64 = 1;

pub const SESSION_COOKIE: &str = "ns_session";
/// Non-`HttpOnly` twin of `SESSION_COOKIE`, readable from client script
/// for diagnostics only; never consulted by `validate_session`.
pub const DEBUG_COOKIE: &str = "ns_debug";

pub struct ApiResponse {
    pub status: u16,
    pub body: String,
    pub set_cookie: Vec<String>,
}

impl ApiResponse {
    fn json(status: u16, body: impl Into<String>) -> Self {
        Self { status, body: body.into(), set_cookie: Vec::new() }
    }

    fn error(status: u16, message: &str) -> Self {
        Self::json(status, serde_json::json!({ "error": message }).to_string())
    }
}

/// Builds the `ns_session`/`ns_debug` cookie pair for a freshly issued
/// session: `HttpOnly` session cookie plus a readable twin, both carrying
/// the same `Max-Age`.
pub fn session_cookies(session_id: &str, ttl_secs: i64) -> Vec<String> {
    vec![
        format!("{SESSION_COOKIE}={session_id}; Path=/; Max-Age={ttl_secs}; HttpOnly; Secure; SameSite=Lax"),
        format!("{DEBUG_COOKIE}={session_id}; Path=/; Max-Age={ttl_secs}; Secure; SameSite=Lax"),
    ]
}

/// Cookie pair that clears both the session cookie and its debug twin.
pub fn clear_session_cookies() -> Vec<String> {
    vec![
        format!("{SESSION_COOKIE}=; Path=/; Max-Age=0; HttpOnly; Secure; SameSite=Lax"),
        format!("{DEBUG_COOKIE}=; Path=/; Max-Age=0; Secure; SameSite=Lax"),
    ]
}

fn now_secs() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).expect("system clock before epoch").as_secs() as i64
}

fn sha256_hash(data: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}

pub fn register(db: &Database, body: &serde_json::Value) -> anyhow::Result<ApiResponse> {
    let Some(email) = body.get("email").and_then(|v| v.as_str()).filter(|s| !s.is_empty()) else {
        return Ok(ApiResponse::error(400, "email required"));
    };
    let display_name = body.get("display_name").and_then(|v| v.as_str()).filter(|s| !s.is_empty()).unwrap_or(email);

    if db.list_users()?.len() as u64 >= MAX_USERS {
        return Ok(ApiResponse::error(403, "registration closed (demo limit reached)"));
    }
    if db.get_user_by_email(email)?.is_some() {
        return Ok(ApiResponse::error(400, "user already exists"));
    }

    let user = User {
        id: db.next_id("users")?,
        email: email.to_string(),
        display_name: display_name.to_string(),
        verified: false,
        credential_id: None,
        public_key: None,
        sign_count: 0,
        created_at: now_secs(),
        last_login: None,
    };
    db.put_user(&user)?;

    let token = {
        let mut buf = [0u8; 32];
        rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut buf);
        buf
    };
    let token_hash = ENGINE.encode(sha256_hash(&token));
    db.put_verification_token(&VerificationToken {
        token: token_hash,
        user_id: user.id,
        expires_at: now_secs() + VERIFICATION_TTL_SECS,
        used_at: None,
    })?;

    let token_b64 = ENGINE.encode(token);
    log::info!("account: verification token issued for {email} (curl -X POST -d '{{\"token\":\"{token_b64}\",\"email\":\"{email}\"}}' .../api/auth/user-verify)");

    Ok(ApiResponse::json(200, serde_json::json!({ "ok": true, "token": token_b64 }).to_string()))
}

pub fn verify(db: &Database, auth: &WebAuthnManager, body: &serde_json::Value) -> anyhow::Result<ApiResponse> {
    let Some(email) = body.get("email").and_then(|v| v.as_str()).filter(|s| !s.is_empty()) else {
        return Ok(ApiResponse::error(400, "email required"));
    };
    let token_b64 = body.get("token").and_then(|v| v.as_str()).unwrap_or("");

    if token_b64.is_empty() {
        let Some(user) = db.get_user_by_email(email)? else {
            return Ok(ApiResponse::error(400, "user not found"));
        };
        if !user.verified {
            return Ok(ApiResponse::error(400, "account not verified"));
        }
        return issue_pre_webauthn_session(auth, user.id, &user.email);
    }

    let Ok(token) = ENGINE.decode(token_b64) else {
        return Ok(ApiResponse::error(400, "invalid token format"));
    };
    if token.len() != 32 {
        return Ok(ApiResponse::error(400, "invalid token format"));
    }
    let token_hash = ENGINE.encode(sha256_hash(&token));

    let Some(mut verification) = db.get_verification_token(&token_hash)? else {
        return Ok(ApiResponse::error(400, "invalid or expired token"));
    };
    if verification.used_at.is_some() {
        return Ok(ApiResponse::error(400, "token already used"));
    }
    if verification.expires_at < now_secs() {
        return Ok(ApiResponse::error(400, "invalid or expired token"));
    }
    let Some(mut user) = db.get_user(verification.user_id)? else {
        return Ok(ApiResponse::error(400, "user not found"));
    };
    if user.email != email {
        return Ok(ApiResponse::error(400, "email mismatch"));
    }

    verification.used_at = Some(now_secs());
    db.put_verification_token(&verification)?;

    user.verified = true;
    db.put_user(&user)?;
    log::info!("account: {} verified", user.email);

    issue_pre_webauthn_session(auth, user.id, &user.email)
}

fn issue_pre_webauthn_session(auth: &WebAuthnManager, user_id: u64, email: &str) -> anyhow::Result<ApiResponse> {
    let session_id = auth.issue_session_for(user_id, SessionKind::PreWebauthn)?;
    log::info!("account: {email} pre_webauthn session issued");
    let mut res = ApiResponse::json(200, serde_json::json!({ "ok": true, "session_id": session_id }).to_string());
    res.set_cookie = session_cookies(&session_id, session_ttl_secs(SessionKind::PreWebauthn));
    Ok(res)
}

pub fn enroll_start(db: &Database, auth: &WebAuthnManager, session_user_id: u64) -> anyhow::Result<ApiResponse> {
    let Some(user) = db.get_user(session_user_id)? else {
        return Ok(ApiResponse::error(404, "user not found"));
    };
    match auth.make_register_options_for_user(user.id) {
        Ok(opts) => Ok(ApiResponse::json(200, opts.json)),
        Err(err) => Ok(ApiResponse::error(500, &err.to_string())),
    }
}

pub fn enroll_finish(db: &Database, auth: &WebAuthnManager, session_user_id: u64, body: &str) -> anyhow::Result<ApiResponse> {
    if let Err(err) = auth.finish_register_for_user(session_user_id, body) {
        return Ok(ApiResponse::error(400, &err.to_string()));
    }
    let Some(user) = db.get_user(session_user_id)? else {
        return Ok(ApiResponse::error(500, "user not found"));
    };
    let session_id = auth.issue_session_for(user.id, SessionKind::Auth)?;
    log::info!("account: {} enrolled a WebAuthn credential", user.email);
    let mut res = ApiResponse::json(200, serde_json::json!({ "ok": true, "session_id": session_id }).to_string());
    res.set_cookie = session_cookies(&session_id, session_ttl_secs(SessionKind::Auth));
    Ok(res)
}

pub fn extract_session_cookie(cookie_header: &str) -> Option<&str> {
    cookie_header.split(';').map(str::trim).find_map(|kv| kv.strip_prefix(&format!("{SESSION_COOKIE}=")))
}

pub type SharedDatabase = Arc<Database>;
