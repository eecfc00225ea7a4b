//! Dispatches an identified [`routes::ApiRoute`] to its handler and
//! returns data for the connection loop to turn into response frames.
//! Splitting "decide what the response is" from "write it to the wire"
//! (the latter stays centralized in `listener.rs`) is the one
//! deliberate structural departure from `handle_io_.c++`, whose handlers
//! mutate `conn->write_buf` directly.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use storage::{ArtifactStore, Database, SessionKind};
use webauthn::{session_ttl_secs, WebAuthnManager};

use crate::accounts::{self, ApiResponse};
use crate::routes::ApiRoute;
use crate::sse::Channel;
use crate::upload;

#[derive(Default)]
pub struct Counters {
    pub files_served: AtomicU64,
    pub page_views: AtomicU64,
}

pub enum Outcome {
    Respond(ApiResponse),
    Subscribe(Channel),
}

fn respond(status: u16, body: String) -> Outcome {
    Outcome::Respond(ApiResponse { status, body, set_cookie: Vec::new() })
}

fn error(status: u16, message: &str) -> Outcome {
    respond(status, serde_json::json!({ "error": message }).to_string())
}

pub struct ApiHandler {
    pub db: Arc<Database>,
    pub auth: Arc<WebAuthnManager>,
    pub counters: Arc<Counters>,
    pub upload_dir: std::path::PathBuf,
}

impl ApiHandler {
    /// Handles every route that doesn't need a request body. Routes that
    /// do (`user-register`/`user-verify`/`user-enroll` POSTs,
    /// `incoming-data`) are dispatched via [`Self::dispatch_with_body`]
    /// once the connection loop has buffered the full request body.
    pub fn dispatch(&self, route: ApiRoute, path: &str, headers: &std::collections::HashMap<String, String>) -> Outcome {
        match route {
            ApiRoute::AuthLoginOptions => match self.auth.make_login_options() {
                Ok(opts) => respond(200, opts.json),
                Err(err) => error(500, &err.to_string()),
            },
            ApiRoute::AuthUserCheck => {
                let user = headers.get("x-user").cloned().unwrap_or_default();
                if user.is_empty() {
                    return error(400, "missing user");
                }
                match self.auth.user_exists(&user) {
                    Ok(exists) => respond(200, serde_json::json!({ "user": user, "exists": exists }).to_string()),
                    Err(err) => error(500, &err.to_string()),
                }
            }
            ApiRoute::Stats => respond(
                200,
                serde_json::json!({
                    "files_served": self.counters.files_served.load(Ordering::Relaxed),
                    "page_views": self.counters.page_views.load(Ordering::Relaxed),
                })
                .to_string(),
            ),
            ApiRoute::Events => Outcome::Subscribe(Channel::Events),
            ApiRoute::Cpu => Outcome::Subscribe(Channel::Cpu),
            ApiRoute::Memory => Outcome::Subscribe(Channel::Memory),
            ApiRoute::RedirectService => Outcome::Subscribe(Channel::Redirect),
            ApiRoute::CodexBrief | ApiRoute::CodexList => match self.db.list_codex_records() {
                Ok(records) => respond(200, serde_json::to_string(&records).unwrap_or_else(|_| "[]".into())),
                Err(err) => error(500, &err.to_string()),
            },
            ApiRoute::CodexItem => {
                let Some(id) = path
                    .rsplit_once('/')
                    .map(|(_, tail)| tail)
                    .and_then(|s| s.parse::<u64>().ok())
                else {
                    return error(400, "missing id");
                };
                match self.db.get_codex_record(id) {
                    Ok(Some(record)) => respond(200, serde_json::to_string(&record).unwrap_or_else(|_| "{}".into())),
                    Ok(None) => error(404, "not found"),
                    Err(err) => error(500, &err.to_string()),
                }
            }
            ApiRoute::CodexRunStart | ApiRoute::CodexRunStatus | ApiRoute::CodexRunArtifacts => {
                // The `codex` subprocess runner is a narrow, best-effort external
                // collaborator (see SPEC_FULL.md §1) — not implemented here.
                error(501, "codex run orchestration is not available in this build")
            }
            ApiRoute::AuthLoginFinish | ApiRoute::AuthUserRegister | ApiRoute::AuthUserVerify | ApiRoute::AuthUserEnroll => {
                error(405, "this route requires a request body")
            }
            ApiRoute::IncomingData => error(405, "method not allowed"),
            ApiRoute::None => error(404, "not found"),
        }
    }

    pub fn dispatch_with_body(
        &self,
        route: ApiRoute,
        headers: &std::collections::HashMap<String, String>,
        body: &[u8],
    ) -> anyhow::Result<ApiResponse> {
        match route {
            ApiRoute::AuthLoginFinish => {
                let body_str = std::str::from_utf8(body).unwrap_or("");
                Ok(match self.auth.finish_login(body_str) {
                    Ok(result) => {
                        let mut res = ApiResponse {
                            status: 200,
                            body: serde_json::json!({
                                "ok": true,
                                "user": result.user_email,
                                "session_id": result.session_id,
                            })
                            .to_string(),
                            set_cookie: Vec::new(),
                        };
                        res.set_cookie = accounts::session_cookies(&result.session_id, session_ttl_secs(SessionKind::Auth));
                        res
                    }
                    Err(err) => ApiResponse { status: 401, body: serde_json::json!({ "error": err.to_string() }).to_string(), set_cookie: Vec::new() },
                })
            }
            ApiRoute::AuthUserRegister => {
                let value: serde_json::Value = serde_json::from_slice(body).unwrap_or(serde_json::Value::Null);
                accounts::register(&self.db, &value)
            }
            ApiRoute::AuthUserVerify => {
                let value: serde_json::Value = serde_json::from_slice(body).unwrap_or(serde_json::Value::Null);
                accounts::verify(&self.db, &self.auth, &value)
            }
            ApiRoute::AuthUserEnroll => {
                let session_id = headers.get("cookie").and_then(|c| accounts::extract_session_cookie(c)).unwrap_or("");
                let Some(user_id) = self.auth.validate_session(session_id)? else {
                    return Ok(ApiResponse { status: 401, body: r#"{"error":"invalid session"}"#.into(), set_cookie: Vec::new() });
                };
                let body_str = std::str::from_utf8(body).unwrap_or("");
                accounts::enroll_finish(&self.db, &self.auth, user_id, body_str)
            }
            ApiRoute::IncomingData => {
                let filename = headers.get("x-filename").map(String::as_str).unwrap_or("upload.bin");
                upload::handle_upload(&self.upload_dir, filename, body)
            }
            _ => Ok(ApiResponse { status: 404, body: r#"{"error":"not found"}"#.into(), set_cookie: Vec::new() }),
        }
    }

    /// `GET /api/auth/user-enroll` is a body-less companion to the POST
    /// above: it needs the session cookie but nothing else.
    pub fn enroll_options(&self, headers: &std::collections::HashMap<String, String>) -> anyhow::Result<ApiResponse> {
        let session_id = headers.get("cookie").and_then(|c| accounts::extract_session_cookie(c)).unwrap_or("");
        let Some(user_id) = self.auth.validate_session(session_id)? else {
            return Ok(ApiResponse { status: 401, body: r#"{"error":"invalid session"}"#.into(), set_cookie: Vec::new() });
        };
        accounts::enroll_start(&self.db, &self.auth, user_id)
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn codex_item_id_comes_from_trailing_path_segment() {
        let path = "/api/codex/item/42";
        let id = path.rsplit_once('/').map(|(_, tail)| tail).and_then(|s| s.parse::<u64>().ok());
        assert_eq!(id, Some(42));
    }
}
