//! API route identification and the handful of page paths the server
//! treats specially. `routes.h++` wasn't part of the filtered original
//! source pack (`_INDEX.md` lists only `.c++`/build files); the route
//! strings below are reconstructed from the `api_handler/*.c++` file
//! names (`auth_login_options.c++` -> `/api/auth/login-options`, etc.)
//! rather than copied verbatim.

pub const INDEX_PAGE: &str = "/index.html";
pub const HOME_PAGE: &str = "/";

const PROTECTED_PREFIXES: &[&str] = &["/account", "/codex"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiRoute {
    None,
    AuthLoginOptions,
    AuthLoginFinish,
    AuthUserCheck,
    AuthUserRegister,
    AuthUserVerify,
    AuthUserEnroll,
    Stats,
    Events,
    Cpu,
    Memory,
    RedirectService,
    IncomingData,
    CodexBrief,
    CodexList,
    CodexItem,
    CodexRunStart,
    CodexRunStatus,
    CodexRunArtifacts,
}

pub fn identify_api_route(path: &str) -> ApiRoute {
    match path {
        "/api/auth/login-options" => ApiRoute::AuthLoginOptions,
        "/api/auth/login" => ApiRoute::AuthLoginFinish,
        "/api/auth/user-check" => ApiRoute::AuthUserCheck,
        "/api/auth/user-register" => ApiRoute::AuthUserRegister,
        "/api/auth/user-verify" => ApiRoute::AuthUserVerify,
        "/api/auth/user-enroll" => ApiRoute::AuthUserEnroll,
        "/api/stats" => ApiRoute::Stats,
        "/api/events" => ApiRoute::Events,
        "/api/cpu" => ApiRoute::Cpu,
        "/api/memory" => ApiRoute::Memory,
        "/api/redirect-service" => ApiRoute::RedirectService,
        "/api/incoming-data" => ApiRoute::IncomingData,
        "/api/codex/brief" => ApiRoute::CodexBrief,
        "/api/codex/list" => ApiRoute::CodexList,
        p if p.starts_with("/api/codex/item/") => ApiRoute::CodexItem,
        "/api/codex/run" => ApiRoute::CodexRunStart,
        p if p.starts_with("/api/codex/run/") && p.ends_with("/status") => ApiRoute::CodexRunStatus,
        p if p.starts_with("/api/codex/run/") && p.ends_with("/artifacts") => ApiRoute::CodexRunArtifacts,
        _ => ApiRoute::None,
    }
}

/// Paths that require a valid `Auth` session cookie before anything else
/// runs (codex views and the account area).
pub fn is_protected(path: &str) -> bool {
    PROTECTED_PREFIXES.iter().any(|prefix| path == *prefix || path.starts_with(&format!("{prefix}/")))
}

pub fn is_html_page(path: &str) -> bool {
    path == HOME_PAGE || path == INDEX_PAGE || path.ends_with(".html")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_auth_routes() {
        assert_eq!(identify_api_route("/api/auth/login-options"), ApiRoute::AuthLoginOptions);
        assert_eq!(identify_api_route("/api/auth/user-register"), ApiRoute::AuthUserRegister);
    }

    #[test]
    fn codex_item_and_run_status_use_prefix_matching() {
        assert_eq!(identify_api_route("/api/codex/item/42"), ApiRoute::CodexItem);
        assert_eq!(identify_api_route("/api/codex/run/7/status"), ApiRoute::CodexRunStatus);
        assert_eq!(identify_api_route("/api/codex/run/7/artifacts"), ApiRoute::CodexRunArtifacts);
    }

    #[test]
    fn unknown_path_is_none() {
        assert_eq!(identify_api_route("/favicon.ico"), ApiRoute::None);
    }

    #[test]
    fn protected_paths_require_prefix_or_exact_match() {
        assert!(is_protected("/account"));
        assert!(is_protected("/codex/run/1"));
        assert!(!is_protected("/accountant"));
    }
}
