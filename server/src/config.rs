use std::path::PathBuf;

use clap::Parser;

/// neonsignal — HTTPS/HTTP2 edge server with SNI-based virtual hosting and
/// passkey-gated JSON API.
#[derive(Debug, Parser)]
#[command(name = "neonsignal", version)]
pub struct Config {
    /// Worker thread pool size.
    #[arg(long, env = "NEONSIGNAL_THREADS", default_value_t = 4)]
    pub threads: usize,

    /// Address to bind the HTTPS listener on.
    #[arg(long, env = "NEONSIGNAL_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to bind the HTTPS listener on.
    #[arg(long, env = "NEONSIGNAL_PORT", default_value_t = 8443)]
    pub port: u16,

    /// WebAuthn relying party id (the bare domain, no scheme/port).
    #[arg(long, env = "NEONSIGNAL_WEBAUTHN_DOMAIN")]
    pub webauthn_domain: String,

    /// WebAuthn expected origin (scheme + domain, as sent by the browser).
    #[arg(long, env = "NEONSIGNAL_WEBAUTHN_ORIGIN")]
    pub webauthn_origin: String,

    /// Path to the `redb` database file.
    #[arg(long, env = "NEONSIGNAL_DB_PATH", default_value = "neonsignal.redb")]
    pub db_path: PathBuf,

    /// Virtual-hosting document root (one subdirectory per served domain).
    #[arg(long, env = "NEONSIGNAL_WWW_ROOT", default_value = "www")]
    pub www_root: PathBuf,

    /// Root directory containing one subdirectory per TLS certificate
    /// (plus an optional `_default`).
    #[arg(long, env = "NEONSIGNAL_CERTS_ROOT", default_value = "certs")]
    pub certs_root: PathBuf,

    /// Working directory the server chdirs into before opening any
    /// relative paths above.
    #[arg(long, env = "NEONSIGNAL_WORKING_DIR")]
    pub working_dir: Option<PathBuf>,

    /// Log level filter (`error`, `warn`, `info`, `debug`, `trace`).
    #[arg(long, env = "NEONSIGNAL_LOG_LEVEL", default_value = "info")]
    pub log_level: log::LevelFilter,

    /// Port the companion `redirect` service listens on, probed for the
    /// `redirect-service` SSE channel's liveness sample.
    #[arg(long, env = "NEONSIGNAL_REDIRECT_PROBE_PORT", default_value_t = 80)]
    pub redirect_probe_port: u16,

    /// Page a protected path redirects to when the session cookie is
    /// missing or invalid.
    #[arg(long, env = "NEONSIGNAL_AUTH_PAGE", default_value = "/login")]
    pub auth_page: String,
}
