use std::path::PathBuf;

use clap::Parser;

/// neonsignal-redirect — plaintext HTTP/1.1 listener that answers ACME
/// HTTP-01 challenges and 308-redirects everything else to HTTPS.
#[derive(Debug, Parser)]
#[command(name = "neonsignal-redirect", version)]
pub struct Config {
    /// Number of listener instances to run, each on its own thread,
    /// sharing the listen port via SO_REUSEPORT.
    #[arg(long, env = "REDIRECT_INSTANCES", default_value_t = 1)]
    pub instances: usize,

    /// Address to bind the plaintext listener on.
    #[arg(long, env = "REDIRECT_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to bind the plaintext listener on.
    #[arg(long, env = "REDIRECT_PORT", default_value_t = 80)]
    pub port: u16,

    /// Port advertised in the `Location:` header of the 308 response.
    #[arg(long, env = "REDIRECT_TARGET_PORT", default_value_t = 443)]
    pub target_port: u16,

    /// Webroot ACME HTTP-01 challenge files are served from, under
    /// `.well-known/acme-challenge/`. Unset disables challenge serving
    /// (every request, including challenge paths, gets a 404 there).
    #[arg(long, env = "ACME_WEBROOT")]
    pub acme_webroot: Option<PathBuf>,

    /// Log level filter (`error`, `warn`, `info`, `debug`, `trace`).
    #[arg(long, env = "NEONSIGNAL_LOG_LEVEL", default_value = "info")]
    pub log_level: log::LevelFilter,
}
