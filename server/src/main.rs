//! neonsignal edge server entry point. Bootstrap sequence grounded on
//! `neonsignal.c++`'s `main` (config load, cert manager init, vhost
//! scan, database open, listener start) and `router/node/src/main.rs`
//! for the logger/CLI wiring idiom.

mod accounts;
mod api;
mod config;
mod connection;
mod listener;
mod routes;
mod sse;
mod upload;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use event_loop::Backend;

use api::{ApiHandler, Counters};
use config::Config;
use connection::SharedState;
use listener::Http2Listener;
use sse::SseResetPolicy;
use storage::Database;
use tls_certs::CertManager;
use vhost::{StaticCache, VHostResolver};
use webauthn::WebAuthnManager;

fn main() -> anyhow::Result<()> {
    let cfg = Config::parse();

    log::set_logger(stdout_log::get()).expect("logger already set");
    log::set_max_level(cfg.log_level);

    if let Some(dir) = &cfg.working_dir {
        std::env::set_current_dir(dir).with_context(|| format!("chdir into {}", dir.display()))?;
    }

    log::info!("neonsignal starting: {}:{}", cfg.host, cfg.port);

    let certs = Arc::new(CertManager::new(cfg.certs_root.clone()));
    if !certs.initialize().context("loading TLS certificates")? {
        anyhow::bail!("no usable TLS certificate found under {}", cfg.certs_root.display());
    }
    let tls_config = Arc::new(certs.server_config());

    let vhosts = Arc::new(VHostResolver::new(cfg.www_root.clone()));
    vhosts.refresh().context("scanning virtual hosts")?;

    let static_cache = Arc::new(StaticCache::new());
    let loaded = static_cache.load(&cfg.www_root).context("preloading static files")?;
    log::info!("preloaded {loaded} static file(s) from {}", cfg.www_root.display());

    let db = Arc::new(Database::open(&cfg.db_path).context("opening database")?);

    let protected_paths = vec!["/account".to_string(), "/codex".to_string()];
    let auth = Arc::new(WebAuthnManager::new(cfg.webauthn_domain.clone(), cfg.webauthn_origin.clone(), db.clone(), protected_paths));
    auth.load_credentials().context("loading WebAuthn credentials")?;

    let api = Arc::new(ApiHandler {
        db: db.clone(),
        auth: auth.clone(),
        counters: Arc::new(Counters::default()),
        upload_dir: cfg.www_root.join("upload"),
    });

    let state = Arc::new(SharedState {
        vhosts,
        static_cache,
        api,
        reset_policy: SseResetPolicy::DEFAULT,
        redirect_probe_host: cfg.host.clone(),
        redirect_probe_port: cfg.redirect_probe_port,
        auth_page: cfg.auth_page.clone(),
    });

    let pool = Arc::new(thread_pool::ThreadPool::new(cfg.threads, 256, "neonsignal-worker"));
    let event_loop = Arc::new(event_loop::EventLoop::init().context("initializing event loop")?);

    let http_listener = Http2Listener::bind(&cfg.host, cfg.port, event_loop.clone(), state.clone()).context("binding listener")?;
    http_listener.start(tls_config).context("starting listener")?;

    // Certs/vhosts are rescanned off the event-loop thread every 5 minutes so a
    // dropped-in renewal or new domain directory shows up without a restart,
    // mirroring `cert_manager::reload`/`VHostResolver::refresh`'s intended use.
    {
        let pool = pool.clone();
        let certs = certs.clone();
        let vhosts = state.vhosts.clone();
        let static_cache = state.static_cache.clone();
        let www_root = cfg.www_root.clone();
        event_loop
            .add_timer(
                std::time::Duration::from_secs(300),
                Box::new(move || {
                    let certs = certs.clone();
                    let vhosts = vhosts.clone();
                    let static_cache = static_cache.clone();
                    let www_root = www_root.clone();
                    pool.spawn(move || {
                        if let Err(err) = certs.reload() {
                            log::warn!("cert reload failed: {err}");
                        }
                        if let Err(err) = vhosts.refresh() {
                            log::warn!("vhost refresh failed: {err}");
                        }
                        match static_cache.load(&www_root) {
                            Ok(n) => log::debug!("static cache reloaded: {n} file(s)"),
                            Err(err) => log::warn!("static cache reload failed: {err}"),
                        }
                    });
                }),
            )
            .context("registering reload timer")?;
    }

    // Expired sessions and used/expired verification tokens accumulate in
    // the database forever otherwise; sweep them off the event-loop
    // thread like the reload timer above.
    {
        let pool = pool.clone();
        let db = db.clone();
        event_loop
            .add_timer(
                std::time::Duration::from_secs(60),
                Box::new(move || {
                    let db = db.clone();
                    pool.spawn(move || {
                        let now = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).expect("system clock before epoch").as_secs() as i64;
                        match db.sweep_expired(now) {
                            Ok((sessions, verifications)) => {
                                if sessions > 0 || verifications > 0 {
                                    log::info!("db sweep: removed {sessions} expired session(s), {verifications} verification token(s)");
                                }
                            }
                            Err(err) => log::warn!("db sweep failed: {err}"),
                        }
                    });
                }),
            )
            .context("registering db sweep timer")?;
    }

    let running = Arc::new(std::sync::atomic::AtomicBool::new(true));
    {
        let running = running.clone();
        event_loop
            .add_signal(
                libc::SIGTERM,
                Box::new(move || {
                    log::info!("received SIGTERM, shutting down");
                    running.store(false, std::sync::atomic::Ordering::SeqCst);
                }),
            )
            .context("registering SIGTERM handler")?;
    }
    {
        let running = running.clone();
        event_loop
            .add_signal(
                libc::SIGINT,
                Box::new(move || {
                    log::info!("received SIGINT, shutting down");
                    running.store(false, std::sync::atomic::Ordering::SeqCst);
                }),
            )
            .context("registering SIGINT handler")?;
    }

    event_loop::run_until(&*event_loop, std::time::Duration::from_millis(250), || !running.load(std::sync::atomic::Ordering::SeqCst))
        .context("event loop")?;

    log::info!("neonsignal stopped");
    Ok(())
}
