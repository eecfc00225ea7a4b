//! neonsignal-redirect entry point. Bootstrap grounded on
//! `redirect_service/start.c++`: bind, log the bound address, run the
//! loop. `REDIRECT_INSTANCES` spawns extra listener threads sharing the
//! port via SO_REUSEPORT rather than the original's multi-process
//! model, since a single Rust binary can run several independent event
//! loops just as cheaply.

mod config;
mod connection;
mod service;
mod socket;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use event_loop::Backend;

use config::Config;
use service::RedirectService;

fn run_instance(cfg: &Config) -> anyhow::Result<()> {
    let listener = socket::bind_reuseport(&cfg.host, cfg.port).with_context(|| format!("binding {}:{}", cfg.host, cfg.port))?;
    let event_loop = Arc::new(event_loop::EventLoop::init().context("initializing event loop")?);
    let service = RedirectService::new(listener, event_loop.clone(), cfg.host.clone(), cfg.target_port, cfg.acme_webroot.clone());
    service.start().context("starting redirect service")?;

    let running = Arc::new(std::sync::atomic::AtomicBool::new(true));
    {
        let running = running.clone();
        event_loop
            .add_signal(libc::SIGTERM, Box::new(move || running.store(false, std::sync::atomic::Ordering::SeqCst)))
            .context("registering SIGTERM handler")?;
    }
    {
        let running = running.clone();
        event_loop
            .add_signal(libc::SIGINT, Box::new(move || running.store(false, std::sync::atomic::Ordering::SeqCst)))
            .context("registering SIGINT handler")?;
    }

    event_loop::run_until(&*event_loop, std::time::Duration::from_millis(250), || !running.load(std::sync::atomic::Ordering::SeqCst))
        .context("event loop")
}

fn main() -> anyhow::Result<()> {
    let cfg = Config::parse();

    log::set_logger(stdout_log::get()).expect("logger already set");
    log::set_max_level(cfg.log_level);

    log::info!("neonsignal-redirect starting: {}:{} -> target port {}", cfg.host, cfg.port, cfg.target_port);
    if let Some(webroot) = &cfg.acme_webroot {
        log::info!("ACME HTTP-01 challenges served from {}", webroot.display());
    } else {
        log::info!("no ACME webroot configured, challenge requests will 404");
    }

    let extra = cfg.instances.saturating_sub(1);
    let mut handles = Vec::with_capacity(extra);
    for _ in 0..extra {
        let host = cfg.host.clone();
        let port = cfg.port;
        let target_port = cfg.target_port;
        let acme_webroot = cfg.acme_webroot.clone();
        let log_level = cfg.log_level;
        handles.push(std::thread::spawn(move || {
            let cfg = Config { instances: 1, host, port, target_port, acme_webroot, log_level };
            if let Err(err) = run_instance(&cfg) {
                log::error!("redirect instance failed: {err:#}");
            }
        }));
    }

    run_instance(&cfg)?;

    for handle in handles {
        let _ = handle.join();
    }

    log::info!("neonsignal-redirect stopped");
    Ok(())
}
