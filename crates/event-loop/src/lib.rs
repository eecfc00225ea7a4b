//! Portable readiness-based event loop.
//!
//! Wraps epoll on Linux and kqueue on macOS/BSD behind one [`Backend`]
//! trait, with shared `EventMask` semantics for registered fds, one
//! timer primitive per backend (timerfd on Linux, `EVFILT_TIMER` on
//! kqueue) and one signal primitive (signalfd vs. `EVFILT_SIGNAL`).

#![warn(clippy::all)]

mod error;
mod mask;

#[cfg(target_os = "linux")]
mod linux;
#[cfg(not(target_os = "linux"))]
mod bsd;

pub use error::Error;
pub use mask::EventMask;

use std::time::Duration;

pub type Result<T> = std::result::Result<T, Error>;
pub type FdCallback = Box<dyn FnMut(EventMask) + Send>;
pub type TimerCallback = Box<dyn FnMut() + Send>;
pub type SignalCallback = Box<dyn FnMut() + Send>;

/// Backend-specific readiness multiplexer. One implementation per OS
/// family; callers use [`EventLoop`], the platform type alias below.
pub trait Backend: Sized {
    fn init() -> Result<Self>;

    fn add_fd(&self, fd: i32, events: EventMask, callback: FdCallback) -> Result<()>;
    fn update_fd(&self, fd: i32, events: EventMask) -> Result<()>;
    fn remove_fd(&self, fd: i32) -> Result<()>;

    /// Registers a periodic timer firing every `interval`. Returns an
    /// opaque id usable with [`Backend::cancel_timer`].
    fn add_timer(&self, interval: Duration, callback: TimerCallback) -> Result<u64>;
    fn cancel_timer(&self, timer_id: u64) -> Result<()>;

    fn add_signal(&self, signum: i32, callback: SignalCallback) -> Result<()>;

    /// Blocks for up to `timeout_ms` (negative means forever) waiting
    /// for readiness, dispatches every ready callback, and returns the
    /// number of events dispatched. `Ok(0)` on a spurious `EINTR` wakeup.
    fn poll(&self, timeout_ms: i32) -> Result<usize>;
}

#[cfg(target_os = "linux")]
pub type EventLoop = linux::LinuxBackend;
#[cfg(not(target_os = "linux"))]
pub type EventLoop = bsd::BsdBackend;

/// Runs `loop { poll }` until `should_stop` returns true, sleeping for
/// at most `max_wait` between iterations when nothing is pending.
pub fn run_until<B: Backend>(backend: &B, max_wait: Duration, mut should_stop: impl FnMut() -> bool) -> Result<()> {
    let timeout_ms = max_wait.as_millis().min(i32::MAX as u128) as i32;
    while !should_stop() {
        backend.poll(timeout_ms)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn mask_combination_and_contains() {
        let mask = EventMask::READ | EventMask::EDGE;
        assert!(mask.contains(EventMask::READ));
        assert!(mask.contains(EventMask::EDGE));
        assert!(!mask.contains(EventMask::WRITE));
    }

    #[test]
    fn backend_dispatches_timer() {
        let backend = EventLoop::init().unwrap();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let timer_id = backend
            .add_timer(Duration::from_millis(5), Box::new(move || {
                flag.store(true, Ordering::SeqCst);
            }))
            .unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(1);
        while !fired.load(Ordering::SeqCst) && std::time::Instant::now() < deadline {
            backend.poll(50).unwrap();
        }
        assert!(fired.load(Ordering::SeqCst));
        backend.cancel_timer(timer_id).unwrap();
    }

    #[test]
    fn unknown_timer_cancel_errors() {
        let backend = EventLoop::init().unwrap();
        assert!(backend.cancel_timer(9999).is_err());
    }
}
