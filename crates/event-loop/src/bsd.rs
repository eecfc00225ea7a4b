//! kqueue backend for macOS/BSD. Mirrors `event_loop/darwin/backend.c++`:
//! one kqueue, per-fd `EVFILT_READ`/`EVFILT_WRITE` kevents diffed on
//! update, `EVFILT_TIMER` with `NOTE_USECONDS`, `EVFILT_SIGNAL`.

use crate::{Backend, EventMask, Error, FdCallback, Result, SignalCallback, TimerCallback};
use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct Inner {
    kqueue_fd: RawFd,
    next_timer_id: AtomicI64,
    callbacks: Mutex<HashMap<RawFd, Arc<Mutex<FdCallback>>>>,
    fd_events: Mutex<HashMap<RawFd, EventMask>>,
    timer_callbacks: Mutex<HashMap<i64, TimerCallback>>,
    signal_callbacks: Mutex<HashMap<i32, SignalCallback>>,
}

pub struct BsdBackend(Inner);

unsafe impl Send for BsdBackend {}
unsafe impl Sync for BsdBackend {}

impl Drop for BsdBackend {
    fn drop(&mut self) {
        unsafe { libc::close(self.0.kqueue_fd) };
    }
}

fn kevent_change(kq: RawFd, changes: &mut [libc::kevent]) -> std::io::Result<()> {
    if changes.is_empty() {
        return Ok(());
    }
    let rc = unsafe { libc::kevent(kq, changes.as_ptr(), changes.len() as i32, std::ptr::null_mut(), 0, std::ptr::null()) };
    if rc == -1 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

fn make_kevent(ident: usize, filter: i16, flags: u16, fflags: u32, data: isize) -> libc::kevent {
    libc::kevent {
        ident,
        filter,
        flags,
        fflags,
        data: data as libc::intptr_t,
        udata: std::ptr::null_mut(),
    }
}

impl Backend for BsdBackend {
    fn init() -> Result<Self> {
        let kqueue_fd = unsafe { libc::kqueue() };
        if kqueue_fd == -1 {
            return Err(Error::Init("kqueue", std::io::Error::last_os_error()));
        }
        Ok(Self(Inner {
            kqueue_fd,
            next_timer_id: AtomicI64::new(1),
            callbacks: Mutex::new(HashMap::new()),
            fd_events: Mutex::new(HashMap::new()),
            timer_callbacks: Mutex::new(HashMap::new()),
            signal_callbacks: Mutex::new(HashMap::new()),
        }))
    }

    fn add_fd(&self, fd: i32, events: EventMask, callback: FdCallback) -> Result<()> {
        let mut flags = libc::EV_ADD | libc::EV_ENABLE;
        if events.contains(EventMask::EDGE) {
            flags |= libc::EV_CLEAR;
        }

        let mut changes = Vec::with_capacity(2);
        if events.contains(EventMask::READ) {
            changes.push(make_kevent(fd as usize, libc::EVFILT_READ, flags, 0, 0));
        }
        if events.contains(EventMask::WRITE) {
            changes.push(make_kevent(fd as usize, libc::EVFILT_WRITE, flags, 0, 0));
        }
        kevent_change(self.0.kqueue_fd, &mut changes).map_err(|e| Error::Kevent("add", e))?;

        self.0.callbacks.lock().unwrap().insert(fd, Arc::new(Mutex::new(callback)));
        self.0.fd_events.lock().unwrap().insert(fd, events);
        Ok(())
    }

    fn update_fd(&self, fd: i32, events: EventMask) -> Result<()> {
        let old_events = {
            let mut fd_events = self.0.fd_events.lock().unwrap();
            let old = fd_events.get(&fd).copied().unwrap_or(EventMask::NONE);
            fd_events.insert(fd, events);
            old
        };

        let mut flags = libc::EV_ADD | libc::EV_ENABLE;
        if events.contains(EventMask::EDGE) {
            flags |= libc::EV_CLEAR;
        }

        let mut changes = Vec::with_capacity(2);
        let read_now = events.contains(EventMask::READ);
        let read_before = old_events.contains(EventMask::READ);
        if read_now && !read_before {
            changes.push(make_kevent(fd as usize, libc::EVFILT_READ, flags, 0, 0));
        } else if !read_now && read_before {
            changes.push(make_kevent(fd as usize, libc::EVFILT_READ, libc::EV_DELETE, 0, 0));
        }

        let write_now = events.contains(EventMask::WRITE);
        let write_before = old_events.contains(EventMask::WRITE);
        if write_now && !write_before {
            changes.push(make_kevent(fd as usize, libc::EVFILT_WRITE, flags, 0, 0));
        } else if !write_now && write_before {
            changes.push(make_kevent(fd as usize, libc::EVFILT_WRITE, libc::EV_DELETE, 0, 0));
        }

        kevent_change(self.0.kqueue_fd, &mut changes).map_err(|e| Error::Kevent("update", e))
    }

    fn remove_fd(&self, fd: i32) -> Result<()> {
        let events = {
            let mut fd_events = self.0.fd_events.lock().unwrap();
            fd_events.remove(&fd).unwrap_or(EventMask::NONE)
        };
        self.0.callbacks.lock().unwrap().remove(&fd);

        let mut changes = Vec::with_capacity(2);
        if events.contains(EventMask::READ) {
            changes.push(make_kevent(fd as usize, libc::EVFILT_READ, libc::EV_DELETE, 0, 0));
        }
        if events.contains(EventMask::WRITE) {
            changes.push(make_kevent(fd as usize, libc::EVFILT_WRITE, libc::EV_DELETE, 0, 0));
        }
        // best-effort: fd may already be closed
        let _ = kevent_change(self.0.kqueue_fd, &mut changes);
        Ok(())
    }

    fn add_timer(&self, interval: Duration, callback: TimerCallback) -> Result<u64> {
        let timer_id = self.0.next_timer_id.fetch_add(1, Ordering::Relaxed);
        let micros = interval.as_micros() as isize;

        let mut changes = [make_kevent(
            timer_id as usize,
            libc::EVFILT_TIMER,
            libc::EV_ADD | libc::EV_ENABLE,
            libc::NOTE_USECONDS as u32,
            micros,
        )];
        kevent_change(self.0.kqueue_fd, &mut changes).map_err(|e| Error::Kevent("timer add", e))?;

        self.0.timer_callbacks.lock().unwrap().insert(timer_id, callback);
        Ok(timer_id as u64)
    }

    fn cancel_timer(&self, timer_id: u64) -> Result<()> {
        let mut changes = [make_kevent(timer_id as usize, libc::EVFILT_TIMER, libc::EV_DELETE, 0, 0)];
        let _ = kevent_change(self.0.kqueue_fd, &mut changes);
        self.0
            .timer_callbacks
            .lock()
            .unwrap()
            .remove(&(timer_id as i64))
            .ok_or(Error::UnknownTimer(timer_id))?;
        Ok(())
    }

    fn add_signal(&self, signum: i32, callback: SignalCallback) -> Result<()> {
        unsafe { libc::signal(signum, libc::SIG_IGN) };

        let mut changes = [make_kevent(signum as usize, libc::EVFILT_SIGNAL, libc::EV_ADD | libc::EV_ENABLE, 0, 0)];
        kevent_change(self.0.kqueue_fd, &mut changes).map_err(|e| Error::Kevent("signal add", e))?;

        self.0.signal_callbacks.lock().unwrap().insert(signum, callback);
        Ok(())
    }

    fn poll(&self, timeout_ms: i32) -> Result<usize> {
        let mut events: [libc::kevent; 64] = unsafe { std::mem::zeroed() };
        let timeout = libc::timespec {
            tv_sec: (timeout_ms / 1000) as libc::time_t,
            tv_nsec: ((timeout_ms % 1000) * 1_000_000) as libc::c_long,
        };
        let timeout_ptr = if timeout_ms >= 0 { &timeout as *const _ } else { std::ptr::null() };

        let n = unsafe {
            libc::kevent(
                self.0.kqueue_fd,
                std::ptr::null(),
                0,
                events.as_mut_ptr(),
                events.len() as i32,
                timeout_ptr,
            )
        };
        if n == -1 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                return Ok(0);
            }
            return Err(Error::Poll(err));
        }

        for ev in events.iter().take(n as usize) {
            if ev.filter == libc::EVFILT_TIMER {
                if let Some(cb) = self.0.timer_callbacks.lock().unwrap().get_mut(&(ev.ident as i64)) {
                    cb();
                }
                continue;
            }
            if ev.filter == libc::EVFILT_SIGNAL {
                if let Some(cb) = self.0.signal_callbacks.lock().unwrap().get_mut(&(ev.ident as i32)) {
                    cb();
                }
                continue;
            }

            let fd = ev.ident as RawFd;
            let cb = self.0.callbacks.lock().unwrap().get(&fd).cloned();
            if let Some(cb) = cb {
                let mut mask = EventMask::NONE;
                if ev.filter == libc::EVFILT_READ {
                    mask |= EventMask::READ;
                    if ev.flags & libc::EV_EOF != 0 {
                        mask |= EventMask::HANG_UP;
                    }
                }
                if ev.filter == libc::EVFILT_WRITE {
                    mask |= EventMask::WRITE;
                }
                if ev.flags & libc::EV_ERROR != 0 {
                    mask |= EventMask::ERROR;
                }
                (cb.lock().unwrap())(mask);
            }
        }

        Ok(n as usize)
    }
}
