//! epoll/timerfd/signalfd backend. Mirrors the shape of
//! `event_loop/linux/backend.c++`: one epoll instance, one timerfd per
//! registered timer, one shared signalfd multiplexing every signal.

use crate::{Backend, EventMask, Error, FdCallback, Result, SignalCallback, TimerCallback};
use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn to_epoll_events(mask: EventMask) -> u32 {
    let mut events = 0u32;
    if mask.contains(EventMask::READ) {
        events |= libc::EPOLLIN as u32;
    }
    if mask.contains(EventMask::WRITE) {
        events |= libc::EPOLLOUT as u32;
    }
    if mask.contains(EventMask::ERROR) {
        events |= libc::EPOLLERR as u32;
    }
    if mask.contains(EventMask::HANG_UP) {
        events |= libc::EPOLLHUP as u32;
    }
    if mask.contains(EventMask::EDGE) {
        events |= libc::EPOLLET as u32;
    }
    if mask.contains(EventMask::READ_HANG_UP) {
        events |= libc::EPOLLRDHUP as u32;
    }
    events
}

fn from_epoll_events(events: u32) -> EventMask {
    let mut mask = EventMask::NONE;
    if events & libc::EPOLLIN as u32 != 0 {
        mask |= EventMask::READ;
    }
    if events & libc::EPOLLOUT as u32 != 0 {
        mask |= EventMask::WRITE;
    }
    if events & libc::EPOLLERR as u32 != 0 {
        mask |= EventMask::ERROR;
    }
    if events & libc::EPOLLHUP as u32 != 0 {
        mask |= EventMask::HANG_UP;
    }
    if events & libc::EPOLLET as u32 != 0 {
        mask |= EventMask::EDGE;
    }
    if events & libc::EPOLLRDHUP as u32 != 0 {
        mask |= EventMask::READ_HANG_UP;
    }
    mask
}

struct TimerInfo {
    fd: RawFd,
    callback: TimerCallback,
}

struct Inner {
    epoll_fd: RawFd,
    signal_fd: Mutex<RawFd>,
    signal_mask: Mutex<libc::sigset_t>,
    signal_fd_registered: Mutex<bool>,
    next_timer_id: AtomicU64,
    callbacks: Mutex<HashMap<RawFd, Arc<Mutex<FdCallback>>>>,
    timers: Mutex<HashMap<u64, TimerInfo>>,
    signal_callbacks: Mutex<HashMap<i32, SignalCallback>>,
}

pub struct LinuxBackend(Inner);

impl Drop for LinuxBackend {
    fn drop(&mut self) {
        for (_, info) in self.0.timers.lock().unwrap().drain() {
            unsafe { libc::close(info.fd) };
        }
        let signal_fd = *self.0.signal_fd.lock().unwrap();
        if signal_fd != -1 {
            unsafe { libc::close(signal_fd) };
        }
        unsafe { libc::close(self.0.epoll_fd) };
    }
}

impl Backend for LinuxBackend {
    fn init() -> Result<Self> {
        let epoll_fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epoll_fd == -1 {
            return Err(Error::Init("epoll instance", std::io::Error::last_os_error()));
        }
        Ok(Self(Inner {
            epoll_fd,
            signal_fd: Mutex::new(-1),
            signal_mask: Mutex::new(unsafe { std::mem::zeroed() }),
            signal_fd_registered: Mutex::new(false),
            next_timer_id: AtomicU64::new(1),
            callbacks: Mutex::new(HashMap::new()),
            timers: Mutex::new(HashMap::new()),
            signal_callbacks: Mutex::new(HashMap::new()),
        }))
    }

    fn add_fd(&self, fd: i32, events: EventMask, callback: FdCallback) -> Result<()> {
        let mut ev = libc::epoll_event {
            events: to_epoll_events(events),
            u64: fd as u64,
        };
        let rc = unsafe { libc::epoll_ctl(self.0.epoll_fd, libc::EPOLL_CTL_ADD, fd, &mut ev) };
        if rc == -1 {
            return Err(Error::Ctl("add", std::io::Error::last_os_error()));
        }
        self.0.callbacks.lock().unwrap().insert(fd, Arc::new(Mutex::new(callback)));
        Ok(())
    }

    fn update_fd(&self, fd: i32, events: EventMask) -> Result<()> {
        let mut ev = libc::epoll_event {
            events: to_epoll_events(events),
            u64: fd as u64,
        };
        let rc = unsafe { libc::epoll_ctl(self.0.epoll_fd, libc::EPOLL_CTL_MOD, fd, &mut ev) };
        if rc == -1 {
            return Err(Error::Ctl("mod", std::io::Error::last_os_error()));
        }
        Ok(())
    }

    fn remove_fd(&self, fd: i32) -> Result<()> {
        unsafe { libc::epoll_ctl(self.0.epoll_fd, libc::EPOLL_CTL_DEL, fd, std::ptr::null_mut()) };
        self.0.callbacks.lock().unwrap().remove(&fd);
        Ok(())
    }

    fn add_timer(&self, interval: Duration, callback: TimerCallback) -> Result<u64> {
        let timer_fd = unsafe { libc::timerfd_create(libc::CLOCK_MONOTONIC, libc::TFD_NONBLOCK | libc::TFD_CLOEXEC) };
        if timer_fd == -1 {
            return Err(Error::Init("timerfd", std::io::Error::last_os_error()));
        }

        let spec = libc::itimerspec {
            it_interval: libc::timespec {
                tv_sec: interval.as_secs() as libc::time_t,
                tv_nsec: interval.subsec_nanos() as libc::c_long,
            },
            it_value: libc::timespec {
                tv_sec: interval.as_secs() as libc::time_t,
                tv_nsec: interval.subsec_nanos() as libc::c_long,
            },
        };
        if unsafe { libc::timerfd_settime(timer_fd, 0, &spec, std::ptr::null_mut()) } == -1 {
            unsafe { libc::close(timer_fd) };
            return Err(Error::Timer(std::io::Error::last_os_error()));
        }

        let timer_id = self.0.next_timer_id.fetch_add(1, Ordering::Relaxed);
        self.0.timers.lock().unwrap().insert(timer_id, TimerInfo { fd: timer_fd, callback });

        let timers = &self.0.timers;
        self.add_fd(
            timer_fd,
            EventMask::READ,
            Box::new(move |_| {
                let mut buf = [0u8; 8];
                unsafe { libc::read(timer_fd, buf.as_mut_ptr() as *mut _, 8) };
                if let Some(info) = timers.lock().unwrap().get_mut(&timer_id) {
                    (info.callback)();
                }
            }),
        )?;

        Ok(timer_id)
    }

    fn cancel_timer(&self, timer_id: u64) -> Result<()> {
        let mut timers = self.0.timers.lock().unwrap();
        let info = timers.remove(&timer_id).ok_or(Error::UnknownTimer(timer_id))?;
        drop(timers);
        self.remove_fd(info.fd)?;
        unsafe { libc::close(info.fd) };
        Ok(())
    }

    fn add_signal(&self, signum: i32, callback: SignalCallback) -> Result<()> {
        let mut sigmask = self.0.signal_mask.lock().unwrap();
        unsafe {
            libc::sigaddset(&mut *sigmask, signum);
            if libc::sigprocmask(libc::SIG_BLOCK, &*sigmask, std::ptr::null_mut()) == -1 {
                return Err(Error::Signal(std::io::Error::last_os_error()));
            }
        }

        let mut signal_fd = self.0.signal_fd.lock().unwrap();
        let new_fd = unsafe { libc::signalfd(*signal_fd, &*sigmask, libc::SFD_NONBLOCK | libc::SFD_CLOEXEC) };
        if new_fd == -1 {
            return Err(Error::Init("signalfd", std::io::Error::last_os_error()));
        }
        *signal_fd = new_fd;
        drop(sigmask);

        self.0.signal_callbacks.lock().unwrap().insert(signum, callback);

        let mut registered = self.0.signal_fd_registered.lock().unwrap();
        if !*registered {
            let signal_callbacks = &self.0.signal_callbacks;
            self.add_fd(
                new_fd,
                EventMask::READ,
                Box::new(move |_| {
                    let mut info: libc::signalfd_siginfo = unsafe { std::mem::zeroed() };
                    loop {
                        let n = unsafe {
                            libc::read(
                                new_fd,
                                &mut info as *mut _ as *mut _,
                                std::mem::size_of::<libc::signalfd_siginfo>(),
                            )
                        };
                        if n != std::mem::size_of::<libc::signalfd_siginfo>() as isize {
                            break;
                        }
                        if let Some(cb) = signal_callbacks.lock().unwrap().get_mut(&(info.ssi_signo as i32)) {
                            cb();
                        }
                    }
                }),
            )?;
            *registered = true;
        }
        Ok(())
    }

    fn poll(&self, timeout_ms: i32) -> Result<usize> {
        let mut events: [libc::epoll_event; 64] = unsafe { std::mem::zeroed() };
        let n = unsafe { libc::epoll_wait(self.0.epoll_fd, events.as_mut_ptr(), events.len() as i32, timeout_ms) };
        if n == -1 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                return Ok(0);
            }
            return Err(Error::Poll(err));
        }
        for ev in events.iter().take(n as usize) {
            let fd = ev.u64 as RawFd;
            let cb = self.0.callbacks.lock().unwrap().get(&fd).cloned();
            if let Some(cb) = cb {
                let mask = from_epoll_events(ev.events);
                (cb.lock().unwrap())(mask);
            }
        }
        Ok(n as usize)
    }
}

unsafe impl Send for LinuxBackend {}
unsafe impl Sync for LinuxBackend {}
