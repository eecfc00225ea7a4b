#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to create {0}: {1}")]
    Init(&'static str, std::io::Error),
    #[error("epoll_ctl {0} failed: {1}")]
    Ctl(&'static str, std::io::Error),
    #[error("kevent {0} failed: {1}")]
    Kevent(&'static str, std::io::Error),
    #[error("timerfd_settime failed: {0}")]
    Timer(std::io::Error),
    #[error("sigprocmask failed: {0}")]
    Signal(std::io::Error),
    #[error("poll failed: {0}")]
    Poll(std::io::Error),
    #[error("unknown timer id {0}")]
    UnknownTimer(u64),
}
