//! Raw listener setup, grounded on `redirect_service/setup_listener_.c++`:
//! manual `sockaddr_in` construction, `SO_REUSEADDR` plus a best-effort
//! `SO_REUSEPORT` so several instances can share one listen port.

use std::io;
use std::net::{Ipv4Addr, TcpListener};
use std::os::unix::io::FromRawFd;
use std::str::FromStr;

pub fn bind_reuseport(host: &str, port: u16) -> io::Result<TcpListener> {
    unsafe {
        let fd = libc::socket(libc::AF_INET, libc::SOCK_STREAM, 0);
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }

        let enable: libc::c_int = 1;
        let opt_len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
        if libc::setsockopt(fd, libc::SOL_SOCKET, libc::SO_REUSEADDR, &enable as *const _ as *const libc::c_void, opt_len) != 0 {
            let err = io::Error::last_os_error();
            libc::close(fd);
            return Err(err);
        }
        // SO_REUSEPORT is a nicety for multi-instance sharing; not every
        // platform has it, so a failure here is not fatal.
        let _ = libc::setsockopt(fd, libc::SOL_SOCKET, libc::SO_REUSEPORT, &enable as *const _ as *const libc::c_void, opt_len);

        let addr = if host == "0.0.0.0" || host.is_empty() {
            libc::in_addr { s_addr: libc::INADDR_ANY.to_be() }
        } else {
            let ip = Ipv4Addr::from_str(host).map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;
            libc::in_addr { s_addr: u32::from(ip).to_be() }
        };

        let sockaddr = libc::sockaddr_in {
            sin_family: libc::AF_INET as libc::sa_family_t,
            sin_port: port.to_be(),
            sin_addr: addr,
            sin_zero: [0; 8],
            #[cfg(target_os = "macos")]
            sin_len: std::mem::size_of::<libc::sockaddr_in>() as u8,
        };

        let sockaddr_len = std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
        if libc::bind(fd, &sockaddr as *const libc::sockaddr_in as *const libc::sockaddr, sockaddr_len) != 0 {
            let err = io::Error::last_os_error();
            libc::close(fd);
            return Err(err);
        }
        if libc::listen(fd, 128) != 0 {
            let err = io::Error::last_os_error();
            libc::close(fd);
            return Err(err);
        }

        let listener = TcpListener::from_raw_fd(fd);
        listener.set_nonblocking(true)?;
        Ok(listener)
    }
}
