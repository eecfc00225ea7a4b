//! Accept loop wiring, grounded on
//! `redirect_service/{handle_accept_,register_connection_,start}.c++`.

use std::collections::HashMap;
use std::net::TcpListener;
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use event_loop::{Backend, EventLoop, EventMask};

use crate::connection::Connection;

pub struct RedirectService {
    listener: TcpListener,
    event_loop: Arc<EventLoop>,
    default_host: String,
    target_port: u16,
    acme_webroot: Option<PathBuf>,
    connections: Arc<Mutex<HashMap<i32, Arc<Mutex<Connection>>>>>,
}

impl RedirectService {
    pub fn new(listener: TcpListener, event_loop: Arc<EventLoop>, default_host: String, target_port: u16, acme_webroot: Option<PathBuf>) -> Self {
        Self { listener, event_loop, default_host, target_port, acme_webroot, connections: Arc::new(Mutex::new(HashMap::new())) }
    }

    /// Registers the listening socket's accept callback and returns;
    /// `event_loop::run_until` drives everything afterwards.
    pub fn start(&self) -> event_loop::Result<()> {
        let listen_fd = self.listener.as_raw_fd();
        let accept_listener = self.listener.try_clone().expect("clone listening socket");
        let event_loop = self.event_loop.clone();
        let connections = self.connections.clone();
        let default_host = self.default_host.clone();
        let target_port = self.target_port;
        let acme_webroot = self.acme_webroot.clone();

        self.event_loop.add_fd(
            listen_fd,
            EventMask::READ | EventMask::EDGE,
            Box::new(move |_events| loop {
                match accept_listener.accept() {
                    Ok((stream, peer)) => {
                        if let Err(err) = stream.set_nonblocking(true) {
                            log::warn!("redirect: failed to set nonblocking: {err}");
                            continue;
                        }
                        let fd = stream.as_raw_fd();
                        let conn = Arc::new(Mutex::new(Connection::new(stream, fd)));
                        connections.lock().unwrap().insert(fd, conn.clone());
                        log::debug!("redirect: accepted fd={fd} from {peer}");

                        let connections_for_close = connections.clone();
                        let event_loop_for_close = event_loop.clone();
                        let default_host = default_host.clone();
                        let acme_webroot = acme_webroot.clone();
                        let conn_for_io = conn.clone();
                        let result = event_loop.add_fd(
                            fd,
                            EventMask::READ | EventMask::WRITE | EventMask::EDGE,
                            Box::new(move |events| {
                                let mut c = conn_for_io.lock().unwrap();
                                if events.contains(EventMask::READ) {
                                    c.on_readable(&default_host, target_port, acme_webroot.as_deref());
                                }
                                if events.contains(EventMask::WRITE) {
                                    c.on_writable();
                                }
                                if c.closed {
                                    let fd = c.fd;
                                    drop(c);
                                    let _ = event_loop_for_close.remove_fd(fd);
                                    connections_for_close.lock().unwrap().remove(&fd);
                                }
                            }),
                        );
                        if let Err(err) = result {
                            log::warn!("redirect: failed to register connection fd={fd}: {err}");
                            connections.lock().unwrap().remove(&fd);
                        }
                    }
                    Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => break,
                    Err(err) => {
                        log::warn!("redirect: accept failed: {err}");
                        break;
                    }
                }
            }),
        )?;

        Ok(())
    }
}
