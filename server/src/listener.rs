//! TCP accept loop and SSE broadcast timer wiring, grounded on
//! `http2_listener/{handle_accept_,register_connection_,start}.c++`.

use std::collections::HashMap;
use std::net::TcpListener;
use std::os::unix::io::AsRawFd;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use event_loop::{Backend, EventLoop, EventMask};

use crate::connection::{Connection, SharedState};

pub struct Http2Listener {
    listener: TcpListener,
    event_loop: Arc<EventLoop>,
    state: Arc<SharedState>,
    connections: Arc<Mutex<HashMap<i32, Arc<Mutex<Connection>>>>>,
}

impl Http2Listener {
    pub fn bind(host: &str, port: u16, event_loop: Arc<EventLoop>, state: Arc<SharedState>) -> std::io::Result<Self> {
        let listener = TcpListener::bind((host, port))?;
        listener.set_nonblocking(true)?;
        Ok(Self { listener, event_loop, state, connections: Arc::new(Mutex::new(HashMap::new())) })
    }

    /// Registers the listening socket and a 1-second SSE tick timer
    /// (the GCD of the per-channel intervals) with the event loop, then
    /// returns; `event_loop::run_until` drives everything from here on.
    pub fn start(&self, tls_config: Arc<rustls::ServerConfig>) -> event_loop::Result<()> {
        let listener_fd = self.listener.as_raw_fd();
        let accept_listener = self.listener.try_clone().expect("clone listening socket");
        let event_loop = self.event_loop.clone();
        let state = self.state.clone();
        let connections = self.connections.clone();

        self.event_loop.add_fd(
            listener_fd,
            EventMask::READ | EventMask::EDGE,
            Box::new(move |_events| loop {
                match accept_listener.accept() {
                    Ok((stream, peer)) => {
                        if let Err(err) = stream.set_nonblocking(true) {
                            log::warn!("listener: failed to set nonblocking: {err}");
                            continue;
                        }
                        let fd = stream.as_raw_fd();
                        let tls = match rustls::ServerConnection::new(tls_config.clone()) {
                            Ok(tls) => tls,
                            Err(err) => {
                                log::warn!("listener: tls setup failed for {peer}: {err}");
                                continue;
                            }
                        };
                        let conn = Arc::new(Mutex::new(Connection::new(stream, tls, fd)));
                        connections.lock().unwrap().insert(fd, conn.clone());
                        log::info!("listener: accepted connection fd={fd} from {peer}");

                        let state = state.clone();
                        let connections_for_close = connections.clone();
                        let conn_for_read = conn.clone();
                        let event_loop_for_close = event_loop.clone();
                        let result = event_loop.add_fd(
                            fd,
                            EventMask::READ | EventMask::WRITE | EventMask::EDGE,
                            Box::new(move |events| {
                                let mut c = conn_for_read.lock().unwrap();
                                if events.contains(EventMask::READ) {
                                    c.on_readable(&state);
                                }
                                if events.contains(EventMask::WRITE) {
                                    c.on_writable();
                                }
                                if c.closed {
                                    let fd = c.fd;
                                    drop(c);
                                    let _ = event_loop_remove(&event_loop_for_close, fd);
                                    connections_for_close.lock().unwrap().remove(&fd);
                                }
                            }),
                        );
                        if let Err(err) = result {
                            log::warn!("listener: failed to register connection fd={fd}: {err}");
                            connections.lock().unwrap().remove(&fd);
                        }
                    }
                    Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => break,
                    Err(err) => {
                        log::warn!("listener: accept failed: {err}");
                        break;
                    }
                }
            }),
        )?;

        let sse_connections = self.connections.clone();
        let sse_state = self.state.clone();
        self.event_loop.add_timer(
            std::time::Duration::from_secs(1),
            Box::new(move || {
                let now = Instant::now();
                let policy = sse_state.reset_policy;
                for conn in sse_connections.lock().unwrap().values() {
                    conn.lock().unwrap().tick_sse(now, policy, &sse_state);
                }
            }),
        )?;

        let timeout_connections = self.connections.clone();
        let timeout_event_loop = self.event_loop.clone();
        self.event_loop.add_timer(
            std::time::Duration::from_secs(5),
            Box::new(move || {
                let now = Instant::now();
                let mut connections = timeout_connections.lock().unwrap();
                let timed_out: Vec<i32> = connections
                    .iter()
                    .filter(|(_, conn)| conn.lock().unwrap().is_idle(now, crate::connection::IDLE_TIMEOUT))
                    .map(|(fd, _)| *fd)
                    .collect();
                for fd in timed_out {
                    log::info!("connection timeout, closing fd={fd}");
                    connections.remove(&fd);
                    let _ = timeout_event_loop.remove_fd(fd);
                }
            }),
        )?;

        Ok(())
    }
}

fn event_loop_remove(event_loop: &EventLoop, fd: i32) -> event_loop::Result<()> {
    event_loop.remove_fd(fd)
}
