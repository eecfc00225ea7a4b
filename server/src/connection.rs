//! Per-connection TLS + HTTP/2 state machine.
//!
//! Grounded on `handle_io_.c++`: one [`Connection`] per accepted socket,
//! driven by `event-loop`'s readiness callbacks instead of the
//! original's direct epoll dispatch. The non-blocking rustls
//! handshake loop (`read_tls`/`process_new_packets`/`write_tls`) follows
//! the standard pattern used by `common/protocols/src/tls.rs` in the
//! teacher, adapted from a sync `Read`/`Write` acceptor to edge-triggered
//! callbacks.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Instant;

use http2::{build_response_frames_with_headers, build_server_settings, build_settings_ack, build_window_update};
use http2::{Flags, Frame, FrameType, HpackDecoder, CONNECTION_WINDOW_BOOST};
use vhost::VHostResolver;

use crate::api::{ApiHandler, Outcome};
use crate::routes::{self, ApiRoute};
use crate::sse::{Channel, ChannelState, SseResetPolicy};

const PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";
/// Cap on a single buffered upload/request body (see `upload.rs`'s
/// buffer-then-write-once simplification).
const MAX_BODY_BYTES: usize = 128 * 1024 * 1024 * 1024;
/// Flow-control boost granted once to an upload stream as soon as it's
/// opened, distinct from the 64 MiB connection-wide boost sent once
/// post-handshake.
const STREAM_WINDOW_BOOST: u32 = 32 * 1024 * 1024;

struct StreamState {
    route: ApiRoute,
    headers: HashMap<String, String>,
    body: Vec<u8>,
}

pub struct Connection {
    pub fd: i32,
    stream: TcpStream,
    tls: rustls::ServerConnection,
    hpack: HpackDecoder,
    plain_in: Vec<u8>,
    preface_checked: bool,
    streams: HashMap<u32, StreamState>,
    sse: HashMap<u32, (Channel, ChannelState)>,
    authority: Option<String>,
    pub closed: bool,
    sent_connection_boost: bool,
    last_activity: Instant,
    /// `(wall-clock time, process CPU time in ns)` at the last `cpu`
    /// channel sample, so the next sample can report a percentage instead
    /// of a cumulative total.
    cpu_sample: Option<(Instant, i64)>,
}

/// Idle connections are dropped after this long without a readable
/// event, matching `Http2Listener::start`'s 5-second timeout scan
/// (`conn_manager_->find_timed_out_connections`) scaled up since this
/// port checks less frequently.
pub const IDLE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(300);

pub struct SharedState {
    pub vhosts: Arc<VHostResolver>,
    pub static_cache: Arc<vhost::StaticCache>,
    pub api: Arc<ApiHandler>,
    pub reset_policy: SseResetPolicy,
    /// Host the companion `redirect` service is expected to be listening
    /// on, for the `redirect-service` SSE channel's liveness probe.
    pub redirect_probe_host: String,
    pub redirect_probe_port: u16,
    /// Page a protected path redirects unauthenticated browsers to.
    pub auth_page: String,
}

impl Connection {
    pub fn new(stream: TcpStream, tls: rustls::ServerConnection, fd: i32) -> Self {
        Self {
            fd,
            stream,
            tls,
            hpack: HpackDecoder::new(),
            plain_in: Vec::new(),
            preface_checked: false,
            streams: HashMap::new(),
            sse: HashMap::new(),
            authority: None,
            closed: false,
            sent_connection_boost: false,
            last_activity: Instant::now(),
            cpu_sample: None,
        }
    }

    pub fn is_idle(&self, now: Instant, timeout: std::time::Duration) -> bool {
        now.saturating_duration_since(self.last_activity) >= timeout
    }

    fn flush_tls(&mut self) -> std::io::Result<()> {
        while self.tls.wants_write() {
            self.tls.write_tls(&mut self.stream)?;
        }
        Ok(())
    }

    fn send_plain(&mut self, bytes: &[u8]) {
        if let Err(err) = self.tls.writer().write_all(bytes) {
            log::warn!("connection fd={}: write failed: {err}", self.fd);
            self.closed = true;
            return;
        }
        if let Err(err) = self.flush_tls() {
            log::warn!("connection fd={}: tls flush failed: {err}", self.fd);
            self.closed = true;
        }
    }

    /// Drives the TLS handshake/record loop, then the HTTP/2 frame loop,
    /// whenever the socket becomes readable.
    pub fn on_readable(&mut self, state: &SharedState) {
        self.last_activity = Instant::now();
        loop {
            match self.tls.read_tls(&mut self.stream) {
                Ok(0) => {
                    self.closed = true;
                    return;
                }
                Ok(_) => {}
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    log::debug!("connection fd={}: read_tls error: {err}", self.fd);
                    self.closed = true;
                    return;
                }
            }
        }

        if let Err(err) = self.tls.process_new_packets() {
            log::debug!("connection fd={}: tls error: {err}", self.fd);
            self.closed = true;
            return;
        }

        let mut chunk = [0u8; 16384];
        loop {
            match self.tls.reader().read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => self.plain_in.extend_from_slice(&chunk[..n]),
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(_) => break,
            }
        }

        if self.tls.is_handshaking() {
            let _ = self.flush_tls();
            return;
        }

        if !self.sent_connection_boost {
            self.send_plain(&build_server_settings());
            self.send_plain(&build_window_update(0, CONNECTION_WINDOW_BOOST));
            self.sent_connection_boost = true;
        }

        self.drain_frames(state);
        let _ = self.flush_tls();
    }

    pub fn on_writable(&mut self) {
        let _ = self.flush_tls();
    }

    fn drain_frames(&mut self, state: &SharedState) {
        if !self.preface_checked {
            if self.plain_in.len() < PREFACE.len() {
                return;
            }
            if &self.plain_in[..PREFACE.len()] != PREFACE {
                log::warn!("connection fd={}: bad HTTP/2 preface", self.fd);
                self.closed = true;
                return;
            }
            self.plain_in.drain(..PREFACE.len());
            self.preface_checked = true;
        }

        loop {
            let Ok((frame_type, flags, stream_id, len)) = Frame::parse_header(&self.plain_in) else { break };
            if self.plain_in.len() < http2::FRAME_HEADER_LEN + len {
                break;
            }
            let payload = self.plain_in[http2::FRAME_HEADER_LEN..http2::FRAME_HEADER_LEN + len].to_vec();
            self.plain_in.drain(..http2::FRAME_HEADER_LEN + len);
            self.handle_frame(frame_type, flags, stream_id, payload, state);
            if self.closed {
                return;
            }
        }
    }

    fn handle_frame(&mut self, frame_type: FrameType, flags: u8, stream_id: u32, payload: Vec<u8>, state: &SharedState) {
        match frame_type {
            FrameType::Settings => {
                if flags & Flags::ACK == 0 {
                    self.send_plain(&build_settings_ack());
                }
            }
            FrameType::Ping => {
                if flags & Flags::ACK == 0 {
                    self.send_plain(&Frame::encode(FrameType::Ping, Flags::ACK, 0, &payload));
                }
            }
            FrameType::WindowUpdate | FrameType::Priority | FrameType::RstStream => {}
            FrameType::GoAway => self.closed = true,
            FrameType::Headers => self.handle_headers(stream_id, flags, &payload, state),
            FrameType::Data => self.handle_data(stream_id, flags, &payload, state),
            FrameType::Continuation | FrameType::PushPromise | FrameType::Unknown(_) => {}
        }
    }

    fn handle_headers(&mut self, stream_id: u32, flags: u8, block: &[u8], state: &SharedState) {
        let Ok(req) = self.hpack.decode(block) else {
            self.send_response(stream_id, 400, "text/plain", b"bad request");
            return;
        };
        if req.authority.is_some() {
            self.authority = req.authority.clone();
        }
        let method = req.method.clone().unwrap_or_else(|| "GET".to_string());
        let path_only = req.path.split('?').next().unwrap_or(&req.path);

        if routes::is_protected(path_only) {
            let cookie = req.headers.get("cookie").cloned().unwrap_or_default();
            let session_id = crate::accounts::extract_session_cookie(&cookie).unwrap_or("");
            let authorized = matches!(state.api.auth.validate_session(session_id), Ok(Some(_)));
            if !authorized {
                if routes::identify_api_route(path_only) != ApiRoute::None {
                    self.send_response(stream_id, 500, "application/json", br#"{"error":"auth-required"}"#);
                } else {
                    self.send_redirect_clear_cookies(stream_id, &state.auth_page);
                }
                return;
            }
        }

        let route = routes::identify_api_route(&req.path);
        let end_stream = flags & Flags::END_STREAM != 0;

        if route == ApiRoute::None {
            self.serve_static(stream_id, &req.path, state);
            return;
        }

        if matches!(route, ApiRoute::Events | ApiRoute::Cpu | ApiRoute::Memory | ApiRoute::RedirectService) {
            let channel = match route {
                ApiRoute::Events => Channel::Events,
                ApiRoute::Cpu => Channel::Cpu,
                ApiRoute::Memory => Channel::Memory,
                _ => Channel::Redirect,
            };
            self.sse.insert(stream_id, (channel, ChannelState::new()));
            self.send_sse_headers(stream_id);
            return;
        }

        let needs_body = matches!(
            route,
            ApiRoute::AuthLoginFinish | ApiRoute::AuthUserRegister | ApiRoute::AuthUserVerify | ApiRoute::AuthUserEnroll | ApiRoute::IncomingData
        ) && method.eq_ignore_ascii_case("POST");

        if needs_body && !end_stream {
            self.streams.insert(stream_id, StreamState { route, headers: req.headers.clone(), body: Vec::new() });
            self.send_plain(&build_window_update(stream_id, STREAM_WINDOW_BOOST));
            self.send_plain(&build_window_update(0, STREAM_WINDOW_BOOST));
            return;
        }

        if needs_body && end_stream {
            match state.api.dispatch_with_body(route, &req.headers, &[]) {
                Ok(res) => self.send_api_response(stream_id, &res),
                Err(err) => self.send_response(stream_id, 500, "application/json", err.to_string().as_bytes()),
            }
            return;
        }

        if route == ApiRoute::AuthUserEnroll {
            // GET variant: fetch registration options for the session's user,
            // no body involved (the POST variant is handled above).
            match state.api.enroll_options(&req.headers) {
                Ok(res) => self.send_api_response(stream_id, &res),
                Err(err) => self.send_response(stream_id, 500, "application/json", err.to_string().as_bytes()),
            }
            return;
        }

        match state.api.dispatch(route, &req.path, &req.headers) {
            Outcome::Respond(res) => self.send_api_response(stream_id, &res),
            Outcome::Subscribe(channel) => {
                self.sse.insert(stream_id, (channel, ChannelState::new()));
                self.send_sse_headers(stream_id);
            }
        }
    }

    fn handle_data(&mut self, stream_id: u32, flags: u8, payload: &[u8], state: &SharedState) {
        let Some(stream) = self.streams.get_mut(&stream_id) else { return };
        if stream.body.len() + payload.len() > MAX_BODY_BYTES {
            self.send_response(stream_id, 413, "text/plain", b"payload too large");
            self.streams.remove(&stream_id);
            return;
        }
        stream.body.extend_from_slice(payload);
        let final_frame = flags & Flags::END_STREAM != 0;
        if final_frame {
            let stream = self.streams.remove(&stream_id).unwrap();
            match state.api.dispatch_with_body(stream.route, &stream.headers, &stream.body) {
                Ok(res) => self.send_api_response(stream_id, &res),
                Err(err) => self.send_response(stream_id, 500, "application/json", err.to_string().as_bytes()),
            }
            return;
        }
        if !payload.is_empty() {
            self.send_plain(&build_window_update(stream_id, payload.len() as u32));
            self.send_plain(&build_window_update(0, payload.len() as u32));
        }
    }

    fn serve_static(&mut self, stream_id: u32, path: &str, state: &SharedState) {
        if path.split('/').any(|segment| segment == "..") {
            self.send_response(stream_id, 400, "text/plain", b"bad path");
            return;
        }

        let host = self.authority.clone().unwrap_or_default();
        let is_html = routes::is_html_page(path);
        let vhost = state.vhosts.resolve(&host);
        let cache_prefix = vhost.as_ref().map(|v| format!("/{}", v.domain));
        let doc_root = vhost.as_ref().map(|v| v.document_root.as_path()).unwrap_or_else(|| state.vhosts.public_root());
        let candidates = resolve_candidates(path);

        for candidate in &candidates {
            let cache_key = match &cache_prefix {
                Some(prefix) => format!("{prefix}{candidate}"),
                None => candidate.clone(),
            };
            if let Some(entry) = state.static_cache.get(&cache_key) {
                state.api.counters.files_served.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                if is_html {
                    state.api.counters.page_views.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                }
                let mut out = Vec::new();
                build_response_frames_with_headers(&mut out, stream_id, 200, entry.content_type, &[], &entry.body);
                self.send_plain(&out);
                return;
            }
        }

        for candidate in &candidates {
            let full_path = doc_root.join(candidate.trim_start_matches('/'));
            if let Ok(body) = std::fs::read(&full_path) {
                state.api.counters.files_served.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                if is_html {
                    state.api.counters.page_views.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                }
                let content_type = http2::guess_content_type(&full_path);
                let mut out = Vec::new();
                build_response_frames_with_headers(&mut out, stream_id, 200, content_type, &[], &body);
                self.send_plain(&out);
                return;
            }
        }

        if state.vhosts.is_neonjsx_route(&host, path) {
            let shell_key = match &cache_prefix {
                Some(prefix) => format!("{prefix}{}", routes::INDEX_PAGE),
                None => routes::INDEX_PAGE.to_string(),
            };
            if let Some(shell) = state.static_cache.get(&shell_key) {
                let mut out = Vec::new();
                build_response_frames_with_headers(&mut out, stream_id, 200, shell.content_type, &[], &shell.body);
                self.send_plain(&out);
                return;
            }
        }

        self.send_response(stream_id, 404, "text/plain", b"not found");
    }

    fn send_redirect_clear_cookies(&mut self, stream_id: u32, location: &str) {
        let mut extra: Vec<(String, String)> = vec![("location".to_string(), location.to_string())];
        extra.extend(crate::accounts::clear_session_cookies().into_iter().map(|c| ("set-cookie".to_string(), c)));
        let mut out = Vec::new();
        build_response_frames_with_headers(&mut out, stream_id, 302, "text/plain", &extra, b"redirecting to login");
        self.send_plain(&out);
    }

    fn send_api_response(&mut self, stream_id: u32, res: &crate::accounts::ApiResponse) {
        let extra: Vec<(String, String)> = res.set_cookie.iter().map(|c| ("set-cookie".to_string(), c.clone())).collect();
        let mut out = Vec::new();
        build_response_frames_with_headers(&mut out, stream_id, res.status, "application/json", &extra, res.body.as_bytes());
        self.send_plain(&out);
    }

    fn send_response(&mut self, stream_id: u32, status: u16, content_type: &str, body: &[u8]) {
        let mut out = Vec::new();
        build_response_frames_with_headers(&mut out, stream_id, status, content_type, &[], body);
        self.send_plain(&out);
    }

    fn send_sse_headers(&mut self, stream_id: u32) {
        let mut out = Vec::new();
        build_response_frames_with_headers(&mut out, stream_id, 200, "text/event-stream", &[], &[]);
        // `build_response_frames_with_headers` appends an END_STREAM DATA
        // frame for an empty body; an SSE stream must stay open for
        // `tick_sse`, so only the HEADERS frame is sent.
        self.send_plain(&headers_only(out));
    }

    /// Called periodically by the listener's SSE timer for every
    /// subscribed stream on this connection.
    pub fn tick_sse(&mut self, now: Instant, policy: SseResetPolicy, state: &SharedState) {
        let due_streams: Vec<u32> = self
            .sse
            .iter()
            .filter(|(_, (channel, channel_state))| crate::sse::due(channel_state, *channel, now) && !policy.should_reset(channel_state, now))
            .map(|(id, _)| *id)
            .collect();

        let expired: Vec<u32> = self.sse.iter().filter(|(_, (_, s))| policy.should_reset(s, now)).map(|(id, _)| *id).collect();
        for stream_id in expired {
            // A reset is a DATA frame on the already-open stream, not a new
            // response: HEADERS were already sent once in `send_sse_headers`.
            let out = Frame::encode(FrameType::Data, 0, stream_id, b"event: reset\ndata: {}\n\n");
            self.send_plain(&out);
            if let Some((_, channel_state)) = self.sse.get_mut(&stream_id) {
                channel_state.reset();
            }
        }

        for stream_id in due_streams {
            let Some(channel) = self.sse.get(&stream_id).map(|(channel, _)| *channel) else { continue };
            let data = self.sample_channel(channel, state);
            let Some((_, channel_state)) = self.sse.get_mut(&stream_id) else { continue };
            channel_state.tick();
            channel_state.start = now;
            let mut frame_payload = b"data: ".to_vec();
            frame_payload.extend_from_slice(&data);
            frame_payload.extend_from_slice(b"\n\n");
            let out = Frame::encode(FrameType::Data, 0, stream_id, &frame_payload);
            self.send_plain(&out);
        }
    }

    /// Process-health samples for the `cpu`/`memory`/`events`/
    /// `redirect-service` channels, grounded on `cpu_stream.c++` (per-
    /// connection CPU-time delta) and `probe_redirect_service_.c++` (a
    /// liveness probe of the companion redirect listener).
    fn sample_channel(&mut self, channel: Channel, state: &SharedState) -> Vec<u8> {
        match channel {
            Channel::Cpu => serde_json::json!({ "cpu_percent": self.sample_cpu_percent() }).to_string().into_bytes(),
            Channel::Memory => serde_json::json!({ "rss_kb": resident_memory_kb() }).to_string().into_bytes(),
            Channel::Events => b"{\"ping\":true}".to_vec(),
            Channel::Redirect => {
                let alive = probe_redirect_service(&state.redirect_probe_host, state.redirect_probe_port);
                serde_json::json!({ "status": if alive { "ok" } else { "down" } }).to_string().into_bytes()
            }
        }
    }

    /// CPU percentage since the last sample, from the process CPU-time
    /// delta over the wall-clock delta. Reports `0.0` on the first sample
    /// since there is no prior reading to diff against.
    fn sample_cpu_percent(&mut self) -> f64 {
        let now = Instant::now();
        let cpu_now = process_cpu_time_ns();
        let percent = match self.cpu_sample {
            Some((last_wall, last_cpu)) => {
                let wall_secs = now.saturating_duration_since(last_wall).as_secs_f64();
                if wall_secs > 0.0 {
                    ((cpu_now - last_cpu) as f64 / 1e9 / wall_secs) * 100.0
                } else {
                    0.0
                }
            }
            None => 0.0,
        };
        self.cpu_sample = Some((now, cpu_now));
        percent.max(0.0)
    }
}

/// Nanoseconds of CPU time consumed by this process so far, via
/// `CLOCK_PROCESS_CPUTIME_ID`.
fn process_cpu_time_ns() -> i64 {
    let mut ts = libc::timespec { tv_sec: 0, tv_nsec: 0 };
    unsafe {
        libc::clock_gettime(libc::CLOCK_PROCESS_CPUTIME_ID, &mut ts);
    }
    ts.tv_sec as i64 * 1_000_000_000 + ts.tv_nsec as i64
}

fn resident_memory_kb() -> u64 {
    std::fs::read_to_string("/proc/self/status")
        .ok()
        .and_then(|s| {
            s.lines()
                .find(|line| line.starts_with("VmRSS:"))
                .and_then(|line| line.split_whitespace().nth(1).map(str::to_string))
        })
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}

/// Nonblocking TCP connect probe of the companion redirect service,
/// grounded on `probe_redirect_service_.c++`'s connect/select liveness
/// check. `0.0.0.0` isn't a valid outbound target, so it's normalized to
/// the loopback address like the original normalizes its bind host.
fn probe_redirect_service(host: &str, port: u16) -> bool {
    let target = if host == "0.0.0.0" { "127.0.0.1" } else { host };
    let Ok(mut addrs) = (target, port).to_socket_addrs() else { return false };
    let Some(addr) = addrs.next() else { return false };
    TcpStream::connect_timeout(&addr, std::time::Duration::from_millis(200)).is_ok()
}

/// Candidate request paths to try in order: empty/`/` maps to the site
/// index, a trailing slash maps to that directory's index, and a bare
/// path tries itself before falling back to a directory index.
fn resolve_candidates(path: &str) -> Vec<String> {
    if path.is_empty() || path == "/" {
        return vec![routes::INDEX_PAGE.to_string()];
    }
    if let Some(stripped) = path.strip_suffix('/') {
        return vec![format!("{stripped}/index.html")];
    }
    vec![path.to_string(), format!("{path}/index.html")]
}

/// Strips the trailing empty END_STREAM DATA frame that
/// `build_response_frames_with_headers` appends for a zero-length body,
/// leaving only the HEADERS frame so the stream stays open for SSE.
fn headers_only(mut framed: Vec<u8>) -> Vec<u8> {
    if framed.len() < http2::FRAME_HEADER_LEN {
        return framed;
    }
    if let Ok((FrameType::Headers, _, _, len)) = Frame::parse_header(&framed) {
        let headers_total = http2::FRAME_HEADER_LEN + len;
        framed.truncate(headers_total);
    }
    framed
}
