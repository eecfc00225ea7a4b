//! Per-connection buffering and request handling, grounded on
//! `redirect_service/{process_buffer_,handle_io_}.c++`. Each accepted
//! socket is read edge-triggered until full headers arrive, a response
//! is queued, then the fd flips to edge-triggered write to flush it.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::path::Path;

const MAX_HEADER_BYTES: usize = 32 * 1024;

pub struct Connection {
    pub fd: i32,
    stream: TcpStream,
    buffer: Vec<u8>,
    write_buffer: Vec<u8>,
    responded: bool,
    pub closed: bool,
}

struct ParsedRequest {
    path: String,
    host: String,
    port: u16,
}

impl Connection {
    pub fn new(stream: TcpStream, fd: i32) -> Self {
        Self { fd, stream, buffer: Vec::new(), write_buffer: Vec::new(), responded: false, closed: false }
    }

    /// Reads everything currently available, then parses and queues a
    /// response once full headers have arrived.
    pub fn on_readable(&mut self, default_host: &str, target_port: u16, acme_webroot: Option<&Path>) {
        let mut buf = [0u8; 2048];
        loop {
            match self.stream.read(&mut buf) {
                Ok(0) => {
                    self.closed = true;
                    return;
                }
                Ok(n) => {
                    self.buffer.extend_from_slice(&buf[..n]);
                    if self.buffer.len() > MAX_HEADER_BYTES {
                        log::warn!("redirect: header buffer too large fd={}", self.fd);
                        self.closed = true;
                        return;
                    }
                }
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    log::warn!("redirect: recv error fd={}: {err}", self.fd);
                    self.closed = true;
                    return;
                }
            }
        }

        self.process_buffer(default_host, target_port, acme_webroot);
    }

    pub fn on_writable(&mut self) {
        while !self.write_buffer.is_empty() {
            match self.stream.write(&self.write_buffer) {
                Ok(0) => {
                    self.closed = true;
                    return;
                }
                Ok(n) => {
                    self.write_buffer.drain(..n);
                }
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => return,
                Err(err) => {
                    log::warn!("redirect: send error fd={}: {err}", self.fd);
                    self.closed = true;
                    return;
                }
            }
        }
        // Flushed the whole response; a redirect-only service has nothing
        // more to say, so close.
        self.closed = true;
    }

    fn process_buffer(&mut self, default_host: &str, target_port: u16, acme_webroot: Option<&Path>) {
        if self.responded {
            return;
        }
        if !contains(&self.buffer, b"\r\n\r\n") {
            return;
        }

        let request = parse_request(&self.buffer, default_host, target_port);

        if let Some(token) = request.path.strip_prefix("/.well-known/acme-challenge/") {
            match acme_webroot.and_then(|root| read_challenge(root, token)) {
                Some(body) => {
                    self.write_buffer = build_response(200, "text/plain", &body);
                    log::info!("redirect: served ACME challenge fd={} token={token}", self.fd);
                }
                None => {
                    self.write_buffer = build_404();
                    log::info!("redirect: ACME challenge not found fd={} path={}", self.fd, request.path);
                }
            }
        } else {
            self.write_buffer = build_redirect(&request.host, request.port, &request.path);
            log::info!("redirect: queued 308 fd={} host={} port={} path={}", self.fd, request.host, request.port, request.path);
        }

        self.responded = true;
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

fn parse_request(buffer: &[u8], default_host: &str, target_port: u16) -> ParsedRequest {
    let text = String::from_utf8_lossy(buffer);

    let mut path = "/".to_string();
    if let Some(request_line) = text.split("\r\n").next() {
        let mut parts = request_line.split(' ');
        let _method = parts.next();
        if let Some(candidate) = parts.next() {
            if candidate.starts_with('/') {
                path = candidate.to_string();
            }
        }
    }

    let mut host = default_host.to_string();
    for line in text.split("\r\n") {
        let Some(value) = line.strip_prefix("Host:").or_else(|| line.strip_prefix("host:")) else { continue };
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        // The Host header may carry the client-visible plaintext port;
        // only the hostname survives, the redirect target port always
        // comes from configuration.
        host = match value.rsplit_once(':') {
            Some((h, p)) if p.parse::<u16>().is_ok() => h.to_string(),
            _ => value.to_string(),
        };
        break;
    }

    ParsedRequest { path, host, port: target_port }
}

fn read_challenge(webroot: &Path, token: &str) -> Option<Vec<u8>> {
    if token.is_empty() || token.contains("..") || token.contains('/') {
        return None;
    }
    std::fs::read(webroot.join(token)).ok()
}

fn build_redirect(host: &str, port: u16, path: &str) -> Vec<u8> {
    let location = if port == 443 { format!("https://{host}{path}") } else { format!("https://{host}:{port}{path}") };
    let body = format!("Redirecting to {location}\n");
    let mut response = format!(
        "HTTP/1.1 308 Permanent Redirect\r\nLocation: {location}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    )
    .into_bytes();
    response.extend_from_slice(body.as_bytes());
    response
}

fn build_response(status: u16, content_type: &str, body: &[u8]) -> Vec<u8> {
    let reason = if status == 200 { "OK" } else { "Error" };
    let mut response =
        format!("HTTP/1.1 {status} {reason}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n", body.len())
            .into_bytes();
    response.extend_from_slice(body);
    response
}

fn build_404() -> Vec<u8> {
    b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_path_and_host_from_request_line() {
        let req = b"GET /foo/bar HTTP/1.1\r\nHost: example.test:8080\r\nUser-Agent: x\r\n\r\n";
        let parsed = parse_request(req, "fallback.test", 443);
        assert_eq!(parsed.path, "/foo/bar");
        assert_eq!(parsed.host, "example.test");
        assert_eq!(parsed.port, 443);
    }

    #[test]
    fn malformed_path_normalizes_to_root() {
        let req = b"GET nonsense HTTP/1.1\r\nHost: example.test\r\n\r\n";
        let parsed = parse_request(req, "fallback.test", 443);
        assert_eq!(parsed.path, "/");
    }

    #[test]
    fn missing_host_header_falls_back_to_default() {
        let req = b"GET / HTTP/1.1\r\n\r\n";
        let parsed = parse_request(req, "fallback.test", 443);
        assert_eq!(parsed.host, "fallback.test");
    }

    #[test]
    fn redirect_body_targets_https_with_configured_port() {
        let out = build_redirect("example.test", 8443, "/a");
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 308 Permanent Redirect\r\n"));
        assert!(text.contains("Location: https://example.test:8443/a\r\n"));
    }

    #[test]
    fn challenge_path_rejects_traversal() {
        let dir = std::env::temp_dir().join("neonsignal-redirect-test-webroot");
        std::fs::create_dir_all(&dir).unwrap();
        assert!(read_challenge(&dir, "../secret").is_none());
        assert!(read_challenge(&dir, "missing-token").is_none());
    }
}
