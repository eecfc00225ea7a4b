use crate::{Error, Result};
use std::collections::HashMap;

/// A decoded HEADERS block: pseudo-headers split out, everything else
/// lowercased into a map, repeated `cookie` headers joined with `"; "`.
#[derive(Debug, Clone, Default)]
pub struct Request {
    pub method: Option<String>,
    pub path: String,
    pub authority: Option<String>,
    pub scheme: Option<String>,
    pub headers: HashMap<String, String>,
}

pub struct HpackDecoder {
    inner: hpack::Decoder<'static>,
}

impl Default for HpackDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl HpackDecoder {
    pub fn new() -> Self {
        Self { inner: hpack::Decoder::new() }
    }

    /// Decodes one header block into pseudo-headers + a lowercase
    /// header map, rejecting blocks with no `:path`.
    pub fn decode(&mut self, block: &[u8]) -> Result<Request> {
        let pairs = self.inner.decode(block).map_err(|_| Error::HpackDecode)?;

        let mut request = Request::default();
        let mut cookies: Vec<String> = Vec::new();

        for (name, value) in pairs {
            let name = String::from_utf8_lossy(&name).to_ascii_lowercase();
            let value = String::from_utf8_lossy(&value).into_owned();

            match name.as_str() {
                ":method" => request.method = Some(value),
                ":path" => request.path = value,
                ":authority" => request.authority = Some(value),
                ":scheme" => request.scheme = Some(value),
                "cookie" => cookies.push(value),
                _ => {
                    request.headers.insert(name, value);
                }
            }
        }

        if !cookies.is_empty() {
            request.headers.insert("cookie".to_string(), cookies.join("; "));
        }

        if request.path.is_empty() {
            return Err(Error::MissingPath);
        }

        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(pairs: &[(&str, &str)]) -> Vec<u8> {
        let mut encoder = hpack::Encoder::new();
        encoder.encode(pairs.iter().map(|(k, v)| (k.as_bytes(), v.as_bytes())))
    }

    #[test]
    fn extracts_pseudo_headers_and_lowercases_names() {
        let block = encode(&[(":method", "GET"), (":path", "/index.html"), ("X-Custom", "1")]);
        let mut decoder = HpackDecoder::new();
        let req = decoder.decode(&block).unwrap();
        assert_eq!(req.method.as_deref(), Some("GET"));
        assert_eq!(req.path, "/index.html");
        assert_eq!(req.headers.get("x-custom").map(String::as_str), Some("1"));
    }

    #[test]
    fn joins_repeated_cookies() {
        let block = encode(&[(":path", "/"), ("cookie", "a=1"), ("cookie", "b=2")]);
        let mut decoder = HpackDecoder::new();
        let req = decoder.decode(&block).unwrap();
        assert_eq!(req.headers.get("cookie").map(String::as_str), Some("a=1; b=2"));
    }

    #[test]
    fn missing_path_is_rejected() {
        let block = encode(&[(":method", "GET")]);
        let mut decoder = HpackDecoder::new();
        assert!(decoder.decode(&block).is_err());
    }
}
