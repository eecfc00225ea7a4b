//! SNI-based multi-certificate TLS resolution.
//!
//! Grounded on `neonsignal/cert_manager/{initialize,get_context}.c++`:
//! a directory per served hostname, each holding `fullchain.pem` +
//! `privkey.pem`, with `_default` as the fallback and `*.domain`
//! directories serving as wildcard certs. The original builds one
//! `SSL_CTX` per hostname; this port uses the idiomatic rustls
//! approach instead — a single `rustls::ServerConfig` backed by a
//! [`rustls::server::ResolvesServerCert`] implementation that performs
//! the same exact/wildcard/SAN/default lookup order.

#![warn(clippy::all)]

mod error;

pub use error::Error;
pub type Result<T> = std::result::Result<T, Error>;

use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::SystemTime;

/// Static metadata about one loaded certificate, kept for
/// `list_certificates`/`expiring_soon` diagnostics.
pub struct CertificateBundle {
    pub domain: String,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    pub common_name: Option<String>,
    pub san_names: Vec<String>,
    pub not_before: Option<SystemTime>,
    pub not_after: Option<SystemTime>,
    pub is_wildcard: bool,
    key: Arc<CertifiedKey>,
}

struct Certs {
    exact: HashMap<String, Arc<CertificateBundle>>,
    wildcard: Vec<Arc<CertificateBundle>>,
    default_cert: Option<Arc<CertificateBundle>>,
}

impl Certs {
    fn empty() -> Self {
        Self { exact: HashMap::new(), wildcard: Vec::new(), default_cert: None }
    }
}

pub struct CertManager {
    certs_root: PathBuf,
    certs: RwLock<Certs>,
}

fn normalize_hostname(hostname: &str) -> String {
    hostname.split(':').next().unwrap_or(hostname).to_ascii_lowercase()
}

fn is_cert_directory(path: &Path) -> bool {
    path.join("fullchain.pem").is_file() && path.join("privkey.pem").is_file()
}

fn load_certified_key(cert_path: &Path, key_path: &Path) -> Result<Arc<CertifiedKey>> {
    let cert_bytes = std::fs::read(cert_path).map_err(|e| Error::Io(cert_path.to_path_buf(), e))?;
    let key_bytes = std::fs::read(key_path).map_err(|e| Error::Io(key_path.to_path_buf(), e))?;

    let chain: Vec<rustls::Certificate> = rustls_pemfile::certs(&mut cert_bytes.as_slice())
        .map_err(|e| Error::Parse(cert_path.to_path_buf(), e))?
        .into_iter()
        .map(rustls::Certificate)
        .collect();
    if chain.is_empty() {
        return Err(Error::NoCertificates(cert_path.to_path_buf()));
    }

    let key = rustls_pemfile::pkcs8_private_keys(&mut key_bytes.as_slice())
        .map_err(|e| Error::Parse(key_path.to_path_buf(), e))?
        .into_iter()
        .next()
        .ok_or_else(|| Error::NoPrivateKey(key_path.to_path_buf()))?;
    let signing_key = rustls::sign::any_supported_type(&rustls::PrivateKey(key))
        .map_err(|_| Error::UnsupportedKey(key_path.to_path_buf()))?;

    Ok(Arc::new(CertifiedKey::new(chain, signing_key)))
}

fn extract_cert_info(bundle: &mut CertificateBundle) {
    let Some(der) = bundle.key.cert.first() else { return };
    let Ok((_, cert)) = x509_parser::parse_x509_certificate(&der.0) else { return };

    bundle.common_name = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(String::from);
    bundle.not_before = Some(SystemTime::from(cert.validity().not_before.to_datetime()));
    bundle.not_after = Some(SystemTime::from(cert.validity().not_after.to_datetime()));

    if let Ok(Some(san)) = cert.subject_alternative_name() {
        for name in san.value.general_names.iter() {
            if let x509_parser::extensions::GeneralName::DNSName(dns) = name {
                bundle.san_names.push((*dns).to_string());
            }
        }
    }
}

impl CertManager {
    pub fn new(certs_root: impl Into<PathBuf>) -> Self {
        Self { certs_root: certs_root.into(), certs: RwLock::new(Certs::empty()) }
    }

    /// Rescans `certs_root`, replacing the in-memory cert tables.
    /// Returns `true` if a default certificate is available afterward.
    pub fn initialize(&self) -> Result<bool> {
        if !self.certs_root.is_dir() {
            return Err(Error::RootNotFound(self.certs_root.clone()));
        }
        log::info!("scanning certs directory: {}", self.certs_root.display());

        let mut exact = HashMap::new();
        let mut wildcard = Vec::new();
        let mut default_cert = None;

        for entry in std::fs::read_dir(&self.certs_root).map_err(|e| Error::Io(self.certs_root.clone(), e))? {
            let entry = entry.map_err(|e| Error::Io(self.certs_root.clone(), e))?;
            let path = entry.path();
            if !path.is_dir() || !is_cert_directory(&path) {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();

            let key = match load_certified_key(&path.join("fullchain.pem"), &path.join("privkey.pem")) {
                Ok(key) => key,
                Err(err) => {
                    log::warn!("failed to load cert for {name}: {err}");
                    continue;
                }
            };

            let mut bundle = CertificateBundle {
                domain: name.clone(),
                cert_path: path.join("fullchain.pem"),
                key_path: path.join("privkey.pem"),
                common_name: None,
                san_names: Vec::new(),
                not_before: None,
                not_after: None,
                is_wildcard: false,
                key,
            };
            extract_cert_info(&mut bundle);
            let bundle = Arc::new(bundle);

            if name == "_default" {
                default_cert = Some(bundle.clone());
                exact.insert(name, bundle);
            } else if let Some(suffix) = name.strip_prefix("*.") {
                let mut wc = (*bundle).clone_meta();
                wc.domain = suffix.to_string();
                wc.is_wildcard = true;
                wildcard.push(Arc::new(wc));
            } else {
                exact.insert(normalize_hostname(&name), bundle);
            }
        }

        if default_cert.is_none() {
            if let Some((name, bundle)) = exact.iter().find(|(name, _)| name.as_str() != "_default") {
                log::warn!("no _default certificate found, using {name} as fallback");
                default_cert = Some(bundle.clone());
            } else {
                log::warn!("no _default certificate found and no fallback available");
            }
        }

        let found_default = default_cert.is_some();
        *self.certs.write().unwrap() = Certs { exact, wildcard, default_cert };
        Ok(found_default)
    }

    pub fn reload(&self) -> Result<bool> {
        self.initialize()
    }

    fn resolve(&self, hostname: &str) -> Option<Arc<CertifiedKey>> {
        let normalized = normalize_hostname(hostname);
        let certs = self.certs.read().unwrap();

        if let Some(bundle) = certs.exact.get(&normalized) {
            return Some(bundle.key.clone());
        }
        for wc in &certs.wildcard {
            if is_wildcard_match(&normalized, &wc.domain) {
                return Some(wc.key.clone());
            }
        }
        for bundle in certs.exact.values() {
            for san in &bundle.san_names {
                if san == &normalized {
                    return Some(bundle.key.clone());
                }
                if let Some(san_domain) = san.strip_prefix("*.") {
                    if is_wildcard_match(&normalized, san_domain) {
                        return Some(bundle.key.clone());
                    }
                }
            }
        }
        certs.default_cert.as_ref().map(|b| b.key.clone())
    }

    pub fn default_context(&self) -> Option<Arc<CertifiedKey>> {
        self.certs.read().unwrap().default_cert.as_ref().map(|b| b.key.clone())
    }

    pub fn list_certificates(&self) -> Vec<String> {
        let certs = self.certs.read().unwrap();
        let mut out = Vec::new();
        for (name, bundle) in &certs.exact {
            let mut entry = format!("{name} -> {}", bundle.cert_path.display());
            if let Some(cn) = &bundle.common_name {
                entry.push_str(&format!(" (CN={cn})"));
            }
            if certs.default_cert.as_ref().map(Arc::as_ptr) == Some(Arc::as_ptr(bundle)) {
                entry.push_str(" [default]");
            }
            out.push(entry);
        }
        for bundle in &certs.wildcard {
            out.push(format!("*.{} -> {}", bundle.domain, bundle.cert_path.display()));
        }
        out
    }

    /// Returns `"{domain} expires in {days} days"` for every cert whose
    /// `not_after` falls within `days` of now.
    pub fn expiring_soon(&self, days: u64) -> Vec<String> {
        let threshold = SystemTime::now() + std::time::Duration::from_secs(days * 86_400);
        let certs = self.certs.read().unwrap();
        let mut out = Vec::new();
        let mut check = |bundle: &CertificateBundle| {
            if let Some(not_after) = bundle.not_after {
                if not_after < threshold {
                    let days_left = not_after
                        .duration_since(SystemTime::now())
                        .unwrap_or_default()
                        .as_secs()
                        / 86_400;
                    out.push(format!("{} expires in {days_left} days", bundle.domain));
                }
            }
        };
        for bundle in certs.exact.values() {
            check(bundle);
        }
        for bundle in &certs.wildcard {
            check(bundle);
        }
        out
    }

    /// Builds a single `rustls::ServerConfig` with ALPN restricted to
    /// `h2` and SNI dispatch delegated to this manager.
    pub fn server_config(self: &Arc<Self>) -> rustls::ServerConfig {
        let mut config = rustls::ServerConfig::builder()
            .with_safe_defaults()
            .with_no_client_auth()
            .with_cert_resolver(self.clone());
        config.alpn_protocols = vec![b"h2".to_vec()];
        config
    }
}

impl CertificateBundle {
    fn clone_meta(&self) -> Self {
        Self {
            domain: self.domain.clone(),
            cert_path: self.cert_path.clone(),
            key_path: self.key_path.clone(),
            common_name: self.common_name.clone(),
            san_names: self.san_names.clone(),
            not_before: self.not_before,
            not_after: self.not_after,
            is_wildcard: self.is_wildcard,
            key: self.key.clone(),
        }
    }
}

fn is_wildcard_match(normalized: &str, domain: &str) -> bool {
    if normalized.len() <= domain.len() + 1 {
        return false;
    }
    let suffix_start = normalized.len() - domain.len();
    normalized.as_bytes()[suffix_start - 1] == b'.' && &normalized[suffix_start..] == domain
}

impl ResolvesServerCert for CertManager {
    fn resolve(&self, client_hello: ClientHello) -> Option<Arc<CertifiedKey>> {
        let hostname = client_hello.server_name()?;
        CertManager::resolve(self, hostname)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_port_and_case() {
        assert_eq!(normalize_hostname("Example.COM:9443"), "example.com");
    }

    #[test]
    fn wildcard_match_requires_dot_boundary() {
        assert!(is_wildcard_match("sub.example.com", "example.com"));
        assert!(!is_wildcard_match("evilexample.com", "example.com"));
        assert!(!is_wildcard_match("example.com", "example.com"));
    }

    #[test]
    fn missing_root_errors() {
        let manager = CertManager::new("/nonexistent/path/for/tests");
        assert!(manager.initialize().is_err());
    }
}
