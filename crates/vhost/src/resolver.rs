use crate::neonjsx::NeonJsxConfig;
use crate::{Error, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

#[derive(Debug, Clone)]
pub struct VirtualHost {
    pub domain: String,
    pub document_root: PathBuf,
    pub neonjsx: NeonJsxConfig,
}

struct Vhosts {
    by_name: HashMap<String, VirtualHost>,
    has_default: bool,
}

/// Maps SNI/`:authority` hostnames to document roots under a public
/// directory, grounded on `VHostResolver` in `spin/vhost/resolve.c++`.
pub struct VHostResolver {
    public_root: PathBuf,
    vhosts: RwLock<Vhosts>,
}

pub fn normalize_authority(authority: &str) -> String {
    authority.split(':').next().unwrap_or(authority).to_ascii_lowercase()
}

/// `_default` is always valid; otherwise requires no leading/trailing
/// dot, only alnum/hyphen/dot characters, no consecutive dots, and at
/// least one dot (so single-label names like `localhost` are rejected).
fn is_domain_directory(name: &str) -> bool {
    if name == "_default" {
        return true;
    }
    if name.starts_with('.') || name.ends_with('.') || name.is_empty() {
        return false;
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.') {
        return false;
    }
    if name.contains("..") {
        return false;
    }
    name.contains('.')
}

impl VHostResolver {
    pub fn new(public_root: impl Into<PathBuf>) -> Self {
        Self {
            public_root: public_root.into(),
            vhosts: RwLock::new(Vhosts { by_name: HashMap::new(), has_default: false }),
        }
    }

    /// Rescans `public_root`, rebuilding the vhost table from scratch.
    pub fn refresh(&self) -> Result<()> {
        if !self.public_root.is_dir() {
            return Err(Error::RootNotFound(self.public_root.clone()));
        }

        let mut by_name = HashMap::new();
        let mut has_default = false;

        for entry in std::fs::read_dir(&self.public_root).map_err(|e| Error::Io(self.public_root.clone(), e))? {
            let entry = entry.map_err(|e| Error::Io(self.public_root.clone(), e))?;
            if !entry.path().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if !is_domain_directory(&name) {
                continue;
            }

            let neonjsx_path = entry.path().join(".neonjsx");
            let neonjsx = if neonjsx_path.is_file() {
                match NeonJsxConfig::parse(&neonjsx_path) {
                    Ok(config) => {
                        log::info!("vhost: {name} [neonjsx: {} routes]", config.routes.len() + config.wildcard_routes.len());
                        config
                    }
                    Err(err) => {
                        log::warn!("vhost: {name} failed to parse .neonjsx: {err}");
                        NeonJsxConfig::disabled()
                    }
                }
            } else {
                log::info!("vhost: {name} [neonjsx: disabled]");
                NeonJsxConfig::disabled()
            };

            let host = VirtualHost { domain: name.clone(), document_root: entry.path(), neonjsx };

            if name == "_default" {
                has_default = true;
                by_name.insert(name, host);
            } else {
                by_name.insert(normalize_authority(&name), host);
            }
        }

        *self.vhosts.write().unwrap() = Vhosts { by_name, has_default };
        Ok(())
    }

    /// Exact match, else `_default` fallback, else `None`. `None` also
    /// when no vhosts are configured at all.
    pub fn resolve(&self, authority: &str) -> Option<VirtualHost> {
        let vhosts = self.vhosts.read().unwrap();
        if vhosts.by_name.is_empty() {
            return None;
        }
        let normalized = normalize_authority(authority);
        vhosts
            .by_name
            .get(&normalized)
            .or_else(|| if vhosts.has_default { vhosts.by_name.get("_default") } else { None })
            .cloned()
    }

    /// True if any non-`_default` vhost exists (i.e. virtual hosting is
    /// actually in use, not just a bare default document root).
    pub fn enabled(&self) -> bool {
        self.vhosts.read().unwrap().by_name.keys().any(|k| k != "_default")
    }

    pub fn is_neonjsx_route(&self, authority: &str, path: &str) -> bool {
        self.resolve(authority).map(|host| host.neonjsx.matches_route(path)).unwrap_or(false)
    }

    pub fn list_vhosts(&self) -> Vec<String> {
        let vhosts = self.vhosts.read().unwrap();
        let mut names: Vec<_> = vhosts
            .by_name
            .iter()
            .map(|(name, host)| format!("{name} -> {}", host.document_root.display()))
            .collect();
        names.sort();
        names
    }

    pub fn public_root(&self) -> &Path {
        &self.public_root
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid_directory_name() {
        assert!(is_domain_directory("_default"));
    }

    #[test]
    fn single_label_name_is_rejected() {
        assert!(!is_domain_directory("localhost"));
    }

    #[test]
    fn leading_dot_is_rejected() {
        assert!(!is_domain_directory(".example.com"));
    }

    #[test]
    fn consecutive_dots_rejected() {
        assert!(!is_domain_directory("example..com"));
    }

    #[test]
    fn valid_two_label_domain_accepted() {
        assert!(is_domain_directory("example.com"));
    }

    #[test]
    fn authority_strips_port_and_lowercases() {
        assert_eq!(normalize_authority("Example.COM:9443"), "example.com");
    }
}
