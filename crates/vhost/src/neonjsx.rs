use std::path::Path;

/// Parsed `.neonjsx` manifest: explicit SPA routes plus `prefix/*`
/// wildcard routes, grounded on `parse_neonjsx_config` in
/// `spin/vhost/resolve.c++`.
#[derive(Debug, Clone, Default)]
pub struct NeonJsxConfig {
    pub enabled: bool,
    pub routes: Vec<String>,
    pub wildcard_routes: Vec<String>,
}

impl NeonJsxConfig {
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn parse(path: &Path) -> std::io::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config = Self { enabled: true, routes: Vec::new(), wildcard_routes: Vec::new() };

        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some(prefix) = line.strip_suffix("/*") {
                config.wildcard_routes.push(prefix.to_string());
            } else {
                config.routes.push(line.to_string());
            }
        }

        Ok(config)
    }

    /// Exact match first, then `prefix/*` wildcard match. Always
    /// `false` when neonjsx is disabled for the host.
    pub fn matches_route(&self, path: &str) -> bool {
        if !self.enabled {
            return false;
        }
        if self.routes.iter().any(|r| r == path) {
            return true;
        }
        self.wildcard_routes.iter().any(|prefix| path.starts_with(prefix.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_config_never_matches() {
        let config = NeonJsxConfig::disabled();
        assert!(!config.matches_route("/anything"));
    }

    #[test]
    fn wildcard_route_matches_by_prefix() {
        let config = NeonJsxConfig { enabled: true, routes: vec![], wildcard_routes: vec!["/app".into()] };
        assert!(config.matches_route("/app/settings"));
        assert!(!config.matches_route("/other"));
    }

    #[test]
    fn exact_route_matches() {
        let config = NeonJsxConfig { enabled: true, routes: vec!["/login".into()], wildcard_routes: vec![] };
        assert!(config.matches_route("/login"));
        assert!(!config.matches_route("/login/extra"));
    }
}
