use crate::{Error, Result};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

#[derive(Clone)]
pub struct StaticEntry {
    pub content_type: &'static str,
    pub body: Arc<[u8]>,
}

/// Whole-tree in-memory preload of a document root, keyed by
/// request-path (`/` plus the path relative to the root), grounded on
/// `spin/http2_listener/helper/load_static.c++`.
pub struct StaticCache {
    entries: RwLock<HashMap<String, StaticEntry>>,
}

impl Default for StaticCache {
    fn default() -> Self {
        Self::new()
    }
}

impl StaticCache {
    pub fn new() -> Self {
        Self { entries: RwLock::new(HashMap::new()) }
    }

    pub fn get(&self, request_path: &str) -> Option<StaticEntry> {
        self.entries.read().unwrap().get(request_path).cloned()
    }

    /// Recursively loads every regular file under `root` into memory,
    /// replacing any previously loaded tree.
    pub fn load(&self, root: &Path) -> Result<usize> {
        let mut entries = HashMap::new();
        load_dir(root, root, &mut entries)?;
        let count = entries.len();
        *self.entries.write().unwrap() = entries;
        Ok(count)
    }
}

fn load_dir(root: &Path, dir: &Path, entries: &mut HashMap<String, StaticEntry>) -> Result<()> {
    for entry in std::fs::read_dir(dir).map_err(|e| Error::Io(dir.to_path_buf(), e))? {
        let entry = entry.map_err(|e| Error::Io(dir.to_path_buf(), e))?;
        let path = entry.path();
        if path.is_dir() {
            load_dir(root, &path, entries)?;
            continue;
        }
        if path.file_name().and_then(|n| n.to_str()) == Some(".neonjsx") {
            continue;
        }
        let relative = path.strip_prefix(root).unwrap_or(&path);
        let request_path = format!("/{}", relative.to_string_lossy().replace('\\', "/"));
        let body = std::fs::read(&path).map_err(|e| Error::Io(path.clone(), e))?;
        entries.insert(
            request_path,
            StaticEntry { content_type: http2::guess_content_type(&path), body: Arc::from(body.into_boxed_slice()) },
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_nested_files_under_request_path() {
        let dir = std::env::temp_dir().join(format!("vhost-cache-test-{}", std::process::id()));
        std::fs::create_dir_all(dir.join("sub")).unwrap();
        std::fs::write(dir.join("index.html"), b"<html></html>").unwrap();
        std::fs::write(dir.join("sub/app.js"), b"console.log(1)").unwrap();

        let cache = StaticCache::new();
        let count = cache.load(&dir).unwrap();
        assert_eq!(count, 2);
        assert!(cache.get("/index.html").is_some());
        assert_eq!(cache.get("/sub/app.js").unwrap().content_type, "application/javascript");
        assert!(cache.get("/missing").is_none());

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
