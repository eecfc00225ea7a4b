use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("public root not found: {0}")]
    RootNotFound(PathBuf),
    #[error("io error reading {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),
}
