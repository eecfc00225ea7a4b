use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("certs directory not found: {0}")]
    RootNotFound(PathBuf),
    #[error("io error reading {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),
    #[error("failed to parse PEM data in {0}: {1}")]
    Parse(PathBuf, #[source] std::io::Error),
    #[error("no certificates found in {0}")]
    NoCertificates(PathBuf),
    #[error("no private key found in {0}")]
    NoPrivateKey(PathBuf),
    #[error("unsupported private key type in {0}")]
    UnsupportedKey(PathBuf),
}
