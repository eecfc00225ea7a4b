#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("storage error: {0}")]
    Storage(#[from] storage::Error),
    #[error("user not found")]
    UserNotFound,
    #[error("user not verified")]
    UserNotVerified,
    #[error("credential already registered")]
    CredentialAlreadyRegistered,
    #[error("{0}")]
    Rejected(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;
