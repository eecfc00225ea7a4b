/// In-memory view of an enrolled credential, rebuilt from `storage::User`
/// rows by `WebAuthnManager::load_credentials`.
#[derive(Debug, Clone)]
pub struct WebAuthnCredential {
    pub user_id: u64,
    pub user_email: String,
    pub credential_id: Vec<u8>,
    pub public_key: Vec<u8>,
    pub sign_count: u32,
}

#[derive(Debug, Clone)]
pub struct LoginOptions {
    pub challenge: String,
    pub json: String,
}

#[derive(Debug, Clone)]
pub struct LoginResult {
    pub user_id: u64,
    pub user_email: String,
    pub session_id: String,
}

#[derive(Debug, Clone)]
pub struct RegisterOptions {
    pub challenge: String,
    pub json: String,
}
