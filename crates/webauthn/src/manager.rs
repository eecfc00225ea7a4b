use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use ecdsa::signature::Verifier;
use p256::ecdsa::{Signature, VerifyingKey};
use p256::EncodedPoint;
use rand::RngCore;
use sha2::{Digest, Sha256};

use storage::{Challenge, Database, Session, SessionKind};

use crate::base64url;
use crate::cbor;
use crate::cose;
use crate::error::{Error, Result};
use crate::models::{LoginOptions, LoginResult, RegisterOptions, WebAuthnCredential};

const CHALLENGE_TTL_SECS: i64 = 5 * 60;
const PRE_WEBAUTHN_TTL_SECS: i64 = 5 * 60;
const AUTH_SESSION_TTL_SECS: i64 = 5 * 24 * 3600;
const AUTH_SESSION_EXTENSION_SECS: i64 = 8 * 3600;

/// TTL a session cookie should carry for the given kind, in seconds.
/// Exposed so callers building `Set-Cookie` headers don't duplicate the
/// table above.
pub fn session_ttl_secs(kind: SessionKind) -> i64 {
    match kind {
        SessionKind::PreWebauthn => PRE_WEBAUTHN_TTL_SECS,
        SessionKind::Auth => AUTH_SESSION_TTL_SECS,
    }
}

fn now_secs() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).expect("system clock before epoch").as_secs() as i64
}

fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

fn random_bytes(len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut buf);
    buf
}

fn extract_str<'a>(body: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    body.get(key)?.as_str()
}

/// Drives the passwordless WebAuthn/FIDO2 registration and login
/// ceremonies: challenge issuance, attestation/assertion verification,
/// and session lifecycle. One instance is shared (behind an `Arc`) across
/// the server's connection handlers.
pub struct WebAuthnManager {
    rp_id: String,
    origin: String,
    db: Arc<Database>,
    protected_paths: Vec<String>,
    credentials: RwLock<Vec<WebAuthnCredential>>,
}

impl WebAuthnManager {
    pub fn new(rp_id: impl Into<String>, origin: impl Into<String>, db: Arc<Database>, protected_paths: Vec<String>) -> Self {
        Self {
            rp_id: rp_id.into(),
            origin: origin.into(),
            db,
            protected_paths,
            credentials: RwLock::new(Vec::new()),
        }
    }

    pub fn load_credentials(&self) -> Result<()> {
        let users = self.db.list_users()?;
        let mut loaded = Vec::new();
        for user in users {
            let (Some(credential_id), Some(public_key)) = (user.credential_id.clone(), user.public_key.clone()) else {
                continue;
            };
            loaded.push(WebAuthnCredential {
                user_id: user.id,
                user_email: user.email,
                credential_id,
                public_key,
                sign_count: user.sign_count,
            });
        }
        log::info!("webauthn: loaded {} credential(s)", loaded.len());
        *self.credentials.write().unwrap() = loaded;
        Ok(())
    }

    fn find_credential(&self, credential_id: &[u8]) -> Option<WebAuthnCredential> {
        self.credentials.read().unwrap().iter().find(|c| c.credential_id == credential_id).cloned()
    }

    pub fn make_login_options(&self) -> Result<LoginOptions> {
        let challenge = random_bytes(32);
        let challenge_b64 = base64url::encode(&challenge);
        self.db.put_challenge(&Challenge { challenge, user_id: None, expires_at: now_secs() + CHALLENGE_TTL_SECS })?;

        let allow: Vec<_> = self
            .credentials
            .read()
            .unwrap()
            .iter()
            .map(|c| serde_json::json!({"type": "public-key", "id": base64url::encode(&c.credential_id)}))
            .collect();
        let json = serde_json::json!({
            "challenge": challenge_b64,
            "rpId": self.rp_id,
            "allowCredentials": allow,
            "timeout": 60000,
        })
        .to_string();
        Ok(LoginOptions { challenge: challenge_b64, json })
    }

    /// Issues a session of the given kind for an already-authenticated
    /// user (used by the account verify/enroll ceremonies that sit in
    /// front of `finish_login`).
    pub fn issue_session_for(&self, user_id: u64, kind: SessionKind) -> Result<String> {
        self.issue_session(user_id, kind)
    }

    fn issue_session(&self, user_id: u64, kind: SessionKind) -> Result<String> {
        let session_id = base64url::encode(&random_bytes(32));
        let ttl = match kind {
            SessionKind::PreWebauthn => PRE_WEBAUTHN_TTL_SECS,
            SessionKind::Auth => AUTH_SESSION_TTL_SECS,
        };
        self.db.put_session(&Session { session_id: session_id.clone(), user_id, kind, expires_at: now_secs() + ttl })?;
        Ok(session_id)
    }

    /// Returns the session's `user_id` if it exists and hasn't expired,
    /// extending its expiry by another 8 hours on every successful check.
    pub fn validate_session(&self, session_id: &str) -> Result<Option<u64>> {
        let Some(mut session) = self.db.get_session(session_id)? else { return Ok(None) };
        if session.expires_at < now_secs() {
            self.db.delete_session(session_id)?;
            return Ok(None);
        }
        session.expires_at = now_secs() + AUTH_SESSION_EXTENSION_SECS;
        self.db.put_session(&session)?;
        Ok(Some(session.user_id))
    }

    /// Looks up and consumes a pending challenge by its base64url wire
    /// representation. `storage` keys challenges by the decoded raw
    /// bytes, so this decode is the whole lookup: no separate canonical-
    /// vs-literal fallback is needed once the key is the raw bytes.
    fn take_matching_challenge(&self, challenge_str: &str) -> Result<Option<Challenge>> {
        let raw = base64url::decode(challenge_str);
        if raw.is_empty() {
            return Ok(None);
        }
        self.db.take_challenge(&raw)
    }

    pub fn finish_login(&self, body: &str) -> Result<LoginResult> {
        let body: serde_json::Value = serde_json::from_str(body).map_err(|_| Error::Rejected("invalid body"))?;
        let credential_id_b64 = extract_str(&body, "credentialId").ok_or(Error::Rejected("missing fields"))?;
        let client_data_b64 = extract_str(&body, "clientDataJSON").ok_or(Error::Rejected("missing fields"))?;
        let auth_data_b64 = extract_str(&body, "authenticatorData").ok_or(Error::Rejected("missing fields"))?;
        let signature_b64 = extract_str(&body, "signature").ok_or(Error::Rejected("missing fields"))?;

        let client_data = base64url::decode(client_data_b64);
        let auth_data = base64url::decode(auth_data_b64);
        let signature = base64url::decode(signature_b64);
        let credential_id = base64url::decode(credential_id_b64);

        if auth_data.len() < 32 {
            return Err(Error::Rejected("authenticator data too small"));
        }

        let mut cred = self.find_credential(&credential_id).ok_or(Error::Rejected("credential not found"))?;

        let rp_hash = sha256(self.rp_id.as_bytes());
        if auth_data[..32] != rp_hash {
            return Err(Error::Rejected("rpIdHash mismatch"));
        }

        let flags = auth_data[32];
        if flags & 0x01 == 0 {
            return Err(Error::Rejected("user not present"));
        }

        let mut sign_count = cred.sign_count;
        if auth_data.len() >= 37 {
            sign_count = u32::from_be_bytes([auth_data[33], auth_data[34], auth_data[35], auth_data[36]]);
            if sign_count < cred.sign_count {
                return Err(Error::Rejected("sign count regression"));
            }
        }

        let client_data_json = std::str::from_utf8(&client_data).map_err(|_| Error::Rejected("invalid clientData"))?;
        let client_data_value: serde_json::Value =
            serde_json::from_str(client_data_json).map_err(|_| Error::Rejected("invalid clientData"))?;
        let challenge_str = extract_str(&client_data_value, "challenge").ok_or(Error::Rejected("missing challenge"))?;

        let challenge = self.take_matching_challenge(challenge_str)?.ok_or(Error::Rejected("unknown challenge"))?;
        if challenge.expires_at < now_secs() {
            return Err(Error::Rejected("challenge expired"));
        }

        let origin = extract_str(&client_data_value, "origin").ok_or(Error::Rejected("missing origin"))?;
        if origin != self.origin {
            return Err(Error::Rejected("origin mismatch"));
        }

        let client_hash = sha256(client_data_json.as_bytes());
        let mut signed_data = Vec::with_capacity(auth_data.len() + client_hash.len());
        signed_data.extend_from_slice(&auth_data);
        signed_data.extend_from_slice(&client_hash);

        let point = EncodedPoint::from_bytes(&cred.public_key).map_err(|_| Error::Rejected("bad public key"))?;
        let verifying_key = VerifyingKey::from_encoded_point(&point).map_err(|_| Error::Rejected("bad public key"))?;
        let sig = Signature::from_der(&signature).map_err(|_| Error::Rejected("bad signature encoding"))?;
        verifying_key.verify(&signed_data, &sig).map_err(|_| Error::Rejected("signature verify failed"))?;

        cred.sign_count = sign_count;
        self.db.update_sign_count(&credential_id, sign_count)?;
        if let Some(entry) = self.credentials.write().unwrap().iter_mut().find(|c| c.credential_id == credential_id) {
            entry.sign_count = sign_count;
        }

        let session_id = self.issue_session(cred.user_id, SessionKind::Auth)?;
        Ok(LoginResult { user_id: cred.user_id, user_email: cred.user_email, session_id })
    }

    pub fn make_register_options_for_user(&self, user_id: u64) -> Result<RegisterOptions> {
        let user = self.db.get_user(user_id)?.ok_or(Error::UserNotFound)?;
        if !user.verified {
            return Err(Error::UserNotVerified);
        }
        if user.credential_id.is_some() {
            return Err(Error::CredentialAlreadyRegistered);
        }

        let challenge = random_bytes(32);
        let challenge_b64 = base64url::encode(&challenge);
        self.db.put_challenge(&Challenge { challenge, user_id: Some(user_id), expires_at: now_secs() + CHALLENGE_TTL_SECS })?;

        let user_handle = base64url::encode(&user_id.to_be_bytes());
        let json = serde_json::json!({
            "challenge": challenge_b64,
            "rp": {"name": "neonsignal", "id": self.rp_id},
            "user": {"name": user.email, "displayName": user.display_name, "id": user_handle},
            "pubKeyCredParams": [{"type": "public-key", "alg": -7}],
            "authenticatorSelection": {"userVerification": "preferred"},
            "timeout": 60000,
        })
        .to_string();
        Ok(RegisterOptions { challenge: challenge_b64, json })
    }

    pub fn finish_register_for_user(&self, user_id: u64, body: &str) -> Result<()> {
        let user = self.db.get_user(user_id)?.ok_or(Error::UserNotFound)?;
        if !user.verified {
            return Err(Error::UserNotVerified);
        }
        if user.credential_id.is_some() {
            return Err(Error::CredentialAlreadyRegistered);
        }

        let body: serde_json::Value = serde_json::from_str(body).map_err(|_| Error::Rejected("invalid body"))?;
        let client_data_b64 = extract_str(&body, "clientDataJSON").ok_or(Error::Rejected("missing fields"))?;
        let att_b64 = extract_str(&body, "attestationObject").ok_or(Error::Rejected("missing fields"))?;
        let cred_id_b64 = extract_str(&body, "credentialId").ok_or(Error::Rejected("missing fields"))?;

        let client_data = base64url::decode(client_data_b64);
        let att_obj = base64url::decode(att_b64);
        let cred_id = base64url::decode(cred_id_b64);

        let client_data_json = std::str::from_utf8(&client_data).map_err(|_| Error::Rejected("invalid clientData"))?;
        let client_data_value: serde_json::Value =
            serde_json::from_str(client_data_json).map_err(|_| Error::Rejected("invalid clientData"))?;
        let challenge_str = extract_str(&client_data_value, "challenge").ok_or(Error::Rejected("invalid clientData"))?;
        let origin = extract_str(&client_data_value, "origin").ok_or(Error::Rejected("invalid clientData"))?;

        let challenge = self.take_matching_challenge(challenge_str)?.ok_or(Error::Rejected("unknown challenge"))?;
        if challenge.expires_at < now_secs() {
            return Err(Error::Rejected("challenge expired"));
        }
        if challenge.user_id != Some(user_id) {
            return Err(Error::Rejected("challenge does not belong to this user"));
        }
        if origin != self.origin {
            return Err(Error::Rejected("origin mismatch"));
        }

        let auth_data = cbor::find_bytes_field(&att_obj, "authData").ok_or(Error::Rejected("missing authData"))?;

        let rp_hash = sha256(self.rp_id.as_bytes());
        if auth_data.len() < 37 || auth_data[..32] != rp_hash {
            return Err(Error::Rejected("rpIdHash mismatch"));
        }
        let flags = auth_data[32];
        if flags & 0x01 == 0 || flags & 0x40 == 0 {
            return Err(Error::Rejected("user presence/attested flag missing"));
        }

        let cpk_cbor = cbor::credential_public_key_from_authdata(&auth_data).ok_or(Error::Rejected("missing credential public key"))?;
        let cose_key = cbor::decode_cose_key(cpk_cbor).ok_or(Error::Rejected("invalid cose key"))?;
        let point = cose::cose_to_point(&cose_key).ok_or(Error::Rejected("cannot build public key"))?;

        if !self.db.set_user_credential(user_id, &cred_id, &point)? {
            return Err(Error::Rejected("failed to persist credential"));
        }

        self.credentials.write().unwrap().push(WebAuthnCredential {
            user_id,
            user_email: user.email,
            credential_id: cred_id,
            public_key: point.to_vec(),
            sign_count: 0,
        });
        Ok(())
    }

    pub fn user_exists(&self, email: &str) -> Result<bool> {
        Ok(self.db.get_user_by_email(email)?.is_some())
    }

    pub fn is_protected_path(&self, path: &str) -> bool {
        self.protected_paths.iter().any(|p| p == path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ecdsa::signature::Signer;
    use p256::ecdsa::{Signature as SigningSignature, SigningKey};
    use storage::User;

    fn temp_db() -> (Arc<Database>, std::path::PathBuf) {
        let path = std::env::temp_dir().join(format!(
            "neonsignal-webauthn-test-{}-{}",
            std::process::id(),
            SystemTime::now().duration_since(UNIX_EPOCH).unwrap().subsec_nanos()
        ));
        (Arc::new(Database::open(&path).unwrap()), path)
    }

    fn encode_len(major: u8, len: usize) -> Vec<u8> {
        if len < 24 {
            vec![major | len as u8]
        } else if len < 256 {
            vec![major | 24, len as u8]
        } else {
            let b = (len as u16).to_be_bytes();
            vec![major | 25, b[0], b[1]]
        }
    }

    fn cbor_bytes(data: &[u8]) -> Vec<u8> {
        let mut out = encode_len(0x40, data.len());
        out.extend_from_slice(data);
        out
    }

    fn cbor_text(s: &str) -> Vec<u8> {
        let mut out = encode_len(0x60, s.len());
        out.extend_from_slice(s.as_bytes());
        out
    }

    fn cbor_int(v: i64) -> Vec<u8> {
        if v >= 0 {
            encode_len(0x00, v as usize)
        } else {
            encode_len(0x20, (-1 - v) as usize)
        }
    }

    fn cose_key_bytes(x: &[u8], y: &[u8]) -> Vec<u8> {
        let mut out = vec![0xA5];
        out.extend(cbor_int(1));
        out.extend(cbor_int(2)); // kty: EC2
        out.extend(cbor_int(3));
        out.extend(cbor_int(-7)); // alg: ES256
        out.extend(cbor_int(-1));
        out.extend(cbor_int(1)); // crv: P-256
        out.extend(cbor_int(-2));
        out.extend(cbor_bytes(x));
        out.extend(cbor_int(-3));
        out.extend(cbor_bytes(y));
        out
    }

    fn attestation_object(auth_data: &[u8]) -> Vec<u8> {
        let mut out = vec![0xA1];
        out.extend(cbor_text("authData"));
        out.extend(cbor_bytes(auth_data));
        out
    }

    #[test]
    fn full_register_then_login_roundtrip() {
        let (db, path) = temp_db();
        let user = User {
            id: db.next_id("users").unwrap(),
            email: "person@example.com".into(),
            display_name: "Person".into(),
            verified: true,
            credential_id: None,
            public_key: None,
            sign_count: 0,
            created_at: 0,
            last_login: None,
        };
        db.put_user(&user).unwrap();

        let manager = WebAuthnManager::new("example.com", "https://example.com", db.clone(), vec!["/account".into()]);
        assert!(manager.is_protected_path("/account"));
        assert!(!manager.is_protected_path("/"));

        let signing_key = SigningKey::random(&mut rand_core::OsRng);
        let point = signing_key.verifying_key().to_encoded_point(false);
        let x = point.x().unwrap().to_vec();
        let y = point.y().unwrap().to_vec();
        let cred_id = vec![0xAA, 0xBB, 0xCC, 0xDD];

        // --- registration ---
        let register_options = manager.make_register_options_for_user(user.id).unwrap();

        let client_data = serde_json::json!({
            "type": "webauthn.create",
            "challenge": register_options.challenge,
            "origin": "https://example.com",
        })
        .to_string();

        let rp_hash = sha256(b"example.com");
        let mut auth_data = Vec::new();
        auth_data.extend_from_slice(&rp_hash);
        auth_data.push(0x41); // user present + attested credential data
        auth_data.extend_from_slice(&[0, 0, 0, 0]);
        auth_data.extend_from_slice(&[0u8; 16]); // aaguid
        auth_data.extend_from_slice(&(cred_id.len() as u16).to_be_bytes());
        auth_data.extend_from_slice(&cred_id);
        auth_data.extend_from_slice(&cose_key_bytes(&x, &y));

        let body = serde_json::json!({
            "clientDataJSON": base64url::encode(client_data.as_bytes()),
            "attestationObject": base64url::encode(&attestation_object(&auth_data)),
            "credentialId": base64url::encode(&cred_id),
        })
        .to_string();

        manager.finish_register_for_user(user.id, &body).unwrap();
        assert!(db.get_user(user.id).unwrap().unwrap().credential_id.is_some());

        // load_credentials picks up what set_user_credential just persisted too
        manager.load_credentials().unwrap();

        // --- login ---
        let login_options = manager.make_login_options().unwrap();
        let client_data2 = serde_json::json!({
            "type": "webauthn.get",
            "challenge": login_options.challenge,
            "origin": "https://example.com",
        })
        .to_string();

        let mut auth_data2 = Vec::new();
        auth_data2.extend_from_slice(&rp_hash);
        auth_data2.push(0x01);
        auth_data2.extend_from_slice(&[0, 0, 0, 1]);

        let mut signed_data = Vec::new();
        signed_data.extend_from_slice(&auth_data2);
        signed_data.extend_from_slice(&sha256(client_data2.as_bytes()));
        let signature: SigningSignature = signing_key.sign(&signed_data);

        let body2 = serde_json::json!({
            "credentialId": base64url::encode(&cred_id),
            "clientDataJSON": base64url::encode(client_data2.as_bytes()),
            "authenticatorData": base64url::encode(&auth_data2),
            "signature": base64url::encode(signature.to_der().as_bytes()),
        })
        .to_string();

        let result = manager.finish_login(&body2).unwrap();
        assert_eq!(result.user_id, user.id);
        assert_eq!(result.user_email, "person@example.com");

        let validated = manager.validate_session(&result.session_id).unwrap();
        assert_eq!(validated, Some(user.id));

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn validate_session_rejects_unknown_id() {
        let (db, path) = temp_db();
        let manager = WebAuthnManager::new("example.com", "https://example.com", db, vec![]);
        assert_eq!(manager.validate_session("nope").unwrap(), None);
        std::fs::remove_file(&path).ok();
    }
}
