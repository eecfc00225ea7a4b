use crate::models::{ArtifactStore, Challenge, CodexRecord, Session, SessionKind, VerificationToken};
use crate::{Error, Result, User};
use redb::{ReadableTable, TableDefinition};
use std::path::Path;

const USERS: TableDefinition<u64, &str> = TableDefinition::new("users");
const EMAIL_INDEX: TableDefinition<&str, u64> = TableDefinition::new("email_index");
const CREDENTIAL_INDEX: TableDefinition<&str, u64> = TableDefinition::new("credential_index");
const SESSIONS: TableDefinition<&str, &str> = TableDefinition::new("sessions");
const VERIFICATION_TOKENS: TableDefinition<&str, &str> = TableDefinition::new("verification_tokens");
const CHALLENGES: TableDefinition<&str, &str> = TableDefinition::new("challenges");
const COUNTERS: TableDefinition<&str, u64> = TableDefinition::new("counters");
const CODEX_RECORDS: TableDefinition<u64, &str> = TableDefinition::new("codex_records");

pub struct Database {
    inner: redb::Database,
}

impl Database {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let inner = redb::Database::create(path.as_ref())?;
        // Touch every table once so reads against a fresh file don't
        // need to special-case "table doesn't exist yet".
        let tx = inner.begin_write()?;
        tx.open_table(USERS)?;
        tx.open_table(EMAIL_INDEX)?;
        tx.open_table(CREDENTIAL_INDEX)?;
        tx.open_table(SESSIONS)?;
        tx.open_table(VERIFICATION_TOKENS)?;
        tx.open_table(CHALLENGES)?;
        tx.open_table(COUNTERS)?;
        tx.open_table(CODEX_RECORDS)?;
        tx.commit()?;
        Ok(Self { inner })
    }

    /// Monotonic per-family id, e.g. `"users"` / `"codex_records"`.
    pub fn next_id(&self, family: &str) -> Result<u64> {
        let tx = self.inner.begin_write()?;
        let next = {
            let mut table = tx.open_table(COUNTERS)?;
            let current = table.get(family)?.map(|v| v.value()).unwrap_or(0);
            let next = current + 1;
            table.insert(family, next)?;
            next
        };
        tx.commit()?;
        Ok(next)
    }

    pub fn put_user(&self, user: &User) -> Result<()> {
        let json = serde_json::to_string(user)?;
        let tx = self.inner.begin_write()?;
        {
            let mut users = tx.open_table(USERS)?;
            users.insert(user.id, json.as_str())?;
            let mut email_index = tx.open_table(EMAIL_INDEX)?;
            email_index.insert(user.email.as_str(), user.id)?;
            if let Some(credential_id) = &user.credential_id {
                let encoded = crate::base64url_encode(credential_id);
                let mut credential_index = tx.open_table(CREDENTIAL_INDEX)?;
                credential_index.insert(encoded.as_str(), user.id)?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn get_user(&self, id: u64) -> Result<Option<User>> {
        let tx = self.inner.begin_read()?;
        let table = tx.open_table(USERS)?;
        let Some(json) = table.get(id)? else { return Ok(None) };
        Ok(Some(serde_json::from_str(json.value())?))
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let tx = self.inner.begin_read()?;
        let index = tx.open_table(EMAIL_INDEX)?;
        let Some(id) = index.get(email)? else { return Ok(None) };
        drop(index);
        self.get_user(id.value())
    }

    pub fn get_user_by_credential_id(&self, credential_id: &[u8]) -> Result<Option<User>> {
        let encoded = crate::base64url_encode(credential_id);
        let tx = self.inner.begin_read()?;
        let index = tx.open_table(CREDENTIAL_INDEX)?;
        let Some(id) = index.get(encoded.as_str())? else { return Ok(None) };
        drop(index);
        self.get_user(id.value())
    }

    pub fn list_users(&self) -> Result<Vec<User>> {
        let tx = self.inner.begin_read()?;
        let table = tx.open_table(USERS)?;
        table
            .iter()?
            .map(|entry| {
                let (_, json) = entry?;
                Ok(serde_json::from_str(json.value())?)
            })
            .collect()
    }

    /// Attaches a freshly verified credential to an existing (credential-less) user.
    pub fn set_user_credential(&self, user_id: u64, credential_id: &[u8], public_key: &[u8]) -> Result<bool> {
        let Some(mut user) = self.get_user(user_id)? else { return Ok(false) };
        user.credential_id = Some(credential_id.to_vec());
        user.public_key = Some(public_key.to_vec());
        user.sign_count = 0;
        self.put_user(&user)?;
        Ok(true)
    }

    pub fn update_sign_count(&self, credential_id: &[u8], sign_count: u32) -> Result<()> {
        if let Some(mut user) = self.get_user_by_credential_id(credential_id)? {
            user.sign_count = sign_count;
            self.put_user(&user)?;
        }
        Ok(())
    }

    pub fn put_session(&self, session: &Session) -> Result<()> {
        let json = serde_json::to_string(session)?;
        let tx = self.inner.begin_write()?;
        tx.open_table(SESSIONS)?.insert(session.session_id.as_str(), json.as_str())?;
        tx.commit()?;
        Ok(())
    }

    pub fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        let tx = self.inner.begin_read()?;
        let table = tx.open_table(SESSIONS)?;
        let Some(json) = table.get(session_id)? else { return Ok(None) };
        Ok(Some(serde_json::from_str(json.value())?))
    }

    pub fn delete_session(&self, session_id: &str) -> Result<()> {
        let tx = self.inner.begin_write()?;
        tx.open_table(SESSIONS)?.remove(session_id)?;
        tx.commit()?;
        Ok(())
    }

    pub fn put_verification_token(&self, token: &VerificationToken) -> Result<()> {
        let json = serde_json::to_string(token)?;
        let tx = self.inner.begin_write()?;
        tx.open_table(VERIFICATION_TOKENS)?.insert(token.token.as_str(), json.as_str())?;
        tx.commit()?;
        Ok(())
    }

    /// Fetches a verification token without consuming it, so callers can
    /// tell "never existed" apart from "already used" before acting.
    pub fn get_verification_token(&self, token: &str) -> Result<Option<VerificationToken>> {
        let tx = self.inner.begin_read()?;
        let table = tx.open_table(VERIFICATION_TOKENS)?;
        let Some(json) = table.get(token)? else { return Ok(None) };
        Ok(Some(serde_json::from_str(json.value())?))
    }

    /// Deletes every session past `expires_at` and every verification
    /// token that is expired or already used. Returns `(sessions,
    /// verifications)` removed.
    pub fn sweep_expired(&self, now: i64) -> Result<(usize, usize)> {
        let tx = self.inner.begin_write()?;
        let sessions_removed = {
            let mut table = tx.open_table(SESSIONS)?;
            let stale: Vec<String> = table
                .iter()?
                .filter_map(|entry| {
                    let (key, value) = entry.ok()?;
                    let session: Session = serde_json::from_str(value.value()).ok()?;
                    (session.expires_at < now).then(|| key.value().to_string())
                })
                .collect();
            for key in &stale {
                table.remove(key.as_str())?;
            }
            stale.len()
        };
        let verifications_removed = {
            let mut table = tx.open_table(VERIFICATION_TOKENS)?;
            let stale: Vec<String> = table
                .iter()?
                .filter_map(|entry| {
                    let (key, value) = entry.ok()?;
                    let token: VerificationToken = serde_json::from_str(value.value()).ok()?;
                    (token.used_at.is_some() || token.expires_at < now).then(|| key.value().to_string())
                })
                .collect();
            for key in &stale {
                table.remove(key.as_str())?;
            }
            stale.len()
        };
        tx.commit()?;
        Ok((sessions_removed, verifications_removed))
    }

    pub fn put_challenge(&self, challenge: &Challenge) -> Result<()> {
        let key = crate::base64url_encode(&challenge.challenge);
        let json = serde_json::to_string(challenge)?;
        let tx = self.inner.begin_write()?;
        tx.open_table(CHALLENGES)?.insert(key.as_str(), json.as_str())?;
        tx.commit()?;
        Ok(())
    }

    /// Removes and returns the challenge, enforcing single-use.
    pub fn take_challenge(&self, raw: &[u8]) -> Result<Option<Challenge>> {
        let key = crate::base64url_encode(raw);
        let tx = self.inner.begin_write()?;
        let value = {
            let mut table = tx.open_table(CHALLENGES)?;
            let existing = table.get(key.as_str())?.map(|v| v.value().to_string());
            if existing.is_some() {
                table.remove(key.as_str())?;
            }
            existing
        };
        tx.commit()?;
        value.map(|json| serde_json::from_str(&json).map_err(Error::from)).transpose()
    }
}

impl ArtifactStore for Database {
    fn put_codex_record(&self, record: &CodexRecord) -> Result<()> {
        let json = serde_json::to_string(record)?;
        let tx = self.inner.begin_write()?;
        tx.open_table(CODEX_RECORDS)?.insert(record.id, json.as_str())?;
        tx.commit()?;
        Ok(())
    }

    fn get_codex_record(&self, id: u64) -> Result<Option<CodexRecord>> {
        let tx = self.inner.begin_read()?;
        let table = tx.open_table(CODEX_RECORDS)?;
        let Some(json) = table.get(id)? else { return Ok(None) };
        Ok(Some(serde_json::from_str(json.value())?))
    }

    fn list_codex_records(&self) -> Result<Vec<CodexRecord>> {
        let tx = self.inner.begin_read()?;
        let table = tx.open_table(CODEX_RECORDS)?;
        table
            .iter()?
            .map(|entry| {
                let (_, json) = entry?;
                Ok(serde_json::from_str(json.value())?)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_db() -> (Database, std::path::PathBuf) {
        let path = std::env::temp_dir().join(format!("neonsignal-storage-test-{}-{}", std::process::id(), fastrand_seed()));
        (Database::open(&path).unwrap(), path)
    }

    fn fastrand_seed() -> u64 {
        std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().subsec_nanos() as u64
    }

    #[test]
    fn user_round_trips_through_email_index() {
        let (db, path) = temp_db();
        let user = User {
            id: db.next_id("users").unwrap(),
            email: "a@example.com".into(),
            display_name: "A".into(),
            verified: true,
            credential_id: Some(vec![1, 2, 3]),
            public_key: None,
            sign_count: 0,
            created_at: 0,
            last_login: None,
        };
        db.put_user(&user).unwrap();
        let fetched = db.get_user_by_email("a@example.com").unwrap().unwrap();
        assert_eq!(fetched.id, user.id);
        let by_cred = db.get_user_by_credential_id(&[1, 2, 3]).unwrap().unwrap();
        assert_eq!(by_cred.id, user.id);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn verification_token_marked_used_is_distinguishable_from_missing() {
        let (db, path) = temp_db();
        let token = VerificationToken { token: "tok".into(), user_id: 1, expires_at: i64::MAX, used_at: None };
        db.put_verification_token(&token).unwrap();
        let mut fetched = db.get_verification_token("tok").unwrap().unwrap();
        assert!(fetched.used_at.is_none());

        fetched.used_at = Some(1);
        db.put_verification_token(&fetched).unwrap();
        let replayed = db.get_verification_token("tok").unwrap().unwrap();
        assert!(replayed.used_at.is_some());

        assert!(db.get_verification_token("missing").unwrap().is_none());
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn sweep_expired_removes_stale_sessions_and_verifications() {
        let (db, path) = temp_db();
        db.put_session(&Session { session_id: "live".into(), user_id: 1, kind: SessionKind::Auth, expires_at: i64::MAX }).unwrap();
        db.put_session(&Session { session_id: "dead".into(), user_id: 1, kind: SessionKind::Auth, expires_at: 0 }).unwrap();
        db.put_verification_token(&VerificationToken { token: "live".into(), user_id: 1, expires_at: i64::MAX, used_at: None }).unwrap();
        db.put_verification_token(&VerificationToken { token: "used".into(), user_id: 1, expires_at: i64::MAX, used_at: Some(1) }).unwrap();

        let (sessions, verifications) = db.sweep_expired(100).unwrap();
        assert_eq!(sessions, 1);
        assert_eq!(verifications, 1);
        assert!(db.get_session("live").unwrap().is_some());
        assert!(db.get_session("dead").unwrap().is_none());
        assert!(db.get_verification_token("live").unwrap().is_some());
        assert!(db.get_verification_token("used").unwrap().is_none());
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn counters_are_monotonic_per_family() {
        let (db, path) = temp_db();
        assert_eq!(db.next_id("users").unwrap(), 1);
        assert_eq!(db.next_id("users").unwrap(), 2);
        assert_eq!(db.next_id("codex_records").unwrap(), 1);
        std::fs::remove_file(&path).ok();
    }
}
