use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::storage::repository;
use crate::storage::Database;

pub const USERNAME_KEY: &str = "login_username";
pub const PASSWORD_KEY: &str = "login_password_sha256";
pub const SALT_KEY: &str = "login_password_salt";

static SESSION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Hex SHA-256 of salt and password, as stored in `app_config`.
pub fn password_digest(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn new_salt() -> String {
    let bytes: [u8; 16] = rand::random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// An authenticated session. Every facade operation takes one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    id: String,
    username: String,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl Session {
    fn new(username: &str, ttl_minutes: i64, now: DateTime<Utc>) -> Result<Self> {
        let expires_at = Duration::try_minutes(ttl_minutes.max(1))
            .and_then(|ttl| now.checked_add_signed(ttl))
            .ok_or_else(|| {
                Error::Config(format!("session_ttl_minutes out of range: {ttl_minutes}"))
            })?;
        let n = SESSION_COUNTER.fetch_add(1, Ordering::Relaxed);
        let mut hasher = Sha256::new();
        hasher.update(username.as_bytes());
        hasher.update(now.timestamp_nanos_opt().unwrap_or_default().to_le_bytes());
        hasher.update(n.to_le_bytes());
        hasher.update(std::process::id().to_le_bytes());
        Ok(Self {
            id: format!("{:x}", hasher.finalize()),
            username: username.to_string(),
            created_at: now,
            expires_at,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Store the login credentials. The password is kept only as a digest
/// salted with a fresh random value.
pub async fn set_credentials(db: &Database, username: &str, password: &str) -> Result<()> {
    let username = username.trim().to_string();
    if username.is_empty() || password.is_empty() {
        return Err(Error::Auth("username and password must not be empty".into()));
    }
    let salt = new_salt();
    let digest = password_digest(&salt, password);
    db.writer()
        .call(move |conn| {
            let tx = conn.transaction()?;
            repository::set_config(&tx, USERNAME_KEY, &username)?;
            repository::set_config(&tx, SALT_KEY, &salt)?;
            repository::set_config(&tx, PASSWORD_KEY, &digest)?;
            tx.commit()?;
            Ok::<(), rusqlite::Error>(())
        })
        .await?;
    Ok(())
}

async fn verify_credentials(db: &Database, username: &str, password: &str) -> Result<()> {
    let (stored_user, stored_digest, salt) = db
        .reader()
        .call(|conn| {
            Ok::<_, rusqlite::Error>((
                repository::get_config(conn, USERNAME_KEY)?,
                repository::get_config(conn, PASSWORD_KEY)?,
                repository::get_config(conn, SALT_KEY)?,
            ))
        })
        .await?;
    let (Some(stored_user), Some(stored_digest)) = (stored_user, stored_digest) else {
        return Err(Error::Auth(
            "no credentials configured; run `slackdw auth set` first".into(),
        ));
    };
    let salt = salt.unwrap_or_default();
    if stored_user == username.trim() && stored_digest == password_digest(&salt, password) {
        Ok(())
    } else {
        Err(Error::Auth("invalid username or password".into()))
    }
}

/// Live sessions for one process.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    live: Mutex<HashSet<String>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn live(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.live.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Check credentials and open a session lasting `ttl_minutes`.
    pub async fn login(
        &self,
        db: &Database,
        username: &str,
        password: &str,
        ttl_minutes: i64,
    ) -> Result<Session> {
        verify_credentials(db, username, password).await?;
        let session = Session::new(username.trim(), ttl_minutes, Utc::now())?;
        self.live().insert(session.id.clone());
        log::info!("Session opened for {} (expires {})", session.username, session.expires_at);
        Ok(session)
    }

    /// Returns false when the session was not open.
    pub fn logout(&self, session: &Session) -> bool {
        let removed = self.live().remove(&session.id);
        if removed {
            log::info!("Session closed for {}", session.username);
        }
        removed
    }

    /// Reject sessions that were closed or have expired. Expired sessions
    /// are dropped from the registry.
    pub fn ensure_active(&self, session: &Session) -> Result<()> {
        self.ensure_active_at(session, Utc::now())
    }

    fn ensure_active_at(&self, session: &Session, now: DateTime<Utc>) -> Result<()> {
        let mut live = self.live();
        if !live.contains(&session.id) {
            return Err(Error::Auth("session is not active; log in again".into()));
        }
        if session.is_expired_at(now) {
            live.remove(&session.id);
            return Err(Error::SessionExpired(session.expires_at.to_rfc3339()));
        }
        Ok(())
    }
}
