//! Token storage and session persistence

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::sync::RwLock;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Access/refresh token pair. Always replaced as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialPair {
    pub access_token: String,
    pub refresh_token: String,
}

impl CredentialPair {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }
}

/// Token pair as returned by the login and refresh endpoints
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    #[serde(alias = "accessToken")]
    pub access_token: String,
    #[serde(alias = "refreshToken")]
    pub refresh_token: String,
}

impl From<TokenResponse> for CredentialPair {
    fn from(resp: TokenResponse) -> Self {
        Self::new(resp.access_token, resp.refresh_token)
    }
}

/// What survives between runs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub credentials: Option<CredentialPair>,
    /// Unix seconds until which the session counts as logged in
    pub logged_in_until: Option<u64>,
}

impl SessionRecord {
    pub fn flag_active(&self) -> bool {
        self.logged_in_until.map_or(false, |until| now_secs() < until)
    }
}

/// Latest expiry the session file can hold (TOML integers are i64)
const MAX_FLAG_EXPIRY: u64 = i64::MAX as u64;

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Durable backend for the session record
pub trait SessionStorage: Send + Sync {
    fn load(&self) -> Result<Option<SessionRecord>>;
    fn save(&self, record: &SessionRecord) -> Result<()>;
    fn remove(&self) -> Result<()>;
}

/// TOML file in the user's config directory
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl SessionStorage for FileStorage {
    fn load(&self) -> Result<Option<SessionRecord>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.path).context("Failed to read session file")?;
        let record = toml::from_str(&content).context("Failed to parse session file")?;
        Ok(Some(record))
    }

    fn save(&self, record: &SessionRecord) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(record).context("Failed to serialize session")?;
        fs::write(&self.path, content).context("Failed to write session file")?;

        // Session file holds tokens
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o600);
            fs::set_permissions(&self.path, perms)
                .context("Failed to set session file permissions")?;
        }

        Ok(())
    }

    fn remove(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).context("Failed to remove session file"),
        }
    }
}

/// Single source of truth for the current credential pair.
///
/// Reads are served from memory; writes go to memory first and are then
/// persisted, so a failed disk write never leaves a half-updated pair behind.
pub struct TokenStore {
    cached: RwLock<Option<CredentialPair>>,
    storage: Box<dyn SessionStorage>,
    flag_ttl: Duration,
}

impl TokenStore {
    /// Restore the previous session from storage. An unreadable session is
    /// treated as logged out.
    pub fn load(storage: Box<dyn SessionStorage>, flag_ttl: Duration) -> Self {
        let credentials = match storage.load() {
            Ok(record) => record.and_then(|r| r.credentials),
            Err(e) => {
                tracing::warn!("Ignoring unreadable session: {:#}", e);
                None
            }
        };

        Self {
            cached: RwLock::new(credentials),
            storage,
            flag_ttl,
        }
    }

    pub fn get(&self) -> Option<CredentialPair> {
        self.cached
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Replace the pair and renew the logged-in flag.
    pub fn set(&self, pair: CredentialPair) -> Result<()> {
        *self.cached.write().unwrap_or_else(|e| e.into_inner()) = Some(pair.clone());

        let record = SessionRecord {
            credentials: Some(pair),
            logged_in_until: Some(
                now_secs()
                    .saturating_add(self.flag_ttl.as_secs())
                    .min(MAX_FLAG_EXPIRY),
            ),
        };
        self.storage.save(&record)
    }

    /// Drop both tokens and the session flag. Returns whether a pair was held.
    pub fn clear(&self) -> bool {
        let previous = self.cached.write().unwrap_or_else(|e| e.into_inner()).take();

        if let Err(e) = self.storage.remove() {
            tracing::warn!("Failed to remove persisted session: {:#}", e);
        }

        previous.is_some()
    }

    /// Logged-in check based on the session flag only, never the tokens.
    pub fn is_logged_in(&self) -> bool {
        match self.storage.load() {
            Ok(Some(record)) => record.flag_active(),
            Ok(None) => false,
            Err(e) => {
                tracing::debug!("Session flag unreadable: {:#}", e);
                false
            }
        }
    }

    /// Expiry of the session flag, if one is set
    pub fn logged_in_until(&self) -> Option<u64> {
        self.storage.load().ok().flatten()?.logged_in_until
    }
}

/// In-memory storage for tests
#[cfg(test)]
#[derive(Default)]
pub struct MemoryStorage {
    record: std::sync::Mutex<Option<SessionRecord>>,
}

#[cfg(test)]
impl MemoryStorage {
    pub fn with_credentials(pair: CredentialPair) -> Self {
        Self {
            record: std::sync::Mutex::new(Some(SessionRecord {
                credentials: Some(pair),
                logged_in_until: Some(now_secs() + 3600),
            })),
        }
    }
}

#[cfg(test)]
impl SessionStorage for MemoryStorage {
    fn load(&self) -> Result<Option<SessionRecord>> {
        Ok(self.record.lock().unwrap().clone())
    }

    fn save(&self, record: &SessionRecord) -> Result<()> {
        *self.record.lock().unwrap() = Some(record.clone());
        Ok(())
    }

    fn remove(&self) -> Result<()> {
        *self.record.lock().unwrap() = None;
        Ok(())
    }
}
