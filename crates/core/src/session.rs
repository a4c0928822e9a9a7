//! Session store: the single owner of the client's token pair

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::SessionError;
use crate::storage::TokenStorage;
use crate::token::{self, Identity, TokenPair};

/// Why a session was torn down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogoutReason {
    /// The user asked to log out
    UserRequested,
    /// The refresh token itself had expired
    SessionExpired,
    /// The refresh endpoint rejected the refresh token
    RefreshRejected,
    /// The backend kept rejecting requests after a refresh
    AuthRejected,
}

impl fmt::Display for LogoutReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::UserRequested => "user requested",
            Self::SessionExpired => "session expired",
            Self::RefreshRejected => "refresh rejected",
            Self::AuthRejected => "authentication rejected",
        };
        f.write_str(reason)
    }
}

/// Callback invoked once per session teardown
pub type LogoutListener = Arc<dyn Fn(LogoutReason) + Send + Sync>;

/// Session store options
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Key of the durable slot holding the serialized token pair
    pub storage_key: String,
    /// Seconds before `exp` at which a token already counts as expired
    pub expiry_leeway_secs: i64,
}

impl SessionOptions {
    /// Session storage key for auth tokens
    pub const DEFAULT_STORAGE_KEY: &'static str = "auth_tokens";
    pub const DEFAULT_EXPIRY_LEEWAY_SECS: i64 = 5;
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            storage_key: Self::DEFAULT_STORAGE_KEY.to_string(),
            expiry_leeway_secs: Self::DEFAULT_EXPIRY_LEEWAY_SECS,
        }
    }
}

#[derive(Clone)]
struct Session {
    tokens: TokenPair,
    identity: Identity,
}

/// Owns the current [`TokenPair`] and the [`Identity`] derived from it
///
/// The persisted copy is always written before the in-memory copy, so a
/// crash can at worst leave a newer session on disk than the one in memory,
/// never a torn or older one.
pub struct SessionStore {
    storage: Arc<dyn TokenStorage>,
    options: SessionOptions,
    current: RwLock<Option<Session>>,
    identity_tx: watch::Sender<Option<Identity>>,
    listeners: RwLock<Vec<LogoutListener>>,
}

impl SessionStore {
    /// Create a store backed by `storage` and restore any persisted session
    pub fn open(storage: Arc<dyn TokenStorage>, options: SessionOptions) -> Self {
        let store = Self {
            storage,
            options,
            current: RwLock::new(None),
            identity_tx: watch::Sender::new(None),
            listeners: RwLock::new(Vec::new()),
        };
        store.load();
        store
    }

    /// Re-read the persisted token pair into memory
    ///
    /// Absent, unparseable or undecodable records yield `None`; this never fails.
    pub fn load(&self) -> Option<TokenPair> {
        let restored = self.read_persisted();
        let tokens = restored.as_ref().map(|s| s.tokens.clone());
        let identity = restored.as_ref().map(|s| s.identity.clone());

        *write_lock(&self.current) = restored;
        self.identity_tx.send_replace(identity);
        tokens
    }

    fn read_persisted(&self) -> Option<Session> {
        let key = &self.options.storage_key;
        let raw = match self.storage.read(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!("Failed to read persisted session: {e}");
                return None;
            }
        };

        let tokens: TokenPair = match serde_json::from_str(&raw) {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!("Ignoring unparseable persisted session: {e}");
                return None;
            }
        };

        match token::decode_identity(&tokens.access_token) {
            Ok(identity) => {
                debug!(subject = %identity.subject, "Restored persisted session");
                Some(Session { tokens, identity })
            }
            Err(e) => {
                warn!("Ignoring persisted session with undecodable access token: {e}");
                None
            }
        }
    }

    /// Current token pair, if logged in
    pub fn get(&self) -> Option<TokenPair> {
        read_lock(&self.current).as_ref().map(|s| s.tokens.clone())
    }

    /// Identity decoded from the current access token
    pub fn identity(&self) -> Option<Identity> {
        read_lock(&self.current).as_ref().map(|s| s.identity.clone())
    }

    pub fn is_authenticated(&self) -> bool {
        read_lock(&self.current).is_some()
    }

    /// Replace the session with `tokens`
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Decode`] if the access token cannot be decoded
    /// and [`SessionError::Storage`] if it cannot be persisted; in both cases
    /// the store is left unchanged.
    pub fn set(&self, tokens: TokenPair) -> Result<Identity, SessionError> {
        let mut current = write_lock(&self.current);
        self.install(&mut current, tokens)
    }

    /// Replace the session only if it still holds `refresh_token`
    ///
    /// Used when a refresh settles: if the session was cleared or replaced
    /// while the refresh was in flight, the result is discarded and `None`
    /// is returned.
    ///
    /// # Errors
    ///
    /// Same as [`SessionStore::set`].
    pub fn rotate(
        &self,
        refresh_token: &str,
        tokens: TokenPair,
    ) -> Result<Option<Identity>, SessionError> {
        let mut current = write_lock(&self.current);
        let still_current = current
            .as_ref()
            .is_some_and(|s| s.tokens.refresh_token == refresh_token);
        if !still_current {
            debug!("Session changed while refreshing; discarding refreshed tokens");
            return Ok(None);
        }
        self.install(&mut current, tokens).map(Some)
    }

    fn install(
        &self,
        current: &mut Option<Session>,
        tokens: TokenPair,
    ) -> Result<Identity, SessionError> {
        let identity = token::decode_identity(&tokens.access_token)?;
        let serialized = serde_json::to_string(&tokens).map_err(crate::CoreError::from)?;
        self.storage.write(&self.options.storage_key, &serialized)?;

        *current = Some(Session {
            tokens,
            identity: identity.clone(),
        });
        self.identity_tx.send_replace(Some(identity.clone()));
        Ok(identity)
    }

    /// Remove the session from memory and durable storage
    ///
    /// Idempotent. Returns the removed token pair, or `None` if there was no
    /// session; logout listeners run only when a session was removed, so
    /// concurrent teardowns produce exactly one logout.
    pub fn clear(&self, reason: LogoutReason) -> Option<TokenPair> {
        let removed = {
            let mut current = write_lock(&self.current);
            self.forget_persisted();
            current.take()
        };

        let session = removed?;
        info!(subject = %session.identity.subject, %reason, "Session cleared");
        self.identity_tx.send_replace(None);

        let listeners = read_lock(&self.listeners).clone();
        for listener in listeners {
            listener(reason);
        }
        Some(session.tokens)
    }

    /// Remove the durable record, or at least make it unloadable
    fn forget_persisted(&self) {
        let key = &self.options.storage_key;
        let Err(e) = self.storage.remove(key) else {
            return;
        };
        warn!("Failed to remove persisted session: {e}");

        // An empty record does not parse, so `load` treats it as logged out.
        if let Err(e) = self.storage.write(key, "") {
            warn!("Failed to overwrite persisted session; it will be restored on next start: {e}");
        }
    }

    /// Whether `token` is expired under this store's leeway
    pub fn is_expired(&self, token: &str) -> bool {
        token::is_expired(token, self.options.expiry_leeway_secs)
    }

    /// Watch the current identity; `None` while logged out
    pub fn subscribe(&self) -> watch::Receiver<Option<Identity>> {
        self.identity_tx.subscribe()
    }

    /// Register a callback for session teardown
    pub fn on_logout(&self, listener: LogoutListener) {
        write_lock(&self.listeners).push(listener);
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }
}

fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
