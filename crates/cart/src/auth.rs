//! Process-wide authentication state.
//!
//! The cart only needs to know whether someone is signed in and who. At start
//! the state is restored from a small session cache so the first render can
//! guess correctly; the auth provider's change events then take over.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use pocketshop_core::UserId;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{clear_sentry_user, set_sentry_user};

/// Errors writing the session cache.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Session cache I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Session cache encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// The signed-in user as reported by the auth provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub uid: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl AuthUser {
    #[must_use]
    pub fn new(uid: impl Into<UserId>, email: Option<String>) -> Self {
        Self {
            uid: uid.into(),
            email,
        }
    }
}

/// What is currently known about the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthStatus {
    /// The provider has not reported yet. `cached_signed_in` is the guess
    /// restored from the session cache.
    Unknown { cached_signed_in: bool },
    SignedIn(AuthUser),
    SignedOut,
}

impl AuthStatus {
    /// The authenticated user. `Unknown` counts as nobody.
    #[must_use]
    pub const fn user(&self) -> Option<&AuthUser> {
        match self {
            Self::SignedIn(user) => Some(user),
            Self::Unknown { .. } | Self::SignedOut => None,
        }
    }

    /// Best guess for presentation while the provider is still starting.
    #[must_use]
    pub const fn appears_signed_in(&self) -> bool {
        match self {
            Self::SignedIn(_) => true,
            Self::Unknown { cached_signed_in } => *cached_signed_in,
            Self::SignedOut => false,
        }
    }
}

/// JSON file remembering the last signed-in user between runs.
#[derive(Debug, Clone)]
pub struct SessionCache {
    path: PathBuf,
}

impl SessionCache {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the cached user. Missing or unreadable caches count as signed
    /// out; the cache is only a hint.
    pub async fn load(&self) -> Option<AuthUser> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to read session cache");
                return None;
            }
        };

        match serde_json::from_str(&contents) {
            Ok(user) => Some(user),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "ignoring corrupt session cache");
                None
            }
        }
    }

    /// Remember `user`.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Io` if the file or its directory cannot be written.
    pub async fn save(&self, user: &AuthUser) -> Result<(), AuthError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let contents = serde_json::to_string_pretty(user)?;
        tokio::fs::write(&self.path, contents).await?;
        Ok(())
    }

    /// Forget the cached user. Clearing an absent cache succeeds.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Io` if the file exists but cannot be removed.
    pub async fn clear(&self) -> Result<(), AuthError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Runs inline on every status change. Returning `false` unregisters it.
type StatusHook = Box<dyn Fn(&AuthStatus) -> bool + Send + Sync>;

/// Shared, observable auth state.
///
/// Cheaply cloneable; clones observe and update the same state.
#[derive(Clone)]
pub struct AuthState {
    status: Arc<watch::Sender<AuthStatus>>,
    hooks: Arc<Mutex<Vec<StatusHook>>>,
    cache: Option<SessionCache>,
}

impl Default for AuthState {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthState {
    /// Unknown status, nothing persisted.
    #[must_use]
    pub fn new() -> Self {
        let (status, _) = watch::channel(AuthStatus::Unknown {
            cached_signed_in: false,
        });
        Self {
            status: Arc::new(status),
            hooks: Arc::default(),
            cache: None,
        }
    }

    /// Unknown status seeded from `cache`. Later changes are written back to
    /// it.
    pub async fn restore(cache: SessionCache) -> Self {
        let cached_signed_in = cache.load().await.is_some();
        debug!(cached_signed_in, "restored session flag");
        let (status, _) = watch::channel(AuthStatus::Unknown { cached_signed_in });
        Self {
            status: Arc::new(status),
            hooks: Arc::default(),
            cache: Some(cache),
        }
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> AuthStatus {
        self.status.borrow().clone()
    }

    /// The signed-in user, if the provider has reported one.
    #[must_use]
    pub fn current_user(&self) -> Option<AuthUser> {
        self.status.borrow().user().cloned()
    }

    /// Observe status changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<AuthStatus> {
        self.status.subscribe()
    }

    /// Run `hook` on every later status change, before [`apply`] returns.
    ///
    /// Unlike [`subscribe`], nothing can observe the new status before the
    /// hook has run. The hook is dropped the first time it returns `false`.
    ///
    /// [`apply`]: Self::apply
    /// [`subscribe`]: Self::subscribe
    pub fn on_change(&self, hook: impl Fn(&AuthStatus) -> bool + Send + Sync + 'static) {
        self.lock_hooks().push(Box::new(hook));
    }

    /// Record an auth-state change from the provider.
    ///
    /// Hooks have run and observers see the new status before the cache is
    /// written.
    ///
    /// # Errors
    ///
    /// Returns `AuthError` if the session cache could not be updated. The
    /// in-memory status has changed regardless.
    pub async fn apply(&self, user: Option<AuthUser>) -> Result<(), AuthError> {
        match user {
            Some(user) => {
                info!(user_id = %user.uid, "signed in");
                set_sentry_user(&user.uid, user.email.as_deref());
                self.publish(AuthStatus::SignedIn(user.clone()));
                if let Some(cache) = &self.cache {
                    cache.save(&user).await?;
                }
            }
            None => {
                info!("signed out");
                clear_sentry_user();
                self.publish(AuthStatus::SignedOut);
                if let Some(cache) = &self.cache {
                    cache.clear().await?;
                }
            }
        }
        Ok(())
    }

    /// Explicit sign-out.
    ///
    /// # Errors
    ///
    /// Returns `AuthError` if the session cache could not be cleared.
    pub async fn sign_out(&self) -> Result<(), AuthError> {
        self.apply(None).await
    }

    fn publish(&self, status: AuthStatus) {
        let mut hooks = self.lock_hooks();
        hooks.retain(|hook| hook(&status));
        self.status.send_replace(status);
    }

    fn lock_hooks(&self) -> MutexGuard<'_, Vec<StatusHook>> {
        self.hooks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn alice() -> AuthUser {
        AuthUser::new("alice-uid", Some("alice@example.org".to_string()))
    }

    #[tokio::test]
    async fn test_session_cache_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SessionCache::new(dir.path().join("nested").join("session.json"));

        assert!(cache.load().await.is_none());
        cache.save(&alice()).await.unwrap();
        assert_eq!(cache.load().await, Some(alice()));

        cache.clear().await.unwrap();
        assert!(cache.load().await.is_none());
        cache.clear().await.unwrap();
    }

    #[tokio::test]
    async fn test_corrupt_cache_counts_as_signed_out() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        tokio::fs::write(&path, "{not json").await.unwrap();

        let state = AuthState::restore(SessionCache::new(&path)).await;
        assert_eq!(
            state.status(),
            AuthStatus::Unknown {
                cached_signed_in: false
            }
        );
    }

    #[tokio::test]
    async fn test_restore_then_apply() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SessionCache::new(dir.path().join("session.json"));
        cache.save(&alice()).await.unwrap();

        let state = AuthState::restore(cache.clone()).await;
        assert!(state.status().appears_signed_in());
        assert!(state.current_user().is_none());

        let mut changes = state.subscribe();
        state.apply(Some(alice())).await.unwrap();
        assert!(changes.has_changed().unwrap());
        assert_eq!(state.current_user(), Some(alice()));

        state.sign_out().await.unwrap();
        assert_eq!(state.status(), AuthStatus::SignedOut);
        assert!(cache.load().await.is_none());
    }

    #[tokio::test]
    async fn test_hooks_run_before_apply_returns() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let state = AuthState::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let calls = Arc::new(AtomicUsize::new(0));

        let log = Arc::clone(&seen);
        state.on_change(move |status| {
            log.lock().unwrap().push(status.clone());
            true
        });
        let once = Arc::clone(&calls);
        state.on_change(move |_| {
            once.fetch_add(1, Ordering::SeqCst);
            false
        });

        state.apply(Some(alice())).await.unwrap();
        assert_eq!(
            seen.lock().unwrap().as_slice(),
            [AuthStatus::SignedIn(alice())]
        );

        state.sign_out().await.unwrap();
        assert_eq!(seen.lock().unwrap().last(), Some(&AuthStatus::SignedOut));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unknown_status_has_no_user() {
        let status = AuthStatus::Unknown {
            cached_signed_in: true,
        };
        assert!(status.user().is_none());
        assert!(status.appears_signed_in());
        assert!(!AuthStatus::SignedOut.appears_signed_in());
    }
}
