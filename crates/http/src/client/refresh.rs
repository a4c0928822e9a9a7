//! Single-flight access token refresh
//!
//! The coordinator is either idle or has exactly one refresh in flight.
//! Callers that need a new token while a refresh is in flight await the same
//! shared result instead of starting another network call. The refresh
//! itself runs as its own task, so it settles and updates the session even if
//! every caller waiting on it is dropped.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use reqwest::Client;
use tally_core::{LogoutReason, SessionError, SessionStore, TokenPair};

use super::error::ClientError;
use super::hooks;
use super::terminator::SessionTerminator;

/// Why a refresh produced no token
#[derive(Debug, Clone)]
pub(crate) enum RefreshError {
    /// No session, or its refresh token has expired
    SessionExpired,
    /// The refresh endpoint refused the refresh token
    Rejected { status: u16, message: String },
    /// Anything else; the session is left as it was
    Failed {
        status: Option<u16>,
        message: String,
    },
}

impl From<RefreshError> for ClientError {
    fn from(err: RefreshError) -> Self {
        match err {
            RefreshError::SessionExpired => Self::SessionExpired,
            RefreshError::Rejected { status, message } => Self::AuthRejected { status, message },
            RefreshError::Failed { status, message } => Self::RefreshFailed { status, message },
        }
    }
}

type PendingRefresh = Shared<BoxFuture<'static, Result<String, RefreshError>>>;

enum RefreshState {
    Idle,
    InFlight(PendingRefresh),
}

enum Next {
    Ready(String),
    Wait(PendingRefresh),
    LoggedOut,
    Expired,
}

struct Inner {
    client: Client,
    refresh_url: String,
    timeout: Option<Duration>,
    session: Arc<SessionStore>,
    terminator: SessionTerminator,
    state: Mutex<RefreshState>,
}

/// Hands out usable access tokens, refreshing at most once at a time
#[derive(Clone)]
pub(crate) struct RefreshCoordinator {
    inner: Arc<Inner>,
}

impl RefreshCoordinator {
    pub(crate) fn new(
        client: Client,
        refresh_url: String,
        timeout: Option<Duration>,
        session: Arc<SessionStore>,
        terminator: SessionTerminator,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                client,
                refresh_url,
                timeout,
                session,
                terminator,
                state: Mutex::new(RefreshState::Idle),
            }),
        }
    }

    /// Token to attach to an outgoing request
    ///
    /// `None` when logged out; the request then goes out unauthenticated.
    pub(crate) async fn authorize(&self) -> Result<Option<String>, RefreshError> {
        if !self.inner.session.is_authenticated() {
            return Ok(None);
        }
        self.ensure_fresh_token().await.map(Some)
    }

    /// An access token that is not expired, refreshing if needed
    pub(crate) async fn ensure_fresh_token(&self) -> Result<String, RefreshError> {
        self.obtain(None).await
    }

    /// An access token other than `rejected`, which the server just refused
    pub(crate) async fn refresh_after_rejection(
        &self,
        rejected: &str,
    ) -> Result<String, RefreshError> {
        self.obtain(Some(rejected)).await
    }

    async fn obtain(&self, rejected: Option<&str>) -> Result<String, RefreshError> {
        match self.next(rejected) {
            Next::Ready(token) => Ok(token),
            Next::Wait(pending) => pending.await,
            Next::LoggedOut => Err(RefreshError::SessionExpired),
            Next::Expired => {
                info!("Refresh token expired; ending session");
                self.inner
                    .terminator
                    .terminate(LogoutReason::SessionExpired)
                    .await;
                Err(RefreshError::SessionExpired)
            }
        }
    }

    fn next(&self, rejected: Option<&str>) -> Next {
        let mut state = lock(&self.inner.state);

        if let RefreshState::InFlight(pending) = &*state {
            debug!("Joining in-flight token refresh");
            return Next::Wait(pending.clone());
        }

        let Some(tokens) = self.inner.session.get() else {
            return Next::LoggedOut;
        };

        let usable = rejected != Some(tokens.access_token.as_str())
            && !self.inner.session.is_expired(&tokens.access_token);
        if usable {
            return Next::Ready(tokens.access_token);
        }

        if self.inner.session.is_expired(&tokens.refresh_token) {
            return Next::Expired;
        }

        debug!("Starting token refresh");
        let pending = self.spawn_refresh(tokens.refresh_token);
        *state = RefreshState::InFlight(pending.clone());
        Next::Wait(pending)
    }

    fn spawn_refresh(&self, refresh_token: String) -> PendingRefresh {
        let task = tokio::spawn(run_refresh(self.inner.clone(), refresh_token));
        let inner = self.inner.clone();

        async move {
            match task.await {
                Ok(result) => result,
                Err(e) => {
                    // The task never reached its own cleanup.
                    *lock(&inner.state) = RefreshState::Idle;
                    Err(RefreshError::Failed {
                        status: None,
                        message: format!("refresh task aborted: {e}"),
                    })
                }
            }
        }
        .boxed()
        .shared()
    }
}

/// Body of the spawned refresh task
///
/// The session is updated, or torn down, before the state returns to idle
/// and before any waiter sees the result.
async fn run_refresh(inner: Arc<Inner>, refresh_token: String) -> Result<String, RefreshError> {
    let result = match request_tokens(&inner, &refresh_token).await {
        Ok(tokens) => install(&inner.session, &refresh_token, tokens),
        Err(e) => Err(e),
    };

    match &result {
        Ok(_) => info!("Access token refreshed"),
        Err(RefreshError::Rejected { status, .. }) => {
            warn!(status = *status, "Refresh token rejected; ending session");
            inner
                .terminator
                .terminate(LogoutReason::RefreshRejected)
                .await;
        }
        Err(e) => warn!("Token refresh failed: {e:?}"),
    }

    *lock(&inner.state) = RefreshState::Idle;
    result
}

async fn request_tokens(inner: &Inner, refresh_token: &str) -> Result<TokenPair, RefreshError> {
    let mut request = inner
        .client
        .post(&inner.refresh_url)
        .bearer_auth(refresh_token)
        .json(&serde_json::json!({}));
    if let Some(timeout) = inner.timeout {
        request = request.timeout(timeout);
    }

    let response = request.send().await.map_err(|e| RefreshError::Failed {
        status: None,
        message: e.to_string(),
    })?;
    let status = response.status();

    if status.is_success() {
        return response
            .json::<TokenPair>()
            .await
            .map_err(|e| RefreshError::Failed {
                status: Some(status.as_u16()),
                message: format!("invalid refresh response: {e}"),
            });
    }

    let message = response
        .text()
        .await
        .unwrap_or_else(|_| status.to_string());
    if hooks::is_auth_rejection(status) {
        Err(RefreshError::Rejected {
            status: status.as_u16(),
            message,
        })
    } else {
        Err(RefreshError::Failed {
            status: Some(status.as_u16()),
            message,
        })
    }
}

fn install(
    session: &SessionStore,
    refresh_token: &str,
    tokens: TokenPair,
) -> Result<String, RefreshError> {
    let access_token = tokens.access_token.clone();
    match session.rotate(refresh_token, tokens) {
        Ok(Some(_)) => Ok(access_token),
        // Logged out or logged in again while refreshing; the current session wins.
        Ok(None) => session
            .get()
            .map(|current| current.access_token)
            .ok_or(RefreshError::SessionExpired),
        Err(SessionError::Decode(e)) => Err(RefreshError::Failed {
            status: None,
            message: format!("refresh returned an unusable token: {e}"),
        }),
        Err(SessionError::Storage(e)) => Err(RefreshError::Failed {
            status: None,
            message: e.to_string(),
        }),
    }
}

fn lock(state: &Mutex<RefreshState>) -> MutexGuard<'_, RefreshState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}
