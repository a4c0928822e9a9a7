//! Tally HTTP client

mod auth;
pub mod error;
pub mod hooks;
mod refresh;
pub mod request;
mod terminator;

use std::sync::Arc;
use std::time::Duration;

use error::ClientError;
use hooks::ResponseAction;
use refresh::RefreshCoordinator;
use request::{ApiRequest, ApiResponse};
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, ClientBuilder};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tally_core::{ApiSettings, Identity, LogoutReason, SessionStore};
use terminator::SessionTerminator;

/// Authenticated Tally API client
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    login_path: String,
    signup_path: String,
    session: Arc<SessionStore>,
    refresh: RefreshCoordinator,
    terminator: SessionTerminator,
}

impl ApiClient {
    /// Create a new client builder
    pub fn builder() -> ApiClientBuilder {
        ApiClientBuilder::default()
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The session this client authenticates with
    pub const fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    /// Identity of the logged-in user, if any
    pub fn current_identity(&self) -> Option<Identity> {
        self.session.identity()
    }

    /// Send a request with the session's credentials
    ///
    /// An expired access token is refreshed before sending. A 401/403 on an
    /// authenticated request triggers one refresh and one replay; a second
    /// rejection ends the session.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::RateLimited`] on 429, [`ClientError::AuthRejected`]
    /// on an unrecoverable 401/403, [`ClientError::SessionExpired`] or
    /// [`ClientError::RefreshFailed`] if no usable token could be obtained, and
    /// [`ClientError::RequestFailed`] for any other non-success status.
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ClientError> {
        let mut token = self.refresh.authorize().await?;
        let mut retried = false;

        loop {
            let response = self.dispatch(&request, token.as_deref()).await?;
            let action = hooks::classify(response.status, token.is_some(), retried);
            debug!(
                method = %request.method,
                path = %request.path,
                status = response.status.as_u16(),
                ?action,
                "Response received"
            );

            match action {
                ResponseAction::Deliver => return Ok(response),
                ResponseAction::RefreshAndRetry => {
                    let rejected = token.take().unwrap_or_default();
                    token = Some(self.refresh.refresh_after_rejection(&rejected).await?);
                    retried = true;
                }
                ResponseAction::Reject => {
                    if token.is_some() {
                        warn!(path = %request.path, "Request rejected after refresh; ending session");
                        self.terminator.terminate(LogoutReason::AuthRejected).await;
                    }
                    return Err(response.into_error());
                }
                ResponseAction::RateLimited | ResponseAction::Fail => {
                    return Err(response.into_error());
                }
            }
        }
    }

    /// Send a request and deserialize the JSON response
    ///
    /// # Errors
    ///
    /// As [`ApiClient::send`], plus [`ClientError::Serialization`] if the body
    /// does not match `T`
    pub async fn execute<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, ClientError> {
        self.send(request).await?.json()
    }

    pub async fn get(&self, path: &str) -> Result<ApiResponse, ClientError> {
        self.send(ApiRequest::get(path)).await
    }

    pub async fn post<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<ApiResponse, ClientError> {
        self.send(ApiRequest::post(path).json(body)?).await
    }

    pub async fn put<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<ApiResponse, ClientError> {
        self.send(ApiRequest::put(path).json(body)?).await
    }

    pub async fn patch<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<ApiResponse, ClientError> {
        self.send(ApiRequest::patch(path).json(body)?).await
    }

    pub async fn delete(&self, path: &str) -> Result<ApiResponse, ClientError> {
        self.send(ApiRequest::delete(path)).await
    }

    async fn dispatch(
        &self,
        request: &ApiRequest,
        access_token: Option<&str>,
    ) -> Result<ApiResponse, ClientError> {
        let mut headers = request.headers.clone();
        if access_token.is_some() {
            headers.remove(AUTHORIZATION);
        }

        let mut builder = self
            .client
            .request(request.method.clone(), self.url(&request.path))
            .headers(headers);

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = hooks::before_send(builder, access_token).send().await?;
        ApiResponse::read(response).await
    }

    fn url(&self, path: &str) -> String {
        join_url(&self.base_url, path)
    }
}

fn join_url(base_url: &str, path: &str) -> String {
    format!("{base_url}/{}", path.trim_start_matches('/'))
}

/// Builder for `ApiClient`
#[derive(Default)]
pub struct ApiClientBuilder {
    base_url: Option<String>,
    session: Option<Arc<SessionStore>>,
    refresh_path: Option<String>,
    login_path: Option<String>,
    signup_path: Option<String>,
    logout_path: Option<String>,
    timeout: Option<Duration>,
    refresh_timeout: Option<Duration>,
    user_agent: Option<String>,
}

impl ApiClientBuilder {
    /// Start from the `[api]` section of the settings
    pub fn from_settings(settings: &ApiSettings) -> Self {
        Self {
            base_url: Some(settings.base_url.clone()),
            session: None,
            refresh_path: Some(settings.refresh_path.clone()),
            login_path: Some(settings.login_path.clone()),
            signup_path: Some(settings.signup_path.clone()),
            logout_path: settings.logout_path.clone(),
            timeout: settings.timeout_secs.map(Duration::from_secs),
            refresh_timeout: settings.refresh_timeout_secs.map(Duration::from_secs),
            user_agent: Some(settings.user_agent.clone()),
        }
    }

    /// Set the base URL
    #[must_use]
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set the session store the client reads and updates
    #[must_use]
    pub fn session(mut self, session: Arc<SessionStore>) -> Self {
        self.session = Some(session);
        self
    }

    #[must_use]
    pub fn refresh_path(mut self, path: impl Into<String>) -> Self {
        self.refresh_path = Some(path.into());
        self
    }

    #[must_use]
    pub fn login_path(mut self, path: impl Into<String>) -> Self {
        self.login_path = Some(path.into());
        self
    }

    #[must_use]
    pub fn signup_path(mut self, path: impl Into<String>) -> Self {
        self.signup_path = Some(path.into());
        self
    }

    /// Endpoint notified when the session ends
    #[must_use]
    pub fn logout_path(mut self, path: impl Into<String>) -> Self {
        self.logout_path = Some(path.into());
        self
    }

    /// Set the request timeout
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the timeout of the refresh call, overriding the request timeout
    #[must_use]
    pub fn refresh_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_timeout = Some(timeout);
        self
    }

    /// Set the user agent
    #[must_use]
    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    /// Build the client
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Configuration`] if the base URL or session is
    /// missing or the base URL is not an http(s) URL
    pub fn build(self) -> Result<ApiClient, ClientError> {
        let base_url = self
            .base_url
            .ok_or_else(|| ClientError::Configuration("base_url is required".into()))?;
        let session = self
            .session
            .ok_or_else(|| ClientError::Configuration("session is required".into()))?;

        let parsed = url::Url::parse(&base_url)
            .map_err(|e| ClientError::Configuration(format!("invalid base_url '{base_url}': {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ClientError::Configuration(format!(
                "base_url must be http or https, got '{}'",
                parsed.scheme()
            )));
        }

        // Ensure base_url ends without a trailing slash
        let base_url = base_url.trim_end_matches('/').to_string();

        let defaults = ApiSettings::default();
        let mut client_builder = ClientBuilder::new();

        if let Some(timeout) = self.timeout {
            client_builder = client_builder.timeout(timeout);
        }

        client_builder =
            client_builder.user_agent(self.user_agent.unwrap_or(defaults.user_agent));

        let client = client_builder.build()?;

        let refresh_url = join_url(
            &base_url,
            &self.refresh_path.unwrap_or(defaults.refresh_path),
        );
        let logout_url = self.logout_path.map(|path| join_url(&base_url, &path));

        let terminator = SessionTerminator::new(client.clone(), logout_url, session.clone());
        let refresh = RefreshCoordinator::new(
            client.clone(),
            refresh_url,
            self.refresh_timeout,
            session.clone(),
            terminator.clone(),
        );

        Ok(ApiClient {
            client,
            base_url,
            login_path: self.login_path.unwrap_or(defaults.login_path),
            signup_path: self.signup_path.unwrap_or(defaults.signup_path),
            session,
            refresh,
            terminator,
        })
    }
}
