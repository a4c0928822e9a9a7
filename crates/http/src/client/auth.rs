//! Authentication API client methods

use tally_core::{Identity, LogoutReason, TokenPair};

use super::request::ApiResponse;
use super::{ApiClient, ClientError};
use crate::types::{Credentials, SignupRequest};

impl ApiClient {
    /// Exchange credentials for a session
    ///
    /// The form is posted `application/x-www-form-urlencoded`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::AuthRejected`] for bad credentials and
    /// [`ClientError::Decode`] if the returned access token is unusable; the
    /// existing session is kept in both cases
    pub async fn login(&self, credentials: &Credentials) -> Result<Identity, ClientError> {
        let response = self
            .client
            .post(self.url(&self.login_path))
            .form(credentials)
            .send()
            .await?;
        let identity = self.start_session(ApiResponse::read(response).await?)?;
        info!(subject = %identity.subject, "Logged in");
        Ok(identity)
    }

    /// Create an account and start a session for it
    ///
    /// # Errors
    ///
    /// As [`ApiClient::login`]
    pub async fn signup(&self, request: &SignupRequest) -> Result<Identity, ClientError> {
        let response = self
            .client
            .post(self.url(&self.signup_path))
            .json(request)
            .send()
            .await?;
        let identity = self.start_session(ApiResponse::read(response).await?)?;
        info!(subject = %identity.subject, "Signed up");
        Ok(identity)
    }

    /// End the session and notify the server if a logout endpoint is configured
    ///
    /// Returns whether there was a session to end.
    pub async fn logout(&self) -> bool {
        self.terminator.terminate(LogoutReason::UserRequested).await
    }

    fn start_session(&self, response: ApiResponse) -> Result<Identity, ClientError> {
        if !response.status.is_success() {
            return Err(response.into_error());
        }
        let tokens: TokenPair = response.json()?;
        Ok(self.session.set(tokens)?)
    }
}
