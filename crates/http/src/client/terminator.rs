//! Session teardown shared by user and automatic logouts

use std::sync::Arc;

use reqwest::Client;
use tally_core::{LogoutReason, SessionStore};

/// Clears the session and tells the server about it
#[derive(Clone)]
pub(crate) struct SessionTerminator {
    client: Client,
    logout_url: Option<String>,
    session: Arc<SessionStore>,
}

impl SessionTerminator {
    pub(crate) const fn new(
        client: Client,
        logout_url: Option<String>,
        session: Arc<SessionStore>,
    ) -> Self {
        Self {
            client,
            logout_url,
            session,
        }
    }

    /// Clear the session and wait for the server notification to settle
    ///
    /// Returns whether a session was actually removed. Only the call that
    /// removes the session notifies the server.
    pub(crate) async fn terminate(&self, reason: LogoutReason) -> bool {
        let Some(tokens) = self.session.clear(reason) else {
            return false;
        };

        if let Some(url) = &self.logout_url {
            notify(&self.client, url, &tokens.refresh_token).await;
        }
        true
    }
}

async fn notify(client: &Client, url: &str, refresh_token: &str) {
    let result = client
        .post(url)
        .bearer_auth(refresh_token)
        .json(&serde_json::json!({}))
        .send()
        .await;

    match result {
        Ok(response) if response.status().is_success() => {
            debug!("Server acknowledged logout");
        }
        Ok(response) => {
            warn!(status = %response.status(), "Server refused logout notification");
        }
        Err(e) => {
            warn!("Failed to notify server of logout: {e}");
        }
    }
}
