//! Request and response hooks
//!
//! Both hooks are pure: they look at the outgoing request or the incoming
//! status and decide, and [`super::ApiClient::send`] carries the decision out.

use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{RequestBuilder, StatusCode};

/// What the gateway should do with a response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseAction {
    /// Hand the response to the caller
    Deliver,
    /// Refresh the access token and replay the request once
    RefreshAndRetry,
    /// Surface an auth rejection; ends the session if the request carried a token
    Reject,
    /// Surface the rate limit without retrying
    RateLimited,
    /// Surface the status as a plain request failure
    Fail,
}

/// Attach the bearer credential, if there is one
pub fn before_send(builder: RequestBuilder, access_token: Option<&str>) -> RequestBuilder {
    match access_token {
        Some(token) => builder.bearer_auth(token),
        None => builder,
    }
}

/// Decide what to do with a response status
///
/// `authenticated` is whether the request carried an access token and
/// `retried` whether it is already the replay after a refresh.
pub fn classify(status: StatusCode, authenticated: bool, retried: bool) -> ResponseAction {
    if status.is_success() {
        ResponseAction::Deliver
    } else if is_auth_rejection(status) {
        if authenticated && !retried {
            ResponseAction::RefreshAndRetry
        } else {
            ResponseAction::Reject
        }
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        ResponseAction::RateLimited
    } else {
        ResponseAction::Fail
    }
}

/// 401 and 403 both mean the credential was refused
pub fn is_auth_rejection(status: StatusCode) -> bool {
    matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN)
}

/// Parse a `Retry-After` header given in seconds
///
/// HTTP-date values are ignored.
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
