//! HTTP transport seam used by the rollcall session.
//!
//! The session client only ever talks to the portal through these traits so
//! the fetch → login → refresh sequence can be replayed against canned
//! responses in tests.

use std::borrow::Cow;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::HeaderMap;
use thiserror::Error;
use url::Url;

use super::analysis::{meta_refresh_target, refresh_header_target};

/// Cookie-bearing HTTP session owned by exactly one rollcall attempt.
///
/// Implementations must keep cookies between calls so the login performed by
/// `post_form` is visible to the following `get`. Dropping the session must
/// release its network resources.
#[async_trait]
pub trait PortalHttpClient: Send + Sync {
    async fn get(
        &self,
        url: &Url,
        headers: &HeaderMap,
    ) -> Result<PortalHttpResponse, PortalHttpClientError>;

    async fn post_form(
        &self,
        url: &Url,
        headers: &HeaderMap,
        form_fields: &[(String, String)],
    ) -> Result<PortalHttpResponse, PortalHttpClientError>;
}

/// Hands out a fresh, isolated session per attempt.
pub trait SessionFactory: Send + Sync {
    fn open_session(&self) -> Result<Box<dyn PortalHttpClient>, PortalHttpClientError>;
}

/// Minimal response representation returned by the transport abstraction.
#[derive(Debug, Clone)]
pub struct PortalHttpResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub url: Url,
}

impl PortalHttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Next hop announced through `Refresh`, header first, then `<meta>`.
    pub fn refresh_target(&self) -> Option<Url> {
        self.header_refresh_target()
            .or_else(|| self.meta_refresh_target())
    }

    pub fn header_refresh_target(&self) -> Option<Url> {
        refresh_header_target(&self.headers, &self.url)
    }

    pub fn meta_refresh_target(&self) -> Option<Url> {
        meta_refresh_target(&self.text(), &self.url)
    }
}

#[derive(Debug, Error)]
pub enum PortalHttpClientError {
    #[error("http transport error: {0}")]
    Transport(String),
    #[error("request timed out")]
    Timeout,
}

impl From<reqwest::Error> for PortalHttpClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            PortalHttpClientError::Timeout
        } else {
            PortalHttpClientError::Transport(err.to_string())
        }
    }
}
