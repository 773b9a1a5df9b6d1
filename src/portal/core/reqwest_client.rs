//! Reqwest-based implementation of the portal transport traits.
//!
//! Every session wraps its own `reqwest::Client` with a private cookie jar, so
//! concurrent attempts for different users never see each other's cookies.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use http::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Client, cookie::Jar, redirect::Policy};
use url::Url;

use crate::config::RollcallConfig;

use super::{PortalHttpClient, PortalHttpClientError, PortalHttpResponse, SessionFactory};

const MAX_HTTP_REDIRECTS: usize = 10;

/// Builds one reqwest client (and cookie jar) per attempt.
#[derive(Debug, Clone)]
pub struct ReqwestSessionFactory {
    base_headers: HeaderMap,
    request_timeout: Duration,
    connect_timeout: Duration,
}

impl ReqwestSessionFactory {
    pub fn new(config: &RollcallConfig) -> Result<Self, PortalHttpClientError> {
        let mut base_headers = HeaderMap::new();
        let user_agent = HeaderValue::from_str(&config.user_agent)
            .map_err(|err| PortalHttpClientError::Transport(format!("invalid user agent: {err}")))?;
        base_headers.insert(USER_AGENT, user_agent);
        base_headers.insert(
            http::header::ACCEPT_LANGUAGE,
            HeaderValue::from_static("zh-TW,zh;q=0.9,en;q=0.8"),
        );

        Ok(Self {
            base_headers,
            request_timeout: config.request_timeout(),
            connect_timeout: config.connect_timeout(),
        })
    }
}

impl SessionFactory for ReqwestSessionFactory {
    fn open_session(&self) -> Result<Box<dyn PortalHttpClient>, PortalHttpClientError> {
        let jar = Arc::new(Jar::default());
        let client = Client::builder()
            .cookie_provider(jar)
            .default_headers(self.base_headers.clone())
            .redirect(Policy::limited(MAX_HTTP_REDIRECTS))
            .timeout(self.request_timeout)
            .connect_timeout(self.connect_timeout)
            .build()?;

        Ok(Box::new(ReqwestPortalSession { client }))
    }
}

/// Session backed by a dedicated reqwest client.
///
/// Standard 3xx redirects are followed by reqwest itself; the portal's
/// `Refresh` hops are left to the caller.
pub struct ReqwestPortalSession {
    client: Client,
}

impl ReqwestPortalSession {
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PortalHttpClient for ReqwestPortalSession {
    async fn get(
        &self,
        url: &Url,
        headers: &HeaderMap,
    ) -> Result<PortalHttpResponse, PortalHttpClientError> {
        let response = self
            .client
            .get(url.as_str())
            .headers(headers.clone())
            .send()
            .await?;

        to_portal_response(response).await
    }

    async fn post_form(
        &self,
        url: &Url,
        headers: &HeaderMap,
        form_fields: &[(String, String)],
    ) -> Result<PortalHttpResponse, PortalHttpClientError> {
        let response = self
            .client
            .post(url.as_str())
            .headers(headers.clone())
            .form(form_fields)
            .send()
            .await?;

        to_portal_response(response).await
    }
}

async fn to_portal_response(
    response: reqwest::Response,
) -> Result<PortalHttpResponse, PortalHttpClientError> {
    let status = response.status().as_u16();
    let headers = response.headers().clone();
    let url = response.url().clone();
    let body = response.bytes().await?;

    Ok(PortalHttpResponse {
        status,
        headers,
        body,
        url,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_independent_sessions() {
        let factory = ReqwestSessionFactory::new(&RollcallConfig::default()).unwrap();
        assert!(factory.open_session().is_ok());
        assert!(factory.open_session().is_ok());
        assert!(factory.base_headers.contains_key(USER_AGENT));
    }

    #[test]
    fn rejects_unencodable_user_agent() {
        let config = RollcallConfig {
            user_agent: "bad\nagent".into(),
            ..RollcallConfig::default()
        };
        assert!(ReqwestSessionFactory::new(&config).is_err());
    }
}
