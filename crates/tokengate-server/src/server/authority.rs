//! Refresh-endpoint client.
//!
//! [`HttpAuthority`] verifies a token by exchanging it at the configured
//! refresh endpoint: `POST` with the token as a form field, success being a
//! `200` whose JSON body carries an `access_token`.

use anyhow::Context;
use core::time::Duration;
use reqwest::{
    Client, StatusCode, Url,
    header::{CONTENT_TYPE, HeaderMap, HeaderValue},
};
use serde::Deserialize;
use tokengate::{Authority, AuthorityError};

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded;charset=UTF-8";

#[derive(Deserialize)]
struct RefreshResponse {
    access_token: String,
}

/// [`Authority`] backed by an HTTP refresh endpoint.
#[derive(Clone, Debug)]
pub struct HttpAuthority {
    client: Client,
    url: Url,
    headers: HeaderMap,
}

impl HttpAuthority {
    /// Builds a client whose own request timeout is `timeout`.
    ///
    /// The validator applies its per-call timeout on top, so this only
    /// guards against a client left running after the caller gave up.
    pub fn new(url: Url, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("build reqwest client")?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(FORM_CONTENT_TYPE));

        Ok(Self {
            client,
            url,
            headers,
        })
    }
}

impl Authority for HttpAuthority {
    async fn verify(&self, token: &str) -> Result<String, AuthorityError> {
        let response = self
            .client
            .post(self.url.clone())
            .form(&[("refresh_token", token)])
            // Replaces the charset-less content type set by `form`.
            .headers(self.headers.clone())
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(AuthorityError::Rejected {
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(transport_error)?;
        let refreshed: RefreshResponse = serde_json::from_slice(&body)
            .map_err(|e| AuthorityError::Malformed(e.to_string()))?;

        Ok(refreshed.access_token)
    }
}

fn transport_error(err: reqwest::Error) -> AuthorityError {
    if err.is_timeout() {
        AuthorityError::Timeout
    } else {
        AuthorityError::Transport(err.without_url().to_string())
    }
}
