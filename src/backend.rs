// SPDX-License-Identifier: MIT

//! The portal backend collaborator.
//!
//! The backend is external to this crate and consumed only through its
//! documented contract: `POST /auth/eds/login`, `POST /auth/email/login`
//! and `GET /auth/me`. Authorization during normal API usage is a bearer
//! token from the current session.

use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::instrument;

use crate::error::BackendError;

/// Payload of both login endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
    /// The effective role, when the backend assigns one at login.
    #[serde(default)]
    pub role: Option<String>,
    /// Set on first EDS login, before the profile is completed.
    #[serde(default)]
    pub is_new_user: Option<bool>,
    /// Whatever profile fields the backend includes alongside the token.
    #[serde(flatten)]
    pub profile: Map<String, Value>,
}

/// Payload of `GET /auth/me`.
#[derive(Debug, Clone, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub is_superuser: Option<bool>,
    #[serde(default)]
    pub is_new_user: Option<bool>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

#[derive(Debug, Serialize)]
struct EdsLoginRequest<'a> {
    signed_xml: &'a str,
}

#[derive(Debug, Serialize)]
struct EmailLoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

/// HTTP client for the portal backend.
#[derive(Debug, Clone)]
pub struct BackendClient {
    http: Client,
    base_url: String,
}

impl BackendClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );
        let http = Client::builder()
            .default_headers(headers)
            .build()
            .expect("reqwest client construction only fails on invalid TLS backends");

        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Exchange a signed challenge for a session token.
    #[instrument(level = "debug", skip_all)]
    pub async fn eds_login(&self, signed_xml: &str) -> Result<LoginResponse, BackendError> {
        let request = self
            .http
            .post(self.url("/auth/eds/login"))
            .json(&EdsLoginRequest { signed_xml });
        execute(request).await
    }

    /// Authenticate with email and password.
    #[instrument(level = "debug", skip_all)]
    pub async fn email_login(
        &self,
        email: &str,
        password: &str,
    ) -> Result<LoginResponse, BackendError> {
        let request = self
            .http
            .post(self.url("/auth/email/login"))
            .json(&EmailLoginRequest { email, password });
        execute(request).await
    }

    /// Fetch the canonical profile of the authenticated user.
    #[instrument(level = "debug", skip_all)]
    pub async fn me(&self, token: &str) -> Result<Profile, BackendError> {
        let request = self.http.get(self.url("/auth/me")).bearer_auth(token);
        execute(request).await
    }
}

async fn execute<T: serde::de::DeserializeOwned>(
    request: reqwest::RequestBuilder,
) -> Result<T, BackendError> {
    let response = request.send().await?;
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED {
        tracing::debug!("The backend rejected the request as unauthorized");
        return Err(BackendError::Unauthorized);
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        tracing::warn!(%status, "Backend request failed");
        return Err(BackendError::Status { status, body });
    }
    Ok(response.json::<T>().await?)
}
