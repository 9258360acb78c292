//! Login against the Sankhya gateway.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

use crate::error::LoginError;
use crate::token::LoginTransport;

/// Static credentials presented on every login.
#[derive(Clone)]
pub struct LoginCredentials {
    pub token: String,
    pub app_key: String,
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for LoginCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginCredentials")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl From<&sankhya_config::SankhyaConfig> for LoginCredentials {
    fn from(config: &sankhya_config::SankhyaConfig) -> Self {
        Self {
            token: config.token.clone(),
            app_key: config.app_key.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
        }
    }
}

/// [`LoginTransport`] that POSTs the credentials as headers to the login endpoint.
#[derive(Clone)]
pub struct SankhyaLogin {
    client: Client,
    url: String,
    credentials: LoginCredentials,
}

impl SankhyaLogin {
    pub fn new(
        base_url: &str,
        login_path: &str,
        credentials: LoginCredentials,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: join_url(base_url, login_path),
            credentials,
        })
    }

    pub fn from_config(config: &sankhya_config::SankhyaConfig) -> Result<Self, reqwest::Error> {
        Self::new(
            &config.base_url,
            &config.login_path,
            LoginCredentials::from(config),
            config.login_timeout(),
        )
    }
}

#[async_trait]
impl LoginTransport for SankhyaLogin {
    async fn login(&self) -> Result<String, LoginError> {
        let response = self
            .client
            .post(&self.url)
            .header("token", &self.credentials.token)
            .header("appkey", &self.credentials.app_key)
            .header("username", &self.credentials.username)
            .header("password", &self.credentials.password)
            .send()
            .await
            .map_err(|e| transport_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LoginError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| LoginError::MalformedResponse(e.to_string()))?;
        extract_bearer(&body)
    }
}

/// The bearer token is `bearerToken`, or `token` on older gateways.
fn extract_bearer(body: &Value) -> Result<String, LoginError> {
    ["bearerToken", "token"]
        .iter()
        .find_map(|key| body.get(key).and_then(Value::as_str))
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .ok_or_else(|| LoginError::MalformedResponse(body.to_string()))
}

fn transport_error(err: &reqwest::Error) -> LoginError {
    LoginError::Transport {
        message: err.to_string(),
        transient: err.is_timeout() || err.is_connect() || err.is_request(),
    }
}

pub(crate) fn join_url(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
