//! # Identity Provider
//!
//! Produces the bearer credential the relay expects as the first frame of
//! every connection. The stock provider signs a short-lived RS256 assertion
//! with a service-account key and exchanges it for an identity token at
//! Google's OAuth endpoint.

use crate::config::IdentityConfig;
use crate::error::{AgentError, Result};
use async_trait::async_trait;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

pub const GOOGLE_TOKEN_ENDPOINT_URL: &str = "https://www.googleapis.com/oauth2/v4/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: u64 = 3600;

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// A fresh bearer token; called once per relay connection.
    async fn bearer_token(&self) -> Result<String>;
}

/// Fields of a service-account key file this provider needs.
#[derive(Debug, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key_id: String,
    pub private_key: String,
}

/// Claims of the self-signed assertion.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AssertionClaims {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub iat: u64,
    pub exp: u64,
    pub target_audience: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    id_token: String,
}

pub struct ServiceAccountIdentity {
    key_file: PathBuf,
    audience: String,
    token_endpoint: String,
    http: reqwest::Client,
    timeout: Duration,
}

impl ServiceAccountIdentity {
    /// `timeout` bounds the whole token exchange.
    pub fn new(key_file: impl Into<PathBuf>, audience: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AgentError::Identity(format!("http client: {e}")))?;
        Ok(Self {
            key_file: key_file.into(),
            audience: audience.into(),
            token_endpoint: GOOGLE_TOKEN_ENDPOINT_URL.to_string(),
            http,
            timeout,
        })
    }

    pub fn from_config(config: &IdentityConfig, timeout: Duration) -> Result<Self> {
        Self::new(&config.service_account_file, &config.audience, timeout)
    }

    /// Exchange at a different endpoint; the assertion audience follows.
    pub fn with_token_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.token_endpoint = endpoint.into();
        self
    }

    async fn load_key(&self) -> Result<ServiceAccountKey> {
        let contents = tokio::fs::read_to_string(&self.key_file)
            .await
            .map_err(|e| AgentError::Identity(format!("{}: {e}", self.key_file.display())))?;
        serde_json::from_str(&contents)
            .map_err(|e| AgentError::Identity(format!("{}: {e}", self.key_file.display())))
    }

    /// Signs the assertion for `now` (seconds since the epoch).
    pub fn sign_assertion(&self, key: &ServiceAccountKey, now: u64) -> Result<String> {
        let claims = AssertionClaims {
            iss: key.client_email.clone(),
            sub: key.client_email.clone(),
            aud: self.token_endpoint.clone(),
            iat: now,
            exp: now + ASSERTION_LIFETIME_SECS,
            target_audience: self.audience.clone(),
        };
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(key.private_key_id.clone());

        let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())?;
        Ok(encode(&header, &claims, &signing_key)?)
    }

    async fn exchange(&self, assertion: &str) -> Result<String> {
        let form = [("grant_type", JWT_BEARER_GRANT), ("assertion", assertion)];
        let response = self
            .http
            .post(&self.token_endpoint)
            .form(&form)
            .send()
            .await
            .map_err(|e| self.exchange_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AgentError::Identity(format!(
                "token endpoint answered HTTP {status}"
            )));
        }
        let body: TokenResponse = response.json().await.map_err(|e| self.exchange_error(e))?;
        Ok(body.id_token)
    }

    fn exchange_error(&self, e: reqwest::Error) -> AgentError {
        if e.is_timeout() {
            AgentError::Timeout {
                operation: "token exchange".to_string(),
                timeout: self.timeout,
            }
        } else {
            AgentError::Identity(format!("token exchange failed: {e}"))
        }
    }
}

#[async_trait]
impl IdentityProvider for ServiceAccountIdentity {
    async fn bearer_token(&self) -> Result<String> {
        let key = self.load_key().await?;
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| AgentError::Identity(e.to_string()))?
            .as_secs();
        let assertion = self.sign_assertion(&key, now)?;
        debug!("Exchanging assertion for {} at {}", key.client_email, self.token_endpoint);
        self.exchange(&assertion).await
    }
}

#[cfg(test)]
pub(crate) struct StaticIdentity(pub &'static str);

#[cfg(test)]
#[async_trait]
impl IdentityProvider for StaticIdentity {
    async fn bearer_token(&self) -> Result<String> {
        Ok(self.0.to_string())
    }
}
