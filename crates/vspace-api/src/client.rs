//! HTTP client for the account endpoints of the storage service.
//!
//! Endpoints:
//!   - `GET  /api/account/master-key-salt` → `{ "salt": "<base64>" }`
//!   - `GET  /api/vaultspaces/keys`        → `{ "keys": [{ "vaultspace_id", "encrypted_key" }] }`
//!   - `POST /api/account/password`        ← `{ current_password, new_password, reencrypted_keys }`
//!
//! A bearer token is attached to every request when configured.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;
use vspace_core::config::ApiConfig;
use vspace_core::{AccountBackend, BackendError, PasswordUpdate, WrappedKeyRecord};

/// REST implementation of [`AccountBackend`].
pub struct HttpAccountBackend {
    client: Client,
    base_url: String,
    access_token: Option<SecretString>,
}

#[derive(Deserialize)]
struct SaltResponse {
    salt: String,
}

#[derive(Deserialize)]
struct KeysResponse {
    keys: Vec<WrappedKeyRecord>,
}

#[derive(Serialize)]
struct PasswordChangeBody<'a> {
    current_password: &'a str,
    new_password: &'a str,
    reencrypted_keys: &'a [WrappedKeyRecord],
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(alias = "message")]
    error: String,
}

impl HttpAccountBackend {
    pub fn new(config: &ApiConfig, access_token: Option<SecretString>) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| BackendError::Network(format!("building HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            access_token,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.access_token {
            Some(token) => request.bearer_auth(token.expose_secret()),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, BackendError> {
        let resp = self
            .authorized(request)
            .send()
            .await
            .map_err(|e| BackendError::Network(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let text = resp.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&text)
            .map(|b| b.error)
            .unwrap_or(text);
        Err(BackendError::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}

async fn decode<T: for<'de> Deserialize<'de>>(resp: Response) -> Result<T, BackendError> {
    resp.json().await.map_err(|e| {
        if e.is_decode() {
            BackendError::Malformed(e.to_string())
        } else {
            BackendError::Network(e.to_string())
        }
    })
}

#[async_trait]
impl AccountBackend for HttpAccountBackend {
    async fn fetch_salt(&self) -> Result<String, BackendError> {
        let resp = self
            .send(self.client.get(self.url("/api/account/master-key-salt")))
            .await?;
        let body: SaltResponse = decode(resp).await?;
        debug!("fetched master-key salt");
        Ok(body.salt)
    }

    async fn list_wrapped_keys(&self) -> Result<Vec<WrappedKeyRecord>, BackendError> {
        let resp = self
            .send(self.client.get(self.url("/api/vaultspaces/keys")))
            .await?;
        let body: KeysResponse = decode(resp).await?;
        debug!(count = body.keys.len(), "fetched wrapped vaultspace keys");
        Ok(body.keys)
    }

    async fn submit_password_change(&self, update: PasswordUpdate) -> Result<(), BackendError> {
        let body = PasswordChangeBody {
            current_password: update.current_password.expose_secret(),
            new_password: update.new_password.expose_secret(),
            reencrypted_keys: &update.reencrypted_keys,
        };
        self.send(self.client.post(self.url("/api/account/password")).json(&body))
            .await?;
        debug!(
            keys = update.reencrypted_keys.len(),
            "password change accepted"
        );
        Ok(())
    }
}
