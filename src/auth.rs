use chrono::{DateTime, Duration, Utc};
use log::debug;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::error::{ProviderError, Result};

const TOKEN_SCOPE: &str = "https://management.azure.com/.default";

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

/// Client-credentials token source for the Azure management plane. Tokens are
/// cached in-process and renewed a minute before they expire so in-flight
/// calls never carry a stale one.
pub struct TokenProvider {
    http: Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    cache: Mutex<Option<CachedToken>>,
}

impl TokenProvider {
    pub fn new(http: Client, tenant_id: &str, client_id: String, client_secret: String) -> Self {
        Self {
            http,
            token_url: format!("https://login.microsoftonline.com/{tenant_id}/oauth2/v2.0/token"),
            client_id,
            client_secret,
            cache: Mutex::new(None),
        }
    }

    pub async fn bearer_token(&self) -> Result<String> {
        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.as_ref() {
            if cached.expires_at > Utc::now() {
                return Ok(cached.token.clone());
            }
        }

        let resp = self
            .http
            .post(&self.token_url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("scope", TOKEN_SCOPE),
            ])
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Auth(format!(
                "token request failed ({status}): {body}"
            )));
        }

        let token: TokenResponse = resp.json().await?;
        let lifetime = Duration::seconds((token.expires_in - 60).max(0));
        debug!("acquired management token, valid for {}s", lifetime.num_seconds());

        *cache = Some(CachedToken {
            token: token.access_token.clone(),
            expires_at: Utc::now() + lifetime,
        });
        Ok(token.access_token)
    }
}
