//! OAuth2 client-credentials token of the connector itself.

use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::Client;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

use crate::cache::{CacheConfig, CachedValue};
use crate::error::{RepositoryError, Result};

const TOKEN_REFRESH_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);
const TOKEN_RETRY_INTERVAL: Duration = Duration::from_secs(30);
/// A token this close to expiry is fetched again.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

fn default_expires_in() -> u64 {
    3600
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

#[derive(Clone)]
pub(crate) struct ClientToken {
    access_token: String,
    expires_at: Instant,
}

impl ClientToken {
    fn usable(&self) -> bool {
        Instant::now() + EXPIRY_MARGIN < self.expires_at
    }
}

/// Cached client-credentials token, fetched from the token URL on demand.
pub struct ClientCredentials {
    token: CachedValue<ClientToken>,
}

impl fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentials").finish_non_exhaustive()
    }
}

impl ClientCredentials {
    pub fn new(client: Client, token_url: &str, client_id: &str, client_secret: &str) -> Self {
        let token_url = token_url.to_string();
        let client_id = client_id.to_string();
        let client_secret = client_secret.to_string();
        Self::with_fetch(move || {
            request_token(
                client.clone(),
                token_url.clone(),
                client_id.clone(),
                client_secret.clone(),
            )
            .boxed()
        })
    }

    pub(crate) fn with_fetch<F>(fetch: F) -> Self
    where
        F: Fn() -> BoxFuture<'static, Result<ClientToken>> + Send + Sync + 'static,
    {
        let config = CacheConfig {
            refresh_interval: TOKEN_REFRESH_INTERVAL,
            retry_interval: TOKEN_RETRY_INTERVAL,
        };
        Self {
            token: CachedValue::new("client_token", config, fetch),
        }
    }

    /// Bearer token for repository requests.
    pub async fn access_token(&self) -> Result<String> {
        self.token
            .get_matching(ClientToken::usable)
            .await
            .map(|token| token.access_token)
    }

    /// Forget the token, e.g. after the repository rejected it.
    pub async fn invalidate(&self) {
        self.token.invalidate().await;
    }
}

async fn request_token(
    client: Client,
    token_url: String,
    client_id: String,
    client_secret: String,
) -> Result<ClientToken> {
    tracing::debug!(%token_url, %client_id, "Requesting client credentials token");
    let response = client
        .post(&token_url)
        .basic_auth(&client_id, Some(&client_secret))
        .form(&[("grant_type", "client_credentials")])
        .send()
        .await?;

    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(RepositoryError::Upstream {
            status: status.as_u16(),
            message: format!("client credentials grant failed: {}", body.trim()),
        });
    }

    let token: TokenResponse = serde_json::from_str(&body)?;
    Ok(ClientToken {
        access_token: token.access_token,
        expires_at: Instant::now() + Duration::from_secs(token.expires_in),
    })
}
