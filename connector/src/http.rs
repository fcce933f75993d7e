//! HTTP transport to the user repository.

use async_trait::async_trait;
use oura_source_config::RepositoryConfig;
use reqwest::{Client, Method, StatusCode};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::client_credentials::ClientCredentials;
use crate::error::{RepositoryError, Result};

/// A request relative to the repository base URL.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<serde_json::Value>,
}

impl HttpRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            path: path.into(),
            body: None,
        }
    }

    pub fn post(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            method: Method::POST,
            path: path.into(),
            body: Some(body),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Executes requests against the repository.
///
/// Only transport-level problems are errors; every HTTP status comes back as a response.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse>;
}

/// How the connector authenticates itself to the repository.
#[derive(Clone)]
pub enum Auth {
    None,
    Basic { username: String, password: String },
    ClientCredentials(Arc<ClientCredentials>),
}

impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .finish_non_exhaustive(),
            Self::ClientCredentials(_) => f.write_str("ClientCredentials"),
        }
    }
}

/// [`Transport`] backed by a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
    base_url: String,
    auth: Auth,
}

impl ReqwestTransport {
    /// # Arguments
    /// * `base_url` - Repository root, e.g. `http://localhost:8080/rest-sources/backend`
    pub fn new(client: Client, base_url: &str, auth: Auth) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth,
        }
    }

    /// Build the client with configured timeouts and pick the auth mode:
    /// client credentials when a token URL is set, basic auth when only a
    /// client id and secret are, otherwise none.
    pub fn from_config(config: &RepositoryConfig) -> Result<Self> {
        let client = build_client(
            Duration::from_secs(config.connect_timeout_secs),
            Duration::from_secs(config.request_timeout_secs),
        )?;

        let auth = match (&config.token_url, &config.client_id, &config.client_secret) {
            (Some(token_url), Some(id), Some(secret)) => {
                Auth::ClientCredentials(Arc::new(ClientCredentials::new(
                    client.clone(),
                    token_url,
                    id,
                    secret,
                )))
            }
            (None, Some(id), Some(secret)) => Auth::Basic {
                username: id.clone(),
                password: secret.clone(),
            },
            (Some(_), _, _) => {
                return Err(RepositoryError::InvalidArgument(
                    "repository.token_url requires client_id and client_secret".to_string(),
                ));
            }
            _ => Auth::None,
        };

        tracing::debug!(url = %config.url, auth = ?auth, "Configured repository transport");
        Ok(Self::new(client, &config.url, auth))
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse> {
        let mut builder = self
            .client
            .request(request.method.clone(), self.url(&request.path));
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        builder = match &self.auth {
            Auth::None => builder,
            Auth::Basic { username, password } => builder.basic_auth(username, Some(password)),
            Auth::ClientCredentials(credentials) => {
                builder.bearer_auth(credentials.access_token().await?)
            }
        };

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(HttpResponse { status, body })
    }
}

pub(crate) fn build_client(connect_timeout: Duration, timeout: Duration) -> Result<Client> {
    Client::builder()
        .connect_timeout(connect_timeout)
        .timeout(timeout)
        .build()
        .map_err(|e| RepositoryError::InvalidArgument(format!("failed to build HTTP client: {e}")))
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        let response = self.send(&request).await?;

        if let Auth::ClientCredentials(credentials) = &self.auth {
            if response.status == StatusCode::UNAUTHORIZED.as_u16() {
                tracing::info!(path = %request.path, "Client token rejected, fetching a new one");
                credentials.invalidate().await;
                return self.send(&request).await;
            }
        }
        Ok(response)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    type Handler = Box<dyn Fn(&HttpRequest) -> Result<HttpResponse> + Send + Sync>;

    /// Scripted transport that records every request it receives.
    pub(crate) struct FakeTransport {
        handler: Handler,
        delay: Duration,
        requests: Mutex<Vec<HttpRequest>>,
    }

    impl FakeTransport {
        pub(crate) fn new<F>(handler: F) -> Self
        where
            F: Fn(&HttpRequest) -> Result<HttpResponse> + Send + Sync + 'static,
        {
            Self {
                handler: Box::new(handler),
                delay: Duration::ZERO,
                requests: Mutex::new(Vec::new()),
            }
        }

        /// Hold every response for `delay` (virtual time in paused tests).
        pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        pub(crate) fn requests(&self) -> Vec<HttpRequest> {
            self.requests.lock().unwrap().clone()
        }

        pub(crate) fn count(&self, method: &Method, path: &str) -> usize {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .filter(|r| &r.method == method && r.path == path)
                .count()
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
            self.requests.lock().unwrap().push(request.clone());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            (self.handler)(&request)
        }
    }

    pub(crate) fn json(status: u16, body: &serde_json::Value) -> Result<HttpResponse> {
        Ok(HttpResponse {
            status,
            body: body.to_string(),
        })
    }

    pub(crate) fn text(status: u16, body: &str) -> Result<HttpResponse> {
        Ok(HttpResponse {
            status,
            body: body.to_string(),
        })
    }
}
