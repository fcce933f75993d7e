//! Typed calls to the user repository REST API.

use reqwest::Url;
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::Arc;

use oura_source_config::RepositoryConfig;

use crate::error::{RepositoryError, Result};
use crate::http::{HttpRequest, ReqwestTransport, Transport};
use crate::metrics;
use crate::user::{OAuth2Credentials, User, UsersResponse};

const TOKEN_CURRENT: &str = "current";
const TOKEN_REFRESH: &str = "refresh";

/// Client for the user repository: user directory and per-user Oura tokens.
#[derive(Clone)]
pub struct RepositoryClient {
    transport: Arc<dyn Transport>,
}

impl fmt::Debug for RepositoryClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepositoryClient").finish_non_exhaustive()
    }
}

impl RepositoryClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    pub fn from_config(config: &RepositoryConfig) -> Result<Self> {
        Ok(Self::new(Arc::new(ReqwestTransport::from_config(config)?)))
    }

    /// All users registered for `source_type`.
    pub async fn users(&self, source_type: &str) -> Result<Vec<User>> {
        let response: UsersResponse = self
            .request_json(HttpRequest::get(relative_path(
                &["users"],
                &[("source-type", source_type)],
            )?))
            .await?;
        Ok(response.users)
    }

    pub async fn user(&self, id: &str) -> Result<User> {
        self.request_json(HttpRequest::get(relative_path(&["users", id], &[])?))
            .await
    }

    /// The token the repository currently holds for the user.
    pub async fn current_token(&self, id: &str) -> Result<OAuth2Credentials> {
        let path = relative_path(&["users", id, "token"], &[])?;
        let result = self.request_json(HttpRequest::get(path)).await;
        record_token_outcome(TOKEN_CURRENT, &result);
        result
    }

    /// Ask the repository to refresh the user's token with Oura.
    pub async fn new_token(&self, id: &str) -> Result<OAuth2Credentials> {
        let path = relative_path(&["users", id, "token"], &[])?;
        let result = self
            .request_json(HttpRequest::post(path, serde_json::json!({})))
            .await;
        record_token_outcome(TOKEN_REFRESH, &result);
        result
    }

    async fn request_json<T: DeserializeOwned>(&self, request: HttpRequest) -> Result<T> {
        let path = request.path.clone();
        let response = self.transport.execute(request).await?;

        if response.status == 404 {
            return Err(RepositoryError::NotFound(format!("URL {path} does not exist")));
        }
        if !response.is_success() || response.body.trim().is_empty() {
            let message = format!(
                "Failed to make request (HTTP status code {}): {}",
                response.status, response.body
            );
            tracing::debug!(%path, status = response.status, "Repository request failed");
            return Err(RepositoryError::from_response(response.status, message));
        }

        Ok(serde_json::from_str(&response.body)?)
    }
}

/// Join percent-encoded path segments and query pairs into a path relative
/// to the repository base URL.
fn relative_path(segments: &[&str], query: &[(&str, &str)]) -> Result<String> {
    let mut url = Url::parse("http://repository/")
        .map_err(|e| RepositoryError::InvalidArgument(e.to_string()))?;
    url.path_segments_mut()
        .map_err(|()| RepositoryError::InvalidArgument("URL cannot have a path".to_string()))?
        .pop_if_empty()
        .extend(segments);
    if !query.is_empty() {
        url.query_pairs_mut().extend_pairs(query);
    }

    let path = url.path().trim_start_matches('/');
    Ok(match url.query() {
        Some(query) => format!("{path}?{query}"),
        None => path.to_string(),
    })
}

fn record_token_outcome<T>(kind: &'static str, result: &Result<T>) {
    let outcome = if result.is_ok() {
        metrics::OUTCOME_SUCCESS
    } else {
        metrics::OUTCOME_FAILURE
    };
    metrics::record_token_request(kind, outcome);
}
