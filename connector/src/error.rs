use thiserror::Error;

/// Failures surfaced by the user repository, its caches and the token endpoint.
///
/// Errors are `Clone` so that a cache can hand the outcome of one failed
/// refresh to every caller that waited on it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("user not authorized: {0}")]
    UnauthorizedUser(String),

    #[error("request failed: HTTP {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("connection error: {0}")]
    Connection(String),

    #[error("timeout")]
    Timeout,

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Status the repository uses to signal that a user revoked or never granted access.
pub const USER_UNAUTHORIZED_STATUS: u16 = 407;

impl RepositoryError {
    pub(crate) fn from_response(status: u16, message: String) -> Self {
        let msg = message.trim().to_string();
        match status {
            404 => Self::NotFound(msg),
            USER_UNAUTHORIZED_STATUS => Self::UnauthorizedUser(msg),
            504 => Self::Timeout,
            _ => Self::Upstream {
                status,
                message: msg,
            },
        }
    }

    /// Transport errors and non-success statuses other than not-found and
    /// user-unauthorized. These are retried after the retry interval and may
    /// be hidden behind a stale cached value meanwhile.
    pub fn is_upstream_failure(&self) -> bool {
        matches!(
            self,
            Self::Upstream { .. } | Self::Connection(_) | Self::Timeout | Self::Serialization(_)
        )
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::UnauthorizedUser(_))
    }
}

impl From<reqwest::Error> for RepositoryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::Serialization(err.to_string())
        } else {
            Self::Connection(err.to_string())
        }
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RepositoryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_statuses() {
        assert_eq!(
            RepositoryError::from_response(404, " users/a missing ".to_string()),
            RepositoryError::NotFound("users/a missing".to_string())
        );
        assert!(RepositoryError::from_response(407, String::new()).is_unauthorized());
        assert_eq!(
            RepositoryError::from_response(504, String::new()),
            RepositoryError::Timeout
        );
        assert_eq!(
            RepositoryError::from_response(503, "down".to_string()),
            RepositoryError::Upstream {
                status: 503,
                message: "down".to_string()
            }
        );
    }

    #[test]
    fn classifies_upstream_failures() {
        assert!(RepositoryError::Timeout.is_upstream_failure());
        assert!(RepositoryError::Connection("refused".to_string()).is_upstream_failure());
        assert!(!RepositoryError::NotFound("x".to_string()).is_upstream_failure());
        assert!(!RepositoryError::UnauthorizedUser("x".to_string()).is_upstream_failure());
    }
}
