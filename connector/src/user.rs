//! Users and tokens as served by the user repository.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::cache::Entity;

/// A user registered for Oura data collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub project_id: String,
    pub user_id: String,
    #[serde(default)]
    pub source_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub is_authorized: bool,
}

/// Key under which a user's records are published.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservationKey {
    pub project_id: String,
    pub user_id: String,
    pub source_id: String,
}

impl User {
    /// `id#version`, or the plain id for unversioned users.
    pub fn versioned_id(&self) -> String {
        match &self.version {
            Some(version) => format!("{}#{}", self.id, version),
            None => self.id.clone(),
        }
    }

    pub fn observation_key(&self) -> ObservationKey {
        ObservationKey {
            project_id: self.project_id.clone(),
            user_id: self.user_id.clone(),
            source_id: self.source_id.clone(),
        }
    }
}

impl Entity for User {
    type Key = String;

    fn key(&self) -> String {
        self.id.clone()
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct UsersResponse {
    pub users: Vec<User>,
}

/// OAuth2 access token of one user for the Oura API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuth2Credentials {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

impl OAuth2Credentials {
    /// Grace window applied by [`is_expired`](Self::is_expired).
    pub const DEFAULT_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

    pub fn is_expired(&self) -> bool {
        self.expires_within(Self::DEFAULT_EXPIRY_MARGIN)
    }

    /// Whether the token expires before `margin` from now has passed.
    pub fn expires_within(&self, margin: Duration) -> bool {
        let margin =
            chrono::Duration::from_std(margin).unwrap_or_else(|_| chrono::Duration::zero());
        Utc::now() + margin >= self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_json() -> &'static str {
        r#"{
            "id": "4",
            "createdAt": "2023-01-01T00:00:00Z",
            "projectId": "radar-test",
            "userId": "f2c3",
            "sourceId": "oura-1",
            "externalId": "ext",
            "isAuthorized": true,
            "startDate": "2023-01-01T00:00:00Z",
            "endDate": "2024-01-01T00:00:00Z",
            "version": "2",
            "serviceUserId": "svc"
        }"#
    }

    #[test]
    fn parses_repository_user() {
        let user: User = serde_json::from_str(user_json()).unwrap();
        assert_eq!(user.id, "4");
        assert!(user.is_authorized);
        assert_eq!(user.versioned_id(), "4#2");
        assert_eq!(
            user.observation_key(),
            ObservationKey {
                project_id: "radar-test".to_string(),
                user_id: "f2c3".to_string(),
                source_id: "oura-1".to_string(),
            }
        );
    }

    #[test]
    fn missing_flags_default_to_unauthorized() {
        let user: User =
            serde_json::from_str(r#"{"id": "5", "projectId": "p", "userId": "u"}"#).unwrap();
        assert!(!user.is_authorized);
        assert_eq!(user.versioned_id(), "5");
        assert_eq!(user.key(), "5");
    }

    #[test]
    fn credentials_expiry_uses_margin() {
        let soon = OAuth2Credentials {
            access_token: "t".to_string(),
            expires_at: Utc::now() + chrono::Duration::seconds(30),
        };
        assert!(soon.is_expired());
        assert!(!soon.expires_within(Duration::ZERO));

        let later = OAuth2Credentials {
            access_token: "t".to_string(),
            expires_at: Utc::now() + chrono::Duration::hours(1),
        };
        assert!(!later.is_expired());

        let parsed: OAuth2Credentials = serde_json::from_str(
            r#"{"accessToken": "abc", "expiresAt": "2020-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert!(parsed.is_expired());
    }
}
