//! One polling cycle of the ingestion pipeline.

use futures::stream::{self, StreamExt};

use crate::error::RepositoryError;
use crate::repository::UserRepository;
use crate::user::{OAuth2Credentials, User};

/// What one cycle found out about each user.
#[derive(Debug, Default)]
pub struct PollOutcome {
    /// Users with a usable access token.
    pub ready: Vec<(User, OAuth2Credentials)>,
    /// Users without authorization, skipped until the next cycle.
    pub skipped: Vec<String>,
    pub failed: Vec<(String, RepositoryError)>,
}

/// Refresh the directory if it is due, then resolve a token for every user,
/// at most `max_concurrent` at a time.
///
/// Only a directory that cannot be read at all fails the cycle.
pub async fn poll_once<R>(
    repository: &R,
    max_concurrent: usize,
) -> Result<PollOutcome, RepositoryError>
where
    R: UserRepository + ?Sized,
{
    if repository.has_pending_updates().await {
        if let Err(err) = repository.apply_pending_updates().await {
            tracing::warn!(error = %err, "Failed to update user directory");
        }
    }

    let users = repository.stream().await?;
    let results: Vec<_> = stream::iter(users)
        .map(|user| async move {
            let result = repository.get_access_token(&user).await;
            (user, result)
        })
        .buffer_unordered(max_concurrent.max(1))
        .collect()
        .await;

    let mut outcome = PollOutcome::default();
    for (user, result) in results {
        match result {
            Ok(credentials) => outcome.ready.push((user, credentials)),
            Err(RepositoryError::UnauthorizedUser(reason)) => {
                tracing::info!(user = %user.id, %reason, "Skipping unauthorized user");
                outcome.skipped.push(user.id);
            }
            Err(err) => {
                tracing::warn!(user = %user.id, error = %err, "Failed to get access token");
                outcome.failed.push((user.id, err));
            }
        }
    }

    tracing::info!(
        ready = outcome.ready.len(),
        skipped = outcome.skipped.len(),
        failed = outcome.failed.len(),
        "Poll cycle finished"
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{EntitySet, EntityStream};
    use crate::error::Result;
    use crate::repository::UserStream;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    struct StaticRepository {
        users: Arc<EntitySet<User>>,
        stale: AtomicBool,
        updates: AtomicUsize,
        fail_update: bool,
    }

    fn user(id: &str, authorized: bool) -> User {
        User {
            id: id.to_string(),
            project_id: "p".to_string(),
            user_id: id.to_string(),
            source_id: "s".to_string(),
            external_id: None,
            service_user_id: None,
            start_date: None,
            end_date: None,
            version: None,
            is_authorized: authorized,
        }
    }

    impl StaticRepository {
        fn new(users: Vec<User>) -> Self {
            Self {
                users: Arc::new(users.into_iter().collect()),
                stale: AtomicBool::new(true),
                updates: AtomicUsize::new(0),
                fail_update: false,
            }
        }
    }

    #[async_trait]
    impl UserRepository for StaticRepository {
        async fn lookup(&self, id: &str) -> Result<User> {
            self.users
                .get(&id.to_string())
                .cloned()
                .ok_or_else(|| RepositoryError::NotFound(id.to_string()))
        }

        async fn stream(&self) -> Result<UserStream> {
            Ok(EntityStream::new(Arc::clone(&self.users)))
        }

        async fn get_access_token(&self, user: &User) -> Result<OAuth2Credentials> {
            match user.id.as_str() {
                _ if !user.is_authorized => Err(RepositoryError::UnauthorizedUser(user.id.clone())),
                "broken" => Err(RepositoryError::Timeout),
                _ => Ok(OAuth2Credentials {
                    access_token: format!("token-{}", user.id),
                    expires_at: Utc::now() + chrono::Duration::hours(1),
                }),
            }
        }

        async fn refresh_access_token(&self, user: &User) -> Result<OAuth2Credentials> {
            self.get_access_token(user).await
        }

        async fn has_pending_updates(&self) -> bool {
            self.stale.load(Ordering::SeqCst)
        }

        async fn apply_pending_updates(&self) -> Result<()> {
            self.updates.fetch_add(1, Ordering::SeqCst);
            if self.fail_update {
                return Err(RepositoryError::Timeout);
            }
            self.stale.store(false, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn sorts_users_by_token_outcome() {
        let repo = StaticRepository::new(vec![
            user("a", true),
            user("b", false),
            user("broken", true),
        ]);

        let outcome = poll_once(&repo, 2).await.unwrap();
        assert_eq!(outcome.ready.len(), 1);
        assert_eq!(outcome.ready[0].1.access_token, "token-a");
        assert_eq!(outcome.skipped, vec!["b".to_string()]);
        assert_eq!(outcome.failed[0].0, "broken");
        assert_eq!(repo.updates.load(Ordering::SeqCst), 1);

        poll_once(&repo, 2).await.unwrap();
        assert_eq!(repo.updates.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_directory_update_is_not_fatal() {
        let mut repo = StaticRepository::new(vec![user("a", true)]);
        repo.fail_update = true;

        let outcome = poll_once(&repo, 0).await.unwrap();
        assert_eq!(outcome.ready.len(), 1);
    }

    #[tokio::test]
    async fn works_through_trait_object() {
        let repo: Arc<dyn UserRepository> = Arc::new(StaticRepository::new(vec![user("a", true)]));
        assert_eq!(repo.lookup("a").await.unwrap().id, "a");
        assert_eq!(poll_once(repo.as_ref(), 4).await.unwrap().ready.len(), 1);
    }
}
