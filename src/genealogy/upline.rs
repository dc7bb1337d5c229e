use super::GenealogyService;
use crate::cache::{self, keys};
use crate::domain::{User, UserId};
use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::warn;

/// An ancestor and its distance from the start member (1 = direct sponsor).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UplineEntry {
    pub user: User,
    pub level: usize,
}

impl GenealogyService {
    /// Ancestor chain of `user_id`, nearest first, at most `max_levels` long.
    ///
    /// Cached under the member's upline namespace.
    pub async fn get_upline(
        &self,
        user_id: &UserId,
        max_levels: usize,
    ) -> Result<Vec<UplineEntry>, EngineError> {
        let key = keys::upline(user_id, max_levels);
        let namespaces = [cache::upline_namespace(user_id)];
        cache::get_or_compute(
            self.cache.as_ref(),
            &key,
            self.config.cache_ttl,
            &namespaces,
            || self.walk_upline(user_id, max_levels),
        )
        .await
    }

    /// Uncached ancestor walk; used wherever money depends on the chain.
    pub async fn walk_upline(
        &self,
        user_id: &UserId,
        max_levels: usize,
    ) -> Result<Vec<UplineEntry>, EngineError> {
        let start = self.require_user(user_id).await?;

        let mut visited = HashSet::from([start.id.clone()]);
        let mut chain = Vec::new();
        let mut next = start.upline_id;

        while let Some(sponsor_id) = next {
            if chain.len() >= max_levels {
                break;
            }
            if !visited.insert(sponsor_id.clone()) {
                warn!(user = %user_id, sponsor = %sponsor_id, "Cycle in sponsorship chain");
                break;
            }
            let Some(sponsor) = self.repo.get_user(&sponsor_id).await? else {
                warn!(user = %user_id, sponsor = %sponsor_id, "Sponsor row missing, chain ends");
                break;
            };
            next = sponsor.upline_id.clone();
            let level = chain.len() + 1;
            chain.push(UplineEntry {
                user: sponsor,
                level,
            });
        }

        Ok(chain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::NoCache;
    use crate::config::CompensationConfig;
    use crate::db::{init_db, Repository};
    use crate::domain::{Decimal, TimeMs};
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn setup() -> (GenealogyService, Arc<Repository>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("test.db")
            .to_string_lossy()
            .to_string();
        let pool = init_db(&db_path).await.expect("init_db failed");
        let repo = Arc::new(Repository::new(pool));
        let service =
            GenealogyService::new(repo.clone(), Arc::new(NoCache), CompensationConfig::default());
        (service, repo, temp_dir)
    }

    fn member(id: &str, upline: Option<&str>) -> User {
        User {
            id: UserId::new(id),
            name: id.to_string(),
            email: None,
            rank_id: None,
            upline_id: upline.map(UserId::new),
            position: None,
            wallet_balance: Decimal::zero(),
            created_at: TimeMs::new(0),
        }
    }

    #[tokio::test]
    async fn test_chain_levels_follow_sponsors() {
        let (service, repo, _temp) = setup().await;
        repo.insert_user_record(&member("a", None)).await.unwrap();
        repo.insert_user_record(&member("b", Some("a"))).await.unwrap();
        repo.insert_user_record(&member("c", Some("b"))).await.unwrap();
        repo.insert_user_record(&member("d", Some("c"))).await.unwrap();

        let chain = service.walk_upline(&UserId::new("d"), 10).await.unwrap();
        let ids: Vec<_> = chain.iter().map(|e| (e.user.id.as_str(), e.level)).collect();
        assert_eq!(ids, vec![("c", 1), ("b", 2), ("a", 3)]);

        let short = service.walk_upline(&UserId::new("d"), 2).await.unwrap();
        assert_eq!(short.len(), 2);
        assert!(service
            .walk_upline(&UserId::new("a"), 10)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_unknown_user_is_not_found() {
        let (service, _repo, _temp) = setup().await;
        let err = service
            .walk_upline(&UserId::new("ghost"), 10)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_cycle_terminates() {
        let (service, repo, _temp) = setup().await;
        repo.insert_user_record(&member("a", None)).await.unwrap();
        repo.insert_user_record(&member("b", Some("a"))).await.unwrap();
        // Corrupt the relation: a <- b <- a.
        sqlx::query("UPDATE users SET upline_id = 'b' WHERE id = 'a'")
            .execute(repo.pool())
            .await
            .unwrap();

        let chain = service.walk_upline(&UserId::new("b"), 100).await.unwrap();
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].user.id, UserId::new("a"));
    }
}
