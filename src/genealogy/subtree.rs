//! Whole-subtree operations: ID sets, per-level counts, binary legs.

use super::GenealogyService;
use crate::cache::{self, keys};
use crate::domain::{Position, UserId};
use crate::error::EngineError;
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelCount {
    pub level: i64,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegSummary {
    pub user_id: UserId,
    /// Members in the leg, its top member included.
    pub size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BinaryLegs {
    pub user_id: UserId,
    pub left: Option<LegSummary>,
    pub right: Option<LegSummary>,
}

impl GenealogyService {
    /// Every descendant ID of `user_id` (the root excluded), level by level.
    ///
    /// `max_depth` of None walks the whole subtree.
    pub async fn get_downline_ids(
        &self,
        user_id: &UserId,
        max_depth: Option<usize>,
    ) -> Result<Vec<UserId>, EngineError> {
        let depth_key = max_depth.unwrap_or(super::UNBOUNDED);
        let key = keys::downline_ids(user_id, depth_key);
        let namespaces = [cache::subtree_namespace(user_id)];
        cache::get_or_compute(
            self.cache.as_ref(),
            &key,
            self.config.cache_ttl,
            &namespaces,
            || async {
                self.require_user(user_id).await?;
                self.collect_downline_ids(user_id, max_depth).await
            },
        )
        .await
    }

    /// Uncached breadth-first walk behind [`get_downline_ids`](Self::get_downline_ids).
    pub(crate) async fn collect_downline_ids(
        &self,
        user_id: &UserId,
        max_depth: Option<usize>,
    ) -> Result<Vec<UserId>, EngineError> {
        let max_depth = max_depth.unwrap_or(super::UNBOUNDED);
        let batch_size = self.config.tree_batch_size.max(1);

        let mut visited = HashSet::from([user_id.clone()]);
        let mut ids = Vec::new();
        let mut frontier = vec![user_id.clone()];
        let mut depth = 0usize;

        while !frontier.is_empty() && depth < max_depth {
            let batches = try_join_all(
                frontier
                    .chunks(batch_size)
                    .map(|batch| self.repo.child_ids_of(batch)),
            )
            .await?;

            let mut next = Vec::new();
            for (child, _parent) in batches.into_iter().flatten() {
                if visited.insert(child.clone()) {
                    ids.push(child.clone());
                    next.push(child);
                }
            }
            depth += 1;
            debug!(root = %user_id, depth, found = next.len(), "Downline level loaded");
            frontier = next;
        }

        Ok(ids)
    }

    /// Descendant counts per level, from one aggregate query.
    pub async fn get_level_counts(
        &self,
        user_id: &UserId,
        max_depth: usize,
    ) -> Result<Vec<LevelCount>, EngineError> {
        if max_depth == 0 {
            return Err(EngineError::Validation("maxDepth must be at least 1".to_string()));
        }
        let key = keys::level_counts(user_id, max_depth);
        let namespaces = [cache::subtree_namespace(user_id)];
        cache::get_or_compute(
            self.cache.as_ref(),
            &key,
            self.config.cache_ttl,
            &namespaces,
            || async {
                self.require_user(user_id).await?;
                let rows = self.repo.level_counts(user_id, max_depth).await?;
                Ok::<_, EngineError>(rows
                    .into_iter()
                    .map(|(level, count)| LevelCount { level, count })
                    .collect())
            },
        )
        .await
    }

    /// Left and right children of a binary-plan sponsor with each leg's size.
    pub async fn get_binary_legs(&self, user_id: &UserId) -> Result<BinaryLegs, EngineError> {
        let key = keys::binary_legs(user_id);
        let namespaces = [cache::subtree_namespace(user_id)];
        cache::get_or_compute(
            self.cache.as_ref(),
            &key,
            self.config.cache_ttl,
            &namespaces,
            || async {
                self.require_user(user_id).await?;
                Ok::<_, EngineError>(BinaryLegs {
                    user_id: user_id.clone(),
                    left: self.leg(user_id, Position::Left).await?,
                    right: self.leg(user_id, Position::Right).await?,
                })
            },
        )
        .await
    }

    async fn leg(
        &self,
        user_id: &UserId,
        position: Position,
    ) -> Result<Option<LegSummary>, EngineError> {
        let Some(top) = self.repo.child_at_position(user_id, position).await? else {
            return Ok(None);
        };
        let below = self.collect_downline_ids(&top, None).await?;
        Ok(Some(LegSummary {
            size: below.len() + 1,
            user_id: top,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::NoCache;
    use crate::config::CompensationConfig;
    use crate::db::{init_db, Repository};
    use crate::domain::{Decimal, TimeMs, User};
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn setup(batch: usize) -> (GenealogyService, Arc<Repository>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("test.db")
            .to_string_lossy()
            .to_string();
        let pool = init_db(&db_path).await.expect("init_db failed");
        let repo = Arc::new(Repository::new(pool));
        let config = CompensationConfig {
            tree_batch_size: batch,
            ..Default::default()
        };
        let service = GenealogyService::new(repo.clone(), Arc::new(NoCache), config);
        (service, repo, temp_dir)
    }

    fn member(id: &str, upline: Option<&str>, position: Option<Position>) -> User {
        User {
            id: UserId::new(id),
            name: id.to_string(),
            email: None,
            rank_id: None,
            upline_id: upline.map(UserId::new),
            position,
            wallet_balance: Decimal::zero(),
            created_at: TimeMs::new(0),
        }
    }

    #[tokio::test]
    async fn test_downline_ids_respects_depth_and_small_batches() {
        let (service, repo, _temp) = setup(1).await;
        repo.insert_user_record(&member("r", None, None)).await.unwrap();
        for (id, up) in [("a", "r"), ("b", "r"), ("a1", "a"), ("b1", "b"), ("a1x", "a1")] {
            repo.insert_user_record(&member(id, Some(up), None)).await.unwrap();
        }

        let all = service.get_downline_ids(&UserId::new("r"), None).await.unwrap();
        assert_eq!(all.len(), 5);
        assert!(!all.contains(&UserId::new("r")));

        let two = service.get_downline_ids(&UserId::new("r"), Some(2)).await.unwrap();
        assert_eq!(two.len(), 4);
        // Breadth-first: level 1 before level 2.
        assert_eq!(&two[..2], &[UserId::new("a"), UserId::new("b")]);
    }

    #[tokio::test]
    async fn test_level_counts_rejects_zero_depth() {
        let (service, repo, _temp) = setup(100).await;
        repo.insert_user_record(&member("r", None, None)).await.unwrap();
        assert!(matches!(
            service.get_level_counts(&UserId::new("r"), 0).await,
            Err(EngineError::Validation(_))
        ));
        assert!(service
            .get_level_counts(&UserId::new("r"), 3)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_binary_legs() {
        let (service, repo, _temp) = setup(100).await;
        repo.insert_user_record(&member("r", None, None)).await.unwrap();
        repo.insert_user_record(&member("l", Some("r"), Some(Position::Left)))
            .await
            .unwrap();
        repo.insert_user_record(&member("l1", Some("l"), None)).await.unwrap();
        repo.insert_user_record(&member("l2", Some("l"), None)).await.unwrap();

        let legs = service.get_binary_legs(&UserId::new("r")).await.unwrap();
        assert_eq!(
            legs.left,
            Some(LegSummary {
                user_id: UserId::new("l"),
                size: 3
            })
        );
        assert_eq!(legs.right, None);
    }
}
