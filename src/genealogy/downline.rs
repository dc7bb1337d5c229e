//! Paginated downline trees, eager or lazy.

use super::GenealogyService;
use crate::cache::{self, keys};
use crate::db::{ChildFilter, ChildSort};
use crate::domain::{TimeMs, User, UserId};
use crate::error::EngineError;
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

/// Filter, sort and loading mode for a downline request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownlineOptions {
    #[serde(default)]
    pub filter: ChildFilter,
    #[serde(default)]
    pub sort: ChildSort,
    /// Load only the page of direct children and flag which have more.
    #[serde(default)]
    pub lazy: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownlineQuery {
    /// Depth below the root to load; clamped to the configured maximum.
    pub max_level: usize,
    /// 1-based page of direct children.
    pub page: u32,
    pub page_size: u32,
    pub options: DownlineOptions,
}

impl Default for DownlineQuery {
    fn default() -> Self {
        Self {
            max_level: 3,
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
            options: DownlineOptions::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenealogyNode {
    pub user: User,
    pub level: usize,
    pub children: Vec<GenealogyNode>,
    /// Children exist in the store that were not loaded into `children`.
    pub has_more_children: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: u32,
    pub page_size: u32,
    pub total: i64,
    pub total_pages: u32,
    pub has_next: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownlineMetadata {
    pub max_level: usize,
    pub lazy: bool,
    pub loaded_nodes: usize,
    pub generated_at: TimeMs,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownlineTree {
    pub user: User,
    pub children: Vec<GenealogyNode>,
    pub pagination: Pagination,
    pub metadata: DownlineMetadata,
}

/// Flat BFS arena; children always sit after their parent.
struct Loaded {
    user: User,
    level: usize,
    children: Vec<usize>,
    has_more_children: bool,
}

impl GenealogyService {
    /// One page of a member's direct children, each expanded to `max_level`
    /// (or flagged with `has_more_children` in lazy mode).
    ///
    /// Cached under the member's subtree namespace.
    pub async fn get_downline(
        &self,
        user_id: &UserId,
        query: &DownlineQuery,
    ) -> Result<DownlineTree, EngineError> {
        if query.page == 0 {
            return Err(EngineError::Validation("page must be at least 1".to_string()));
        }
        if query.page_size == 0 || query.page_size > MAX_PAGE_SIZE {
            return Err(EngineError::Validation(format!(
                "pageSize must be within 1..={}",
                MAX_PAGE_SIZE
            )));
        }
        if query.max_level == 0 {
            return Err(EngineError::Validation("maxLevel must be at least 1".to_string()));
        }
        let max_level = query.max_level.min(self.config.max_genealogy_depth);

        let canonical = serde_json::to_string(&query.options)
            .map_err(|e| EngineError::Validation(e.to_string()))?;
        let key = keys::downline(
            user_id,
            max_level,
            query.page,
            query.page_size,
            &cache::options_hash(&canonical),
        );
        let namespaces = [cache::subtree_namespace(user_id)];

        cache::get_or_compute(
            self.cache.as_ref(),
            &key,
            self.config.cache_ttl,
            &namespaces,
            || self.load_downline(user_id, query, max_level),
        )
        .await
    }

    /// Load one more level under any node (lazy expansion).
    pub async fn expand_node(
        &self,
        user_id: &UserId,
        page: u32,
        page_size: u32,
        options: &DownlineOptions,
    ) -> Result<DownlineTree, EngineError> {
        let query = DownlineQuery {
            max_level: 1,
            page,
            page_size,
            options: DownlineOptions {
                lazy: true,
                ..options.clone()
            },
        };
        self.get_downline(user_id, &query).await
    }

    async fn load_downline(
        &self,
        user_id: &UserId,
        query: &DownlineQuery,
        max_level: usize,
    ) -> Result<DownlineTree, EngineError> {
        let root = self.require_user(user_id).await?;
        let filter: &ChildFilter = &query.options.filter;
        let offset = i64::from(query.page - 1) * i64::from(query.page_size);

        let total = self.repo.count_children(user_id, filter).await?;
        let page_rows = self
            .repo
            .list_children(
                user_id,
                filter,
                &query.options.sort,
                i64::from(query.page_size),
                offset,
            )
            .await?;

        let mut arena: Vec<Loaded> = page_rows
            .into_iter()
            .map(|user| Loaded {
                user,
                level: 1,
                children: Vec::new(),
                has_more_children: false,
            })
            .collect();
        let direct = arena.len();

        let deepest = if query.options.lazy {
            (0..direct).collect()
        } else {
            self.expand_levels(&root, &mut arena, max_level).await?
        };
        self.flag_unloaded_children(&mut arena, &deepest).await?;

        let loaded_nodes = arena.len();
        let children = assemble(arena, direct);
        let total_pages = u32::try_from((total + i64::from(query.page_size) - 1) / i64::from(query.page_size))
            .unwrap_or(u32::MAX);

        debug!(root = %user_id, loaded_nodes, lazy = query.options.lazy, "Downline loaded");
        Ok(DownlineTree {
            user: root,
            children,
            pagination: Pagination {
                page: query.page,
                page_size: query.page_size,
                total,
                total_pages,
                has_next: query.page < total_pages,
            },
            metadata: DownlineMetadata {
                max_level,
                lazy: query.options.lazy,
                loaded_nodes,
                generated_at: TimeMs::now(),
            },
        })
    }

    /// Expand the level-1 nodes of `arena` down to `max_level`, one level at a
    /// time, with parallel child lookups inside each fixed-size batch.
    /// Returns the arena indices of the last loaded level.
    async fn expand_levels(
        &self,
        root: &User,
        arena: &mut Vec<Loaded>,
        max_level: usize,
    ) -> Result<Vec<usize>, EngineError> {
        let batch_size = self.config.tree_batch_size.max(1);
        let mut visited: HashSet<UserId> = std::iter::once(root.id.clone())
            .chain(arena.iter().map(|n| n.user.id.clone()))
            .collect();
        let mut frontier: Vec<usize> = (0..arena.len()).collect();

        for level in 2..=max_level {
            if frontier.is_empty() {
                break;
            }
            let mut next = Vec::new();
            for batch in frontier.chunks(batch_size) {
                let lookups = batch.iter().map(|&idx| self.repo.get_children(&arena[idx].user.id));
                let results = try_join_all(lookups).await?;

                for (&parent, children) in batch.iter().zip(results) {
                    for child in children {
                        if !visited.insert(child.id.clone()) {
                            continue;
                        }
                        let idx = arena.len();
                        arena.push(Loaded {
                            user: child,
                            level,
                            children: Vec::new(),
                            has_more_children: false,
                        });
                        arena[parent].children.push(idx);
                        next.push(idx);
                    }
                }
            }
            frontier = next;
        }

        Ok(frontier)
    }

    /// Set `has_more_children` on the given nodes from one grouped count.
    async fn flag_unloaded_children(
        &self,
        arena: &mut [Loaded],
        indices: &[usize],
    ) -> Result<(), EngineError> {
        if indices.is_empty() {
            return Ok(());
        }
        let ids: Vec<UserId> = indices.iter().map(|&i| arena[i].user.id.clone()).collect();
        let counts = self.repo.count_children_many(&ids).await?;
        for &i in indices {
            arena[i].has_more_children = counts.get(&arena[i].user.id).copied().unwrap_or(0) > 0;
        }
        Ok(())
    }
}

/// Turn the arena into nested nodes; the first `direct` entries are the roots.
fn assemble(arena: Vec<Loaded>, direct: usize) -> Vec<GenealogyNode> {
    let mut built: Vec<Option<GenealogyNode>> = (0..arena.len()).map(|_| None).collect();
    for (idx, loaded) in arena.into_iter().enumerate().rev() {
        let children = loaded
            .children
            .iter()
            .filter_map(|&c| built[c].take())
            .collect();
        built[idx] = Some(GenealogyNode {
            user: loaded.user,
            level: loaded.level,
            children,
            has_more_children: loaded.has_more_children,
        });
    }
    built.into_iter().take(direct).flatten().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::config::CompensationConfig;
    use crate::db::{init_db, Repository, SortField, SortOrder};
    use crate::domain::Decimal;
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn setup(depth: usize) -> (GenealogyService, Arc<Repository>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("test.db")
            .to_string_lossy()
            .to_string();
        let pool = init_db(&db_path).await.expect("init_db failed");
        let repo = Arc::new(Repository::new(pool));
        let config = CompensationConfig {
            max_genealogy_depth: depth,
            tree_batch_size: 2,
            ..Default::default()
        };
        let service = GenealogyService::new(repo.clone(), Arc::new(MemoryCache::new()), config);
        (service, repo, temp_dir)
    }

    fn member(id: &str, upline: Option<&str>, created_at: i64) -> User {
        User {
            id: UserId::new(id),
            name: id.to_string(),
            email: None,
            rank_id: None,
            upline_id: upline.map(UserId::new),
            position: None,
            wallet_balance: Decimal::zero(),
            created_at: TimeMs::new(created_at),
        }
    }

    /// r -> {a, b, c}; a -> {a1, a2}; a1 -> {a1x}; b -> {b1}
    async fn seed(repo: &Repository) {
        let rows = [
            ("r", None, 0),
            ("a", Some("r"), 1),
            ("b", Some("r"), 2),
            ("c", Some("r"), 3),
            ("a1", Some("a"), 4),
            ("a2", Some("a"), 5),
            ("b1", Some("b"), 6),
            ("a1x", Some("a1"), 7),
        ];
        for (id, up, at) in rows {
            repo.insert_user_record(&member(id, up, at)).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_eager_tree_expands_to_max_level() {
        let (service, repo, _temp) = setup(10).await;
        seed(&repo).await;

        let query = DownlineQuery {
            max_level: 2,
            ..Default::default()
        };
        let tree = service.get_downline(&UserId::new("r"), &query).await.unwrap();

        assert_eq!(tree.pagination.total, 3);
        assert_eq!(tree.children.len(), 3);
        let a = &tree.children[0];
        assert_eq!(a.user.id, UserId::new("a"));
        let a_children: Vec<_> = a.children.iter().map(|n| n.user.id.as_str()).collect();
        assert_eq!(a_children, vec!["a1", "a2"]);
        // a1 has a child below the loaded depth.
        assert!(a.children[0].has_more_children);
        assert!(!a.children[1].has_more_children);
        assert_eq!(a.children[0].level, 2);
        assert_eq!(tree.metadata.loaded_nodes, 6);
    }

    #[tokio::test]
    async fn test_lazy_mode_loads_one_level() {
        let (service, repo, _temp) = setup(10).await;
        seed(&repo).await;

        let query = DownlineQuery {
            max_level: 5,
            options: DownlineOptions {
                lazy: true,
                ..Default::default()
            },
            ..Default::default()
        };
        let tree = service.get_downline(&UserId::new("r"), &query).await.unwrap();
        let flags: Vec<_> = tree
            .children
            .iter()
            .map(|n| (n.user.id.as_str(), n.children.is_empty(), n.has_more_children))
            .collect();
        assert_eq!(
            flags,
            vec![("a", true, true), ("b", true, true), ("c", true, false)]
        );

        let expanded = service
            .expand_node(&UserId::new("a"), 1, 20, &DownlineOptions::default())
            .await
            .unwrap();
        assert_eq!(expanded.children.len(), 2);
        assert!(expanded.children[0].has_more_children);
    }

    #[tokio::test]
    async fn test_pagination_and_sort() {
        let (service, repo, _temp) = setup(10).await;
        seed(&repo).await;

        let query = DownlineQuery {
            max_level: 1,
            page: 2,
            page_size: 2,
            options: DownlineOptions {
                sort: ChildSort {
                    field: SortField::Name,
                    order: SortOrder::Desc,
                },
                ..Default::default()
            },
        };
        let tree = service.get_downline(&UserId::new("r"), &query).await.unwrap();
        assert_eq!(tree.pagination.total_pages, 2);
        assert!(!tree.pagination.has_next);
        let ids: Vec<_> = tree.children.iter().map(|n| n.user.id.as_str()).collect();
        assert_eq!(ids, vec!["a"]);
    }

    #[tokio::test]
    async fn test_depth_clamped_and_bad_paging_rejected() {
        let (service, repo, _temp) = setup(1).await;
        seed(&repo).await;

        let query = DownlineQuery {
            max_level: 5,
            ..Default::default()
        };
        let tree = service.get_downline(&UserId::new("r"), &query).await.unwrap();
        assert_eq!(tree.metadata.max_level, 1);
        assert!(tree.children.iter().all(|n| n.children.is_empty()));

        let bad = DownlineQuery {
            page: 0,
            ..Default::default()
        };
        assert!(matches!(
            service.get_downline(&UserId::new("r"), &bad).await,
            Err(EngineError::Validation(_))
        ));
        assert!(matches!(
            service
                .get_downline(&UserId::new("ghost"), &DownlineQuery::default())
                .await,
            Err(EngineError::NotFound(_))
        ));
    }
}
