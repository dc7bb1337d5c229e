//! Sponsorship tree service: registration, reassignment and the walkers.
//!
//! The tree lives only in the store as `users.upline_id`; every walk is an
//! explicit loop over that relation with a visited set, so a corrupted
//! (cyclic) relation can slow a walk down but never hang it.

use crate::cache::{self, Cache};
use crate::config::CompensationConfig;
use crate::db::Repository;
use crate::domain::{NewUser, Position, User, UserId};
use crate::error::EngineError;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

pub mod downline;
pub mod subtree;
pub mod upline;

pub use downline::{
    DownlineMetadata, DownlineOptions, DownlineQuery, DownlineTree, GenealogyNode, Pagination,
};
pub use subtree::{BinaryLegs, LegSummary, LevelCount};
pub use upline::UplineEntry;

/// Walk bound used when the whole ancestor chain is needed.
pub(crate) const UNBOUNDED: usize = usize::MAX;

pub struct GenealogyService {
    repo: Arc<Repository>,
    cache: Arc<dyn Cache>,
    config: CompensationConfig,
}

impl GenealogyService {
    pub fn new(repo: Arc<Repository>, cache: Arc<dyn Cache>, config: CompensationConfig) -> Self {
        Self { repo, cache, config }
    }

    pub fn config(&self) -> &CompensationConfig {
        &self.config
    }

    pub(crate) async fn require_user(&self, user_id: &UserId) -> Result<User, EngineError> {
        self.repo
            .get_user(user_id)
            .await?
            .ok_or_else(|| EngineError::not_found("user", user_id))
    }

    /// Register a member under an optional sponsor.
    ///
    /// # Errors
    /// `NotFound` for an unknown sponsor; `Validation` for an empty name, a
    /// position without a sponsor, a taken binary slot or an unknown rank.
    pub async fn register_user(&self, new_user: &NewUser) -> Result<User, EngineError> {
        if new_user.name.trim().is_empty() {
            return Err(EngineError::Validation("name must not be empty".to_string()));
        }
        if let Some(rank_id) = &new_user.rank_id {
            if self.repo.get_rank(rank_id).await?.is_none() {
                return Err(EngineError::Validation(format!("unknown rank {}", rank_id)));
            }
        }
        match &new_user.upline_id {
            Some(sponsor_id) => {
                self.require_user(sponsor_id).await?;
                if let Some(position) = new_user.position {
                    self.ensure_slot_free(sponsor_id, position, None).await?;
                }
            }
            None if new_user.position.is_some() => {
                return Err(EngineError::Validation(
                    "position requires a sponsor".to_string(),
                ));
            }
            None => {}
        }

        let user = self.repo.insert_user(new_user).await?;
        self.invalidate_lineage(&user.id).await?;
        info!(user = %user.id, sponsor = ?user.upline_id, "Registered member");
        Ok(user)
    }

    /// Move a member (with its whole subtree) under a new sponsor, or detach
    /// it to a root when `new_upline` is None.
    ///
    /// # Errors
    /// `Validation` when the move would create a cycle or the binary slot is
    /// taken; `NotFound` for unknown members.
    pub async fn reassign_sponsor(
        &self,
        user_id: &UserId,
        new_upline: Option<&UserId>,
        position: Option<Position>,
    ) -> Result<User, EngineError> {
        self.require_user(user_id).await?;

        if let Some(sponsor_id) = new_upline {
            if sponsor_id == user_id {
                return Err(EngineError::Validation(
                    "a member cannot sponsor itself".to_string(),
                ));
            }
            self.require_user(sponsor_id).await?;
            let sponsor_chain = self.walk_upline(sponsor_id, UNBOUNDED).await?;
            if sponsor_chain.iter().any(|e| &e.user.id == user_id) {
                return Err(EngineError::Validation(format!(
                    "{} is in the downline of {}",
                    sponsor_id, user_id
                )));
            }
            if let Some(position) = position {
                self.ensure_slot_free(sponsor_id, position, Some(user_id))
                    .await?;
            }
        } else if position.is_some() {
            return Err(EngineError::Validation(
                "position requires a sponsor".to_string(),
            ));
        }

        let old_chain = self.walk_upline(user_id, UNBOUNDED).await?;
        self.repo.set_upline(user_id, new_upline, position).await?;
        let new_chain = self.walk_upline(user_id, UNBOUNDED).await?;

        let mut moved = self.collect_downline_ids(user_id, None).await?;
        moved.push(user_id.clone());

        let mut namespaces: HashSet<String> = old_chain
            .iter()
            .chain(new_chain.iter())
            .map(|e| cache::subtree_namespace(&e.user.id))
            .collect();
        for id in &moved {
            namespaces.insert(cache::subtree_namespace(id));
            namespaces.insert(cache::upline_namespace(id));
        }
        let dropped = self.invalidate_namespaces(namespaces).await;

        info!(
            user = %user_id,
            sponsor = ?new_upline,
            moved = moved.len(),
            dropped,
            "Reassigned sponsor"
        );
        self.require_user(user_id).await
    }

    /// Drop cached subtree data of a member and every ancestor.
    pub async fn invalidate_lineage(&self, user_id: &UserId) -> Result<(), EngineError> {
        let chain = self.walk_upline(user_id, UNBOUNDED).await?;
        let namespaces = std::iter::once(cache::subtree_namespace(user_id))
            .chain(chain.iter().map(|e| cache::subtree_namespace(&e.user.id)))
            .collect::<HashSet<_>>();
        self.invalidate_namespaces(namespaces).await;
        Ok(())
    }

    async fn invalidate_namespaces(&self, namespaces: HashSet<String>) -> usize {
        let mut dropped = 0;
        for ns in &namespaces {
            dropped += self.cache.invalidate_namespace(ns).await;
        }
        debug!(namespaces = namespaces.len(), dropped, "Invalidated cache namespaces");
        dropped
    }

    async fn ensure_slot_free(
        &self,
        sponsor_id: &UserId,
        position: Position,
        mover: Option<&UserId>,
    ) -> Result<(), EngineError> {
        match self.repo.child_at_position(sponsor_id, position).await? {
            Some(occupant) if Some(&occupant) != mover => Err(EngineError::Validation(format!(
                "{} slot under {} is taken by {}",
                position, sponsor_id, occupant
            ))),
            _ => Ok(()),
        }
    }
}
