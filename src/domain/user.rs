//! Members of the sponsorship forest.

use crate::domain::{Decimal, RankId, TimeMs, UserId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Placement under the sponsor for binary-plan variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Position {
    Left,
    Right,
}

impl Position {
    pub fn as_str(&self) -> &'static str {
        match self {
            Position::Left => "left",
            Position::Right => "right",
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Position {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "left" => Ok(Position::Left),
            "right" => Ok(Position::Right),
            other => Err(format!("unknown position: {}", other)),
        }
    }
}

/// A registered member.
///
/// `upline_id` is the only structural link; the tree is never held as an
/// object graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub rank_id: Option<RankId>,
    pub upline_id: Option<UserId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    pub wallet_balance: Decimal,
    pub created_at: TimeMs,
}

/// Registration payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub upline_id: Option<UserId>,
    #[serde(default)]
    pub position: Option<Position>,
    #[serde(default)]
    pub rank_id: Option<RankId>,
}

impl NewUser {
    pub fn new(name: impl Into<String>, upline_id: Option<UserId>) -> Self {
        Self {
            name: name.into(),
            email: None,
            upline_id,
            position: None,
            rank_id: None,
        }
    }

    pub fn with_position(mut self, position: Position) -> Self {
        self.position = Some(position);
        self
    }

    pub fn with_rank(mut self, rank_id: RankId) -> Self {
        self.rank_id = Some(rank_id);
        self
    }
}
