use serde::{Deserialize, Serialize};

use crate::error::MemoryError;

/// An entity-attribute-value fact. Soft-invalidated, never deleted in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fact {
    pub id: i64,
    /// Canonical entity name — resolves through `entity_aliases` only.
    pub entity: String,
    pub attribute: String,
    pub value: String,
    pub confidence: f64,
    pub session: Option<String>,
    pub valid: bool,
    pub created_ts: String,
    pub updated_ts: String,
}

/// A narrative memory produced by consolidation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    pub id: i64,
    pub title: String,
    pub body: String,
    pub started_at: String,
    pub session: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Commitment {
    pub id: i64,
    pub description: String,
    pub status: CommitmentStatus,
    pub due_ts: Option<String>,
    pub updated_ts: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitmentStatus {
    Open,
    Done,
    Expired,
    Cancelled,
}

impl CommitmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommitmentStatus::Open => "open",
            CommitmentStatus::Done => "done",
            CommitmentStatus::Expired => "expired",
            CommitmentStatus::Cancelled => "cancelled",
        }
    }
}

impl std::str::FromStr for CommitmentStatus {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(CommitmentStatus::Open),
            "done" => Ok(CommitmentStatus::Done),
            "expired" => Ok(CommitmentStatus::Expired),
            "cancelled" => Ok(CommitmentStatus::Cancelled),
            other => Err(MemoryError::UnknownStatus(other.to_string())),
        }
    }
}

/// One indexed chunk of a workspace file.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: i64,
    pub path: String,
    pub chunk_ix: i64,
    pub text: String,
    pub embedding: Option<Vec<f32>>,
    pub updated_ts: String,
}

/// A scored recall candidate prior to truncation.
#[derive(Debug, Clone)]
pub struct RecallHit {
    pub path: String,
    pub chunk_ix: i64,
    pub text: String,
    pub score: f64,
}
