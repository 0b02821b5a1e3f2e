use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A member of a sorted set with its score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredMember {
    pub member: String,
    pub score: f64,
}

/// The value held at a key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StoredValue {
    Hash(BTreeMap<String, String>),
    /// Kept ordered by (score, member), like a Redis sorted set
    SortedSet(Vec<ScoredMember>),
    Text(String),
}

/// A key's value plus its absolute deadline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEntry {
    /// Unix milliseconds after which the key no longer exists
    pub expires_at_ms: Option<i64>,
    pub value: StoredValue,
}

impl StoredEntry {
    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        matches!(self.expires_at_ms, Some(deadline) if deadline <= now_ms)
    }
}

impl ScoredMember {
    pub fn sort(members: &mut [ScoredMember]) {
        members.sort_by(|a, b| {
            a.score
                .total_cmp(&b.score)
                .then_with(|| a.member.cmp(&b.member))
        });
    }
}
