//! Leaderboard collaborator: append-only run records, read back sorted by
//! total score descending.
//!
//! An external store is never a hard dependency. `InMemoryLeaderboard` is
//! the always-available fallback; a remote implementation may return `None`
//! from `insert` when unreachable and the overlay keeps working.

use crate::state::MatchSnapshot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};

/// A run frozen at save time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    #[serde(flatten)]
    pub run: MatchSnapshot,
    pub created_at: DateTime<Utc>,
}

impl LeaderboardEntry {
    pub fn new(run: MatchSnapshot) -> Self {
        Self {
            run,
            created_at: Utc::now(),
        }
    }
}

pub trait LeaderboardStore: Send + Sync {
    /// Append one run. Returns the stored entry, or `None` when the store
    /// is unavailable.
    fn insert(&self, entry: LeaderboardEntry) -> Option<LeaderboardEntry>;

    /// Top `n` entries, total score descending.
    fn top_n(&self, n: usize) -> Vec<LeaderboardEntry>;
}

#[derive(Default)]
pub struct InMemoryLeaderboard {
    entries: Mutex<Vec<LeaderboardEntry>>,
}

impl InMemoryLeaderboard {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LeaderboardStore for InMemoryLeaderboard {
    fn insert(&self, entry: LeaderboardEntry) -> Option<LeaderboardEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry.clone());
        Some(entry)
    }

    fn top_n(&self, n: usize) -> Vec<LeaderboardEntry> {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        entries.sort_by(|a, b| b.run.score_total.cmp(&a.run.score_total));
        entries.truncate(n);
        entries
    }
}
