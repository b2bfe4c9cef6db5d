//! Single source of truth for one match: timer, touches, drop ratings and
//! the derived score.
//!
//! One process-wide instance is created at startup and handed to every
//! producer; there is no ambient global. All mutators are safe to call from
//! concurrent producers and never fail: out-of-range input is silently
//! normalized (touches clamp to zero, unknown drop ratings become unset).
//! Critical sections are short, and every derived value inside `snapshot()`
//! is computed from the already-held guard, so nothing re-acquires the lock.

use crate::clock::{Clock, MonotonicClock};
use crate::leaderboard::{InMemoryLeaderboard, LeaderboardEntry, LeaderboardStore};
use crate::score::{drop_points, DropRating, ScoreBreakdown};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Match timer lifecycle: empty -> running -> frozen (ended).
///
/// At most one of {running, frozen} holds; `ended` implies the elapsed
/// value is frozen. `start` latches once; `stop` freezes once.
#[derive(Debug, Default, Clone, Copy)]
struct MatchTimer {
    started_at: Option<Instant>,
    frozen_elapsed: Option<Duration>,
    ended: bool,
}

impl MatchTimer {
    fn start(&mut self, now: Instant) {
        if self.started_at.is_none() && !self.ended {
            self.started_at = Some(now);
        }
    }

    fn stop(&mut self, now: Instant) {
        if self.ended {
            return;
        }
        let elapsed = self
            .started_at
            .take()
            .map(|t| now - t)
            .unwrap_or(Duration::ZERO);
        self.frozen_elapsed = Some(elapsed);
        self.ended = true;
    }

    fn reset(&mut self) {
        *self = MatchTimer::default();
    }

    fn running(&self) -> bool {
        self.started_at.is_some()
    }

    fn elapsed(&self, now: Instant) -> Duration {
        if let Some(frozen) = self.frozen_elapsed {
            frozen
        } else if let Some(t) = self.started_at {
            now - t
        } else {
            Duration::ZERO
        }
    }
}

/// Partial breakdown update from a producer. Fields that are present
/// overwrite the current value; absent fields are left alone. Drop ratings
/// arrive as wire strings so an invalid rating can still be expressed (it
/// normalizes to unset).
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct BreakdownUpdate {
    pub obstacle_touches: Option<i64>,
    pub completed_under_60: Option<bool>,
    pub box_drop_1: Option<String>,
    pub box_drop_2: Option<String>,
}

/// Immutable view of the match at one point in time. This is also the wire
/// shape the narration generator receives, so the field names follow the
/// overlay's JSON contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchSnapshot {
    pub team_id: String,
    pub score_total: i64,
    pub t_elapsed_s: f64,
    pub score_breakdown: ScoreBreakdown,
    pub obstacle_touches: u32,
    pub box_drop_1: Option<DropRating>,
    pub box_drop_2: Option<DropRating>,
    pub match_ended: bool,
    /// Event-driven snapshot worth narrating now, vs. a periodic filler.
    #[serde(default)]
    pub notable_event: bool,
}

#[derive(Debug, Default)]
struct Inner {
    timer: MatchTimer,
    team_id: String,
    obstacle_touches: u32,
    completed_under_60: bool,
    box_drop_1: Option<DropRating>,
    box_drop_2: Option<DropRating>,
}

impl Inner {
    fn breakdown(&self) -> ScoreBreakdown {
        let touches = i64::from(self.obstacle_touches);
        let obstacle = if self.timer.ended {
            // Completion credit folds in once: 5 touches nets out to zero.
            5 - touches
        } else if self.timer.running() {
            -touches
        } else {
            0
        };
        let completed_under_60 = if self.timer.ended && self.completed_under_60 {
            5
        } else {
            0
        };
        let box_drop = drop_points(self.box_drop_1) + drop_points(self.box_drop_2);
        ScoreBreakdown {
            obstacle,
            completed_under_60,
            box_drop,
        }
    }

    fn snapshot(&self, now: Instant, notable: bool) -> MatchSnapshot {
        let breakdown = self.breakdown();
        let elapsed = self.timer.elapsed(now).as_secs_f64();
        MatchSnapshot {
            team_id: self.team_id.clone(),
            score_total: breakdown.total(),
            t_elapsed_s: (elapsed * 100.0).round() / 100.0,
            score_breakdown: breakdown,
            obstacle_touches: self.obstacle_touches,
            box_drop_1: self.box_drop_1,
            box_drop_2: self.box_drop_2,
            match_ended: self.timer.ended,
            notable_event: notable,
        }
    }
}

/// Thread-safe match state. The only writer of its timer and breakdown.
pub struct MatchState {
    inner: Mutex<Inner>,
    clock: Arc<dyn Clock>,
    leaderboard: Arc<dyn LeaderboardStore>,
}

impl MatchState {
    pub fn new(clock: Arc<dyn Clock>, leaderboard: Arc<dyn LeaderboardStore>) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            clock,
            leaderboard,
        }
    }

    /// System clock and in-memory leaderboard.
    pub fn with_defaults() -> Self {
        Self::new(
            Arc::new(MonotonicClock),
            Arc::new(InMemoryLeaderboard::new()),
        )
    }

    // The state must stay readable even if a producer panicked while
    // holding the lock.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start the timer. Idempotent; no-op once started or once ended.
    pub fn start_timer(&self) {
        let now = self.clock.now();
        let mut inner = self.lock();
        let was_running = inner.timer.running();
        inner.timer.start(now);
        if !was_running && inner.timer.running() {
            info!(target = "match_state", team = %inner.team_id, "Timer started");
        }
    }

    /// Freeze the elapsed time and mark the run ended. Idempotent; the
    /// frozen value never moves on repeat calls.
    pub fn stop_timer(&self) {
        let now = self.clock.now();
        let mut inner = self.lock();
        if inner.timer.ended {
            return;
        }
        inner.timer.stop(now);
        info!(
            target = "match_state",
            team = %inner.team_id,
            elapsed_s = inner.timer.elapsed(now).as_secs_f64(),
            "Timer stopped; run ended"
        );
    }

    /// Clear timer, touches, completion flag and both drop ratings for a
    /// fresh run without a process restart. The team id is kept.
    pub fn reset_for_new_match(&self) {
        let mut inner = self.lock();
        inner.timer.reset();
        inner.obstacle_touches = 0;
        inner.completed_under_60 = false;
        inner.box_drop_1 = None;
        inner.box_drop_2 = None;
        info!(target = "match_state", team = %inner.team_id, "Reset for new match");
    }

    pub fn set_team(&self, team_id: impl Into<String>) {
        let mut inner = self.lock();
        inner.team_id = team_id.into();
    }

    /// Apply a partial breakdown update. Never fails: negative touch counts
    /// clamp to zero and unknown drop ratings normalize to unset.
    pub fn record_breakdown(&self, update: BreakdownUpdate) {
        let mut inner = self.lock();
        if let Some(touches) = update.obstacle_touches {
            // Saturate rather than wrap on absurd counts.
            inner.obstacle_touches = u32::try_from(touches.max(0)).unwrap_or(u32::MAX);
        }
        if let Some(flag) = update.completed_under_60 {
            inner.completed_under_60 = flag;
        }
        if let Some(rating) = &update.box_drop_1 {
            inner.box_drop_1 = DropRating::parse(rating);
        }
        if let Some(rating) = &update.box_drop_2 {
            inner.box_drop_2 = DropRating::parse(rating);
        }
        debug!(
            target = "match_state",
            touches = inner.obstacle_touches,
            under_60 = inner.completed_under_60,
            drop_1 = ?inner.box_drop_1,
            drop_2 = ?inner.box_drop_2,
            "Breakdown updated"
        );
    }

    /// Frozen value once ended, now-minus-start while running, else 0.
    pub fn elapsed_seconds(&self) -> f64 {
        let now = self.clock.now();
        self.lock().timer.elapsed(now).as_secs_f64()
    }

    /// Build a snapshot atomically: all fields read under one critical
    /// section so the breakdown and elapsed time are mutually consistent.
    pub fn snapshot(&self, notable: bool) -> MatchSnapshot {
        let now = self.clock.now();
        self.lock().snapshot(now, notable)
    }

    /// Append the current run to the leaderboard and return the entry. The
    /// entry is built even when the external store is unavailable.
    pub fn save_run(&self) -> LeaderboardEntry {
        let entry = LeaderboardEntry::new(self.snapshot(false));
        match self.leaderboard.insert(entry.clone()) {
            Some(stored) => stored,
            None => {
                debug!(target = "match_state", "Leaderboard store unavailable; entry not persisted");
                entry
            }
        }
    }

    /// Leaderboard sorted by total score descending.
    pub fn leaderboard(&self, limit: usize) -> Vec<LeaderboardEntry> {
        self.leaderboard.top_n(limit)
    }
}
