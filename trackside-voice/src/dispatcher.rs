//! Narration dispatcher: a cooperative rate limiter between snapshot
//! producers and the generator/player pair.
//!
//! Guarantees:
//! - at most one narration+playback cycle is in flight at a time,
//! - a burst of buffered snapshots collapses into one remark about the
//!   newest state (never five overlapping remarks about a stale one),
//! - once an ended snapshot has been dispatched, nothing more is narrated
//!   until `reset_for_new_match`.
//!
//! Producers keep pushing while a cycle is outstanding: the queue lock is
//! only held for queue bookkeeping, never across the generator call or
//! playback.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tracing::{debug, info, warn};
use trackside_core::config::DispatcherConfig;
use trackside_core::{Clock, MatchSnapshot, MonotonicClock};

use crate::narrator::Narrator;
use crate::speaker::SpeechPlayer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    /// Generator call + playback outstanding.
    Dispatching,
    /// Terminal after an ended snapshot, until reset.
    Finished,
}

#[derive(Debug)]
struct Queue {
    phase: Phase,
    buffer: VecDeque<MatchSnapshot>,
    intro_done: bool,
    last_narration: Option<Instant>,
    // Bumped on every reset; an in-flight cycle drained before the reset
    // must not finish the match that came after it.
    epoch: u64,
}

impl Queue {
    fn new() -> Self {
        Self {
            phase: Phase::Idle,
            buffer: VecDeque::new(),
            intro_done: false,
            last_narration: None,
            epoch: 0,
        }
    }
}

// Releases the in-flight phase in every outcome, errors and panics included.
struct InFlightGuard<'a> {
    queue: &'a Mutex<Queue>,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut q = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        if q.phase == Phase::Dispatching {
            q.phase = Phase::Idle;
        }
    }
}

pub struct NarrationDispatcher {
    narrator: Arc<dyn Narrator>,
    player: Arc<dyn SpeechPlayer>,
    clock: Arc<dyn Clock>,
    cfg: DispatcherConfig,
    queue: Mutex<Queue>,
    stop: AtomicBool,
}

impl NarrationDispatcher {
    pub fn new(
        narrator: Arc<dyn Narrator>,
        player: Arc<dyn SpeechPlayer>,
        cfg: DispatcherConfig,
    ) -> Self {
        Self::with_clock(narrator, player, cfg, Arc::new(MonotonicClock))
    }

    pub fn with_clock(
        narrator: Arc<dyn Narrator>,
        player: Arc<dyn SpeechPlayer>,
        cfg: DispatcherConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            narrator,
            player,
            clock,
            cfg,
            queue: Mutex::new(Queue::new()),
            stop: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue a snapshot. Producers call this from any task; it never
    /// blocks on narration.
    pub fn push(&self, snapshot: MatchSnapshot) {
        self.lock().buffer.push_back(snapshot);
    }

    /// Speak the fixed intro line. Idempotent after the first successful
    /// playback; independent of the snapshot queue.
    pub async fn play_intro(&self) {
        {
            let mut q = self.lock();
            if q.intro_done {
                return;
            }
            // Latch before speaking so a concurrent caller cannot double
            // the intro; cleared again if playback fails.
            q.intro_done = true;
        }
        if let Err(e) = self.player.speak(&self.cfg.intro_line).await {
            warn!(target = "dispatcher", error = %e, "Intro playback failed");
            self.lock().intro_done = false;
        }
    }

    /// Clear `Finished` back to `Idle`, drop buffered snapshots and allow
    /// the intro again. No stale narration survives a restart.
    pub fn reset_for_new_match(&self) {
        let mut q = self.lock();
        let dropped = q.buffer.len();
        q.buffer.clear();
        q.intro_done = false;
        q.last_narration = None;
        q.epoch = q.epoch.wrapping_add(1);
        if q.phase == Phase::Finished {
            q.phase = Phase::Idle;
        }
        info!(target = "dispatcher", dropped, "Dispatcher reset for new match");
    }

    pub fn is_finished(&self) -> bool {
        self.lock().phase == Phase::Finished
    }

    pub fn pending(&self) -> usize {
        self.lock().buffer.len()
    }

    /// One scheduling decision. No-op while finished, while a cycle is in
    /// flight, or with an empty queue; otherwise fires on a notable
    /// snapshot or once the filler interval has passed since the last
    /// remark. Returns whether a cycle ran.
    pub async fn tick(&self) -> bool {
        let (batch, epoch) = {
            let mut q = self.lock();
            if q.phase != Phase::Idle || q.buffer.is_empty() {
                return false;
            }
            let now = self.clock.now();
            let any_notable = q.buffer.iter().any(|s| s.notable_event);
            let filler_due = q
                .last_narration
                .map_or(true, |t| now - t >= self.cfg.filler_interval);
            if !any_notable && !filler_due {
                return false;
            }
            q.phase = Phase::Dispatching;
            // Newest-wins coalescing: keep at most max_payloads_per_call of
            // the most recent snapshots; older ones are superseded and a
            // remark about them would be stale.
            let keep = self.cfg.max_payloads_per_call.max(1).min(q.buffer.len());
            let superseded = q.buffer.len() - keep;
            if superseded > 0 {
                q.buffer.drain(..superseded);
                debug!(target = "dispatcher", superseded, "Dropped superseded snapshots");
            }
            (q.buffer.drain(..).collect::<Vec<_>>(), q.epoch)
        };

        let _guard = InFlightGuard { queue: &self.queue };

        let ended = batch.iter().any(|s| s.match_ended);
        let Some(latest) = batch.last() else {
            return false;
        };

        let text = match self.narrator.narrate(std::slice::from_ref(latest)).await {
            Ok(text) => text,
            Err(e) => {
                warn!(target = "dispatcher", error = %e, "Narration failed; nothing spoken this cycle");
                String::new()
            }
        };
        // Stamp even when the generator failed or stayed silent, so a
        // broken generator is not retried on every poll.
        self.lock().last_narration = Some(self.clock.now());

        if !text.is_empty() {
            debug!(target = "dispatcher", remark = %text, "Narration ready");
            self.player.wait_until_idle().await;
            if let Err(e) = self.player.speak(&text).await {
                warn!(target = "dispatcher", error = %e, "Speech playback failed");
            }
        }

        if ended {
            let mut q = self.lock();
            // A reset during this cycle supersedes the ended snapshot; the
            // match that came after it stays live.
            if q.epoch == epoch {
                q.phase = Phase::Finished;
                info!(target = "dispatcher", "Match ended; narration finished until reset");
            }
        }
        true
    }

    /// Drive `tick` at the configured cadence until `shutdown`. The stop
    /// flag is checked between ticks only, so an in-flight cycle always
    /// completes.
    pub async fn run_loop(&self) {
        info!(
            target = "dispatcher",
            poll_interval = ?self.cfg.poll_interval,
            filler_interval = ?self.cfg.filler_interval,
            "Narration loop started"
        );
        while !self.stop.load(Ordering::SeqCst) {
            self.tick().await;
            tokio::time::sleep(self.cfg.poll_interval).await;
        }
        info!(target = "dispatcher", "Narration loop stopped");
    }

    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}
