//! Tests for the narration dispatcher: coalescing, rate limiting, the
//! terminal finished state, and failure handling.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use trackside_core::config::DispatcherConfig;
use trackside_core::{ManualClock, MatchSnapshot, Result, ScoreBreakdown, TracksideError};
use trackside_voice::{NarrationDispatcher, Narrator, NoopNarrator, SpeechPlayer};

// ============================================================================
// Test Helpers
// ============================================================================

fn make_snapshot(touches: u32, notable: bool, ended: bool) -> MatchSnapshot {
    let t = i64::from(touches);
    let obstacle = if ended { 5 - t } else { -t };
    let breakdown = ScoreBreakdown {
        obstacle,
        completed_under_60: 0,
        box_drop: 0,
    };
    MatchSnapshot {
        team_id: "1".to_string(),
        score_total: breakdown.total(),
        t_elapsed_s: f64::from(touches) * 2.0,
        score_breakdown: breakdown,
        obstacle_touches: touches,
        box_drop_1: None,
        box_drop_2: None,
        match_ended: ended,
        notable_event: notable,
    }
}

fn test_config() -> DispatcherConfig {
    DispatcherConfig {
        filler_interval: Duration::from_secs(12),
        max_payloads_per_call: 3,
        poll_interval: Duration::from_millis(500),
        intro_line: "The course is live.".to_string(),
    }
}

/// Records every narrate call; optionally fails them all.
struct RecordingNarrator {
    calls: Mutex<Vec<Vec<MatchSnapshot>>>,
    fail: bool,
}

impl RecordingNarrator {
    fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail: false,
        }
    }

    fn failing() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    fn calls(&self) -> Vec<Vec<MatchSnapshot>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Narrator for RecordingNarrator {
    async fn narrate(&self, snapshots: &[MatchSnapshot]) -> Result<String> {
        self.calls.lock().unwrap().push(snapshots.to_vec());
        if self.fail {
            Err(TracksideError::NarrationError("generator down".into()))
        } else {
            Ok("what a run".to_string())
        }
    }
}

/// Records playback events in order; can fail the next speak call.
struct RecordingPlayer {
    events: Mutex<Vec<String>>,
    fail_next: AtomicBool,
}

impl RecordingPlayer {
    fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            fail_next: AtomicBool::new(false),
        }
    }

    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn spoken(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| e.strip_prefix("speak:").map(str::to_string))
            .collect()
    }
}

#[async_trait]
impl SpeechPlayer for RecordingPlayer {
    async fn speak(&self, text: &str) -> Result<()> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(TracksideError::SpeechError("device gone".into()));
        }
        self.events.lock().unwrap().push(format!("speak:{text}"));
        Ok(())
    }

    fn is_playing(&self) -> bool {
        false
    }

    fn stop(&self) {}

    async fn wait_until_idle(&self) {
        self.events.lock().unwrap().push("wait".to_string());
    }
}

fn make_dispatcher(
    narrator: Arc<RecordingNarrator>,
    player: Arc<RecordingPlayer>,
    clock: ManualClock,
) -> NarrationDispatcher {
    NarrationDispatcher::with_clock(narrator, player, test_config(), Arc::new(clock))
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn burst_coalesces_to_the_latest_snapshot() {
    let narrator = Arc::new(RecordingNarrator::new());
    let player = Arc::new(RecordingPlayer::new());
    let dispatcher = make_dispatcher(Arc::clone(&narrator), Arc::clone(&player), ManualClock::new());

    for touches in 1..=5 {
        dispatcher.push(make_snapshot(touches, true, false));
    }
    assert!(dispatcher.tick().await);

    let calls = narrator.calls();
    assert_eq!(calls.len(), 1, "one burst, one generator call");
    assert_eq!(calls[0].len(), 1, "only the most recent snapshot is sent");
    assert_eq!(calls[0][0].obstacle_touches, 5);

    // The burst is fully consumed; an immediate second tick is a no-op.
    assert!(!dispatcher.tick().await);
    assert_eq!(narrator.calls().len(), 1);
    assert_eq!(player.spoken(), vec!["what a run".to_string()]);
}

#[tokio::test]
async fn tick_is_a_noop_on_an_empty_queue() {
    let narrator = Arc::new(RecordingNarrator::new());
    let player = Arc::new(RecordingPlayer::new());
    let dispatcher = make_dispatcher(Arc::clone(&narrator), Arc::clone(&player), ManualClock::new());

    assert!(!dispatcher.tick().await);
    assert!(narrator.calls().is_empty());
    assert!(player.events().is_empty());
}

#[tokio::test]
async fn filler_narration_respects_the_interval() {
    let clock = ManualClock::new();
    let narrator = Arc::new(RecordingNarrator::new());
    let player = Arc::new(RecordingPlayer::new());
    let dispatcher = make_dispatcher(Arc::clone(&narrator), Arc::clone(&player), clock.clone());

    // Nothing has been narrated yet, so the first filler fires immediately.
    dispatcher.push(make_snapshot(0, false, false));
    assert!(dispatcher.tick().await);
    assert_eq!(narrator.calls().len(), 1);

    // Too soon for another filler.
    dispatcher.push(make_snapshot(0, false, false));
    clock.advance(Duration::from_secs(5));
    assert!(!dispatcher.tick().await);
    assert_eq!(narrator.calls().len(), 1);

    // A notable snapshot overrides the interval.
    dispatcher.push(make_snapshot(1, true, false));
    assert!(dispatcher.tick().await);
    assert_eq!(narrator.calls().len(), 2);

    // And once the interval passes, fillers flow again.
    dispatcher.push(make_snapshot(1, false, false));
    clock.advance(Duration::from_secs(12));
    assert!(dispatcher.tick().await);
    assert_eq!(narrator.calls().len(), 3);
}

#[tokio::test]
async fn ended_snapshot_finishes_the_dispatcher_until_reset() {
    let narrator = Arc::new(RecordingNarrator::new());
    let player = Arc::new(RecordingPlayer::new());
    let dispatcher = make_dispatcher(Arc::clone(&narrator), Arc::clone(&player), ManualClock::new());

    dispatcher.push(make_snapshot(2, true, true));
    assert!(dispatcher.tick().await);
    assert!(dispatcher.is_finished());

    // Further pushes buffer but never narrate.
    dispatcher.push(make_snapshot(3, true, false));
    assert!(!dispatcher.tick().await);
    assert!(!dispatcher.tick().await);
    assert_eq!(narrator.calls().len(), 1);

    // Reset drops the stale buffer and revives narration.
    dispatcher.reset_for_new_match();
    assert!(!dispatcher.is_finished());
    assert_eq!(dispatcher.pending(), 0);
    dispatcher.push(make_snapshot(0, true, false));
    assert!(dispatcher.tick().await);
    assert_eq!(narrator.calls().len(), 2);
}

#[tokio::test]
async fn intro_plays_exactly_once() {
    let narrator = Arc::new(RecordingNarrator::new());
    let player = Arc::new(RecordingPlayer::new());
    let dispatcher = make_dispatcher(narrator, Arc::clone(&player), ManualClock::new());

    dispatcher.play_intro().await;
    dispatcher.play_intro().await;
    assert_eq!(player.spoken(), vec!["The course is live.".to_string()]);

    // A new match gets its intro again.
    dispatcher.reset_for_new_match();
    dispatcher.play_intro().await;
    assert_eq!(player.spoken().len(), 2);
}

#[tokio::test]
async fn failed_intro_can_be_retried() {
    let narrator = Arc::new(RecordingNarrator::new());
    let player = Arc::new(RecordingPlayer::new());
    player.fail_next.store(true, Ordering::SeqCst);
    let dispatcher = make_dispatcher(narrator, Arc::clone(&player), ManualClock::new());

    dispatcher.play_intro().await;
    assert!(player.spoken().is_empty());

    dispatcher.play_intro().await;
    assert_eq!(player.spoken().len(), 1);
}

#[tokio::test]
async fn generator_failure_releases_the_dispatcher() {
    let narrator = Arc::new(RecordingNarrator::failing());
    let player = Arc::new(RecordingPlayer::new());
    let dispatcher = make_dispatcher(Arc::clone(&narrator), Arc::clone(&player), ManualClock::new());

    dispatcher.push(make_snapshot(1, true, false));
    assert!(dispatcher.tick().await);
    // Nothing spoken, state not corrupted, not finished.
    assert!(player.events().is_empty());
    assert!(!dispatcher.is_finished());

    // The next notable event narrates again.
    dispatcher.push(make_snapshot(2, true, false));
    assert!(dispatcher.tick().await);
    assert_eq!(narrator.calls().len(), 2);
}

#[tokio::test]
async fn player_failure_releases_the_dispatcher() {
    let narrator = Arc::new(RecordingNarrator::new());
    let player = Arc::new(RecordingPlayer::new());
    player.fail_next.store(true, Ordering::SeqCst);
    let dispatcher = make_dispatcher(Arc::clone(&narrator), Arc::clone(&player), ManualClock::new());

    dispatcher.push(make_snapshot(1, true, false));
    assert!(dispatcher.tick().await);
    assert!(player.spoken().is_empty());

    dispatcher.push(make_snapshot(2, true, false));
    assert!(dispatcher.tick().await);
    assert_eq!(player.spoken(), vec!["what a run".to_string()]);
}

#[tokio::test]
async fn playback_waits_for_idle_before_speaking() {
    let narrator = Arc::new(RecordingNarrator::new());
    let player = Arc::new(RecordingPlayer::new());
    let dispatcher = make_dispatcher(narrator, Arc::clone(&player), ManualClock::new());

    dispatcher.push(make_snapshot(0, true, false));
    assert!(dispatcher.tick().await);
    assert_eq!(
        player.events(),
        vec!["wait".to_string(), "speak:what a run".to_string()]
    );
}

#[tokio::test]
async fn silent_narrator_still_finishes_an_ended_match() {
    let player = Arc::new(RecordingPlayer::new());
    let dispatcher = NarrationDispatcher::with_clock(
        Arc::new(NoopNarrator),
        Arc::clone(&player) as Arc<dyn SpeechPlayer>,
        test_config(),
        Arc::new(ManualClock::new()),
    );

    dispatcher.push(make_snapshot(0, true, true));
    assert!(dispatcher.tick().await);
    assert!(dispatcher.is_finished());
    assert!(player.events().is_empty());
}

/// Resets the dispatcher from inside the generator call, the way a
/// concurrent operator restart lands mid-cycle.
struct ResettingNarrator {
    dispatcher: Mutex<Option<Arc<NarrationDispatcher>>>,
}

#[async_trait]
impl Narrator for ResettingNarrator {
    async fn narrate(&self, _snapshots: &[MatchSnapshot]) -> Result<String> {
        if let Some(d) = self.dispatcher.lock().unwrap().take() {
            d.reset_for_new_match();
        }
        Ok("wrapping up".to_string())
    }
}

#[tokio::test]
async fn reset_during_an_ended_cycle_keeps_the_next_match_live() {
    let narrator = Arc::new(ResettingNarrator {
        dispatcher: Mutex::new(None),
    });
    let player = Arc::new(RecordingPlayer::new());
    let dispatcher = Arc::new(NarrationDispatcher::with_clock(
        Arc::clone(&narrator) as Arc<dyn Narrator>,
        Arc::clone(&player) as Arc<dyn SpeechPlayer>,
        test_config(),
        Arc::new(ManualClock::new()),
    ));
    *narrator.dispatcher.lock().unwrap() = Some(Arc::clone(&dispatcher));

    // The ended snapshot is drained, then the reset lands while the cycle
    // is still in flight; the stale cycle must not finish the new match.
    dispatcher.push(make_snapshot(2, true, true));
    assert!(dispatcher.tick().await);
    assert!(!dispatcher.is_finished());

    dispatcher.push(make_snapshot(0, true, false));
    assert!(dispatcher.tick().await);
    assert_eq!(player.spoken().len(), 2);
}

#[tokio::test]
async fn coalescing_detects_ended_anywhere_in_the_batch() {
    // The ended snapshot is followed by a newer non-ended one (out-of-order
    // producers); the dispatcher must still finish.
    let narrator = Arc::new(RecordingNarrator::new());
    let player = Arc::new(RecordingPlayer::new());
    let dispatcher = make_dispatcher(Arc::clone(&narrator), Arc::clone(&player), ManualClock::new());

    dispatcher.push(make_snapshot(1, true, true));
    dispatcher.push(make_snapshot(1, true, false));
    assert!(dispatcher.tick().await);

    let calls = narrator.calls();
    assert_eq!(calls.len(), 1);
    assert!(!calls[0][0].match_ended, "latest snapshot wins the narration");
    assert!(dispatcher.is_finished(), "ended anywhere in the batch finishes");
}
