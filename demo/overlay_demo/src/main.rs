//! End-to-end overlay demo: a scripted obstacle-course run drives the match
//! state, snapshots feed the narration dispatcher, remarks get spoken.
//!
//! With `OPENROUTER_API_KEY` / `ELEVENLABS_API_KEY` unset the pipeline runs
//! with no-op collaborators and only logs what it would have narrated.

use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};
use trackside_core::config::Config;
use trackside_core::{BreakdownUpdate, InMemoryLeaderboard, MatchState, MonotonicClock};
use trackside_voice::{
    ElevenLabsSpeaker, NarrationDispatcher, Narrator, NoopNarrator, NullSpeaker,
    OpenRouterNarrator, SpeechPlayer,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logging / tracing
    let filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "info,trackside_core=info,trackside_voice=info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    info!(
        target = "overlay_demo",
        "Starting overlay demo: scripted run -> match state -> narration -> speech"
    );

    let cfg = Config::load();
    let missing = cfg.missing_keys();
    if !missing.is_empty() {
        warn!(
            target = "overlay_demo",
            missing = ?missing,
            "Credentials missing; narration degrades to no-op"
        );
    }

    let narrator: Arc<dyn Narrator> = if cfg.narrator.api_key.is_some() {
        Arc::new(OpenRouterNarrator::new(cfg.narrator.clone())?)
    } else {
        Arc::new(NoopNarrator)
    };
    let player: Arc<dyn SpeechPlayer> = if cfg.speaker.api_key.is_some() {
        Arc::new(ElevenLabsSpeaker::new(cfg.speaker.clone())?)
    } else {
        Arc::new(NullSpeaker)
    };

    // One process-wide match state, injected into every producer.
    let state = Arc::new(MatchState::new(
        Arc::new(MonotonicClock),
        Arc::new(InMemoryLeaderboard::new()),
    ));
    state.set_team(cfg.team_number.clone());

    let dispatcher = Arc::new(NarrationDispatcher::new(
        narrator,
        player,
        cfg.dispatcher.clone(),
    ));

    dispatcher.play_intro().await;

    // Scheduling loop at a fixed poll cadence
    let loop_task = {
        let dispatcher = Arc::clone(&dispatcher);
        tokio::spawn(async move { dispatcher.run_loop().await })
    };

    // Scripted producer: clean start, first drop fully in, one touch,
    // second drop on the edge, finish under 60 seconds.
    let producer = {
        let state = Arc::clone(&state);
        let dispatcher = Arc::clone(&dispatcher);
        tokio::spawn(async move {
            state.start_timer();
            dispatcher.push(state.snapshot(true));

            tokio::time::sleep(Duration::from_secs(6)).await;
            state.record_breakdown(BreakdownUpdate {
                box_drop_1: Some("fully_in".into()),
                ..Default::default()
            });
            dispatcher.push(state.snapshot(true));

            tokio::time::sleep(Duration::from_secs(5)).await;
            state.record_breakdown(BreakdownUpdate {
                obstacle_touches: Some(1),
                ..Default::default()
            });
            dispatcher.push(state.snapshot(true));

            tokio::time::sleep(Duration::from_secs(5)).await;
            state.record_breakdown(BreakdownUpdate {
                box_drop_2: Some("edge_touching".into()),
                ..Default::default()
            });
            dispatcher.push(state.snapshot(true));

            tokio::time::sleep(Duration::from_secs(5)).await;
            state.record_breakdown(BreakdownUpdate {
                completed_under_60: Some(true),
                ..Default::default()
            });
            state.stop_timer();
            dispatcher.push(state.snapshot(true));

            let entry = state.save_run();
            info!(
                target = "overlay_demo",
                team = %entry.run.team_id,
                total = entry.run.score_total,
                elapsed_s = entry.run.t_elapsed_s,
                "Run saved to leaderboard"
            );
        })
    };

    // Exit once the final remark has gone out, or on Ctrl+C.
    let finished = {
        let dispatcher = Arc::clone(&dispatcher);
        async move {
            while !dispatcher.is_finished() {
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
        }
    };
    tokio::select! {
        _ = signal::ctrl_c() => {
            info!(target = "overlay_demo", "Shutting down...");
        }
        _ = finished => {
            info!(target = "overlay_demo", "Run narrated; shutting down");
        }
    }

    dispatcher.shutdown();
    producer.abort();
    let _ = loop_task.await;

    for (rank, entry) in state.leaderboard(10).iter().enumerate() {
        info!(
            target = "overlay_demo",
            rank = rank + 1,
            team = %entry.run.team_id,
            total = entry.run.score_total,
            "Leaderboard"
        );
    }
    Ok(())
}
