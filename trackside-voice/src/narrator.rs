//! Commentary generation over OpenRouter chat completions.
//!
//! The generator is stateless: it receives one or more chronological match
//! snapshots as JSON and returns a couple of spoken-word lines. The system
//! prompt carries the contract: reference only fields present in the
//! payload, never invent data, vary phrasing across calls.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};
use trackside_core::config::NarratorConfig;
use trackside_core::{MatchSnapshot, Result, TracksideError};

pub const SYSTEM_PROMPT: &str = "\
You are a live commentator for a timed obstacle-course run. One robot runs the track by itself; \
there is no opponent and no winner, so describe the robot's performance, never a victory.

You receive match telemetry as JSON: team_id, score_total, t_elapsed_s, score_breakdown, \
box_drop_1, box_drop_2, obstacle_touches, and match_ended. You may get one payload or several in \
chronological order as a JSON array; treat the sequence as one story and refer to what changed. \
Vary your wording between calls and do not repeat phrases.

Time context: the maximum match time is 5 minutes (300 seconds). Finishing under 60 seconds earns \
+5 points at the end. Use t_elapsed_s to comment on pace: an unreasonably early end (under 30s) \
probably means something went wrong; just under 5 minutes means they barely made it.

Scoring: obstacle touches are bad. During the run each touch subtracts 1 (score_breakdown.obstacle \
is 0, -1, -2, ...); when the run ends, 5 is added once, so 5 touches net to zero. There are up to \
two box drops, each rated: 5 = fully in the target area; 4 = touching the edge but not outside; \
2 = less than half outside; 1 = mostly outside. box_drop_1 and box_drop_2 hold the ratings, or \
null before a drop happens. Comment on touches and drops when they change.

When match_ended is true, finish with a clear wrap-up line for the run. State scores neutrally \
without judging them. Base commentary only on the data given; never invent. Output plain text \
only: 1-2 short lines, no JSON, no bullet points.";

#[async_trait]
pub trait Narrator: Send + Sync {
    /// One or more chronological snapshots in, a short remark out.
    async fn narrate(&self, snapshots: &[MatchSnapshot]) -> Result<String>;
}

/// HTTP narration client for any OpenAI-compatible chat-completions endpoint
/// (OpenRouter by default).
pub struct OpenRouterNarrator {
    http: Client,
    cfg: NarratorConfig,
}

impl OpenRouterNarrator {
    pub fn new(cfg: NarratorConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_millis(cfg.request_timeout_ms))
            .build()
            .map_err(|e| TracksideError::NarrationError(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { http, cfg })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(NarratorConfig::default())
    }
}

#[async_trait]
impl Narrator for OpenRouterNarrator {
    async fn narrate(&self, snapshots: &[MatchSnapshot]) -> Result<String> {
        if snapshots.is_empty() {
            return Ok(String::new());
        }
        // A single snapshot goes as one object, several as an ordered array.
        let payload = if snapshots.len() == 1 {
            serde_json::to_string(&snapshots[0])?
        } else {
            serde_json::to_string(snapshots)?
        };

        let url = format!(
            "{}/chat/completions",
            self.cfg.base_url.trim_end_matches('/')
        );
        debug!(
            target = "narrator",
            snapshots = snapshots.len(),
            "POST {} via Chat Completions", url
        );

        let mut req = self
            .http
            .post(&url)
            .header("content-type", "application/json");
        if let Some(key) = &self.cfg.api_key {
            req = req.bearer_auth(key);
        }

        let body = json!({
            "model": self.cfg.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": payload },
            ],
            "temperature": self.cfg.temperature,
        });

        let resp = req
            .json(&body)
            .send()
            .await
            .map_err(|e| TracksideError::NarrationError(format!("Chat Completions HTTP error: {e}")))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            warn!(target = "narrator", %status, body = %text, "Chat Completions error");
            return Err(TracksideError::NarrationError(format!(
                "Chat Completions error: status={} body={}",
                status, text
            )));
        }

        let val: serde_json::Value = resp.json().await.map_err(|e| {
            TracksideError::NarrationError(format!("Failed to parse Chat Completions JSON: {e}"))
        })?;
        let text = extract_text_from_chat_completions(&val).ok_or_else(|| {
            TracksideError::NarrationError(
                "Missing choices[0].message.content in chat completions".into(),
            )
        })?;
        Ok(text.trim().to_string())
    }
}

fn extract_text_from_chat_completions(v: &serde_json::Value) -> Option<String> {
    v.get("choices")?
        .get(0)?
        .get("message")?
        .get("content")?
        .as_str()
        .map(|s| s.to_string())
}

/// Degraded-mode narrator used when no API key is configured: the pipeline
/// keeps running, nothing is ever narrated.
pub struct NoopNarrator;

#[async_trait]
impl Narrator for NoopNarrator {
    async fn narrate(&self, _snapshots: &[MatchSnapshot]) -> Result<String> {
        Ok(String::new())
    }
}
