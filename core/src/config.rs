//! Overlay configuration: env-driven defaults overlaid by an optional TOML
//! file (path via `TRACKSIDE_CONFIG`, default `./trackside.toml`).
//!
//! Missing credentials never panic here; `missing_keys` reports them so the
//! host can degrade to no-op narration instead of crashing.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration for the overlay pipeline.
#[derive(Clone, Debug)]
pub struct Config {
    /// Team shown on the overlay and in snapshots; producers may override
    /// it per match.
    pub team_number: String,
    pub narrator: NarratorConfig,
    pub speaker: SpeakerConfig,
    pub dispatcher: DispatcherConfig,
}

/// Narration generator client (OpenRouter chat completions).
#[derive(Clone, Debug)]
pub struct NarratorConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub request_timeout_ms: u64,
    pub temperature: f32,
}

impl Default for NarratorConfig {
    fn default() -> Self {
        Self {
            base_url: std::env::var("OPENROUTER_BASE_URL")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "https://openrouter.ai/api/v1".to_string()),
            model: std::env::var("OPENROUTER_MODEL")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "google/gemini-2.5-flash-lite".to_string()),
            api_key: std::env::var("OPENROUTER_API_KEY")
                .ok()
                .filter(|s| !s.is_empty()),
            request_timeout_ms: std::env::var("REQUEST_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(30_000),
            temperature: std::env::var("NARRATOR_TEMPERATURE")
                .ok()
                .and_then(|v| v.parse::<f32>().ok())
                .unwrap_or(0.7),
        }
    }
}

/// Speech synthesis and playback (ElevenLabs + local player binary).
#[derive(Clone, Debug)]
pub struct SpeakerConfig {
    pub api_key: Option<String>,
    /// Named voice (see the speaker's voice table) or a raw voice id.
    pub voice: String,
    /// Model alias (`fast` / `quality`) or a raw model id.
    pub model: String,
    pub sample_rate: u32,
    /// Preferred player binary; first of aplay/paplay/ffplay otherwise.
    pub player: Option<String>,
    pub temp_dir: PathBuf,
}

impl Default for SpeakerConfig {
    fn default() -> Self {
        Self {
            api_key: std::env::var("ELEVENLABS_API_KEY")
                .ok()
                .filter(|s| !s.is_empty()),
            voice: std::env::var("ELEVENLABS_VOICE")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "josh".to_string()),
            model: std::env::var("ELEVENLABS_MODEL")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "fast".to_string()),
            sample_rate: 16_000,
            player: std::env::var("TTS_PLAYER").ok().filter(|s| !s.is_empty()),
            temp_dir: std::env::var("TTS_TEMP_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| std::env::temp_dir()),
        }
    }
}

/// Narration rate limiting and scheduling.
#[derive(Clone, Debug)]
pub struct DispatcherConfig {
    /// Time-driven narration fires when this much has passed since the
    /// last remark and nothing notable is buffered.
    pub filler_interval: Duration,
    /// Upper bound on snapshots retained per narration cycle.
    pub max_payloads_per_call: usize,
    /// Cadence of the external scheduling loop.
    pub poll_interval: Duration,
    /// Fixed line spoken once per match by `play_intro`.
    pub intro_line: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        let filler_sec = std::env::var("FILLER_INTERVAL_SEC")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap_or(12.0);
        let poll_sec = std::env::var("POLL_INTERVAL_SEC")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap_or(0.5);
        Self {
            filler_interval: Duration::from_secs_f64(filler_sec.max(0.0)),
            max_payloads_per_call: std::env::var("MAX_PAYLOADS_PER_CALL")
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(3)
                .max(1),
            poll_interval: Duration::from_secs_f64(poll_sec.max(0.05)),
            intro_line: std::env::var("INTRO_LINE").unwrap_or_else(|_| {
                "Welcome trackside! The robot is at the start line and the course is live."
                    .to_string()
            }),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            team_number: std::env::var("TEAM_NUMBER")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "1".to_string()),
            narrator: NarratorConfig::default(),
            speaker: SpeakerConfig::default(),
            dispatcher: DispatcherConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file (path via `TRACKSIDE_CONFIG` or
    /// `./trackside.toml`), overlaying values onto env-driven defaults.
    pub fn load() -> Self {
        let default = Self::default();
        let path = std::env::var("TRACKSIDE_CONFIG").unwrap_or_else(|_| "trackside.toml".into());
        let p = Path::new(&path);
        if !p.exists() {
            tracing::info!(target = "config", path = %path, "No TOML config found; using defaults/env");
            return default;
        }
        match fs::read_to_string(p) {
            Ok(s) => match toml::from_str::<ConfigToml>(&s) {
                Ok(t) => t.overlay(default),
                Err(e) => {
                    tracing::warn!(target = "config", error = %e, "Failed to parse TOML; using defaults");
                    default
                }
            },
            Err(e) => {
                tracing::warn!(target = "config", error = %e, "Failed to read TOML; using defaults");
                default
            }
        }
    }

    /// Names of required credential env vars that are absent. Narration
    /// degrades to no-op when this is non-empty; nothing else breaks.
    pub fn missing_keys(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.narrator.api_key.is_none() {
            missing.push("OPENROUTER_API_KEY");
        }
        if self.speaker.api_key.is_none() {
            missing.push("ELEVENLABS_API_KEY");
        }
        missing
    }
}

// =========================
// TOML overlay definitions
// =========================

#[derive(Debug, Clone, Default, Deserialize)]
struct ConfigToml {
    pub team_number: Option<String>,
    pub narrator: Option<NarratorToml>,
    pub speaker: Option<SpeakerToml>,
    pub dispatcher: Option<DispatcherToml>,
}

impl ConfigToml {
    fn overlay(self, mut base: Config) -> Config {
        if let Some(t) = self.team_number {
            base.team_number = t;
        }
        if let Some(n) = self.narrator {
            n.apply(&mut base.narrator);
        }
        if let Some(s) = self.speaker {
            s.apply(&mut base.speaker);
        }
        if let Some(d) = self.dispatcher {
            d.apply(&mut base.dispatcher);
        }
        base
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct NarratorToml {
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub request_timeout_ms: Option<u64>,
    pub temperature: Option<f32>,
}
impl NarratorToml {
    fn apply(self, n: &mut NarratorConfig) {
        if let Some(x) = self.base_url {
            n.base_url = x;
        }
        if let Some(x) = self.model {
            n.model = x;
        }
        if let Some(x) = self.api_key {
            n.api_key = Some(x);
        }
        if let Some(x) = self.request_timeout_ms {
            n.request_timeout_ms = x;
        }
        if let Some(x) = self.temperature {
            n.temperature = x;
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct SpeakerToml {
    pub api_key: Option<String>,
    pub voice: Option<String>,
    pub model: Option<String>,
    pub sample_rate: Option<u32>,
    pub player: Option<String>,
    pub temp_dir: Option<PathBuf>,
}
impl SpeakerToml {
    fn apply(self, s: &mut SpeakerConfig) {
        if let Some(x) = self.api_key {
            s.api_key = Some(x);
        }
        if let Some(x) = self.voice {
            s.voice = x;
        }
        if let Some(x) = self.model {
            s.model = x;
        }
        if let Some(x) = self.sample_rate {
            s.sample_rate = x;
        }
        if let Some(x) = self.player {
            s.player = Some(x);
        }
        if let Some(x) = self.temp_dir {
            s.temp_dir = x;
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct DispatcherToml {
    pub filler_interval_sec: Option<f64>,
    pub max_payloads_per_call: Option<usize>,
    pub poll_interval_sec: Option<f64>,
    pub intro_line: Option<String>,
}
impl DispatcherToml {
    fn apply(self, d: &mut DispatcherConfig) {
        if let Some(x) = self.filler_interval_sec {
            d.filler_interval = Duration::from_secs_f64(x.max(0.0));
        }
        if let Some(x) = self.max_payloads_per_call {
            d.max_payloads_per_call = x.max(1);
        }
        if let Some(x) = self.poll_interval_sec {
            d.poll_interval = Duration::from_secs_f64(x.max(0.05));
        }
        if let Some(x) = self.intro_line {
            d.intro_line = x;
        }
    }
}
