//! Speech playback: ElevenLabs synthesis plus a local audio player.
//!
//! Synthesis returns raw PCM which gets wrapped into a WAV in a temp dir and
//! played through the first available player binary (aplay, paplay or
//! ffplay, searched on PATH). `speak` replaces whatever is currently
//! playing. Playback state is published on a `watch` channel so callers can
//! await idle instead of polling; the guarantee consumers rely on is that
//! utterances never overlap.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task;
use tracing::{debug, info, warn};
use trackside_core::config::SpeakerConfig;
use trackside_core::{Result, TracksideError};

const API_BASE: &str = "https://api.elevenlabs.io/v1";
const SYNTH_TIMEOUT_MS: u64 = 20_000;

/// Named voices; unknown names pass through as raw ElevenLabs voice ids.
const VOICES: &[(&str, &str)] = &[
    ("guy", "34lPwSZ54D8fWbX1aHzk"),
    ("rex", "mtrellq69YZsNwzUSyXh"),
    ("rachel", "EXAVITQu4vr4xnSDxMaL"),
    ("adam", "pNInz6obpgDQGcFmaJgB"),
    ("bella", "EXAVITQu4vr4xnSDxMaL"),
    ("josh", "TxGEqnHWrfWFTfGW9XjX"),
];

/// Model aliases; unknown names pass through as raw model ids.
const MODELS: &[(&str, &str)] = &[
    ("fast", "eleven_flash_v2_5"),
    ("quality", "eleven_multilingual_v2"),
];

#[async_trait]
pub trait SpeechPlayer: Send + Sync {
    /// Synthesize `text` and start playing it, replacing any current audio.
    /// Returns once playback has started.
    async fn speak(&self, text: &str) -> Result<()>;

    fn is_playing(&self) -> bool;

    /// Force-stop current playback, if any.
    fn stop(&self);

    /// Resolve once no audio is playing.
    async fn wait_until_idle(&self);
}

pub struct ElevenLabsSpeaker {
    http: Client,
    cfg: SpeakerConfig,
    voice_id: String,
    model_id: String,
    playing_tx: watch::Sender<bool>,
    child: Arc<Mutex<Option<Child>>>,
    // Bumped on every speak; a stale playback monitor must not clear the
    // flag for the utterance that replaced it.
    generation: Arc<AtomicU64>,
}

impl ElevenLabsSpeaker {
    pub fn new(cfg: SpeakerConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_millis(SYNTH_TIMEOUT_MS))
            .build()
            .map_err(|e| TracksideError::SpeechError(format!("Failed to build HTTP client: {e}")))?;
        let voice_id = resolve_voice_id(&cfg.voice);
        let model_id = resolve_model_id(&cfg.model);
        let (playing_tx, _) = watch::channel(false);
        Ok(Self {
            http,
            cfg,
            voice_id,
            model_id,
            playing_tx,
            child: Arc::new(Mutex::new(None)),
            generation: Arc::new(AtomicU64::new(0)),
        })
    }

    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        let key = self.cfg.api_key.as_deref().ok_or_else(|| {
            TracksideError::SpeechError("ELEVENLABS_API_KEY not configured".into())
        })?;
        let url = format!(
            "{}/text-to-speech/{}?output_format=pcm_{}",
            API_BASE, self.voice_id, self.cfg.sample_rate
        );
        debug!(target = "speaker", chars = text.len(), "POST {}", url);

        let resp = self
            .http
            .post(&url)
            .header("xi-api-key", key)
            .json(&json!({ "text": text, "model_id": self.model_id }))
            .send()
            .await
            .map_err(|e| TracksideError::SpeechError(format!("Synthesis HTTP error: {e}")))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            warn!(target = "speaker", %status, body = %body, "Synthesis error");
            return Err(TracksideError::SpeechError(format!(
                "Synthesis error: status={} body={}",
                status, body
            )));
        }
        let pcm = resp
            .bytes()
            .await
            .map_err(|e| TracksideError::SpeechError(format!("Failed to read PCM body: {e}")))?;
        Ok(pcm.to_vec())
    }

    fn lock_child(&self) -> std::sync::MutexGuard<'_, Option<Child>> {
        self.child.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl SpeechPlayer for ElevenLabsSpeaker {
    async fn speak(&self, text: &str) -> Result<()> {
        if text.trim().is_empty() {
            return Ok(());
        }
        self.stop();

        let pcm = self.synthesize(text).await?;
        let wav = pcm16_to_wav(&pcm, self.cfg.sample_rate);
        let wav_path = self
            .cfg
            .temp_dir
            .join(format!("trackside_tts_{}.wav", gen_id()));
        tokio::fs::write(&wav_path, &wav).await?;

        let Some(player) = select_player(self.cfg.player.as_deref()) else {
            info!(target = "speaker", path = ?wav_path, "No audio player found; kept WAV on disk");
            return Ok(());
        };

        let child = spawn_player(&player, &wav_path)?;
        *self.lock_child() = Some(child);
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.playing_tx.send_replace(true);

        let slot = Arc::clone(&self.child);
        let gen_counter = Arc::clone(&self.generation);
        let playing = self.playing_tx.clone();
        task::spawn_blocking(move || {
            loop {
                {
                    let mut guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
                    match guard.as_mut() {
                        None => break,
                        Some(child) => match child.try_wait() {
                            Ok(Some(_)) | Err(_) => {
                                guard.take();
                                break;
                            }
                            Ok(None) => {}
                        },
                    }
                }
                std::thread::sleep(Duration::from_millis(50));
            }
            if gen_counter.load(Ordering::SeqCst) == generation {
                playing.send_replace(false);
            }
            let _ = std::fs::remove_file(&wav_path);
        });
        Ok(())
    }

    fn is_playing(&self) -> bool {
        *self.playing_tx.borrow()
    }

    fn stop(&self) {
        if let Some(mut child) = self.lock_child().take() {
            let _ = child.kill();
            let _ = child.wait();
        }
        self.playing_tx.send_replace(false);
    }

    async fn wait_until_idle(&self) {
        let mut rx = self.playing_tx.subscribe();
        while *rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }
}

/// Degraded-mode player: logs the line instead of speaking it. Used when no
/// speech credentials are configured.
pub struct NullSpeaker;

#[async_trait]
impl SpeechPlayer for NullSpeaker {
    async fn speak(&self, text: &str) -> Result<()> {
        info!(target = "speaker", %text, "No speech credentials; printing only");
        Ok(())
    }

    fn is_playing(&self) -> bool {
        false
    }

    fn stop(&self) {}

    async fn wait_until_idle(&self) {}
}

pub fn resolve_voice_id(voice: &str) -> String {
    let lower = voice.to_lowercase();
    VOICES
        .iter()
        .find(|(name, _)| *name == lower)
        .map(|(_, id)| (*id).to_string())
        .unwrap_or_else(|| voice.to_string())
}

pub fn resolve_model_id(model: &str) -> String {
    MODELS
        .iter()
        .find(|(name, _)| *name == model)
        .map(|(_, id)| (*id).to_string())
        .unwrap_or_else(|| model.to_string())
}

fn get_from_path(bin: &str) -> Option<PathBuf> {
    // If a path-like string is provided, respect it directly
    if bin.contains(std::path::MAIN_SEPARATOR) {
        let p = PathBuf::from(bin);
        return if p.exists() { Some(p) } else { None };
    }
    if let Some(paths_os) = std::env::var_os("PATH") {
        for dir in std::env::split_paths(&paths_os) {
            let candidate = dir.join(bin);
            if candidate.exists() {
                return Some(candidate);
            }
        }
    }
    None
}

fn select_player(pref: Option<&str>) -> Option<PathBuf> {
    if let Some(p) = pref {
        if let Some(bin) = get_from_path(p) {
            return Some(bin);
        }
    }
    get_from_path("aplay")
        .or_else(|| get_from_path("paplay"))
        .or_else(|| get_from_path("ffplay"))
}

fn spawn_player(player_bin: &Path, wav_path: &Path) -> Result<Child> {
    let name = player_bin
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("");
    let mut cmd = Command::new(player_bin);
    if name == "ffplay" {
        cmd.arg("-autoexit").arg("-nodisp");
    }
    cmd.arg(wav_path).stdout(Stdio::null()).stderr(Stdio::null());
    debug!(target = "speaker", command = ?cmd, "Starting playback");
    cmd.spawn().map_err(TracksideError::IoError)
}

/// Wrap 16-bit mono PCM into a minimal RIFF/WAVE container.
fn pcm16_to_wav(pcm: &[u8], sample_rate: u32) -> Vec<u8> {
    let data_len = pcm.len() as u32;
    let byte_rate = sample_rate * 2;
    let mut wav = Vec::with_capacity(44 + pcm.len());
    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&(36 + data_len).to_le_bytes());
    wav.extend_from_slice(b"WAVE");
    wav.extend_from_slice(b"fmt ");
    wav.extend_from_slice(&16u32.to_le_bytes());
    wav.extend_from_slice(&1u16.to_le_bytes()); // PCM
    wav.extend_from_slice(&1u16.to_le_bytes()); // mono
    wav.extend_from_slice(&sample_rate.to_le_bytes());
    wav.extend_from_slice(&byte_rate.to_le_bytes());
    wav.extend_from_slice(&2u16.to_le_bytes()); // block align
    wav.extend_from_slice(&16u16.to_le_bytes()); // bits per sample
    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&data_len.to_le_bytes());
    wav.extend_from_slice(pcm);
    wav
}

fn gen_id() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    format!("{:x}", now)
}
