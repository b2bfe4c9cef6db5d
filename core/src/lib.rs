// Trackside Core Library
// Match lifecycle state machine for the obstacle-course overlay

pub mod clock;
pub mod config;
pub mod leaderboard;
pub mod score;
pub mod state;

// Export core types
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use leaderboard::{InMemoryLeaderboard, LeaderboardEntry, LeaderboardStore};
pub use score::{DropRating, ScoreBreakdown};
pub use state::{BreakdownUpdate, MatchSnapshot, MatchState};

// Error types
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TracksideError {
    #[error("Narration error: {0}")]
    NarrationError(String),

    #[error("Speech error: {0}")]
    SpeechError(String),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}
pub type Result<T> = std::result::Result<T, TracksideError>;
