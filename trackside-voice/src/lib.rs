// Trackside narration stack
// Snapshot queue -> rate-limited dispatch -> text generation -> speech

pub mod dispatcher;
pub mod narrator;
pub mod speaker;

pub use dispatcher::NarrationDispatcher;
pub use narrator::{Narrator, NoopNarrator, OpenRouterNarrator};
pub use speaker::{ElevenLabsSpeaker, NullSpeaker, SpeechPlayer};
