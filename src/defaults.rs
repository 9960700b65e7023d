//! Default configuration constants for voxline.
//!
//! Shared between the config types, the CLI and the call session so the
//! same numbers apply no matter where a value is left unset.

/// Address the media-stream server listens on.
pub const BIND_ADDR: &str = "0.0.0.0:3000";

/// Character the model is instructed to insert at natural pauses.
///
/// Text between two markers becomes one speech fragment.
pub const PAUSE_MARKER: char = '•';

/// Provisional transcripts must be longer than this (in characters) to count
/// as the caller talking over the assistant.
///
/// Short filler sounds ("uh", "mm") stay below it.
pub const INTERRUPT_MIN_CHARS: usize = 5;

/// How long the playback cursor waits for a missing fragment before skipping it.
pub const STALL_TIMEOUT_MS: u64 = 4000;

/// Maximum number of synthesis requests in flight per call.
pub const MAX_CONCURRENT_RENDERS: usize = 4;

/// Queue depth for caller audio waiting to be sent to the recognizer.
///
/// The telephony side delivers a 20ms frame every 20ms, so 250 frames is
/// five seconds of backlog.
pub const RECOGNIZER_BUFFER: usize = 250;

/// Telephony audio sample rate in Hz (8kHz mu-law).
pub const SAMPLE_RATE: u32 = 8000;

/// Telephony audio encoding understood by both providers.
pub const AUDIO_ENCODING: &str = "mulaw";

/// Default chat model.
pub const LLM_MODEL: &str = "gpt-4o";

/// Default chat-completions API base.
pub const LLM_API_BASE: &str = "https://api.openai.com/v1";

/// Default synthesis voice.
pub const VOICE_MODEL: &str = "aura-asteria-en";

/// Default speech API base (synthesis and live transcription).
pub const SPEECH_API_BASE: &str = "https://api.deepgram.com/v1";

/// Default live transcription model.
pub const STT_MODEL: &str = "nova-2";

/// Default transcription language.
pub const STT_LANGUAGE: &str = "en";

/// Silence (ms) after which the recognizer marks speech as final.
pub const ENDPOINTING_MS: u32 = 200;

/// Gap (ms) after which the recognizer emits an utterance-end event.
pub const UTTERANCE_END_MS: u32 = 1000;

/// Environment variable holding the chat model API key.
pub const LLM_API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Environment variable holding the speech API key.
pub const SPEECH_API_KEY_ENV: &str = "DEEPGRAM_API_KEY";

/// First thing the caller hears.
pub const GREETING: &str = "Hello, thanks for calling. • How can I help you today?";

/// Default system prompt.
///
/// Only the pause-marker instruction matters to the pipeline; the rest is
/// placeholder persona text meant to be replaced in the config file.
pub const SYSTEM_PROMPT: &str = "You are a helpful phone assistant. \
Keep your responses brief but friendly. Don't ask more than 1 question at a time. \
You must add a '•' symbol every 5 to 10 words at natural pauses where your response can be split for text to speech.";
