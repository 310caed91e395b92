//! meeting-core — real-time meeting assistant engine.
//!
//! Captures two audio sources (physical microphone and system-audio
//! loopback), runs streaming speech-to-text on each with speaker
//! attribution, optionally translates utterances and speaks the
//! translations into a virtual-microphone device, and continuously
//! derives structured meeting insights from the running transcript.
//!
//! The embedding application drives everything through
//! [`engine::MeetingEngine`]:
//!
//! ```no_run
//! # async fn run() -> Result<(), meeting_core::EngineError> {
//! use meeting_core::{EngineConfig, MeetingEngine};
//!
//! let engine = MeetingEngine::new(EngineConfig::from_env());
//! let mut events = engine.events().expect("first subscriber");
//!
//! engine.start_transcription().await?;
//! engine.enable_text_translation("Russian")?;
//!
//! while let Some(event) = events.recv().await {
//!     println!("{}", serde_json::to_string(&event).unwrap());
//! }
//! # Ok(())
//! # }
//! ```

pub mod audio;
pub mod chat;
pub mod config;
pub mod engine;
pub mod error;
pub mod insight;
pub mod llm;
pub mod logging;
pub mod session;
pub mod stt;
pub mod transcript;
pub mod translate;
pub mod tts;

pub use config::EngineConfig;
pub use engine::{EngineEvent, MeetingEngine};
pub use error::{EngineError, WarningKind};
pub use transcript::{Source, Utterance};
