//! Text-to-speech: voice resolution, synthesis buffering, routing into the
//! mixer, and the playback state machine.

pub mod azure;
pub mod buffer;
pub mod controller;
pub mod router;
pub mod voices;

use std::future::Future;
use std::pin::Pin;

/// Sample rate of synthesized audio (16 kHz mono PCM16); expanded to the
/// mixer rate before playout.
pub const TTS_SAMPLE_RATE: u32 = 16_000;

/// Common trait for speech synthesizers (dyn-compatible).
pub trait Synthesizer: Send + Sync {
    /// Synthesize text with the given provider voice into raw 16 kHz mono
    /// PCM16 bytes.
    fn synthesize(
        &self,
        text: &str,
        voice: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<u8>>> + Send + '_>>;

    /// Display name for this synthesizer.
    fn name(&self) -> String;
}

pub use buffer::TtsBuffer;
pub use controller::{TranslationTtsController, TtsState};
pub use router::TtsRouter;
pub use voices::VoiceTable;
