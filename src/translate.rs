//! Translation worker.
//!
//! A bounded queue of utterances feeding a single worker task, so
//! translation output order always matches input order. The queue drops on
//! overflow (capacity 5); dropped items are logged, never retried. Each
//! item is translated with one LLM call and fanned out to the
//! text-translation sink and, when TTS-to-mic is enabled, the TTS
//! controller.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Local};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::llm::{prompts, ChatApi, ChatMessage, LlmError};
use crate::transcript::Source;
use crate::tts::TranslationTtsController;

/// Bounded queue capacity; overflow is dropped.
const QUEUE_CAPACITY: usize = 5;

/// Dequeue timeout per worker iteration.
const RECV_TIMEOUT: Duration = Duration::from_secs(1);

/// One utterance awaiting translation.
#[derive(Debug, Clone)]
pub struct TranslationJob {
    pub text: String,
    pub source: Source,
    pub speaker_id: Option<String>,
    pub timestamp: DateTime<Local>,
    generation: u64,
}

/// A finished translation, in input order.
#[derive(Debug, Clone)]
pub struct TranslationResult {
    pub translation: String,
    pub source: Source,
    pub speaker_id: Option<String>,
    pub timestamp: DateTime<Local>,
}

/// Shared translation feature state, updated by the engine and read by the
/// worker per item.
#[derive(Debug)]
pub struct TranslationSettings {
    text_enabled: AtomicBool,
    tts_enabled: AtomicBool,
    text_language: Mutex<String>,
    tts_language: Mutex<String>,
}

impl Default for TranslationSettings {
    fn default() -> Self {
        Self {
            text_enabled: AtomicBool::new(false),
            tts_enabled: AtomicBool::new(false),
            text_language: Mutex::new("English".to_string()),
            tts_language: Mutex::new("English".to_string()),
        }
    }
}

impl TranslationSettings {
    pub fn text_translation_enabled(&self) -> bool {
        self.text_enabled.load(Ordering::SeqCst)
    }

    pub fn tts_to_mic_enabled(&self) -> bool {
        self.tts_enabled.load(Ordering::SeqCst)
    }

    /// Whether any translation feature wants utterances translated.
    pub fn any_enabled(&self) -> bool {
        self.text_translation_enabled() || self.tts_to_mic_enabled()
    }

    pub fn set_text_translation(&self, enabled: bool) {
        self.text_enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn set_tts_to_mic(&self, enabled: bool) {
        self.tts_enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn set_text_language(&self, language: &str) {
        *self.text_language.lock().unwrap() = language.to_string();
    }

    pub fn set_tts_language(&self, language: &str) {
        *self.tts_language.lock().unwrap() = language.to_string();
    }

    /// Target language for the next item: the text-translation language
    /// when that feature is on, otherwise the TTS language.
    pub fn target_language(&self) -> String {
        if self.text_translation_enabled() {
            self.text_language.lock().unwrap().clone()
        } else {
            self.tts_language.lock().unwrap().clone()
        }
    }
}

/// Callback for finished translations.
pub type TranslationSink = Box<dyn Fn(TranslationResult) + Send + Sync + 'static>;

/// Callback for failed translations (already classified).
pub type TranslationErrorSink = Box<dyn Fn(LlmError) + Send + Sync + 'static>;

/// Handle to the single translation worker.
pub struct TranslationWorker {
    tx: Option<mpsc::Sender<TranslationJob>>,
    generation: Arc<AtomicU64>,
    task: tokio::task::JoinHandle<()>,
}

impl TranslationWorker {
    /// Spawn the worker.
    pub fn spawn(
        llm: Arc<dyn ChatApi>,
        settings: Arc<TranslationSettings>,
        controller: Arc<TranslationTtsController>,
        on_translation: TranslationSink,
        on_error: TranslationErrorSink,
    ) -> Self {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let generation = Arc::new(AtomicU64::new(0));
        let gen = generation.clone();

        let task = tokio::spawn(async move {
            worker_loop(rx, gen, llm, settings, controller, on_translation, on_error).await;
        });

        Self {
            tx: Some(tx),
            generation,
            task,
        }
    }

    /// Enqueue an utterance; returns `false` when the queue is full (the
    /// item is dropped, back-pressure by discard).
    pub fn try_enqueue(
        &self,
        text: &str,
        source: Source,
        speaker_id: Option<String>,
        timestamp: DateTime<Local>,
    ) -> bool {
        let Some(tx) = &self.tx else { return false };
        let job = TranslationJob {
            text: text.to_string(),
            source,
            speaker_id,
            timestamp,
            generation: self.generation.load(Ordering::SeqCst),
        };
        match tx.try_send(job) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(job)) => {
                warn!(text = %job.text, "Translation queue full; dropping utterance");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Invalidate everything currently queued; the worker skips stale
    /// generations instead of translating them.
    pub fn clear_pending(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        debug!("Translation queue cleared");
    }

    /// Close the queue and wait briefly for the worker to finish.
    pub async fn shutdown(mut self) {
        self.tx.take();
        if tokio::time::timeout(Duration::from_secs(2), &mut self.task)
            .await
            .is_err()
        {
            warn!("Translation worker did not stop in time; aborting");
            self.task.abort();
        }
    }
}

async fn worker_loop(
    mut rx: mpsc::Receiver<TranslationJob>,
    generation: Arc<AtomicU64>,
    llm: Arc<dyn ChatApi>,
    settings: Arc<TranslationSettings>,
    controller: Arc<TranslationTtsController>,
    on_translation: TranslationSink,
    on_error: TranslationErrorSink,
) {
    info!("Translation worker started");

    loop {
        let job = match tokio::time::timeout(RECV_TIMEOUT, rx.recv()).await {
            Err(_) => continue,
            Ok(None) => break,
            Ok(Some(job)) => job,
        };

        // Items queued before the last clear are stale.
        if job.generation != generation.load(Ordering::SeqCst) {
            debug!(text = %job.text, "Skipping stale translation job");
            continue;
        }

        let target = settings.target_language();
        let prompt = prompts::translation_prompt(&job.text, &target);
        let messages = vec![
            ChatMessage::system(
                "You are a professional translator. Reply with only the translation.",
            ),
            ChatMessage::user(prompt),
        ];

        match llm.complete(messages, 300, 0.3).await {
            Ok(translation) => {
                // A clear that raced the in-flight call abandons the result.
                if job.generation != generation.load(Ordering::SeqCst) {
                    debug!(text = %job.text, "Dropping translation finished after clear");
                    continue;
                }
                debug!(
                    original = %job.text,
                    translation = %translation,
                    target = %target,
                    "Translation complete"
                );
                if settings.tts_to_mic_enabled() && !translation.trim().is_empty() {
                    controller.add_translation(&translation);
                }
                if settings.text_translation_enabled() {
                    on_translation(TranslationResult {
                        translation,
                        source: job.source,
                        speaker_id: job.speaker_id,
                        timestamp: job.timestamp,
                    });
                }
            }
            Err(e) => {
                // Typed warning upstream; the worker itself never dies.
                on_error(e);
            }
        }
    }

    info!("Translation worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioMixer;
    use crate::tts::{TtsBuffer, TtsRouter, VoiceTable};
    use std::future::Future;
    use std::pin::Pin;

    /// ChatApi fake: echoes the source text wrapped in brackets, optionally
    /// gated on a notify so tests can stall the worker.
    struct FakeLlm {
        gate: Option<Arc<tokio::sync::Semaphore>>,
        fail: bool,
    }

    impl ChatApi for FakeLlm {
        fn complete(
            &self,
            messages: Vec<ChatMessage>,
            _max_tokens: u32,
            _temperature: f32,
        ) -> Pin<Box<dyn Future<Output = Result<String, LlmError>> + Send + '_>> {
            let gate = self.gate.clone();
            let fail = self.fail;
            Box::pin(async move {
                if let Some(gate) = gate {
                    let _permit = gate.acquire().await.unwrap();
                }
                if fail {
                    return Err(LlmError::Timeout);
                }
                let user = messages.last().unwrap().content.clone();
                // The prompt embeds the source text after the marker line.
                let original = user
                    .split("Text to translate:\n")
                    .nth(1)
                    .unwrap_or("")
                    .split('\n')
                    .next()
                    .unwrap_or("")
                    .to_string();
                Ok(format!("<{original}>"))
            })
        }
    }

    struct NullSynth;
    impl crate::tts::Synthesizer for NullSynth {
        fn synthesize(
            &self,
            _text: &str,
            _voice: &str,
        ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<u8>>> + Send + '_>> {
            Box::pin(async { Ok(Vec::new()) })
        }
        fn name(&self) -> String {
            "null".into()
        }
    }

    fn test_controller() -> Arc<TranslationTtsController> {
        let mixer = Arc::new(AudioMixer::new());
        let buffer = Arc::new(TtsBuffer::new(Arc::new(NullSynth), VoiceTable::default()));
        let router = Arc::new(TtsRouter::new(mixer, false));
        TranslationTtsController::new(buffer, router)
    }

    fn enabled_settings() -> Arc<TranslationSettings> {
        let settings = Arc::new(TranslationSettings::default());
        settings.set_text_translation(true);
        settings
    }

    #[tokio::test]
    async fn test_order_preservation() {
        let results = Arc::new(Mutex::new(Vec::new()));
        let sink_results = results.clone();

        let worker = TranslationWorker::spawn(
            Arc::new(FakeLlm { gate: None, fail: false }),
            enabled_settings(),
            test_controller(),
            Box::new(move |r| sink_results.lock().unwrap().push(r.translation)),
            Box::new(|_| panic!("unexpected error")),
        );

        for text in ["one", "two", "three", "four"] {
            assert!(worker.try_enqueue(text, Source::Mic, None, Local::now()));
        }

        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if results.lock().unwrap().len() == 4 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(
            *results.lock().unwrap(),
            vec!["<one>", "<two>", "<three>", "<four>"]
        );
        worker.shutdown().await;
    }

    #[tokio::test]
    async fn test_queue_drops_on_overflow() {
        // Stall the worker so the queue fills up.
        let gate = Arc::new(tokio::sync::Semaphore::new(0));
        let worker = TranslationWorker::spawn(
            Arc::new(FakeLlm { gate: Some(gate.clone()), fail: false }),
            enabled_settings(),
            test_controller(),
            Box::new(|_| {}),
            Box::new(|_| {}),
        );

        // Give the worker time to pull the first job off the queue.
        assert!(worker.try_enqueue("head", Source::Mic, None, Local::now()));
        tokio::time::sleep(Duration::from_millis(50)).await;

        for i in 0..QUEUE_CAPACITY {
            assert!(
                worker.try_enqueue(&format!("q{i}"), Source::Mic, None, Local::now()),
                "slot {i} should fit"
            );
        }
        // Queue is now full; the next item is dropped.
        assert!(!worker.try_enqueue("overflow", Source::Mic, None, Local::now()));

        gate.add_permits(100);
        worker.shutdown().await;
    }

    #[tokio::test]
    async fn test_clear_pending_skips_stale_jobs() {
        let results = Arc::new(Mutex::new(Vec::new()));
        let sink_results = results.clone();

        let gate = Arc::new(tokio::sync::Semaphore::new(0));
        let worker = TranslationWorker::spawn(
            Arc::new(FakeLlm { gate: Some(gate.clone()), fail: false }),
            enabled_settings(),
            test_controller(),
            Box::new(move |r| sink_results.lock().unwrap().push(r.translation)),
            Box::new(|_| {}),
        );

        worker.try_enqueue("stale1", Source::Mic, None, Local::now());
        worker.try_enqueue("stale2", Source::Mic, None, Local::now());
        worker.clear_pending();
        worker.try_enqueue("fresh", Source::Mic, None, Local::now());

        gate.add_permits(100);
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if !results.lock().unwrap().is_empty() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(*results.lock().unwrap(), vec!["<fresh>"]);
        worker.shutdown().await;
    }

    #[tokio::test]
    async fn test_errors_surface_without_killing_worker() {
        let errors = Arc::new(Mutex::new(Vec::new()));
        let error_sink = errors.clone();
        let results = Arc::new(Mutex::new(Vec::new()));

        // First call fails (timeout), the worker keeps going.
        let worker = TranslationWorker::spawn(
            Arc::new(FakeLlm { gate: None, fail: true }),
            enabled_settings(),
            test_controller(),
            {
                let results = results.clone();
                Box::new(move |r| results.lock().unwrap().push(r.translation))
            },
            Box::new(move |e| error_sink.lock().unwrap().push(e.to_string())),
        );

        worker.try_enqueue("doomed", Source::System, None, Local::now());
        worker.try_enqueue("also doomed", Source::System, None, Local::now());

        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if errors.lock().unwrap().len() == 2 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        assert!(results.lock().unwrap().is_empty());
        worker.shutdown().await;
    }
}
