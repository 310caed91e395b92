//! Streaming speech-recognition client.
//!
//! Speaks the speech-service websocket protocol: header-framed text
//! messages (`speech.config`, `speech.context`) going up, binary
//! audio frames with a length-prefixed header block, and JSON-bodied
//! `speech.hypothesis` / `speech.phrase` messages coming back. Diarization
//! attributes phrases to `Guest-N` speaker ids; continuous language
//! identification is enabled when the configured language is `auto`.
//!
//! Connection errors are reported as `RecognitionEvent::Canceled` and the
//! worker reconnects while audio keeps arriving — a transient provider
//! failure never kills the session.

use std::time::Duration;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::connect_async;
use tracing::{debug, info, warn};

use super::{RecognitionEvent, Recognizer, RecognizerHandle};
use crate::audio::CAPTURE_SAMPLE_RATE;

/// Streaming recognition settings.
#[derive(Debug, Clone)]
pub struct AzureSttConfig {
    pub key: String,
    pub region: String,
    /// Recognition language code, or "auto".
    pub language: String,
    pub candidate_languages: Vec<String>,
    pub enable_diarization: bool,
    pub max_speakers: u32,
}

/// Websocket streaming recognizer.
pub struct AzureRecognizer {
    config: AzureSttConfig,
}

impl AzureRecognizer {
    pub fn new(config: AzureSttConfig) -> Self {
        Self { config }
    }
}

impl Recognizer for AzureRecognizer {
    fn start(
        &self,
        source_label: &str,
        events: mpsc::UnboundedSender<RecognitionEvent>,
    ) -> anyhow::Result<RecognizerHandle> {
        if self.config.key.is_empty() || self.config.region.is_empty() {
            anyhow::bail!("speech service key/region not configured");
        }

        let (audio_tx, audio_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let config = self.config.clone();
        let label = source_label.to_string();

        let task = tokio::spawn(async move {
            run_stream(config, label, audio_rx, events).await;
        });

        Ok(RecognizerHandle::new(audio_tx, task))
    }
}

// ---------------------------------------------------------------------------
// Wire framing
// ---------------------------------------------------------------------------

fn timestamp() -> String {
    Utc::now().to_rfc3339()
}

/// Build a header-framed text message.
fn text_message(path: &str, request_id: &str, body: &str) -> String {
    format!(
        "Path:{path}\r\nX-RequestId:{request_id}\r\nX-Timestamp:{ts}\r\n\
         Content-Type:application/json; charset=utf-8\r\n\r\n{body}",
        ts = timestamp()
    )
}

/// Build a binary audio message: u16 big-endian header length, the header
/// block, then the PCM payload.
fn audio_message(request_id: &str, payload: &[u8]) -> Vec<u8> {
    let headers = format!(
        "Path:audio\r\nX-RequestId:{request_id}\r\nX-Timestamp:{ts}\r\n\
         Content-Type:audio/x-wav",
        ts = timestamp()
    );
    let header_bytes = headers.as_bytes();
    let mut out = Vec::with_capacity(2 + header_bytes.len() + payload.len());
    out.extend_from_slice(&(header_bytes.len() as u16).to_be_bytes());
    out.extend_from_slice(header_bytes);
    out.extend_from_slice(payload);
    out
}

/// 44-byte WAV header describing the 16 kHz mono PCM16 push stream; sent
/// as the first audio payload of each connection. Both size fields stay
/// zero — the stream's length is unknown up front and the service ignores
/// them.
fn wav_header(sample_rate: u32) -> Vec<u8> {
    let mut hdr = Vec::with_capacity(44);
    hdr.extend_from_slice(b"RIFF");
    hdr.extend_from_slice(&0u32.to_le_bytes());
    hdr.extend_from_slice(b"WAVE");

    hdr.extend_from_slice(b"fmt ");
    hdr.extend_from_slice(&16u32.to_le_bytes());
    hdr.extend_from_slice(&1u16.to_le_bytes()); // PCM encoding
    hdr.extend_from_slice(&1u16.to_le_bytes()); // mono
    hdr.extend_from_slice(&sample_rate.to_le_bytes());
    hdr.extend_from_slice(&(sample_rate * 2).to_le_bytes()); // bytes/second
    hdr.extend_from_slice(&2u16.to_le_bytes()); // frame stride
    hdr.extend_from_slice(&16u16.to_le_bytes()); // bits per sample

    hdr.extend_from_slice(b"data");
    hdr.extend_from_slice(&0u32.to_le_bytes());
    hdr
}

/// The speech.context body: phrase detection mode plus language-id
/// candidates in auto mode.
fn speech_context_body(config: &AzureSttConfig) -> String {
    let mut context = serde_json::json!({
        "phraseDetection": {
            "mode": "Conversation",
            "speakerDiarization": {
                "mode": if config.enable_diarization { "Enabled" } else { "Disabled" },
                "audioSessionId": uuid::Uuid::new_v4().as_simple().to_string(),
                "maxSpeakers": config.max_speakers,
            },
        },
    });
    if config.language == "auto" {
        context["languageId"] = serde_json::json!({
            "mode": "DetectContinuous",
            "languages": config.candidate_languages,
        });
    }
    context.to_string()
}

/// A parsed server message.
#[derive(Debug, PartialEq)]
enum ParsedMessage {
    Event(RecognitionEvent),
    TurnEnd,
    Ignored,
}

/// Parse one header-framed text message from the server.
fn parse_server_message(raw: &str) -> ParsedMessage {
    let Some((headers, body)) = raw.split_once("\r\n\r\n") else {
        return ParsedMessage::Ignored;
    };

    let path = headers
        .lines()
        .find_map(|line| line.strip_prefix("Path:"))
        .map(str::trim)
        .unwrap_or_default();

    match path {
        "speech.hypothesis" => {
            let Ok(json) = serde_json::from_str::<serde_json::Value>(body) else {
                return ParsedMessage::Ignored;
            };
            let text = json["Text"].as_str().unwrap_or_default().to_string();
            ParsedMessage::Event(RecognitionEvent::Interim {
                text,
                speaker_id: json["SpeakerId"].as_str().map(String::from),
                language: json["PrimaryLanguage"]["Language"]
                    .as_str()
                    .map(String::from),
            })
        }
        "speech.phrase" => {
            let Ok(json) = serde_json::from_str::<serde_json::Value>(body) else {
                return ParsedMessage::Ignored;
            };
            match json["RecognitionStatus"].as_str() {
                Some("Success") => {
                    let text = json["DisplayText"].as_str().unwrap_or_default().to_string();
                    ParsedMessage::Event(RecognitionEvent::Final {
                        text,
                        speaker_id: json["SpeakerId"].as_str().map(String::from),
                        language: json["PrimaryLanguage"]["Language"]
                            .as_str()
                            .map(String::from),
                    })
                }
                Some("Error") => ParsedMessage::Event(RecognitionEvent::Canceled {
                    message: json["DisplayText"]
                        .as_str()
                        .unwrap_or("recognition error")
                        .to_string(),
                }),
                // InitialSilenceTimeout, NoMatch, EndOfDictation, ...
                _ => ParsedMessage::Ignored,
            }
        }
        "turn.end" => ParsedMessage::TurnEnd,
        _ => ParsedMessage::Ignored,
    }
}

// ---------------------------------------------------------------------------
// Stream worker
// ---------------------------------------------------------------------------

/// Why one connection ended.
enum StreamEnd {
    /// The audio channel closed: the session is over.
    AudioClosed,
    /// The server closed the socket; reconnect if audio keeps coming.
    ServerClosed,
}

async fn run_stream(
    config: AzureSttConfig,
    source_label: String,
    mut audio_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    events: mpsc::UnboundedSender<RecognitionEvent>,
) {
    loop {
        match connect_and_stream(&config, &source_label, &mut audio_rx, &events).await {
            Ok(StreamEnd::AudioClosed) => break,
            Ok(StreamEnd::ServerClosed) => {
                debug!(source = %source_label, "Recognizer connection closed; reconnecting");
            }
            Err(e) => {
                let _ = events.send(RecognitionEvent::Canceled {
                    message: e.to_string(),
                });
                warn!(source = %source_label, "Recognizer stream error: {}", e);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
        // Stop reconnecting once the feeder is gone.
        if audio_rx.is_closed() && audio_rx.is_empty() {
            break;
        }
    }
    info!(source = %source_label, "Recognizer stream finished");
}

async fn connect_and_stream(
    config: &AzureSttConfig,
    source_label: &str,
    audio_rx: &mut mpsc::UnboundedReceiver<Vec<u8>>,
    events: &mpsc::UnboundedSender<RecognitionEvent>,
) -> anyhow::Result<StreamEnd> {
    let connection_id = uuid::Uuid::new_v4().as_simple().to_string();
    let request_id = uuid::Uuid::new_v4().as_simple().to_string();

    let language = if config.language == "auto" {
        config
            .candidate_languages
            .first()
            .map(String::as_str)
            .unwrap_or("en-US")
    } else {
        config.language.as_str()
    };

    let url = format!(
        "wss://{}.stt.speech.microsoft.com/speech/recognition/conversation/cognitiveservices/v1\
         ?language={}&format=detailed",
        config.region, language
    );

    let mut request = url.into_client_request()?;
    let headers = request.headers_mut();
    headers.insert(
        "Ocp-Apim-Subscription-Key",
        http::HeaderValue::from_str(&config.key)?,
    );
    headers.insert(
        "X-ConnectionId",
        http::HeaderValue::from_str(&connection_id)?,
    );

    let (ws, _response) = connect_async(request).await?;
    info!(source = %source_label, "Recognizer connected");
    let (mut ws_tx, mut ws_rx) = ws.split();

    // Session setup: speech.config, speech.context, then the WAV header
    // describing the push-stream format.
    let config_body = serde_json::json!({
        "context": {
            "system": { "name": "meeting-core", "version": env!("CARGO_PKG_VERSION") },
            "os": { "platform": std::env::consts::OS },
        }
    })
    .to_string();
    ws_tx
        .send(Message::Text(text_message(
            "speech.config",
            &request_id,
            &config_body,
        )))
        .await?;
    ws_tx
        .send(Message::Text(text_message(
            "speech.context",
            &request_id,
            &speech_context_body(config),
        )))
        .await?;
    ws_tx
        .send(Message::Binary(audio_message(
            &request_id,
            &wav_header(CAPTURE_SAMPLE_RATE),
        )))
        .await?;

    let mut audio_done = false;

    loop {
        tokio::select! {
            chunk = audio_rx.recv(), if !audio_done => {
                match chunk {
                    Some(pcm) => {
                        ws_tx.send(Message::Binary(audio_message(&request_id, &pcm))).await?;
                    }
                    None => {
                        // End of audio: send an empty frame and wait for
                        // the server to flush its final results.
                        audio_done = true;
                        ws_tx.send(Message::Binary(audio_message(&request_id, &[]))).await?;
                    }
                }
            }
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(raw))) => match parse_server_message(&raw) {
                        ParsedMessage::Event(event) => {
                            let _ = events.send(event);
                        }
                        ParsedMessage::TurnEnd => {
                            if audio_done {
                                let _ = ws_tx.close().await;
                                return Ok(StreamEnd::AudioClosed);
                            }
                        }
                        ParsedMessage::Ignored => {}
                    },
                    Some(Ok(Message::Close(_))) | None => {
                        return Ok(if audio_done {
                            StreamEnd::AudioClosed
                        } else {
                            StreamEnd::ServerClosed
                        });
                    }
                    Some(Ok(_)) => {} // ping/pong/binary: ignored
                    Some(Err(e)) => return Err(e.into()),
                }
            }
            // Bounded drain after end-of-audio.
            _ = tokio::time::sleep(Duration::from_secs(3)), if audio_done => {
                let _ = ws_tx.close().await;
                return Ok(StreamEnd::AudioClosed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_message_framing() {
        let msg = text_message("speech.config", "req-1", "{\"a\":1}");
        let (headers, body) = msg.split_once("\r\n\r\n").unwrap();
        assert!(headers.contains("Path:speech.config"));
        assert!(headers.contains("X-RequestId:req-1"));
        assert!(headers.contains("Content-Type:application/json"));
        assert_eq!(body, "{\"a\":1}");
    }

    #[test]
    fn test_audio_message_header_prefix() {
        let payload = [1u8, 2, 3, 4];
        let msg = audio_message("req-1", &payload);
        let header_len = u16::from_be_bytes([msg[0], msg[1]]) as usize;
        let headers = std::str::from_utf8(&msg[2..2 + header_len]).unwrap();
        assert!(headers.contains("Path:audio"));
        assert_eq!(&msg[2 + header_len..], &payload);
    }

    #[test]
    fn test_wav_header_format_fields() {
        let hdr = wav_header(16_000);
        assert_eq!(hdr.len(), 44);
        assert_eq!(&hdr[0..4], b"RIFF");
        assert_eq!(&hdr[8..12], b"WAVE");
        // Sample rate at offset 24.
        assert_eq!(u32::from_le_bytes([hdr[24], hdr[25], hdr[26], hdr[27]]), 16_000);
        // Mono at offset 22.
        assert_eq!(u16::from_le_bytes([hdr[22], hdr[23]]), 1);
    }

    #[test]
    fn test_parse_hypothesis() {
        let raw = "Path:speech.hypothesis\r\nX-RequestId:x\r\n\r\n\
                   {\"Text\":\"hello wor\",\"SpeakerId\":\"Guest-1\"}";
        match parse_server_message(raw) {
            ParsedMessage::Event(RecognitionEvent::Interim {
                text, speaker_id, ..
            }) => {
                assert_eq!(text, "hello wor");
                assert_eq!(speaker_id.as_deref(), Some("Guest-1"));
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn test_parse_phrase_success_with_language() {
        let raw = "Path:speech.phrase\r\n\r\n\
                   {\"RecognitionStatus\":\"Success\",\"DisplayText\":\"Hello world.\",\
                    \"SpeakerId\":\"Guest-2\",\"PrimaryLanguage\":{\"Language\":\"en-US\"}}";
        match parse_server_message(raw) {
            ParsedMessage::Event(RecognitionEvent::Final {
                text,
                speaker_id,
                language,
            }) => {
                assert_eq!(text, "Hello world.");
                assert_eq!(speaker_id.as_deref(), Some("Guest-2"));
                assert_eq!(language.as_deref(), Some("en-US"));
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn test_parse_nomatch_and_turn_end() {
        let nomatch = "Path:speech.phrase\r\n\r\n{\"RecognitionStatus\":\"NoMatch\"}";
        assert_eq!(parse_server_message(nomatch), ParsedMessage::Ignored);

        let turn_end = "Path:turn.end\r\n\r\n{}";
        assert_eq!(parse_server_message(turn_end), ParsedMessage::TurnEnd);

        assert_eq!(parse_server_message("no frame separator"), ParsedMessage::Ignored);
    }

    #[test]
    fn test_parse_error_status_maps_to_canceled() {
        let raw = "Path:speech.phrase\r\n\r\n{\"RecognitionStatus\":\"Error\"}";
        match parse_server_message(raw) {
            ParsedMessage::Event(RecognitionEvent::Canceled { message }) => {
                assert_eq!(message, "recognition error");
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn test_context_body_includes_language_id_in_auto() {
        let config = AzureSttConfig {
            key: "k".into(),
            region: "r".into(),
            language: "auto".into(),
            candidate_languages: vec!["en-US".into(), "ru-RU".into()],
            enable_diarization: true,
            max_speakers: 4,
        };
        let body: serde_json::Value =
            serde_json::from_str(&speech_context_body(&config)).unwrap();
        assert_eq!(body["languageId"]["mode"], "DetectContinuous");
        assert_eq!(body["languageId"]["languages"][1], "ru-RU");
        assert_eq!(body["phraseDetection"]["speakerDiarization"]["mode"], "Enabled");

        let fixed = AzureSttConfig {
            language: "en-US".into(),
            ..config
        };
        let body: serde_json::Value =
            serde_json::from_str(&speech_context_body(&fixed)).unwrap();
        assert!(body.get("languageId").is_none());
    }
}
