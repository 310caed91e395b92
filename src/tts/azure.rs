//! Cloud speech-synthesis client.
//!
//! REST synthesis against the region-scoped endpoint: SSML in, raw
//! 16 kHz 16-bit mono PCM out, which is exactly the format the TTS buffer
//! stores.

use std::future::Future;
use std::pin::Pin;

use tracing::info;

use super::Synthesizer;

/// Build the SSML document for one synthesis request, escaping the text
/// inline as the body is assembled.
fn build_ssml(voice: &str, text: &str) -> String {
    // The voice name carries its own locale prefix (e.g. "tr-TR-...").
    let lang = voice.rsplitn(2, '-').nth(1).unwrap_or("en-US");

    let mut ssml = format!(
        "<speak version='1.0' xmlns='http://www.w3.org/2001/10/synthesis' \
         xml:lang='{lang}'><voice name='{voice}'>"
    );
    for ch in text.chars() {
        match ch {
            '<' => ssml.push_str("&lt;"),
            '>' => ssml.push_str("&gt;"),
            '&' => ssml.push_str("&amp;"),
            '\'' => ssml.push_str("&apos;"),
            '"' => ssml.push_str("&quot;"),
            other => ssml.push(other),
        }
    }
    ssml.push_str("</voice></speak>");
    ssml
}

/// Speech-service synthesis client.
pub struct AzureSynthesizer {
    api_key: String,
    region: String,
    client: reqwest::Client,
}

impl AzureSynthesizer {
    pub fn new(api_key: &str, region: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            region: region.to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "https://{}.tts.speech.microsoft.com/cognitiveservices/v1",
            self.region
        )
    }
}

impl Synthesizer for AzureSynthesizer {
    fn synthesize(
        &self,
        text: &str,
        voice: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<u8>>> + Send + '_>> {
        let text = text.to_string();
        let voice = voice.to_string();
        Box::pin(async move {
            if text.trim().is_empty() {
                return Ok(Vec::new());
            }

            info!(voice = %voice, chars = text.chars().count(), "Synthesizing speech");

            let resp = self
                .client
                .post(self.endpoint())
                .header("Ocp-Apim-Subscription-Key", &self.api_key)
                .header("Content-Type", "application/ssml+xml")
                .header("X-Microsoft-OutputFormat", "raw-16khz-16bit-mono-pcm")
                .header("User-Agent", "meeting-core")
                .body(build_ssml(&voice, &text))
                .send()
                .await
                .map_err(|e| anyhow::anyhow!("synthesis request failed: {}", e))?;

            let status = resp.status();
            if !status.is_success() {
                let detail = resp.text().await.unwrap_or_default();
                anyhow::bail!("synthesis rejected ({}): {}", status, detail);
            }

            let pcm = resp
                .bytes()
                .await
                .map_err(|e| anyhow::anyhow!("synthesis body read failed: {}", e))?
                .to_vec();

            info!(bytes = pcm.len(), "Speech synthesized");
            Ok(pcm)
        })
    }

    fn name(&self) -> String {
        format!("Speech TTS ({})", self.region)
    }
}
