use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use std::time::Duration;

/// Voices offered by the speech provider.
pub const VOICE_NAMES: &[&str] = &["Kore", "Fenrir", "Puck", "Charon", "Zephyr"];

/// Sample rate of provider audio (16-bit LE PCM, mono).
pub const SYNTH_SAMPLE_RATE: u32 = 24_000;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Why a synthesis request produced no audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SynthesisError {
    /// Provider cannot be used at all (missing credential/configuration).
    ProviderUnavailable(String),
    /// Provider answered but returned no audio payload.
    EmptyResponse,
    /// Request failed in transit or the provider rejected it.
    TransportFailure(String),
}

impl std::fmt::Display for SynthesisError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SynthesisError::ProviderUnavailable(why) => {
                write!(f, "speech provider unavailable: {}", why)
            }
            SynthesisError::EmptyResponse => write!(f, "speech provider returned no audio"),
            SynthesisError::TransportFailure(why) => write!(f, "speech request failed: {}", why),
        }
    }
}

/// Decoded audio ready for playback.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<f32>,
}

impl AudioClip {
    /// Decode interleaved 16-bit little-endian PCM into float samples.
    /// A trailing odd byte is discarded.
    pub fn from_pcm16_le(bytes: &[u8], sample_rate: u32, channels: u16) -> Self {
        let samples = bytes
            .chunks_exact(2)
            .map(|pair| {
                let raw = i16::from_le_bytes([pair[0], pair[1]]);
                f32::from(raw) / 32768.0
            })
            .collect();
        AudioClip {
            sample_rate,
            channels,
            samples,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Playback duration of the clip.
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 || self.channels == 0 {
            return Duration::ZERO;
        }
        let frames = self.samples.len() as f64 / f64::from(self.channels);
        Duration::from_secs_f64(frames / f64::from(self.sample_rate))
    }
}

/// Boundary to the external speech provider. Single-shot, no retries here —
/// retry policy belongs to the scheduler.
pub trait SpeechSynthesizer: Send + Sync {
    fn synthesize(&self, text: &str, voice_name: &str) -> Result<AudioClip, SynthesisError>;
}

/// HTTP speech client posting text + voice to the provider and decoding the
/// base64 PCM payload it returns.
pub struct HttpSynthesizer {
    endpoint: String,
    api_key: Option<String>,
    client: reqwest::blocking::Client,
}

pub const DEFAULT_SYNTH_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash-preview-tts:generateContent";

impl HttpSynthesizer {
    pub fn new(endpoint: String, api_key: Option<String>) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::blocking::Client::new());
        HttpSynthesizer {
            endpoint,
            api_key,
            client,
        }
    }

    /// Build a client against the default endpoint, reading the API key from
    /// the `STORECAST_API_KEY` environment variable.
    pub fn from_env() -> Self {
        Self::new(
            DEFAULT_SYNTH_ENDPOINT.to_string(),
            std::env::var("STORECAST_API_KEY").ok(),
        )
    }
}

impl SpeechSynthesizer for HttpSynthesizer {
    fn synthesize(&self, text: &str, voice_name: &str) -> Result<AudioClip, SynthesisError> {
        let key = self.api_key.as_ref().ok_or_else(|| {
            SynthesisError::ProviderUnavailable(
                "API key not configured (STORECAST_API_KEY)".to_string(),
            )
        })?;

        let prompt = format!(
            "Read this promotional message with the enthusiasm and energy of a professional radio announcer: \"{}\"",
            text
        );
        let body = serde_json::json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
            "generationConfig": {
                "responseModalities": ["AUDIO"],
                "speechConfig": {
                    "voiceConfig": {
                        "prebuiltVoiceConfig": { "voiceName": voice_name }
                    }
                }
            }
        });

        let response = self
            .client
            .post(format!("{}?key={}", self.endpoint, key))
            .json(&body)
            .send()
            .map_err(|e| SynthesisError::TransportFailure(e.to_string()))?;

        if !response.status().is_success() {
            return Err(SynthesisError::TransportFailure(format!(
                "provider returned {}",
                response.status()
            )));
        }

        let json: serde_json::Value = response
            .json()
            .map_err(|e| SynthesisError::TransportFailure(e.to_string()))?;

        let encoded = json["candidates"][0]["content"]["parts"][0]["inlineData"]["data"]
            .as_str()
            .ok_or(SynthesisError::EmptyResponse)?;
        let bytes = BASE64
            .decode(encoded)
            .map_err(|_| SynthesisError::EmptyResponse)?;
        if bytes.is_empty() {
            return Err(SynthesisError::EmptyResponse);
        }

        Ok(AudioClip::from_pcm16_le(&bytes, SYNTH_SAMPLE_RATE, 1))
    }
}
