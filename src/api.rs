//! Streaming TTS API client.
//!
//! One POST per synthesis; the response body is an audio stream in the
//! format named by the `Accept` header (chosen from the model family). The
//! async body is bridged into a blocking [`ByteSource`] so the decode worker
//! can consume it off the runtime.

use crate::audio::decode::{ByteSource, ReadSource};
use futures_util::{StreamExt, TryStreamExt};
use serde::Serialize;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::io::{StreamReader, SyncIoBridge};
use tracing::debug;

const DEFAULT_API_URL: &str = "https://api.voxtts.dev/v1/tts";

pub const MODEL_ARCANA: &str = "arcana";
pub const MODEL_ARCANA_V2: &str = "arcanav2";
pub const MODEL_MIST: &str = "mist";
pub const MODEL_MIST_V2: &str = "mistv2";

pub const MODEL_IDS: [&str; 4] = [MODEL_ARCANA, MODEL_ARCANA_V2, MODEL_MIST, MODEL_MIST_V2];

// Language codes accepted per model family, ISO 639-3 plus 639-1 aliases.
const ARCANA_LANGS: &[&str] = &[
    "ar", "ara", "de", "en", "eng", "es", "fr", "fra", "ger", "he", "heb", "hi", "hin", "ja",
    "jpn", "por", "pt", "si", "sin", "spa", "ta", "tam",
];
const ARCANA_V2_LANGS: &[&str] = &[
    "de", "en", "eng", "es", "fr", "fra", "ger", "hi", "hin", "spa",
];
const MIST_LANGS: &[&str] = &["de", "en", "eng", "es", "fr", "fra", "ger", "spa"];

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("speaker is required")]
    SpeakerRequired,
    #[error("invalid model id: {0} (valid options: arcana, arcanav2, mist, mistv2)")]
    InvalidModelId(String),
    #[error("authentication failed: invalid API key")]
    AuthFailed,
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("rate limited: too many requests")]
    RateLimited,
    #[error("API error {status}: {body}")]
    Status { status: u16, body: String },
    #[error(
        "invalid request: server returned an empty response. Double-check that \
         speaker '{speaker}' and language '{lang}' are valid for model '{model}'"
    )]
    EmptyResponse {
        speaker: String,
        lang: String,
        model: String,
    },
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
}

/// Synthesis parameters, validated before the request is sent.
#[derive(Debug, Clone, Default)]
pub struct TtsOptions {
    pub speaker: String,
    pub model_id: String,
    pub lang: String,
    /// Output sampling rate in Hz; server default when unset.
    pub sampling_rate: Option<u32>,
    /// Speed multiplier, must be positive; server default when unset.
    pub speed_alpha: Option<f64>,
}

impl TtsOptions {
    /// The language the server will assume when none was given.
    pub fn effective_lang(&self) -> &str {
        if self.lang.is_empty() {
            "eng"
        } else {
            &self.lang
        }
    }
}

#[derive(Serialize)]
struct TtsRequest<'a> {
    text: &'a str,
    speaker: &'a str,
    #[serde(rename = "modelId", skip_serializing_if = "str::is_empty")]
    model_id: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    lang: &'a str,
    #[serde(rename = "samplingRate", skip_serializing_if = "Option::is_none")]
    sampling_rate: Option<u32>,
    #[serde(rename = "speedAlpha", skip_serializing_if = "Option::is_none")]
    speed_alpha: Option<f64>,
}

pub fn is_valid_model_id(model_id: &str) -> bool {
    MODEL_IDS.contains(&model_id)
}

fn langs_for_model(model_id: &str) -> &'static [&'static str] {
    match model_id {
        MODEL_MIST | MODEL_MIST_V2 => MIST_LANGS,
        MODEL_ARCANA_V2 => ARCANA_V2_LANGS,
        _ => ARCANA_LANGS,
    }
}

pub fn is_valid_lang(lang: &str, model_id: &str) -> bool {
    langs_for_model(model_id).contains(&lang)
}

pub fn valid_langs_for_model(model_id: &str) -> Vec<&'static str> {
    langs_for_model(model_id).to_vec()
}

/// The audio container each model family produces.
pub fn audio_format_for_model(model_id: &str) -> &'static str {
    match model_id {
        MODEL_MIST | MODEL_MIST_V2 => "audio/mp3",
        _ => "audio/wav",
    }
}

/// An open audio stream plus the transport facts the UI reports.
pub struct TtsStream {
    pub body: Box<dyn ByteSource>,
    pub content_type: Option<String>,
    pub ttfb: Duration,
}

pub struct Client {
    base_url: String,
    api_key: String,
    user_agent: String,
    http: reqwest::Client,
}

impl Client {
    pub fn new(api_key: String) -> Self {
        let base_url =
            std::env::var("VOX_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string());
        Self::with_base_url(api_key, base_url)
    }

    pub fn with_base_url(api_key: String, base_url: String) -> Self {
        let user_agent = format!(
            "vox/{} ({}/{})",
            env!("CARGO_PKG_VERSION"),
            std::env::consts::OS,
            std::env::consts::ARCH
        );
        Self {
            base_url,
            api_key,
            user_agent,
            http: reqwest::Client::new(),
        }
    }

    /// Request synthesis and return the response body as a blocking byte
    /// source.
    ///
    /// TTFB is measured to the response header. A body with no bytes at all
    /// is reported as [`ApiError::EmptyResponse`]: streaming responses carry
    /// no Content-Length, so the only way to notice is to pull the first
    /// chunk.
    pub async fn stream_tts(&self, text: &str, opts: &TtsOptions) -> Result<TtsStream, ApiError> {
        if opts.speaker.is_empty() {
            return Err(ApiError::SpeakerRequired);
        }
        if !is_valid_model_id(&opts.model_id) {
            return Err(ApiError::InvalidModelId(opts.model_id.clone()));
        }

        if opts.speed_alpha.is_some_and(|alpha| alpha <= 0.0) {
            return Err(ApiError::InvalidRequest("speed-alpha must be positive".into()));
        }

        let request = TtsRequest {
            text,
            speaker: &opts.speaker,
            model_id: &opts.model_id,
            lang: &opts.lang,
            sampling_rate: opts.sampling_rate,
            speed_alpha: opts.speed_alpha,
        };

        let start = Instant::now();
        let response = self
            .http
            .post(&self.base_url)
            .header("Accept", audio_format_for_model(&opts.model_id))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("User-Agent", &self.user_agent)
            .json(&request)
            .send()
            .await?;
        let ttfb = start.elapsed();

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                401 => ApiError::AuthFailed,
                400 => ApiError::InvalidRequest(body),
                429 => ApiError::RateLimited,
                code => ApiError::Status { status: code, body },
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let mut stream = response.bytes_stream();
        let first = loop {
            match stream.next().await {
                Some(Ok(chunk)) if chunk.is_empty() => continue,
                Some(Ok(chunk)) => break chunk,
                Some(Err(e)) => return Err(ApiError::Request(e)),
                None => {
                    return Err(ApiError::EmptyResponse {
                        speaker: opts.speaker.clone(),
                        lang: opts.effective_lang().to_string(),
                        model: opts.model_id.clone(),
                    });
                }
            }
        };
        debug!(ttfb_ms = ttfb.as_millis() as u64, ?content_type, "TTS stream opened");

        // Put the peeked chunk back in front, then bridge the async stream
        // into a blocking reader for the decode worker.
        let chained = futures_util::stream::iter([Ok(first)])
            .chain(stream)
            .map_err(std::io::Error::other);
        let reader = SyncIoBridge::new(StreamReader::new(chained));

        Ok(TtsStream {
            body: Box::new(ReadSource::new(reader)),
            content_type,
            ttfb,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_validation() {
        assert!(is_valid_model_id("arcana"));
        assert!(is_valid_model_id("arcanav2"));
        assert!(is_valid_model_id("mist"));
        assert!(is_valid_model_id("mistv2"));
        assert!(!is_valid_model_id("whisper"));
        assert!(!is_valid_model_id(""));
    }

    #[test]
    fn test_accept_header_follows_model_family() {
        assert_eq!(audio_format_for_model("mist"), "audio/mp3");
        assert_eq!(audio_format_for_model("mistv2"), "audio/mp3");
        assert_eq!(audio_format_for_model("arcana"), "audio/wav");
        assert_eq!(audio_format_for_model("arcanav2"), "audio/wav");
    }

    #[test]
    fn test_lang_sets_per_model() {
        assert!(is_valid_lang("eng", "arcana"));
        assert!(is_valid_lang("jpn", "arcana"));
        assert!(is_valid_lang("eng", "mist"));
        assert!(!is_valid_lang("jpn", "mist"));
        assert!(is_valid_lang("hin", "arcanav2"));
        assert!(!is_valid_lang("jpn", "arcanav2"));
        // Both ISO 639-1 and 639-3 spellings are accepted.
        assert!(is_valid_lang("en", "mist"));
    }

    #[test]
    fn test_valid_langs_are_sorted() {
        for model in MODEL_IDS {
            let langs = valid_langs_for_model(model);
            let mut sorted = langs.clone();
            sorted.sort_unstable();
            assert_eq!(langs, sorted);
        }
    }

    #[test]
    fn test_effective_lang_defaults_to_eng() {
        let opts = TtsOptions {
            speaker: "celeste".into(),
            model_id: "arcana".into(),
            ..TtsOptions::default()
        };
        assert_eq!(opts.effective_lang(), "eng");
    }

    #[test]
    fn test_request_serialization_skips_empty_fields() {
        let request = TtsRequest {
            text: "hi",
            speaker: "celeste",
            model_id: "arcana",
            lang: "",
            sampling_rate: None,
            speed_alpha: None,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["modelId"], "arcana");
        assert!(json.get("lang").is_none());
        assert!(json.get("samplingRate").is_none());
        assert!(json.get("speedAlpha").is_none());
    }

    #[test]
    fn test_request_serialization_carries_set_params() {
        let request = TtsRequest {
            text: "hi",
            speaker: "celeste",
            model_id: "arcana",
            lang: "eng",
            sampling_rate: Some(22050),
            speed_alpha: Some(1.2),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["samplingRate"], 22050);
        assert_eq!(json["speedAlpha"], 1.2);
    }

    #[tokio::test]
    async fn test_stream_tts_rejects_bad_options_before_sending() {
        let client = Client::with_base_url("key".into(), "http://127.0.0.1:1".into());
        let opts = TtsOptions {
            speaker: String::new(),
            model_id: "arcana".into(),
            ..TtsOptions::default()
        };
        assert!(matches!(
            client.stream_tts("hi", &opts).await,
            Err(ApiError::SpeakerRequired)
        ));

        let opts = TtsOptions {
            speaker: "celeste".into(),
            model_id: "nope".into(),
            ..TtsOptions::default()
        };
        assert!(matches!(
            client.stream_tts("hi", &opts).await,
            Err(ApiError::InvalidModelId(_))
        ));

        let opts = TtsOptions {
            speaker: "celeste".into(),
            model_id: "arcana".into(),
            speed_alpha: Some(-1.0),
            ..TtsOptions::default()
        };
        assert!(matches!(
            client.stream_tts("hi", &opts).await,
            Err(ApiError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_body_reports_empty_response() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            let _ = socket
                .write_all(
                    b"HTTP/1.1 200 OK\r\ncontent-type: audio/wav\r\ncontent-length: 0\r\n\r\n",
                )
                .await;
            let _ = socket.shutdown().await;
        });

        let client = Client::with_base_url("key".into(), format!("http://{addr}"));
        let opts = TtsOptions {
            speaker: "celeste".into(),
            model_id: "arcana".into(),
            ..TtsOptions::default()
        };
        match client.stream_tts("hi", &opts).await {
            Err(ApiError::EmptyResponse {
                speaker,
                lang,
                model,
            }) => {
                assert_eq!(speaker, "celeste");
                assert_eq!(lang, "eng");
                assert_eq!(model, "arcana");
            }
            Err(other) => panic!("expected EmptyResponse, got {other}"),
            Ok(_) => panic!("expected EmptyResponse, got a stream"),
        }
    }
}
