//! Deepgram speech APIs: `/speak` for synthesis, `/listen` for live transcription.

use crate::config::{SttConfig, TtsConfig};
use crate::defaults;
use crate::error::{Result, VoxlineError};
use crate::providers::stt::{RecognizerStream, SpeechRecognizer, TranscriptAssembler};
use crate::providers::tts::Synthesizer;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message;

const EVENT_BUFFER: usize = 64;

/// Text-to-speech over `POST /speak`.
pub struct DeepgramSpeech {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    voice_model: String,
}

impl DeepgramSpeech {
    pub fn new(api_key: String, voice_model: String, api_base: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key,
            voice_model,
        }
    }

    pub fn from_config(config: &TtsConfig) -> Result<Self> {
        let api_key = super::credential(defaults::SPEECH_API_KEY_ENV)?;
        Ok(Self::new(
            api_key,
            config.voice_model.clone(),
            config.api_base.clone(),
        ))
    }

    fn speak_url(&self) -> String {
        format!(
            "{}/speak?model={}&encoding={}&sample_rate={}&container=none",
            self.api_base,
            self.voice_model,
            defaults::AUDIO_ENCODING,
            defaults::SAMPLE_RATE
        )
    }
}

#[async_trait::async_trait]
impl Synthesizer for DeepgramSpeech {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .post(self.speak_url())
            .header("Authorization", format!("Token {}", self.api_key))
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await
            .map_err(|e| VoxlineError::Synthesis {
                status: "request".to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(VoxlineError::Synthesis {
                status: status.to_string(),
                message: detail,
            });
        }

        let audio = response.bytes().await.map_err(|e| VoxlineError::Synthesis {
            status: status.to_string(),
            message: format!("failed to read audio body: {}", e),
        })?;
        Ok(audio.to_vec())
    }

    fn voice(&self) -> &str {
        &self.voice_model
    }
}

/// Live transcription over the `/listen` websocket.
pub struct DeepgramListen {
    api_base: String,
    api_key: String,
    config: SttConfig,
    audio_buffer: usize,
}

impl DeepgramListen {
    pub fn new(api_key: String, config: SttConfig, audio_buffer: usize) -> Self {
        Self {
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key,
            config,
            audio_buffer,
        }
    }

    pub fn from_config(config: &SttConfig, audio_buffer: usize) -> Result<Self> {
        let api_key = super::credential(defaults::SPEECH_API_KEY_ENV)?;
        Ok(Self::new(api_key, config.clone(), audio_buffer))
    }

    fn listen_url(&self) -> String {
        let base = if let Some(rest) = self.api_base.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = self.api_base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            self.api_base.clone()
        };
        format!(
            "{}/listen?model={}&language={}&encoding={}&sample_rate={}&channels=1\
             &punctuate=true&interim_results=true&endpointing={}&utterance_end_ms={}",
            base,
            self.config.model,
            self.config.language,
            defaults::AUDIO_ENCODING,
            defaults::SAMPLE_RATE,
            self.config.endpointing_ms,
            self.config.utterance_end_ms
        )
    }
}

#[async_trait::async_trait]
impl SpeechRecognizer for DeepgramListen {
    async fn connect(&self) -> Result<RecognizerStream> {
        let url = self.listen_url();
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| VoxlineError::Recognizer {
                message: format!("invalid listen URL {}: {}", url, e),
            })?;
        let auth = HeaderValue::from_str(&format!("Token {}", self.api_key)).map_err(|e| {
            VoxlineError::Recognizer {
                message: format!("invalid API key header: {}", e),
            }
        })?;
        request.headers_mut().insert("Authorization", auth);

        let (socket, _) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| VoxlineError::Recognizer {
                message: format!("failed to connect: {}", e),
            })?;
        tracing::debug!("recognizer connected");

        let (mut sink, mut source) = socket.split();
        let (audio_tx, mut audio_rx) = mpsc::channel::<Vec<u8>>(self.audio_buffer);
        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);

        tokio::spawn(async move {
            while let Some(frame) = audio_rx.recv().await {
                if let Err(e) = sink.send(Message::Binary(frame.into())).await {
                    tracing::warn!(error = %e, "recognizer audio send failed");
                    return;
                }
            }
            if let Err(e) = sink
                .send(Message::Text(r#"{"type":"CloseStream"}"#.into()))
                .await
            {
                tracing::debug!(error = %e, "recognizer close failed");
            }
        });

        tokio::spawn(async move {
            let mut assembler = TranscriptAssembler::new();
            while let Some(message) = source.next().await {
                match message {
                    Ok(Message::Text(text)) => match assembler.handle_json(text.as_str()) {
                        Ok(Some(event)) => {
                            if event_tx.send(event).await.is_err() {
                                break;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => tracing::warn!(error = %e, "skipping recognizer message"),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(error = %e, "recognizer socket error");
                        break;
                    }
                }
            }
            tracing::debug!("recognizer stream closed");
        });

        Ok(RecognizerStream {
            audio: audio_tx,
            events: event_rx,
        })
    }
}
