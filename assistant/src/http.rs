//! HTTP implementation of the collaborator traits against one assistant
//! service base URL.

use crate::api::{
    ChatRequest, ChatResponse, HealthResponse, ServicesStatus, ToolInfo, TranscribeResponse,
};
use crate::audio::{AudioClip, AudioPayload, decode_wav};
use crate::client::Client;
use crate::stream::TokenStream;
use crate::{ChatService, Synthesizer, Transcriber};
use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info};

#[derive(Clone)]
pub struct HttpAssistant {
    client: Client,
    base_url: String,
}

impl HttpAssistant {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        let base_url = base_url.trim_end_matches('/').to_string();
        HttpAssistant {
            client: Client::new(),
            base_url,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Service liveness, `GET /health`.
    pub async fn health(&self) -> Result<HealthResponse> {
        self.client.get_json(self.url("/health")).await
    }

    /// Aggregated per-service status map, `GET /services/status`.
    pub async fn services_status(&self) -> Result<ServicesStatus> {
        self.client.get_json(self.url("/services/status")).await
    }

    /// Tool catalog, `GET /tools`.
    pub async fn tools(&self) -> Result<Vec<ToolInfo>> {
        self.client.get_json(self.url("/tools")).await
    }
}

#[async_trait]
impl ChatService for HttpAssistant {
    async fn stream_chat(&self, message: &str) -> Result<TokenStream> {
        debug!("opening streamed chat request, {} chars", message.len());
        self.client
            .post_stream(self.url("/chat/stream"), &ChatRequest { message })
            .await
    }

    async fn chat(&self, message: &str) -> Result<String> {
        let response: ChatResponse = self
            .client
            .post_json(self.url("/chat"), &ChatRequest { message })
            .await?;
        if !response.success {
            return Err(anyhow::anyhow!(
                response
                    .error
                    .unwrap_or_else(|| "chat request failed".to_string())
            ));
        }
        Ok(response.response)
    }
}

#[async_trait]
impl Transcriber for HttpAssistant {
    async fn transcribe(&self, payload: AudioPayload) -> Result<String> {
        let part = reqwest::multipart::Part::bytes(payload.wav)
            .file_name(payload.filename)
            .mime_str("audio/wav")?;
        let mut form = reqwest::multipart::Form::new().part("file", part);
        if let Some(language) = payload.language {
            form = form.text("language", language);
        }

        let response: TranscribeResponse = self
            .client
            .post_multipart(self.url("/stt/transcribe"), form)
            .await?;

        if !response.success {
            // The service's reason is surfaced verbatim to the caller.
            return Err(anyhow::anyhow!(
                response
                    .error
                    .unwrap_or_else(|| "transcription failed".to_string())
            ));
        }
        let text = response.text.unwrap_or_default();
        info!("transcription complete, {} chars", text.len());
        Ok(text)
    }
}

#[async_trait]
impl Synthesizer for HttpAssistant {
    async fn synthesize(&self, text: &str) -> Result<AudioClip> {
        let bytes = self
            .client
            .post_form_bytes(self.url("/tts/speak"), &[("text", text)])
            .await?;
        let clip = decode_wav(&bytes)?;
        debug!(
            "synthesized {:?} of audio at {} Hz",
            clip.duration(),
            clip.sample_rate
        );
        Ok(clip)
    }
}
