//! Client for the remote assistant service.
//!
//! This crate owns the wire side of the system: the incremental frame
//! decoder for streamed chat responses ([`stream`]), the HTTP plumbing
//! ([`client`]), and the collaborator traits the orchestration layer is
//! written against — [`ChatService`], [`Transcriber`] and [`Synthesizer`]
//! — with one concrete HTTP implementation ([`HttpAssistant`]).

use async_trait::async_trait;
use std::sync::Arc;

pub mod api;
pub mod audio;
mod client;
pub mod http;
pub mod stream;

pub use audio::{AudioClip, AudioPayload, decode_wav};
pub use client::{Client, secure_origin};
pub use http::HttpAssistant;
pub use stream::{Frame, FrameDecoder, TokenStream, decode_stream};

/// The chat-stream collaborator: one user message in, a lazily decoded
/// token stream out.
#[async_trait]
pub trait ChatService: Send + Sync {
    async fn stream_chat(&self, message: &str) -> anyhow::Result<TokenStream>;

    /// Non-streaming fallback; returns the complete response at once.
    async fn chat(&self, message: &str) -> anyhow::Result<String>;
}

/// The transcription collaborator: finalized capture audio in, transcript
/// text out. Failure reasons are passed through verbatim.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, payload: AudioPayload) -> anyhow::Result<String>;
}

/// The speech-synthesis collaborator: response text in, a playable clip
/// out.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> anyhow::Result<AudioClip>;
}

#[async_trait]
impl ChatService for Arc<dyn ChatService + Send + Sync> {
    async fn stream_chat(&self, message: &str) -> anyhow::Result<TokenStream> {
        (**self).stream_chat(message).await
    }

    async fn chat(&self, message: &str) -> anyhow::Result<String> {
        (**self).chat(message).await
    }
}

#[async_trait]
impl Transcriber for Arc<dyn Transcriber + Send + Sync> {
    async fn transcribe(&self, payload: AudioPayload) -> anyhow::Result<String> {
        (**self).transcribe(payload).await
    }
}

#[async_trait]
impl Synthesizer for Arc<dyn Synthesizer + Send + Sync> {
    async fn synthesize(&self, text: &str) -> anyhow::Result<AudioClip> {
        (**self).synthesize(text).await
    }
}
