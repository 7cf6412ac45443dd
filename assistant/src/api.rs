//! Wire types for the assistant service endpoints.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Body of `POST /chat/stream` and `POST /chat`.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest<'a> {
    pub message: &'a str,
}

/// Response of the non-streaming `POST /chat`.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    pub response: String,
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

/// Response of `POST /stt/transcribe`.
#[derive(Debug, Clone, Deserialize)]
pub struct TranscribeResponse {
    pub success: bool,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Response of `GET /health`.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    #[serde(default)]
    pub service: Option<String>,
}

/// Per-service entries of `GET /services/status`.
pub type ServicesStatus = HashMap<String, serde_json::Value>;

/// One entry of the `GET /tools` catalog.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    #[serde(default)]
    pub description: String,
}
