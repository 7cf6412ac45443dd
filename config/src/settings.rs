//! Application settings management

use crate::PathManager;
use serde::{Deserialize, Serialize};
use std::fs;

fn default_assistant_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_voice_enabled() -> bool {
    true
}

fn default_min_capture_ms() -> u64 {
    2000
}

/// Application settings stored in settings.toml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Base URL of the assistant service
    #[serde(default = "default_assistant_url")]
    pub assistant_url: String,
    /// Locale hint sent with transcription requests (e.g. "en")
    pub language: Option<String>,
    /// Whether finished responses are spoken aloud
    #[serde(default = "default_voice_enabled")]
    pub voice_enabled: bool,
    /// Minimum length of a microphone capture, in milliseconds
    #[serde(default = "default_min_capture_ms")]
    pub min_capture_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            assistant_url: default_assistant_url(),
            language: None,
            voice_enabled: default_voice_enabled(),
            min_capture_ms: default_min_capture_ms(),
        }
    }
}

impl Settings {
    /// Load settings from the settings file, or return defaults if not found
    pub fn load() -> Self {
        let Some(path) = PathManager::settings_path() else {
            return Self::default();
        };

        let Ok(content) = fs::read_to_string(&path) else {
            return Self::default();
        };

        toml::from_str(&content).unwrap_or_default()
    }

    /// Save settings to the settings file
    pub fn save(&self) -> Result<(), String> {
        let path = PathManager::settings_path().ok_or("Could not determine settings path")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create config dir: {}", e))?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize settings: {}", e))?;
        fs::write(&path, content).map_err(|e| format!("Failed to write settings: {}", e))?;
        Ok(())
    }
}
