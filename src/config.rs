use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_IMAGE_MODEL: &str = "gemini-2.5-flash-image";
pub const DEFAULT_LIVE_MODEL: &str = "gemini-2.5-flash-native-audio-preview-09-2025";
pub const DEFAULT_LIVE_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

const API_KEY_ENV: &str = "GEMINI_API_KEY";
const LEGACY_API_KEY_ENV: &str = "API_KEY";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StressSensitivity {
    Low,
    #[default]
    Medium,
    High,
}

impl StressSensitivity {
    pub const ALL: [StressSensitivity; 3] = [Self::Low, Self::Medium, Self::High];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::High => "Will notify on minor HRV drops.",
            Self::Low => "Only notifies on significant sustained stress.",
            Self::Medium => "Balanced detection for daily use.",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|level| level.as_str().eq_ignore_ascii_case(raw.trim()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AppSettings {
    #[serde(rename = "healthKitEnabled", default)]
    pub health_sync_enabled: bool,
    #[serde(default)]
    pub notifications_enabled: bool,
    #[serde(default)]
    pub stress_sensitivity: StressSensitivity,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            health_sync_enabled: false,
            notifications_enabled: false,
            stress_sensitivity: StressSensitivity::Medium,
        }
    }
}

/// Remote service settings. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub api_key: Option<String>,
    pub api_base: String,
    pub image_model: String,
    pub live_model: String,
    pub live_endpoint: String,
    pub request_timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: DEFAULT_API_BASE.to_string(),
            image_model: DEFAULT_IMAGE_MODEL.to_string(),
            live_model: DEFAULT_LIVE_MODEL.to_string(),
            live_endpoint: DEFAULT_LIVE_ENDPOINT.to_string(),
            request_timeout: Duration::from_secs(60),
        }
    }
}

impl ServiceConfig {
    pub fn from_env() -> Self {
        let key = std::env::var(API_KEY_ENV)
            .ok()
            .or_else(|| std::env::var(LEGACY_API_KEY_ENV).ok());
        Self::default().with_api_key(key)
    }

    /// Blank keys count as missing.
    pub fn with_api_key(mut self, key: Option<String>) -> Self {
        self.api_key = key
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        self
    }
}
