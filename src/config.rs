//! # Configuration Management
//!
//! This module handles loading and managing application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP__ prefix)
//! - Default values (built into the code)
//!
//! ## Key Rust Concepts Used:
//! - **Serde**: Serialization/deserialization library for converting between Rust structs and data formats
//! - **derive macros**: Automatically generate code for common traits (Debug, Clone, Serialize, Deserialize)
//! - **impl blocks**: Add methods to structs
//! - **Result<T, E>**: Error handling that forces you to handle potential failures
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Deployment shortcuts (HOST, PORT, OPENAI_API_KEY)
//! 2. Environment variables (APP__SERVER__PORT, APP__REALTIME__VOICE, etc.)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)

use anyhow::Result;              // Better error handling with context
use serde::{Deserialize, Serialize};  // For converting to/from TOML, JSON, etc.
use std::env;                    // For reading environment variables

/// Main application configuration that contains all settings.
///
/// ## Why separate config structs:
/// Each group maps to one concern of the relay: the HTTP listener, the remote
/// realtime session, the PCM format shared by capture and playback, the weather
/// enrichment provider, and capacity limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub realtime: RealtimeConfig,
    pub audio: AudioConfig,
    pub enrichment: EnrichmentConfig,
    pub performance: PerformanceConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,  // u16 = unsigned 16-bit integer (0-65535), perfect for port numbers
}

/// Remote realtime session settings.
///
/// These values are sent to the remote endpoint in the `session.update` message
/// right after the connection opens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// WebSocket endpoint without the model query parameter
    pub url: String,
    /// Model name appended as `?model=...`
    pub model: String,
    /// Bearer token; usually provided through OPENAI_API_KEY
    pub api_key: String,
    /// Voice used for synthesized audio
    pub voice: String,
    /// System instructions for the assistant
    pub instructions: String,
    /// Response modalities, e.g. ["text", "audio"]
    pub modalities: Vec<String>,
    pub input_audio_format: String,
    pub output_audio_format: String,
    /// Model used by the remote side to transcribe user speech.
    /// Without it no transcript events arrive and enrichment never triggers.
    pub transcription_model: Option<String>,
    pub vad: VadConfig,
}

/// Server-side voice activity detection thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VadConfig {
    /// Speech probability threshold (0.0 - 1.0)
    pub threshold: f32,
    /// Audio kept before detected speech, in milliseconds
    pub prefix_padding_ms: u32,
    /// Silence that ends a user turn, in milliseconds
    pub silence_duration_ms: u32,
}

/// PCM format shared by captured input and played output.
///
/// ## Fields:
/// - `sample_rate`: Samples per second (the realtime API uses 24kHz for pcm16)
/// - `channels`: Must be 1 (mono)
/// - `bit_depth`: Must be 16 (2 bytes per sample)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u8,
    pub bit_depth: u8,
}

/// Weather enrichment provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    /// When false, transcripts are forwarded but never trigger a lookup
    pub enabled: bool,
    /// Base URL of the geocoding API (the `/v1/search` path is appended)
    pub geocoding_url: String,
    /// Base URL of the forecast API (the `/v1/forecast` path is appended)
    pub forecast_url: String,
}

/// Capacity limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    /// Maximum number of relay sessions (client connections) at the same time
    pub max_concurrent_sessions: usize,
}

const DEFAULT_INSTRUCTIONS: &str = "You are a helpful AI assistant. You can answer any questions and respond to greetings.\n\
Greetings: Always respond politely to greetings like \"Hi,\" \"Hello,\" or \"Hey\" with a friendly message.\n\
Weather Queries: If a user asks for the weather, you'll receive a system message with the result. Summarize it and respond with it.";

/// Provides default configuration values.
///
/// ## Why defaults matter:
/// Default values ensure the application can start even if no configuration file exists.
/// The only thing a developer must supply is the API key.
impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),  // Localhost only (safe for development)
                port: 3001,
            },
            realtime: RealtimeConfig {
                url: "wss://api.openai.com/v1/realtime".to_string(),
                model: "gpt-4o-mini-realtime-preview-2024-12-17".to_string(),
                api_key: String::new(),
                voice: "echo".to_string(),
                instructions: DEFAULT_INSTRUCTIONS.to_string(),
                modalities: vec!["text".to_string(), "audio".to_string()],
                input_audio_format: "pcm16".to_string(),
                output_audio_format: "pcm16".to_string(),
                transcription_model: Some("whisper-1".to_string()),
                vad: VadConfig {
                    threshold: 0.5,
                    prefix_padding_ms: 500,
                    silence_duration_ms: 1000,
                },
            },
            audio: AudioConfig {
                sample_rate: 24000,
                channels: 1,
                bit_depth: 16,
            },
            enrichment: EnrichmentConfig {
                enabled: true,
                geocoding_url: "https://geocoding-api.open-meteo.com".to_string(),
                forecast_url: "https://api.open-meteo.com".to_string(),
            },
            performance: PerformanceConfig {
                max_concurrent_sessions: 10,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Configuration Loading Process:
    /// 1. Start with built-in defaults
    /// 2. Override with values from config.toml (if it exists)
    /// 3. Override with environment variables prefixed with APP__
    /// 4. Handle the HOST, PORT and OPENAI_API_KEY shortcuts
    ///
    /// ## Environment Variable Examples:
    /// - `APP__SERVER__PORT=3002`: Override server port
    /// - `APP__REALTIME__VAD__THRESHOLD=0.6`: Override the VAD threshold
    /// - `APP__ENRICHMENT__ENABLED=false`: Turn weather lookups off
    ///
    /// The double underscore separator keeps field names such as `api_key`
    /// intact instead of splitting them into nested keys.
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("APP").prefix_separator("__").separator("__"));

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        if let Ok(api_key) = env::var("OPENAI_API_KEY") {
            settings = settings.set_override("realtime.api_key", api_key)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - Server port is not 0
    /// - The realtime URL is a WebSocket URL
    /// - The VAD threshold is a probability
    /// - The audio format is 16-bit mono PCM at a non-zero rate
    /// - At least one session is allowed
    ///
    /// A missing API key is not a validation error: the server still starts
    /// (health and call endpoints work) and relay upgrades are refused instead.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if !(self.realtime.url.starts_with("ws://") || self.realtime.url.starts_with("wss://")) {
            return Err(anyhow::anyhow!(
                "Realtime URL must start with ws:// or wss://, got {}",
                self.realtime.url
            ));
        }

        if !(0.0..=1.0).contains(&self.realtime.vad.threshold) {
            return Err(anyhow::anyhow!("VAD threshold must be between 0.0 and 1.0"));
        }

        if self.audio.sample_rate == 0 {
            return Err(anyhow::anyhow!("Audio sample rate must be greater than 0"));
        }

        if self.audio.bit_depth != 16 {
            return Err(anyhow::anyhow!("Only 16-bit PCM audio is supported"));
        }

        if self.audio.channels != 1 {
            return Err(anyhow::anyhow!("Only mono audio is supported"));
        }

        if self.performance.max_concurrent_sessions == 0 {
            return Err(anyhow::anyhow!("Max concurrent sessions must be greater than 0"));
        }

        Ok(())  // All validation passed
    }

    /// Whether an API key has been supplied for the realtime endpoint.
    pub fn has_api_key(&self) -> bool {
        !self.realtime.api_key.trim().is_empty()
    }
}

impl RealtimeConfig {
    /// Full connection URL including the model query parameter.
    pub fn endpoint(&self) -> String {
        format!("{}?model={}", self.url, self.model)
    }
}

/// Tests for the configuration module.
#[cfg(test)]
mod tests {
    use super::*;  // Import everything from the parent module

    /// Test that the default configuration is valid and has expected values.
    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 3001);
        assert_eq!(config.audio.sample_rate, 24000);
        assert_eq!(config.realtime.vad.prefix_padding_ms, 500);
        // Ensure the default config passes validation
        assert!(config.validate().is_ok());
        // No key is baked into the defaults
        assert!(!config.has_api_key());
    }

    /// Test that validation catches invalid configurations.
    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.realtime.url = "https://api.openai.com/v1/realtime".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.realtime.vad.threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.audio.channels = 2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_realtime_endpoint_includes_model() {
        let config = AppConfig::default();
        assert_eq!(
            config.realtime.endpoint(),
            "wss://api.openai.com/v1/realtime?model=gpt-4o-mini-realtime-preview-2024-12-17"
        );
    }
}
