use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

/// Placeholder shown instead of a configured secret.
const REDACTED: &str = "***";

pub async fn get_config(state: web::Data<AppState>) -> HttpResponse {
    let config = &state.config;
    let realtime = &config.realtime;

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": {
            "server": {
                "host": config.server.host,
                "port": config.server.port
            },
            "realtime": {
                "url": realtime.url,
                "model": realtime.model,
                "api_key": if config.has_api_key() { REDACTED } else { "" },
                "voice": realtime.voice,
                "instructions": realtime.instructions,
                "modalities": realtime.modalities,
                "input_audio_format": realtime.input_audio_format,
                "output_audio_format": realtime.output_audio_format,
                "transcription_model": realtime.transcription_model,
                "vad": {
                    "threshold": realtime.vad.threshold,
                    "prefix_padding_ms": realtime.vad.prefix_padding_ms,
                    "silence_duration_ms": realtime.vad.silence_duration_ms
                }
            },
            "audio": {
                "sample_rate": config.audio.sample_rate,
                "channels": config.audio.channels,
                "bit_depth": config.audio.bit_depth
            },
            "enrichment": {
                "enabled": config.enrichment.enabled,
                "geocoding_url": config.enrichment.geocoding_url,
                "forecast_url": config.enrichment.forecast_url
            },
            "performance": {
                "max_concurrent_sessions": config.performance.max_concurrent_sessions
            }
        }
    }))
}
