//! # Realtime API Wire Types
//!
//! JSON messages exchanged with the remote realtime-conversation endpoint.
//!
//! ## Outbound (relay → remote):
//! - `session.update` - Session configuration, sent once after connecting
//! - `input_audio_buffer.append` - Base64 PCM from the capture source
//! - `response.cancel` - Stop the response in flight (barge-in)
//! - `conversation.item.truncate` - Cut the assistant item at the played position
//! - `conversation.item.add` - Synthetic system message (weather enrichment)
//!
//! ## Inbound (remote → relay):
//! Only the events the relay reacts to are modelled. Everything else lands in
//! `ServerEvent::Unknown` and is logged by the router.

use crate::config::RealtimeConfig;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// Session Configuration
// =============================================================================

/// Session configuration sent in `session.update`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionConfig {
    pub modalities: Vec<String>,
    pub instructions: String,
    pub voice: String,
    pub input_audio_format: String,
    pub output_audio_format: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<InputAudioTranscription>,
    pub turn_detection: TurnDetection,
}

/// Which model the remote side uses to transcribe user speech.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InputAudioTranscription {
    pub model: String,
}

/// Server-side voice activity detection parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TurnDetection {
    #[serde(rename = "type")]
    pub detection_type: String,
    pub threshold: f32,
    pub prefix_padding_ms: u32,
    pub silence_duration_ms: u32,
}

impl From<&RealtimeConfig> for SessionConfig {
    fn from(config: &RealtimeConfig) -> Self {
        Self {
            modalities: config.modalities.clone(),
            instructions: config.instructions.clone(),
            voice: config.voice.clone(),
            input_audio_format: config.input_audio_format.clone(),
            output_audio_format: config.output_audio_format.clone(),
            input_audio_transcription: config
                .transcription_model
                .clone()
                .map(|model| InputAudioTranscription { model }),
            turn_detection: TurnDetection {
                detection_type: "server_vad".to_string(),
                threshold: config.vad.threshold,
                prefix_padding_ms: config.vad.prefix_padding_ms,
                silence_duration_ms: config.vad.silence_duration_ms,
            },
        }
    }
}

// =============================================================================
// Client Commands (relay → remote)
// =============================================================================

/// A conversation item injected by the relay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContextItem {
    pub role: String,
    pub content: String,
}

/// Commands sent to the remote endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ClientCommand {
    #[serde(rename = "session.update")]
    SessionUpdate {
        event_id: String,
        session: SessionConfig,
    },

    #[serde(rename = "input_audio_buffer.append")]
    AppendAudio {
        event_id: String,
        /// Base64-encoded 16-bit PCM
        audio: String,
    },

    #[serde(rename = "response.cancel")]
    CancelResponse { event_id: String },

    #[serde(rename = "conversation.item.truncate")]
    TruncateItem {
        event_id: String,
        item_id: String,
        content_index: u32,
        audio_end_ms: u64,
    },

    #[serde(rename = "conversation.item.add")]
    AddItem { event_id: String, item: ContextItem },
}

/// Unique event id of the form `event_<kind>_<uuid>`.
fn event_id(kind: &str) -> String {
    format!("event_{}_{}", kind, Uuid::new_v4().simple())
}

impl ClientCommand {
    pub fn session_update(session: SessionConfig) -> Self {
        ClientCommand::SessionUpdate {
            event_id: event_id("session"),
            session,
        }
    }

    pub fn append_audio(audio_base64: String) -> Self {
        ClientCommand::AppendAudio {
            event_id: event_id("audio"),
            audio: audio_base64,
        }
    }

    pub fn cancel() -> Self {
        ClientCommand::CancelResponse {
            event_id: event_id("cancel"),
        }
    }

    /// Truncate `item_id` at `audio_end_ms`; the content index is always 0.
    pub fn truncate(item_id: impl Into<String>, audio_end_ms: u64) -> Self {
        ClientCommand::TruncateItem {
            event_id: event_id("truncate"),
            item_id: item_id.into(),
            content_index: 0,
            audio_end_ms,
        }
    }

    /// A synthetic `system` message carrying `content`.
    pub fn context_message(content: impl Into<String>) -> Self {
        ClientCommand::AddItem {
            event_id: event_id("context"),
            item: ContextItem {
                role: "system".to_string(),
                content: content.into(),
            },
        }
    }

    /// Wire name of the command, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientCommand::SessionUpdate { .. } => "session.update",
            ClientCommand::AppendAudio { .. } => "input_audio_buffer.append",
            ClientCommand::CancelResponse { .. } => "response.cancel",
            ClientCommand::TruncateItem { .. } => "conversation.item.truncate",
            ClientCommand::AddItem { .. } => "conversation.item.add",
        }
    }
}

// =============================================================================
// Server Events (remote → relay)
// =============================================================================

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ResponseRef {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ItemRef {
    pub id: String,
}

/// Events received from the remote endpoint.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "session.created")]
    SessionCreated,

    #[serde(rename = "session.updated")]
    SessionUpdated,

    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted,

    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped,

    #[serde(rename = "response.created")]
    ResponseCreated { response: ResponseRef },

    #[serde(rename = "response.output_item.added")]
    OutputItemAdded { item: ItemRef },

    #[serde(rename = "response.audio.delta")]
    AudioDelta {
        /// Base64-encoded 16-bit PCM
        delta: String,
    },

    #[serde(rename = "response.done")]
    ResponseDone,

    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    TranscriptionCompleted { transcript: String },

    #[serde(rename = "response.audio_transcript.delta")]
    AudioTranscriptDelta { delta: String },

    #[serde(rename = "response.audio_transcript.done")]
    AudioTranscriptDone,

    #[serde(rename = "response.text.delta")]
    TextDelta { delta: String },

    #[serde(rename = "error")]
    Error { error: serde_json::Value },

    #[serde(other)]
    Unknown,
}

/// Decode one text frame from the remote endpoint.
///
/// Unknown `type` values decode to `ServerEvent::Unknown`; only malformed JSON or
/// a known type with missing fields is an error.
pub fn decode_server_event(text: &str) -> Result<ServerEvent, serde_json::Error> {
    serde_json::from_str(text)
}

/// Extract the `type` field of a raw frame, for logging unknown events.
pub fn event_type(text: &str) -> Option<String> {
    serde_json::from_str::<serde_json::Value>(text)
        .ok()
        .and_then(|value| value.get("type").and_then(|t| t.as_str()).map(str::to_string))
}
