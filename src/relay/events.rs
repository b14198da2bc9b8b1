//! Events sent to the browser client as JSON text frames.

use serde::{Deserialize, Serialize};

/// Normalized notifications for the client connection, tagged by `type`.
///
/// ## Message Format:
/// ```json
/// {"type": "response.audio_transcript.delta", "delta": "Hel"}
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum FrontendEvent {
    #[serde(rename = "input_speech_started")]
    InputSpeechStarted,

    #[serde(rename = "input_speech_stopped")]
    InputSpeechStopped,

    #[serde(rename = "response_created")]
    ResponseCreated,

    #[serde(rename = "response.done")]
    ResponseDone,

    /// What the user said
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    TranscriptionCompleted { transcript: String },

    /// Partial transcript of the assistant's audio
    #[serde(rename = "response.audio_transcript.delta")]
    AudioTranscriptDelta { delta: String },

    #[serde(rename = "response.audio_transcript.done")]
    AudioTranscriptDone,

    #[serde(rename = "response.text.delta")]
    TextDelta { delta: String },

    /// Remote `error` payloads are passed through as-is; local problems use a
    /// `{"message": ...}` object.
    #[serde(rename = "error")]
    Error { error: serde_json::Value },
}

impl FrontendEvent {
    /// Error notification for a problem detected by the relay itself.
    pub fn local_error(message: impl Into<String>) -> Self {
        FrontendEvent::Error {
            error: serde_json::json!({ "message": message.into() }),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_type_names() {
        let cases = [
            (FrontendEvent::InputSpeechStarted, json!({"type": "input_speech_started"})),
            (FrontendEvent::ResponseCreated, json!({"type": "response_created"})),
            (FrontendEvent::ResponseDone, json!({"type": "response.done"})),
            (
                FrontendEvent::TranscriptionCompleted { transcript: "hi".to_string() },
                json!({"type": "conversation.item.input_audio_transcription.completed", "transcript": "hi"}),
            ),
            (
                FrontendEvent::TextDelta { delta: "x".to_string() },
                json!({"type": "response.text.delta", "delta": "x"}),
            ),
        ];

        for (event, expected) in cases {
            assert_eq!(serde_json::to_value(&event).unwrap(), expected);
        }
    }

    #[test]
    fn test_local_error_shape() {
        let json = FrontendEvent::local_error("bad frame").to_json().unwrap();
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(&json).unwrap(),
            json!({"type": "error", "error": {"message": "bad frame"}})
        );
    }
}
