//! Wire message types for the live conversation protocol.
//!
//! All messages are JSON-encoded and exchanged over the duplex channel.
//!
//! # Protocol Overview
//!
//! Client messages (sent to server):
//! - `realtime_input` - Streamed media chunks (audio frames, video frames)
//! - `client_content` - User turns: text, end-of-turn, and continue signals
//! - `tool_response` - Function call results
//!
//! Server messages (received from server), classified in priority order:
//! - `setupComplete` - Session setup finished
//! - `toolCall` - Function call request, forwarded verbatim
//! - `serverContent` - Model turn content: audio/text parts, interruption,
//!   turn completion
//! - `text` - Transcription fragment (separate transcription channel)

use base64::prelude::*;
use serde::{Deserialize, Serialize};

/// MIME type for streamed PCM audio chunks.
pub const AUDIO_PCM_MIME: &str = "audio/pcm";

/// MIME type for streamed video frames.
pub const IMAGE_JPEG_MIME: &str = "image/jpeg";

// =============================================================================
// Server Messages (received from server)
// =============================================================================

/// A raw inbound message. Exactly one of the payload fields is expected to be
/// populated; [`ServerMessage::classify`] resolves ambiguity in priority order.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    /// Session setup finished.
    #[serde(default)]
    pub setup_complete: Option<serde_json::Value>,

    /// Function call request. Carried opaque.
    #[serde(default)]
    pub tool_call: Option<serde_json::Value>,

    /// Model turn content.
    #[serde(default)]
    pub server_content: Option<ServerContent>,

    /// Transcription fragment.
    #[serde(default)]
    pub text: Option<String>,
}

/// Content of an in-flight model turn.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    /// The turn was abandoned mid-stream (barge-in).
    #[serde(default)]
    pub interrupted: Option<bool>,

    /// The turn is complete; no further fragments will follow.
    #[serde(default)]
    pub turn_complete: Option<bool>,

    /// Content fragments of the model turn.
    #[serde(default)]
    pub model_turn: Option<ModelTurn>,
}

impl ServerContent {
    /// Whether this message carries the interruption signal.
    pub fn is_interrupted(&self) -> bool {
        self.interrupted == Some(true)
    }

    /// Whether this message carries the turn completion signal.
    pub fn is_turn_complete(&self) -> bool {
        self.turn_complete == Some(true)
    }
}

/// One model turn, made of ordered content parts.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelTurn {
    /// Ordered content parts.
    #[serde(default)]
    pub parts: Vec<ContentPart>,
}

/// A single content part: inline binary data, text, or both.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentPart {
    /// Base64-encoded binary payload (PCM audio).
    #[serde(default)]
    pub inline_data: Option<InlineData>,

    /// Text payload.
    #[serde(default)]
    pub text: Option<String>,
}

/// Inline binary payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    /// Declared MIME type, when present.
    #[serde(default)]
    pub mime_type: Option<String>,

    /// Base64-encoded bytes.
    pub data: String,
}

impl InlineData {
    /// Decode the base64 payload.
    pub fn decode(&self) -> Result<Vec<u8>, base64::DecodeError> {
        BASE64_STANDARD.decode(&self.data)
    }
}

/// A classified inbound message.
#[derive(Debug, Clone)]
pub enum InboundMessage {
    /// Session setup finished.
    SetupComplete,
    /// Function call request, forwarded verbatim.
    ToolCall(serde_json::Value),
    /// Model turn content.
    Content(ServerContent),
    /// Transcription fragment.
    Transcription(String),
}

impl ServerMessage {
    /// Classify the message by payload shape, in priority order:
    /// setup-complete, tool-call, server-content, transcription.
    ///
    /// Returns `None` for messages carrying none of the known payloads.
    pub fn classify(self) -> Option<InboundMessage> {
        if self.setup_complete.is_some() {
            Some(InboundMessage::SetupComplete)
        } else if let Some(call) = self.tool_call {
            Some(InboundMessage::ToolCall(call))
        } else if let Some(content) = self.server_content {
            Some(InboundMessage::Content(content))
        } else {
            self.text.map(InboundMessage::Transcription)
        }
    }
}

// =============================================================================
// Client Messages (sent to server)
// =============================================================================

/// Client messages sent over the duplex channel.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ClientMessage {
    /// Streamed media chunks.
    RealtimeInput {
        /// Media payload.
        realtime_input: RealtimeInput,
    },

    /// A user turn (text, end-of-turn, or continue signal).
    ClientContent {
        /// Turn payload.
        client_content: ClientContent,
    },

    /// Function call results.
    ToolResponse {
        /// Response payload.
        tool_response: ToolResponse,
    },
}

/// Streamed media chunks envelope.
#[derive(Debug, Clone, Serialize)]
pub struct RealtimeInput {
    /// Media chunks, each with a declared MIME type.
    pub media_chunks: Vec<MediaChunk>,
}

/// One media chunk.
#[derive(Debug, Clone, Serialize)]
pub struct MediaChunk {
    /// MIME type, `audio/pcm` or `image/jpeg`.
    pub mime_type: String,
    /// Base64-encoded payload.
    pub data: String,
}

/// User turn envelope.
#[derive(Debug, Clone, Serialize)]
pub struct ClientContent {
    /// Turns in this message; always a single user turn.
    pub turns: Vec<ClientTurn>,
    /// Whether the user's turn is complete.
    pub turn_complete: bool,
}

/// One user turn.
#[derive(Debug, Clone, Serialize)]
pub struct ClientTurn {
    /// Speaker role; always `"user"` on this side of the channel.
    pub role: String,
    /// Content parts; empty for bare turn signals.
    pub parts: Vec<ClientPart>,
}

/// One user content part.
#[derive(Debug, Clone, Serialize)]
pub struct ClientPart {
    /// Text content.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// Function call results envelope.
#[derive(Debug, Clone, Serialize)]
pub struct ToolResponse {
    /// Results, carried opaque.
    pub function_responses: serde_json::Value,
}

impl ClientMessage {
    /// A realtime audio chunk. `data` must already be base64 encoded.
    pub fn audio_chunk(data: impl Into<String>) -> Self {
        ClientMessage::RealtimeInput {
            realtime_input: RealtimeInput {
                media_chunks: vec![MediaChunk {
                    mime_type: AUDIO_PCM_MIME.to_string(),
                    data: data.into(),
                }],
            },
        }
    }

    /// A realtime video frame. `data` must already be base64 encoded.
    pub fn video_frame(data: impl Into<String>) -> Self {
        ClientMessage::RealtimeInput {
            realtime_input: RealtimeInput {
                media_chunks: vec![MediaChunk {
                    mime_type: IMAGE_JPEG_MIME.to_string(),
                    data: data.into(),
                }],
            },
        }
    }

    /// A completed user turn containing a single text part.
    pub fn text_message(text: impl Into<String>) -> Self {
        ClientMessage::ClientContent {
            client_content: ClientContent {
                turns: vec![ClientTurn {
                    role: "user".to_string(),
                    parts: vec![ClientPart {
                        text: Some(text.into()),
                    }],
                }],
                turn_complete: true,
            },
        }
    }

    /// A completed user turn with no parts: end of the user's turn.
    pub fn end_of_turn() -> Self {
        ClientMessage::ClientContent {
            client_content: ClientContent {
                turns: vec![ClientTurn {
                    role: "user".to_string(),
                    parts: Vec::new(),
                }],
                turn_complete: true,
            },
        }
    }

    /// An incomplete user turn with no parts: the continue handshake that
    /// tells the server the client is still consuming an open turn.
    pub fn continue_signal() -> Self {
        ClientMessage::ClientContent {
            client_content: ClientContent {
                turns: vec![ClientTurn {
                    role: "user".to_string(),
                    parts: Vec::new(),
                }],
                turn_complete: false,
            },
        }
    }

    /// Function call results.
    pub fn tool_response(function_responses: serde_json::Value) -> Self {
        ClientMessage::ToolResponse {
            tool_response: ToolResponse { function_responses },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_priority_order() {
        let msg = ServerMessage {
            setup_complete: Some(serde_json::json!({})),
            tool_call: Some(serde_json::json!({"name": "f"})),
            server_content: Some(ServerContent::default()),
            text: Some("hi".to_string()),
        };
        assert!(matches!(
            msg.classify(),
            Some(InboundMessage::SetupComplete)
        ));

        let msg = ServerMessage {
            tool_call: Some(serde_json::json!({"name": "f"})),
            server_content: Some(ServerContent::default()),
            ..Default::default()
        };
        assert!(matches!(msg.classify(), Some(InboundMessage::ToolCall(_))));

        let msg = ServerMessage {
            text: Some("hello".to_string()),
            ..Default::default()
        };
        match msg.classify() {
            Some(InboundMessage::Transcription(t)) => assert_eq!(t, "hello"),
            other => panic!("expected transcription, got {other:?}"),
        }

        assert!(ServerMessage::default().classify().is_none());
    }

    #[test]
    fn test_server_content_deserialization() {
        let json = r#"{
            "serverContent": {
                "modelTurn": {
                    "parts": [{"inlineData": {"mimeType": "audio/pcm", "data": "AAA="}}]
                },
                "turnComplete": false
            }
        }"#;
        let msg: ServerMessage = serde_json::from_str(json).unwrap();
        let content = match msg.classify() {
            Some(InboundMessage::Content(c)) => c,
            other => panic!("expected content, got {other:?}"),
        };
        assert!(!content.is_turn_complete());
        assert!(!content.is_interrupted());
        let parts = &content.model_turn.as_ref().unwrap().parts;
        assert_eq!(parts.len(), 1);
        let inline = parts[0].inline_data.as_ref().unwrap();
        assert_eq!(inline.mime_type.as_deref(), Some("audio/pcm"));
        assert_eq!(inline.decode().unwrap(), vec![0, 0]);
    }

    #[test]
    fn test_interrupted_deserialization() {
        let json = r#"{"serverContent": {"interrupted": true}}"#;
        let msg: ServerMessage = serde_json::from_str(json).unwrap();
        match msg.classify() {
            Some(InboundMessage::Content(c)) => assert!(c.is_interrupted()),
            other => panic!("expected content, got {other:?}"),
        }
    }

    #[test]
    fn test_audio_chunk_serialization() {
        let msg = ClientMessage::audio_chunk("QUJD");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            json["realtime_input"]["media_chunks"][0]["mime_type"],
            "audio/pcm"
        );
        assert_eq!(json["realtime_input"]["media_chunks"][0]["data"], "QUJD");
    }

    #[test]
    fn test_video_frame_serialization() {
        let msg = ClientMessage::video_frame("ZnJhbWU=");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            json["realtime_input"]["media_chunks"][0]["mime_type"],
            "image/jpeg"
        );
    }

    #[test]
    fn test_text_message_serialization() {
        let msg = ClientMessage::text_message("hello");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["client_content"]["turn_complete"], true);
        assert_eq!(json["client_content"]["turns"][0]["role"], "user");
        assert_eq!(
            json["client_content"]["turns"][0]["parts"][0]["text"],
            "hello"
        );
    }

    #[test]
    fn test_continue_signal_is_incomplete_and_empty() {
        let msg = ClientMessage::continue_signal();
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["client_content"]["turn_complete"], false);
        assert_eq!(
            json["client_content"]["turns"][0]["parts"]
                .as_array()
                .unwrap()
                .len(),
            0
        );
    }

    #[test]
    fn test_end_of_turn_is_complete_and_empty() {
        let msg = ClientMessage::end_of_turn();
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["client_content"]["turn_complete"], true);
        assert_eq!(
            json["client_content"]["turns"][0]["parts"]
                .as_array()
                .unwrap()
                .len(),
            0
        );
    }

    #[test]
    fn test_tool_response_serialization() {
        let msg = ClientMessage::tool_response(serde_json::json!([
            {"id": "call-1", "response": {"ok": true}}
        ]));
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            json["tool_response"]["function_responses"][0]["id"],
            "call-1"
        );
    }
}
