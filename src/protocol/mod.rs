//! The live conversation protocol: wire types and the turn state machine.

pub mod messages;
pub mod turn;

pub use messages::{
    AUDIO_PCM_MIME, ClientContent, ClientMessage, ClientPart, ClientTurn, ContentPart,
    IMAGE_JPEG_MIME, InboundMessage, InlineData, MediaChunk, ModelTurn, RealtimeInput,
    ServerContent, ServerMessage, ToolResponse,
};
pub use turn::{AttemptCounter, OutputReady, TranscriptBuffer, TurnEngine};
