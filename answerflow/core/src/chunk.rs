//! Stream Chunks
//!
//! The incremental units a transport delivers into a session. Every chunk
//! carries exactly one modality (text, audio or visual), the time it was
//! produced and the transport strategy that produced it.
//!
//! # Wire Format
//!
//! Live transports deliver chunks as JSON objects discriminated by a `type`
//! field. Field names are camelCase and audio bytes travel as base64:
//!
//! ```text
//! {"type":"text","text":"Hello ","highlightKeywords":["hello"],"done":false}
//! {"type":"audio","mimeType":"audio/mpeg","bytes":"SUQz...","isFinal":true}
//! {"type":"visual","avatarDescriptor":{"mood":"happy","speaking":true}}
//! ```
//!
//! `done` (text) and `isFinal` (audio) are the only termination signals a
//! live transport can send.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ============================================================================
// Transport Kind
// ============================================================================

/// Transport strategy that produced a chunk or a snapshot
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    /// Server-sent events over an HTTP response body
    PushChannel,
    /// WebSocket connection
    SocketChannel,
    /// Peer-to-peer data channel negotiated over HTTP signaling
    PeerDataChannel,
    /// Locally synthesized playback of a fully resolved answer
    LocalFallback,
}

impl TransportKind {
    /// Default negotiation order
    pub const DEFAULT_PREFERENCE: [TransportKind; 4] = [
        Self::PushChannel,
        Self::SocketChannel,
        Self::PeerDataChannel,
        Self::LocalFallback,
    ];

    /// Stable kebab-case name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PushChannel => "push-channel",
            Self::SocketChannel => "socket-channel",
            Self::PeerDataChannel => "peer-data-channel",
            Self::LocalFallback => "local-fallback",
        }
    }

    /// Whether this is a live (network) transport
    #[must_use]
    pub fn is_live(self) -> bool {
        !matches!(self, Self::LocalFallback)
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a transport name is not recognised
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown transport `{0}` (expected push, socket, peer or local)")]
pub struct UnknownTransport(pub String);

impl FromStr for TransportKind {
    type Err = UnknownTransport;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "push" | "push-channel" | "sse" => Ok(Self::PushChannel),
            "socket" | "socket-channel" | "websocket" | "ws" => Ok(Self::SocketChannel),
            "peer" | "peer-data-channel" | "webrtc" => Ok(Self::PeerDataChannel),
            "local" | "local-fallback" | "fallback" => Ok(Self::LocalFallback),
            other => Err(UnknownTransport(other.to_string())),
        }
    }
}

// ============================================================================
// Cue Types
// ============================================================================

/// A timed subtitle cue
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubtitleCue {
    /// Start time in seconds
    pub start: f64,
    /// End time in seconds
    pub end: f64,
    /// Cue text
    pub text: String,
    /// Emphasis hint for rendering (e.g. `"strong"`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emphasis: Option<String>,
}

impl SubtitleCue {
    /// Create a cue without emphasis
    pub fn new(start: f64, end: f64, text: impl Into<String>) -> Self {
        Self {
            start,
            end,
            text: text.into(),
            emphasis: None,
        }
    }

    /// Set the emphasis hint
    #[must_use]
    pub fn with_emphasis(mut self, emphasis: impl Into<String>) -> Self {
        self.emphasis = Some(emphasis.into());
        self
    }
}

/// An emoji reaction pinned to a point in the playback timeline
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmojiCue {
    /// Time in seconds
    pub time: f64,
    /// The emoji to show
    pub emoji: String,
}

/// Avatar state pushed by a transport
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AvatarDescriptor {
    /// Image or model URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Mood or expression name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mood: Option<String>,
    /// Gesture to play
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gesture: Option<String>,
    /// Whether the avatar is currently speaking
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speaking: Option<bool>,
}

// ============================================================================
// Chunk Payloads
// ============================================================================

/// Text modality
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextChunk {
    /// Text to append to the running buffer
    #[serde(default)]
    pub text: String,
    /// Subtitle cues to merge
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitles: Option<Vec<SubtitleCue>>,
    /// Emoji cues to append
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emoji_cues: Option<Vec<EmojiCue>>,
    /// Highlight keywords computed by the producer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub highlight_keywords: Option<Vec<String>>,
    /// Marks the last text chunk of the answer
    #[serde(default)]
    pub done: bool,
}

impl TextChunk {
    /// A plain text chunk
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    /// Mark this chunk as the final one
    #[must_use]
    pub fn finished(mut self) -> Self {
        self.done = true;
        self
    }
}

/// Audio modality
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioChunk {
    /// MIME type of the encoded audio
    pub mime_type: String,
    /// Raw encoded bytes (base64 on the wire)
    #[serde(with = "base64_bytes", default)]
    pub bytes: Vec<u8>,
    /// Frequency spectrum for visualisation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spectrum: Option<Vec<f32>>,
    /// Waveform samples for visualisation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waveform: Option<Vec<f32>>,
    /// Marks the last audio chunk of the answer
    #[serde(default)]
    pub is_final: bool,
}

/// Visual modality
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisualChunk {
    /// New avatar state
    pub avatar_descriptor: AvatarDescriptor,
}

/// The modality-specific content of a chunk
///
/// This is also the wire frame: the `type` tag selects the variant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChunkPayload {
    /// Text, subtitles, emoji cues and highlights
    Text(TextChunk),
    /// Encoded audio with visualisation metadata
    Audio(AudioChunk),
    /// Avatar state
    Visual(VisualChunk),
}

/// Modality discriminant, for logging and routing
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Modality {
    /// Text chunks
    Text,
    /// Audio chunks
    Audio,
    /// Visual chunks
    Visual,
}

impl ChunkPayload {
    /// Which modality this payload carries
    #[must_use]
    pub fn modality(&self) -> Modality {
        match self {
            Self::Text(_) => Modality::Text,
            Self::Audio(_) => Modality::Audio,
            Self::Visual(_) => Modality::Visual,
        }
    }

    /// Whether this payload carries a termination signal
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::Text(text) => text.done,
            Self::Audio(audio) => audio.is_final,
            Self::Visual(_) => false,
        }
    }
}

/// One incremental unit of streamed output
#[derive(Clone, Debug, PartialEq)]
pub struct StreamChunk {
    /// Modality-specific content
    pub payload: ChunkPayload,
    /// When the chunk was produced (Unix timestamp ms)
    pub timestamp: u64,
    /// Transport that produced the chunk
    pub transport: TransportKind,
}

impl StreamChunk {
    /// Wrap a payload, stamping it with the current time
    #[must_use]
    pub fn new(transport: TransportKind, payload: ChunkPayload) -> Self {
        Self {
            payload,
            timestamp: now_ms(),
            transport,
        }
    }

    /// Plain text chunk
    pub fn text(transport: TransportKind, text: impl Into<String>) -> Self {
        Self::new(transport, ChunkPayload::Text(TextChunk::new(text)))
    }

    /// Audio chunk
    #[must_use]
    pub fn audio(transport: TransportKind, audio: AudioChunk) -> Self {
        Self::new(transport, ChunkPayload::Audio(audio))
    }

    /// Visual chunk
    #[must_use]
    pub fn visual(transport: TransportKind, avatar_descriptor: AvatarDescriptor) -> Self {
        Self::new(
            transport,
            ChunkPayload::Visual(VisualChunk { avatar_descriptor }),
        )
    }

    /// Modality of the payload
    #[must_use]
    pub fn modality(&self) -> Modality {
        self.payload.modality()
    }
}

/// Current time as Unix timestamp in milliseconds
#[must_use]
pub fn now_ms() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or_default()
}

/// Serde adapter: `Vec<u8>` as a standard base64 string
pub(crate) mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_kind_parsing() {
        assert_eq!("sse".parse::<TransportKind>(), Ok(TransportKind::PushChannel));
        assert_eq!("WS".parse::<TransportKind>(), Ok(TransportKind::SocketChannel));
        assert_eq!(
            "peer-data-channel".parse::<TransportKind>(),
            Ok(TransportKind::PeerDataChannel)
        );
        assert_eq!(" local ".parse::<TransportKind>(), Ok(TransportKind::LocalFallback));
        assert!("carrier-pigeon".parse::<TransportKind>().is_err());
    }

    #[test]
    fn test_transport_kind_serde_names() {
        let json = serde_json::to_string(&TransportKind::PeerDataChannel).unwrap();
        assert_eq!(json, "\"peer-data-channel\"");
        assert!(!TransportKind::LocalFallback.is_live());
    }

    #[test]
    fn test_text_frame_decoding() {
        let frame = r#"{"type":"text","text":"Hi","highlightKeywords":["hello"],"done":true}"#;
        let payload: ChunkPayload = serde_json::from_str(frame).unwrap();

        match &payload {
            ChunkPayload::Text(text) => {
                assert_eq!(text.text, "Hi");
                assert_eq!(text.highlight_keywords, Some(vec!["hello".to_string()]));
                assert!(text.done);
            }
            other => panic!("Expected text payload, got {other:?}"),
        }
        assert!(payload.is_terminal());
    }

    #[test]
    fn test_audio_frame_bytes_are_base64() {
        let payload = ChunkPayload::Audio(AudioChunk {
            mime_type: "audio/wav".into(),
            bytes: vec![0, 1, 2, 254, 255],
            spectrum: Some(vec![0.5]),
            waveform: None,
            is_final: false,
        });

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["type"], "audio");
        assert_eq!(json["mimeType"], "audio/wav");
        assert_eq!(json["bytes"], "AAEC/v8=");
        assert!(json.get("waveform").is_none());

        let back: ChunkPayload = serde_json::from_value(json).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn test_visual_never_terminal() {
        let chunk = StreamChunk::visual(
            TransportKind::SocketChannel,
            AvatarDescriptor {
                mood: Some("happy".into()),
                ..Default::default()
            },
        );
        assert_eq!(chunk.modality(), Modality::Visual);
        assert!(!chunk.payload.is_terminal());
    }
}
