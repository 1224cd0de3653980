//! Wire Frames
//!
//! Live transports deliver JSON objects discriminated by a string `type`:
//!
//! - `text`, `audio`, `visual`: a chunk payload (see [`ChunkPayload`])
//! - `token` `{token}`: a bare text fragment from the inference service
//! - `done`: end of the answer, treated as a final empty text chunk
//! - `error` `{detail}` (or `{message}`): the remote side failed
//!
//! The push channel wraps frames in server-sent events. The event name may
//! carry the frame kind instead of the `type` field (`event: token`,
//! `event: done`, `event: error`), and a bare `[DONE]` data line ends the
//! stream.
//!
//! Malformed frames are reported as [`FrameError`]; transports log and drop
//! them rather than ending the stream.

use serde::Deserialize;
use serde_json::Value;

use crate::chunk::{ChunkPayload, TextChunk};
use crate::error::FrameError;

/// Maximum frame size (1 MiB)
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// A decoded inbound frame
#[derive(Clone, Debug, PartialEq)]
pub enum WireFrame {
    /// Content for the session
    Payload(ChunkPayload),
    /// The remote side reported an error
    Failed(String),
}

impl WireFrame {
    fn done() -> Self {
        Self::Payload(ChunkPayload::Text(TextChunk::default().finished()))
    }

    fn token(token: String) -> Self {
        Self::Payload(ChunkPayload::Text(TextChunk::new(token)))
    }
}

#[derive(Deserialize)]
struct TokenFrame {
    token: String,
}

#[derive(Deserialize)]
struct ErrorFrame {
    #[serde(default, alias = "message")]
    detail: Option<String>,
}

const DEFAULT_REMOTE_ERROR: &str = "remote stream failed";

/// Decode one JSON frame
///
/// # Errors
///
/// Fails on oversized input, invalid JSON, a missing or unknown `type`, or
/// fields of the wrong shape.
pub fn decode_frame(raw: &str) -> Result<WireFrame, FrameError> {
    if raw.len() > MAX_FRAME_SIZE {
        return Err(FrameError::TooLarge {
            size: raw.len(),
            max: MAX_FRAME_SIZE,
        });
    }

    let value: Value = serde_json::from_str(raw)?;
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(FrameError::MissingType)?
        .to_string();

    match kind.as_str() {
        "text" | "audio" | "visual" => Ok(WireFrame::Payload(serde_json::from_value(value)?)),
        "token" => {
            let frame: TokenFrame = serde_json::from_value(value)?;
            Ok(WireFrame::token(frame.token))
        }
        "done" => Ok(WireFrame::done()),
        "error" => {
            let frame: ErrorFrame = serde_json::from_value(value)?;
            Ok(WireFrame::Failed(
                frame.detail.unwrap_or_else(|| DEFAULT_REMOTE_ERROR.to_string()),
            ))
        }
        _ => Err(FrameError::UnknownType(kind)),
    }
}

// ============================================================================
// Server-Sent Events
// ============================================================================

/// One dispatched server-sent event
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SseEvent {
    /// `event:` field, if present
    pub event: Option<String>,
    /// `data:` lines joined with `\n`
    pub data: String,
    /// `id:` field, if present
    pub id: Option<String>,
}

/// Decode a server-sent event into a frame
///
/// Returns `Ok(None)` for keep-alive events.
///
/// # Errors
///
/// Fails when the event data is not a valid frame.
pub fn decode_sse_event(event: &SseEvent) -> Result<Option<WireFrame>, FrameError> {
    let data = event.data.trim();
    match event.event.as_deref() {
        None | Some("message" | "chunk") => {
            if data.is_empty() {
                return Ok(None);
            }
            if data == "[DONE]" {
                return Ok(Some(WireFrame::done()));
            }
            decode_frame(data).map(Some)
        }
        Some("token") => match serde_json::from_str::<TokenFrame>(data) {
            Ok(frame) => Ok(Some(WireFrame::token(frame.token))),
            // plain-text token payload
            Err(_) => Ok(Some(WireFrame::token(event.data.clone()))),
        },
        Some("done") => Ok(Some(WireFrame::done())),
        Some("error") => {
            let detail = serde_json::from_str::<ErrorFrame>(data)
                .ok()
                .and_then(|frame| frame.detail)
                .unwrap_or_else(|| {
                    if data.is_empty() {
                        DEFAULT_REMOTE_ERROR.to_string()
                    } else {
                        data.to_string()
                    }
                });
            Ok(Some(WireFrame::Failed(detail)))
        }
        Some("ping" | "keepalive" | "heartbeat") => Ok(None),
        Some(other) => Err(FrameError::UnknownType(other.to_string())),
    }
}

/// Incremental parser for a `text/event-stream` body
///
/// Bytes are buffered until a full line is available, so multi-byte
/// characters split across network reads decode correctly.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
    id: Option<String>,
}

impl SseParser {
    /// Create an empty parser
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes and collect every event they complete
    ///
    /// # Errors
    ///
    /// Fails when a single line grows beyond [`MAX_FRAME_SIZE`]; the partial
    /// line is discarded and parsing can continue.
    pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<SseEvent>, FrameError> {
        self.buffer.extend_from_slice(bytes);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line[..line.len() - 1]);
            if let Some(event) = self.process_line(line.trim_end_matches('\r')) {
                events.push(event);
            }
        }

        if self.buffer.len() > MAX_FRAME_SIZE {
            let size = self.buffer.len();
            self.buffer.clear();
            return Err(FrameError::TooLarge {
                size,
                max: MAX_FRAME_SIZE,
            });
        }
        Ok(events)
    }

    /// Flush the final event of a body that did not end with a blank line
    pub fn finish(&mut self) -> Option<SseEvent> {
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&rest).into_owned();
            if let Some(event) = self.process_line(line.trim_end_matches('\r')) {
                return Some(event);
            }
        }
        self.dispatch()
    }

    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            "id" => self.id = Some(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        if self.data.is_empty() && self.event.is_none() {
            return None;
        }
        let event = SseEvent {
            event: self.event.take(),
            data: std::mem::take(&mut self.data).join("\n"),
            id: self.id.take(),
        };
        Some(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_decode_chunk_frames() {
        let frame = decode_frame(r#"{"type":"text","text":"Hi "}"#).unwrap();
        assert_eq!(frame, WireFrame::Payload(ChunkPayload::Text(TextChunk::new("Hi "))));

        let frame = decode_frame(r#"{"type":"visual","avatarDescriptor":{"mood":"calm"}}"#).unwrap();
        assert!(matches!(frame, WireFrame::Payload(ChunkPayload::Visual(_))));
    }

    #[test]
    fn test_decode_inference_dialect() {
        assert_eq!(
            decode_frame(r#"{"type":"token","token":"abc"}"#).unwrap(),
            WireFrame::token("abc".into())
        );
        assert_eq!(
            decode_frame(r#"{"type":"done","provider":"local","latency_ms":12}"#).unwrap(),
            WireFrame::done()
        );
        assert_eq!(
            decode_frame(r#"{"type":"error","detail":"quota"}"#).unwrap(),
            WireFrame::Failed("quota".into())
        );
        assert_eq!(
            decode_frame(r#"{"type":"error","message":"boom"}"#).unwrap(),
            WireFrame::Failed("boom".into())
        );
    }

    #[test]
    fn test_malformed_frames_rejected() {
        assert!(matches!(decode_frame("not json"), Err(FrameError::Json(_))));
        assert!(matches!(decode_frame(r#"{"text":"x"}"#), Err(FrameError::MissingType)));
        assert!(matches!(
            decode_frame(r#"{"type":"hologram"}"#),
            Err(FrameError::UnknownType(t)) if t == "hologram"
        ));
        assert!(matches!(
            decode_frame(r#"{"type":"audio","mimeType":"a","bytes":"!!"}"#),
            Err(FrameError::Json(_))
        ));

        let huge = format!(r#"{{"type":"text","text":"{}"}}"#, "x".repeat(MAX_FRAME_SIZE));
        assert!(matches!(decode_frame(&huge), Err(FrameError::TooLarge { .. })));
    }

    #[test]
    fn test_sse_parser_handles_split_reads() {
        let body = "event: token\ndata: {\"token\":\"При\"}\n\n: keep-alive\r\ndata: {\"type\":\"done\"}\r\n\r\n";
        let bytes = body.as_bytes();
        let mut parser = SseParser::new();
        let mut events = Vec::new();
        // split inside the multi-byte character
        let split = body.find("При").unwrap() + 1;
        events.extend(parser.push(&bytes[..split]).unwrap());
        events.extend(parser.push(&bytes[split..]).unwrap());

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event.as_deref(), Some("token"));
        assert_eq!(
            decode_sse_event(&events[0]).unwrap(),
            Some(WireFrame::token("При".into()))
        );
        assert_eq!(decode_sse_event(&events[1]).unwrap(), Some(WireFrame::done()));
    }

    #[test]
    fn test_sse_multiline_data_and_finish() {
        let mut parser = SseParser::new();
        let events = parser.push(b"data: line one\ndata: line two\nid: 7").unwrap();
        assert!(events.is_empty());

        let event = parser.finish().unwrap();
        assert_eq!(event.data, "line one\nline two");
        assert_eq!(event.id.as_deref(), Some("7"));
        assert!(parser.finish().is_none());
    }

    #[test]
    fn test_sse_event_names() {
        let event = |name: &str, data: &str| SseEvent {
            event: Some(name.into()),
            data: data.into(),
            id: None,
        };
        assert_eq!(decode_sse_event(&event("ping", "")).unwrap(), None);
        assert_eq!(
            decode_sse_event(&event("token", "plain words")).unwrap(),
            Some(WireFrame::token("plain words".into()))
        );
        assert_eq!(
            decode_sse_event(&event("error", r#"{"detail":"overloaded"}"#)).unwrap(),
            Some(WireFrame::Failed("overloaded".into()))
        );
        assert_eq!(
            decode_sse_event(&SseEvent {
                data: "[DONE]".into(),
                ..Default::default()
            })
            .unwrap(),
            Some(WireFrame::done())
        );
    }
}
