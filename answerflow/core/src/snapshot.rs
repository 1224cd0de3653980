//! Stream Snapshots
//!
//! A snapshot is the cumulative, replayable state of one stream. Sessions
//! publish a fresh `Arc<StreamSnapshot>` for every accepted chunk; nothing
//! observed by a subscriber is ever mutated afterwards.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::chunk::{now_ms, AvatarDescriptor, EmojiCue, SubtitleCue, TransportKind};

/// Reconstructed audio for a stream
///
/// Byte ranges are kept as shared segments in arrival order so that
/// per-chunk snapshots share audio instead of copying it.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(into = "AudioTrackRecord", from = "AudioTrackRecord")]
pub struct AudioTrack {
    /// MIME type of the most recent audio chunk
    pub mime_type: String,
    /// Ordered byte ranges
    pub segments: Vec<Arc<[u8]>>,
    /// Latest frequency spectrum
    pub spectrum: Vec<f32>,
    /// Latest waveform samples
    pub waveform: Vec<f32>,
}

impl AudioTrack {
    /// Concatenate all segments into one buffer
    #[must_use]
    pub fn buffer(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len());
        for segment in &self.segments {
            out.extend_from_slice(segment);
        }
        out
    }

    /// Total number of audio bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.segments.iter().map(|s| s.len()).sum()
    }

    /// Whether no audio bytes were received
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Persisted form of an [`AudioTrack`]: segments flattened into one buffer
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AudioTrackRecord {
    mime_type: String,
    #[serde(with = "crate::chunk::base64_bytes")]
    buffer: Vec<u8>,
    #[serde(default)]
    spectrum: Vec<f32>,
    #[serde(default)]
    waveform: Vec<f32>,
}

impl From<AudioTrack> for AudioTrackRecord {
    fn from(track: AudioTrack) -> Self {
        let buffer = track.buffer();
        Self {
            mime_type: track.mime_type,
            buffer,
            spectrum: track.spectrum,
            waveform: track.waveform,
        }
    }
}

impl From<AudioTrackRecord> for AudioTrack {
    fn from(record: AudioTrackRecord) -> Self {
        let segments = if record.buffer.is_empty() {
            Vec::new()
        } else {
            vec![Arc::from(record.buffer)]
        };
        Self {
            mime_type: record.mime_type,
            segments,
            spectrum: record.spectrum,
            waveform: record.waveform,
        }
    }
}

/// The observable state of one stream
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamSnapshot {
    /// Accumulated answer text
    pub text: String,
    /// Merged subtitle cues, sorted by start time
    #[serde(default)]
    pub subtitles: Vec<SubtitleCue>,
    /// Emoji cues in arrival order
    #[serde(default)]
    pub emoji_cues: Vec<EmojiCue>,
    /// Top keywords of the answer
    #[serde(default)]
    pub highlight_keywords: Vec<String>,
    /// Reconstructed audio, if any audio chunk arrived
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioTrack>,
    /// Latest avatar state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_descriptor: Option<AvatarDescriptor>,
    /// Transport that produced the content
    pub transport: TransportKind,
    /// Creation time (Unix timestamp ms)
    pub created_at: u64,
}

impl StreamSnapshot {
    /// An empty snapshot for a stream on `transport`
    #[must_use]
    pub fn empty(transport: TransportKind) -> Self {
        Self {
            text: String::new(),
            subtitles: Vec::new(),
            emoji_cues: Vec::new(),
            highlight_keywords: Vec::new(),
            audio: None,
            avatar_descriptor: None,
            transport,
            created_at: now_ms(),
        }
    }

    /// Whether the snapshot carries no text and no audio
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && self.audio.as_ref().map_or(true, AudioTrack::is_empty)
    }

    /// Copy with a new creation stamp, for publishing a successor
    #[must_use]
    pub(crate) fn successor(&self) -> Self {
        Self {
            created_at: now_ms(),
            ..self.clone()
        }
    }
}
