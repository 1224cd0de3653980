//! Snapshot Builder
//!
//! Pure helpers that derive presentation data from answer text. The live
//! session uses them to keep highlights and subtitles consistent while chunks
//! arrive; the fallback path uses [`build_fallback_snapshot`] so a locally
//! resolved answer looks like one that was streamed.

use std::collections::HashMap;

use crate::chunk::{AvatarDescriptor, SubtitleCue, TransportKind};
use crate::snapshot::StreamSnapshot;

/// Maximum number of highlight keywords
pub const MAX_HIGHLIGHTS: usize = 6;

/// Minimum keyword length, in characters
pub const MIN_HIGHLIGHT_LEN: usize = 5;

/// Cues whose start times differ by at most this much are the same cue
pub const CUE_EPSILON: f64 = 0.01;

/// Shortest subtitle duration, in seconds
pub const MIN_CUE_DURATION: f64 = 1.6;

/// Characters read per second when sizing a cue
pub const CHARS_PER_SECOND: f64 = 18.0;

/// Pause between consecutive cues, in seconds
pub const CUE_GAP: f64 = 0.4;

/// Emphasis applied to exclamatory sentences
pub const STRONG_EMPHASIS: &str = "strong";

/// Top keywords of `text`
///
/// Lowercases, strips punctuation, and keeps tokens of at least
/// [`MIN_HIGHLIGHT_LEN`] characters. Tokens are scored by
/// `frequency * length`; ties keep first-seen order.
#[must_use]
pub fn compute_highlights(text: &str) -> Vec<String> {
    let cleaned: String = text
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect();

    let mut order: Vec<(String, usize)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for token in cleaned.split_whitespace() {
        if token.chars().count() < MIN_HIGHLIGHT_LEN {
            continue;
        }
        match index.get(token) {
            Some(&i) => order[i].1 += 1,
            None => {
                index.insert(token.to_string(), order.len());
                order.push((token.to_string(), 1));
            }
        }
    }

    let mut scored: Vec<(String, usize)> = order
        .into_iter()
        .map(|(token, count)| {
            let score = count * token.chars().count();
            (token, score)
        })
        .collect();
    // Stable sort keeps first-seen order among equal scores
    scored.sort_by(|a, b| b.1.cmp(&a.1));
    scored
        .into_iter()
        .take(MAX_HIGHLIGHTS)
        .map(|(token, _)| token)
        .collect()
}

/// Merge `incoming` cues into `existing`
///
/// A cue starting within [`CUE_EPSILON`] of an existing one replaces it in
/// place (an incoming cue without emphasis keeps the existing emphasis);
/// anything else is appended. The result is sorted by start time.
#[must_use]
pub fn merge_subtitle_cues(existing: &[SubtitleCue], incoming: &[SubtitleCue]) -> Vec<SubtitleCue> {
    let mut merged = existing.to_vec();
    for cue in incoming {
        match merged
            .iter()
            .position(|c| (c.start - cue.start).abs() <= CUE_EPSILON)
        {
            Some(pos) => {
                let emphasis = cue.emphasis.clone().or_else(|| merged[pos].emphasis.take());
                merged[pos] = SubtitleCue {
                    emphasis,
                    ..cue.clone()
                };
            }
            None => merged.push(cue.clone()),
        }
    }
    merged.sort_by(|a, b| a.start.total_cmp(&b.start));
    merged
}

/// Split text into sentences
///
/// A boundary is `.`, `!` or `?` followed by whitespace. Sentences are
/// trimmed; trailing text without terminal punctuation is the last sentence.
#[must_use]
pub fn segment_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, ch)) = chars.next() {
        if !matches!(ch, '.' | '!' | '?') {
            continue;
        }
        if let Some(&(_, next)) = chars.peek() {
            if next.is_whitespace() {
                let end = i + ch.len_utf8();
                push_trimmed(&mut sentences, &text[start..end]);
                start = end;
            }
        }
    }
    push_trimmed(&mut sentences, &text[start..]);
    sentences
}

fn push_trimmed(out: &mut Vec<String>, sentence: &str) {
    let trimmed = sentence.trim();
    if !trimmed.is_empty() {
        out.push(trimmed.to_string());
    }
}

/// Options for [`build_fallback_snapshot`]
#[derive(Clone, Debug)]
pub struct FallbackSnapshotOptions {
    /// Transport tag for the snapshot
    pub transport: TransportKind,
    /// Avatar image to show while the answer plays
    pub avatar_url: Option<String>,
}

impl Default for FallbackSnapshotOptions {
    fn default() -> Self {
        Self {
            transport: TransportKind::LocalFallback,
            avatar_url: None,
        }
    }
}

/// Build a complete snapshot from a finished answer
///
/// Each sentence becomes a subtitle cue lasting
/// `max(MIN_CUE_DURATION, chars / CHARS_PER_SECOND)` seconds followed by a
/// [`CUE_GAP`] pause. Exclamatory sentences get [`STRONG_EMPHASIS`].
#[must_use]
pub fn build_fallback_snapshot(answer: &str, options: &FallbackSnapshotOptions) -> StreamSnapshot {
    let mut subtitles = Vec::new();
    let mut cursor = 0.0_f64;

    for sentence in segment_sentences(answer) {
        #[allow(clippy::cast_precision_loss)]
        let length = sentence.chars().count() as f64;
        let duration = MIN_CUE_DURATION.max(length / CHARS_PER_SECOND);
        let emphasis = sentence.contains('!').then(|| STRONG_EMPHASIS.to_string());
        let end = cursor + duration;
        subtitles.push(SubtitleCue {
            start: cursor,
            end,
            text: sentence,
            emphasis,
        });
        cursor = end + CUE_GAP;
    }

    let mut snapshot = StreamSnapshot::empty(options.transport);
    snapshot.text = answer.to_string();
    snapshot.subtitles = subtitles;
    snapshot.highlight_keywords = compute_highlights(answer);
    snapshot.avatar_descriptor = options.avatar_url.as_ref().map(|url| AvatarDescriptor {
        url: Some(url.clone()),
        ..Default::default()
    });
    snapshot
}
