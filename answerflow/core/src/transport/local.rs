//! Local Fallback
//!
//! The last strategy in every preference list. It asks the caller's fallback
//! resolver for a complete snapshot and plays it back through the chunk
//! synthesizer, so consumers see the same chunk sequence a live transport
//! would produce:
//!
//! 1. a visual chunk, if the snapshot carries an avatar
//! 2. paced text chunks, `tokens_per_chunk` units per tick
//! 3. the audio track, if any
//! 4. a final empty text chunk with `done`, carrying subtitles, emoji cues
//!    and highlights
//!
//! A rejecting resolver is the only way this strategy fails.

use async_trait::async_trait;
use tracing::debug;

use super::traits::{ChunkFeed, TransportContext, TransportStrategy};
use crate::chunk::{AudioChunk, ChunkPayload, TextChunk, TransportKind, VisualChunk};
use crate::error::{StreamError, TransportError};
use crate::fallback::{synthesize, SynthOptions};
use crate::snapshot::StreamSnapshot;

/// Synthesized playback of the fallback resolver's answer
#[derive(Debug, Clone, Default)]
pub struct LocalFallback {
    synth: SynthOptions,
}

impl LocalFallback {
    /// Local fallback with the given playback pacing
    #[must_use]
    pub fn new(synth: SynthOptions) -> Self {
        Self { synth }
    }
}

fn closing_chunk(snapshot: &StreamSnapshot) -> TextChunk {
    let mut chunk = TextChunk::default().finished();
    chunk.subtitles = Some(snapshot.subtitles.clone());
    chunk.emoji_cues = Some(snapshot.emoji_cues.clone());
    chunk.highlight_keywords = Some(snapshot.highlight_keywords.clone());
    chunk
}

fn audio_chunk(snapshot: &StreamSnapshot) -> Option<AudioChunk> {
    let track = snapshot.audio.as_ref().filter(|track| !track.is_empty())?;
    Some(AudioChunk {
        mime_type: track.mime_type.clone(),
        bytes: track.buffer(),
        spectrum: Some(track.spectrum.clone()),
        waveform: Some(track.waveform.clone()),
        is_final: false,
    })
}

#[async_trait]
impl TransportStrategy for LocalFallback {
    fn kind(&self) -> TransportKind {
        TransportKind::LocalFallback
    }

    async fn establish(&self, ctx: &TransportContext) -> Result<ChunkFeed, TransportError> {
        let resolved = tokio::select! {
            biased;
            () = ctx.cancel.cancelled() => Err(StreamError::Cancelled),
            resolved = (ctx.resolver)() => resolved,
        };
        let snapshot = resolved.map_err(TransportError::Resolver)?;
        debug!(
            chars = snapshot.text.chars().count(),
            cues = snapshot.subtitles.len(),
            "Fallback answer resolved"
        );

        let (sender, events) = ChunkFeed::channel(TransportKind::LocalFallback);
        let (stream, controls) = synthesize(ctx.cancel.child_token(), self.synth.clone());

        if let Some(avatar) = snapshot.avatar_descriptor.clone() {
            sender.chunk(ChunkPayload::Visual(VisualChunk {
                avatar_descriptor: avatar,
            }));
        }

        let tokens = sender.clone();
        stream.on_token(move |batch| {
            tokens.chunk(ChunkPayload::Text(TextChunk::new(batch.clone())));
        });

        let closing = sender.clone();
        let audio = audio_chunk(&snapshot);
        let done = closing_chunk(&snapshot);
        stream.on_complete(move |_| {
            if let Some(audio) = audio.clone() {
                closing.chunk(ChunkPayload::Audio(audio));
            }
            closing.chunk(ChunkPayload::Text(done.clone()));
        });

        stream.on_error(move |e| {
            sender.fail(e.clone());
        });

        controls.append(&snapshot.text, true);

        Ok(ChunkFeed::new(events).with_teardown(move || controls.cancel()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{build_fallback_snapshot, FallbackSnapshotOptions};
    use crate::kernel::fallback_resolver;
    use crate::transport::FeedEvent;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn context_with(snapshot: Result<StreamSnapshot, StreamError>) -> TransportContext {
        let mut ctx = crate::transport::test_context();
        ctx.resolver = fallback_resolver(move || {
            let snapshot = snapshot.clone();
            async move { snapshot }
        });
        ctx
    }

    fn fast() -> LocalFallback {
        LocalFallback::new(SynthOptions {
            chunk_delay: Duration::from_millis(5),
            tokens_per_chunk: 2,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_plays_back_resolved_answer() {
        let options = FallbackSnapshotOptions {
            avatar_url: Some("https://example.test/avatar.png".into()),
            ..Default::default()
        };
        let snapshot = build_fallback_snapshot("Ownership matters. Borrowing helps!", &options);
        let ctx = context_with(Ok(snapshot.clone()));

        let mut feed = fast().establish(&ctx).await.unwrap();
        let mut payloads = Vec::new();
        while let Some(event) = feed.events.recv().await {
            match event {
                FeedEvent::Chunk(chunk) => {
                    assert_eq!(chunk.transport, TransportKind::LocalFallback);
                    let last = chunk.payload.is_terminal();
                    payloads.push(chunk.payload);
                    if last {
                        break;
                    }
                }
                FeedEvent::Failed(e) => panic!("unexpected failure: {e}"),
            }
        }

        assert!(matches!(payloads.first(), Some(ChunkPayload::Visual(_))));
        let text: String = payloads
            .iter()
            .filter_map(|p| match p {
                ChunkPayload::Text(t) => Some(t.text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(text, snapshot.text);

        let Some(ChunkPayload::Text(done)) = payloads.last() else {
            panic!("last chunk is not text");
        };
        assert!(done.done);
        assert_eq!(done.subtitles.as_deref(), Some(snapshot.subtitles.as_slice()));
        assert_eq!(
            done.highlight_keywords.as_deref(),
            Some(snapshot.highlight_keywords.as_slice())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolver_rejection_fails_establishment() {
        let err = StreamError::Resolver("kernel offline".into());
        let ctx = context_with(Err(err.clone()));

        let result = fast().establish(&ctx).await;
        match result {
            Err(TransportError::Resolver(e)) => assert_eq!(e, err),
            other => panic!("expected resolver error, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_stops_playback() {
        let snapshot = build_fallback_snapshot(
            "one two three four five six seven eight nine ten",
            &FallbackSnapshotOptions::default(),
        );
        let ctx = context_with(Ok(snapshot));

        let feed = fast().establish(&ctx).await.unwrap();
        let ChunkFeed {
            mut events,
            teardown,
        } = feed;
        tokio::time::sleep(Duration::from_millis(6)).await;
        if let Some(teardown) = teardown {
            teardown();
        }

        let mut chunks = 0;
        while let Some(event) = events.recv().await {
            if let FeedEvent::Chunk(chunk) = event {
                assert!(!chunk.payload.is_terminal());
                chunks += 1;
            }
        }
        assert_eq!(chunks, 1);
    }
}
