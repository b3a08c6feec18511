//! Event-stream ingestion for the upstream chat service.
//!
//! This crate provides:
//! - [`frame`] — bytes → `event:`/`data:` frames, resumable across chunks
//! - [`interpreter`] — frame → fragments, completion and error signals
//! - [`rules`] — prioritized field rules for heterogeneous payloads
//! - [`recovery`] — salvage from leftover bytes when no frame yielded text
//! - [`ingest`] — drives the above over a byte stream to one answer text

pub mod anchors;
pub mod decoder;
pub mod frame;
pub mod interpreter;
pub mod recovery;
pub mod rules;

use futures::{Stream, StreamExt};
use tracing::{debug, info, instrument, warn};

use itinera_shared::{ItineraError, Result, StreamConfig};

pub use frame::{FrameReader, RawFrame};
pub use interpreter::{EventKind, Interpreter, StreamState};
pub use recovery::{Recovered, RecoveryStrategy, recover};
pub use rules::{FieldRule, RuleChain, RuleMatch};

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Tuning for one ingestion call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamOptions {
    /// 1-based index of the answer delta assumed to carry the complete answer.
    ///
    /// This mirrors an undocumented upstream behavior; `None` disables it and
    /// relies on accumulation alone.
    pub complete_answer_delta: Option<u32>,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            complete_answer_delta: Some(2),
        }
    }
}

impl From<&StreamConfig> for StreamOptions {
    fn from(config: &StreamConfig) -> Self {
        Self {
            complete_answer_delta: (config.fast_path_delta > 0).then_some(config.fast_path_delta),
        }
    }
}

// ---------------------------------------------------------------------------
// Observer
// ---------------------------------------------------------------------------

/// Progress callbacks for an ingestion call.
pub trait StreamObserver: Send + Sync {
    /// A frame was parsed off the stream.
    fn frame_received(&self, event_type: &str);
    /// Accumulated answer text grew to `chars` characters.
    fn text_progress(&self, chars: usize);
    /// A frame was skipped as unreadable.
    fn frame_skipped(&self, reason: &str);
}

/// No-op observer for headless/test usage.
pub struct SilentObserver;

impl StreamObserver for SilentObserver {
    fn frame_received(&self, _event_type: &str) {}
    fn text_progress(&self, _chars: usize) {}
    fn frame_skipped(&self, _reason: &str) {}
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Where the final answer text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextSource {
    /// The designated delta carried the whole answer.
    CompleteDelta,
    /// Concatenated fragments.
    Accumulated,
    /// Salvaged from leftover bytes.
    Recovered(RecoveryStrategy),
}

/// Result of draining a stream.
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    /// Final answer text; never empty.
    pub text: String,
    pub source: TextSource,
    /// Frames parsed, including skipped ones.
    pub frames: usize,
    pub skipped_frames: usize,
    pub answer_deltas: u32,
    /// Whether the stream signalled completion before the transport ended.
    pub completed: bool,
}

// ---------------------------------------------------------------------------
// Accumulator
// ---------------------------------------------------------------------------

/// Drain `stream` into a single answer text.
///
/// Reads until a completion signal or end of transport, whichever comes
/// first. The stream is dropped as soon as reading stops, on every exit path.
/// Unreadable frames are skipped; upstream errors, transport errors, and a
/// stream with nothing extractable are fatal.
#[instrument(skip_all, fields(complete_delta = ?options.complete_answer_delta))]
pub async fn ingest<S, B, E, O>(
    stream: S,
    options: &StreamOptions,
    observer: &O,
) -> Result<IngestOutcome>
where
    S: Stream<Item = std::result::Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
    O: StreamObserver + ?Sized,
{
    let interpreter = Interpreter::new(options.complete_answer_delta);
    let read = read_frames(stream, &interpreter, observer).await?;

    let ReadState {
        mut reader,
        state,
        frames,
        skipped_frames,
    } = read;

    let answer_deltas = state.answer_deltas();
    let completed = state.is_finished();
    let (complete, accumulated) = state.into_parts();

    let (text, source) = match complete {
        Some(text) => (text, TextSource::CompleteDelta),
        None if !accumulated.trim().is_empty() => (accumulated, TextSource::Accumulated),
        None => {
            reader.finish();
            warn!(
                frames,
                leftover = reader.remaining().len(),
                "stream yielded no text, attempting raw recovery"
            );
            let recovered = recover(reader.remaining())?;
            (recovered.text, TextSource::Recovered(recovered.strategy))
        }
    };

    info!(
        ?source,
        frames,
        skipped_frames,
        answer_deltas,
        completed,
        chars = text.chars().count(),
        "stream ingested"
    );

    Ok(IngestOutcome {
        text,
        source,
        frames,
        skipped_frames,
        answer_deltas,
        completed,
    })
}

struct ReadState {
    reader: FrameReader,
    state: StreamState,
    frames: usize,
    skipped_frames: usize,
}

/// The read loop. Owns `stream`, so returning from here releases it.
async fn read_frames<S, B, E, O>(
    stream: S,
    interpreter: &Interpreter,
    observer: &O,
) -> Result<ReadState>
where
    S: Stream<Item = std::result::Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
    O: StreamObserver + ?Sized,
{
    let mut stream = std::pin::pin!(stream);
    let mut read = ReadState {
        reader: FrameReader::new(),
        state: StreamState::new(),
        frames: 0,
        skipped_frames: 0,
    };

    while !read.state.is_finished() {
        let Some(chunk) = stream.next().await else {
            debug!("transport ended without a completion signal");
            break;
        };
        let chunk =
            chunk.map_err(|e| ItineraError::transport(format!("stream read failed: {e}")))?;

        for frame in read.reader.push(chunk.as_ref()) {
            read.frames += 1;
            observer.frame_received(&frame.event_type);

            let before = read.state.accumulated_text().len();
            match interpreter.interpret(&frame, &mut read.state) {
                Ok(()) => {}
                Err(e) if e.is_recoverable() => {
                    warn!(event = %frame.event_type, error = %e, "skipping unreadable frame");
                    read.skipped_frames += 1;
                    observer.frame_skipped(&e.to_string());
                }
                Err(e) => return Err(e),
            }
            if read.state.accumulated_text().len() != before {
                observer.text_progress(read.state.accumulated_text().chars().count());
            }

            if read.state.is_finished() {
                debug!(frames = read.frames, "completion signalled, stopping read");
                break;
            }
        }
    }

    Ok(read)
}

#[cfg(test)]
mod tests {
    use std::pin::Pin;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::task::{Context, Poll};

    use super::*;

    /// Counts polls and records when it is dropped.
    struct Tracked<S> {
        inner: S,
        polls: Arc<AtomicUsize>,
        dropped: Arc<AtomicBool>,
    }

    #[derive(Clone, Default)]
    struct StreamTracker {
        polls: Arc<AtomicUsize>,
        dropped: Arc<AtomicBool>,
    }

    impl StreamTracker {
        fn wrap<S>(&self, inner: S) -> Tracked<S> {
            Tracked {
                inner,
                polls: Arc::clone(&self.polls),
                dropped: Arc::clone(&self.dropped),
            }
        }

        fn polls(&self) -> usize {
            self.polls.load(Ordering::SeqCst)
        }

        fn dropped(&self) -> bool {
            self.dropped.load(Ordering::SeqCst)
        }
    }

    impl<S: Stream + Unpin> Stream for Tracked<S> {
        type Item = S::Item;

        fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<S::Item>> {
            let this = self.get_mut();
            this.polls.fetch_add(1, Ordering::SeqCst);
            Pin::new(&mut this.inner).poll_next(cx)
        }
    }

    impl<S> Drop for Tracked<S> {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::SeqCst);
        }
    }

    fn chunks(
        parts: &[&str],
    ) -> impl Stream<Item = std::result::Result<Vec<u8>, std::io::Error>> + use<> {
        let owned: Vec<std::result::Result<Vec<u8>, std::io::Error>> =
            parts.iter().map(|p| Ok(p.as_bytes().to_vec())).collect();
        futures::stream::iter(owned)
    }

    fn delta_frame(content: &str) -> String {
        let data = serde_json::json!({"type": "answer", "content": content});
        format!("event: conversation.message.delta\ndata: {data}\n\n")
    }

    const ANSWER: &str = "旅行推荐:西安之旅\n行程规划:详细安排...\n旅行红黑榜:推荐/避坑...";

    #[derive(Default)]
    struct Recording {
        frames: Mutex<Vec<String>>,
        skipped: Mutex<usize>,
    }

    impl StreamObserver for Recording {
        fn frame_received(&self, event_type: &str) {
            self.frames.lock().unwrap().push(event_type.to_string());
        }
        fn text_progress(&self, _chars: usize) {}
        fn frame_skipped(&self, _reason: &str) {
            *self.skipped.lock().unwrap() += 1;
        }
    }

    #[tokio::test]
    async fn accumulates_until_done() {
        let stream = chunks(&[
            &delta_frame("旅行推荐:"),
            &delta_frame("A\n"),
            "event: done\ndata: [DONE]\n\n",
        ]);
        let opts = StreamOptions {
            complete_answer_delta: None,
        };
        let out = ingest(stream, &opts, &SilentObserver).await.unwrap();
        assert_eq!(out.text, "旅行推荐:A\n");
        assert_eq!(out.source, TextSource::Accumulated);
        assert!(out.completed);
        assert_eq!(out.frames, 3);
    }

    #[tokio::test]
    async fn second_delta_short_circuits_the_stream() {
        let tail = delta_frame("never read");
        let stream = chunks(&[&delta_frame("旅行推荐:西"), &delta_frame(ANSWER), &tail]);
        let observer = Recording::default();
        let out = ingest(stream, &StreamOptions::default(), &observer).await.unwrap();
        assert_eq!(out.text, ANSWER);
        assert_eq!(out.source, TextSource::CompleteDelta);
        assert_eq!(out.answer_deltas, 2);
        assert_eq!(observer.frames.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn frames_after_completion_in_same_chunk_are_ignored() {
        let combined = format!("event: done\ndata: {{}}\n\n{}", delta_frame("late"));
        let stream = chunks(&[&delta_frame("早"), &combined]);
        let opts = StreamOptions {
            complete_answer_delta: None,
        };
        let out = ingest(stream, &opts, &SilentObserver).await.unwrap();
        assert_eq!(out.text, "早");
    }

    #[tokio::test]
    async fn end_of_transport_without_done_is_not_an_error() {
        let stream = chunks(&[&delta_frame("半截回答")]);
        let out = ingest(stream, &StreamOptions::default(), &SilentObserver)
            .await
            .unwrap();
        assert_eq!(out.text, "半截回答");
        assert!(!out.completed);
    }

    #[tokio::test]
    async fn malformed_frame_is_skipped() {
        let stream = chunks(&[
            &delta_frame("好"),
            "event: conversation.message.delta\ndata: {\"type\":\"answer\",\"content\n\n",
            &delta_frame("的"),
        ]);
        let opts = StreamOptions {
            complete_answer_delta: None,
        };
        let observer = Recording::default();
        let out = ingest(stream, &opts, &observer).await.unwrap();
        assert_eq!(out.text, "好的");
        assert_eq!(out.skipped_frames, 1);
        assert_eq!(*observer.skipped.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn upstream_error_is_fatal() {
        let stream = chunks(&[
            &delta_frame("好"),
            "event: error\ndata: {\"code\":5000,\"msg\":\"internal\"}\n\n",
        ]);
        let err = ingest(stream, &StreamOptions::default(), &SilentObserver)
            .await
            .unwrap_err();
        assert!(matches!(err, ItineraError::Protocol { .. }));
    }

    #[tokio::test]
    async fn transport_error_is_fatal() {
        let items: Vec<std::result::Result<Vec<u8>, std::io::Error>> = vec![
            Ok(delta_frame("好").into_bytes()),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
        ];
        let err = ingest(futures::stream::iter(items), &StreamOptions::default(), &SilentObserver)
            .await
            .unwrap_err();
        assert!(matches!(err, ItineraError::Transport(_)));
    }

    #[tokio::test]
    async fn empty_stream_is_empty_response() {
        let stream = chunks(&[]);
        let err = ingest(stream, &StreamOptions::default(), &SilentObserver)
            .await
            .unwrap_err();
        assert!(matches!(err, ItineraError::EmptyResponse));
    }

    #[tokio::test]
    async fn unframed_tail_is_recovered() {
        let stream = chunks(&[
            "event: conversation.chat.created\ndata: {}\n\n",
            "event: conversation.message.delta\ndata: {\"type\":\"answer\",\"content\":\"只有尾巴\"}",
        ]);
        let out = ingest(stream, &StreamOptions::default(), &SilentObserver)
            .await
            .unwrap();
        assert_eq!(out.text, "只有尾巴");
        assert_eq!(
            out.source,
            TextSource::Recovered(RecoveryStrategy::EmbeddedJson)
        );
    }

    #[tokio::test]
    async fn early_finish_releases_the_stream() {
        let tracker = StreamTracker::default();
        // Anything past the second delta would never resolve.
        let stream = chunks(&[&delta_frame("旅行推荐:西"), &delta_frame(ANSWER)])
            .chain(futures::stream::pending());
        let out = ingest(tracker.wrap(stream), &StreamOptions::default(), &SilentObserver)
            .await
            .unwrap();
        assert_eq!(out.source, TextSource::CompleteDelta);
        assert_eq!(tracker.polls(), 2);
        assert!(tracker.dropped());
    }

    #[tokio::test]
    async fn upstream_error_releases_the_stream() {
        let tracker = StreamTracker::default();
        let stream = chunks(&[
            &delta_frame("好"),
            "event: error\ndata: {\"code\":5000,\"msg\":\"internal\"}\n\n",
        ])
        .chain(futures::stream::pending());
        let err = ingest(tracker.wrap(stream), &StreamOptions::default(), &SilentObserver)
            .await
            .unwrap_err();
        assert!(matches!(err, ItineraError::Protocol { .. }));
        assert_eq!(tracker.polls(), 2);
        assert!(tracker.dropped());
    }

    #[tokio::test]
    async fn transport_error_releases_the_stream() {
        let tracker = StreamTracker::default();
        let items: Vec<std::result::Result<Vec<u8>, std::io::Error>> = vec![
            Ok(delta_frame("好").into_bytes()),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
            Ok(delta_frame("不会读到").into_bytes()),
        ];
        let err = ingest(
            tracker.wrap(futures::stream::iter(items)),
            &StreamOptions::default(),
            &SilentObserver,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ItineraError::Transport(_)));
        assert_eq!(tracker.polls(), 2);
        assert!(tracker.dropped());
    }

    #[tokio::test]
    async fn end_of_stream_releases_the_stream() {
        let tracker = StreamTracker::default();
        let stream = chunks(&[&delta_frame("半截回答")]);
        let out = ingest(tracker.wrap(stream), &StreamOptions::default(), &SilentObserver)
            .await
            .unwrap();
        assert_eq!(out.text, "半截回答");
        assert_eq!(tracker.polls(), 2);
        assert!(tracker.dropped());
    }

    #[tokio::test]
    async fn blank_complete_delta_keeps_accumulated_text() {
        let stream = chunks(&[
            "event: conversation.message.delta\ndata: {\"type\":\"answer\",\"content\":\"前言\"}\n\n",
            "event: conversation.message.delta\ndata: {\"type\":\"answer\",\"object\":{\"value\":\"   \"}}\n\n",
        ]);
        let out = ingest(stream, &StreamOptions::default(), &SilentObserver)
            .await
            .unwrap();
        assert_eq!(out.source, TextSource::Accumulated);
        assert!(out.text.starts_with("前言"));
        assert!(!out.text.trim().is_empty());
    }

    #[test]
    fn options_from_config() {
        let opts = StreamOptions::from(&StreamConfig { fast_path_delta: 0 });
        assert_eq!(opts.complete_answer_delta, None);
        let opts = StreamOptions::from(&StreamConfig { fast_path_delta: 3 });
        assert_eq!(opts.complete_answer_delta, Some(3));
    }
}
