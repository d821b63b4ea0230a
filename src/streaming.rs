//! Incremental decoding of OpenAI-style streaming responses.
//!
//! The wire format is a sequence of `data: <json>` frames terminated by the
//! `data: [DONE]` sentinel. Frames may be split across chunk boundaries;
//! [`eventsource_stream`] buffers partial lines so decoding a response one
//! byte at a time yields the same result as decoding it whole.
//!
//! Decoding is split in two: [`SseDecoder`] is the pure frame-level state
//! machine, [`decode_sse`] drives it over a byte stream with cancellation.

use eventsource_stream::{EventStreamError, Eventsource};
use futures_util::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::TransportError;
use crate::types::{FinishReason, Usage};

/// Decoder lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    /// No valid frame seen yet.
    AwaitingFrame,
    /// At least one valid frame processed.
    Accumulating,
    /// `[DONE]` observed; further frames are ignored.
    Done,
    /// The underlying stream failed or was cancelled.
    Failed,
}

/// Final result of a decoded stream.
#[derive(Debug, Clone)]
pub struct StreamOutcome {
    /// All textual deltas, reassembled in arrival order.
    pub text: String,
    /// The last usage object observed on any frame, if any.
    pub usage: Option<Usage>,
    pub finish_reason: Option<FinishReason>,
    /// Frames whose JSON payload did not parse. Skipped, not fatal.
    pub malformed_frames: u32,
}

/// Frame-level state machine.
///
/// Feed it the payload of each `data:` frame; it accumulates text, tracks
/// the last-seen usage, and reports which delta (if any) each frame
/// carried so the caller can surface it immediately.
#[derive(Debug, Default)]
pub struct SseDecoder {
    text: String,
    usage: Option<Usage>,
    finish_reason: Option<FinishReason>,
    malformed_frames: u32,
    done: bool,
    failed: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> DecoderState {
        if self.failed {
            DecoderState::Failed
        } else if self.done {
            DecoderState::Done
        } else if self.text.is_empty()
            && self.usage.is_none()
            && self.finish_reason.is_none()
            && self.malformed_frames == 0
        {
            DecoderState::AwaitingFrame
        } else {
            DecoderState::Accumulating
        }
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Process one frame payload. Returns the textual delta the frame
    /// carried, if any, so it can be delivered in arrival order.
    pub fn process_data(&mut self, data: &str) -> Option<String> {
        if self.done || self.failed {
            return None;
        }
        let trimmed = data.trim();
        if trimmed.is_empty() {
            return None;
        }
        if trimmed == "[DONE]" {
            self.done = true;
            return None;
        }

        let json: serde_json::Value = match serde_json::from_str(trimmed) {
            Ok(v) => v,
            Err(e) => {
                // Providers occasionally emit junk frames; skipping keeps
                // the rest of the stream usable.
                self.malformed_frames += 1;
                debug!(error = %e, "skipping malformed stream frame");
                return None;
            }
        };

        // Last usage frame wins: overwrite, never accumulate.
        if let Some(usage) = extract_usage(&json) {
            self.usage = Some(usage);
        }

        if let Some(reason) = json
            .pointer("/choices/0/finish_reason")
            .and_then(|v| v.as_str())
        {
            self.finish_reason = FinishReason::parse(Some(reason));
        }

        let delta = extract_content_delta(&json)?;
        self.text.push_str(&delta);
        Some(delta)
    }

    /// Mark the stream as failed. Accumulated text stays readable.
    pub fn fail(&mut self) {
        self.failed = true;
    }

    pub fn into_outcome(self) -> StreamOutcome {
        StreamOutcome {
            text: self.text,
            usage: self.usage,
            finish_reason: self.finish_reason,
            malformed_frames: self.malformed_frames,
        }
    }
}

fn extract_content_delta(json: &serde_json::Value) -> Option<String> {
    let content = json.pointer("/choices/0/delta/content")?.as_str()?;
    if content.is_empty() {
        return None;
    }
    Some(content.to_string())
}

fn extract_usage(json: &serde_json::Value) -> Option<Usage> {
    let usage = json.get("usage")?;
    if usage.is_null() {
        return None;
    }
    let field = |name: &str| usage.get(name).and_then(|v| v.as_u64()).map(|v| v as u32);
    Some(Usage::from_reported(
        field("prompt_tokens"),
        field("completion_tokens"),
        field("total_tokens"),
    ))
}

/// Drive a byte stream through the decoder.
///
/// `on_delta` fires once per textual fragment, in arrival order, before the
/// next chunk is read. The cancellation token is honored at every chunk
/// boundary. A transport-level stream failure propagates the normalized
/// error; deltas already delivered through `on_delta` remain with the
/// caller.
pub async fn decode_sse<S, B>(
    stream: S,
    mut on_delta: impl FnMut(&str),
    cancel: &CancellationToken,
) -> Result<StreamOutcome, TransportError>
where
    S: Stream<Item = Result<B, TransportError>>,
    B: AsRef<[u8]>,
{
    let mut decoder = SseDecoder::new();
    let mut events = Box::pin(stream.eventsource());

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                decoder.fail();
                return Err(TransportError::cancelled());
            }
            next = events.next() => next,
        };

        match next {
            Some(Ok(event)) => {
                if let Some(delta) = decoder.process_data(&event.data) {
                    on_delta(&delta);
                }
                if decoder.is_done() {
                    break;
                }
            }
            Some(Err(err)) => {
                decoder.fail();
                return Err(normalize_stream_error(err));
            }
            // Stream ended without [DONE]; finalize with what arrived.
            None => break,
        }
    }

    Ok(decoder.into_outcome())
}

fn normalize_stream_error(err: EventStreamError<TransportError>) -> TransportError {
    match err {
        // Already normalized at the transport boundary.
        EventStreamError::Transport(e) => e,
        EventStreamError::Utf8(e) => TransportError::network(format!("stream decode error: {e}")),
        EventStreamError::Parser(e) => TransportError::network(format!("stream decode error: {e}")),
    }
}
