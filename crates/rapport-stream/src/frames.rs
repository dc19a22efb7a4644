//! Frames: the append-only record of one streaming interaction.
//!
//! Every frame carries the same header (transaction, agent, per-transaction
//! sequence, timestamp) and one [`FrameBody`]. `Commit` and `Abort` are
//! terminal; no frame follows them. Text, audio, and metadata frames are
//! non-authoritative previews: only the commit frame reflects state that
//! was actually applied.

use std::collections::BTreeMap;
use std::sync::mpsc::Sender;

use chrono::{DateTime, Utc};
use rapport_events::StateEvent;
use rapport_types::{AgentId, TransactionId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Sample rate assumed for audio chunks when the producer does not say.
pub const DEFAULT_SAMPLE_RATE: u32 = 22_050;

/// One frame of a streaming interaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Transaction this frame belongs to.
    pub transaction_id: TransactionId,
    /// Agent the interaction targets.
    pub agent_id: AgentId,
    /// Position within the transaction, starting at 1.
    pub sequence: u64,
    /// When the frame was emitted.
    pub timestamp: DateTime<Utc>,
    /// Frame-specific content.
    #[serde(flatten)]
    pub body: FrameBody,
}

impl Frame {
    /// Whether this frame ends its transaction.
    pub const fn is_terminal(&self) -> bool {
        matches!(self.body, FrameBody::Commit { .. } | FrameBody::Abort { .. })
    }

    /// Wire name of the frame type.
    pub const fn frame_type(&self) -> &'static str {
        match self.body {
            FrameBody::Start { .. } => "start",
            FrameBody::Text { .. } => "text",
            FrameBody::Audio { .. } => "audio",
            FrameBody::Commit { .. } => "commit",
            FrameBody::Abort { .. } => "abort",
            FrameBody::Metadata { .. } => "metadata",
        }
    }
}

/// Frame content, tagged by `frame_type` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "frame_type", rename_all = "snake_case")]
pub enum FrameBody {
    /// The interaction began with this player input.
    Start {
        /// What the player said.
        player_input: String,
    },
    /// A fragment of generated text.
    Text {
        /// The new fragment.
        delta: String,
        /// Whether the generator marked this as its last fragment.
        is_final: bool,
    },
    /// A chunk of synthesized audio.
    Audio {
        /// Zero-based index of the chunk within the transaction.
        chunk_id: u64,
        /// Samples per second.
        sample_rate: u32,
        /// Length of `data` in bytes.
        byte_len: usize,
        /// Raw audio bytes (not serialized).
        #[serde(skip)]
        data: Vec<u8>,
    },
    /// State changes were applied.
    Commit {
        /// The full generated text.
        final_output: String,
        /// Timing and volume measurements.
        metrics: CommitMetrics,
        /// Every event the store applied, in order.
        applied_events: Vec<StateEvent>,
    },
    /// All buffered changes were discarded.
    Abort {
        /// Why the interaction was cancelled.
        reason: String,
        /// Machine-readable cause (e.g. `TIMEOUT`).
        error_code: Option<String>,
    },
    /// Side-channel annotation (classification results, timings).
    Metadata {
        /// Annotation name.
        key: String,
        /// Annotation value.
        value: Value,
    },
}

/// Measurements reported in a commit frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommitMetrics {
    /// Milliseconds from start to commit.
    pub latency_ms: u64,
    /// Number of text frames emitted.
    pub text_frames: usize,
    /// Number of audio chunks emitted.
    pub audio_chunks: usize,
    /// Number of events the store applied on commit.
    pub events_applied: usize,
    /// Caller-supplied annotations.
    pub metadata: BTreeMap<String, Value>,
}

/// Receiver of frames as they are emitted.
///
/// Implemented for closures and for `mpsc::Sender<Frame>`. Delivery is
/// best-effort: a panicking sink is logged and skipped, and the frame is
/// still recorded on the transaction.
pub trait FrameSink: Send {
    /// Deliver one frame.
    fn deliver(&mut self, frame: &Frame);
}

impl<F> FrameSink for F
where
    F: FnMut(&Frame) + Send,
{
    fn deliver(&mut self, frame: &Frame) {
        self(frame);
    }
}

impl FrameSink for Sender<Frame> {
    fn deliver(&mut self, frame: &Frame) {
        if self.send(frame.clone()).is_err() {
            tracing::debug!(
                transaction_id = %frame.transaction_id,
                sequence = frame.sequence,
                "frame receiver gone"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(body: FrameBody) -> Frame {
        Frame {
            transaction_id: TransactionId::from("t1"),
            agent_id: AgentId::from("lydia"),
            sequence: 1,
            timestamp: Utc::now(),
            body,
        }
    }

    #[test]
    fn only_commit_and_abort_are_terminal() {
        assert!(!frame(FrameBody::Start {
            player_input: String::new()
        })
        .is_terminal());
        assert!(frame(FrameBody::Abort {
            reason: String::from("x"),
            error_code: None
        })
        .is_terminal());
        assert!(frame(FrameBody::Commit {
            final_output: String::new(),
            metrics: CommitMetrics::default(),
            applied_events: Vec::new(),
        })
        .is_terminal());
    }

    #[test]
    fn serializes_with_frame_type_tag() {
        let json = serde_json::to_value(frame(FrameBody::Text {
            delta: String::from("Hello"),
            is_final: false,
        }))
        .unwrap_or_default();
        assert_eq!(json["frame_type"], "text");
        assert_eq!(json["delta"], "Hello");
        assert_eq!(json["transaction_id"], "t1");
        assert_eq!(json["sequence"], 1);
    }

    #[test]
    fn audio_serializes_length_not_bytes() {
        let json = serde_json::to_value(frame(FrameBody::Audio {
            chunk_id: 0,
            sample_rate: DEFAULT_SAMPLE_RATE,
            byte_len: 4,
            data: vec![1, 2, 3, 4],
        }))
        .unwrap_or_default();
        assert_eq!(json["byte_len"], 4);
        assert!(json.get("data").is_none());
    }

    #[test]
    fn closures_and_channels_are_sinks() {
        let mut seen = Vec::new();
        {
            let mut sink = |f: &Frame| seen.push(f.sequence);
            sink.deliver(&frame(FrameBody::Metadata {
                key: String::from("k"),
                value: Value::Null,
            }));
        }
        assert_eq!(seen, vec![1]);

        let (mut tx, rx) = std::sync::mpsc::channel();
        tx.deliver(&frame(FrameBody::Start {
            player_input: String::from("hi"),
        }));
        assert_eq!(rx.try_recv().map(|f| f.frame_type()), Ok("start"));
    }
}
