//! Drains a generation stage into a stream transaction.
//!
//! The generator (external to this crate) pushes [`StreamItem`]s into a
//! [`BoundedQueue`]. A [`StreamDriver`] pulls them, forwards output to the
//! transaction, and ends it: `Finished` commits, `Failed` aborts, and a
//! stage that stays silent past the item timeout aborts with
//! [`TIMEOUT_CODE`].

use std::sync::Arc;
use std::time::Duration;

use rapport_events::StateEvent;
use rapport_pipeline::BoundedQueue;
use rapport_stream::{Frame, StreamError, StreamTransaction};
use serde_json::Value;

/// Error code on the abort frame when the generator goes silent.
pub const TIMEOUT_CODE: &str = "TIMEOUT";

/// One unit of generator output.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem {
    /// A text fragment.
    Text {
        /// The fragment.
        delta: String,
        /// Whether the generator marked it as the last fragment.
        is_final: bool,
    },
    /// A synthesized audio chunk.
    Audio {
        /// Raw audio bytes.
        data: Vec<u8>,
        /// Samples per second.
        sample_rate: u32,
    },
    /// A side-channel annotation.
    Metadata {
        /// Annotation name.
        key: String,
        /// Annotation value.
        value: Value,
    },
    /// A state change to apply if the interaction commits.
    StateChange(Box<StateEvent>),
    /// Generation completed; commit.
    Finished,
    /// Generation failed; abort.
    Failed {
        /// Why generation failed.
        reason: String,
        /// Machine-readable cause.
        code: Option<String>,
    },
}

impl StreamItem {
    /// Convenience constructor for a text fragment.
    pub fn text(delta: impl Into<String>, is_final: bool) -> Self {
        Self::Text {
            delta: delta.into(),
            is_final,
        }
    }

    /// Convenience constructor for a queued state change.
    pub fn state_change(event: StateEvent) -> Self {
        Self::StateChange(Box::new(event))
    }

    /// Short name of the variant, used in drop records.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::Audio { .. } => "audio",
            Self::Metadata { .. } => "metadata",
            Self::StateChange(_) => "state_change",
            Self::Finished => "finished",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Pulls items from one stage and feeds a transaction until it ends.
#[derive(Debug, Clone)]
pub struct StreamDriver {
    source: Arc<BoundedQueue<StreamItem>>,
    item_timeout: Duration,
}

impl StreamDriver {
    /// Drive from `source`, giving up after `item_timeout` of silence.
    pub const fn new(source: Arc<BoundedQueue<StreamItem>>, item_timeout: Duration) -> Self {
        Self {
            source,
            item_timeout,
        }
    }

    /// The stage this driver drains.
    pub const fn source(&self) -> &Arc<BoundedQueue<StreamItem>> {
        &self.source
    }

    /// Run `txn` to its terminal frame.
    ///
    /// The transaction must already be started. Returns the commit or
    /// abort frame.
    ///
    /// # Errors
    ///
    /// [`StreamError`] if the transaction is not active or its commit is
    /// refused by the store.
    pub fn drive(&self, txn: &mut StreamTransaction) -> Result<Frame, StreamError> {
        loop {
            let Some(item) = self.source.get(Some(self.item_timeout)) else {
                tracing::warn!(
                    transaction_id = %txn.transaction_id(),
                    stage = self.source.stage(),
                    timeout_ms = u64::try_from(self.item_timeout.as_millis()).unwrap_or(u64::MAX),
                    "generator went silent"
                );
                return txn.abort("generation timed out", Some(TIMEOUT_CODE));
            };
            match item {
                StreamItem::Text { delta, is_final } => {
                    txn.add_text(&delta, is_final)?;
                }
                StreamItem::Audio { data, sample_rate } => {
                    txn.add_audio(data, sample_rate)?;
                }
                StreamItem::Metadata { key, value } => {
                    txn.add_metadata(&key, value)?;
                }
                StreamItem::StateChange(event) => match txn.queue_event(*event) {
                    Err(StreamError::ControlEvent(event_type)) => {
                        tracing::warn!(
                            transaction_id = %txn.transaction_id(),
                            event_type = event_type.as_str(),
                            "ignoring transaction control event from generator"
                        );
                    }
                    queued => queued?,
                },
                StreamItem::Finished => return txn.commit(),
                StreamItem::Failed { reason, code } => {
                    return txn.abort(&reason, code.as_deref());
                }
            }
        }
    }
}
