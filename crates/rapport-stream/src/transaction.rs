//! One streaming interaction as an atomic unit.
//!
//! A [`StreamTransaction`] moves through `Idle -> Started -> {Committed |
//! Aborted}`. While started, text, audio, and metadata only accumulate in
//! memory and emit preview frames; queued state changes are held locally.
//! [`StreamTransaction::commit`] is the only step that mutates the store:
//! it dispatches every queued event, the assistant turn, and the commit
//! inside one store lock scope. [`StreamTransaction::abort`] discards
//! everything, so the store's state after an abort is exactly its state
//! before [`StreamTransaction::start`].

use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Instant;

use chrono::Utc;
use rapport_events::{StateEvent, factory};
use rapport_state::{DispatchOutcome, StateStore, panic_message};
use rapport_types::{AgentId, TransactionId, TurnRole};
use serde_json::Value;

use crate::StreamError;
use crate::frames::{CommitMetrics, Frame, FrameBody, FrameSink};

/// Where a [`StreamTransaction`] is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Created, not yet started.
    Idle,
    /// Accumulating output.
    Started,
    /// Changes applied; terminal.
    Committed,
    /// Changes discarded; terminal.
    Aborted,
}

impl core::fmt::Display for Phase {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Started => "started",
            Self::Committed => "committed",
            Self::Aborted => "aborted",
        })
    }
}

/// A single streaming interaction against one agent's store.
pub struct StreamTransaction {
    store: StateStore,
    agent_id: AgentId,
    transaction_id: TransactionId,
    phase: Phase,
    sink: Option<Box<dyn FrameSink>>,
    frames: Vec<Frame>,
    next_sequence: u64,
    started_at: Option<Instant>,
    pending: Vec<StateEvent>,
    text: String,
    text_frames: usize,
    audio_chunks: u64,
    metadata: BTreeMap<String, Value>,
}

impl core::fmt::Debug for StreamTransaction {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("StreamTransaction")
            .field("agent_id", &self.agent_id)
            .field("transaction_id", &self.transaction_id)
            .field("phase", &self.phase)
            .field("frames", &self.frames.len())
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

impl StreamTransaction {
    /// Create an idle transaction against `store` with a fresh id.
    pub fn new(store: StateStore) -> Self {
        Self::with_id(store, TransactionId::generate())
    }

    /// Create an idle transaction with a caller-chosen id.
    pub fn with_id(store: StateStore, transaction_id: TransactionId) -> Self {
        let agent_id = store.agent_id().clone();
        Self {
            store,
            agent_id,
            transaction_id,
            phase: Phase::Idle,
            sink: None,
            frames: Vec::new(),
            next_sequence: 0,
            started_at: None,
            pending: Vec::new(),
            text: String::new(),
            text_frames: 0,
            audio_chunks: 0,
            metadata: BTreeMap::new(),
        }
    }

    /// Deliver every emitted frame to `sink` as well as recording it.
    #[must_use]
    pub fn with_sink(mut self, sink: impl FrameSink + 'static) -> Self {
        self.sink = Some(Box::new(sink));
        self
    }

    /// The transaction id used in the store.
    pub const fn transaction_id(&self) -> &TransactionId {
        &self.transaction_id
    }

    /// The agent this interaction targets.
    pub const fn agent_id(&self) -> &AgentId {
        &self.agent_id
    }

    /// Current lifecycle phase.
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// Whether output may still be added.
    pub fn is_active(&self) -> bool {
        self.phase == Phase::Started
    }

    /// Text accumulated so far.
    pub fn final_text(&self) -> &str {
        &self.text
    }

    /// Every frame emitted so far, in order.
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// Number of state events queued for commit.
    pub fn pending_events(&self) -> usize {
        self.pending.len()
    }

    /// Open the store transaction and emit the start frame.
    ///
    /// # Errors
    ///
    /// [`StreamError::AlreadyStarted`] if called twice,
    /// [`StreamError::TransactionInUse`] if the store already has a
    /// transaction open under this id.
    pub fn start(&mut self, player_input: &str) -> Result<Frame, StreamError> {
        if self.phase != Phase::Idle {
            return Err(StreamError::AlreadyStarted(self.phase));
        }
        let begin = factory::transaction_begin(&self.agent_id, &self.transaction_id)
            .with_source("stream");
        let opened = self.store.atomically(|store| {
            if store.has_active_transaction(&self.transaction_id) {
                return false;
            }
            matches!(store.dispatch_detailed(begin), DispatchOutcome::Began(_))
        });
        if !opened {
            return Err(StreamError::TransactionInUse(self.transaction_id.clone()));
        }

        self.phase = Phase::Started;
        self.started_at = Some(Instant::now());
        let user_turn = self.buffered(factory::turn_add(
            &self.agent_id,
            TurnRole::User,
            player_input,
        ));
        self.pending.push(user_turn);
        tracing::debug!(
            agent_id = %self.agent_id,
            transaction_id = %self.transaction_id,
            "stream transaction started"
        );
        Ok(self.emit(FrameBody::Start {
            player_input: player_input.to_owned(),
        }))
    }

    /// Append a text fragment.
    ///
    /// # Errors
    ///
    /// [`StreamError`] if the transaction is not active.
    pub fn add_text(&mut self, delta: &str, is_final: bool) -> Result<Frame, StreamError> {
        self.ensure_active()?;
        self.text.push_str(delta);
        self.text_frames = self.text_frames.saturating_add(1);
        Ok(self.emit(FrameBody::Text {
            delta: delta.to_owned(),
            is_final,
        }))
    }

    /// Append an audio chunk.
    ///
    /// # Errors
    ///
    /// [`StreamError`] if the transaction is not active.
    pub fn add_audio(&mut self, data: Vec<u8>, sample_rate: u32) -> Result<Frame, StreamError> {
        self.ensure_active()?;
        let chunk_id = self.audio_chunks;
        self.audio_chunks = self.audio_chunks.saturating_add(1);
        Ok(self.emit(FrameBody::Audio {
            chunk_id,
            sample_rate,
            byte_len: data.len(),
            data,
        }))
    }

    /// Record an annotation; it is reported in the commit metrics.
    ///
    /// # Errors
    ///
    /// [`StreamError`] if the transaction is not active.
    pub fn add_metadata(
        &mut self,
        key: &str,
        value: impl Into<Value>,
    ) -> Result<Frame, StreamError> {
        self.ensure_active()?;
        let value = value.into();
        self.metadata.insert(key.to_owned(), value.clone());
        Ok(self.emit(FrameBody::Metadata {
            key: key.to_owned(),
            value,
        }))
    }

    /// Queue an affinity change to apply on commit.
    ///
    /// # Errors
    ///
    /// [`StreamError`] if the transaction is not active.
    pub fn queue_affinity_change(&mut self, delta: f64, reason: &str) -> Result<(), StreamError> {
        self.ensure_active()?;
        let event = self.buffered(factory::affinity_delta(&self.agent_id, delta, reason));
        self.pending.push(event);
        Ok(())
    }

    /// Queue a mood change to apply on commit.
    ///
    /// # Errors
    ///
    /// [`StreamError`] if the transaction is not active.
    pub fn queue_mood_change(&mut self, mood: &str) -> Result<(), StreamError> {
        self.ensure_active()?;
        let event = self.buffered(factory::mood_set(&self.agent_id, mood));
        self.pending.push(event);
        Ok(())
    }

    /// Queue a fact to remember on commit.
    ///
    /// # Errors
    ///
    /// [`StreamError`] if the transaction is not active.
    pub fn queue_fact(
        &mut self,
        text: &str,
        tags: &[&str],
        salience: f64,
    ) -> Result<(), StreamError> {
        self.ensure_active()?;
        let event = self.buffered(factory::fact_add(&self.agent_id, text, tags, salience));
        self.pending.push(event);
        Ok(())
    }

    /// Queue an arbitrary event to apply on commit.
    ///
    /// # Errors
    ///
    /// [`StreamError`] if the transaction is not active, or
    /// [`StreamError::ControlEvent`] for begin, commit, and abort events.
    pub fn queue_event(&mut self, event: StateEvent) -> Result<(), StreamError> {
        self.ensure_active()?;
        if event.event_type().is_transaction_control() {
            return Err(StreamError::ControlEvent(event.event_type()));
        }
        let event = self.buffered(event);
        self.pending.push(event);
        Ok(())
    }

    /// Apply every queued change plus the assistant turn, atomically.
    ///
    /// # Errors
    ///
    /// [`StreamError`] if the transaction is not active,
    /// [`StreamError::TransactionLost`] if the store transaction was closed
    /// by someone else, or [`StreamError::CommitRejected`] if the store
    /// refused the commit. In the latter two cases the transaction ends
    /// aborted.
    pub fn commit(&mut self) -> Result<Frame, StreamError> {
        self.ensure_active()?;
        let final_output = self.text.clone();
        let final_turn = self.buffered(factory::turn_add(
            &self.agent_id,
            TurnRole::Assistant,
            &final_output,
        ));
        let mut events = core::mem::take(&mut self.pending);
        events.push(final_turn);
        let commit = factory::transaction_commit(&self.agent_id, &self.transaction_id)
            .with_source("stream");

        let outcome = self.store.atomically(|store| {
            if !store.has_active_transaction(&self.transaction_id) {
                return None;
            }
            for event in events {
                store.dispatch(event);
            }
            Some(store.dispatch_detailed(commit))
        });

        let applied = match outcome {
            Some(DispatchOutcome::Committed { applied }) => applied,
            Some(DispatchOutcome::Rejected(rejection)) => {
                self.finish_aborted("commit rejected by store", "COMMIT_REJECTED");
                return Err(StreamError::CommitRejected(rejection));
            }
            Some(other) => {
                tracing::error!(
                    agent_id = %self.agent_id,
                    transaction_id = %self.transaction_id,
                    outcome = ?other,
                    "unexpected commit outcome"
                );
                self.finish_aborted("transaction lost", "TRANSACTION_LOST");
                return Err(StreamError::TransactionLost(self.transaction_id.clone()));
            }
            None => {
                self.finish_aborted("transaction lost", "TRANSACTION_LOST");
                return Err(StreamError::TransactionLost(self.transaction_id.clone()));
            }
        };

        self.phase = Phase::Committed;
        let latency_ms = self.elapsed_ms();
        let metrics = CommitMetrics {
            latency_ms,
            text_frames: self.text_frames,
            audio_chunks: usize::try_from(self.audio_chunks).unwrap_or(usize::MAX),
            events_applied: applied.len(),
            metadata: core::mem::take(&mut self.metadata),
        };
        tracing::info!(
            agent_id = %self.agent_id,
            transaction_id = %self.transaction_id,
            chars = final_output.chars().count(),
            events = applied.len(),
            latency_ms,
            "stream transaction committed"
        );
        Ok(self.emit(FrameBody::Commit {
            final_output,
            metrics,
            applied_events: applied,
        }))
    }

    /// Discard every queued change and end the interaction.
    ///
    /// # Errors
    ///
    /// [`StreamError`] if the transaction is not active.
    pub fn abort(&mut self, reason: &str, error_code: Option<&str>) -> Result<Frame, StreamError> {
        self.ensure_active()?;
        let abort = factory::transaction_abort(&self.agent_id, &self.transaction_id, reason)
            .with_source("stream");
        self.store.dispatch(abort);
        self.phase = Phase::Aborted;
        tracing::warn!(
            agent_id = %self.agent_id,
            transaction_id = %self.transaction_id,
            reason,
            error_code = error_code.unwrap_or(""),
            discarded = self.pending.len(),
            "stream transaction aborted"
        );
        self.pending.clear();
        Ok(self.emit(FrameBody::Abort {
            reason: reason.to_owned(),
            error_code: error_code.map(str::to_owned),
        }))
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn ensure_active(&self) -> Result<(), StreamError> {
        match self.phase {
            Phase::Started => Ok(()),
            Phase::Idle => Err(StreamError::NotStarted),
            Phase::Committed | Phase::Aborted => Err(StreamError::Finished(self.phase)),
        }
    }

    fn buffered(&self, event: StateEvent) -> StateEvent {
        event
            .in_transaction(self.transaction_id.clone())
            .with_source("stream")
    }

    /// Close out after the store refused or lost the transaction.
    fn finish_aborted(&mut self, reason: &str, code: &str) {
        let abort = factory::transaction_abort(&self.agent_id, &self.transaction_id, reason)
            .with_source("stream");
        // Harmless if the store already closed it; it logs and moves on.
        self.store.dispatch(abort);
        self.phase = Phase::Aborted;
        self.pending.clear();
        self.emit(FrameBody::Abort {
            reason: reason.to_owned(),
            error_code: Some(code.to_owned()),
        });
    }

    fn elapsed_ms(&self) -> u64 {
        self.started_at.map_or(0, |t| {
            u64::try_from(t.elapsed().as_millis()).unwrap_or(u64::MAX)
        })
    }

    fn emit(&mut self, body: FrameBody) -> Frame {
        self.next_sequence = self.next_sequence.saturating_add(1);
        let frame = Frame {
            transaction_id: self.transaction_id.clone(),
            agent_id: self.agent_id.clone(),
            sequence: self.next_sequence,
            timestamp: Utc::now(),
            body,
        };
        tracing::trace!(
            transaction_id = %self.transaction_id,
            sequence = frame.sequence,
            frame_type = frame.frame_type(),
            "frame emitted"
        );
        if let Some(sink) = self.sink.as_mut() {
            let delivered = catch_unwind(AssertUnwindSafe(|| sink.deliver(&frame)));
            if let Err(payload) = delivered {
                tracing::warn!(
                    transaction_id = %self.transaction_id,
                    sequence = frame.sequence,
                    panic = %panic_message(payload.as_ref()),
                    "frame sink panicked"
                );
            }
        }
        self.frames.push(frame.clone());
        frame
    }
}

impl Drop for StreamTransaction {
    fn drop(&mut self) {
        if self.phase == Phase::Started {
            tracing::warn!(
                agent_id = %self.agent_id,
                transaction_id = %self.transaction_id,
                "stream transaction dropped while active, aborting"
            );
            let abort =
                factory::transaction_abort(&self.agent_id, &self.transaction_id, "dropped")
                    .with_source("stream");
            self.store.dispatch(abort);
        }
    }
}

#[cfg(test)]
mod tests {
    use rapport_types::AgentState;

    use super::*;

    fn store() -> StateStore {
        StateStore::new(
            AgentId::from("lydia"),
            AgentState::new("Lydia", "Housecarl").with_affinity(0.5),
        )
    }

    #[test]
    fn operations_before_start_fail() {
        let mut txn = StreamTransaction::new(store());
        assert!(matches!(txn.add_text("x", false), Err(StreamError::NotStarted)));
        assert!(matches!(txn.commit(), Err(StreamError::NotStarted)));
        assert!(txn.frames().is_empty());
    }

    #[test]
    fn start_twice_fails() {
        let mut txn = StreamTransaction::new(store());
        assert!(txn.start("hello").is_ok());
        assert!(matches!(
            txn.start("again"),
            Err(StreamError::AlreadyStarted(Phase::Started))
        ));
    }

    #[test]
    fn frames_are_numbered_from_one() {
        let mut txn = StreamTransaction::new(store());
        let _ = txn.start("hello");
        let _ = txn.add_text("Hi ", false);
        let _ = txn.add_audio(vec![0; 8], 16_000);
        let _ = txn.add_text("there", true);
        let _ = txn.commit();
        let sequences: Vec<u64> = txn.frames().iter().map(|f| f.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3, 4, 5]);
        assert!(txn.frames().last().is_some_and(Frame::is_terminal));
    }

    #[test]
    fn dropping_an_active_transaction_closes_it() {
        let store = store();
        let id = {
            let mut txn = StreamTransaction::new(store.clone());
            let _ = txn.start("hello");
            txn.transaction_id().clone()
        };
        assert!(!store.has_active_transaction(&id));
    }

    #[test]
    fn custom_id_in_use_is_refused() {
        let store = store();
        let id = TransactionId::from("shared");
        let mut first = StreamTransaction::with_id(store.clone(), id.clone());
        assert!(first.start("a").is_ok());
        let mut second = StreamTransaction::with_id(store, id);
        assert!(matches!(
            second.start("b"),
            Err(StreamError::TransactionInUse(_))
        ));
        assert_eq!(second.phase(), Phase::Idle);
    }
}
