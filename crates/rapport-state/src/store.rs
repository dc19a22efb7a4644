//! The per-agent state store.
//!
//! A [`StateStore`] is the sole writer of one agent's state. Every dispatch
//! runs under a single reentrant lock that guards the live state, the event
//! log, the transaction table, the subscriber list, and the snapshot cache
//! together, so all dispatches to one store form one total order.
//!
//! # Routing
//!
//! Each dispatched event is stamped with the next sequence number and
//! appended to the bounded event log, then routed:
//!
//! 1. `TransactionBegin` opens a transaction (re-begin is a no-op).
//! 2. `TransactionCommit` replays the buffered events through the reducer.
//! 3. `TransactionAbort` discards the buffer; the reducer never sees it.
//! 4. An event naming an open transaction is buffered.
//! 5. Anything else is reduced immediately.
//!
//! A commit is all-or-nothing: if the reducer panics on any buffered event,
//! none of the transaction's events are applied.
//!
//! Subscribers run after the mutation, still under the reentrant lock, so
//! they are ordered relative to other dispatches and may read the store.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use parking_lot::ReentrantMutex;
use rapport_events::{EventType, StateEvent};
use rapport_types::{AgentId, AgentState, DialogueTurn, Fact, TransactionId, TurnRole};

use crate::config::StoreConfig;
use crate::error::{DispatchRejection, ReducerFailure};
use crate::reducer::{Reduce, Reducer, Reduction};

/// Default number of dialogue turns returned by [`StateStore::get_history`].
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

type Callback = Arc<dyn Fn(&AgentState, &StateEvent) + Send + Sync>;

// ---------------------------------------------------------------------------
// Public value types
// ---------------------------------------------------------------------------

/// An immutable view of an agent's state and facts.
///
/// Holds only shared references to values the store has already replaced
/// or will replace wholesale, so it stays valid and unchanged after the
/// store moves on.
#[derive(Debug, Clone)]
pub struct StateView {
    state: Arc<AgentState>,
    facts: Arc<[Fact]>,
}

impl StateView {
    /// The agent state.
    pub fn state(&self) -> &AgentState {
        &self.state
    }

    /// The fact list.
    pub fn facts(&self) -> &[Fact] {
        &self.facts
    }

    /// Whether two views share the same underlying state value.
    pub fn same_state(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}

impl core::ops::Deref for StateView {
    type Target = AgentState;

    fn deref(&self) -> &AgentState {
        &self.state
    }
}

/// What a dispatch did.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// The event was reduced into live state.
    Applied(StateEvent),
    /// The event was appended to an open transaction.
    Buffered,
    /// A transaction is open under this id (newly or already).
    Began(TransactionId),
    /// A transaction was committed; its events were applied in order.
    Committed {
        /// The replayed events, sequence-stamped, in application order.
        applied: Vec<StateEvent>,
    },
    /// A transaction was discarded.
    Aborted {
        /// Number of buffered events dropped.
        discarded: usize,
    },
    /// Nothing happened.
    Rejected(DispatchRejection),
}

impl DispatchOutcome {
    /// Whether live state was (potentially) changed.
    pub const fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_) | Self::Committed { .. })
    }
}

/// Handle returned by [`StateStore::subscribe`].
///
/// Dropping the handle does not unsubscribe; call
/// [`Subscription::unsubscribe`].
#[derive(Debug)]
pub struct Subscription {
    store: Weak<Shared>,
    id: u64,
}

impl Subscription {
    /// Remove the callback. Returns `false` if it was already removed or
    /// the store no longer exists.
    pub fn unsubscribe(self) -> bool {
        let Some(shared) = self.store.upgrade() else {
            return false;
        };
        let guard = shared.inner.lock();
        let mut inner = guard.borrow_mut();
        let before = inner.subscribers.len();
        inner.subscribers.retain(|(id, _)| *id != self.id);
        inner.subscribers.len() != before
    }
}

// ---------------------------------------------------------------------------
// Internals
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Transaction {
    agent_id: AgentId,
    events: Vec<StateEvent>,
    started_at: DateTime<Utc>,
}

struct StoreInner {
    state: Arc<AgentState>,
    facts: Arc<[Fact]>,
    sequence: u64,
    event_log: VecDeque<StateEvent>,
    history: VecDeque<DialogueTurn>,
    log_capacity: usize,
    transactions: HashMap<TransactionId, Transaction>,
    subscribers: Vec<(u64, Callback)>,
    next_subscriber_id: u64,
    /// Cached view; `None` whenever a reduction changed state or facts.
    snapshot: Option<StateView>,
}

impl StoreInner {
    fn stamp(&mut self, event: StateEvent) -> StateEvent {
        self.sequence = self.sequence.saturating_add(1);
        let event = event.sequenced(self.sequence);
        push_bounded(&mut self.event_log, event.clone(), self.log_capacity);
        event
    }

    fn install(&mut self, state: Arc<AgentState>, facts: Arc<[Fact]>) {
        if !Arc::ptr_eq(&state, &self.state) || !Arc::ptr_eq(&facts, &self.facts) {
            self.state = state;
            self.facts = facts;
            self.snapshot = None;
        }
    }

    fn record_turn(&mut self, event: &StateEvent) {
        if event.event_type() != EventType::TurnAdd {
            return;
        }
        let payload = event.payload();
        let role = payload.text("role").ok().flatten().and_then(TurnRole::parse);
        let content = payload.text("content").ok().flatten();
        if let (Some(role), Some(content)) = (role, content) {
            let turn = DialogueTurn {
                role,
                content: content.to_owned(),
                timestamp: event.timestamp(),
            };
            push_bounded(&mut self.history, turn, self.log_capacity);
        }
    }
}

fn push_bounded<T>(ring: &mut VecDeque<T>, item: T, capacity: usize) {
    if capacity == 0 {
        return;
    }
    while ring.len() >= capacity {
        ring.pop_front();
    }
    ring.push_back(item);
}

struct Shared {
    agent_id: AgentId,
    reducer: Arc<dyn Reduce>,
    inner: ReentrantMutex<RefCell<StoreInner>>,
}

/// A subscriber notification owed after the borrow is released.
type Notice = (Arc<AgentState>, StateEvent);

// ---------------------------------------------------------------------------
// StateStore
// ---------------------------------------------------------------------------

/// Sole writer of one agent's conversational state.
///
/// Cheap to clone; clones share the same store.
#[derive(Clone)]
pub struct StateStore {
    shared: Arc<Shared>,
}

impl core::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("StateStore")
            .field("agent_id", &self.shared.agent_id)
            .finish_non_exhaustive()
    }
}

impl StateStore {
    /// Create a store with default configuration and the standard reducer.
    pub fn new(agent_id: AgentId, state: AgentState) -> Self {
        Self::builder(agent_id, state).build()
    }

    /// Start building a store.
    pub fn builder(agent_id: AgentId, state: AgentState) -> StateStoreBuilder {
        StateStoreBuilder {
            agent_id,
            state,
            facts: Vec::new(),
            config: StoreConfig::default(),
            reducer: None,
        }
    }

    /// The agent this store belongs to.
    pub fn agent_id(&self) -> &AgentId {
        &self.shared.agent_id
    }

    /// Dispatch an event. Returns `true` if live state was (potentially)
    /// changed: an immediate event was reduced or a transaction committed.
    pub fn dispatch(&self, event: StateEvent) -> bool {
        self.dispatch_detailed(event).is_applied()
    }

    /// Dispatch an event and report exactly what happened.
    pub fn dispatch_detailed(&self, event: StateEvent) -> DispatchOutcome {
        let guard = self.shared.inner.lock();
        let (outcome, notices, subscribers) = {
            let mut inner = guard.borrow_mut();
            if event.agent_id() != &self.shared.agent_id {
                tracing::warn!(
                    agent_id = %self.shared.agent_id,
                    event_agent_id = %event.agent_id(),
                    event_type = %event.event_type(),
                    "event addressed to a different agent"
                );
            }
            let event = inner.stamp(event);
            let mut notices = Vec::new();
            let outcome = self.route(&mut inner, event, &mut notices);
            let subscribers: Vec<Callback> = if notices.is_empty() {
                Vec::new()
            } else {
                inner
                    .subscribers
                    .iter()
                    .map(|(_, callback)| Arc::clone(callback))
                    .collect()
            };
            (outcome, notices, subscribers)
        };
        self.notify(&subscribers, &notices);
        drop(guard);
        outcome
    }

    /// Dispatch several events under one lock acquisition. Returns how many
    /// were applied.
    pub fn dispatch_batch<I>(&self, events: I) -> usize
    where
        I: IntoIterator<Item = StateEvent>,
    {
        self.atomically(|store| {
            events
                .into_iter()
                .map(|event| store.dispatch(event))
                .filter(|applied| *applied)
                .count()
        })
    }

    /// Run `f` while holding the store lock.
    ///
    /// Other threads cannot dispatch or read until `f` returns; calls made
    /// on this store from inside `f` re-enter the lock.
    pub fn atomically<R>(&self, f: impl FnOnce(&Self) -> R) -> R {
        let _guard = self.shared.inner.lock();
        f(self)
    }

    /// An immutable view of current state and facts.
    pub fn get_snapshot(&self) -> StateView {
        let guard = self.shared.inner.lock();
        let mut inner = guard.borrow_mut();
        if let Some(view) = &inner.snapshot {
            return view.clone();
        }
        let view = StateView {
            state: Arc::clone(&inner.state),
            facts: Arc::clone(&inner.facts),
        };
        inner.snapshot = Some(view.clone());
        view
    }

    /// An immutable view of current facts.
    pub fn get_facts_snapshot(&self) -> Arc<[Fact]> {
        self.get_snapshot().facts
    }

    /// Register a callback invoked with `(new_state, event)` once per
    /// applied event. Panics inside the callback are caught and logged.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&AgentState, &StateEvent) + Send + Sync + 'static,
    {
        let guard = self.shared.inner.lock();
        let mut inner = guard.borrow_mut();
        let id = inner.next_subscriber_id;
        inner.next_subscriber_id = id.saturating_add(1);
        inner.subscribers.push((id, Arc::new(callback)));
        Subscription {
            store: Arc::downgrade(&self.shared),
            id,
        }
    }

    /// The last `limit` logged events (all when `None`), oldest first.
    pub fn get_event_log(&self, limit: Option<usize>) -> Vec<StateEvent> {
        let guard = self.shared.inner.lock();
        let inner = guard.borrow();
        let skip = limit.map_or(0, |n| inner.event_log.len().saturating_sub(n));
        inner.event_log.iter().skip(skip).cloned().collect()
    }

    /// The last `limit` applied dialogue turns, oldest first.
    ///
    /// Turns buffered in a transaction appear only once it commits.
    pub fn get_history(&self, limit: usize) -> Vec<DialogueTurn> {
        let guard = self.shared.inner.lock();
        let inner = guard.borrow();
        let skip = inner.history.len().saturating_sub(limit);
        inner.history.iter().skip(skip).cloned().collect()
    }

    /// Whether a transaction is open under `transaction_id`.
    pub fn has_active_transaction(&self, transaction_id: &TransactionId) -> bool {
        let guard = self.shared.inner.lock();
        let inner = guard.borrow();
        inner.transactions.contains_key(transaction_id)
    }

    /// Number of events buffered under `transaction_id` (zero if not open).
    pub fn pending_event_count(&self, transaction_id: &TransactionId) -> usize {
        let guard = self.shared.inner.lock();
        let inner = guard.borrow();
        inner
            .transactions
            .get(transaction_id)
            .map_or(0, |txn| txn.events.len())
    }

    /// Sequence number of the most recent dispatch (zero before any).
    pub fn last_sequence(&self) -> u64 {
        let guard = self.shared.inner.lock();
        let inner = guard.borrow();
        inner.sequence
    }

    // -----------------------------------------------------------------------
    // Routing
    // -----------------------------------------------------------------------

    fn route(
        &self,
        inner: &mut StoreInner,
        event: StateEvent,
        notices: &mut Vec<Notice>,
    ) -> DispatchOutcome {
        match event.event_type() {
            EventType::TransactionBegin => self.begin(inner, &event),
            EventType::TransactionCommit => self.commit(inner, &event, notices),
            EventType::TransactionAbort => self.abort(inner, &event),
            _ => {
                if let Some(txn) = event
                    .transaction_id()
                    .and_then(|id| inner.transactions.get_mut(id))
                {
                    txn.events.push(event);
                    return DispatchOutcome::Buffered;
                }
                self.apply_now(inner, event, notices)
            }
        }
    }

    fn begin(&self, inner: &mut StoreInner, event: &StateEvent) -> DispatchOutcome {
        let transaction_id = event
            .transaction_id()
            .cloned()
            .unwrap_or_else(TransactionId::generate);
        if inner.transactions.contains_key(&transaction_id) {
            tracing::debug!(
                agent_id = %self.shared.agent_id,
                transaction_id = %transaction_id,
                "transaction already open"
            );
        } else {
            inner.transactions.insert(
                transaction_id.clone(),
                Transaction {
                    agent_id: event.agent_id().clone(),
                    events: Vec::new(),
                    started_at: event.timestamp(),
                },
            );
            tracing::debug!(
                agent_id = %self.shared.agent_id,
                transaction_id = %transaction_id,
                sequence = event.sequence(),
                "transaction opened"
            );
        }
        DispatchOutcome::Began(transaction_id)
    }

    fn commit(
        &self,
        inner: &mut StoreInner,
        event: &StateEvent,
        notices: &mut Vec<Notice>,
    ) -> DispatchOutcome {
        let (transaction_id, txn) = match self.take_transaction(inner, event) {
            Ok(taken) => taken,
            Err(rejection) => return DispatchOutcome::Rejected(rejection),
        };

        let mut state = Arc::clone(&inner.state);
        let mut facts = Arc::clone(&inner.facts);
        let mut staged = Vec::with_capacity(txn.events.len());
        let mut applied = Vec::with_capacity(txn.events.len());
        for buffered in txn.events {
            match self.reduce_guarded(&state, &buffered, &facts) {
                Ok(reduction) => {
                    self.log_reduction(&reduction, &buffered);
                    state = reduction.state;
                    facts = reduction.facts;
                    staged.push(Arc::clone(&state));
                    applied.push(buffered);
                }
                Err(failure) => {
                    tracing::error!(
                        agent_id = %self.shared.agent_id,
                        transaction_id = %transaction_id,
                        error = %failure,
                        "commit abandoned, no buffered events applied"
                    );
                    return DispatchOutcome::Rejected(failure.into());
                }
            }
        }

        inner.install(state, facts);
        for (after, event) in staged.into_iter().zip(&applied) {
            inner.record_turn(event);
            notices.push((after, event.clone()));
        }
        let elapsed_ms = event
            .timestamp()
            .signed_duration_since(txn.started_at)
            .num_milliseconds();
        tracing::debug!(
            agent_id = %self.shared.agent_id,
            transaction_id = %transaction_id,
            owner = %txn.agent_id,
            events = applied.len(),
            elapsed_ms,
            "transaction committed"
        );
        DispatchOutcome::Committed { applied }
    }

    fn abort(&self, inner: &mut StoreInner, event: &StateEvent) -> DispatchOutcome {
        match self.take_transaction(inner, event) {
            Ok((transaction_id, txn)) => {
                let reason = event.payload().text("reason").ok().flatten().unwrap_or("");
                tracing::debug!(
                    agent_id = %self.shared.agent_id,
                    transaction_id = %transaction_id,
                    discarded = txn.events.len(),
                    reason,
                    "transaction aborted"
                );
                DispatchOutcome::Aborted {
                    discarded: txn.events.len(),
                }
            }
            Err(rejection) => DispatchOutcome::Rejected(rejection),
        }
    }

    fn take_transaction(
        &self,
        inner: &mut StoreInner,
        event: &StateEvent,
    ) -> Result<(TransactionId, Transaction), DispatchRejection> {
        let Some(transaction_id) = event.transaction_id() else {
            tracing::warn!(
                agent_id = %self.shared.agent_id,
                event_type = %event.event_type(),
                "transaction control event without a transaction id"
            );
            return Err(DispatchRejection::MissingTransactionId);
        };
        inner
            .transactions
            .remove(transaction_id)
            .map(|txn| (transaction_id.clone(), txn))
            .ok_or_else(|| {
                tracing::warn!(
                    agent_id = %self.shared.agent_id,
                    transaction_id = %transaction_id,
                    event_type = %event.event_type(),
                    "no open transaction"
                );
                DispatchRejection::UnknownTransaction(transaction_id.clone())
            })
    }

    fn apply_now(
        &self,
        inner: &mut StoreInner,
        event: StateEvent,
        notices: &mut Vec<Notice>,
    ) -> DispatchOutcome {
        match self.reduce_guarded(&inner.state, &event, &inner.facts) {
            Ok(reduction) => {
                self.log_reduction(&reduction, &event);
                inner.install(reduction.state, reduction.facts);
                inner.record_turn(&event);
                notices.push((Arc::clone(&inner.state), event.clone()));
                DispatchOutcome::Applied(event)
            }
            Err(failure) => {
                tracing::error!(
                    agent_id = %self.shared.agent_id,
                    error = %failure,
                    "reducer failed, event not applied"
                );
                DispatchOutcome::Rejected(failure.into())
            }
        }
    }

    fn reduce_guarded(
        &self,
        state: &Arc<AgentState>,
        event: &StateEvent,
        facts: &Arc<[Fact]>,
    ) -> Result<Reduction, ReducerFailure> {
        let reducer = &self.shared.reducer;
        catch_unwind(AssertUnwindSafe(|| reducer.reduce(state, event, facts))).map_err(
            |payload| ReducerFailure {
                sequence: event.sequence(),
                event_type: event.event_type(),
                message: panic_message(payload.as_ref()),
            },
        )
    }

    fn log_reduction(&self, reduction: &Reduction, event: &StateEvent) {
        if let Some(diagnostic) = &reduction.diagnostic {
            tracing::warn!(
                agent_id = %self.shared.agent_id,
                sequence = event.sequence(),
                %diagnostic,
                "event had no effect"
            );
        }
        if let Some(text) = &reduction.emitted_fact {
            tracing::debug!(
                agent_id = %self.shared.agent_id,
                sequence = event.sequence(),
                fact = %text,
                "fact admitted"
            );
        }
    }

    fn notify(&self, subscribers: &[Callback], notices: &[Notice]) {
        for (state, event) in notices {
            for callback in subscribers {
                let outcome = catch_unwind(AssertUnwindSafe(|| callback(state, event)));
                if let Err(payload) = outcome {
                    tracing::warn!(
                        agent_id = %self.shared.agent_id,
                        sequence = event.sequence(),
                        panic = %panic_message(payload.as_ref()),
                        "subscriber panicked"
                    );
                }
            }
        }
    }
}

/// Best-effort text of a caught panic payload.
pub fn panic_message(payload: &(dyn core::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| String::from("non-string panic payload"))
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for [`StateStore`].
pub struct StateStoreBuilder {
    agent_id: AgentId,
    state: AgentState,
    facts: Vec<Fact>,
    config: StoreConfig,
    reducer: Option<Arc<dyn Reduce>>,
}

impl StateStoreBuilder {
    /// Seed the fact list.
    #[must_use]
    pub fn facts(mut self, facts: Vec<Fact>) -> Self {
        self.facts = facts;
        self
    }

    /// Use the given store settings.
    #[must_use]
    pub fn config(mut self, config: &StoreConfig) -> Self {
        self.config = config.clone();
        self
    }

    /// Use an alternative reducer.
    #[must_use]
    pub fn reducer(mut self, reducer: Arc<dyn Reduce>) -> Self {
        self.reducer = Some(reducer);
        self
    }

    /// Finish building.
    pub fn build(self) -> StateStore {
        let reducer = self
            .reducer
            .unwrap_or_else(|| Arc::new(Reducer::default()));
        let inner = StoreInner {
            state: Arc::new(self.state),
            facts: Arc::from(self.facts),
            sequence: 0,
            event_log: VecDeque::new(),
            history: VecDeque::new(),
            log_capacity: self.config.event_log_capacity,
            transactions: HashMap::new(),
            subscribers: Vec::new(),
            next_subscriber_id: 0,
            snapshot: None,
        };
        StateStore {
            shared: Arc::new(Shared {
                agent_id: self.agent_id,
                reducer,
                inner: ReentrantMutex::new(RefCell::new(inner)),
            }),
        }
    }
}
