//! The pure state reducer.
//!
//! `reduce(state, event, facts)` computes the next state and fact list from
//! the current ones. It performs no I/O, reads no clock, and never mutates
//! its inputs: unchanged halves are returned as the same `Arc`, so callers
//! can detect a no-op with [`Arc::ptr_eq`].
//!
//! Event types without a handler, and events whose payload fails
//! validation, return the inputs unchanged together with a [`Diagnostic`].
//! Nothing here is fatal.

use std::sync::Arc;

use rapport_events::{EventType, Payload, PayloadError, StateEvent};
use rapport_types::{AgentState, DEFAULT_MOOD, Fact, PlayerEventKind, clamp_affinity};
use serde_json::{Map, Value};

use crate::config::AdmissionConfig;
use crate::error::{Diagnostic, Rejection};

/// Salience given to a fact when the event does not specify one.
pub const DEFAULT_FACT_SALIENCE: f64 = 0.5;

/// Salience lost per decay event when the event does not specify a rate.
pub const DEFAULT_DECAY_RATE: f64 = 0.05;

/// Floor below which decay never pushes a fact.
pub const DEFAULT_MIN_SALIENCE: f64 = 0.1;

/// Salience gained per reinforcement when the event does not specify one.
pub const DEFAULT_REINFORCE_BOOST: f64 = 0.1;

/// Strength of a player interaction when the event does not specify one.
pub const DEFAULT_PLAYER_EVENT_STRENGTH: f64 = 0.5;

const FACT_TIME_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Result of reducing one event.
#[derive(Debug, Clone)]
pub struct Reduction {
    /// The next state (same `Arc` as the input when unchanged).
    pub state: Arc<AgentState>,
    /// The next fact list (same `Arc` as the input when unchanged).
    pub facts: Arc<[Fact]>,
    /// Text of a fact admitted by this event, if any.
    pub emitted_fact: Option<String>,
    /// Why the event was not applied, if it was not.
    pub diagnostic: Option<Diagnostic>,
}

impl Reduction {
    /// A reduction that changes nothing.
    pub fn unchanged(state: &Arc<AgentState>, facts: &Arc<[Fact]>) -> Self {
        Self {
            state: Arc::clone(state),
            facts: Arc::clone(facts),
            emitted_fact: None,
            diagnostic: None,
        }
    }

    /// Whether this reduction returned exactly the given inputs.
    pub fn is_identity(&self, state: &Arc<AgentState>, facts: &Arc<[Fact]>) -> bool {
        Arc::ptr_eq(&self.state, state) && Arc::ptr_eq(&self.facts, facts)
    }
}

/// A state transition function.
///
/// Implemented by [`Reducer`]; stores accept any implementation so the
/// transition logic can be swapped (for example, in failure tests).
pub trait Reduce: Send + Sync {
    /// Apply `event` to `state` and `facts`.
    fn reduce(&self, state: &Arc<AgentState>, event: &StateEvent, facts: &Arc<[Fact]>)
    -> Reduction;
}

/// The standard reducer, parameterized by its fact admission policy.
#[derive(Debug, Clone, Default)]
pub struct Reducer {
    admission: AdmissionConfig,
}

impl Reducer {
    /// Create a reducer with the given admission policy.
    pub const fn new(admission: AdmissionConfig) -> Self {
        Self { admission }
    }

    /// The admission policy applied to fact insertion.
    pub const fn admission(&self) -> &AdmissionConfig {
        &self.admission
    }

    fn admit(&self, text: &str) -> Result<(), Rejection> {
        let len = text.chars().count();
        if len > self.admission.max_fact_len {
            return Err(Rejection::FactTooLong {
                len,
                max: self.admission.max_fact_len,
            });
        }
        let lowered = text.to_lowercase();
        if let Some(pattern) = self
            .admission
            .forbidden_substrings
            .iter()
            .find(|pattern| lowered.contains(&pattern.to_lowercase()))
        {
            return Err(Rejection::ForbiddenContent {
                pattern: pattern.clone(),
            });
        }
        Ok(())
    }

    fn apply(
        &self,
        state: &AgentState,
        event: &StateEvent,
        facts: &[Fact],
    ) -> Result<Effect, Rejection> {
        let payload = event.payload();
        match event.event_type() {
            EventType::AffinityDelta => affinity_delta(state, payload),
            EventType::MoodSet => mood_set(state, payload),
            EventType::PlayerEvent => player_event(state, payload),
            EventType::FactAdd => self.fact_add(event, facts),
            EventType::FactRemove => fact_remove(facts, payload),
            EventType::FactDecay => fact_decay(facts, payload),
            EventType::FactReinforce => fact_reinforce(facts, payload),
            EventType::StateReset => state_reset(state, payload),
            EventType::StateLoad => state_load(state, payload),
            EventType::TurnAdd
            | EventType::TurnClear
            | EventType::StateSnapshot
            | EventType::TransactionBegin
            | EventType::TransactionCommit
            | EventType::TransactionAbort => Ok(Effect::Noop),
            EventType::RelationshipUpdate | EventType::Unknown => Ok(Effect::Unhandled),
        }
    }

    fn fact_add(&self, event: &StateEvent, facts: &[Fact]) -> Result<Effect, Rejection> {
        let payload = event.payload();
        let text = payload
            .text("text")?
            .filter(|text| !text.is_empty())
            .ok_or(Rejection::MissingField("text"))?;
        self.admit(text)?;

        let tags = payload.tags("tags")?;
        let salience = payload.number_or("salience", DEFAULT_FACT_SALIENCE)?;
        let time = event.timestamp().format(FACT_TIME_FORMAT).to_string();

        let mut next = facts.to_vec();
        next.push(Fact::new(text.to_owned(), tags, time, salience));
        Ok(Effect::Added {
            facts: next,
            text: text.to_owned(),
        })
    }
}

impl Reduce for Reducer {
    fn reduce(
        &self,
        state: &Arc<AgentState>,
        event: &StateEvent,
        facts: &Arc<[Fact]>,
    ) -> Reduction {
        let mut reduction = Reduction::unchanged(state, facts);
        match self.apply(state, event, facts) {
            Ok(Effect::Noop) => {}
            Ok(Effect::Unhandled) => {
                reduction.diagnostic = Some(Diagnostic::Unhandled(event.event_type()));
            }
            Ok(Effect::State(next)) => {
                if next != **state {
                    reduction.state = Arc::new(next);
                }
            }
            Ok(Effect::Facts(next)) => reduction.facts = Arc::from(next),
            Ok(Effect::Added { facts: next, text }) => {
                reduction.facts = Arc::from(next);
                reduction.emitted_fact = Some(text);
            }
            Err(rejection) => {
                reduction.diagnostic = Some(Diagnostic::Rejected {
                    event_type: event.event_type(),
                    rejection,
                });
            }
        }
        reduction
    }
}

/// Fold `events` over an initial state and fact list.
///
/// Produces exactly what dispatching the same events one by one into a
/// fresh store would.
pub fn replay<'a, R, I>(
    reducer: &R,
    state: Arc<AgentState>,
    facts: Arc<[Fact]>,
    events: I,
) -> (Arc<AgentState>, Arc<[Fact]>)
where
    R: Reduce + ?Sized,
    I: IntoIterator<Item = &'a StateEvent>,
{
    events
        .into_iter()
        .fold((state, facts), |(state, facts), event| {
            let reduction = reducer.reduce(&state, event, &facts);
            (reduction.state, reduction.facts)
        })
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// What a handler decided, before it is turned into a [`Reduction`].
enum Effect {
    Noop,
    Unhandled,
    State(AgentState),
    Facts(Vec<Fact>),
    Added { facts: Vec<Fact>, text: String },
}

fn affinity_delta(state: &AgentState, payload: &Payload) -> Result<Effect, Rejection> {
    let delta = payload.number_or("delta", 0.0)?;
    let mut next = state.clone();
    next.affinity = clamp_affinity(state.affinity + delta);
    Ok(Effect::State(next))
}

fn mood_set(state: &AgentState, payload: &Payload) -> Result<Effect, Rejection> {
    let mood = payload.text_or("mood", DEFAULT_MOOD)?;
    let mut next = state.clone();
    mood.clone_into(&mut next.mood);
    Ok(Effect::State(next))
}

fn player_event(state: &AgentState, payload: &Payload) -> Result<Effect, Rejection> {
    let name = payload.text_or("player_event_type", "TALK")?;
    let kind: PlayerEventKind = serde_json::from_value(Value::String(name.to_owned()))
        .ok()
        .ok_or_else(|| Rejection::UnknownPlayerEvent(name.to_owned()))?;
    let strength = payload.number_or("strength", DEFAULT_PLAYER_EVENT_STRENGTH)?;

    let mut next = state.clone();
    next.affinity = clamp_affinity(kind.affinity_weight().mul_add(strength, state.affinity));
    if let Some(mood) = kind.mood() {
        mood.clone_into(&mut next.mood);
    }
    Ok(Effect::State(next))
}

fn fact_remove(facts: &[Fact], payload: &Payload) -> Result<Effect, Rejection> {
    let Some(fragment) = payload.text("fragment")?.filter(|f| !f.is_empty()) else {
        return Ok(Effect::Noop);
    };
    if !facts.iter().any(|fact| fact.mentions(fragment)) {
        return Ok(Effect::Noop);
    }
    Ok(Effect::Facts(
        facts
            .iter()
            .filter(|fact| !fact.mentions(fragment))
            .cloned()
            .collect(),
    ))
}

fn fact_decay(facts: &[Fact], payload: &Payload) -> Result<Effect, Rejection> {
    let rate = payload.number_or("decay_rate", DEFAULT_DECAY_RATE)?;
    let floor = payload.number_or("min_salience", DEFAULT_MIN_SALIENCE)?;
    if !facts.iter().any(|fact| fact.salience > floor) {
        return Ok(Effect::Noop);
    }
    Ok(Effect::Facts(
        facts
            .iter()
            .map(|fact| {
                let mut next = fact.clone();
                if next.salience > floor {
                    next.salience = (next.salience - rate).max(floor).clamp(0.0, 1.0);
                }
                next
            })
            .collect(),
    ))
}

fn fact_reinforce(facts: &[Fact], payload: &Payload) -> Result<Effect, Rejection> {
    let Some(fragment) = payload.text("fragment")?.filter(|f| !f.is_empty()) else {
        return Ok(Effect::Noop);
    };
    let boost = payload.number_or("boost", DEFAULT_REINFORCE_BOOST)?;
    if !facts.iter().any(|fact| fact.mentions(fragment)) {
        return Ok(Effect::Noop);
    }
    Ok(Effect::Facts(
        facts
            .iter()
            .map(|fact| {
                let mut next = fact.clone();
                if next.mentions(fragment) {
                    next.salience = (next.salience + boost).clamp(0.0, 1.0);
                }
                next
            })
            .collect(),
    ))
}

fn state_reset(state: &AgentState, payload: &Payload) -> Result<Effect, Rejection> {
    let affinity = payload.number_or("affinity", 0.0)?;
    let mood = payload.text_or("mood", DEFAULT_MOOD)?;
    let mut next = state.clone();
    next.affinity = clamp_affinity(affinity);
    mood.clone_into(&mut next.mood);
    next.recent_memory.clear();
    Ok(Effect::State(next))
}

fn state_load(state: &AgentState, payload: &Payload) -> Result<Effect, Rejection> {
    let Some(saved) = payload.object("state_dict")? else {
        return Ok(Effect::Noop);
    };
    let mut next = state.clone();
    if let Some(affinity) = saved_number(saved, "affinity")? {
        next.affinity = clamp_affinity(affinity);
    }
    if let Some(mood) = saved_text(saved, "mood")? {
        mood.clone_into(&mut next.mood);
    }
    saved_text(saved, "recent_memory")?
        .unwrap_or_default()
        .clone_into(&mut next.recent_memory);
    Ok(Effect::State(next))
}

fn saved_number(saved: &Map<String, Value>, key: &str) -> Result<Option<f64>, PayloadError> {
    match saved.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_f64()
            .filter(|v| v.is_finite())
            .map(Some)
            .ok_or_else(|| PayloadError::NonFinite {
                key: format!("state_dict.{key}"),
            }),
        Some(_) => Err(PayloadError::WrongType {
            key: format!("state_dict.{key}"),
            expected: "a number",
        }),
    }
}

fn saved_text<'a>(
    saved: &'a Map<String, Value>,
    key: &str,
) -> Result<Option<&'a str>, PayloadError> {
    match saved.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(_) => Err(PayloadError::WrongType {
            key: format!("state_dict.{key}"),
            expected: "a string",
        }),
    }
}
