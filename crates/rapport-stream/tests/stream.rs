//! Integration tests for `rapport-stream` transactions against a live store.

// Integration tests use expect/unwrap extensively for clarity -- panicking
// on failure is the correct behavior in test code.
#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::panic,
    clippy::indexing_slicing
)]

use std::sync::mpsc;

use rapport_events::EventType;
use rapport_state::{DEFAULT_HISTORY_LIMIT, StateStore};
use rapport_stream::{FrameBody, Phase, StreamError, StreamTransaction};
use rapport_types::{AgentId, AgentState, TurnRole};

fn store() -> StateStore {
    StateStore::new(
        AgentId::from("lydia"),
        AgentState::new("Lydia", "Housecarl").with_affinity(0.5),
    )
}

#[test]
fn abort_after_partial_output_leaves_state_unchanged() {
    for emitted in 0..4 {
        let store = store();
        let before = store.get_snapshot();

        let mut txn = StreamTransaction::new(store.clone());
        txn.start("Hand over the gold.").unwrap();
        for i in 0..emitted {
            txn.add_text(&format!("word{i} "), false).unwrap();
            txn.add_audio(vec![0_u8; 32], 22_050).unwrap();
        }
        txn.queue_affinity_change(-0.3, "threat").unwrap();
        txn.queue_mood_change("Hostile").unwrap();
        txn.queue_fact("Player threatened me", &["threat"], 0.9).unwrap();

        let frame = txn.abort("generation failed", Some("LLM_ERROR")).unwrap();
        assert!(frame.is_terminal());

        let after = store.get_snapshot();
        assert_eq!(*after.state(), *before.state());
        assert!(after.facts().is_empty());
        assert!(store.get_history(DEFAULT_HISTORY_LIMIT).is_empty());
        assert!(!store.has_active_transaction(txn.transaction_id()));
    }
}

#[test]
fn commit_applies_everything_and_reports_it() {
    let store = store();
    let mut txn = StreamTransaction::new(store.clone());
    txn.start("I brought you a sword.").unwrap();
    txn.add_text("Thank ", false).unwrap();
    txn.add_text("you!", true).unwrap();
    txn.add_metadata("classifier", "GIFT").unwrap();
    txn.queue_affinity_change(0.2, "gift").unwrap();
    txn.queue_mood_change("Grateful").unwrap();
    txn.queue_fact("Player gave me a sword", &["gift"], 0.8).unwrap();

    let frame = txn.commit().unwrap();
    let FrameBody::Commit {
        final_output,
        metrics,
        applied_events,
    } = &frame.body
    else {
        panic!("expected commit frame, got {frame:?}");
    };
    assert_eq!(final_output, "Thank you!");
    assert_eq!(metrics.text_frames, 2);
    assert_eq!(metrics.audio_chunks, 0);
    assert_eq!(metrics.events_applied, 5);
    assert_eq!(metrics.metadata["classifier"], "GIFT");

    let types: Vec<EventType> = applied_events.iter().map(|e| e.event_type()).collect();
    assert_eq!(
        types,
        vec![
            EventType::TurnAdd,
            EventType::AffinityDelta,
            EventType::MoodSet,
            EventType::FactAdd,
            EventType::TurnAdd,
        ]
    );

    let view = store.get_snapshot();
    assert!((view.affinity - 0.7).abs() < 1e-9);
    assert_eq!(view.mood, "Grateful");
    assert_eq!(view.facts().len(), 1);

    let history = store.get_history(DEFAULT_HISTORY_LIMIT);
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].role, TurnRole::User);
    assert_eq!(history[0].content, "I brought you a sword.");
    assert_eq!(history[1].role, TurnRole::Assistant);
    assert_eq!(history[1].content, "Thank you!");
}

#[test]
fn terminal_transactions_refuse_further_operations() {
    let mut committed = StreamTransaction::new(store());
    committed.start("hi").unwrap();
    committed.commit().unwrap();
    assert_eq!(
        committed.add_text("late", false).unwrap_err(),
        StreamError::Finished(Phase::Committed)
    );
    assert!(committed.commit().is_err());
    assert!(committed.abort("too late", None).is_err());
    assert!(committed.queue_mood_change("Angry").is_err());

    let mut aborted = StreamTransaction::new(store());
    aborted.start("hi").unwrap();
    aborted.abort("cancelled", None).unwrap();
    assert_eq!(
        aborted.commit().unwrap_err(),
        StreamError::Finished(Phase::Aborted)
    );
    assert!(aborted.add_audio(vec![1], 8_000).is_err());
    assert_eq!(aborted.frames().len(), 2);
}

#[test]
fn frames_reach_a_channel_sink_in_order() {
    let (tx, rx) = mpsc::channel();
    let mut txn = StreamTransaction::new(store()).with_sink(tx);
    txn.start("hello").unwrap();
    txn.add_text("Hi.", true).unwrap();
    txn.commit().unwrap();

    let received: Vec<_> = rx.try_iter().collect();
    let types: Vec<&str> = received.iter().map(|f| f.frame_type()).collect();
    assert_eq!(types, vec!["start", "text", "commit"]);
    let sequences: Vec<u64> = received.iter().map(|f| f.sequence).collect();
    assert_eq!(sequences, vec![1, 2, 3]);
    assert!(received.iter().all(|f| &f.transaction_id == txn.transaction_id()));
}

#[test]
fn panicking_sink_does_not_break_the_transaction() {
    let store = store();
    let mut txn =
        StreamTransaction::new(store.clone()).with_sink(|_: &rapport_stream::Frame| panic!("sink bug"));
    txn.start("hello").unwrap();
    txn.queue_mood_change("Happy").unwrap();
    txn.commit().unwrap();

    assert_eq!(txn.frames().len(), 2);
    assert_eq!(store.get_snapshot().mood, "Happy");
}

#[test]
fn external_abort_loses_the_transaction() {
    let store = store();
    let mut txn = StreamTransaction::new(store.clone());
    txn.start("hello").unwrap();
    txn.queue_mood_change("Happy").unwrap();

    store.dispatch(rapport_events::factory::transaction_abort(
        store.agent_id(),
        txn.transaction_id(),
        "operator reset",
    ));

    assert!(matches!(txn.commit(), Err(StreamError::TransactionLost(_))));
    assert_eq!(txn.phase(), Phase::Aborted);
    assert_eq!(store.get_snapshot().mood, "Neutral");
    assert!(txn.frames().last().is_some_and(rapport_stream::Frame::is_terminal));
}

#[test]
fn queued_control_events_are_refused_and_commit_stays_atomic() {
    let store = store();
    let before = store.get_snapshot();
    let mut txn = StreamTransaction::new(store.clone());
    txn.start("hi").unwrap();

    let agent = store.agent_id().clone();
    let id = txn.transaction_id().clone();
    assert_eq!(
        txn.queue_event(rapport_events::factory::transaction_commit(&agent, &id)),
        Err(StreamError::ControlEvent(EventType::TransactionCommit))
    );
    assert_eq!(
        txn.queue_event(rapport_events::factory::transaction_abort(&agent, &id, "x")),
        Err(StreamError::ControlEvent(EventType::TransactionAbort))
    );
    assert_eq!(
        txn.queue_event(rapport_events::factory::transaction_begin(&agent, &id)),
        Err(StreamError::ControlEvent(EventType::TransactionBegin))
    );

    txn.queue_affinity_change(0.3, "kind words").unwrap();
    assert!(store.has_active_transaction(&id));
    assert!((store.get_snapshot().affinity - before.affinity).abs() < 1e-9);

    let frame = txn.commit().unwrap();
    assert!(matches!(frame.body, FrameBody::Commit { .. }));
    assert!((store.get_snapshot().affinity - 0.8).abs() < 1e-9);
}
