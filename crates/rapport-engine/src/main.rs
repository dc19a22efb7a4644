//! Demo binary for the Rapport engine.
//!
//! Runs two interactions against one agent: a generator that finishes,
//! whose changes commit, and one that fails midway, whose changes are
//! discarded. Logs the agent's state after each and the pipeline counters
//! at the end.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `$RAPPORT_CONFIG` or `rapport.yaml`
//! 2. Initialize structured logging (tracing)
//! 3. Build the engine and register the demo agent
//! 4. Run the committed interaction
//! 5. Run the aborted interaction
//! 6. Log pipeline statistics

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use rapport_engine::{Engine, EngineError, RapportConfig, StreamItem, telemetry};
use rapport_events::factory;
use rapport_pipeline::{BoundedQueue, OverflowPolicy, Pipeline};
use rapport_stream::{Frame, FrameBody};
use rapport_types::{AgentId, AgentState, Fact, PlayerEventKind};
use tracing::info;

/// Environment variable naming the configuration file.
const CONFIG_ENV: &str = "RAPPORT_CONFIG";

/// Application entry point for the demo.
///
/// # Errors
///
/// Returns an error if configuration, logging setup, or an interaction
/// fails.
#[allow(clippy::too_many_lines)]
fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration.
    let config = load_config()?;

    // 2. Initialize structured logging.
    telemetry::init(&config.logging)?;
    info!(
        log_level = config.logging.level,
        json = config.logging.json,
        "rapport-demo starting"
    );

    // 3. Build the engine and register the demo agent.
    let engine = Engine::new(config);
    let agent_id = AgentId::from("lydia");
    let store = engine.spawn_agent(
        agent_id.clone(),
        AgentState::new("Lydia", "Housecarl").with_affinity(0.5),
        vec![Fact::new(
            String::from("Player rescued me at Bleak Falls"),
            vec![String::from("quest")],
            String::from("2026-01-01 09:00"),
            0.9,
        )],
    )?;
    let _subscription = store.subscribe(|state, event| {
        info!(
            event_type = event.event_type().as_str(),
            affinity = state.affinity,
            mood = state.mood,
            "state changed"
        );
    });
    store.dispatch(factory::player_event(&agent_id, PlayerEventKind::Praise, 0.5, &["chat"]));

    let mut pipeline: Pipeline<StreamItem> = engine.pipeline();
    let tokens = pipeline
        .stage("tokens")
        .unwrap_or_else(|| pipeline.add_stage("tokens", Some(32), Some(OverflowPolicy::Block)));

    // 4. A generator that finishes: everything commits.
    let committed = run_interaction(
        &engine,
        &agent_id,
        &tokens,
        "I brought you a new sword.",
        vec![
            StreamItem::text("By the gods, ", false),
            StreamItem::text("it's beautiful. Thank you.", true),
            StreamItem::state_change(factory::affinity_delta(&agent_id, 0.2, "gift")),
            StreamItem::state_change(factory::mood_set(&agent_id, "Grateful")),
            StreamItem::state_change(factory::fact_add(
                &agent_id,
                "Player gave me a sword",
                &["gift"],
                0.8,
            )),
            StreamItem::Finished,
        ],
    )?;
    log_outcome(&committed, &engine, &agent_id)?;

    // 5. A generator that fails midway: nothing from it survives.
    let aborted = run_interaction(
        &engine,
        &agent_id,
        &tokens,
        "Hand over your gold.",
        vec![
            StreamItem::text("How dare ", false),
            StreamItem::state_change(factory::affinity_delta(&agent_id, -0.6, "threat")),
            StreamItem::state_change(factory::mood_set(&agent_id, "Hostile")),
            StreamItem::Failed {
                reason: String::from("generator disconnected"),
                code: Some(String::from("LLM_ERROR")),
            },
        ],
    )?;
    log_outcome(&aborted, &engine, &agent_id)?;

    // 6. Pipeline statistics.
    for stats in pipeline.stats() {
        info!(
            stage = stats.stage,
            size = stats.size,
            maxsize = stats.maxsize,
            put_count = stats.put_count,
            get_count = stats.get_count,
            drop_count = stats.drop_count,
            drop_rate = stats.drop_rate,
            "pipeline stage"
        );
    }
    info!(
        total_drops = pipeline.total_drops(),
        events = store.last_sequence(),
        "rapport-demo finished"
    );
    Ok(())
}

/// Load configuration from `$RAPPORT_CONFIG` or `rapport.yaml`, falling
/// back to defaults when no file exists.
fn load_config() -> Result<RapportConfig, EngineError> {
    let path = std::env::var_os(CONFIG_ENV)
        .map_or_else(|| PathBuf::from("rapport.yaml"), PathBuf::from);
    if path.exists() {
        Ok(RapportConfig::from_file(&path)?)
    } else {
        Ok(RapportConfig::parse("")?)
    }
}

/// Start an interaction, feed `items` from a producer thread, and drive it
/// to its terminal frame.
fn run_interaction(
    engine: &Engine,
    agent_id: &AgentId,
    stage: &Arc<BoundedQueue<StreamItem>>,
    player_input: &str,
    items: Vec<StreamItem>,
) -> Result<Frame, EngineError> {
    let mut txn = engine.begin_interaction(agent_id, player_input)?;
    let producer = {
        let stage = Arc::clone(stage);
        thread::spawn(move || {
            for item in items {
                if !stage.put(item, None) {
                    tracing::warn!(stage = stage.stage(), "generator item dropped");
                }
            }
        })
    };
    let frame = engine.driver(Arc::clone(stage)).drive(&mut txn)?;
    if producer.join().is_err() {
        tracing::error!("generator thread panicked");
    }
    Ok(frame)
}

fn log_outcome(frame: &Frame, engine: &Engine, agent_id: &AgentId) -> Result<(), EngineError> {
    let view = engine.store(agent_id)?.get_snapshot();
    match &frame.body {
        FrameBody::Commit {
            final_output,
            metrics,
            ..
        } => info!(
            final_output = final_output.as_str(),
            latency_ms = metrics.latency_ms,
            events_applied = metrics.events_applied,
            affinity = view.affinity,
            mood = view.mood,
            attitude = view.attitude(),
            facts = view.facts().len(),
            "interaction committed"
        ),
        FrameBody::Abort { reason, error_code } => info!(
            reason = reason.as_str(),
            error_code = error_code.as_deref().unwrap_or(""),
            affinity = view.affinity,
            mood = view.mood,
            facts = view.facts().len(),
            "interaction aborted, state unchanged"
        ),
        _ => {}
    }
    Ok(())
}
