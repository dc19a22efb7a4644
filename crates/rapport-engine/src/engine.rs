//! The engine service object.
//!
//! An [`Engine`] owns the agent registry, built from one
//! [`RapportConfig`]: every store shares the configured reducer admission
//! policy and event-log capacity, and every pipeline starts from the
//! configured stage defaults.

use std::sync::Arc;
use std::time::Duration;

use rapport_pipeline::{BoundedQueue, Pipeline};
use rapport_state::{AgentRegistry, Reducer, StateStore};
use rapport_stream::StreamTransaction;
use rapport_types::{AgentId, AgentState, Fact};

use crate::config::RapportConfig;
use crate::driver::{StreamDriver, StreamItem};
use crate::error::EngineError;

/// Registry of agent stores plus factories for pipelines and transactions.
#[derive(Debug)]
pub struct Engine {
    config: RapportConfig,
    registry: AgentRegistry,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(RapportConfig::default())
    }
}

impl Engine {
    /// Build an engine from configuration.
    pub fn new(config: RapportConfig) -> Self {
        let reducer = Arc::new(Reducer::new(config.admission.clone()));
        let registry = AgentRegistry::new(reducer, config.store.clone());
        tracing::info!(
            event_log_capacity = config.store.event_log_capacity,
            max_fact_len = config.admission.max_fact_len,
            pipeline_stages = config.pipeline.stages.len(),
            "engine initialized"
        );
        Self { config, registry }
    }

    /// The configuration this engine was built from.
    pub const fn config(&self) -> &RapportConfig {
        &self.config
    }

    /// The agent registry.
    pub const fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    /// Register a new agent with its starting state and facts.
    pub fn spawn_agent(
        &self,
        agent_id: AgentId,
        state: AgentState,
        facts: Vec<Fact>,
    ) -> Result<StateStore, EngineError> {
        Ok(self.registry.create(agent_id, state, facts)?)
    }

    /// Look up an agent's store.
    pub fn store(&self, agent_id: &AgentId) -> Result<StateStore, EngineError> {
        Ok(self.registry.require(agent_id)?)
    }

    /// Unregister an agent, returning its store.
    pub fn retire_agent(&self, agent_id: &AgentId) -> Result<StateStore, EngineError> {
        Ok(self.registry.remove(agent_id)?)
    }

    /// Create an idle stream transaction against an agent's store.
    ///
    /// The caller attaches a sink if it wants one, then calls `start`.
    pub fn transaction(&self, agent_id: &AgentId) -> Result<StreamTransaction, EngineError> {
        Ok(StreamTransaction::new(self.store(agent_id)?))
    }

    /// Create and start a stream transaction for one player input.
    pub fn begin_interaction(
        &self,
        agent_id: &AgentId,
        player_input: &str,
    ) -> Result<StreamTransaction, EngineError> {
        let mut txn = self.transaction(agent_id)?;
        txn.start(player_input)?;
        Ok(txn)
    }

    /// A generation pipeline with the configured defaults and stages.
    ///
    /// Drop records name the dropped [`StreamItem`] variant. Attach a
    /// shared drop callback with [`Pipeline::with_drop_callback`]; it
    /// reaches the configured stages too.
    pub fn pipeline(&self) -> Pipeline<StreamItem> {
        Pipeline::from_config(&self.config.pipeline).with_item_kind(StreamItem::kind)
    }

    /// A driver for `source` that aborts after the configured pipeline
    /// wait of silence.
    pub const fn driver(&self, source: Arc<BoundedQueue<StreamItem>>) -> StreamDriver {
        StreamDriver::new(
            source,
            Duration::from_millis(self.config.pipeline.wait_timeout_ms),
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;

    use rapport_pipeline::DropRecord;
    use rapport_state::RegistryError;

    use super::*;

    fn lydia() -> AgentId {
        AgentId::from("lydia")
    }

    #[test]
    fn admission_config_reaches_the_reducer() {
        let config = RapportConfig::parse("admission:\n  max_fact_len: 5\n").unwrap();
        let engine = Engine::new(config);
        engine
            .spawn_agent(lydia(), AgentState::new("Lydia", "Housecarl"), Vec::new())
            .unwrap();

        let mut txn = engine.begin_interaction(&lydia(), "hi").unwrap();
        txn.queue_fact("far too long for the limit", &[], 0.5).unwrap();
        txn.queue_fact("short", &[], 0.5).unwrap();
        txn.commit().unwrap();

        let facts = engine.store(&lydia()).unwrap().get_facts_snapshot();
        assert_eq!(facts.len(), 1);
        assert_eq!(facts.first().map(|f| f.text.as_str()), Some("short"));
    }

    #[test]
    fn unknown_agents_are_registry_errors() {
        let engine = Engine::default();
        let err = engine.begin_interaction(&lydia(), "hello").unwrap_err();
        assert!(matches!(
            err,
            EngineError::Registry {
                source: RegistryError::AgentNotFound(_)
            }
        ));
    }

    #[test]
    fn retired_agents_are_gone() {
        let engine = Engine::default();
        engine
            .spawn_agent(lydia(), AgentState::new("Lydia", "Housecarl"), Vec::new())
            .unwrap();
        let again = engine.spawn_agent(lydia(), AgentState::new("Lydia", "Housecarl"), Vec::new());
        assert!(again.is_err());
        engine.retire_agent(&lydia()).unwrap();
        assert!(engine.store(&lydia()).is_err());
        assert!(engine.registry().is_empty());
    }

    #[test]
    fn pipelines_follow_configuration() {
        let config =
            RapportConfig::parse("pipeline:\n  stages:\n    - name: tokens\n      capacity: 8\n")
                .unwrap();
        let engine = Engine::new(config);
        let pipeline = engine.pipeline();
        assert_eq!(pipeline.stage("tokens").map(|q| q.capacity()), Some(8));
    }

    #[test]
    fn pipeline_drops_reach_the_callback_and_name_the_variant() {
        let config = RapportConfig::parse(
            "pipeline:\n  stages:\n    - name: tokens\n      capacity: 1\n      policy: newest\n",
        )
        .unwrap();
        let engine = Engine::new(config);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let pipeline = engine
            .pipeline()
            .with_drop_callback(Arc::new(move |record: &DropRecord| {
                sink.lock().unwrap().push(record.item_kind);
            }));
        let tokens = pipeline.stage("tokens").unwrap();
        tokens.put(StreamItem::text("a", false), None);
        tokens.put(StreamItem::Finished, None);
        tokens.put(
            StreamItem::Failed {
                reason: String::from("x"),
                code: None,
            },
            None,
        );
        assert_eq!(*seen.lock().unwrap(), vec!["finished", "failed"]);
    }
}
