//! Caller-owned map of agent id to state store.
//!
//! The [`AgentRegistry`] creates every store with the same reducer and
//! store settings and hands out cheap [`StateStore`] clones. Stores are
//! independent: the registry lock is held only for lookup and insertion,
//! never during dispatch.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use rapport_types::{AgentId, AgentState, Fact};

use crate::config::StoreConfig;
use crate::error::RegistryError;
use crate::reducer::{Reduce, Reducer};
use crate::store::StateStore;

/// Creates, looks up, and removes per-agent stores.
pub struct AgentRegistry {
    stores: RwLock<BTreeMap<AgentId, StateStore>>,
    reducer: Arc<dyn Reduce>,
    config: StoreConfig,
}

impl core::fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("agents", &self.agent_ids())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new(Arc::new(Reducer::default()), StoreConfig::default())
    }
}

impl AgentRegistry {
    /// Create an empty registry whose stores share `reducer` and `config`.
    pub fn new(reducer: Arc<dyn Reduce>, config: StoreConfig) -> Self {
        Self {
            stores: RwLock::new(BTreeMap::new()),
            reducer,
            config,
        }
    }

    /// Create and register a store for `agent_id`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::AgentExists`] if a store is already
    /// registered under this id.
    pub fn create(
        &self,
        agent_id: AgentId,
        state: AgentState,
        facts: Vec<Fact>,
    ) -> Result<StateStore, RegistryError> {
        let mut stores = self.stores.write();
        if stores.contains_key(&agent_id) {
            return Err(RegistryError::AgentExists(agent_id));
        }
        let store = StateStore::builder(agent_id.clone(), state)
            .facts(facts)
            .config(&self.config)
            .reducer(Arc::clone(&self.reducer))
            .build();
        stores.insert(agent_id.clone(), store.clone());
        tracing::info!(agent_id = %agent_id, "state store created");
        Ok(store)
    }

    /// Look up the store for `agent_id`.
    pub fn get(&self, agent_id: &AgentId) -> Option<StateStore> {
        self.stores.read().get(agent_id).cloned()
    }

    /// Look up the store for `agent_id`, failing if absent.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::AgentNotFound`] if no store is registered.
    pub fn require(&self, agent_id: &AgentId) -> Result<StateStore, RegistryError> {
        self.get(agent_id)
            .ok_or_else(|| RegistryError::AgentNotFound(agent_id.clone()))
    }

    /// Unregister the store for `agent_id`.
    ///
    /// Clones already handed out keep working; they are simply no longer
    /// reachable through the registry.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::AgentNotFound`] if no store is registered.
    pub fn remove(&self, agent_id: &AgentId) -> Result<StateStore, RegistryError> {
        let removed = self.stores.write().remove(agent_id);
        let store = removed.ok_or_else(|| RegistryError::AgentNotFound(agent_id.clone()))?;
        tracing::info!(agent_id = %agent_id, "state store removed");
        Ok(store)
    }

    /// Ids of every registered agent, in order.
    pub fn agent_ids(&self) -> Vec<AgentId> {
        self.stores.read().keys().cloned().collect()
    }

    /// Number of registered agents.
    pub fn len(&self) -> usize {
        self.stores.read().len()
    }

    /// Whether no agents are registered.
    pub fn is_empty(&self) -> bool {
        self.stores.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use rapport_events::factory;

    use super::*;

    fn lydia() -> AgentId {
        AgentId::from("lydia")
    }

    #[test]
    fn create_then_get_shares_the_store() {
        let registry = AgentRegistry::default();
        let created = registry.create(lydia(), AgentState::new("Lydia", "Housecarl"), Vec::new());
        assert!(created.is_ok());

        let fetched = registry.get(&lydia());
        assert!(fetched.is_some());
        if let (Ok(created), Some(fetched)) = (created, fetched) {
            created.dispatch(factory::mood_set(&lydia(), "Happy"));
            assert_eq!(fetched.get_snapshot().mood, "Happy");
        }
    }

    #[test]
    fn duplicate_create_fails() {
        let registry = AgentRegistry::default();
        let state = AgentState::new("Lydia", "Housecarl");
        assert!(registry.create(lydia(), state.clone(), Vec::new()).is_ok());
        assert_eq!(
            registry.create(lydia(), state, Vec::new()).err(),
            Some(RegistryError::AgentExists(lydia()))
        );
    }

    #[test]
    fn remove_unregisters() {
        let registry = AgentRegistry::default();
        let _ = registry.create(lydia(), AgentState::new("Lydia", "Housecarl"), Vec::new());
        assert_eq!(registry.len(), 1);
        assert!(registry.remove(&lydia()).is_ok());
        assert!(registry.is_empty());
        assert!(registry.get(&lydia()).is_none());
        assert!(matches!(
            registry.remove(&lydia()),
            Err(RegistryError::AgentNotFound(_))
        ));
        assert!(registry.require(&lydia()).is_err());
    }

    #[test]
    fn stores_are_independent() {
        let registry = AgentRegistry::default();
        let a = registry.create(lydia(), AgentState::new("Lydia", "Housecarl"), Vec::new());
        let b = registry.create(
            AgentId::from("belethor"),
            AgentState::new("Belethor", "Merchant"),
            Vec::new(),
        );
        if let (Ok(a), Ok(b)) = (a, b) {
            a.dispatch(factory::affinity_delta(&lydia(), 0.5, "t"));
            assert!((b.get_snapshot().affinity).abs() < 1e-9);
            assert_eq!(b.last_sequence(), 0);
        }
        assert_eq!(
            registry.agent_ids(),
            vec![AgentId::from("belethor"), lydia()]
        );
    }
}
