//! Named chain of bounded queues.
//!
//! A [`Pipeline`] creates every stage with shared defaults and a shared
//! drop callback, and reports per-stage counters in the order stages were
//! added.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::queue::{
    BoundedQueue, DEFAULT_WAIT, DropCallback, ItemKindFn, OverflowPolicy, QueueStats,
};

/// Capacity of a stage added without an explicit one.
pub const DEFAULT_STAGE_CAPACITY: usize = 3;

/// Settings for one named stage.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StageConfig {
    /// Stage name.
    pub name: String,
    /// Capacity override.
    #[serde(default)]
    pub capacity: Option<usize>,
    /// Policy override.
    #[serde(default)]
    pub policy: Option<OverflowPolicy>,
}

/// Pipeline-wide defaults and the stages to create up front.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PipelineConfig {
    /// Capacity for stages without an override (default: 3).
    #[serde(default = "default_capacity")]
    pub default_capacity: usize,
    /// Policy for stages without an override (default: oldest).
    #[serde(default)]
    pub default_policy: OverflowPolicy,
    /// Default wait for `None` timeouts, in milliseconds (default: 100).
    #[serde(default = "default_wait_ms")]
    pub wait_timeout_ms: u64,
    /// Stages to create, in order.
    #[serde(default)]
    pub stages: Vec<StageConfig>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            default_capacity: default_capacity(),
            default_policy: OverflowPolicy::default(),
            wait_timeout_ms: default_wait_ms(),
            stages: Vec::new(),
        }
    }
}

const fn default_capacity() -> usize {
    DEFAULT_STAGE_CAPACITY
}

fn default_wait_ms() -> u64 {
    u64::try_from(DEFAULT_WAIT.as_millis()).unwrap_or(u64::MAX)
}

/// Ordered collection of named [`BoundedQueue`] stages.
pub struct Pipeline<T> {
    default_capacity: usize,
    default_policy: OverflowPolicy,
    default_wait: Duration,
    on_drop: Option<DropCallback>,
    item_kind: Option<ItemKindFn<T>>,
    stages: Vec<Arc<BoundedQueue<T>>>,
}

impl<T> core::fmt::Debug for Pipeline<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Pipeline")
            .field("default_capacity", &self.default_capacity)
            .field("default_policy", &self.default_policy)
            .field("stages", &self.stages)
            .finish_non_exhaustive()
    }
}

impl<T> Default for Pipeline<T> {
    fn default() -> Self {
        Self::new(DEFAULT_STAGE_CAPACITY, OverflowPolicy::default())
    }
}

impl<T> Pipeline<T> {
    /// Create an empty pipeline with the given stage defaults.
    pub const fn new(default_capacity: usize, default_policy: OverflowPolicy) -> Self {
        Self {
            default_capacity,
            default_policy,
            default_wait: DEFAULT_WAIT,
            on_drop: None,
            item_kind: None,
            stages: Vec::new(),
        }
    }

    /// Build a pipeline and its configured stages.
    pub fn from_config(config: &PipelineConfig) -> Self {
        let mut pipeline = Self::new(config.default_capacity, config.default_policy)
            .with_default_wait(Duration::from_millis(config.wait_timeout_ms));
        for stage in &config.stages {
            pipeline.add_stage(&stage.name, stage.capacity, stage.policy);
        }
        pipeline
    }

    /// Set the default wait given to stages added afterwards.
    #[must_use]
    pub const fn with_default_wait(mut self, wait: Duration) -> Self {
        self.default_wait = wait;
        self
    }

    /// Share `callback` with every stage, existing and future.
    #[must_use]
    pub fn with_drop_callback(mut self, callback: DropCallback) -> Self {
        for stage in &self.stages {
            stage.set_drop_callback(Some(Arc::clone(&callback)));
        }
        self.on_drop = Some(callback);
        self
    }

    /// Name dropped items with `item_kind` in every stage, existing and
    /// future.
    #[must_use]
    pub fn with_item_kind(mut self, item_kind: ItemKindFn<T>) -> Self {
        for stage in &self.stages {
            stage.set_item_kind(item_kind);
        }
        self.item_kind = Some(item_kind);
        self
    }

    /// Add (or replace) a stage, returning a shared handle to it.
    pub fn add_stage(
        &mut self,
        name: &str,
        capacity: Option<usize>,
        policy: Option<OverflowPolicy>,
    ) -> Arc<BoundedQueue<T>> {
        let mut queue = BoundedQueue::new(name, capacity.unwrap_or(self.default_capacity))
            .with_policy(policy.unwrap_or(self.default_policy))
            .with_default_wait(self.default_wait);
        if let Some(callback) = &self.on_drop {
            queue = queue.with_drop_callback(Arc::clone(callback));
        }
        if let Some(item_kind) = self.item_kind {
            queue = queue.with_item_kind(item_kind);
        }
        let queue = Arc::new(queue);
        if let Some(existing) = self.stages.iter_mut().find(|q| q.stage() == name) {
            tracing::debug!(stage = name, "replacing pipeline stage");
            *existing = Arc::clone(&queue);
        } else {
            self.stages.push(Arc::clone(&queue));
        }
        queue
    }

    /// Look up a stage by name.
    pub fn stage(&self, name: &str) -> Option<Arc<BoundedQueue<T>>> {
        self.stages.iter().find(|q| q.stage() == name).cloned()
    }

    /// Stage names in order.
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|q| q.stage()).collect()
    }

    /// Empty every stage, returning the total number of items removed.
    pub fn clear_all(&self) -> usize {
        self.stages.iter().map(|q| q.clear()).sum()
    }

    /// Counters for every stage, in order.
    pub fn stats(&self) -> Vec<QueueStats> {
        self.stages.iter().map(|q| q.stats()).collect()
    }

    /// Drops across all stages.
    pub fn total_drops(&self) -> u64 {
        self.stages
            .iter()
            .map(|q| q.drop_count())
            .fold(0_u64, u64::saturating_add)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::queue::DropRecord;

    #[test]
    fn stages_use_defaults_unless_overridden() {
        let mut pipeline: Pipeline<String> = Pipeline::default();
        let tokens = pipeline.add_stage("tokens", Some(10), None);
        let audio = pipeline.add_stage("audio", None, Some(OverflowPolicy::Newest));
        assert_eq!(tokens.capacity(), 10);
        assert_eq!(tokens.policy(), OverflowPolicy::Oldest);
        assert_eq!(audio.capacity(), 3);
        assert_eq!(audio.policy(), OverflowPolicy::Newest);
        assert_eq!(pipeline.stage_names(), vec!["tokens", "audio"]);
    }

    #[test]
    fn shared_callback_sees_drops_from_every_stage() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let mut pipeline: Pipeline<u32> =
            Pipeline::new(1, OverflowPolicy::Oldest).with_drop_callback(Arc::new(move |_: &DropRecord| {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        let a = pipeline.add_stage("a", None, None);
        let b = pipeline.add_stage("b", None, None);
        a.put(1, None);
        a.put(2, None);
        b.put(1, None);
        b.put(2, None);
        b.put(3, None);
        assert_eq!(seen.load(Ordering::SeqCst), 3);
        assert_eq!(pipeline.total_drops(), 3);
    }

    #[test]
    fn configured_stages_share_a_later_callback() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let config = PipelineConfig {
            stages: vec![StageConfig {
                name: String::from("tokens"),
                capacity: Some(1),
                policy: None,
            }],
            ..PipelineConfig::default()
        };
        let mut pipeline: Pipeline<u32> = Pipeline::from_config(&config)
            .with_drop_callback(Arc::new(move |_: &DropRecord| {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .with_item_kind(|n| if (*n & 1) == 0 { "even" } else { "odd" });
        let tokens = pipeline.stage("tokens").unwrap();
        for n in 0..3 {
            tokens.put(n, None);
        }
        let late = pipeline.add_stage("late", Some(1), None);
        late.put(10, None);
        late.put(11, None);

        assert_eq!(seen.load(Ordering::SeqCst), 3);
        assert_eq!(pipeline.total_drops(), 3);
        let kinds: Vec<&str> = tokens.drops().iter().map(|d| d.item_kind).collect();
        assert_eq!(kinds, vec!["even", "odd"]);
        assert_eq!(late.drops().first().map(|d| d.item_kind), Some("even"));
    }

    #[test]
    fn clear_all_empties_every_stage() {
        let mut pipeline: Pipeline<u8> = Pipeline::default();
        let a = pipeline.add_stage("a", None, None);
        let b = pipeline.add_stage("b", None, None);
        a.put(1, None);
        b.put(1, None);
        b.put(2, None);
        assert_eq!(pipeline.clear_all(), 3);
        assert!(pipeline.stats().iter().all(|s| s.size == 0));
    }

    #[test]
    fn re_adding_a_stage_replaces_it() {
        let mut pipeline: Pipeline<u8> = Pipeline::default();
        pipeline.add_stage("a", Some(2), None);
        pipeline.add_stage("a", Some(5), None);
        assert_eq!(pipeline.stage_names(), vec!["a"]);
        assert_eq!(pipeline.stage("a").map(|q| q.capacity()), Some(5));
        assert!(pipeline.stage("missing").is_none());
    }

    #[test]
    fn config_creates_stages() {
        let config = PipelineConfig {
            default_capacity: 4,
            default_policy: OverflowPolicy::Newest,
            wait_timeout_ms: 5,
            stages: vec![
                StageConfig {
                    name: String::from("tokens"),
                    capacity: Some(16),
                    policy: Some(OverflowPolicy::Block),
                },
                StageConfig {
                    name: String::from("sentences"),
                    capacity: None,
                    policy: None,
                },
            ],
        };
        let pipeline: Pipeline<String> = Pipeline::from_config(&config);
        let tokens = pipeline.stage("tokens");
        assert_eq!(tokens.as_ref().map(|q| q.policy()), Some(OverflowPolicy::Block));
        let sentences = pipeline.stage("sentences");
        assert_eq!(sentences.as_ref().map(|q| q.capacity()), Some(4));
        assert_eq!(sentences.map(|q| q.policy()), Some(OverflowPolicy::Newest));
    }
}
