//! Fixed-capacity FIFO with an explicit overflow policy.
//!
//! A [`BoundedQueue`] sits between two generation stages. Its length never
//! exceeds its capacity: when a producer outruns the consumer the queue
//! drops an item according to its [`OverflowPolicy`] and records a
//! [`DropRecord`] instead of growing. Waits are always bounded; a `None`
//! timeout means the queue's configured default wait, never "forever".

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex, MutexGuard, RwLock};
use serde::{Deserialize, Serialize};

/// Default wait for blocking puts and gets when the caller passes `None`.
pub const DEFAULT_WAIT: Duration = Duration::from_millis(100);

/// Number of drop records retained per queue.
pub const DROP_HISTORY: usize = 256;

/// Longest wait honored; larger timeouts are capped here.
pub const MAX_WAIT: Duration = Duration::from_secs(31_536_000);

/// What happens when a full queue receives another item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the head and admit the new item.
    #[default]
    Oldest,
    /// Reject the new item.
    Newest,
    /// Wait for space up to a timeout, then reject the new item.
    Block,
}

impl OverflowPolicy {
    /// Wire name of the policy.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Oldest => "oldest",
            Self::Newest => "newest",
            Self::Block => "block",
        }
    }
}

/// One dropped item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DropRecord {
    /// Stage name of the queue that dropped.
    pub stage: String,
    /// Policy in force.
    pub policy: OverflowPolicy,
    /// Queue length at the moment of the drop.
    pub queue_size: usize,
    /// Kind of the dropped item, as reported by the queue's item-kind
    /// function (the short type name unless one is set).
    pub item_kind: &'static str,
    /// When the drop happened.
    pub timestamp: DateTime<Utc>,
}

/// Callback invoked once per drop.
pub type DropCallback = Arc<dyn Fn(&DropRecord) + Send + Sync>;

/// Names the kind of an item for drop records (e.g. an enum variant).
pub type ItemKindFn<T> = fn(&T) -> &'static str;

/// Replaceable reporting hooks, read at drop time.
struct Hooks<T> {
    on_drop: Option<DropCallback>,
    item_kind: ItemKindFn<T>,
}

/// Counters reported by [`BoundedQueue::stats`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueStats {
    /// Stage name.
    pub stage: String,
    /// Current length.
    pub size: usize,
    /// Capacity.
    pub maxsize: usize,
    /// Items offered.
    pub put_count: u64,
    /// Items taken.
    pub get_count: u64,
    /// Items dropped (evicted, rejected, or timed out).
    pub drop_count: u64,
    /// `drop_count / max(1, put_count)`.
    pub drop_rate: f64,
}

#[derive(Debug)]
struct QueueInner<T> {
    items: VecDeque<T>,
    put_count: u64,
    get_count: u64,
    drop_count: u64,
    drops: VecDeque<DropRecord>,
}

/// Thread-safe bounded FIFO.
///
/// Safe to share via `Arc<BoundedQueue<T>>`. One mutex guards the items
/// and counters; producers and consumers wait on separate condition
/// variables.
pub struct BoundedQueue<T> {
    stage: String,
    capacity: usize,
    policy: OverflowPolicy,
    default_wait: Duration,
    hooks: RwLock<Hooks<T>>,
    inner: Mutex<QueueInner<T>>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl<T> core::fmt::Debug for BoundedQueue<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BoundedQueue")
            .field("stage", &self.stage)
            .field("capacity", &self.capacity)
            .field("policy", &self.policy)
            .field("size", &self.size())
            .finish_non_exhaustive()
    }
}

impl<T> BoundedQueue<T> {
    /// Create a queue holding at most `capacity` items (at least one).
    pub fn new(stage: impl Into<String>, capacity: usize) -> Self {
        Self {
            stage: stage.into(),
            capacity: capacity.max(1),
            policy: OverflowPolicy::default(),
            default_wait: DEFAULT_WAIT,
            hooks: RwLock::new(Hooks {
                on_drop: None,
                item_kind: short_type_name_of::<T>,
            }),
            inner: Mutex::new(QueueInner {
                items: VecDeque::with_capacity(capacity.max(1)),
                put_count: 0,
                get_count: 0,
                drop_count: 0,
                drops: VecDeque::new(),
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    /// Set the overflow policy.
    #[must_use]
    pub const fn with_policy(mut self, policy: OverflowPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the wait used when a caller passes `None` as timeout.
    #[must_use]
    pub const fn with_default_wait(mut self, wait: Duration) -> Self {
        self.default_wait = wait;
        self
    }

    /// Invoke `callback` for every drop.
    #[must_use]
    pub fn with_drop_callback(self, callback: DropCallback) -> Self {
        self.set_drop_callback(Some(callback));
        self
    }

    /// Name dropped items with `item_kind` instead of their type name.
    #[must_use]
    pub fn with_item_kind(self, item_kind: ItemKindFn<T>) -> Self {
        self.set_item_kind(item_kind);
        self
    }

    /// Replace (or remove) the drop callback on a live queue.
    pub fn set_drop_callback(&self, callback: Option<DropCallback>) {
        self.hooks.write().on_drop = callback;
    }

    /// Replace the item-kind function on a live queue.
    pub fn set_item_kind(&self, item_kind: ItemKindFn<T>) {
        self.hooks.write().item_kind = item_kind;
    }

    /// Stage name.
    pub fn stage(&self) -> &str {
        &self.stage
    }

    /// Maximum length.
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Overflow policy.
    pub const fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// Offer an item.
    ///
    /// Returns `true` if the item was enqueued. Under [`OverflowPolicy::Oldest`]
    /// this is always `true` (the head is evicted instead). Under
    /// [`OverflowPolicy::Block`] the call waits up to `timeout` (or the
    /// default wait) for space; a timed-out put counts as a drop. Waits
    /// are capped at [`MAX_WAIT`].
    pub fn put(&self, item: T, timeout: Option<Duration>) -> bool {
        let item_kind = self.hooks.read().item_kind;
        let mut inner = self.inner.lock();
        inner.put_count = inner.put_count.saturating_add(1);

        if inner.items.len() >= self.capacity {
            match self.policy {
                OverflowPolicy::Oldest => {
                    let evicted = inner.items.pop_front();
                    let kind = evicted.as_ref().map_or_else(short_type_name::<T>, item_kind);
                    drop(evicted);
                    let record = self.record_drop(&mut inner, kind);
                    inner.items.push_back(item);
                    self.not_empty.notify_one();
                    drop(inner);
                    self.report(&record);
                    return true;
                }
                OverflowPolicy::Newest => {
                    let record = self.record_drop(&mut inner, item_kind(&item));
                    drop(inner);
                    self.report(&record);
                    return false;
                }
                OverflowPolicy::Block => {
                    let deadline = deadline_after(timeout.unwrap_or(self.default_wait));
                    while inner.items.len() >= self.capacity {
                        if self.not_full.wait_until(&mut inner, deadline).timed_out()
                            && inner.items.len() >= self.capacity
                        {
                            let record = self.record_drop(&mut inner, item_kind(&item));
                            drop(inner);
                            self.report(&record);
                            return false;
                        }
                    }
                }
            }
        }

        inner.items.push_back(item);
        self.not_empty.notify_one();
        true
    }

    /// Take the head item, waiting up to `timeout` (or the default wait),
    /// capped at [`MAX_WAIT`].
    pub fn get(&self, timeout: Option<Duration>) -> Option<T> {
        let deadline = deadline_after(timeout.unwrap_or(self.default_wait));
        let mut inner = self.inner.lock();
        loop {
            if let Some(item) = self.take(&mut inner) {
                return Some(item);
            }
            if self.not_empty.wait_until(&mut inner, deadline).timed_out() {
                return self.take(&mut inner);
            }
        }
    }

    /// Take the head item without waiting.
    pub fn try_get(&self) -> Option<T> {
        let mut inner = self.inner.lock();
        self.take(&mut inner)
    }

    /// Current length.
    pub fn size(&self) -> usize {
        self.inner.lock().items.len()
    }

    /// Whether the queue holds no items.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }

    /// Whether the queue is at capacity.
    pub fn is_full(&self) -> bool {
        self.inner.lock().items.len() >= self.capacity
    }

    /// Remove every item, returning how many were removed.
    ///
    /// Cleared items are not counted as drops.
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock();
        let count = inner.items.len();
        inner.items.clear();
        self.not_full.notify_all();
        count
    }

    /// Recent drop records, oldest first.
    pub fn drops(&self) -> Vec<DropRecord> {
        self.inner.lock().drops.iter().cloned().collect()
    }

    /// Total drops since creation.
    pub fn drop_count(&self) -> u64 {
        self.inner.lock().drop_count
    }

    /// Counter snapshot.
    pub fn stats(&self) -> QueueStats {
        let inner = self.inner.lock();
        QueueStats {
            stage: self.stage.clone(),
            size: inner.items.len(),
            maxsize: self.capacity,
            put_count: inner.put_count,
            get_count: inner.get_count,
            drop_count: inner.drop_count,
            drop_rate: ratio(inner.drop_count, inner.put_count.max(1)),
        }
    }

    fn take(&self, inner: &mut MutexGuard<'_, QueueInner<T>>) -> Option<T> {
        let item = inner.items.pop_front()?;
        inner.get_count = inner.get_count.saturating_add(1);
        self.not_full.notify_one();
        Some(item)
    }

    /// Count and remember a drop. Reporting happens after the lock is
    /// released so callbacks may touch the queue.
    fn record_drop(
        &self,
        inner: &mut MutexGuard<'_, QueueInner<T>>,
        item_kind: &'static str,
    ) -> DropRecord {
        inner.drop_count = inner.drop_count.saturating_add(1);
        let record = DropRecord {
            stage: self.stage.clone(),
            policy: self.policy,
            queue_size: inner.items.len(),
            item_kind,
            timestamp: Utc::now(),
        };
        while inner.drops.len() >= DROP_HISTORY {
            inner.drops.pop_front();
        }
        inner.drops.push_back(record.clone());
        record
    }

    fn report(&self, record: &DropRecord) {
        tracing::warn!(
            stage = %record.stage,
            policy = record.policy.as_str(),
            queue_size = record.queue_size,
            item_kind = record.item_kind,
            "queue dropped an item"
        );
        let on_drop = self.hooks.read().on_drop.clone();
        if let Some(callback) = on_drop {
            let outcome =
                std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| callback(record)));
            if outcome.is_err() {
                tracing::warn!(stage = %record.stage, "drop callback panicked");
            }
        }
    }
}

/// Counter ratio for reporting; exactness is irrelevant here.
#[allow(clippy::cast_precision_loss)]
fn ratio(numerator: u64, denominator: u64) -> f64 {
    numerator as f64 / denominator as f64
}

/// Deadline `wait` from now, capped at [`MAX_WAIT`].
fn deadline_after(wait: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(wait.min(MAX_WAIT)).unwrap_or(now)
}

fn short_type_name_of<T>(_: &T) -> &'static str {
    short_type_name::<T>()
}

fn short_type_name<T>() -> &'static str {
    let full = core::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn fifo_order() {
        let queue = BoundedQueue::new("test", 3);
        assert!(queue.put(1, None));
        assert!(queue.put(2, None));
        assert_eq!(queue.try_get(), Some(1));
        assert_eq!(queue.try_get(), Some(2));
        assert_eq!(queue.try_get(), None);
    }

    #[test]
    fn oldest_policy_evicts_head() {
        let queue = BoundedQueue::new("tokens", 3);
        for i in 0..4 {
            assert!(queue.put(i, None));
        }
        assert_eq!(queue.size(), 3);
        assert_eq!(queue.try_get(), Some(1));
        let drops = queue.drops();
        assert_eq!(drops.len(), 1);
        assert_eq!(drops.first().map(|d| d.policy), Some(OverflowPolicy::Oldest));
        assert_eq!(drops.first().map(|d| d.item_kind), Some("i32"));
    }

    #[test]
    fn newest_policy_rejects_incoming() {
        let queue = BoundedQueue::new("audio", 2).with_policy(OverflowPolicy::Newest);
        assert!(queue.put("a", None));
        assert!(queue.put("b", None));
        assert!(!queue.put("c", None));
        assert_eq!(queue.try_get(), Some("a"));
        assert_eq!(queue.drop_count(), 1);
    }

    #[test]
    fn block_policy_times_out_as_a_drop() {
        let queue = BoundedQueue::new("sentences", 1).with_policy(OverflowPolicy::Block);
        assert!(queue.put(1, None));
        let started = Instant::now();
        assert!(!queue.put(2, Some(Duration::from_millis(20))));
        assert!(started.elapsed() >= Duration::from_millis(20));
        assert_eq!(queue.stats().drop_count, 1);
        assert_eq!(queue.size(), 1);
    }

    #[test]
    fn get_times_out_with_none() {
        let queue: BoundedQueue<u8> =
            BoundedQueue::new("empty", 1).with_default_wait(Duration::from_millis(10));
        assert_eq!(queue.get(None), None);
        assert_eq!(queue.get(Some(Duration::ZERO)), None);
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        let queue = BoundedQueue::new("tiny", 0);
        assert_eq!(queue.capacity(), 1);
        assert!(queue.put('x', None));
        assert!(queue.is_full());
    }

    #[test]
    fn clear_reports_removed_items() {
        let queue = BoundedQueue::new("test", 3);
        queue.put(1, None);
        queue.put(2, None);
        assert_eq!(queue.clear(), 2);
        assert!(queue.is_empty());
        assert_eq!(queue.drop_count(), 0);
    }

    #[test]
    fn drop_callback_runs_and_may_panic() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let callback: DropCallback = Arc::new(move |_: &DropRecord| {
            counter.fetch_add(1, Ordering::SeqCst);
            panic!("callback bug");
        });
        let queue = BoundedQueue::new("test", 1).with_drop_callback(callback);
        queue.put(1, None);
        queue.put(2, None);
        queue.put(3, None);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(queue.try_get(), Some(3));
    }

    #[test]
    fn stats_track_counts() {
        let queue = BoundedQueue::new("stats", 2);
        for i in 0..4 {
            queue.put(i, None);
        }
        queue.try_get();
        let stats = queue.stats();
        assert_eq!(stats.put_count, 4);
        assert_eq!(stats.get_count, 1);
        assert_eq!(stats.drop_count, 2);
        assert_eq!(stats.size, 1);
        assert!((stats.drop_rate - 0.5).abs() < 1e-9);
    }

    #[test]
    fn drop_records_name_the_dropped_item() {
        fn kind(item: &Result<u8, String>) -> &'static str {
            if item.is_ok() { "ok" } else { "err" }
        }
        let oldest = BoundedQueue::new("oldest", 1).with_item_kind(kind);
        oldest.put(Err(String::from("first")), None);
        oldest.put(Ok(1), None);
        let newest = BoundedQueue::new("newest", 1)
            .with_policy(OverflowPolicy::Newest)
            .with_item_kind(kind);
        newest.put(Err(String::from("kept")), None);
        newest.put(Ok(2), None);

        assert_eq!(oldest.drops().first().map(|d| d.item_kind), Some("err"));
        assert_eq!(newest.drops().first().map(|d| d.item_kind), Some("ok"));
    }

    #[test]
    fn callback_can_be_attached_to_a_live_queue() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let queue = BoundedQueue::new("live", 1);
        queue.put(1, None);
        queue.put(2, None);
        queue.set_drop_callback(Some(Arc::new(move |_: &DropRecord| {
            counter.fetch_add(1, Ordering::SeqCst);
        })));
        queue.put(3, None);
        queue.set_drop_callback(None);
        queue.put(4, None);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(queue.drop_count(), 3);
    }

    #[test]
    fn huge_timeouts_wait_instead_of_expiring() {
        let queue = Arc::new(BoundedQueue::new("patient", 1).with_policy(OverflowPolicy::Block));
        queue.put(1, None);
        let consumer = {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(30));
                queue.try_get()
            })
        };
        assert!(queue.put(2, Some(Duration::MAX)));
        assert_eq!(consumer.join().ok().flatten(), Some(1));

        assert_eq!(queue.try_get(), Some(2));

        let producer = {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(30));
                queue.put(3, None)
            })
        };
        assert_eq!(queue.get(Some(Duration::MAX)), Some(3));
        assert!(producer.join().unwrap_or(false));
        assert_eq!(queue.drop_count(), 0);
    }

    #[test]
    fn short_names_strip_paths_and_generics() {
        assert_eq!(short_type_name::<String>(), "String");
        assert_eq!(short_type_name::<Vec<u8>>(), "Vec");
    }
}
