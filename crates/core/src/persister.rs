//! Persistence controller: throttled saves on cache change, one-time restore.
//!
//! [`attach`] wires a cache to a storage backend in two independent phases:
//!
//! 1. **Save subscription.** A throttled listener is registered with the
//!    cache. When the throttle fires it dehydrates the cache *at that
//!    moment*, wraps the snapshot in a [`PersistedEnvelope`] and writes it
//!    under the storage key. Save failures are logged and dropped so the
//!    cache's notification pipeline is never interrupted.
//! 2. **Restore.** The key is read once. An absent entry is a silent no-op.
//!    Otherwise the [invalidation policy](crate::policy::decide) decides: a
//!    valid envelope is hydrated back into the cache, anything else is
//!    removed from storage.
//!
//! Without a storage backend nothing happens at all.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Serialize, de::DeserializeOwned};
use tracing::{debug, info, warn};

use crate::Error;
use crate::clock::{Clock, SystemClock};
use crate::config::PersistOptions;
use crate::envelope::PersistedEnvelope;
use crate::policy::{Decision, DiscardReason, decide};
use crate::storage::Storage;
use crate::throttle::Throttle;

/// Change listener registered with a cache. Carries no payload.
pub type Listener = Arc<dyn Fn() + Send + Sync>;

/// The cache being persisted.
///
/// Only the change-notification hook and the (de)hydrate pair are needed;
/// the snapshot type is opaque to this crate.
pub trait QueryCache: Send + Sync + 'static {
    /// Serializable snapshot of the cache.
    type State: Serialize + DeserializeOwned + Send + 'static;

    /// Register `listener` to be called after every cache mutation.
    fn subscribe(&self, listener: Listener);

    /// Produce a snapshot of the current cache contents.
    fn dehydrate(&self) -> Self::State;

    /// Load a snapshot into the live cache.
    fn hydrate(&self, state: Self::State);
}

/// Result of the restore phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// No storage backend was supplied.
    NoStorage,
    /// Nothing stored under the key.
    Empty,
    /// Envelope hydrated into the cache.
    Restored,
    /// Envelope rejected and removed from storage.
    Discarded(DiscardReason),
}

/// Handle to a registered save subscription.
///
/// Dropping the handle leaves the subscription running; it lives as long as
/// the cache. Call [`cancel`](Self::cancel) to stop further saves.
#[derive(Debug)]
pub struct SaveSubscription {
    active: Arc<AtomicBool>,
    throttle: Throttle,
}

impl SaveSubscription {
    /// Stop saving. A write already scheduled is skipped.
    pub fn cancel(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn throttle(&self) -> &Throttle {
        &self.throttle
    }
}

/// Both phases of an attach.
#[derive(Debug)]
pub struct Attachment {
    pub outcome: RestoreOutcome,
    pub subscription: SaveSubscription,
}

/// Persists one cache to one storage key.
#[derive(Clone)]
pub struct QueryPersister {
    storage: Arc<dyn Storage>,
    options: PersistOptions,
    clock: Arc<dyn Clock>,
    write_lock: Arc<tokio::sync::Mutex<()>>,
}

impl std::fmt::Debug for QueryPersister {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryPersister").field("options", &self.options).finish_non_exhaustive()
    }
}

impl QueryPersister {
    pub fn new(storage: Arc<dyn Storage>, options: PersistOptions) -> Self {
        Self { storage, options, clock: Arc::new(SystemClock::new()), write_lock: Arc::default() }
    }

    /// Replace the clock used to stamp and age envelopes.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn options(&self) -> &PersistOptions {
        &self.options
    }

    /// Register the throttled save subscription, then restore once.
    ///
    /// The subscription is in place before the restore read starts and stays
    /// registered even if the restore fails.
    pub async fn attach<C: QueryCache>(&self, cache: &Arc<C>) -> Result<Attachment, Error> {
        let subscription = self.subscribe(cache)?;
        let outcome = self.restore(cache.as_ref()).await?;
        Ok(Attachment { outcome, subscription })
    }

    /// Register a throttled listener that saves the cache on change.
    ///
    /// The listener holds the cache weakly; once the cache is dropped a
    /// pending write finds nothing to save.
    ///
    /// # Errors
    ///
    /// Returns `Error::NoRuntime` outside a tokio runtime.
    pub fn subscribe<C: QueryCache>(&self, cache: &Arc<C>) -> Result<SaveSubscription, Error> {
        let active = Arc::new(AtomicBool::new(true));

        let weak = Arc::downgrade(cache);
        let persister = self.clone();
        let still_active = Arc::clone(&active);
        let throttle = Throttle::new(self.options.throttle_time(), move || {
            let blob = if still_active.load(Ordering::SeqCst) {
                weak.upgrade().map(|cache| persister.encode(cache.as_ref()))
            } else {
                None
            };

            let persister = persister.clone();
            async move {
                match blob {
                    Some(Ok(blob)) => {
                        if let Err(e) = persister.write(blob).await {
                            warn!(key = %persister.options.storage_key, error = %e, "failed to persist cache");
                        }
                    }
                    Some(Err(e)) => {
                        warn!(key = %persister.options.storage_key, error = %e, "failed to encode cache snapshot");
                    }
                    None => debug!(key = %persister.options.storage_key, "save skipped, subscription inactive"),
                }
            }
        })?;

        let listener_throttle = throttle.clone();
        let listener_active = Arc::clone(&active);
        cache.subscribe(Arc::new(move || {
            if listener_active.load(Ordering::SeqCst) {
                listener_throttle.invoke();
            }
        }));

        debug!(
            key = %self.options.storage_key,
            throttle_ms = self.options.throttle_time_ms,
            "save subscription registered"
        );

        Ok(SaveSubscription { active, throttle })
    }

    /// Read the stored envelope once and restore or discard it.
    ///
    /// # Errors
    ///
    /// Storage failures propagate; the cache is left untouched.
    pub async fn restore<C: QueryCache>(&self, cache: &C) -> Result<RestoreOutcome, Error> {
        let key = &self.options.storage_key;

        let raw = match self.storage.get_item(key).await? {
            Some(raw) if !raw.is_empty() => raw,
            _ => {
                debug!(%key, "no persisted cache");
                return Ok(RestoreOutcome::Empty);
            }
        };

        let envelope = match PersistedEnvelope::<C::State>::from_json(&raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(%key, error = %e, "persisted cache is malformed");
                return self.discard(DiscardReason::Malformed).await;
            }
        };

        let now = self.clock.now_ms();
        match decide(Some(&envelope), now, self.options.max_age_ms, &self.options.buster) {
            Decision::Restore => {
                let age_ms = envelope.written_at().map(|ts| now - ts);
                cache.hydrate(envelope.cache_state);
                info!(%key, ?age_ms, "restored persisted cache");
                Ok(RestoreOutcome::Restored)
            }
            Decision::Discard(reason) => self.discard(reason).await,
        }
    }

    /// Write the current cache state immediately, bypassing the throttle.
    pub async fn save<C: QueryCache>(&self, cache: &C) -> Result<(), Error> {
        let blob = self.encode(cache)?;
        self.write(blob).await
    }

    /// Delete the persisted entry.
    pub async fn remove(&self) -> Result<(), Error> {
        self.storage.remove_item(&self.options.storage_key).await
    }

    fn encode<C: QueryCache>(&self, cache: &C) -> Result<String, Error> {
        PersistedEnvelope::new(self.clock.now_ms(), self.options.buster.clone(), cache.dehydrate()).to_json()
    }

    /// Writes from one persister and its clones land in the order their
    /// snapshots were taken; a slow write is never overtaken by a newer one.
    async fn write(&self, blob: String) -> Result<(), Error> {
        let _serialized = self.write_lock.lock().await;
        debug!(key = %self.options.storage_key, bytes = blob.len(), "persisting cache");
        self.storage.set_item(&self.options.storage_key, blob).await
    }

    async fn discard(&self, reason: DiscardReason) -> Result<RestoreOutcome, Error> {
        info!(key = %self.options.storage_key, %reason, "discarding persisted cache");
        self.remove().await?;
        Ok(RestoreOutcome::Discarded(reason))
    }
}

/// Persist `cache` to `storage` and restore it once.
///
/// With `storage` absent this is a no-op returning
/// [`RestoreOutcome::NoStorage`]: no subscription, no storage calls. The
/// save subscription outlives this call.
pub async fn attach<C: QueryCache>(
    cache: &Arc<C>, storage: Option<Arc<dyn Storage>>, options: PersistOptions,
) -> Result<RestoreOutcome, Error> {
    let Some(storage) = storage else {
        debug!("no storage backend, persistence disabled");
        return Ok(RestoreOutcome::NoStorage);
    };

    let attachment = QueryPersister::new(storage, options).attach(cache).await?;
    Ok(attachment.outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::storage::{MemoryStorage, SyncAdapter, SyncStorage};
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::time::Instant;

    const NOW: i64 = 1_700_000_000_000;

    /// Minimal cache holding one JSON value.
    #[derive(Default)]
    struct TestCache {
        state: Mutex<Value>,
        listeners: Mutex<Vec<Listener>>,
        hydrated: Mutex<Vec<Value>>,
    }

    impl TestCache {
        fn new(state: Value) -> Arc<Self> {
            Arc::new(Self { state: Mutex::new(state), ..Default::default() })
        }

        /// Change state and notify listeners.
        fn mutate(&self, state: Value) {
            self.set_quietly(state);
            let listeners = self.listeners.lock().unwrap().clone();
            for listener in listeners {
                listener();
            }
        }

        fn set_quietly(&self, state: Value) {
            *self.state.lock().unwrap() = state;
        }

        fn listener_count(&self) -> usize {
            self.listeners.lock().unwrap().len()
        }

        fn hydrated(&self) -> Vec<Value> {
            self.hydrated.lock().unwrap().clone()
        }
    }

    impl QueryCache for TestCache {
        type State = Value;

        fn subscribe(&self, listener: Listener) {
            self.listeners.lock().unwrap().push(listener);
        }

        fn dehydrate(&self) -> Value {
            self.state.lock().unwrap().clone()
        }

        fn hydrate(&self, state: Value) {
            self.hydrated.lock().unwrap().push(state.clone());
            *self.state.lock().unwrap() = state;
        }
    }

    /// Storage that records every call.
    #[derive(Default)]
    struct RecordingStorage {
        inner: SyncAdapter<MemoryStorage>,
        gets: AtomicUsize,
        removes: AtomicUsize,
        writes: Mutex<Vec<(Instant, String)>>,
        fail_reads: bool,
        fail_writes: bool,
        slow_first_write: Option<Duration>,
    }

    impl RecordingStorage {
        fn with_item(key: &str, value: &str) -> Self {
            let storage = Self::default();
            storage.inner.inner().set_item(key, value.to_string()).unwrap();
            storage
        }

        fn gets(&self) -> usize {
            self.gets.load(Ordering::SeqCst)
        }

        fn removes(&self) -> usize {
            self.removes.load(Ordering::SeqCst)
        }

        fn writes(&self) -> Vec<(Instant, String)> {
            self.writes.lock().unwrap().clone()
        }

        fn stored(&self, key: &str) -> Option<String> {
            self.inner.inner().get_item(key).unwrap()
        }
    }

    #[async_trait]
    impl Storage for RecordingStorage {
        async fn get_item(&self, key: &str) -> Result<Option<String>, Error> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            if self.fail_reads {
                return Err(Error::Storage("read refused".into()));
            }
            self.inner.get_item(key).await
        }

        async fn set_item(&self, key: &str, value: String) -> Result<(), Error> {
            let first = {
                let mut writes = self.writes.lock().unwrap();
                writes.push((Instant::now(), value.clone()));
                writes.len() == 1
            };
            if let Some(delay) = self.slow_first_write.filter(|_| first) {
                tokio::time::sleep(delay).await;
            }
            if self.fail_writes {
                return Err(Error::Storage("quota exceeded".into()));
            }
            self.inner.set_item(key, value).await
        }

        async fn remove_item(&self, key: &str) -> Result<(), Error> {
            self.removes.fetch_add(1, Ordering::SeqCst);
            self.inner.remove_item(key).await
        }
    }

    fn envelope_json(timestamp: i64, buster: &str, state: Value) -> String {
        PersistedEnvelope::new(timestamp, buster, state).to_json().unwrap()
    }

    fn persister(storage: &Arc<RecordingStorage>, options: PersistOptions) -> QueryPersister {
        let storage: Arc<dyn Storage> = storage.clone();
        QueryPersister::new(storage, options).with_clock(Arc::new(FixedClock::new(NOW)))
    }

    fn key() -> String {
        PersistOptions::default().storage_key
    }

    #[tokio::test]
    async fn test_restore_fresh_envelope() {
        let storage = Arc::new(RecordingStorage::with_item(&key(), &envelope_json(NOW - 1_000, "v1", json!("X"))));
        let cache = TestCache::new(Value::Null);

        let persister = persister(&storage, PersistOptions::default().with_buster("v1"));
        let outcome = persister.restore(cache.as_ref()).await.unwrap();

        assert_eq!(outcome, RestoreOutcome::Restored);
        assert_eq!(cache.hydrated(), vec![json!("X")]);
        assert_eq!(storage.removes(), 0);
    }

    #[tokio::test]
    async fn test_restore_expired_envelope() {
        let storage =
            Arc::new(RecordingStorage::with_item(&key(), &envelope_json(NOW - 90_000_000, "v1", json!("X"))));
        let cache = TestCache::new(Value::Null);

        let persister = persister(&storage, PersistOptions::default().with_buster("v1"));
        let outcome = persister.restore(cache.as_ref()).await.unwrap();

        assert_eq!(outcome, RestoreOutcome::Discarded(DiscardReason::Expired));
        assert!(cache.hydrated().is_empty());
        assert_eq!(storage.removes(), 1);
        assert!(storage.stored(&key()).is_none());
    }

    #[tokio::test]
    async fn test_restore_busted_envelope() {
        let storage = Arc::new(RecordingStorage::with_item(&key(), &envelope_json(NOW - 1_000, "v1", json!("X"))));
        let cache = TestCache::new(Value::Null);

        let persister = persister(&storage, PersistOptions::default().with_buster("v2"));
        let outcome = persister.restore(cache.as_ref()).await.unwrap();

        assert_eq!(outcome, RestoreOutcome::Discarded(DiscardReason::Busted));
        assert!(cache.hydrated().is_empty());
        assert_eq!(storage.removes(), 1);
    }

    #[tokio::test]
    async fn test_restore_absent_key_short_circuits() {
        let storage = Arc::new(RecordingStorage::default());
        let cache = TestCache::new(Value::Null);

        let outcome = persister(&storage, PersistOptions::default()).restore(cache.as_ref()).await.unwrap();

        assert_eq!(outcome, RestoreOutcome::Empty);
        assert_eq!(storage.gets(), 1);
        assert_eq!(storage.removes(), 0);
        assert!(cache.hydrated().is_empty());
    }

    #[tokio::test]
    async fn test_restore_empty_value_short_circuits() {
        let storage = Arc::new(RecordingStorage::with_item(&key(), ""));
        let cache = TestCache::new(Value::Null);

        let outcome = persister(&storage, PersistOptions::default()).restore(cache.as_ref()).await.unwrap();

        assert_eq!(outcome, RestoreOutcome::Empty);
        assert_eq!(storage.removes(), 0);
    }

    #[tokio::test]
    async fn test_restore_legacy_entry_without_timestamp() {
        let storage = Arc::new(RecordingStorage::with_item(&key(), r#"{"buster":"","cacheState":"X"}"#));
        let cache = TestCache::new(Value::Null);

        let outcome = persister(&storage, PersistOptions::default()).restore(cache.as_ref()).await.unwrap();

        assert_eq!(outcome, RestoreOutcome::Discarded(DiscardReason::MissingTimestamp));
        assert_eq!(storage.removes(), 1);
        assert!(cache.hydrated().is_empty());
    }

    #[tokio::test]
    async fn test_restore_unparseable_entry_is_removed() {
        let storage = Arc::new(RecordingStorage::with_item(&key(), "{not json"));
        let cache = TestCache::new(Value::Null);

        let outcome = persister(&storage, PersistOptions::default()).restore(cache.as_ref()).await.unwrap();

        assert_eq!(outcome, RestoreOutcome::Discarded(DiscardReason::Malformed));
        assert_eq!(storage.removes(), 1);
        assert!(storage.stored(&key()).is_none());
    }

    #[tokio::test]
    async fn test_restore_read_failure_propagates() {
        let storage = Arc::new(RecordingStorage { fail_reads: true, ..Default::default() });
        let cache = TestCache::new(json!("live"));

        let result = persister(&storage, PersistOptions::default()).restore(cache.as_ref()).await;

        assert!(matches!(result, Err(Error::Storage(_))));
        assert!(cache.hydrated().is_empty());
        assert_eq!(cache.dehydrate(), json!("live"));
    }

    #[tokio::test]
    async fn test_attach_without_storage_is_noop() {
        let cache = TestCache::new(Value::Null);

        let outcome = attach(&cache, None, PersistOptions::default()).await.unwrap();

        assert_eq!(outcome, RestoreOutcome::NoStorage);
        assert_eq!(cache.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_attach_subscribes_and_restores() {
        let storage = Arc::new(RecordingStorage::with_item(&key(), &envelope_json(NOW - 1_000, "", json!({"a": 1}))));
        let cache = TestCache::new(Value::Null);

        let attachment = persister(&storage, PersistOptions::default()).attach(&cache).await.unwrap();

        assert_eq!(attachment.outcome, RestoreOutcome::Restored);
        assert!(attachment.subscription.is_active());
        assert_eq!(cache.listener_count(), 1);
        assert_eq!(storage.gets(), 1);
        assert_eq!(cache.dehydrate(), json!({"a": 1}));
    }

    #[tokio::test]
    async fn test_attach_keeps_subscription_when_restore_fails() {
        let storage = Arc::new(RecordingStorage { fail_reads: true, ..Default::default() });
        let cache = TestCache::new(Value::Null);

        let result = persister(&storage, PersistOptions::default()).attach(&cache).await;

        assert!(result.is_err());
        assert_eq!(cache.listener_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_of_changes_writes_once_with_fire_time_state() {
        let storage = Arc::new(RecordingStorage::default());
        let cache = TestCache::new(json!(0));
        let storage_dyn: Arc<dyn Storage> = storage.clone();

        let options = PersistOptions::default().with_throttle_time_ms(1_000).with_buster("v1");
        attach(&cache, Some(storage_dyn), options).await.unwrap();

        let start = Instant::now();
        cache.mutate(json!(1));
        tokio::time::sleep(Duration::from_millis(10)).await;
        cache.mutate(json!(2));
        tokio::time::sleep(Duration::from_millis(10)).await;
        cache.mutate(json!(3));
        tokio::time::sleep(Duration::from_millis(480)).await;
        cache.set_quietly(json!(4));

        tokio::time::sleep(Duration::from_millis(1_500)).await;

        let writes = storage.writes();
        assert_eq!(writes.len(), 1);

        let elapsed = writes[0].0 - start;
        assert!(elapsed >= Duration::from_millis(1_000) && elapsed < Duration::from_millis(1_050), "{elapsed:?}");

        let written: PersistedEnvelope<Value> = PersistedEnvelope::from_json(&writes[0].1).unwrap();
        assert_eq!(written.cache_state, json!(4));
        assert_eq!(written.buster, "v1");
        assert!(written.written_at().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_then_save_round_trip() {
        let storage = Arc::new(RecordingStorage::default());
        let options = PersistOptions::default().with_throttle_time_ms(100);

        let first = TestCache::new(json!({"todos": [1, 2]}));
        persister(&storage, options.clone()).attach(&first).await.unwrap();
        first.mutate(json!({"todos": [1, 2, 3]}));
        tokio::time::sleep(Duration::from_millis(200)).await;

        let second = TestCache::new(Value::Null);
        let attachment = persister(&storage, options).attach(&second).await.unwrap();

        assert_eq!(attachment.outcome, RestoreOutcome::Restored);
        assert_eq!(second.dehydrate(), json!({"todos": [1, 2, 3]}));
    }

    #[tokio::test(start_paused = true)]
    async fn test_save_failure_does_not_stop_subscription() {
        let storage = Arc::new(RecordingStorage { fail_writes: true, ..Default::default() });
        let cache = TestCache::new(json!(0));

        persister(&storage, PersistOptions::default()).attach(&cache).await.unwrap();

        cache.mutate(json!(1));
        tokio::time::sleep(Duration::from_millis(1_100)).await;
        cache.mutate(json!(2));
        tokio::time::sleep(Duration::from_millis(1_100)).await;

        assert_eq!(storage.writes().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_write_is_not_overtaken() {
        let storage = Arc::new(RecordingStorage { slow_first_write: Some(Duration::from_secs(5)), ..Default::default() });
        let cache = TestCache::new(json!(0));

        persister(&storage, PersistOptions::default().with_throttle_time_ms(100)).attach(&cache).await.unwrap();

        cache.mutate(json!(1));
        tokio::time::sleep(Duration::from_millis(200)).await;
        cache.mutate(json!(2));
        tokio::time::sleep(Duration::from_secs(6)).await;

        let writes = storage.writes();
        assert_eq!(writes.len(), 2);
        assert!(writes[1].0 >= writes[0].0 + Duration::from_secs(5));

        let stored: PersistedEnvelope<Value> = PersistedEnvelope::from_json(&storage.stored(&key()).unwrap()).unwrap();
        assert_eq!(stored.cache_state, json!(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_skips_pending_write() {
        let storage = Arc::new(RecordingStorage::default());
        let cache = TestCache::new(json!(0));

        let attachment = persister(&storage, PersistOptions::default()).attach(&cache).await.unwrap();

        cache.mutate(json!(1));
        attachment.subscription.cancel();
        tokio::time::sleep(Duration::from_millis(1_100)).await;
        cache.mutate(json!(2));
        tokio::time::sleep(Duration::from_millis(1_100)).await;

        assert!(storage.writes().is_empty());
        assert!(!attachment.subscription.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_cache_skips_pending_write() {
        let storage = Arc::new(RecordingStorage::default());
        let cache = TestCache::new(json!(0));

        persister(&storage, PersistOptions::default()).attach(&cache).await.unwrap();
        cache.mutate(json!(1));
        drop(cache);

        tokio::time::sleep(Duration::from_millis(1_100)).await;
        assert!(storage.writes().is_empty());
    }

    #[tokio::test]
    async fn test_save_and_remove() {
        let storage = Arc::new(RecordingStorage::default());
        let cache = TestCache::new(json!({"q": "x"}));
        let persister = persister(&storage, PersistOptions::default().with_buster("v9"));

        persister.save(cache.as_ref()).await.unwrap();
        let stored: PersistedEnvelope<Value> = PersistedEnvelope::from_json(&storage.stored(&key()).unwrap()).unwrap();
        assert_eq!(stored, PersistedEnvelope::new(NOW, "v9", json!({"q": "x"})));

        persister.remove().await.unwrap();
        assert!(storage.stored(&key()).is_none());
    }

    #[tokio::test]
    async fn test_custom_storage_key() {
        let storage = Arc::new(RecordingStorage::default());
        let cache = TestCache::new(json!(1));
        let persister = persister(&storage, PersistOptions::default().with_storage_key("other"));

        persister.save(cache.as_ref()).await.unwrap();

        assert!(storage.stored("other").is_some());
        assert!(storage.stored(&key()).is_none());
    }
}
