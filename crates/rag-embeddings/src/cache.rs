//! Bounded cache of loaded embedding models.
//!
//! ## Key Design Principles
//!
//! - **Single-flight loads**: concurrent `acquire` calls for an absent model
//!   share one load; every waiter gets the same model or the same error
//! - **Reference-counted checkout**: a [`ModelHandle`] pins its model; eviction
//!   only ever removes unreferenced entries
//! - **Lazy eviction**: TTL and capacity are enforced on every `acquire` and by
//!   [`ModelCache::sweep`], never by hidden timers
//! - **Per-key locking**: slots live in a sharded map, so unrelated models do
//!   not serialize on one lock
//!
//! Failed loads are not remembered; the next `acquire` retries.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use rag_types::SharedClock;
use tracing::{debug, info, warn};

use crate::error::EmbeddingError;
use crate::loader::ModelLoader;
use crate::model::{Embedding, EmbeddingModel, ModelInfo};

type LoadResult = Result<Arc<dyn EmbeddingModel>, String>;
type SharedLoad = Shared<BoxFuture<'static, LoadResult>>;

/// Cache sizing and expiry.
#[derive(Debug, Clone)]
pub struct ModelCacheConfig {
    /// Maximum resident models
    pub capacity: usize,
    /// Idle time after which an unreferenced model is evicted
    pub ttl: Duration,
}

impl Default for ModelCacheConfig {
    fn default() -> Self {
        Self {
            capacity: 4,
            ttl: Duration::from_secs(3600),
        }
    }
}

/// Snapshot of cache state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelCacheStats {
    /// Loaded models
    pub resident: usize,
    /// Loads in flight
    pub loading: usize,
    /// Outstanding checkouts across all models
    pub total_refs: usize,
    /// Sum of resident model weights
    pub total_weight: usize,
    /// Loads started since creation
    pub loads: u64,
    /// Models evicted since creation
    pub evictions: u64,
}

struct Resident {
    model: Arc<dyn EmbeddingModel>,
    loaded_at_ms: i64,
    last_access_ms: i64,
    refs: usize,
}

enum Slot {
    Loading { generation: u64, load: SharedLoad },
    Ready(Resident),
}

struct Inner {
    slots: DashMap<String, Slot>,
    loader: Arc<dyn ModelLoader>,
    clock: SharedClock,
    config: ModelCacheConfig,
    generation: AtomicU64,
    loads: AtomicU64,
    evictions: AtomicU64,
}

impl Inner {
    fn now(&self) -> i64 {
        self.clock.now_ms()
    }

    fn release(&self, model_id: &str) {
        let now = self.now();
        if let Some(mut slot) = self.slots.get_mut(model_id) {
            if let Slot::Ready(resident) = slot.value_mut() {
                resident.refs = resident.refs.saturating_sub(1);
                resident.last_access_ms = now;
                debug!(model_id, refs = resident.refs, "Released model");
            }
        }
    }
}

/// Outcome of looking a model up under its slot lock.
enum Checkout {
    Ready(ModelHandle),
    Wait { generation: u64, load: SharedLoad },
}

/// Process-wide cache of embedding models.
///
/// Cloning is cheap; clones share the same slots.
#[derive(Clone)]
pub struct ModelCache {
    inner: Arc<Inner>,
}

impl ModelCache {
    pub fn new(loader: Arc<dyn ModelLoader>, config: ModelCacheConfig, clock: SharedClock) -> Self {
        Self {
            inner: Arc::new(Inner {
                slots: DashMap::new(),
                loader,
                clock,
                config,
                generation: AtomicU64::new(0),
                loads: AtomicU64::new(0),
                evictions: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &ModelCacheConfig {
        &self.inner.config
    }

    /// Check out a model, loading it if absent.
    ///
    /// Refreshes the model's last-access time and pins it until the returned
    /// handle is dropped. Suspends while a load for the same id is in flight.
    pub async fn acquire(&self, model_id: &str) -> Result<ModelHandle, EmbeddingError> {
        if model_id.trim().is_empty() {
            return Err(EmbeddingError::InvalidInput("empty model id".to_string()));
        }

        self.sweep();

        loop {
            let (generation, load) = match self.checkout_or_start(model_id) {
                Checkout::Ready(handle) => return Ok(handle),
                Checkout::Wait { generation, load } => (generation, load),
            };

            let result = load.await;

            if let Some(outcome) = self.complete_load(model_id, generation, result) {
                return outcome;
            }
            // Our flight was superseded by a newer one; join that instead.
        }
    }

    /// Return a checkout. Equivalent to dropping the handle.
    pub fn release(&self, handle: ModelHandle) {
        drop(handle);
    }

    fn checkout_or_start(&self, model_id: &str) -> Checkout {
        let now = self.inner.now();
        match self.inner.slots.entry(model_id.to_string()) {
            Entry::Occupied(mut entry) => match entry.get_mut() {
                Slot::Ready(resident) => {
                    resident.refs += 1;
                    resident.last_access_ms = now;
                    Checkout::Ready(self.handle(model_id, resident))
                }
                Slot::Loading { generation, load } => {
                    debug!(model_id, "Joining in-flight model load");
                    Checkout::Wait {
                        generation: *generation,
                        load: load.clone(),
                    }
                }
            },
            Entry::Vacant(entry) => {
                let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed) + 1;
                let load = self.start_load(model_id);
                entry.insert(Slot::Loading {
                    generation,
                    load: load.clone(),
                });
                Checkout::Wait { generation, load }
            }
        }
    }

    fn start_load(&self, model_id: &str) -> SharedLoad {
        self.inner.loads.fetch_add(1, Ordering::Relaxed);
        info!(model_id, "Loading embedding model");

        let loader = Arc::clone(&self.inner.loader);
        let id = model_id.to_string();
        // Spawned so the load finishes even if every waiter is cancelled.
        let task = tokio::task::spawn_blocking(move || loader.load(&id));

        async move {
            match task.await {
                Ok(Ok(model)) => Ok(model),
                Ok(Err(e)) => Err(e.to_string()),
                Err(e) => Err(format!("load task failed: {e}")),
            }
        }
        .boxed()
        .shared()
    }

    /// Install a finished load. `None` means the slot now belongs to a newer
    /// flight and the caller should start over.
    fn complete_load(
        &self,
        model_id: &str,
        generation: u64,
        result: LoadResult,
    ) -> Option<Result<ModelHandle, EmbeddingError>> {
        let now = self.inner.now();

        let model = match result {
            Ok(model) => model,
            Err(reason) => {
                let removed = self.inner.slots.remove_if(model_id, |_, slot| {
                    matches!(slot, Slot::Loading { generation: g, .. } if *g == generation)
                });
                if removed.is_some() {
                    warn!(model_id, %reason, "Model load failed");
                }
                return Some(Err(EmbeddingError::ModelUnavailable {
                    model_id: model_id.to_string(),
                    reason,
                }));
            }
        };

        let handle = match self.inner.slots.entry(model_id.to_string()) {
            Entry::Occupied(mut entry) => match entry.get_mut() {
                Slot::Ready(resident) => {
                    resident.refs += 1;
                    resident.last_access_ms = now;
                    self.handle(model_id, resident)
                }
                Slot::Loading { generation: g, .. } if *g == generation => {
                    let resident = Resident {
                        model,
                        loaded_at_ms: now,
                        last_access_ms: now,
                        refs: 1,
                    };
                    let handle = self.handle(model_id, &resident);
                    entry.insert(Slot::Ready(resident));
                    info!(model_id, "Model resident");
                    handle
                }
                Slot::Loading { .. } => return None,
            },
            // Loaded, then evicted before this waiter woke up.
            Entry::Vacant(entry) => {
                let resident = Resident {
                    model,
                    loaded_at_ms: now,
                    last_access_ms: now,
                    refs: 1,
                };
                let handle = self.handle(model_id, &resident);
                entry.insert(Slot::Ready(resident));
                handle
            }
        };

        self.enforce_capacity();
        Some(Ok(handle))
    }

    fn handle(&self, model_id: &str, resident: &Resident) -> ModelHandle {
        ModelHandle {
            model_id: model_id.to_string(),
            model: Arc::clone(&resident.model),
            loaded_at_ms: resident.loaded_at_ms,
            cache: Arc::clone(&self.inner),
        }
    }

    /// Evict idle models, then enforce capacity. Returns evicted count.
    pub fn sweep(&self) -> usize {
        let now = self.inner.now();
        let ttl_ms = self.inner.config.ttl.as_millis() as i64;
        let mut expired = 0usize;

        self.inner.slots.retain(|model_id, slot| match slot {
            Slot::Ready(resident) if resident.refs == 0 && now - resident.last_access_ms > ttl_ms => {
                debug!(model_id = %model_id, "Evicting idle model");
                expired += 1;
                false
            }
            _ => true,
        });

        if expired > 0 {
            self.inner
                .evictions
                .fetch_add(expired as u64, Ordering::Relaxed);
            info!(expired, "Evicted idle models");
        }

        expired + self.enforce_capacity()
    }

    /// Evict least-recently-used unreferenced models until within capacity.
    fn enforce_capacity(&self) -> usize {
        let mut evicted = 0usize;

        loop {
            let resident = self
                .inner
                .slots
                .iter()
                .filter(|e| matches!(e.value(), Slot::Ready(_)))
                .count();
            if resident <= self.inner.config.capacity {
                break;
            }

            // Oldest access first; ties go to the oldest load.
            let victim = self
                .inner
                .slots
                .iter()
                .filter_map(|e| match e.value() {
                    Slot::Ready(r) if r.refs == 0 => {
                        Some((r.last_access_ms, r.loaded_at_ms, e.key().clone()))
                    }
                    _ => None,
                })
                .min();

            let Some((_, _, model_id)) = victim else {
                warn!(
                    resident,
                    capacity = self.inner.config.capacity,
                    "Model cache over capacity; all models are checked out"
                );
                break;
            };

            let removed = self
                .inner
                .slots
                .remove_if(&model_id, |_, slot| matches!(slot, Slot::Ready(r) if r.refs == 0));
            if removed.is_some() {
                evicted += 1;
                self.inner.evictions.fetch_add(1, Ordering::Relaxed);
                info!(model_id = %model_id, "Evicted model over capacity");
            }
        }

        evicted
    }

    /// Outstanding checkouts for a resident model.
    pub fn ref_count(&self, model_id: &str) -> Option<usize> {
        self.inner.slots.get(model_id).and_then(|slot| match slot.value() {
            Slot::Ready(resident) => Some(resident.refs),
            Slot::Loading { .. } => None,
        })
    }

    pub fn is_resident(&self, model_id: &str) -> bool {
        self.ref_count(model_id).is_some()
    }

    pub fn stats(&self) -> ModelCacheStats {
        let mut stats = ModelCacheStats {
            loads: self.inner.loads.load(Ordering::Relaxed),
            evictions: self.inner.evictions.load(Ordering::Relaxed),
            ..Default::default()
        };
        for entry in self.inner.slots.iter() {
            match entry.value() {
                Slot::Ready(resident) => {
                    stats.resident += 1;
                    stats.total_refs += resident.refs;
                    stats.total_weight += resident.model.weight();
                }
                Slot::Loading { .. } => stats.loading += 1,
            }
        }
        stats
    }

    /// Run [`sweep`](Self::sweep) on a fixed interval until the task is aborted.
    pub fn spawn_sweeper(&self, every: Duration) -> tokio::task::JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let evicted = cache.sweep();
                if evicted > 0 {
                    debug!(evicted, "Model sweep complete");
                }
            }
        })
    }
}

/// A checked-out model. Dropping it releases the checkout.
pub struct ModelHandle {
    model_id: String,
    model: Arc<dyn EmbeddingModel>,
    loaded_at_ms: i64,
    cache: Arc<Inner>,
}

impl ModelHandle {
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn model(&self) -> &Arc<dyn EmbeddingModel> {
        &self.model
    }

    pub fn info(&self) -> &ModelInfo {
        self.model.info()
    }

    pub fn loaded_at_ms(&self) -> i64 {
        self.loaded_at_ms
    }

    /// Embed on the current thread. Prefer running this off the async runtime.
    pub fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        self.model.embed(text)
    }
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle")
            .field("model_id", &self.model_id)
            .field("loaded_at_ms", &self.loaded_at_ms)
            .finish()
    }
}

impl Drop for ModelHandle {
    fn drop(&mut self) {
        self.cache.release(&self.model_id);
    }
}
