//! Deduplicating, reference-counted model cache.
//!
//! One slot per [`Fingerprint`]:
//!
//! - `Loading`: a single shared load future plus the number of callers
//!   waiting on it. Later callers join the same future instead of loading
//!   again.
//! - `Ready`: the loaded handle plus its reference count. Hits bump the count
//!   and return without I/O.
//!
//! Check-and-insert happens under the DashMap entry lock, so at most one load
//! per fingerprint is ever started. A failed load removes its slot so the next
//! caller retries from scratch. Every slot carries a generation number, so a
//! late completion or a cancelled waiter never touches a newer slot for the
//! same fingerprint.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crate::error::{Result, RuntimeError};
use crate::fingerprint::Fingerprint;
use crate::handle::ModelHandle;

pub type LoadResult = Result<Arc<ModelHandle>>;

type SharedLoad = Shared<BoxFuture<'static, LoadResult>>;

enum Slot {
    Loading {
        generation: u64,
        load: SharedLoad,
        waiters: usize,
    },
    Ready {
        generation: u64,
        handle: Arc<ModelHandle>,
        refs: usize,
    },
}

impl Slot {
    fn generation(&self) -> u64 {
        match self {
            Slot::Loading { generation, .. } | Slot::Ready { generation, .. } => *generation,
        }
    }
}

/// Result of releasing one reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Last reference: entry removed and handle disposed
    Released,
    /// Other holders remain
    StillShared(usize),
    /// The handle is not (or no longer) in the cache
    NotCached,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub loading: usize,
    pub ready: usize,
    /// Sum of reference counts over ready entries
    pub references: usize,
    pub loads_started: u64,
    pub hits: u64,
    /// Callers that joined an in-flight load
    pub joins: u64,
}

#[derive(Default)]
struct CacheInner {
    slots: DashMap<Fingerprint, Slot>,
    next_generation: AtomicU64,
    loads_started: AtomicU64,
    hits: AtomicU64,
    joins: AtomicU64,
}

impl CacheInner {
    /// Runs inside the shared load future once the backend load resolves.
    fn complete(&self, fingerprint: &Fingerprint, generation: u64, result: LoadResult) -> LoadResult {
        match self.slots.entry(fingerprint.clone()) {
            Entry::Occupied(mut entry) if entry.get().generation() == generation => match result {
                Ok(handle) => {
                    let waiters = match entry.get() {
                        Slot::Loading { waiters, .. } => *waiters,
                        Slot::Ready { refs, .. } => *refs,
                    };
                    entry.insert(Slot::Ready {
                        generation,
                        handle: Arc::clone(&handle),
                        refs: waiters,
                    });
                    Ok(handle)
                }
                Err(error) => {
                    entry.remove();
                    log::warn!("Load of {} failed, not cached: {}", fingerprint, error);
                    Err(error)
                }
            },
            _ => {
                // Evicted or shut down while loading
                let handle = result?;
                handle.dispose();
                Err(RuntimeError::ModelLoad {
                    fingerprint: fingerprint.short(),
                    backend: fingerprint.backend,
                    reason: "evicted while loading".to_string(),
                })
            }
        }
    }

    /// Returns the reference held by a waiter whose future was dropped.
    fn abandon(&self, fingerprint: &Fingerprint, generation: u64) {
        let removed = match self.slots.entry(fingerprint.clone()) {
            Entry::Occupied(mut entry) if entry.get().generation() == generation => {
                let remaining = match entry.get_mut() {
                    Slot::Loading { waiters, .. } => {
                        *waiters = waiters.saturating_sub(1);
                        *waiters
                    }
                    Slot::Ready { refs, .. } => {
                        *refs = refs.saturating_sub(1);
                        *refs
                    }
                };
                (remaining == 0).then(|| entry.remove())
            }
            _ => None,
        };

        match removed {
            Some(Slot::Ready { handle, .. }) => {
                handle.dispose();
            }
            Some(Slot::Loading { .. }) => {
                log::debug!("All waiters for {} gave up, load abandoned", fingerprint);
            }
            None => {}
        }
    }
}

/// Gives a waiter's reference back if its future is dropped mid-load.
struct WaiterGuard<'a> {
    inner: &'a CacheInner,
    fingerprint: &'a Fingerprint,
    generation: u64,
    armed: bool,
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.inner.abandon(self.fingerprint, self.generation);
        }
    }
}

/// Explicit, lifecycle-scoped model cache. Cloning shares the same table.
#[derive(Clone, Default)]
pub struct ModelCache {
    inner: Arc<CacheInner>,
}

impl ModelCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the handle for `fingerprint`, loading it with `loader` only if no
    /// load is cached or in flight. Each successful call owns one reference,
    /// to be returned with [`ModelCache::release`].
    pub async fn acquire<F>(&self, fingerprint: &Fingerprint, loader: F) -> LoadResult
    where
        F: FnOnce() -> BoxFuture<'static, LoadResult>,
    {
        let (generation, load) = match self.inner.slots.entry(fingerprint.clone()) {
            Entry::Occupied(mut entry) => match entry.get_mut() {
                Slot::Ready { handle, refs, .. } => {
                    *refs += 1;
                    self.inner.hits.fetch_add(1, Ordering::Relaxed);
                    log::debug!("Cache hit for {} (refs: {})", fingerprint, refs);
                    return Ok(Arc::clone(handle));
                }
                Slot::Loading {
                    generation,
                    load,
                    waiters,
                } => {
                    *waiters += 1;
                    self.inner.joins.fetch_add(1, Ordering::Relaxed);
                    log::debug!("Joining in-flight load of {} (waiters: {})", fingerprint, waiters);
                    (*generation, load.clone())
                }
            },
            Entry::Vacant(entry) => {
                let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
                self.inner.loads_started.fetch_add(1, Ordering::Relaxed);
                let load = Self::track(
                    Arc::downgrade(&self.inner),
                    fingerprint.clone(),
                    generation,
                    loader(),
                );
                entry.insert(Slot::Loading {
                    generation,
                    load: load.clone(),
                    waiters: 1,
                });
                (generation, load)
            }
        };

        let mut guard = WaiterGuard {
            inner: &self.inner,
            fingerprint,
            generation,
            armed: true,
        };
        let result = load.await;
        guard.armed = false;
        result
    }

    /// Take a reference to `fingerprint` only if it is already loaded.
    /// Never starts or joins a load.
    pub fn acquire_ready(&self, fingerprint: &Fingerprint) -> Option<Arc<ModelHandle>> {
        let mut slot = self.inner.slots.get_mut(fingerprint)?;
        match slot.value_mut() {
            Slot::Ready { handle, refs, .. } => {
                *refs += 1;
                self.inner.hits.fetch_add(1, Ordering::Relaxed);
                log::debug!("Cache hit for {} (refs: {})", fingerprint, refs);
                Some(Arc::clone(handle))
            }
            Slot::Loading { .. } => None,
        }
    }

    fn track(
        inner: Weak<CacheInner>,
        fingerprint: Fingerprint,
        generation: u64,
        load: BoxFuture<'static, LoadResult>,
    ) -> SharedLoad {
        async move {
            let result = load.await;
            match inner.upgrade() {
                Some(inner) => inner.complete(&fingerprint, generation, result),
                None => {
                    let handle = result?;
                    handle.dispose();
                    Err(RuntimeError::ModelLoad {
                        fingerprint: fingerprint.short(),
                        backend: fingerprint.backend,
                        reason: "model cache dropped while loading".to_string(),
                    })
                }
            }
        }
        .boxed()
        .shared()
    }

    /// Drop one reference. The handle is disposed when the count reaches zero.
    pub fn release(&self, handle: &ModelHandle) -> ReleaseOutcome {
        let fingerprint = handle.fingerprint();
        let (outcome, removed) = match self.inner.slots.entry(fingerprint.clone()) {
            Entry::Occupied(mut entry) => {
                let remaining = match entry.get_mut() {
                    Slot::Ready {
                        handle: cached,
                        refs,
                        ..
                    } if cached.id() == handle.id() => {
                        *refs = refs.saturating_sub(1);
                        Some(*refs)
                    }
                    _ => None,
                };
                match remaining {
                    Some(0) => (ReleaseOutcome::Released, Some(entry.remove())),
                    Some(refs) => (ReleaseOutcome::StillShared(refs), None),
                    None => (ReleaseOutcome::NotCached, None),
                }
            }
            Entry::Vacant(_) => (ReleaseOutcome::NotCached, None),
        };

        if let Some(Slot::Ready { handle, .. }) = removed {
            log::info!("Released last reference to {}", fingerprint);
            handle.dispose();
        }
        outcome
    }

    /// Remove an entry regardless of its reference count.
    ///
    /// A ready handle is disposed; an in-flight load completes for nobody and
    /// its waiters get a `ModelLoad` error.
    pub fn evict(&self, fingerprint: &Fingerprint) -> bool {
        match self.inner.slots.remove(fingerprint) {
            Some((_, Slot::Ready { handle, refs, .. })) => {
                log::info!("Evicting {} ({} references outstanding)", fingerprint, refs);
                handle.dispose();
                true
            }
            Some((_, Slot::Loading { waiters, .. })) => {
                log::info!("Evicting in-flight load of {} ({} waiters)", fingerprint, waiters);
                true
            }
            None => false,
        }
    }

    /// Dispose every handle and clear the table
    pub fn clear(&self) -> usize {
        let fingerprints: Vec<Fingerprint> =
            self.inner.slots.iter().map(|entry| entry.key().clone()).collect();

        let mut disposed = 0;
        for fingerprint in fingerprints {
            if let Some((_, Slot::Ready { handle, .. })) = self.inner.slots.remove(&fingerprint) {
                if handle.dispose() {
                    disposed += 1;
                }
            }
        }
        disposed
    }

    /// Ready handle for `fingerprint`, without taking a reference
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<Arc<ModelHandle>> {
        match self.inner.slots.get(fingerprint)?.value() {
            Slot::Ready { handle, .. } => Some(Arc::clone(handle)),
            Slot::Loading { .. } => None,
        }
    }

    pub fn ref_count(&self, fingerprint: &Fingerprint) -> Option<usize> {
        match self.inner.slots.get(fingerprint)?.value() {
            Slot::Ready { refs, .. } => Some(*refs),
            Slot::Loading { .. } => None,
        }
    }

    pub fn is_loading(&self, fingerprint: &Fingerprint) -> bool {
        matches!(
            self.inner.slots.get(fingerprint).as_deref(),
            Some(Slot::Loading { .. })
        )
    }

    pub fn len(&self) -> usize {
        self.inner.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.slots.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        let mut stats = CacheStats {
            loads_started: self.inner.loads_started.load(Ordering::Relaxed),
            hits: self.inner.hits.load(Ordering::Relaxed),
            joins: self.inner.joins.load(Ordering::Relaxed),
            ..Default::default()
        };
        for entry in self.inner.slots.iter() {
            stats.entries += 1;
            match entry.value() {
                Slot::Loading { .. } => stats.loading += 1,
                Slot::Ready { refs, .. } => {
                    stats.ready += 1;
                    stats.references += refs;
                }
            }
        }
        stats
    }
}
