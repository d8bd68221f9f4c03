//! Scoped cache of server-owned collections.
//!
//! # Architecture
//!
//! Each [`CacheKey`] owns one slot: the last good value, a [`FetchStatus`],
//! the last failure, and a `watch` channel that broadcasts a [`Snapshot`]
//! whenever any of those change. Readers either take a snapshot ([`ScopedCache::read`]),
//! hold a [`Subscription`], or await a settled value ([`ScopedCache::fetch`]).
//!
//! # Fetch ordering
//!
//! A key has at most one fetch in flight. Each fetch carries a ticket and the
//! slot generation it started under; [`ScopedCache::invalidate`] bumps the
//! generation. [`ScopedCache::clear`] remembers the tickets of fetches it cut
//! off, and a recreated slot waits for those to return before fetching again.
//! When a fetch completes:
//!
//! - the ticket was cut off by a flush: the response is dropped and a waiting
//!   slot starts its own fetch
//! - the slot is gone (flushed): the response is dropped
//! - the ticket is not the slot's current one: the response is dropped
//! - the generation moved on: the response is dropped and, if anyone is
//!   watching or a read arrived meanwhile, a new fetch starts
//! - otherwise the result is applied and published
//!
//! The state lock is a plain `Mutex` that is never held across an `.await`.
//! Fetches run on spawned tokio tasks that hold only a weak reference to the
//! cache, so dropping the cache abandons them. The fetcher is called and the
//! settle hook ([`ScopedCache::on_settle`]) runs on that task with the lock
//! released, so both may use the cache.

mod key;

pub use key::{CacheKey, Discriminator, EntityKind, KeyPrefix};

use std::collections::HashMap;
use std::future::Future;
use std::mem;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Instant;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tally_gateway::GatewayError;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    /// Created, no fetch started yet.
    Idle,
    Fetching,
    Fresh,
    /// Invalidated; refetches on the next read, or at once when watched.
    Stale,
    /// Last fetch failed. Kept until retried or invalidated.
    Errored,
}

/// Point-in-time view of one entry.
#[derive(Debug)]
pub struct Snapshot<V> {
    /// Last successfully fetched value; survives later failures.
    pub value: Option<Arc<V>>,
    pub status: FetchStatus,
    pub error: Option<GatewayError>,
    pub fetched_at: Option<Instant>,
}

impl<V> Clone for Snapshot<V> {
    fn clone(&self) -> Self {
        Self {
            value: self.value.clone(),
            status: self.status,
            error: self.error.clone(),
            fetched_at: self.fetched_at,
        }
    }
}

impl<V> Snapshot<V> {
    fn empty() -> Self {
        Self {
            value: None,
            status: FetchStatus::Idle,
            error: None,
            fetched_at: None,
        }
    }

    /// Whether the entry has an answer for its current generation.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        matches!(self.status, FetchStatus::Fresh | FetchStatus::Errored)
    }

    fn into_result(self) -> Result<Arc<V>, CacheError> {
        match (self.status, self.value, self.error) {
            (FetchStatus::Errored, _, Some(err)) => Err(CacheError::Fetch(err)),
            (_, Some(value), _) => Ok(value),
            _ => Err(CacheError::Discarded),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    #[error(transparent)]
    Fetch(#[from] GatewayError),
    /// The entry was flushed (logout, user switch) before it settled.
    #[error("cache entry was discarded before it settled")]
    Discarded,
}

/// Produces one fetch of an entry's value.
pub type Fetcher<V> = Arc<dyn Fn() -> BoxFuture<'static, Result<V, GatewayError>> + Send + Sync>;

/// Observes every fetch result that lands in an entry.
type SettleHook<V> = Arc<dyn Fn(Result<&V, &GatewayError>) + Send + Sync>;

/// Wrap an async closure as a [`Fetcher`].
pub fn fetcher<V, F, Fut>(f: F) -> Fetcher<V>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<V, GatewayError>> + Send + 'static,
{
    Arc::new(move || f().boxed())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct InFlight {
    ticket: u64,
    generation: u64,
}

struct Slot<V> {
    value: Option<Arc<V>>,
    status: FetchStatus,
    error: Option<GatewayError>,
    fetched_at: Option<Instant>,
    generation: u64,
    in_flight: Option<InFlight>,
    /// A read arrived while a superseded fetch was still running.
    wanted: bool,
    fetcher: Fetcher<V>,
    tx: watch::Sender<Snapshot<V>>,
}

impl<V> Slot<V> {
    fn new(fetcher: Fetcher<V>, generation: u64) -> Self {
        // The initial receiver is dropped so `receiver_count` counts subscribers only.
        let (tx, _) = watch::channel(Snapshot::empty());
        Self {
            value: None,
            status: FetchStatus::Idle,
            error: None,
            fetched_at: None,
            generation,
            in_flight: None,
            wanted: false,
            fetcher,
            tx,
        }
    }

    fn snapshot(&self) -> Snapshot<V> {
        Snapshot {
            value: self.value.clone(),
            status: self.status,
            error: self.error.clone(),
            fetched_at: self.fetched_at,
        }
    }

    fn publish(&self) {
        self.tx.send_replace(self.snapshot());
    }

    fn subscribers(&self) -> usize {
        self.tx.receiver_count()
    }

    fn needs_fetch(&self) -> bool {
        self.in_flight.is_none() && matches!(self.status, FetchStatus::Idle | FetchStatus::Stale)
    }
}

struct CacheState<V> {
    slots: HashMap<CacheKey, Slot<V>>,
    /// Shared source of generations and tickets. Never reused, so a slot
    /// recreated after a flush cannot match an old fetch.
    next_id: u64,
    /// Tickets of fetches still running for flushed slots.
    abandoned: HashMap<CacheKey, u64>,
    on_settle: Option<SettleHook<V>>,
}

fn bump(counter: &mut u64) -> u64 {
    *counter += 1;
    *counter
}

type Shared<V> = Arc<Mutex<CacheState<V>>>;

fn lock<V>(shared: &Mutex<CacheState<V>>) -> MutexGuard<'_, CacheState<V>> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Keyed cache with request coalescing and generation-checked invalidation.
///
/// Cloning is cheap; clones share entries. Methods that may start a fetch must
/// be called inside a tokio runtime.
pub struct ScopedCache<V> {
    state: Shared<V>,
}

impl<V> Clone for ScopedCache<V> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<V: Send + Sync + 'static> Default for ScopedCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Send + Sync + 'static> ScopedCache<V> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(CacheState {
                slots: HashMap::new(),
                next_id: 0,
                abandoned: HashMap::new(),
                on_settle: None,
            })),
        }
    }

    /// Handle that does not keep the entries alive.
    #[must_use]
    pub fn downgrade(&self) -> WeakScopedCache<V> {
        WeakScopedCache {
            state: Arc::downgrade(&self.state),
        }
    }

    /// Run `hook` with every fetch result applied to an entry, after it has
    /// been published. Replaces any earlier hook.
    pub fn on_settle(&self, hook: impl Fn(Result<&V, &GatewayError>) + Send + Sync + 'static) {
        lock(&self.state).on_settle = Some(Arc::new(hook));
    }

    /// Current entry for `key`, starting a fetch if it is missing or stale.
    ///
    /// Concurrent reads of one key share a single in-flight fetch. `fetcher`
    /// replaces the one stored for the key and is used for later refetches.
    pub fn read(&self, key: CacheKey, fetcher: Fetcher<V>) -> Snapshot<V> {
        let mut guard = lock(&self.state);
        let CacheState {
            slots,
            next_id,
            abandoned,
            ..
        } = &mut *guard;
        touch(&self.state, slots, next_id, abandoned, key, fetcher).snapshot()
    }

    /// Like [`read`](Self::read), but returns a handle that counts as an
    /// active subscriber until dropped.
    pub fn subscribe(&self, key: CacheKey, fetcher: Fetcher<V>) -> Subscription<V> {
        let mut guard = lock(&self.state);
        let CacheState {
            slots,
            next_id,
            abandoned,
            ..
        } = &mut *guard;
        let slot = touch(&self.state, slots, next_id, abandoned, key, fetcher);
        Subscription {
            key,
            rx: slot.tx.subscribe(),
        }
    }

    /// Wait for `key` to settle and return its value or its failure.
    pub async fn fetch(&self, key: CacheKey, fetcher: Fetcher<V>) -> Result<Arc<V>, CacheError> {
        let mut subscription = self.subscribe(key, fetcher);
        subscription.settled().await
    }

    /// Snapshot without fetching. `None` when the key has no entry.
    #[must_use]
    pub fn peek(&self, key: &CacheKey) -> Option<Snapshot<V>> {
        lock(&self.state).slots.get(key).map(Slot::snapshot)
    }

    /// Mark `key` stale. Refetches at once if it has subscribers, otherwise on
    /// the next read. Returns whether the key had an entry.
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        let mut guard = lock(&self.state);
        let CacheState {
            slots,
            next_id,
            abandoned,
            ..
        } = &mut *guard;
        match slots.get_mut(key) {
            Some(slot) => {
                mark_stale(&self.state, next_id, abandoned, *key, slot);
                true
            }
            None => false,
        }
    }

    /// Invalidate every entry matching `prefix`. Returns how many matched.
    pub fn invalidate_prefix(&self, prefix: &KeyPrefix) -> usize {
        let mut guard = lock(&self.state);
        let CacheState {
            slots,
            next_id,
            abandoned,
            ..
        } = &mut *guard;
        let mut count = 0;
        for (key, slot) in slots.iter_mut().filter(|(key, _)| prefix.matches(key)) {
            mark_stale(&self.state, next_id, abandoned, *key, slot);
            count += 1;
        }
        debug!(?prefix, count, "Prefix invalidated");
        count
    }

    /// Refetch an errored (or stale) entry. Returns whether a fetch started.
    pub fn retry(&self, key: &CacheKey) -> bool {
        let mut guard = lock(&self.state);
        let CacheState {
            slots,
            next_id,
            abandoned,
            ..
        } = &mut *guard;
        let Some(slot) = slots.get_mut(key) else {
            return false;
        };
        if slot.in_flight.is_some() || matches!(slot.status, FetchStatus::Fresh) {
            return false;
        }
        start_fetch(&self.state, abandoned, *key, slot, bump(next_id))
    }

    /// Drop every entry. Subscribers see their channel close; fetches still
    /// running are ignored when they finish, and a key read again meanwhile
    /// waits for them before fetching.
    pub fn clear(&self) {
        let mut guard = lock(&self.state);
        let slots = mem::take(&mut guard.slots);
        for (key, slot) in &slots {
            if let Some(flight) = slot.in_flight {
                guard.abandoned.insert(*key, flight.ticket);
            }
        }
        drop(guard);
        debug!(entries = slots.len(), "Cache flushed");
        drop(slots);
    }

    #[must_use]
    pub fn is_in_flight(&self, key: &CacheKey) -> bool {
        lock(&self.state)
            .slots
            .get(key)
            .is_some_and(|slot| slot.in_flight.is_some())
    }

    /// Keys under `prefix` whose current value satisfies `predicate`.
    pub fn keys_where(&self, prefix: &KeyPrefix, predicate: impl Fn(&V) -> bool) -> Vec<CacheKey> {
        lock(&self.state)
            .slots
            .iter()
            .filter(|(key, slot)| {
                prefix.matches(key) && slot.value.as_deref().is_some_and(&predicate)
            })
            .map(|(key, _)| *key)
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.state).slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Find or create the slot for `key` and start a fetch if it needs one.
fn touch<'a, V: Send + Sync + 'static>(
    shared: &Shared<V>,
    slots: &'a mut HashMap<CacheKey, Slot<V>>,
    next_id: &mut u64,
    abandoned: &HashMap<CacheKey, u64>,
    key: CacheKey,
    fetcher: Fetcher<V>,
) -> &'a mut Slot<V> {
    let slot = slots.entry(key).or_insert_with(|| {
        debug!(%key, "Cache entry created");
        Slot::new(Arc::clone(&fetcher), bump(next_id))
    });
    slot.fetcher = fetcher;
    if slot.needs_fetch() {
        start_fetch(shared, abandoned, key, slot, bump(next_id));
    } else if slot.status == FetchStatus::Stale {
        slot.wanted = true;
    }
    slot
}

fn mark_stale<V: Send + Sync + 'static>(
    shared: &Shared<V>,
    next_id: &mut u64,
    abandoned: &HashMap<CacheKey, u64>,
    key: CacheKey,
    slot: &mut Slot<V>,
) {
    slot.generation = bump(next_id);
    slot.status = FetchStatus::Stale;
    let started = slot.in_flight.is_none()
        && slot.subscribers() > 0
        && start_fetch(shared, abandoned, key, slot, bump(next_id));
    if !started {
        debug!(%key, in_flight = slot.in_flight.is_some(), "Entry marked stale");
        slot.publish();
    }
}

/// Start a fetch for `slot` unless a flushed fetch for `key` is still running,
/// in which case the slot is marked wanted. Returns whether a fetch started.
fn start_fetch<V: Send + Sync + 'static>(
    shared: &Shared<V>,
    abandoned: &HashMap<CacheKey, u64>,
    key: CacheKey,
    slot: &mut Slot<V>,
    ticket: u64,
) -> bool {
    if abandoned.contains_key(&key) {
        debug!(%key, "Fetch held back until the flushed one returns");
        slot.wanted = true;
        return false;
    }
    slot.status = FetchStatus::Fetching;
    slot.in_flight = Some(InFlight {
        ticket,
        generation: slot.generation,
    });
    slot.wanted = false;
    slot.publish();
    debug!(%key, ticket, generation = slot.generation, "Fetch started");

    let fetcher = Arc::clone(&slot.fetcher);
    let cache = Arc::downgrade(shared);
    tokio::spawn(async move {
        let result = fetcher().await;
        let Some(shared) = cache.upgrade() else {
            return;
        };
        if let Some((hook, settled)) = complete(&shared, key, ticket, result) {
            hook(settled.as_deref());
        }
    });
    true
}

type Settled<V> = (SettleHook<V>, Result<Arc<V>, GatewayError>);

/// Apply a fetch result. Returns the settle hook and what it should see when
/// the result landed in the entry.
fn complete<V: Send + Sync + 'static>(
    shared: &Shared<V>,
    key: CacheKey,
    ticket: u64,
    result: Result<V, GatewayError>,
) -> Option<Settled<V>> {
    let mut guard = lock(shared);
    let CacheState {
        slots,
        next_id,
        abandoned,
        on_settle,
    } = &mut *guard;

    if abandoned.get(&key) == Some(&ticket) {
        abandoned.remove(&key);
        debug!(%key, ticket, "Dropping response for flushed entry");
        if let Some(slot) = slots.get_mut(&key)
            && slot.needs_fetch()
            && (slot.wanted || slot.subscribers() > 0)
        {
            start_fetch(shared, abandoned, key, slot, bump(next_id));
        }
        return None;
    }

    let Some(slot) = slots.get_mut(&key) else {
        debug!(%key, ticket, "Dropping response for flushed entry");
        return None;
    };
    let Some(flight) = slot.in_flight.filter(|flight| flight.ticket == ticket) else {
        debug!(%key, ticket, "Dropping response from an abandoned fetch");
        return None;
    };
    slot.in_flight = None;

    if flight.generation != slot.generation {
        warn!(%key, ticket, "Discarding response superseded by invalidation");
        let refetched = (slot.subscribers() > 0 || slot.wanted)
            && start_fetch(shared, abandoned, key, slot, bump(next_id));
        if !refetched {
            slot.publish();
        }
        return None;
    }

    let settled = match result {
        Ok(value) => {
            let value = Arc::new(value);
            slot.value = Some(Arc::clone(&value));
            slot.status = FetchStatus::Fresh;
            slot.error = None;
            slot.fetched_at = Some(Instant::now());
            debug!(%key, ticket, "Fetch succeeded");
            Ok(value)
        }
        Err(err) => {
            warn!(%key, ticket, %err, "Fetch failed");
            slot.status = FetchStatus::Errored;
            slot.error = Some(err.clone());
            Err(err)
        }
    };
    slot.publish();
    on_settle.clone().map(|hook| (hook, settled))
}

/// Non-owning handle to a [`ScopedCache`].
pub struct WeakScopedCache<V> {
    state: Weak<Mutex<CacheState<V>>>,
}

impl<V> Clone for WeakScopedCache<V> {
    fn clone(&self) -> Self {
        Self {
            state: Weak::clone(&self.state),
        }
    }
}

impl<V> WeakScopedCache<V> {
    #[must_use]
    pub fn upgrade(&self) -> Option<ScopedCache<V>> {
        self.state.upgrade().map(|state| ScopedCache { state })
    }
}

/// Live view of one entry. Counts as an active subscriber until dropped.
pub struct Subscription<V> {
    key: CacheKey,
    rx: watch::Receiver<Snapshot<V>>,
}

impl<V> Subscription<V> {
    #[must_use]
    pub fn key(&self) -> CacheKey {
        self.key
    }

    #[must_use]
    pub fn current(&self) -> Snapshot<V> {
        self.rx.borrow().clone()
    }

    /// Wait for the next published change.
    pub async fn changed(&mut self) -> Result<Snapshot<V>, CacheError> {
        self.rx.changed().await.map_err(|_| CacheError::Discarded)?;
        Ok(self.rx.borrow_and_update().clone())
    }

    /// Wait until the entry is fresh or errored.
    pub async fn settled(&mut self) -> Result<Arc<V>, CacheError> {
        let snapshot = self
            .rx
            .wait_for(Snapshot::is_settled)
            .await
            .map_err(|_| CacheError::Discarded)?
            .clone();
        snapshot.into_result()
    }
}

#[cfg(test)]
mod tests;
