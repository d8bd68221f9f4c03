//! Unit tests for the scoped cache.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tally_gateway::GatewayError;
use tally_types::{FolderId, TaskScope, UserId};
use tokio::sync::{mpsc, oneshot};

use super::{CacheError, CacheKey, FetchStatus, Fetcher, KeyPrefix, ScopedCache, fetcher};

const ALICE: UserId = UserId::new(1);
const BOB: UserId = UserId::new(2);
const KEY: CacheKey = CacheKey::tasks(ALICE, TaskScope::All);

type Reply = oneshot::Sender<Result<u32, GatewayError>>;

/// Fetcher whose responses the test hands out one at a time.
struct Gate {
    replies: mpsc::UnboundedReceiver<Reply>,
    calls: Arc<AtomicUsize>,
}

impl Gate {
    async fn next(&mut self) -> Reply {
        tokio::time::timeout(Duration::from_secs(5), self.replies.recv())
            .await
            .expect("fetch did not start in time")
            .expect("gate closed")
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn gated() -> (Fetcher<u32>, Gate) {
    let (tx, replies) = mpsc::unbounded_channel();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let fetch = fetcher(move || {
        counter.fetch_add(1, Ordering::SeqCst);
        let tx = tx.clone();
        async move {
            let (reply, response) = oneshot::channel();
            if tx.send(reply).is_err() {
                return Err(GatewayError::transport("test", "gate closed"));
            }
            response
                .await
                .unwrap_or_else(|_| Err(GatewayError::transport("test", "reply dropped")))
        }
    });
    (fetch, Gate { replies, calls })
}

/// Fetcher that answers at once with its call number.
fn counting() -> (Fetcher<u32>, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let fetch = fetcher(move || {
        let call = counter.fetch_add(1, Ordering::SeqCst) + 1;
        async move { Ok::<_, GatewayError>(call as u32) }
    });
    (fetch, calls)
}

/// Fetcher that fails on the listed call numbers and counts otherwise.
fn failing_on(failures: &'static [usize]) -> (Fetcher<u32>, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let fetch = fetcher(move || {
        let call = counter.fetch_add(1, Ordering::SeqCst) + 1;
        async move {
            if failures.contains(&call) {
                Err(GatewayError::from_status(500, "boom".into()))
            } else {
                Ok(call as u32)
            }
        }
    });
    (fetch, calls)
}

#[tokio::test]
async fn concurrent_reads_share_one_fetch() {
    let cache = ScopedCache::new();
    let (fetch, mut gate) = gated();

    let waiters: Vec<_> = (0..8)
        .map(|_| {
            let cache = cache.clone();
            let fetch = fetch.clone();
            tokio::spawn(async move { cache.fetch(KEY, fetch).await })
        })
        .collect();
    for _ in 0..4 {
        let snapshot = cache.read(KEY, fetch.clone());
        assert_eq!(snapshot.status, FetchStatus::Fetching);
    }

    let reply = gate.next().await;
    assert!(cache.is_in_flight(&KEY));
    reply.send(Ok(7)).unwrap();

    for waiter in waiters {
        assert_eq!(*waiter.await.unwrap().unwrap(), 7);
    }
    assert_eq!(gate.calls(), 1);
}

#[tokio::test]
async fn invalidation_during_flight_discards_stale_response() {
    let cache = ScopedCache::new();
    let (fetch, mut gate) = gated();
    let mut subscription = cache.subscribe(KEY, fetch);

    let first = gate.next().await;
    assert!(cache.invalidate(&KEY));
    // The stale fetch still occupies the slot; no second request yet.
    assert_eq!(gate.calls(), 1);

    first.send(Ok(1)).unwrap();
    let second = gate.next().await;
    let snapshot = cache.peek(&KEY).unwrap();
    assert_eq!(snapshot.status, FetchStatus::Fetching);
    assert!(snapshot.value.is_none());

    second.send(Ok(2)).unwrap();
    assert_eq!(*subscription.settled().await.unwrap(), 2);
    assert_eq!(gate.calls(), 2);
}

#[tokio::test]
async fn repeated_invalidation_during_flight_refetches_once() {
    let cache = ScopedCache::new();
    let (fetch, mut gate) = gated();
    let mut subscription = cache.subscribe(KEY, fetch);

    let first = gate.next().await;
    for _ in 0..3 {
        cache.invalidate(&KEY);
    }
    first.send(Ok(1)).unwrap();
    gate.next().await.send(Ok(2)).unwrap();

    assert_eq!(*subscription.settled().await.unwrap(), 2);
    assert_eq!(gate.calls(), 2);
}

#[tokio::test]
async fn invalidate_without_subscribers_defers_to_next_read() {
    let cache = ScopedCache::new();
    let (fetch, calls) = counting();

    assert_eq!(*cache.fetch(KEY, fetch.clone()).await.unwrap(), 1);
    assert!(cache.invalidate(&KEY));

    let snapshot = cache.peek(&KEY).unwrap();
    assert_eq!(snapshot.status, FetchStatus::Stale);
    assert_eq!(snapshot.value.as_deref(), Some(&1));
    assert!(!cache.is_in_flight(&KEY));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    assert_eq!(*cache.fetch(KEY, fetch).await.unwrap(), 2);
}

#[tokio::test]
async fn invalidate_with_subscriber_refetches_at_once() {
    let cache = ScopedCache::new();
    let (fetch, calls) = counting();
    let mut subscription = cache.subscribe(KEY, fetch);
    assert_eq!(*subscription.settled().await.unwrap(), 1);

    cache.invalidate(&KEY);
    assert!(cache.is_in_flight(&KEY));
    assert_eq!(*subscription.settled().await.unwrap(), 2);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn response_after_disinterest_is_kept() {
    let cache = ScopedCache::new();
    let (fetch, mut gate) = gated();
    let subscription = cache.subscribe(KEY, fetch.clone());
    let reply = gate.next().await;
    drop(subscription);

    reply.send(Ok(5)).unwrap();
    assert_eq!(*cache.fetch(KEY, fetch).await.unwrap(), 5);
    assert_eq!(gate.calls(), 1);
}

#[tokio::test]
async fn errored_entry_waits_for_retry() {
    let cache = ScopedCache::new();
    let (fetch, calls) = failing_on(&[1]);

    let err = cache.fetch(KEY, fetch.clone()).await.unwrap_err();
    assert!(matches!(err, CacheError::Fetch(GatewayError::Remote(_))));

    let snapshot = cache.read(KEY, fetch.clone());
    assert_eq!(snapshot.status, FetchStatus::Errored);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    assert!(cache.retry(&KEY));
    assert_eq!(*cache.fetch(KEY, fetch).await.unwrap(), 2);
    assert!(!cache.retry(&KEY));
}

#[tokio::test]
async fn failure_keeps_last_good_value() {
    let cache = ScopedCache::new();
    let (fetch, _calls) = failing_on(&[2]);

    assert_eq!(*cache.fetch(KEY, fetch.clone()).await.unwrap(), 1);
    cache.invalidate(&KEY);
    assert!(cache.fetch(KEY, fetch).await.is_err());

    let snapshot = cache.peek(&KEY).unwrap();
    assert_eq!(snapshot.status, FetchStatus::Errored);
    assert_eq!(snapshot.value.as_deref(), Some(&1));
    assert!(snapshot.error.is_some());
}

#[tokio::test]
async fn clear_discards_waiters_and_late_responses() {
    let cache = ScopedCache::new();
    let (fetch, mut gate) = gated();

    let mut before = cache.subscribe(KEY, fetch.clone());
    let stale = gate.next().await;
    cache.clear();
    assert!(cache.is_empty());
    assert_eq!(before.settled().await.unwrap_err(), CacheError::Discarded);

    let mut after = cache.subscribe(KEY, fetch);
    assert_eq!(after.current().status, FetchStatus::Idle);
    assert!(!cache.is_in_flight(&KEY));
    assert_eq!(gate.calls(), 1);

    stale.send(Ok(1)).unwrap();
    let fresh = gate.next().await;
    assert_eq!(gate.calls(), 2);
    fresh.send(Ok(2)).unwrap();
    assert_eq!(*after.settled().await.unwrap(), 2);
}

#[tokio::test]
async fn read_after_clear_waits_for_flushed_fetch() {
    let cache = ScopedCache::new();
    let (fetch, mut gate) = gated();

    cache.read(KEY, fetch.clone());
    let stale = gate.next().await;
    cache.clear();

    assert_eq!(cache.read(KEY, fetch.clone()).status, FetchStatus::Idle);
    assert_eq!(cache.read(KEY, fetch.clone()).status, FetchStatus::Idle);
    assert_eq!(gate.calls(), 1);

    stale.send(Err(GatewayError::from_status(500, "late".into()))).unwrap();
    let fresh = gate.next().await;
    fresh.send(Ok(7)).unwrap();
    assert_eq!(*cache.fetch(KEY, fetch).await.unwrap(), 7);
    assert_eq!(gate.calls(), 2);
}

#[tokio::test]
async fn fetcher_may_use_the_cache_it_fills() {
    let cache: ScopedCache<u32> = ScopedCache::new();
    let inner = cache.clone();
    let fetch = fetcher(move || {
        let entries = inner.len() as u32;
        async move { Ok::<_, GatewayError>(entries) }
    });

    assert_eq!(*cache.fetch(KEY, fetch).await.unwrap(), 1);
}

#[tokio::test]
async fn settle_hook_sees_results_after_publish() {
    let cache = ScopedCache::new();
    let weak = cache.downgrade();
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&seen);
    cache.on_settle(move |result| {
        counter.fetch_add(1, Ordering::SeqCst);
        if result.is_err()
            && let Some(cache) = weak.upgrade()
        {
            cache.clear();
        }
    });
    let (fetch, _) = failing_on(&[2]);

    assert_eq!(*cache.fetch(KEY, fetch.clone()).await.unwrap(), 1);
    assert_eq!(seen.load(Ordering::SeqCst), 1);

    cache.invalidate(&KEY);
    let err = cache.fetch(KEY, fetch).await.unwrap_err();
    assert!(matches!(err, CacheError::Fetch(GatewayError::Remote(_))));
    assert_eq!(seen.load(Ordering::SeqCst), 2);
    assert!(cache.is_empty());
}

#[tokio::test]
async fn settle_hook_skips_superseded_responses() {
    let cache = ScopedCache::new();
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&seen);
    cache.on_settle(move |_: Result<&u32, &GatewayError>| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let (fetch, mut gate) = gated();

    let mut subscription = cache.subscribe(KEY, fetch);
    let first = gate.next().await;
    cache.invalidate(&KEY);
    first.send(Ok(1)).unwrap();
    let second = gate.next().await;
    second.send(Ok(2)).unwrap();

    assert_eq!(*subscription.settled().await.unwrap(), 2);
    assert_eq!(seen.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn keys_are_independent() {
    let cache = ScopedCache::new();
    let (ok, _) = counting();
    let (bad, _) = failing_on(&[1]);
    let folder = CacheKey::tasks(ALICE, TaskScope::Folder(FolderId::new(3)));

    assert!(cache.fetch(KEY, bad).await.is_err());
    assert_eq!(*cache.fetch(folder, ok).await.unwrap(), 1);
    assert_eq!(cache.peek(&KEY).unwrap().status, FetchStatus::Errored);
    assert_eq!(cache.peek(&folder).unwrap().status, FetchStatus::Fresh);
}

#[tokio::test]
async fn prefix_invalidation_stays_within_owner() {
    let cache = ScopedCache::new();
    let (fetch, _) = counting();
    let alice_keys = [
        CacheKey::tasks(ALICE, TaskScope::All),
        CacheKey::tasks(ALICE, TaskScope::Unfiled),
        CacheKey::folders(ALICE),
    ];
    let bob_key = CacheKey::tasks(BOB, TaskScope::All);
    for key in alice_keys.into_iter().chain([bob_key]) {
        cache.fetch(key, fetch.clone()).await.unwrap();
    }

    assert_eq!(cache.invalidate_prefix(&KeyPrefix::tasks_of(ALICE)), 2);
    assert_eq!(cache.peek(&alice_keys[0]).unwrap().status, FetchStatus::Stale);
    assert_eq!(cache.peek(&alice_keys[1]).unwrap().status, FetchStatus::Stale);
    assert_eq!(cache.peek(&alice_keys[2]).unwrap().status, FetchStatus::Fresh);
    assert_eq!(cache.peek(&bob_key).unwrap().status, FetchStatus::Fresh);
}

#[tokio::test]
async fn keys_where_inspects_cached_values() {
    let cache: ScopedCache<Vec<u32>> = ScopedCache::new();
    let all = CacheKey::tasks(ALICE, TaskScope::All);
    let folder = CacheKey::tasks(ALICE, TaskScope::Folder(FolderId::new(3)));
    cache
        .fetch(all, fetcher(|| async { Ok::<_, GatewayError>(vec![1, 2, 3]) }))
        .await
        .unwrap();
    cache
        .fetch(folder, fetcher(|| async { Ok::<_, GatewayError>(vec![3]) }))
        .await
        .unwrap();

    let mut holding_three = cache.keys_where(&KeyPrefix::tasks_of(ALICE), |ids| ids.contains(&3));
    holding_three.sort_by_key(ToString::to_string);
    assert_eq!(holding_three, vec![all, folder]);
    assert_eq!(
        cache.keys_where(&KeyPrefix::tasks_of(ALICE), |ids| ids.contains(&1)),
        vec![all]
    );
    assert!(cache.keys_where(&KeyPrefix::tasks_of(BOB), |_| true).is_empty());
}

#[tokio::test]
async fn invalidating_unknown_key_is_noop() {
    let cache: ScopedCache<u32> = ScopedCache::new();
    assert!(!cache.invalidate(&KEY));
    assert!(!cache.retry(&KEY));
    assert!(cache.peek(&KEY).is_none());
}

#[tokio::test]
async fn subscription_sees_each_transition() {
    let cache = ScopedCache::new();
    let (fetch, mut gate) = gated();
    let mut subscription = cache.subscribe(KEY, fetch);
    assert_eq!(subscription.current().status, FetchStatus::Fetching);
    assert_eq!(subscription.key(), KEY);

    gate.next().await.send(Ok(9)).unwrap();
    let snapshot = subscription.changed().await.unwrap();
    assert_eq!(snapshot.status, FetchStatus::Fresh);
    assert!(snapshot.fetched_at.is_some());
}
