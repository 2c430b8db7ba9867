//! Ledger behaviour against the in-memory store and cache doubles

use async_trait::async_trait;
use futures_util::future::{join_all, BoxFuture};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use wallet_ledger::cache::{DistributedCache, InMemoryDistributedCache, LocalCache, TieredCache};
use wallet_ledger::keys;
use wallet_ledger::ledger::{LedgerCaches, LedgerFlights};
use wallet_ledger::metrics::Metrics;
use wallet_ledger::store::{Fault, MemoryStore};
use wallet_ledger::{
    Balance, Config, DisbursementRequest, History, HistorySummary, HistoryType, Ledger,
    LedgerError, Result,
};

struct Harness {
    ledger: Ledger,
    store: MemoryStore,
    distributed: Arc<InMemoryDistributedCache>,
}

fn ledger_over(
    store: &MemoryStore,
    distributed: Arc<dyn DistributedCache>,
    flights: LedgerFlights,
    metrics: Metrics,
) -> Ledger {
    let config = Config::default();
    Ledger::new(
        Arc::new(store.clone()),
        LedgerCaches::moka(distributed, &config.cache, &metrics),
        flights,
        config.ledger.history_limit,
        metrics,
    )
}

fn harness() -> Harness {
    let store = MemoryStore::new();
    let distributed = Arc::new(InMemoryDistributedCache::new());
    let metrics = Metrics::default();
    let ledger = ledger_over(
        &store,
        distributed.clone(),
        LedgerFlights::coalescing(&metrics),
        metrics,
    );
    Harness {
        ledger,
        store,
        distributed,
    }
}

/// Distributed tier whose deletes take a while to land
struct SlowDeleteCache {
    inner: Arc<InMemoryDistributedCache>,
    delay: Duration,
}

#[async_trait]
impl DistributedCache for SlowDeleteCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.inner.get(key).await
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.inner.set_ex(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<u64> {
        tokio::time::sleep(self.delay).await;
        self.inner.delete(key).await
    }

    async fn fetch<'a>(
        &'a self,
        key: &'a str,
        ttl: Duration,
        loader: BoxFuture<'a, Result<String>>,
    ) -> Result<String> {
        self.inner.fetch(key, ttl, loader).await
    }
}

/// Local tier that never keeps anything
struct NoLocalCache;

#[async_trait]
impl<V: Send + 'static> LocalCache<V> for NoLocalCache {
    async fn get(&self, _key: &str) -> Option<V> {
        None
    }

    async fn set(&self, _key: &str, _value: V, _ttl: Duration) {}

    async fn delete(&self, _key: &str) -> bool {
        false
    }

    async fn fetch<'a>(
        &'a self,
        _key: &'a str,
        _ttl: Duration,
        loader: BoxFuture<'a, Result<V>>,
    ) -> Result<V> {
        loader.await
    }
}

fn disbursement(from: &str, to: &str, amount: Decimal) -> DisbursementRequest {
    DisbursementRequest {
        from_user_id: from.to_string(),
        to_user_id: to.to_string(),
        amount,
    }
}

#[tokio::test]
async fn test_grant_deduct_round_trip() {
    let h = harness();

    h.ledger.grant_balance("u1", dec!(100)).await.unwrap();
    h.ledger.deduct_balance("u1", dec!(40)).await.unwrap();
    assert_eq!(h.ledger.get_balance("u1").await.unwrap().amount, dec!(60));

    let result = h.ledger.deduct_balance("u1", dec!(100)).await;
    assert_eq!(
        result,
        Err(LedgerError::InsufficientFunds {
            user_id: "u1".to_string()
        })
    );
    assert_eq!(h.ledger.get_balance("u1").await.unwrap().amount, dec!(60));
    assert_eq!(h.store.balance_of("u1").await, Some(dec!(60)));
}

#[tokio::test]
async fn test_amount_validation() {
    let h = harness();

    assert!(matches!(
        h.ledger.grant_balance("u1", dec!(-1)).await,
        Err(LedgerError::Invariant(_))
    ));
    assert!(matches!(
        h.ledger.deduct_balance("u1", dec!(0)).await,
        Err(LedgerError::Invariant(_))
    ));
    assert!(matches!(
        h.ledger.disburse(&disbursement("a", "b", dec!(-5))).await,
        Err(LedgerError::Invariant(_))
    ));

    // Zero grant is accepted and recorded
    h.ledger.grant_balance("u1", dec!(0)).await.unwrap();
    assert_eq!(h.ledger.get_balance("u1").await.unwrap().amount, dec!(0));
    assert_eq!(h.store.history_count().await, 1);
}

#[tokio::test]
async fn test_missing_balance_is_not_found() {
    let h = harness();

    assert!(matches!(
        h.ledger.get_balance("ghost").await,
        Err(LedgerError::NotFound(_))
    ));
    // The absence is cached, but a first grant replaces it
    assert!(h.distributed.contains(&keys::balance("ghost")));
    h.ledger.grant_balance("ghost", dec!(1)).await.unwrap();
    assert_eq!(h.ledger.get_balance("ghost").await.unwrap().amount, dec!(1));
}

#[tokio::test]
async fn test_disbursement_moves_money_and_records_both_legs() {
    let h = harness();
    h.ledger.grant_balance("alice", dec!(100)).await.unwrap();

    h.ledger
        .disburse(&disbursement("alice", "bob", dec!(30)))
        .await
        .unwrap();

    assert_eq!(h.ledger.get_balance("alice").await.unwrap().amount, dec!(70));
    assert_eq!(h.ledger.get_balance("bob").await.unwrap().amount, dec!(30));

    let alice = h.ledger.latest_history("alice").await.unwrap();
    assert_eq!(alice[0].history_type, HistoryType::Debit);
    assert_eq!(alice[0].amount, dec!(-30));
    assert_eq!(alice[0].target_user_id, "bob");
    assert_eq!(alice[0].notes, "Transfer money to bob");

    let bob = h.ledger.latest_history("bob").await.unwrap();
    assert_eq!(bob.len(), 1);
    assert_eq!(bob[0].history_type, HistoryType::Credit);
    assert_eq!(bob[0].amount, dec!(30));
    assert_eq!(bob[0].notes, "Receive money from alice");
}

#[tokio::test]
async fn test_disbursement_is_all_or_nothing() {
    let faults = [
        Fault::Begin,
        Fault::Grant,
        Fault::Deduct,
        Fault::InsertHistory,
        Fault::UpsertSummary,
        Fault::Commit,
    ];

    for fault in faults {
        let h = harness();
        h.ledger.grant_balance("alice", dec!(100)).await.unwrap();
        // Warm the caches so a leaked invalidation or write would show
        assert_eq!(h.ledger.get_balance("alice").await.unwrap().amount, dec!(100));
        let histories_before = h.store.history_count().await;
        let summaries_before = h.store.summary_count().await;

        h.store.inject(fault);
        let result = h.ledger.disburse(&disbursement("alice", "bob", dec!(30))).await;
        assert!(
            matches!(result, Err(LedgerError::Store(_))),
            "{:?}: {:?}",
            fault,
            result
        );
        h.store.clear_faults();

        assert_eq!(h.store.balance_of("alice").await, Some(dec!(100)), "{:?}", fault);
        assert_eq!(h.store.balance_of("bob").await, None, "{:?}", fault);
        assert_eq!(h.store.history_count().await, histories_before, "{:?}", fault);
        assert_eq!(h.store.summary_count().await, summaries_before, "{:?}", fault);
        assert_eq!(h.ledger.get_balance("alice").await.unwrap().amount, dec!(100));
        assert!(matches!(
            h.ledger.get_balance("bob").await,
            Err(LedgerError::NotFound(_))
        ));
    }
}

#[tokio::test]
async fn test_insufficient_disbursement_leaves_receiver_untouched() {
    let h = harness();
    h.ledger.grant_balance("alice", dec!(10)).await.unwrap();

    let result = h.ledger.disburse(&disbursement("alice", "bob", dec!(11))).await;
    assert!(matches!(result, Err(LedgerError::InsufficientFunds { .. })));

    // Grant(to) ran first inside the transaction and was rolled back
    assert_eq!(h.store.balance_of("bob").await, None);
    assert_eq!(h.store.balance_of("alice").await, Some(dec!(10)));
}

#[tokio::test]
async fn test_commit_invalidates_both_tiers() {
    let h = harness();
    h.ledger.grant_balance("u1", dec!(100)).await.unwrap();
    h.ledger.get_balance("u1").await.unwrap();
    h.ledger.latest_history("u1").await.unwrap();
    h.ledger
        .history_summary_by_type("u1", HistoryType::Debit)
        .await
        .unwrap();
    assert!(h.distributed.contains(&keys::balance("u1")));
    assert!(h.distributed.contains(&keys::latest_history("u1")));

    h.ledger.deduct_balance("u1", dec!(25)).await.unwrap();

    assert!(!h.distributed.contains(&keys::balance("u1")));
    assert!(!h.distributed.contains(&keys::latest_history("u1")));
    assert!(!h
        .distributed
        .contains(&keys::history_summary("u1", HistoryType::Debit)));

    assert_eq!(h.ledger.get_balance("u1").await.unwrap().amount, dec!(75));
    assert_eq!(h.ledger.latest_history("u1").await.unwrap().len(), 2);
    let debits = h
        .ledger
        .history_summary_by_type("u1", HistoryType::Debit)
        .await
        .unwrap();
    assert_eq!(debits.len(), 1);
    assert_eq!(debits[0].amount, dec!(25));
}

#[tokio::test]
async fn test_invalidation_failure_is_reported() {
    let h = harness();
    h.ledger.grant_balance("u1", dec!(100)).await.unwrap();
    h.ledger.get_balance("u1").await.unwrap();

    h.distributed.set_fail_deletes(true);
    let result = h.ledger.grant_balance("u1", dec!(5)).await;
    assert!(matches!(result, Err(LedgerError::Cache(_))));

    // The money moved; only the cache is suspect
    assert_eq!(h.store.balance_of("u1").await, Some(dec!(105)));
    assert!(h.ledger.metrics().invalidation_failures.get() > 0);

    h.distributed.set_fail_deletes(false);
    h.ledger.invalidate_user("u1").await.unwrap();
    assert_eq!(h.ledger.get_balance("u1").await.unwrap().amount, dec!(105));
}

#[tokio::test]
async fn test_invalidating_absent_keys_is_noop() {
    let h = harness();
    h.ledger.invalidate_user("nobody").await.unwrap();
    h.ledger.invalidate_user("nobody").await.unwrap();
}

#[tokio::test]
async fn test_concurrent_reads_with_unreachable_store_share_one_attempt() {
    let h = harness();
    h.store.set_unavailable(true);
    h.store.set_read_latency(Duration::from_millis(50));

    let results = join_all((0..16).map(|_| h.ledger.get_balance("u1"))).await;

    assert_eq!(h.store.reads(), 1);
    let first = results[0].clone();
    assert!(matches!(first, Err(LedgerError::Store(_))));
    assert!(results.iter().all(|r| *r == first));
    assert_eq!(h.ledger.metrics().coalesced_followers.get(), 15);

    // Errors are not memoized
    h.store.set_unavailable(false);
    h.store.set_read_latency(Duration::ZERO);
    assert!(matches!(
        h.ledger.get_balance("u1").await,
        Err(LedgerError::NotFound(_))
    ));
    assert_eq!(h.store.reads(), 2);
}

#[tokio::test]
async fn test_uncoalesced_reads_each_reach_the_store() {
    let h = harness();
    let ledger = ledger_over(&h.store, h.distributed.clone(), LedgerFlights::passthrough(), Metrics::default());
    h.store.set_unavailable(true);
    h.store.set_read_latency(Duration::from_millis(20));

    let results = join_all((0..4).map(|_| ledger.get_balance("u1"))).await;

    assert!(results.iter().all(|r| r.is_err()));
    assert_eq!(h.store.reads(), 4);
}

#[tokio::test]
async fn test_dropped_mutation_still_invalidates() {
    let store = MemoryStore::new();
    let inner = Arc::new(InMemoryDistributedCache::new());
    let slow = Arc::new(SlowDeleteCache {
        inner: inner.clone(),
        delay: Duration::from_millis(50),
    });
    let metrics = Metrics::default();
    let ledger = ledger_over(&store, slow, LedgerFlights::coalescing(&metrics), metrics);

    ledger.grant_balance("u1", dec!(100)).await.unwrap();
    assert_eq!(ledger.get_balance("u1").await.unwrap().amount, dec!(100));
    assert!(inner.contains(&keys::balance("u1")));

    // The caller gives up while the first delete is still pending
    let abandoned =
        tokio::time::timeout(Duration::from_millis(20), ledger.grant_balance("u1", dec!(5))).await;
    assert!(abandoned.is_err());

    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(store.balance_of("u1").await, Some(dec!(105)));
    assert!(!inner.contains(&keys::balance("u1")));
    assert_eq!(ledger.get_balance("u1").await.unwrap().amount, dec!(105));
}

#[tokio::test]
async fn test_injected_local_tier_is_used() {
    let store = MemoryStore::new();
    let distributed = Arc::new(InMemoryDistributedCache::new());
    let ttl = Config::default().cache.ttl();
    let caches = LedgerCaches {
        balances: TieredCache::<Option<Balance>>::new(Arc::new(NoLocalCache), distributed.clone(), ttl),
        histories: TieredCache::<Vec<History>>::new(Arc::new(NoLocalCache), distributed.clone(), ttl),
        summaries: TieredCache::<Vec<HistorySummary>>::new(
            Arc::new(NoLocalCache),
            distributed.clone(),
            ttl,
        ),
    };
    let ledger = Ledger::new(
        Arc::new(store.clone()),
        caches,
        LedgerFlights::passthrough(),
        10,
        Metrics::default(),
    );

    ledger.grant_balance("u1", dec!(10)).await.unwrap();
    for _ in 0..3 {
        assert_eq!(ledger.get_balance("u1").await.unwrap().amount, dec!(10));
    }
    assert_eq!(store.reads(), 1);

    // Nothing was kept locally, so losing the distributed tier reaches the store
    distributed.set_unavailable(true);
    assert_eq!(ledger.get_balance("u1").await.unwrap().amount, dec!(10));
    assert_eq!(store.reads(), 2);
}

#[tokio::test]
async fn test_sub_cent_amounts_are_rejected() {
    let h = harness();

    assert!(matches!(
        h.ledger.grant_balance("u1", dec!(0.004)).await,
        Err(LedgerError::Invariant(_))
    ));
    assert!(matches!(
        h.ledger.deduct_balance("u1", dec!(0.001)).await,
        Err(LedgerError::Invariant(_))
    ));
    assert!(matches!(
        h.ledger.disburse(&disbursement("a", "b", dec!(1.005))).await,
        Err(LedgerError::Invariant(_))
    ));
    assert_eq!(h.store.history_count().await, 0);
    assert_eq!(h.store.balance_of("u1").await, None);

    // Trailing zeros are not extra precision
    h.ledger.grant_balance("u1", dec!(1.500)).await.unwrap();
    assert_eq!(h.ledger.get_balance("u1").await.unwrap().amount, dec!(1.5));
}

#[tokio::test]
async fn test_cached_reads_skip_the_store() {
    let h = harness();
    h.ledger.grant_balance("u1", dec!(10)).await.unwrap();

    for _ in 0..5 {
        h.ledger.get_balance("u1").await.unwrap();
    }
    assert_eq!(h.store.reads(), 1);
    assert_eq!(h.ledger.metrics().store_loads.get(), 1);
}

#[tokio::test]
async fn test_distributed_tier_outage_falls_back_to_store() {
    let h = harness();
    h.ledger.grant_balance("u1", dec!(10)).await.unwrap();
    h.distributed.set_unavailable(true);

    assert_eq!(h.ledger.get_balance("u1").await.unwrap().amount, dec!(10));
}

#[tokio::test]
async fn test_latest_history_is_bounded_and_signed() {
    let h = harness();
    for i in 1..=12 {
        h.ledger.grant_balance("u1", Decimal::from(i)).await.unwrap();
    }
    h.ledger.deduct_balance("u1", dec!(7)).await.unwrap();

    let rows = h.ledger.latest_history("u1").await.unwrap();
    assert_eq!(rows.len(), 10);
    assert_eq!(rows[0].history_type, HistoryType::Debit);
    assert_eq!(rows[0].amount, dec!(-7));
    assert_eq!(rows[0].notes, "Withdraw money");
    for pair in rows.windows(2) {
        assert!(pair[0].created_at >= pair[1].created_at);
    }

    // The cached copy keeps stored magnitudes
    let cached = h
        .distributed
        .get(&keys::latest_history("u1"))
        .await
        .unwrap()
        .unwrap();
    let cached: Vec<History> = serde_json::from_str(&cached).unwrap();
    assert_eq!(cached[0].amount, dec!(7));

    // Served from the cache, still rendered negative exactly once
    let again = h.ledger.latest_history("u1").await.unwrap();
    assert_eq!(again[0].amount, dec!(-7));
}

#[tokio::test]
async fn test_history_summary_order() {
    let h = harness();
    h.ledger.grant_balance("alice", dec!(100)).await.unwrap();
    h.ledger.disburse(&disbursement("alice", "bob", dec!(10))).await.unwrap();
    h.ledger.disburse(&disbursement("alice", "carol", dec!(30))).await.unwrap();
    h.ledger.disburse(&disbursement("alice", "bob", dec!(5))).await.unwrap();

    let sent = h
        .ledger
        .history_summary_by_type("alice", HistoryType::Debit)
        .await
        .unwrap();
    let sent: Vec<(&str, Decimal)> = sent
        .iter()
        .map(|s| (s.target_user_id.as_str(), s.amount))
        .collect();
    assert_eq!(sent, vec![("carol", dec!(30)), ("bob", dec!(15))]);

    let received = h
        .ledger
        .history_summary_by_type("bob", HistoryType::Credit)
        .await
        .unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].target_user_id, "alice");
    assert_eq!(received[0].amount, dec!(15));
}
