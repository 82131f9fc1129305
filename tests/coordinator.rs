use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use cutoff_engine::config::DiscoveryConfig;
use cutoff_engine::coordinator::{
    BacktestExecutor, ExecutionCoordinator, ExecutionOutcome, ExecutionRequest,
};
use cutoff_engine::discovery::CutoffDiscoveryEngine;
use cutoff_engine::errors::{DiscoveryError, ProbeError};
use cutoff_engine::models::{ExecutionHandle, TimeRange, ValidationReason};
use cutoff_engine::probe::{MarketProbe, ProbeResult};
use cutoff_engine::store::CutoffStore;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Once};

fn ensure_test_env() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

fn temp_store_dir(tag: &str) -> PathBuf {
    std::env::temp_dir().join(format!("cutoff-coord-{}-{}", tag, fastrand::u64(..)))
}

/// Deterministic data source: candles exist from `cutoff` onward. Each probe
/// optionally sleeps so concurrent discovery runs overlap in time.
struct ScriptedProbe {
    cutoff: DateTime<Utc>,
    calls: AtomicU32,
    per_probe_delay: std::time::Duration,
    always_absent: bool,
}

impl ScriptedProbe {
    fn new(cutoff: DateTime<Utc>) -> Self {
        Self {
            cutoff,
            calls: AtomicU32::new(0),
            per_probe_delay: std::time::Duration::from_millis(0),
            always_absent: false,
        }
    }

    fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MarketProbe for ScriptedProbe {
    async fn probe(
        &self,
        _market_id: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<ProbeResult, ProbeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.per_probe_delay.is_zero() {
            tokio::time::sleep(self.per_probe_delay).await;
        }
        if self.always_absent {
            return Ok(ProbeResult::DataAbsent);
        }
        if timestamp >= self.cutoff {
            Ok(ProbeResult::DataPresent)
        } else {
            Ok(ProbeResult::DataAbsent)
        }
    }
}

#[derive(Default)]
struct RecordingExecutor {
    calls: Mutex<Vec<(String, TimeRange)>>,
}

impl RecordingExecutor {
    fn calls(&self) -> Vec<(String, TimeRange)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl BacktestExecutor for RecordingExecutor {
    async fn execute(&self, market_id: &str, range: TimeRange) -> Result<ExecutionHandle> {
        self.calls
            .lock()
            .unwrap()
            .push((market_id.to_string(), range));
        Ok(ExecutionHandle {
            id: uuid::Uuid::new_v4().to_string(),
            status: "submitted".to_string(),
        })
    }
}

fn test_discovery_config() -> DiscoveryConfig {
    DiscoveryConfig {
        earliest_plausible: Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap(),
        precision_target: Duration::hours(24),
        max_probes: 15,
        probe_retry_delay_ms: 1,
        deadline: std::time::Duration::from_secs(30),
    }
}

struct Harness {
    coordinator: Arc<ExecutionCoordinator>,
    probe: Arc<ScriptedProbe>,
    executor: Arc<RecordingExecutor>,
    store_dir: PathBuf,
}

fn harness(tag: &str, probe: ScriptedProbe) -> Harness {
    ensure_test_env();
    let store_dir = temp_store_dir(tag);
    let store = Arc::new(CutoffStore::open(&store_dir).unwrap());
    let probe = Arc::new(probe);
    let engine = CutoffDiscoveryEngine::new(probe.clone(), test_discovery_config());
    let executor = Arc::new(RecordingExecutor::default());
    let coordinator = Arc::new(ExecutionCoordinator::new(
        store,
        engine,
        executor.clone(),
        Duration::days(30),
    ));
    Harness {
        coordinator,
        probe,
        executor,
        store_dir,
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.store_dir);
    }
}

#[tokio::test]
async fn discovery_result_is_persisted_and_reused() {
    let cutoff = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
    let h = harness("persist", ScriptedProbe::new(cutoff));

    let first = h.coordinator.ensure_cutoff("BINANCE_BTC_USDT", false).await.unwrap();
    let probes_after_first = h.probe.call_count();
    assert!(probes_after_first > 0);
    assert_eq!(first.probe_count, probes_after_first);

    // Second lookup is a cache hit; no further probes.
    let second = h.coordinator.ensure_cutoff("BINANCE_BTC_USDT", false).await.unwrap();
    assert_eq!(h.probe.call_count(), probes_after_first);
    assert_eq!(second, first);

    // And the record survives a fresh store handle on the same directory.
    let reopened = CutoffStore::open(&h.store_dir).unwrap();
    assert_eq!(reopened.get("BINANCE_BTC_USDT"), Some(first));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_discovery_shares_one_probe_run() {
    let cutoff = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
    let mut probe = ScriptedProbe::new(cutoff);
    probe.per_probe_delay = std::time::Duration::from_millis(10);
    let h = harness("singleflight", probe);

    let a = {
        let coordinator = h.coordinator.clone();
        tokio::spawn(async move { coordinator.ensure_cutoff("BINANCE_ETH_USDT", false).await })
    };
    let b = {
        let coordinator = h.coordinator.clone();
        tokio::spawn(async move { coordinator.ensure_cutoff("BINANCE_ETH_USDT", false).await })
    };

    let record_a = a.await.unwrap().unwrap();
    let record_b = b.await.unwrap().unwrap();

    // Exactly one set of probes was issued; both callers see the same record.
    assert_eq!(h.probe.call_count(), record_a.probe_count);
    assert_eq!(record_a, record_b);
}

#[tokio::test]
async fn auto_adjust_moves_start_to_cutoff() {
    let cutoff = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
    let h = harness("adjust", ScriptedProbe::new(cutoff));
    let requested = TimeRange::new(cutoff - Duration::days(100), cutoff + Duration::days(100));

    let outcome = h
        .coordinator
        .execute(ExecutionRequest {
            market_id: "BINANCE_BTC_USDT".to_string(),
            range: requested,
            auto_adjust: true,
            force_rediscover: false,
        })
        .await
        .unwrap();

    let ExecutionOutcome::Executed(report) = outcome else {
        panic!("expected execution to proceed with an adjusted range");
    };
    assert!(report.was_adjusted());
    assert!(report.adjustment_seconds > 0);
    assert!(report.executed_range.start >= cutoff);
    assert_eq!(report.executed_range.end, requested.end);
    assert_eq!(report.requested_range, requested);

    let delegated = h.executor.calls();
    assert_eq!(delegated.len(), 1);
    assert_eq!(delegated[0].1, report.executed_range);
}

#[tokio::test]
async fn invalid_range_without_auto_adjust_is_rejected_with_suggestion() {
    let cutoff = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
    let h = harness("reject", ScriptedProbe::new(cutoff));
    let requested = TimeRange::new(cutoff - Duration::days(100), cutoff + Duration::days(100));

    let outcome = h
        .coordinator
        .execute(ExecutionRequest {
            market_id: "BINANCE_BTC_USDT".to_string(),
            range: requested,
            auto_adjust: false,
            force_rediscover: false,
        })
        .await
        .unwrap();

    let ExecutionOutcome::Rejected(verdict) = outcome else {
        panic!("expected a rejection");
    };
    assert_eq!(verdict.reason, ValidationReason::StartBeforeCutoff);
    assert!(verdict.adjusted_range.is_some());
    assert!(h.executor.calls().is_empty());
}

#[tokio::test]
async fn fully_predating_range_is_rejected_even_with_auto_adjust() {
    let cutoff = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
    let h = harness("empty", ScriptedProbe::new(cutoff));
    let requested = TimeRange::new(cutoff - Duration::days(200), cutoff - Duration::days(100));

    let outcome = h
        .coordinator
        .execute(ExecutionRequest {
            market_id: "BINANCE_BTC_USDT".to_string(),
            range: requested,
            auto_adjust: true,
            force_rediscover: false,
        })
        .await
        .unwrap();

    let ExecutionOutcome::Rejected(verdict) = outcome else {
        panic!("expected a rejection");
    };
    assert_eq!(verdict.reason, ValidationReason::RangeEmptyAfterAdjustment);
    assert!(verdict.adjusted_range.is_none());
    assert!(h.executor.calls().is_empty());
}

#[tokio::test]
async fn valid_range_passes_through_unchanged() {
    let cutoff = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
    let h = harness("pass", ScriptedProbe::new(cutoff));
    // Start comfortably after the discovered cutoff (which may sit up to one
    // precision unit after the true boundary).
    let requested = TimeRange::new(cutoff + Duration::days(30), cutoff + Duration::days(90));

    let outcome = h
        .coordinator
        .execute(ExecutionRequest {
            market_id: "BINANCE_BTC_USDT".to_string(),
            range: requested,
            auto_adjust: false,
            force_rediscover: false,
        })
        .await
        .unwrap();

    let ExecutionOutcome::Executed(report) = outcome else {
        panic!("expected execution");
    };
    assert!(!report.was_adjusted());
    assert_eq!(report.executed_range, requested);
}

#[tokio::test]
async fn force_rediscover_issues_new_probes() {
    let cutoff = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
    let h = harness("force", ScriptedProbe::new(cutoff));

    let first = h.coordinator.ensure_cutoff("BINANCE_BTC_USDT", false).await.unwrap();
    let probes_after_first = h.probe.call_count();

    let second = h.coordinator.ensure_cutoff("BINANCE_BTC_USDT", true).await.unwrap();
    assert!(h.probe.call_count() > probes_after_first);
    assert!(second.discovered_at >= first.discovered_at);

    // Rediscovery on an unchanged source stays within one precision unit.
    let drift = (second.cutoff_timestamp - first.cutoff_timestamp)
        .num_seconds()
        .abs();
    assert!(drift <= test_discovery_config().precision_target.num_seconds());
}

#[tokio::test]
async fn validation_without_discovery_reports_unknown_market() {
    let cutoff = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
    let h = harness("unknown", ScriptedProbe::new(cutoff));

    let verdict = h
        .coordinator
        .validate_period(
            "NEVER_SEEN_MARKET",
            TimeRange::new(cutoff, cutoff + Duration::days(10)),
            false,
        )
        .await
        .unwrap();
    assert_eq!(verdict.reason, ValidationReason::UnknownMarket);
    assert_eq!(h.probe.call_count(), 0);
}

#[tokio::test]
async fn market_with_no_data_surfaces_a_discovery_error() {
    let mut probe = ScriptedProbe::new(Utc::now());
    probe.always_absent = true;
    let h = harness("nodata", probe);

    let error = h
        .coordinator
        .ensure_cutoff("DELISTED_MARKET", false)
        .await
        .unwrap_err();
    let discovery_error = error
        .downcast_ref::<DiscoveryError>()
        .expect("error should carry the discovery failure");
    assert!(matches!(discovery_error, DiscoveryError::NoData { .. }));
}

#[tokio::test]
async fn corrupted_primary_is_recovered_from_backup_on_reload() {
    let cutoff = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
    let h = harness("corrupt", ScriptedProbe::new(cutoff));

    let original = h.coordinator.ensure_cutoff("BINANCE_BTC_USDT", false).await.unwrap();
    // A forced refresh writes a second copy, turning the first into a backup.
    h.coordinator.ensure_cutoff("BINANCE_BTC_USDT", true).await.unwrap();

    std::fs::write(h.store_dir.join("BINANCE_BTC_USDT.json"), b"{ corrupted").unwrap();

    let reopened = CutoffStore::open(&h.store_dir).unwrap();
    let recovered = reopened
        .get("BINANCE_BTC_USDT")
        .expect("record should be recovered from backup");
    assert_eq!(recovered.market_id, original.market_id);
    // The backup holds the first discovery's result.
    assert_eq!(recovered.discovered_at, original.discovered_at);
}
