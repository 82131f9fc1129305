use crate::discovery::CutoffDiscoveryEngine;
use crate::models::{
    CutoffRecord, ExecutionHandle, ExecutionReport, TimeRange, ValidationResult,
};
use crate::store::CutoffStore;
use crate::validator;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use dashmap::DashMap;
use log::{info, warn};
use std::sync::Arc;
use uuid::Uuid;

/// Remote execution collaborator. The coordinator only adjusts the range
/// before delegating; it never interprets the result.
#[async_trait]
pub trait BacktestExecutor: Send + Sync {
    async fn execute(&self, market_id: &str, range: TimeRange) -> Result<ExecutionHandle>;
}

#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub market_id: String,
    pub range: TimeRange,
    /// Accept a proposed range adjustment and proceed instead of rejecting.
    pub auto_adjust: bool,
    /// Rediscover the cutoff even when a record already exists.
    pub force_rediscover: bool,
}

/// What the caller gets back: either a delegated execution (annotated with
/// any adjustment applied) or the validation verdict that stopped it.
#[derive(Debug, Clone)]
pub enum ExecutionOutcome {
    Executed(ExecutionReport),
    Rejected(ValidationResult),
}

/// Orchestrates lookup, discovery, validation and delegation for callers
/// that want to "just run a backtest reliably".
///
/// Per request: LOOKUP -> (HIT | MISS) -> [MISS: DISCOVER] -> VALIDATE ->
/// (ADJUST | REJECT | PASS) -> DELEGATE.
pub struct ExecutionCoordinator {
    store: Arc<CutoffStore>,
    engine: CutoffDiscoveryEngine,
    executor: Arc<dyn BacktestExecutor>,
    /// Single-flight guards, keyed by market. Concurrent discovery requests
    /// for the same market share one probe run; distinct markets proceed
    /// concurrently.
    discovery_flights: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    max_record_age: Duration,
}

impl ExecutionCoordinator {
    pub fn new(
        store: Arc<CutoffStore>,
        engine: CutoffDiscoveryEngine,
        executor: Arc<dyn BacktestExecutor>,
        max_record_age: Duration,
    ) -> Self {
        Self {
            store,
            engine,
            executor,
            discovery_flights: DashMap::new(),
            max_record_age,
        }
    }

    /// Returns the current cutoff record for a market, discovering it first
    /// when missing or when a refresh is forced. A stale record is still
    /// returned as a hint unless the caller forces rediscovery.
    pub async fn ensure_cutoff(
        &self,
        market_id: &str,
        force_rediscover: bool,
    ) -> Result<CutoffRecord> {
        if !force_rediscover {
            if let Some(record) = self.store.get(market_id) {
                if record.is_stale(self.max_record_age) {
                    warn!(
                        "Cutoff record for {} is stale (discovered {}); using it as a hint",
                        market_id,
                        record.discovered_at.format("%Y-%m-%d")
                    );
                }
                return Ok(record);
            }
        }

        let requested_at = Utc::now();
        let flight = self
            .discovery_flights
            .entry(market_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let _guard = flight.lock().await;

        // Another flight may have finished while this caller waited; reuse
        // its record instead of probing again.
        if let Some(record) = self.store.get(market_id) {
            if !force_rediscover || record.discovered_at >= requested_at {
                return Ok(record);
            }
        }

        let record = self.engine.discover(market_id).await?;
        self.store
            .put(record.clone())
            .with_context(|| format!("failed to persist cutoff record for {}", market_id))?;
        Ok(record)
    }

    /// Validates a requested range. When `auto_discover` is false and the
    /// market has no record, the verdict is `UnknownMarket` and the caller
    /// must trigger discovery explicitly.
    pub async fn validate_period(
        &self,
        market_id: &str,
        range: TimeRange,
        auto_discover: bool,
    ) -> Result<ValidationResult> {
        let record = if auto_discover {
            Some(self.ensure_cutoff(market_id, false).await?)
        } else {
            self.store.get(market_id)
        };
        Ok(validator::validate(record.as_ref(), range))
    }

    pub async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionOutcome> {
        let request_id = Uuid::new_v4();
        info!(
            "Execution request {} for {} [{}] (auto_adjust={}, force_rediscover={})",
            request_id, request.market_id, request.range, request.auto_adjust, request.force_rediscover
        );
        let record = self
            .ensure_cutoff(&request.market_id, request.force_rediscover)
            .await?;
        let verdict = validator::validate(Some(&record), request.range);

        let executed_range = if verdict.is_valid {
            request.range
        } else if request.auto_adjust {
            match verdict.adjusted_range {
                Some(adjusted) => {
                    info!(
                        "Request {}: adjusting range for {} from [{}] to [{}] ({})",
                        request_id,
                        request.market_id,
                        verdict.requested_range,
                        adjusted,
                        verdict.reason.as_str()
                    );
                    adjusted
                }
                // No usable adjustment exists (e.g. the whole window predates
                // available data); surface the verdict instead of executing.
                None => return Ok(ExecutionOutcome::Rejected(verdict)),
            }
        } else {
            info!(
                "Request {}: rejecting execution for {}: {} (suggestion included: {})",
                request_id,
                request.market_id,
                verdict.reason.as_str(),
                verdict.adjusted_range.is_some()
            );
            return Ok(ExecutionOutcome::Rejected(verdict));
        };

        let handle = self
            .executor
            .execute(&request.market_id, executed_range)
            .await
            .with_context(|| format!("execution delegation failed for {}", request.market_id))?;

        Ok(ExecutionOutcome::Executed(ExecutionReport {
            handle,
            requested_range: request.range,
            executed_range,
            adjustment_seconds: (executed_range.start - request.range.start).num_seconds(),
        }))
    }
}
