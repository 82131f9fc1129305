use crate::config::DiscoveryConfig;
use crate::errors::{DiscoveryError, ProbeError};
use crate::models::{CutoffRecord, SourceConfidence};
use crate::probe::{MarketProbe, ProbeResult};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Instant;

/// Finds the earliest timestamp with available data for a market by running
/// an adaptive binary search over a monotonic but possibly noisy probe.
///
/// Invariant maintained by the search: data is absent (as far as observed)
/// for all `t < lo` and present for all `t >= hi`; the emitted cutoff is `hi`
/// and the precision is `hi - lo`.
pub struct CutoffDiscoveryEngine {
    probe: Arc<dyn MarketProbe>,
    config: DiscoveryConfig,
}

/// What one search step observed, after local retries.
enum Step {
    Observed(ProbeResult),
    Unreachable(ProbeError),
}

impl CutoffDiscoveryEngine {
    pub fn new(probe: Arc<dyn MarketProbe>, config: DiscoveryConfig) -> Self {
        Self { probe, config }
    }

    pub async fn discover(&self, market_id: &str) -> Result<CutoffRecord, DiscoveryError> {
        let started = Instant::now();
        let now = Utc::now();
        let mut lo = self.config.earliest_plausible;
        let mut hi = now;
        let mut probes_used = 0u32;
        let mut degraded = false;

        info!(
            "Discovering cutoff for {} in window {} - {}",
            market_id,
            lo.format("%Y-%m-%d"),
            hi.format("%Y-%m-%d")
        );

        // The first probe anchors the search; without at least one successful
        // observation a record would be pure guesswork, so fail fast instead.
        match self.probe_with_retry(market_id, hi, &mut probes_used).await {
            Step::Unreachable(source) => {
                return Err(DiscoveryError::PlatformUnreachable {
                    market_id: market_id.to_string(),
                    source,
                });
            }
            Step::Observed(ProbeResult::Inconclusive) => {
                return Err(DiscoveryError::PlatformUnreachable {
                    market_id: market_id.to_string(),
                    source: ProbeError::Transport(
                        "probe at the window end stayed inconclusive after retry".to_string(),
                    ),
                });
            }
            Step::Observed(ProbeResult::DataAbsent) => {
                return Err(DiscoveryError::NoData {
                    market_id: market_id.to_string(),
                });
            }
            Step::Observed(ProbeResult::DataPresent) => {}
        }

        match self.probe_with_retry(market_id, lo, &mut probes_used).await {
            Step::Observed(ProbeResult::DataPresent) => {
                // Data reaches back to the start of the window; nothing to
                // bisect.
                info!(
                    "{} has data at the earliest plausible timestamp; skipping search",
                    market_id
                );
                return Ok(self.emit(market_id, lo, lo, probes_used, SourceConfidence::Exact));
            }
            Step::Observed(ProbeResult::DataAbsent) => {}
            Step::Observed(ProbeResult::Inconclusive) => {
                // Can't trust either direction at the lower endpoint. Keep
                // the window as-is and let the bisection narrow it.
                degraded = true;
            }
            Step::Unreachable(error) => {
                warn!(
                    "Platform became unreachable after the first probe of {} ({}); emitting bounded record",
                    market_id, error
                );
                return Ok(self.emit(market_id, hi, lo, probes_used, SourceConfidence::Bounded));
            }
        }

        while hi - lo > self.config.precision_target && probes_used < self.config.max_probes {
            if started.elapsed() >= self.config.deadline {
                warn!(
                    "Discovery deadline reached for {} after {} probes; emitting bounded record",
                    market_id, probes_used
                );
                degraded = true;
                break;
            }

            let mid = lo + (hi - lo) / 2;
            match self.probe_with_retry(market_id, mid, &mut probes_used).await {
                Step::Observed(ProbeResult::DataPresent) => hi = mid,
                Step::Observed(ProbeResult::DataAbsent) => lo = mid,
                Step::Observed(ProbeResult::Inconclusive) => {
                    // Never treat an inconclusive observation as absent:
                    // narrow toward hi as a soft present and degrade the
                    // record's confidence.
                    hi = mid;
                    degraded = true;
                }
                Step::Unreachable(error) => {
                    warn!(
                        "Platform became unreachable mid-search for {} ({}); emitting bounded record",
                        market_id, error
                    );
                    degraded = true;
                    break;
                }
            }
            debug!(
                "Search window for {} now {} - {} ({} probes used)",
                market_id,
                lo.format("%Y-%m-%d %H:%M"),
                hi.format("%Y-%m-%d %H:%M"),
                probes_used
            );
        }

        let confidence = if !degraded && hi - lo <= self.config.precision_target {
            SourceConfidence::Exact
        } else {
            SourceConfidence::Bounded
        };
        Ok(self.emit(market_id, hi, lo, probes_used, confidence))
    }

    fn emit(
        &self,
        market_id: &str,
        hi: DateTime<Utc>,
        lo: DateTime<Utc>,
        probes_used: u32,
        confidence: SourceConfidence,
    ) -> CutoffRecord {
        let record = CutoffRecord {
            market_id: market_id.to_string(),
            cutoff_timestamp: hi,
            precision_seconds: (hi - lo).num_seconds().max(0),
            discovered_at: Utc::now(),
            probe_count: probes_used,
            source_confidence: confidence,
        };
        info!(
            "Cutoff for {}: {} (precision {}h, {} probes, confidence {})",
            market_id,
            record.cutoff_timestamp.format("%Y-%m-%d %H:%M:%S"),
            record.precision().num_hours(),
            record.probe_count,
            record.source_confidence.as_str()
        );
        record
    }

    /// One search step: a probe plus a single backoff retry when the first
    /// attempt fails or comes back inconclusive. Retries stay local; the
    /// search loop only ever sees the settled outcome.
    async fn probe_with_retry(
        &self,
        market_id: &str,
        timestamp: DateTime<Utc>,
        probes_used: &mut u32,
    ) -> Step {
        let first = self.probe_once(market_id, timestamp, probes_used).await;
        let retryable = matches!(
            first,
            Step::Observed(ProbeResult::Inconclusive) | Step::Unreachable(_)
        );
        // The probe budget is a hard cap; a retry that would exceed it is
        // skipped and the first outcome stands.
        if !retryable || *probes_used >= self.config.max_probes {
            return first;
        }

        let base = self.config.probe_retry_delay_ms;
        let jitter = fastrand::u64(0..=base / 2 + 1);
        tokio::time::sleep(std::time::Duration::from_millis(base + jitter)).await;
        debug!(
            "Retrying probe of {} at {} after backoff",
            market_id,
            timestamp.format("%Y-%m-%d %H:%M")
        );
        self.probe_once(market_id, timestamp, probes_used).await
    }

    async fn probe_once(
        &self,
        market_id: &str,
        timestamp: DateTime<Utc>,
        probes_used: &mut u32,
    ) -> Step {
        *probes_used += 1;
        match self.probe.probe(market_id, timestamp).await {
            Ok(result) => Step::Observed(result),
            Err(error) => Step::Unreachable(error),
        }
    }
}
