use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// How much trust a cutoff record deserves.
///
/// `Stale` is computed at read time from `discovered_at` and the configured
/// maximum record age; discovery itself only ever emits `Exact` or `Bounded`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceConfidence {
    Exact,
    Bounded,
    Stale,
}

impl SourceConfidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceConfidence::Exact => "exact",
            SourceConfidence::Bounded => "bounded",
            SourceConfidence::Stale => "stale",
        }
    }
}

/// The earliest instant for which a market was confirmed to have price data,
/// as currently known, plus discovery diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CutoffRecord {
    pub market_id: String,
    pub cutoff_timestamp: DateTime<Utc>,
    /// Width of the remaining uncertainty window when discovery terminated.
    pub precision_seconds: i64,
    pub discovered_at: DateTime<Utc>,
    /// Probe calls consumed to produce this record.
    pub probe_count: u32,
    pub source_confidence: SourceConfidence,
}

impl CutoffRecord {
    pub fn precision(&self) -> Duration {
        Duration::seconds(self.precision_seconds)
    }

    pub fn is_stale(&self, max_age: Duration) -> bool {
        Utc::now() - self.discovered_at > max_age
    }

    /// Confidence after accounting for record age. A stale record is still a
    /// usable hint, but callers requesting a forced refresh should rediscover.
    pub fn effective_confidence(&self, max_age: Duration) -> SourceConfidence {
        if self.is_stale(max_age) {
            SourceConfidence::Stale
        } else {
            self.source_confidence
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}

impl std::fmt::Display for TimeRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} - {}",
            self.start.format("%Y-%m-%d %H:%M:%S"),
            self.end.format("%Y-%m-%d %H:%M:%S")
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationReason {
    Ok,
    StartBeforeCutoff,
    RangeEmptyAfterAdjustment,
    UnknownMarket,
}

impl ValidationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationReason::Ok => "ok",
            ValidationReason::StartBeforeCutoff => "start_before_cutoff",
            ValidationReason::RangeEmptyAfterAdjustment => "range_empty_after_adjustment",
            ValidationReason::UnknownMarket => "unknown_market",
        }
    }
}

/// Verdict for one requested backtest range. Produced per call, never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub requested_range: TimeRange,
    pub is_valid: bool,
    /// Present iff a usable adjustment was proposed. The caller decides
    /// whether to accept it; validation never substitutes silently.
    pub adjusted_range: Option<TimeRange>,
    pub reason: ValidationReason,
}

/// Opaque handle returned by the remote execution collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionHandle {
    pub id: String,
    pub status: String,
}

/// Outcome of a delegated execution, annotated with any range adjustment so
/// downstream consumers are never silently given a different range than they
/// asked for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub handle: ExecutionHandle,
    pub requested_range: TimeRange,
    pub executed_range: TimeRange,
    /// Seconds the start of the range moved forward; zero when no adjustment
    /// was applied.
    pub adjustment_seconds: i64,
}

impl ExecutionReport {
    pub fn was_adjusted(&self) -> bool {
        self.adjustment_seconds != 0
    }
}
