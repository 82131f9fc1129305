use crate::models::{CutoffRecord, SourceConfidence};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Operator-facing statistics over the stored cutoff dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CutoffSummary {
    pub total_records: usize,
    pub exact: usize,
    pub bounded: usize,
    pub stale: usize,
    pub total_probes: u64,
    pub oldest_discovery: Option<DateTime<Utc>>,
    pub newest_discovery: Option<DateTime<Utc>>,
}

/// Counts records by effective confidence (age-adjusted) and sums the probe
/// cost that went into the dataset.
pub fn summarize(records: &[CutoffRecord], max_record_age: Duration) -> CutoffSummary {
    let mut summary = CutoffSummary {
        total_records: records.len(),
        exact: 0,
        bounded: 0,
        stale: 0,
        total_probes: 0,
        oldest_discovery: None,
        newest_discovery: None,
    };

    for record in records {
        match record.effective_confidence(max_record_age) {
            SourceConfidence::Exact => summary.exact += 1,
            SourceConfidence::Bounded => summary.bounded += 1,
            SourceConfidence::Stale => summary.stale += 1,
        }
        summary.total_probes += record.probe_count as u64;
        summary.oldest_discovery = match summary.oldest_discovery {
            Some(oldest) if oldest <= record.discovered_at => Some(oldest),
            _ => Some(record.discovered_at),
        };
        summary.newest_discovery = match summary.newest_discovery {
            Some(newest) if newest >= record.discovered_at => Some(newest),
            _ => Some(record.discovered_at),
        };
    }

    summary
}
