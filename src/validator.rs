use crate::models::{CutoffRecord, TimeRange, ValidationReason, ValidationResult};

/// Compares a requested backtest range against a known cutoff and produces a
/// verdict plus an optional adjusted range. The caller decides whether to
/// accept an adjustment; this function never substitutes silently.
///
/// Assumes `range.start < range.end`; inverted ranges are rejected at the
/// command boundary before they reach validation.
pub fn validate(record: Option<&CutoffRecord>, range: TimeRange) -> ValidationResult {
    let Some(record) = record else {
        return ValidationResult {
            requested_range: range,
            is_valid: false,
            adjusted_range: None,
            reason: ValidationReason::UnknownMarket,
        };
    };

    let cutoff = record.cutoff_timestamp;
    if range.start >= cutoff {
        return ValidationResult {
            requested_range: range,
            is_valid: true,
            adjusted_range: None,
            reason: ValidationReason::Ok,
        };
    }

    if range.end > cutoff {
        // Only the head of the range predates available data; propose
        // starting at the cutoff instead.
        ValidationResult {
            requested_range: range,
            is_valid: false,
            adjusted_range: Some(TimeRange::new(cutoff, range.end)),
            reason: ValidationReason::StartBeforeCutoff,
        }
    } else {
        // The entire requested window predates available data.
        ValidationResult {
            requested_range: range,
            is_valid: false,
            adjusted_range: None,
            reason: ValidationReason::RangeEmptyAfterAdjustment,
        }
    }
}
