use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::collections::HashMap;
use std::path::PathBuf;

const SETTING_KEYS: [&str; 9] = [
    "PLATFORM_BASE_URL",
    "PLATFORM_API_KEY",
    "CUTOFF_STORE_DIR",
    "CUTOFF_EARLIEST_PLAUSIBLE",
    "CUTOFF_PRECISION_TARGET_HOURS",
    "CUTOFF_MAX_PROBES",
    "CUTOFF_MAX_RECORD_AGE_DAYS",
    "CUTOFF_DISCOVERY_DEADLINE_SECS",
    "CUTOFF_PROBE_WINDOW_HOURS",
];

const DEFAULT_STORE_DIR: &str = "../data/cutoffs";
const DEFAULT_EARLIEST_PLAUSIBLE: &str = "2010-01-01";
const DEFAULT_PRECISION_TARGET_HOURS: u32 = 24;
const DEFAULT_MAX_PROBES: u32 = 15;
const DEFAULT_MAX_RECORD_AGE_DAYS: u32 = 30;
const DEFAULT_DISCOVERY_DEADLINE_SECS: u64 = 120;
const DEFAULT_PROBE_WINDOW_HOURS: u32 = 24;
const DEFAULT_PROBE_RETRY_DELAY_MS: u64 = 500;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Raw string settings, collected from the process environment. Kept as a
/// plain map so tests can construct settings without touching env vars.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    values: HashMap<String, String>,
}

impl Settings {
    pub fn from_env() -> Self {
        let mut values = HashMap::new();
        for key in SETTING_KEYS {
            if let Ok(value) = std::env::var(key) {
                let trimmed = value.trim().to_string();
                if !trimmed.is_empty() {
                    values.insert(key.to_string(), trimmed);
                }
            }
        }
        Self { values }
    }

    pub fn from_map(values: HashMap<String, String>) -> Self {
        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }
}

/// Search parameters for cutoff discovery.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Lower bound of the search window; no market is assumed to have data
    /// before this instant.
    pub earliest_plausible: DateTime<Utc>,
    /// Discovery stops once the uncertainty window shrinks below this.
    pub precision_target: Duration,
    pub max_probes: u32,
    /// Base delay before retrying an inconclusive or failed probe.
    pub probe_retry_delay_ms: u64,
    /// Overall wall-clock budget for one discovery run.
    pub deadline: std::time::Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            earliest_plausible: date_to_utc(
                NaiveDate::parse_from_str(DEFAULT_EARLIEST_PLAUSIBLE, "%Y-%m-%d")
                    .expect("default earliest plausible date is valid"),
            ),
            precision_target: Duration::hours(DEFAULT_PRECISION_TARGET_HOURS as i64),
            max_probes: DEFAULT_MAX_PROBES,
            probe_retry_delay_ms: DEFAULT_PROBE_RETRY_DELAY_MS,
            deadline: std::time::Duration::from_secs(DEFAULT_DISCOVERY_DEADLINE_SECS),
        }
    }
}

impl DiscoveryConfig {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let defaults = Self::default();
        let earliest_plausible = match settings.get("CUTOFF_EARLIEST_PLAUSIBLE") {
            Some(raw) => date_to_utc(parse_setting_date("CUTOFF_EARLIEST_PLAUSIBLE", raw)?),
            None => defaults.earliest_plausible,
        };
        let precision_hours = setting_u32(
            settings,
            "CUTOFF_PRECISION_TARGET_HOURS",
            DEFAULT_PRECISION_TARGET_HOURS,
            1,
        )?;
        let max_probes = setting_u32(settings, "CUTOFF_MAX_PROBES", DEFAULT_MAX_PROBES, 2)?;
        let deadline_secs = setting_u64(
            settings,
            "CUTOFF_DISCOVERY_DEADLINE_SECS",
            DEFAULT_DISCOVERY_DEADLINE_SECS,
            1,
        )?;

        Ok(Self {
            earliest_plausible,
            precision_target: Duration::hours(precision_hours as i64),
            max_probes,
            probe_retry_delay_ms: DEFAULT_PROBE_RETRY_DELAY_MS,
            deadline: std::time::Duration::from_secs(deadline_secs),
        })
    }
}

#[derive(Debug, Clone)]
pub struct PlatformConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout: std::time::Duration,
    /// Width of the candle window requested per probe. The probe only cares
    /// whether the window is empty, so this just has to cover at least one
    /// candle interval.
    pub probe_window: Duration,
}

impl PlatformConfig {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let base_url = settings
            .get("PLATFORM_BASE_URL")
            .map(|value| value.trim_end_matches('/').to_string())
            .ok_or_else(|| {
                anyhow!("PLATFORM_BASE_URL must be set for commands that reach the platform")
            })?;
        let api_key = settings.get("PLATFORM_API_KEY").map(|value| value.to_string());
        let probe_window_hours = setting_u32(
            settings,
            "CUTOFF_PROBE_WINDOW_HOURS",
            DEFAULT_PROBE_WINDOW_HOURS,
            1,
        )?;

        Ok(Self {
            base_url,
            api_key,
            timeout: std::time::Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
            probe_window: Duration::hours(probe_window_hours as i64),
        })
    }
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub dir: PathBuf,
    /// Records older than this are treated as stale hints.
    pub max_record_age: Duration,
}

impl StoreConfig {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let dir = settings
            .get("CUTOFF_STORE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_DIR));
        let max_age_days = setting_u32(
            settings,
            "CUTOFF_MAX_RECORD_AGE_DAYS",
            DEFAULT_MAX_RECORD_AGE_DAYS,
            1,
        )?;
        Ok(Self {
            dir,
            max_record_age: Duration::days(max_age_days as i64),
        })
    }
}

fn date_to_utc(date: NaiveDate) -> DateTime<Utc> {
    DateTime::from_naive_utc_and_offset(
        date.and_hms_opt(0, 0, 0).expect("midnight is always valid"),
        Utc,
    )
}

pub fn parse_setting_date(key: &str, raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|_| {
        anyhow!(
            "Setting {} must be a date in YYYY-MM-DD format (value: {})",
            key,
            raw
        )
    })
}

fn setting_u32(settings: &Settings, key: &str, default: u32, min: u32) -> Result<u32> {
    let Some(raw) = settings.get(key) else {
        return Ok(default);
    };
    let value = raw
        .parse::<u32>()
        .map_err(|_| anyhow!("Setting {} must be an integer (value: {})", key, raw))?;
    if value < min {
        return Err(anyhow!(
            "Setting {} must be >= {} (value: {})",
            key,
            min,
            raw
        ));
    }
    Ok(value)
}

fn setting_u64(settings: &Settings, key: &str, default: u64, min: u64) -> Result<u64> {
    let Some(raw) = settings.get(key) else {
        return Ok(default);
    };
    let value = raw
        .parse::<u64>()
        .map_err(|_| anyhow!("Setting {} must be an integer (value: {})", key, raw))?;
    if value < min {
        return Err(anyhow!(
            "Setting {} must be >= {} (value: {})",
            key,
            min,
            raw
        ));
    }
    Ok(value)
}
