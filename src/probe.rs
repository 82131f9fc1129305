use crate::errors::ProbeError;
use crate::platform::{ChartFetch, PlatformClient};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::debug;
use std::sync::Arc;

/// Outcome of a single "does data exist at time T" check.
///
/// `Inconclusive` covers timeouts, throttling and malformed responses. It is
/// never treated as `DataAbsent`; doing so would bias discovery toward a
/// later, incorrect cutoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResult {
    DataPresent,
    DataAbsent,
    Inconclusive,
}

/// A single existence check against the external market-data source. Has no
/// local state; retries are the caller's responsibility.
#[async_trait]
pub trait MarketProbe: Send + Sync {
    async fn probe(
        &self,
        market_id: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<ProbeResult, ProbeError>;
}

/// Probes the platform chart endpoint by requesting a small candle window
/// starting at the probed timestamp and checking whether it comes back empty.
pub struct HttpMarketProbe {
    client: Arc<PlatformClient>,
}

impl HttpMarketProbe {
    pub fn new(client: Arc<PlatformClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MarketProbe for HttpMarketProbe {
    async fn probe(
        &self,
        market_id: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<ProbeResult, ProbeError> {
        let window_end = timestamp + self.client.probe_window();
        let result = match self.client.fetch_candles(market_id, timestamp, window_end).await? {
            ChartFetch::Candles(candles) if !candles.is_empty() => ProbeResult::DataPresent,
            ChartFetch::Candles(_) | ChartFetch::NotFound => ProbeResult::DataAbsent,
            ChartFetch::Inconclusive => ProbeResult::Inconclusive,
        };
        debug!(
            "Probe {} at {}: {:?}",
            market_id,
            timestamp.format("%Y-%m-%d %H:%M:%S"),
            result
        );
        Ok(result)
    }
}
