use crate::config::PlatformConfig;
use crate::coordinator::BacktestExecutor;
use crate::errors::ProbeError;
use crate::models::{ExecutionHandle, TimeRange};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use log::warn;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, StatusCode};
use serde::de::{self, Deserializer, Visitor};
use serde::Deserialize;
use std::fmt;

const API_KEY_HEADER: &str = "x-api-key";
const REQUEST_DELAY: std::time::Duration = std::time::Duration::from_millis(250);
const MAX_ERROR_BODY_CHARS: usize = 2048;

/// What a chart request observed. Throttling, timeouts and malformed bodies
/// all collapse into `Inconclusive`; only a failure to reach the platform at
/// all is surfaced as `ProbeError`.
pub enum ChartFetch {
    Candles(Vec<ChartCandle>),
    NotFound,
    Inconclusive,
}

/// HTTP client for the remote trading platform's chart and backtest
/// endpoints.
pub struct PlatformClient {
    http: Client,
    base_url: String,
    headers: HeaderMap,
    probe_window: Duration,
}

impl PlatformClient {
    pub fn new(config: &PlatformConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .context("failed to build HTTP client")?;

        let mut headers = HeaderMap::new();
        if let Some(api_key) = config.api_key.as_deref() {
            headers.insert(
                API_KEY_HEADER,
                HeaderValue::from_str(api_key).context("invalid platform API key")?,
            );
        }

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            headers,
            probe_window: config.probe_window,
        })
    }

    pub fn probe_window(&self) -> Duration {
        self.probe_window
    }

    pub async fn fetch_candles(
        &self,
        market_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<ChartFetch, ProbeError> {
        tokio::time::sleep(REQUEST_DELAY).await;
        let url = format!("{}/api/charts", self.base_url);
        let response = self
            .http
            .get(&url)
            .headers(self.headers.clone())
            .query(&[
                ("market", market_id),
                ("from", &from.to_rfc3339()),
                ("to", &to.to_rfc3339()),
            ])
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(error) if error.is_timeout() => {
                warn!("Chart request for {} timed out", market_id);
                return Ok(ChartFetch::Inconclusive);
            }
            Err(error) => {
                return Err(ProbeError::Transport(format!(
                    "GET {} failed: {}",
                    url, error
                )));
            }
        };

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(ChartFetch::NotFound);
        }
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            warn!(
                "Chart request for {} returned status {}; treating as inconclusive",
                market_id, status
            );
            return Ok(ChartFetch::Inconclusive);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(
                "Chart request for {} rejected: status={} body={}",
                market_id,
                status,
                truncate_for_log(&body, MAX_ERROR_BODY_CHARS)
            );
            return Ok(ChartFetch::Inconclusive);
        }

        match response.json::<Vec<ChartCandle>>().await {
            Ok(candles) => Ok(ChartFetch::Candles(candles)),
            Err(error) => {
                warn!(
                    "Chart response for {} was malformed: {}; treating as inconclusive",
                    market_id, error
                );
                Ok(ChartFetch::Inconclusive)
            }
        }
    }

    pub async fn submit_backtest(
        &self,
        market_id: &str,
        range: TimeRange,
    ) -> Result<ExecutionHandle> {
        tokio::time::sleep(REQUEST_DELAY).await;
        let url = format!("{}/api/backtests", self.base_url);
        let request_body = serde_json::json!({
            "market": market_id,
            "start": range.start.to_rfc3339(),
            "end": range.end.to_rfc3339(),
        });

        let response = self
            .http
            .post(&url)
            .headers(self.headers.clone())
            .json(&request_body)
            .send()
            .await
            .with_context(|| format!("POST {} failed", url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!(
                "backtest submission for {} rejected: status={} body={}",
                market_id,
                status,
                truncate_for_log(&body, MAX_ERROR_BODY_CHARS)
            ));
        }

        let submitted: BacktestSubmitted = response
            .json()
            .await
            .context("failed to parse backtest submission response")?;
        Ok(ExecutionHandle {
            id: submitted.id,
            status: submitted.status.unwrap_or_else(|| "submitted".to_string()),
        })
    }
}

#[async_trait]
impl BacktestExecutor for PlatformClient {
    async fn execute(&self, market_id: &str, range: TimeRange) -> Result<ExecutionHandle> {
        self.submit_backtest(market_id, range).await
    }
}

#[derive(Debug, Deserialize)]
pub struct ChartCandle {
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default, deserialize_with = "deserialize_f64_opt")]
    pub open: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_f64_opt")]
    pub close: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_f64_opt")]
    pub volume: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct BacktestSubmitted {
    id: String,
    #[serde(default)]
    status: Option<String>,
}

// The platform serializes prices inconsistently (numbers in some endpoints,
// strings in others), so accept both.
fn deserialize_f64_opt<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    struct F64OptVisitor;

    impl<'de> Visitor<'de> for F64OptVisitor {
        type Value = Option<f64>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a number or string")
        }

        fn visit_none<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(None)
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(None)
        }

        fn visit_f64<E>(self, value: f64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Some(value))
        }

        fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Some(value as f64))
        }

        fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Some(value as f64))
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(value.trim().parse::<f64>().ok())
        }

        fn visit_string<E>(self, value: String) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(value.trim().parse::<f64>().ok())
        }
    }

    deserializer.deserialize_any(F64OptVisitor)
}

fn truncate_for_log(value: &str, max_chars: usize) -> String {
    let trimmed = value.trim();
    let mut iter = trimmed.chars();
    let mut out = String::new();
    for _ in 0..max_chars {
        let Some(ch) = iter.next() else {
            return trimmed.to_string();
        };
        out.push(ch);
    }
    if iter.next().is_some() {
        out.push('…');
    }
    out
}
