use thiserror::Error;

/// Transport-level failure while probing the platform chart endpoint.
///
/// Slow responses, throttling and malformed bodies are not errors; they map
/// to an inconclusive probe observation instead. Only a hard failure to reach
/// the platform at all surfaces as `ProbeError`.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("platform request failed: {0}")]
    Transport(String),
}

#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The very first probe of a discovery run could not reach the platform.
    /// Failing fast here avoids emitting a record based on zero observations.
    #[error("platform unreachable while probing {market_id}: {source}")]
    PlatformUnreachable {
        market_id: String,
        #[source]
        source: ProbeError,
    },
    /// The market has no data anywhere inside the search window.
    #[error("no historical data available for {market_id} within the search window")]
    NoData { market_id: String },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to {action} {path}: {source}")]
    Io {
        action: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode cutoff record for {market_id}: {source}")]
    Encode {
        market_id: String,
        #[source]
        source: serde_json::Error,
    },
    /// The staged copy of a record did not read back as valid JSON. The
    /// previous durable copy is left untouched when this happens.
    #[error("staged record for {market_id} at {path} failed verification")]
    StagingVerification { market_id: String, path: String },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    pub fn io(action: &'static str, path: &std::path::Path, source: std::io::Error) -> Self {
        StoreError::Io {
            action,
            path: path.display().to_string(),
            source,
        }
    }
}
