use crate::context::AppContext;
use anyhow::{anyhow, Result};
use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use std::sync::Arc;

/// Discovers cutoffs for many markets with bounded concurrency. Markets are
/// independent, so their probe runs proceed in parallel; the coordinator's
/// single-flight guard still dedupes any repeated market in the input.
pub async fn run(app: &AppContext, markets: &[String], concurrency: usize, force: bool) -> Result<()> {
    if markets.is_empty() {
        return Err(anyhow!("at least one market id is required"));
    }
    let concurrency = concurrency.max(1);
    let coordinator = Arc::new(app.coordinator()?);

    info!(
        "Bulk discovery for {} market(s) with concurrency {}",
        markets.len(),
        concurrency
    );
    let progress = ProgressBar::new(markets.len() as u64);
    progress.set_style(
        ProgressStyle::with_template("{bar:40} {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    let results: Vec<(String, Result<()>)> = stream::iter(markets.iter().cloned())
        .map(|market_id| {
            let coordinator = coordinator.clone();
            let progress = progress.clone();
            async move {
                let result = coordinator
                    .ensure_cutoff(&market_id, force)
                    .await
                    .map(|_| ());
                progress.inc(1);
                progress.set_message(market_id.clone());
                (market_id, result)
            }
        })
        .buffer_unordered(concurrency)
        .collect()
        .await;
    progress.finish_and_clear();

    let mut failures = 0usize;
    for (market_id, result) in &results {
        if let Err(error) = result {
            failures += 1;
            warn!("Discovery failed for {}: {:#}", market_id, error);
        }
    }
    info!(
        "Bulk discovery finished: {} succeeded, {} failed",
        results.len() - failures,
        failures
    );

    if failures == results.len() {
        return Err(anyhow!("discovery failed for all requested markets"));
    }
    Ok(())
}
