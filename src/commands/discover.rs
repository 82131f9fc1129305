use crate::context::AppContext;
use anyhow::Result;
use log::info;

pub async fn run(app: &AppContext, market_id: &str, force: bool) -> Result<()> {
    let coordinator = app.coordinator()?;
    let record = coordinator.ensure_cutoff(market_id, force).await?;

    info!(
        "Cutoff for {}: {} (precision {}h, confidence {}, {} probes, discovered {})",
        record.market_id,
        record.cutoff_timestamp.format("%Y-%m-%d %H:%M:%S"),
        record.precision().num_hours(),
        record.source_confidence.as_str(),
        record.probe_count,
        record.discovered_at.format("%Y-%m-%d %H:%M:%S")
    );
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}
