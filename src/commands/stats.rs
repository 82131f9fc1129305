use crate::context::AppContext;
use crate::summary;
use anyhow::Result;
use log::info;

pub async fn run(app: &AppContext) -> Result<()> {
    let store = app.store()?;
    let max_record_age = app.store_config()?.max_record_age;
    let summary = summary::summarize(&store.all(), max_record_age);

    info!(
        "Cutoff store: {} record(s) ({} exact, {} bounded, {} stale), {} probes consumed",
        summary.total_records, summary.exact, summary.bounded, summary.stale, summary.total_probes
    );
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
