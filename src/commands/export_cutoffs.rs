use crate::context::AppContext;
use anyhow::Result;
use log::info;
use std::path::Path;

pub async fn run(app: &AppContext, output_path: &Path) -> Result<()> {
    let store = app.store()?;
    let count = store.export_to(output_path)?;
    info!(
        "Exported {} cutoff record(s) to {}",
        count,
        output_path.display()
    );
    Ok(())
}
