use crate::context::AppContext;
use anyhow::Result;
use log::info;
use std::path::Path;

pub async fn run(app: &AppContext, input_path: &Path) -> Result<()> {
    let store = app.store()?;
    let count = store.import_from(input_path)?;
    info!(
        "Imported {} cutoff record(s) from {}",
        count,
        input_path.display()
    );
    Ok(())
}
