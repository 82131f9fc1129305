use crate::context::AppContext;
use crate::models::{TimeRange, ValidationResult};
use crate::validator;
use anyhow::Result;
use log::info;

pub async fn run(
    app: &AppContext,
    market_id: &str,
    range: TimeRange,
    auto_discover: bool,
) -> Result<()> {
    // Without auto-discovery this command only needs the local store, so the
    // platform configuration stays optional for it.
    let verdict: ValidationResult = if auto_discover {
        let coordinator = app.coordinator()?;
        coordinator.validate_period(market_id, range, true).await?
    } else {
        let store = app.store()?;
        validator::validate(store.get(market_id).as_ref(), range)
    };

    info!(
        "Validation for {} [{}]: {} ({})",
        market_id,
        range,
        if verdict.is_valid { "valid" } else { "invalid" },
        verdict.reason.as_str()
    );
    println!("{}", serde_json::to_string_pretty(&verdict)?);
    Ok(())
}
