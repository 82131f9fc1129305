use crate::context::AppContext;
use crate::coordinator::{ExecutionOutcome, ExecutionRequest};
use crate::models::TimeRange;
use anyhow::Result;
use log::{info, warn};

pub async fn run(
    app: &AppContext,
    market_id: &str,
    range: TimeRange,
    auto_adjust: bool,
    force_rediscover: bool,
) -> Result<()> {
    let coordinator = app.coordinator()?;
    let outcome = coordinator
        .execute(ExecutionRequest {
            market_id: market_id.to_string(),
            range,
            auto_adjust,
            force_rediscover,
        })
        .await?;

    match outcome {
        ExecutionOutcome::Executed(report) => {
            if report.was_adjusted() {
                info!(
                    "Executed {} with adjusted range [{}] (start moved forward by {}h)",
                    market_id,
                    report.executed_range,
                    report.adjustment_seconds / 3600
                );
            } else {
                info!(
                    "Executed {} with requested range [{}]",
                    market_id, report.executed_range
                );
            }
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        ExecutionOutcome::Rejected(verdict) => {
            warn!(
                "Execution rejected for {}: {}{}",
                market_id,
                verdict.reason.as_str(),
                verdict
                    .adjusted_range
                    .map(|adjusted| format!("; suggested range [{}]", adjusted))
                    .unwrap_or_default()
            );
            println!("{}", serde_json::to_string_pretty(&verdict)?);
        }
    }
    Ok(())
}
