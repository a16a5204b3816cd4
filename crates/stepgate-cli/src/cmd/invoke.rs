use anyhow::Context;
use stepgate_core::config::{Config, RouteMode};
use stepgate_core::orchestrator::RunState;
use stepgate_server::state::AppState;

use crate::output::print_json;

/// Run one payload through the configured route without the admission gate
/// or the authorizer. Useful for checking sink and role wiring.
pub fn run(config: &Config, payload: &str, json: bool) -> anyhow::Result<()> {
    let input: serde_json::Value =
        serde_json::from_str(payload).context("--payload is not valid JSON")?;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let app = AppState::from_config(config)?;
        match app.route {
            RouteMode::Direct => {
                let receipt = app.worker.execute(input).await?;
                if json {
                    print_json(&receipt)
                } else {
                    println!("{} {}", receipt.status, receipt.file);
                    Ok(())
                }
            }
            RouteMode::Orchestrated => {
                let run = app.orchestrator.start_run(input).await?;
                if json {
                    print_json(&run)?;
                } else {
                    println!("{} {}", run.id, run.state());
                }
                match run.state() {
                    RunState::Failed => Err(anyhow::anyhow!(
                        "run {} failed: {}",
                        run.id,
                        run.error().unwrap_or("unknown error")
                    )),
                    _ => Ok(()),
                }
            }
        }
    })
}
