use crate::output::{print_json, print_table};
use anyhow::{anyhow, Context};
use clap::Subcommand;
use stepgate_core::config::Config;
use stepgate_core::orchestrator::RunLedger;
use uuid::Uuid;

#[derive(Subcommand)]
pub enum RunsSubcommand {
    /// List recorded runs, newest first
    List,

    /// Show one run
    Show {
        /// Run id
        id: String,
    },
}

pub fn run(config: &Config, subcmd: RunsSubcommand, json: bool) -> anyhow::Result<()> {
    let ledger = open_ledger(config)?;
    match subcmd {
        RunsSubcommand::List => list(&ledger, json),
        RunsSubcommand::Show { id } => show(&ledger, &id),
    }
}

fn open_ledger(config: &Config) -> anyhow::Result<RunLedger> {
    let path = config
        .ledger_path
        .as_deref()
        .ok_or_else(|| anyhow!("no ledger_path configured; runs are only kept in memory"))?;
    RunLedger::open(path).with_context(|| format!("cannot open run ledger {}", path.display()))
}

fn list(ledger: &RunLedger, json: bool) -> anyhow::Result<()> {
    let runs = ledger.list_all()?;

    if json {
        return print_json(&runs);
    }

    if runs.is_empty() {
        println!("No runs.");
        return Ok(());
    }

    let rows = runs
        .iter()
        .map(|r| {
            vec![
                r.id.to_string(),
                r.state().to_string(),
                r.attempts().to_string(),
                r.executed_as.clone(),
                r.created_at.to_rfc3339(),
            ]
        })
        .collect();
    print_table(&["ID", "STATE", "ATTEMPTS", "ROLE", "CREATED"], rows);
    Ok(())
}

fn show(ledger: &RunLedger, id: &str) -> anyhow::Result<()> {
    let id = Uuid::parse_str(id).with_context(|| format!("invalid run id '{id}'"))?;
    let run = ledger.get(id)?;
    print_json(&run)
}
