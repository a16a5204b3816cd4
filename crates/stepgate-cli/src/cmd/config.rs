use crate::output::print_json;
use clap::Subcommand;
use stepgate_core::config::Config;

// ---------------------------------------------------------------------------
// Subcommand types
// ---------------------------------------------------------------------------

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Print the resolved configuration with the credential value redacted
    Show,

    /// Exit 0 if the configuration resolves
    Validate,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// The configuration has already been loaded and validated by the time this
/// runs; a bad configuration never reaches here.
pub fn run(config: &Config, subcmd: ConfigSubcommand) -> anyhow::Result<()> {
    match subcmd {
        ConfigSubcommand::Show => print_json(&config.redacted()),
        ConfigSubcommand::Validate => {
            println!(
                "config OK: route={} bucket={} rate={}/s burst={}",
                config.route.as_str(),
                config.bucket_identifier,
                config.admission.steady_rate,
                config.admission.burst_capacity
            );
            Ok(())
        }
    }
}
