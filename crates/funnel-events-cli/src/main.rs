use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    let cli = funnel_events_cli::Cli::parse();
    funnel_events_cli::run_cli(cli)
}
