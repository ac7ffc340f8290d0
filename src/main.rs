use anyhow::Result;
use canvas_sync::cli::{init_tracing, load_config, Cli, CliState};
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    init_tracing(&config);

    let state = CliState::initialize(config)?;
    let output = state.execute(&cli.command).await?;
    print!("{}", output);
    Ok(())
}
