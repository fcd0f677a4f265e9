use clap::Parser;
use rfp_cli::Cli;
use rfp_rag::Settings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    rfp_cli::load_env_file(&cli.env_file)?;
    rfp_cli::init_tracing();

    let settings = Settings::from_env()?;
    rfp_cli::run(cli.command, &settings).await
}
