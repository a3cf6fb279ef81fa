use clap::Parser;
use perp_engine::cli::{Cli, Commands};
use perp_engine::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Warning: Could not load config from {}: {:#}", cli.config, e);
            eprintln!("Using default configuration");
            toml::from_str(include_str!("../config.toml.example"))?
        }
    };

    // Initialize telemetry
    perp_engine::telemetry::init_telemetry(&config.telemetry)?;

    match cli.command {
        Commands::Backtest(args) => {
            tracing::info!("Starting backtest");
            args.execute(config).await?;
        }
        Commands::Run(args) => {
            tracing::info!("Starting paper trading mode");
            args.execute(config).await?;
        }
        Commands::Fetch(args) => {
            tracing::info!("Starting candle download");
            args.execute(config).await?;
        }
        Commands::Config => {
            println!("# Effective configuration ({})", cli.config);
            print!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
