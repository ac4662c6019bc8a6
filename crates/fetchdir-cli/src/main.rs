use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "fetchdir")]
#[command(about = "Fetcher directory service command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the HTTP API server.
    Serve,
    /// Apply pending database migrations and exit.
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fetchdir_web=debug,fetchdir_store=debug,axum=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => fetchdir_web::serve_from_env().await?,
        Commands::Migrate => {
            let config = fetchdir_web::ServerConfig::from_env();
            let store = fetchdir_store::FetcherStore::connect(&config.database_url).await?;
            store.migrate().await?;
            println!("migrations applied to {}", config.database_url);
        }
    }

    Ok(())
}
