//! clipforge CLI entrypoint

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use clipforge::cli::{Cli, ExitStatus};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    // Parse and execute CLI
    let cli = Cli::parse();
    let status = match cli.execute().await {
        Ok(status) => status,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitStatus::Failure
        }
    };

    std::process::exit(status.code());
}
