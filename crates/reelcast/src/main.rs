use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use reelcast::{config::Config, session};

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "reelcast=debug,reelcast_media=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Reelcast publisher...");

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Invalid configuration: {:#}", e);
            return ExitCode::from(session::EXIT_FAILURE);
        }
    };

    match session::run(config).await {
        Ok(summary) => {
            tracing::info!(
                "All media parsed and sent ({} units across {} stream(s))",
                summary.units_sent(),
                summary.reports.len()
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("Session aborted: {:#}", e);
            ExitCode::from(e.exit_code())
        }
    }
}
