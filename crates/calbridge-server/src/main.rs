//! calbridge server entry point.

use std::process::ExitCode;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info};

use calbridge_core::{TracingConfig, init_tracing};
use calbridge_server::app::App;
use calbridge_server::cli::{Cli, Command, ConfigAction};
use calbridge_server::config::Config;
use calbridge_server::error::{ServerError, ServerResult};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> ServerResult<()> {
    let mut config = match cli.config {
        Some(ref path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    match cli.command {
        Some(Command::Config { action }) => match action {
            ConfigAction::Dump => {
                let dump = toml::to_string_pretty(&config.redacted())
                    .map_err(|e| ServerError::config(format!("failed to render config: {}", e)))?;
                print!("{}", dump);
                Ok(())
            }
            ConfigAction::Validate => {
                config.google.resolve_credentials()?;
                println!("configuration is valid");
                Ok(())
            }
            ConfigAction::Path => {
                println!("{}", Config::default_path().display());
                Ok(())
            }
        },
        Some(Command::Serve { bind }) => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            serve(&config, cli.debug).await
        }
        None => serve(&config, cli.debug).await,
    }
}

async fn serve(config: &Config, debug: bool) -> ServerResult<()> {
    let tracing = if debug {
        TracingConfig::cli_debug()
    } else {
        config.logging.to_tracing_config()?
    };
    init_tracing(tracing).map_err(|e| ServerError::config(e.to_string()))?;

    let app = App::from_config(config)?;
    let listener = TcpListener::bind(&config.server.bind).await?;
    info!(
        bind = %config.server.bind,
        public_url = %config.server.public_url,
        "calbridge server listening"
    );

    let result = axum::serve(listener, app.router())
        .with_graceful_shutdown(shutdown_signal())
        .await;
    app.shutdown();

    if let Err(ref e) = result {
        error!(error = %e, "server stopped with an error");
    }
    info!("calbridge server stopped");
    Ok(result?)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
