mod broker;
mod command;
mod dispatcher;
mod error;

use std::process::ExitCode;

use notdienst_core::{AppConfig, SERVICE_NAME};
use notdienst_scraper::{ScrapeClient, ScrapeConfig};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use crate::{
    broker::{BrokerSession, Publish, SessionConfig, COMMAND_QUEUE_CAPACITY},
    dispatcher::{CommandDispatcher, DispatchConfig},
    error::ServiceError,
};

#[tokio::main]
async fn main() -> ExitCode {
    let config = match notdienst_core::load_app_config() {
        Ok(config) => config,
        Err(error) => {
            tracing_subscriber::fmt().with_writer(std::io::stderr).init();
            tracing::error!(%error, "invalid configuration; aborting");
            return ExitCode::from(ServiceError::from(error).exit_code());
        }
    };
    init_tracing(&config);

    tracing::info!(
        service = SERVICE_NAME,
        version = env!("CARGO_PKG_VERSION"),
        "welcome"
    );
    tracing::info!(config = ?config, "current configuration");

    match run(&config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(%error, "service stopped");
            ExitCode::from(error.exit_code())
        }
    }
}

fn init_tracing(config: &AppConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.effective_log_level()))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(config: &AppConfig) -> Result<(), ServiceError> {
    let scraper = ScrapeClient::new(ScrapeConfig::from_app_config(config))?;
    let session = BrokerSession::connect(&SessionConfig::from_app_config(config)).await?;

    let dispatcher = CommandDispatcher::new(
        session.publisher(),
        scraper,
        DispatchConfig::from_app_config(config),
    );
    let (commands, queue) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
    let worker = tokio::spawn(run_worker(dispatcher, queue));

    session.run(commands, worker, shutdown_signal()).await
}

/// Handles queued commands strictly one after another.
async fn run_worker<P: Publish>(
    dispatcher: CommandDispatcher<P>,
    mut queue: mpsc::Receiver<Vec<u8>>,
) {
    while let Some(payload) = queue.recv().await {
        dispatcher.handle(&payload).await;
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::error!(%error, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                tracing::error!(%error, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("received shutdown signal, disconnecting");
}
