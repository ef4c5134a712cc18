use thiserror::Error;

/// Fatal errors that stop the service.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("configuration error: {0}")]
    Config(#[from] notdienst_core::ConfigError),

    #[error("could not build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("can't connect to {host} ({port}): {source}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: rumqttc::ConnectionError,
    },

    #[error("could not subscribe to {topic}: {source}")]
    Subscribe {
        topic: String,
        #[source]
        source: rumqttc::ClientError,
    },

    #[error("broker connection failed: {0}")]
    EventLoop(#[source] rumqttc::ConnectionError),

    #[error("can't disconnect from broker: {0}")]
    Disconnect(#[source] rumqttc::ClientError),

    #[error("command worker failed: {0}")]
    Worker(#[source] tokio::task::JoinError),
}

impl ServiceError {
    /// Process exit status for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            ServiceError::Config(_) | ServiceError::HttpClient(_) => 1,
            ServiceError::Connect { .. } => 107,
            ServiceError::Subscribe { .. }
            | ServiceError::EventLoop(_)
            | ServiceError::Disconnect(_)
            | ServiceError::Worker(_) => 121,
        }
    }
}

/// A publish that could not be handed to the broker client.
///
/// Only ever logged.
#[derive(Debug, Error)]
#[error("publishing to {topic} failed: {source}")]
pub struct PublishError {
    pub topic: String,
    #[source]
    pub source: rumqttc::ClientError,
}
