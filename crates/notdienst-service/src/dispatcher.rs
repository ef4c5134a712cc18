//! Routes command messages to the scraper and publishes the outcome.
//!
//! One command is handled to completion before the next is taken. Every
//! handled command ends in exactly one publish, on the data topic or on the
//! error topic.

use notdienst_core::{AppConfig, Topics};
use notdienst_scraper::{ScrapeClient, ScrapeFailure, SearchResult};
use rumqttc::QoS;
use serde_json::{json, Value};

use crate::broker::{publish_packet_size, Publish};
use crate::command::{Action, Command};

pub const UNKNOWN_ACTION_ERROR: &str = "Command with empty or unknown action received";
pub const MALFORMED_PAYLOAD_ERROR: &str = "Malformed command payload";
pub const INVALID_PARAMETERS_ERROR: &str = "Invalid parameters for update command";
pub const OVERSIZED_MESSAGE_ERROR: &str = "Message exceeds the maximum packet size";

/// Settings the dispatcher needs, taken from [`AppConfig`].
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub topics: Topics,
    pub default_latitude: f64,
    pub default_longitude: f64,
    /// Largest packet the broker client will send.
    pub max_packet_size: usize,
}

impl DispatchConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            topics: config.topics.clone(),
            default_latitude: config.default_latitude,
            default_longitude: config.default_longitude,
            max_packet_size: config.mqtt_max_packet_size,
        }
    }
}

/// The single message a command produces.
#[derive(Debug, Clone, PartialEq)]
enum Outcome {
    Results(Value),
    Failure(Value),
}

pub struct CommandDispatcher<P> {
    publisher: P,
    scraper: ScrapeClient,
    config: DispatchConfig,
}

impl<P: Publish> CommandDispatcher<P> {
    pub fn new(publisher: P, scraper: ScrapeClient, config: DispatchConfig) -> Self {
        Self {
            publisher,
            scraper,
            config,
        }
    }

    /// Handles one raw command message.
    ///
    /// Failures are reported on the error topic; nothing is returned to the
    /// caller. Empty messages are ignored.
    pub async fn handle(&self, raw: &[u8]) {
        if raw.is_empty() {
            tracing::debug!("ignoring empty command message");
            return;
        }
        let outcome = self.route(raw).await;
        self.deliver(outcome).await;
    }

    async fn route(&self, raw: &[u8]) -> Outcome {
        let command = match Command::parse(raw) {
            Ok(command) => command,
            Err(error) => {
                return Outcome::Failure(json!({
                    "error": MALFORMED_PAYLOAD_ERROR,
                    "message": error.to_string(),
                }));
            }
        };

        match command.action {
            Action::Update => self.update(&command).await,
            Action::Unknown(ref action) => {
                tracing::debug!(action, "rejecting command");
                Outcome::Failure(json!({
                    "error": UNKNOWN_ACTION_ERROR,
                    "message": command.payload,
                }))
            }
        }
    }

    async fn update(&self, command: &Command) -> Outcome {
        tracing::debug!(payload = %command.payload, "got update request");
        let params = match command
            .search_parameters(self.config.default_latitude, self.config.default_longitude)
        {
            Ok(params) => params,
            Err(error) => {
                return Outcome::Failure(json!({
                    "error": INVALID_PARAMETERS_ERROR,
                    "message": error.to_string(),
                }));
            }
        };

        match self.scraper.fetch_nearest_pharmacies(&params).await {
            Ok(result) => Outcome::Results(results_message(&result)),
            Err(failure) => Outcome::Failure(failure_message(&failure)),
        }
    }

    async fn deliver(&self, outcome: Outcome) {
        let (mut topic, mut qos, message) = match outcome {
            Outcome::Results(message) => (&self.config.topics.data, QoS::AtMostOnce, message),
            Outcome::Failure(message) => {
                tracing::warn!(error = %message, "reporting failure");
                (&self.config.topics.error, QoS::AtLeastOnce, message)
            }
        };

        let mut payload = message.to_string().into_bytes();
        if publish_packet_size(topic, payload.len()) > self.config.max_packet_size {
            let report = json!({
                "error": OVERSIZED_MESSAGE_ERROR,
                "topic": topic,
                "size": payload.len(),
                "limit": self.config.max_packet_size,
            });
            tracing::warn!(error = %report, "reporting failure");
            topic = &self.config.topics.error;
            qos = QoS::AtLeastOnce;
            payload = report.to_string().into_bytes();
        }

        if let Err(error) = self.publisher.publish(topic, payload, qos).await {
            tracing::error!(%error, "publishing was not possible");
        }
    }
}

fn results_message(result: &SearchResult) -> Value {
    tracing::debug!(count = result.count(), "publishing results");
    result.to_message()
}

fn failure_message(failure: &ScrapeFailure) -> Value {
    json!({
        "error": failure.to_string(),
        "stage": failure.stage,
    })
}

#[cfg(test)]
#[path = "dispatcher_test.rs"]
mod tests;
