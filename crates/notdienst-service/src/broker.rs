//! MQTT session: connection, online/offline status, command subscription and
//! the event loop.

use std::future::Future;
use std::time::Duration;

use notdienst_core::{AppConfig, Topics};
use rumqttc::mqttbytes::Error as PacketError;
use rumqttc::{
    AsyncClient, ConnectionError, Event, EventLoop, LastWill, MqttOptions, Outgoing, Packet, QoS,
    StateError,
};
use serde_json::{json, Value};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::{JoinError, JoinHandle};

use crate::error::{PublishError, ServiceError};

const ONLINE: &str = "online";
const OFFLINE: &str = "offline";
/// Capacity of the request channel between `AsyncClient` and `EventLoop`.
const CLIENT_CHANNEL_CAPACITY: usize = 32;
const DISCONNECT_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);
/// Commands waiting behind the one being handled.
pub const COMMAND_QUEUE_CAPACITY: usize = 16;

pub const OVERSIZED_PACKET_ERROR: &str = "MQTT packet exceeds the maximum packet size";
pub const QUEUE_FULL_ERROR: &str = "Too many pending commands; command discarded";
pub const SHUTTING_DOWN_ERROR: &str = "Service is shutting down; command discarded";

/// Anything that can put a message on a broker topic.
pub trait Publish {
    fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
    ) -> impl Future<Output = Result<(), PublishError>> + Send;
}

/// Upper bound for the encoded size of a PUBLISH packet.
///
/// Counts the topic length prefix, a packet id and the largest fixed header.
pub fn publish_packet_size(topic: &str, payload_len: usize) -> usize {
    5 + 2 + topic.len() + 2 + payload_len
}

/// Publishing handle backed by the session's client.
#[derive(Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
}

impl Publish for MqttPublisher {
    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS) -> Result<(), PublishError> {
        self.client
            .publish(topic, qos, false, payload)
            .await
            .map_err(|source| PublishError {
                topic: topic.to_string(),
                source,
            })
    }
}

/// Connection settings, taken from [`AppConfig`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// `Duration::ZERO` turns keep-alive off.
    pub keep_alive: Duration,
    pub max_packet_size: usize,
    pub topics: Topics,
}

impl SessionConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            host: config.mqtt_host.clone(),
            port: config.mqtt_port,
            client_id: config.mqtt_client_id.clone(),
            username: config.mqtt_username.clone(),
            password: config.mqtt_password.clone(),
            keep_alive: if config.mqtt_keep_alive {
                Duration::from_secs(config.mqtt_keep_alive_secs)
            } else {
                Duration::ZERO
            },
            max_packet_size: config.mqtt_max_packet_size,
            topics: config.topics.clone(),
        }
    }
}

pub struct BrokerSession {
    client: AsyncClient,
    event_loop: EventLoop,
    topics: Topics,
}

impl BrokerSession {
    /// Connects to the broker, announces `online` on the LWT topic and
    /// subscribes to the command topic.
    ///
    /// The last will marks the service `offline` if the connection drops.
    ///
    /// # Errors
    ///
    /// - [`ServiceError::Connect`] if the broker does not acknowledge the connection.
    /// - [`ServiceError::Subscribe`] if the subscription cannot be queued.
    pub async fn connect(config: &SessionConfig) -> Result<Self, ServiceError> {
        let mut options =
            MqttOptions::new(config.client_id.as_str(), config.host.as_str(), config.port);
        options.set_keep_alive(config.keep_alive);
        options.set_max_packet_size(config.max_packet_size, config.max_packet_size);
        options.set_last_will(LastWill::new(
            config.topics.lwt.as_str(),
            OFFLINE,
            QoS::AtMostOnce,
            true,
        ));
        match (&config.username, &config.password) {
            (Some(username), password) => {
                options.set_credentials(
                    username.as_str(),
                    password.as_deref().unwrap_or_default(),
                );
            }
            (None, Some(_)) => {
                tracing::warn!("MQTT_PASSWORD is set without MQTT_USERNAME; ignoring credentials");
            }
            (None, None) => {}
        }

        let (client, mut event_loop) = AsyncClient::new(options, CLIENT_CHANNEL_CAPACITY);

        loop {
            match event_loop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => break,
                Ok(_) => {}
                Err(source) => {
                    return Err(ServiceError::Connect {
                        host: config.host.clone(),
                        port: config.port,
                        source,
                    });
                }
            }
        }
        tracing::info!(host = %config.host, port = config.port, "connected to broker");

        let session = Self {
            client,
            event_loop,
            topics: config.topics.clone(),
        };

        match session
            .client
            .publish(session.topics.lwt.as_str(), QoS::AtMostOnce, true, ONLINE)
            .await
        {
            Ok(()) => tracing::debug!(topic = %session.topics.lwt, "published online status"),
            Err(error) => tracing::error!(%error, "publishing the online status was not possible"),
        }

        session
            .client
            .subscribe(session.topics.command.as_str(), QoS::AtMostOnce)
            .await
            .map_err(|source| ServiceError::Subscribe {
                topic: session.topics.command.clone(),
                source,
            })?;
        tracing::info!(topic = %session.topics.command, "subscribed to command topic");

        Ok(session)
    }

    /// A publishing handle that stays valid while the session runs.
    pub fn publisher(&self) -> MqttPublisher {
        MqttPublisher {
            client: self.client.clone(),
        }
    }

    /// Drives the connection until `shutdown` resolves, forwarding every
    /// command message to `commands` in arrival order.
    ///
    /// On shutdown no further commands are queued. The connection keeps
    /// running until `worker` has finished everything already queued, then
    /// the session marks itself `offline` and disconnects.
    ///
    /// # Errors
    ///
    /// - [`ServiceError::EventLoop`] if the connection fails while running.
    /// - [`ServiceError::Subscribe`] if the command topic cannot be
    ///   re-subscribed after a reconnect.
    /// - [`ServiceError::Disconnect`] if the disconnect cannot be queued.
    /// - [`ServiceError::Worker`] if the worker task panicked.
    pub async fn run(
        mut self,
        commands: mpsc::Sender<Vec<u8>>,
        mut worker: JoinHandle<()>,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), ServiceError> {
        tokio::pin!(shutdown);

        let finished = loop {
            tokio::select! {
                () = &mut shutdown => break None,
                joined = &mut worker => break Some(joined),
                event = self.event_loop.poll() => match event {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        self.enqueue(&commands, &publish);
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => self.resume()?,
                    Ok(_) => {}
                    Err(error) => self.recover(error)?,
                },
            }
        };

        drop(commands);
        let joined = match finished {
            Some(joined) => {
                tracing::error!("command worker stopped unexpectedly; shutting down");
                joined
            }
            None => self.finish_queued(worker).await?,
        };

        self.disconnect().await?;
        joined.map_err(ServiceError::Worker)
    }

    /// Keeps the connection serviced while the worker drains its queue, so
    /// the publishes of those commands reach the broker.
    async fn finish_queued(
        &mut self,
        mut worker: JoinHandle<()>,
    ) -> Result<Result<(), JoinError>, ServiceError> {
        tracing::info!("waiting for queued commands to finish");
        loop {
            tokio::select! {
                joined = &mut worker => return Ok(joined),
                event = self.event_loop.poll() => match event {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        if self.is_command(&publish) {
                            self.report(&json!({
                                "error": SHUTTING_DOWN_ERROR,
                                "message": String::from_utf8_lossy(&publish.payload),
                            }));
                        }
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => self.resume()?,
                    Ok(_) => {}
                    Err(error) => self.recover(error)?,
                },
            }
        }
    }

    fn is_command(&self, publish: &rumqttc::Publish) -> bool {
        if publish.topic == self.topics.command {
            return true;
        }
        tracing::debug!(topic = %publish.topic, "ignoring message on unexpected topic");
        false
    }

    fn enqueue(&self, commands: &mpsc::Sender<Vec<u8>>, publish: &rumqttc::Publish) {
        if !self.is_command(publish) {
            return;
        }
        match commands.try_send(publish.payload.to_vec()) {
            Ok(()) => {
                let queued = commands.max_capacity() - commands.capacity();
                tracing::debug!(queued, "queued command");
            }
            Err(TrySendError::Full(_)) => {
                self.report(&json!({
                    "error": QUEUE_FULL_ERROR,
                    "capacity": commands.max_capacity(),
                }));
            }
            Err(TrySendError::Closed(_)) => {
                tracing::error!("command worker has stopped; dropping command");
            }
        }
    }

    /// Runs after the event loop has reconnected on its own.
    fn resume(&self) -> Result<(), ServiceError> {
        tracing::info!("reconnected to broker");
        if let Err(error) =
            self.client
                .try_publish(self.topics.lwt.as_str(), QoS::AtMostOnce, true, ONLINE)
        {
            tracing::error!(%error, "publishing the online status was not possible");
        }
        self.client
            .try_subscribe(self.topics.command.as_str(), QoS::AtMostOnce)
            .map_err(|source| ServiceError::Subscribe {
                topic: self.topics.command.clone(),
                source,
            })
    }

    /// Oversized packets cost the current connection but not the session:
    /// the next poll reconnects.
    fn recover(&self, error: ConnectionError) -> Result<(), ServiceError> {
        match oversized_packet(&error) {
            Some(detail) => {
                self.report(&json!({
                    "error": OVERSIZED_PACKET_ERROR,
                    "message": detail,
                }));
                Ok(())
            }
            None => Err(ServiceError::EventLoop(error)),
        }
    }

    fn report(&self, message: &Value) {
        tracing::warn!(error = %message, "reporting failure");
        if let Err(error) = self.client.try_publish(
            self.topics.error.as_str(),
            QoS::AtLeastOnce,
            false,
            message.to_string(),
        ) {
            tracing::error!(%error, "publishing was not possible");
        }
    }

    async fn disconnect(mut self) -> Result<(), ServiceError> {
        if let Err(error) = self
            .client
            .publish(self.topics.lwt.as_str(), QoS::AtMostOnce, true, OFFLINE)
            .await
        {
            tracing::warn!(%error, "publishing the offline status was not possible");
        }
        self.client
            .disconnect()
            .await
            .map_err(ServiceError::Disconnect)?;

        let flush = async {
            loop {
                match self.event_loop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
                    Ok(_) => {}
                    Err(error) => {
                        tracing::debug!(%error, "connection closed during disconnect");
                        break;
                    }
                }
            }
        };
        if tokio::time::timeout(DISCONNECT_FLUSH_TIMEOUT, flush)
            .await
            .is_err()
        {
            tracing::warn!("timed out waiting for the disconnect to be sent");
        }
        tracing::info!("disconnected from broker");
        Ok(())
    }
}

fn oversized_packet(error: &ConnectionError) -> Option<String> {
    match error {
        ConnectionError::MqttState(StateError::Deserialization(
            PacketError::PayloadSizeLimitExceeded(size),
        )) => Some(format!("incoming packet of {size} bytes was discarded")),
        ConnectionError::MqttState(StateError::OutgoingPacketTooLarge { pkt_size, max }) => Some(
            format!("outgoing packet of {pkt_size} bytes was discarded, limit is {max}"),
        ),
        _ => None,
    }
}

#[cfg(test)]
#[path = "broker_test.rs"]
mod tests;
