//! MQTT transport

use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};

use super::{Publisher, Topics};
use crate::{Error, Result};

/// Capacity of the client request channel
const REQUEST_CAPACITY: usize = 64;

/// Delay before polling again after a connection error
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// MQTT connection factory
pub struct MqttBroker;

impl MqttBroker {
    /// Create a client/event-loop pair
    ///
    /// Nothing is sent until [`MqttEvents::next_message`] starts polling.
    #[must_use]
    pub fn connect(
        host: &str,
        port: u16,
        client_id: &str,
        keep_alive: Duration,
        topics: Topics,
    ) -> (MqttPublisher, MqttEvents) {
        let mut options = MqttOptions::new(client_id, host, port);
        options.set_keep_alive(keep_alive);

        let (client, event_loop) = AsyncClient::new(options, REQUEST_CAPACITY);

        tracing::info!(host, port, client_id, "mqtt client created");

        (
            MqttPublisher {
                client: client.clone(),
            },
            MqttEvents {
                client,
                event_loop,
                topics,
            },
        )
    }
}

/// Publishing half of the MQTT connection
#[derive(Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
}

#[async_trait]
impl Publisher for MqttPublisher {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| Error::Broker(format!("publish to {topic} failed: {e}")))
    }
}

/// Receiving half of the MQTT connection
pub struct MqttEvents {
    client: AsyncClient,
    event_loop: EventLoop,
    topics: Topics,
}

impl MqttEvents {
    /// Wait for the next inbound publish
    ///
    /// Drives the connection, (re)subscribing after every `ConnAck` and
    /// backing off on connection errors. Returns `(topic, payload)`.
    pub async fn next_message(&mut self) -> (String, Vec<u8>) {
        loop {
            match self.event_loop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    return (publish.topic, publish.payload.to_vec());
                }
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    tracing::info!("mqtt connected");
                    self.subscribe().await;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "mqtt connection error, retrying");
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
            }
        }
    }

    async fn subscribe(&self) {
        for topic in self.topics.subscriptions() {
            if let Err(e) = self.client.subscribe(&topic, QoS::AtLeastOnce).await {
                tracing::error!(topic = %topic, error = %e, "mqtt subscribe failed");
            }
        }
    }
}
