// src/mqtt.rs - MQTT publish sink
use crate::error::{Result, VigilError};
use crate::repository::PublishSink;
use crate::value::Value;
use async_trait::async_trait;
use rumqttc::{AsyncClient, MqttOptions, QoS};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, trace};

/// MQTT connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    /// Broker host name
    pub broker_host: String,
    /// Broker port
    pub broker_port: u16,
    /// Client identifier
    pub client_id: String,
    /// Prefix prepended to every published topic
    pub topic_prefix: String,
    /// Quality of service for published values (0..=2)
    #[serde(default = "default_qos")]
    pub qos: u8,
}

fn default_qos() -> u8 {
    1
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker_host: "localhost".to_string(),
            broker_port: 1883,
            client_id: "vigil".to_string(),
            topic_prefix: "vigil".to_string(),
            qos: 1,
        }
    }
}

fn qos_level(qos: u8) -> QoS {
    match qos {
        0 => QoS::AtMostOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtLeastOnce,
    }
}

/// Publishes accepted values to an MQTT broker
///
/// Topics follow `<prefix>/<target>/<alias>`; the payload is the value as
/// tagged JSON.
pub struct MqttPublisher {
    client: AsyncClient,
    topic_prefix: String,
    qos: QoS,
}

impl MqttPublisher {
    /// Connect to the broker and start the event loop task
    pub fn connect(config: &MqttConfig) -> Result<Arc<Self>> {
        let mut options = MqttOptions::new(
            &config.client_id,
            &config.broker_host,
            config.broker_port,
        );
        options.set_keep_alive(Duration::from_secs(30));

        let (client, mut eventloop) = AsyncClient::new(options, 100);

        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(event) => trace!("mqtt event: {:?}", event),
                    Err(e) => {
                        error!("mqtt connection error: {}", e);
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        });

        info!(
            "mqtt publisher connected to {}:{}",
            config.broker_host, config.broker_port
        );
        Ok(Arc::new(Self {
            client,
            topic_prefix: config.topic_prefix.clone(),
            qos: qos_level(config.qos),
        }))
    }
}

#[async_trait]
impl PublishSink for MqttPublisher {
    async fn publish(&self, target_id: &str, alias: &str, value: &Value) -> Result<()> {
        let topic = format!("{}/{}/{}", self.topic_prefix, target_id, alias);
        let payload =
            serde_json::to_vec(value).map_err(|e| VigilError::Publish(e.to_string()))?;
        self.client
            .publish(topic, self.qos, false, payload)
            .await
            .map_err(|e| VigilError::Publish(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qos_mapping_defaults_to_at_least_once() {
        assert_eq!(qos_level(0), QoS::AtMostOnce);
        assert_eq!(qos_level(1), QoS::AtLeastOnce);
        assert_eq!(qos_level(2), QoS::ExactlyOnce);
        assert_eq!(qos_level(7), QoS::AtLeastOnce);
    }
}
