//! MQTT publisher on `rumqttc`

use super::CovPublisher;
use async_trait::async_trait;
use errors::{PointError, PointResult};
use rumqttc::{AsyncClient, MqttOptions, QoS};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub qos: u8,
    /// Keep alive in seconds
    pub keep_alive: u64,
    pub topic: String,
    pub publish_value: bool,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "localhost".to_string(),
            port: 1883,
            client_id: "rubix-points".to_string(),
            username: None,
            password: None,
            qos: 1,
            keep_alive: 60,
            topic: "rubix/points/value".to_string(),
            publish_value: true,
        }
    }
}

pub fn qos_from_level(level: u8) -> QoS {
    match level {
        0 => QoS::AtMostOnce,
        1 => QoS::AtLeastOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtMostOnce,
    }
}

pub struct MqttPublisher {
    client: AsyncClient,
    qos: QoS,
    event_loop: JoinHandle<()>,
}

impl MqttPublisher {
    /// Create the client and spawn its event loop
    ///
    /// The broker is reached lazily by the event loop, which keeps retrying
    /// after errors.
    pub fn start(config: &MqttConfig) -> Self {
        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive.max(5)));
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            options.set_credentials(username, password);
        }

        let (client, mut eventloop) = AsyncClient::new(options, 10);
        let endpoint = format!("{}:{}", config.host, config.port);
        let event_loop = tokio::spawn(async move {
            loop {
                if let Err(e) = eventloop.poll().await {
                    error!("MQTT event loop error ({}): {}", endpoint, e);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        });
        info!(
            "MQTT publisher: {}:{} as {}",
            config.host, config.port, config.client_id
        );

        Self {
            client,
            qos: qos_from_level(config.qos),
            event_loop,
        }
    }

    pub async fn stop(&self) {
        if let Err(e) = self.client.disconnect().await {
            debug!("MQTT disconnect: {}", e);
        }
        self.event_loop.abort();
    }
}

#[async_trait]
impl CovPublisher for MqttPublisher {
    async fn publish(&self, topic: &str, payload: String, retain: bool) -> PointResult<()> {
        self.client
            .publish(topic, self.qos, retain, payload.into_bytes())
            .await
            .map_err(|e| PointError::mqtt(format!("publish to {} failed: {}", topic, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qos_levels() {
        assert_eq!(qos_from_level(0), QoS::AtMostOnce);
        assert_eq!(qos_from_level(1), QoS::AtLeastOnce);
        assert_eq!(qos_from_level(2), QoS::ExactlyOnce);
        assert_eq!(qos_from_level(9), QoS::AtMostOnce);
    }

    #[test]
    fn test_defaults() {
        let config = MqttConfig::default();
        assert!(config.enabled);
        assert_eq!(config.port, 1883);
        assert_eq!(config.client_id, "rubix-points");
        assert_eq!(config.topic, "rubix/points/value");
    }
}
