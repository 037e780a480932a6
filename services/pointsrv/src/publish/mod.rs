//! COV publishing
//!
//! Topics hang below the installation prefix
//! `client_id/client_name/site_id/site_name/device_id/device_name`:
//!
//! ```text
//! {prefix}/{topic}/cov/all/modbus/{net}/{net_name}/{dev}/{dev_name}/{pt}/{pt_name}    JSON
//! {prefix}/{topic}/cov/value/modbus/{net}/{net_name}/{dev}/{dev_name}/{pt}/{pt_name}  value
//! ```
//!
//! Everything is published retained. Without a complete installation identity
//! nothing is published.

mod mqtt;

pub use mqtt::{qos_from_level, MqttConfig, MqttPublisher};

use crate::model::{Device, Network, Point, PointStore, FALLBACK_PRIORITY};
use crate::store::SqliteStore;
use async_trait::async_trait;
use errors::PointResult;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const DRIVER_NAME: &str = "modbus";
const SEPARATOR: &str = "/";

#[async_trait]
pub trait CovPublisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: String, retain: bool) -> PointResult<()>;
}

/// Identity of the installation this server runs in
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallationConfig {
    pub client_id: Option<String>,
    pub client_name: Option<String>,
    pub site_id: Option<String>,
    pub site_name: Option<String>,
    pub device_id: Option<String>,
    pub device_name: Option<String>,
}

impl InstallationConfig {
    /// Topic prefix; `None` unless every part is set
    pub fn topic_prefix(&self) -> Option<String> {
        let parts = [
            &self.client_id,
            &self.client_name,
            &self.site_id,
            &self.site_name,
            &self.device_id,
            &self.device_name,
        ];
        let mut prefix = Vec::with_capacity(parts.len());
        for part in parts {
            match part.as_deref().map(str::trim) {
                Some(part) if !part.is_empty() => prefix.push(part),
                _ => return None,
            }
        }
        Some(prefix.join(SEPARATOR))
    }
}

pub struct CovNotifier {
    publisher: Arc<dyn CovPublisher>,
    store: SqliteStore,
    prefix: Option<String>,
    topic: String,
    publish_value: bool,
}

impl CovNotifier {
    pub fn new(
        publisher: Arc<dyn CovPublisher>,
        store: SqliteStore,
        mqtt: &MqttConfig,
        installation: &InstallationConfig,
    ) -> Self {
        let prefix = installation.topic_prefix();
        if prefix.is_none() {
            warn!("Installation identity incomplete, COV publishing disabled");
        }
        Self {
            publisher,
            store,
            prefix,
            topic: mqtt.topic.clone(),
            publish_value: mqtt.publish_value,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.prefix.is_some() && self.publish_value
    }

    fn topic_for(&self, kind: &str, network: &Network, device: &Device, point: &Point) -> Option<String> {
        let prefix = self.prefix.as_deref()?;
        Some(
            [
                prefix,
                self.topic.as_str(),
                "cov",
                kind,
                DRIVER_NAME,
                network.uuid.as_str(),
                network.name.as_str(),
                device.uuid.as_str(),
                device.name.as_str(),
                point.uuid.as_str(),
                point.name.as_str(),
            ]
            .join(SEPARATOR),
        )
    }

    pub fn cov_all_topic(&self, network: &Network, device: &Device, point: &Point) -> Option<String> {
        self.topic_for("all", network, device, point)
    }

    pub fn cov_value_topic(&self, network: &Network, device: &Device, point: &Point) -> Option<String> {
        self.topic_for("value", network, device, point)
    }

    /// JSON body of the `cov/all` topic
    pub fn payload(point: &Point, store: &PointStore) -> Value {
        let priority = point
            .priority_array_write
            .and_then(|array| array.highest_priority())
            .map(|(priority, _)| priority)
            .unwrap_or(FALLBACK_PRIORITY);

        let mut output = json!({
            "fault": store.fault,
            "value": store.value,
            "value_raw": store.value_raw,
            "ts": store.ts_value.map(|ts| ts.to_rfc3339()),
            "priority": priority,
        });
        if store.fault {
            output["fault_message"] = json!(store.fault_message);
            output["ts"] = json!(store.ts_fault.map(|ts| ts.to_rfc3339()));
        }
        output
    }

    async fn send(&self, topic: &str, payload: String) {
        debug!("MQTT publish {} ({} bytes)", topic, payload.len());
        if let Err(e) = self.publisher.publish(topic, payload, true).await {
            warn!("{}", e);
        }
    }

    /// Publish one point's current state
    pub async fn publish_cov(&self, network: &Network, device: &Device, point: &Point, store: &PointStore) {
        if !self.publish_value {
            return;
        }
        let Some(all_topic) = self.cov_all_topic(network, device, point) else {
            return;
        };
        self.send(&all_topic, Self::payload(point, store).to_string())
            .await;

        if !store.fault {
            if let Some(value_topic) = self.cov_value_topic(network, device, point) {
                let value = store.value.map(|v| v.to_string()).unwrap_or_default();
                self.send(&value_topic, value).await;
            }
        }
    }

    /// Clear the retained topics of a deleted point
    pub async fn clear(&self, network: &Network, device: &Device, point: &Point) {
        if !self.publish_value {
            return;
        }
        for topic in [
            self.cov_all_topic(network, device, point),
            self.cov_value_topic(network, device, point),
        ]
        .into_iter()
        .flatten()
        {
            self.send(&topic, String::new()).await;
        }
    }

    /// Publish the stored state of every point
    pub async fn republish_all(&self) -> PointResult<usize> {
        if !self.is_enabled() {
            return Ok(0);
        }
        let mut published = 0;
        for network in self.store.list_networks().await? {
            for device in self.store.list_devices(&network.uuid).await? {
                for point in self.store.list_points(&device.uuid).await? {
                    if let Some(store) = self.store.get_point_store(&point.uuid).await? {
                        self.publish_cov(&network, &device, &point, &store).await;
                        published += 1;
                    }
                }
            }
        }
        info!("MQTT republished {} points", published);
        Ok(published)
    }
}
