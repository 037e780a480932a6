//! One live connection per network transport fingerprint

use super::{Connector, ModbusClient};
use crate::model::Network;
use errors::PointResult;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// A registered connection and the network that opened it
pub struct Connection {
    key: String,
    network_uuid: String,
    client: Arc<dyn ModbusClient>,
    running: AtomicBool,
}

impl Connection {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn network_uuid(&self) -> &str {
        &self.network_uuid
    }

    pub fn client(&self) -> &Arc<dyn ModbusClient> {
        &self.client
    }

    /// Whether a network loop currently drives this connection
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Claim the connection for a network loop; false if already claimed
    pub fn try_start(&self) -> bool {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}

/// Connection registry of one protocol variant
///
/// Keys are [`Network::connection_key`] fingerprints. A single map lock guards
/// the table; connecting happens outside it.
pub struct ConnectionRegistry {
    connector: Arc<dyn Connector>,
    connections: Mutex<HashMap<String, Arc<Connection>>>,
}

impl ConnectionRegistry {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// Connection for the network's current fingerprint, opening it if needed
    ///
    /// A connection registered for the same network under an older
    /// fingerprint is removed and closed.
    pub async fn acquire(&self, network: &Network) -> PointResult<Arc<Connection>> {
        let key = network.connection_key();
        if let Some(existing) = self.get(&key) {
            return Ok(existing);
        }

        let client = self.connector.connect(network).await?;
        let connection = Arc::new(Connection {
            key: key.clone(),
            network_uuid: network.uuid.clone(),
            client,
            running: AtomicBool::new(false),
        });

        let (winner, stale) = {
            let mut map = self.connections.lock();
            if let Some(existing) = map.get(&key) {
                // Lost a race with another acquire for the same key
                (Arc::clone(existing), vec![Arc::clone(&connection)])
            } else {
                let stale_keys: Vec<String> = map
                    .iter()
                    .filter(|(k, c)| c.network_uuid == network.uuid && **k != key)
                    .map(|(k, _)| k.clone())
                    .collect();
                let stale: Vec<Arc<Connection>> =
                    stale_keys.iter().filter_map(|k| map.remove(k)).collect();
                map.insert(key.clone(), Arc::clone(&connection));
                (connection, stale)
            }
        };

        for old in stale {
            if old.key != winner.key {
                info!("Connection replaced: {} -> {}", old.key, winner.key);
            }
            old.client.disconnect().await;
        }
        debug!("Connection registered: {}", winner.key);
        Ok(winner)
    }

    pub fn get(&self, key: &str) -> Option<Arc<Connection>> {
        self.connections.lock().get(key).cloned()
    }

    /// Remove and close a connection
    pub async fn remove(&self, key: &str) -> Option<Arc<Connection>> {
        let removed = self.connections.lock().remove(key);
        if let Some(connection) = &removed {
            info!("Connection removed: {}", key);
            connection.client.disconnect().await;
        }
        removed
    }

    pub fn list_keys(&self) -> Vec<String> {
        self.connections.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.lock().is_empty()
    }
}
