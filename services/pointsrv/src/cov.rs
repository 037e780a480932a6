//! Change-of-value fan-out
//!
//! Every persisted point store change is forwarded to the mapped gateway
//! point (through [`SyncEngine`]) and published to MQTT (through
//! [`CovNotifier`]). Both sinks are optional.

use crate::model::{Device, Network, Point, PointStore, PriorityArray};
use crate::publish::CovNotifier;
use crate::sync::SyncEngine;
use std::sync::Arc;
use tracing::debug;

#[derive(Default, Clone)]
pub struct CovDispatcher {
    sync: Option<Arc<SyncEngine>>,
    notifier: Option<Arc<CovNotifier>>,
}

impl CovDispatcher {
    pub fn new(sync: Option<Arc<SyncEngine>>, notifier: Option<Arc<CovNotifier>>) -> Self {
        Self { sync, notifier }
    }

    /// A dispatcher that drops every change
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn sync(&self) -> Option<&Arc<SyncEngine>> {
        self.sync.as_ref()
    }

    pub fn notifier(&self) -> Option<&Arc<CovNotifier>> {
        self.notifier.as_ref()
    }

    /// Fan out one stored change
    ///
    /// Writable points sync their priority array, read points a fallback-only
    /// array carrying the new value.
    pub async fn dispatch(
        &self,
        network: &Network,
        device: &Device,
        point: &Point,
        store: &PointStore,
    ) {
        if let Some(sync) = &self.sync {
            let array = point
                .priority_array_write
                .unwrap_or_else(|| PriorityArray::fallback_only(store.value));
            if !sync.sync_one(&point.uuid, array).await {
                debug!("COV {} not forwarded", point.uuid);
            }
        }

        if let Some(notifier) = &self.notifier {
            notifier.publish_cov(network, device, point, store).await;
        }
    }
}
