//! Mapping & sync engine against a recording gateway
#![allow(clippy::disallowed_methods)]

mod common;

use common::*;
use pointsrv::model::{FunctionCode, MapType, Mapping, MappingState, PriorityArray};
use pointsrv::sync::{SyncConfig, SyncEngine};
use pointsrv::SqliteStore;
use reqwest::Method;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing_test::traced_test;

struct Mapped {
    generic_point: String,
    bacnet_point: String,
    bacnet_mapping: Mapping,
}

async fn seed_mappings(store: &SqliteStore) -> Mapped {
    let network = seed_network(store, "tcp_1", 502).await;
    let device = seed_device(store, &network, "meter", 1, false).await;
    let a = seed_point(store, &device, "a", FunctionCode::ReadHoldingRegisters, 1, 1).await;
    let b = seed_point(store, &device, "b", FunctionCode::WriteRegister, 2, 1).await;

    store
        .create_mapping(&Mapping::new(&a.uuid, "gp-1", MapType::Generic))
        .await
        .unwrap();
    let bacnet_mapping = Mapping::new(&b.uuid, "bp-1", MapType::Bacnet);
    store.create_mapping(&bacnet_mapping).await.unwrap();

    Mapped {
        generic_point: a.uuid,
        bacnet_point: b.uuid,
        bacnet_mapping,
    }
}

fn engine(gateway: &Arc<RecordingGateway>, store: &SqliteStore) -> Arc<SyncEngine> {
    SyncEngine::start(gateway.clone(), store.clone(), SyncConfig::default())
}

#[tokio::test]
async fn test_sync_one_routes_by_map_type() {
    let store = memory_store().await;
    let mapped = seed_mappings(&store).await;
    let gateway = RecordingGateway::new();
    let sync = engine(&gateway, &store);

    assert!(
        sync.sync_one(&mapped.generic_point, PriorityArray::fallback_only(Some(1.5)))
            .await
    );
    assert!(
        sync.sync_one(&mapped.bacnet_point, PriorityArray::fallback_only(Some(2.5)))
            .await
    );
    assert!(!sync.sync_one("unmapped", PriorityArray::default()).await);
    sync.drain().await;

    assert_eq!(
        gateway.patched_paths(),
        vec![
            "/bacnet/api/bacnet/points/uuid/bp-1".to_string(),
            "/ps/api/generic/points_value/uuid/gp-1".to_string(),
        ]
    );
    let generic = gateway
        .requests()
        .into_iter()
        .find(|r| r.path.ends_with("gp-1"))
        .unwrap();
    assert_eq!(
        generic.body.unwrap()["priority_array_write"]["_16"],
        json!(1.5)
    );

    let stats = sync.stats();
    assert_eq!(stats.enqueued, 2);
    assert_eq!(stats.succeeded, 2);
    assert_eq!(stats.failed, 0);
}

#[tokio::test]
async fn test_broken_mapping_never_reaches_gateway() {
    let store = memory_store().await;
    let mapped = seed_mappings(&store).await;
    store
        .set_mapping_state(&mapped.bacnet_mapping.uuid, MappingState::Broken)
        .await
        .unwrap();

    let gateway = RecordingGateway::new();
    let sync = engine(&gateway, &store);

    assert!(
        !sync
            .sync_one(&mapped.bacnet_point, PriorityArray::fallback_only(Some(9.0)))
            .await
    );
    assert_eq!(sync.sync_mp_to_bp().await.unwrap(), 0);
    sync.drain().await;

    assert!(gateway.requests().is_empty());
}

#[tokio::test]
async fn test_sync_all_mapped_filters_domains() {
    let store = memory_store().await;
    let mapped = seed_mappings(&store).await;
    store
        .update_priority_value(&mapped.bacnet_point, Some(30.0), Some(4), None)
        .await
        .unwrap();

    let gateway = RecordingGateway::new();
    let sync = engine(&gateway, &store);

    assert_eq!(sync.sync_all_mapped(true, false).await.unwrap(), 1);
    assert_eq!(sync.sync_mp_to_bp().await.unwrap(), 1);
    sync.drain().await;

    let requests = gateway.requests();
    assert_eq!(requests.len(), 2);
    let bacnet = requests
        .iter()
        .find(|r| r.path == "/bacnet/api/bacnet/points/uuid/bp-1")
        .unwrap();
    let body = bacnet.body.as_ref().unwrap();
    assert_eq!(body["priority_array_write"]["_4"], json!(30.0));
    assert_eq!(body["priority_array_write"]["_16"], json!(16.0));
}

#[tokio::test]
async fn test_sync_on_start_calls_domain_resyncs_first() {
    let store = memory_store().await;
    seed_mappings(&store).await;
    let gateway = RecordingGateway::new();
    let sync = engine(&gateway, &store);

    sync.sync_on_start().await;
    sync.drain().await;

    let requests = gateway.requests();
    assert_eq!(requests.len(), 4);
    assert_eq!(requests[0].method, Method::GET);
    assert_eq!(requests[0].path, "/lora/api/sync/lp_to_gp");
    assert_eq!(requests[1].method, Method::GET);
    assert_eq!(requests[1].path, "/bacnet/api/sync/bp_to_gp");
    assert_eq!(gateway.patched_paths().len(), 2);
}

#[tokio::test]
#[traced_test]
async fn test_gateway_errors_are_counted_and_logged() {
    let store = memory_store().await;
    let mapped = seed_mappings(&store).await;
    let gateway = RecordingGateway::new();
    gateway.answer_with(503);
    let sync = engine(&gateway, &store);

    assert!(
        sync.sync_one(&mapped.generic_point, PriorityArray::fallback_only(Some(1.0)))
            .await
    );
    sync.drain().await;

    let stats = sync.stats();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.succeeded, 0);
    assert!(logs_contain("status 503"));
}

#[tokio::test]
async fn test_drained_engine_drops_pushes() {
    let store = memory_store().await;
    let mapped = seed_mappings(&store).await;
    let gateway = RecordingGateway::new();
    let sync = engine(&gateway, &store);
    sync.drain().await;

    assert!(
        !sync
            .sync_one(&mapped.generic_point, PriorityArray::fallback_only(Some(1.0)))
            .await
    );
    assert_eq!(sync.stats().dropped, 1);
    assert!(gateway.requests().is_empty());
}

#[tokio::test]
async fn test_full_resync_waits_for_queue_space() {
    let store = memory_store().await;
    let network = seed_network(&store, "tcp_1", 502).await;
    let device = seed_device(&store, &network, "meter", 1, false).await;
    let total = 24;
    for i in 0..total {
        let point = seed_point(
            &store,
            &device,
            &format!("p{}", i),
            FunctionCode::ReadHoldingRegisters,
            i + 1,
            1,
        )
        .await;
        store
            .create_mapping(&Mapping::new(&point.uuid, format!("gp-{}", i), MapType::Generic))
            .await
            .unwrap();
    }

    let gateway = RecordingGateway::new();
    gateway.respond_after(Duration::from_millis(5));
    let sync = SyncEngine::start(
        gateway.clone(),
        store.clone(),
        SyncConfig {
            workers: 1,
            queue_size: 2,
        },
    );

    assert_eq!(sync.sync_all_mapped(true, true).await.unwrap(), total as usize);
    sync.drain().await;

    assert_eq!(gateway.patched_paths().len(), total as usize);
    let stats = sync.stats();
    assert_eq!(stats.enqueued, total as u64);
    assert_eq!(stats.succeeded, total as u64);
    assert_eq!(stats.dropped, 0);
}
