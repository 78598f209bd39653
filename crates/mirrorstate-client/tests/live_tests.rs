//! End-to-end tests of client stores against a running hub.
//!
//! A hub is served from a temporary directory on `127.0.0.1:0`; client
//! stores connect to it with their reconnecting loop.

#![allow(clippy::unwrap_used)]

use std::path::Path;
use std::time::Duration;

use mirrorstate_client::{ClientConfig, ClientStore, spawn_connection};
use mirrorstate_core::HubConfig;
use mirrorstate_server::{RunningServer, spawn_server};
use serde_json::Value;
use tempfile::TempDir;

async fn start_hub(files: &[(&str, &str)]) -> (TempDir, RunningServer) {
    let dir = tempfile::tempdir().unwrap();
    for (file, contents) in files {
        std::fs::write(dir.path().join(file), contents).unwrap();
    }
    let config = HubConfig {
        root: dir.path().to_path_buf(),
        port: 0,
        poll_interval_ms: 10,
        ..HubConfig::default()
    };
    (dir, spawn_server(&config).await.unwrap())
}

fn client(running: &RunningServer) -> ClientStore {
    ClientStore::new(ClientConfig {
        url: format!("ws://{}/mirrorstate", running.local_addr()),
        reconnect_delay_ms: 20,
        ..ClientConfig::default()
    })
}

fn read_json(path: &Path) -> Option<Value> {
    let raw = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&raw).ok()
}

/// Poll `check` until it holds or a few seconds pass.
async fn eventually<F: FnMut() -> bool>(mut check: F) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test]
async fn test_batched_increments_reach_disk_and_other_clients() {
    let (dir, running) = start_hub(&[("counter.mirror.json", "0")]).await;
    let a = client(&running);
    let b = client(&running);
    spawn_connection(&a).unwrap();
    spawn_connection(&b).unwrap();

    let counter_a = a.state("counter", Some(0_i64)).unwrap();
    let counter_b = b.state("counter", Some(0_i64)).unwrap();
    assert!(eventually(|| a.is_attached() && b.is_attached()).await);

    for _ in 0..3 {
        counter_a.mutate(|n| n + 1);
    }

    let file = dir.path().join("counter.mirror.json");
    assert!(eventually(|| read_json(&file) == Some(Value::from(3))).await);
    assert!(eventually(|| counter_b.get().unwrap() == Some(3)).await);

    let hub_state = running
        .hub()
        .get(&mirrorstate_types::StateName::new("counter").unwrap())
        .unwrap();
    assert_eq!(hub_state.sequence, mirrorstate_types::Sequence(1));

    a.shutdown();
    b.shutdown();
    running.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_external_edit_reaches_connected_client() {
    let (dir, running) = start_hub(&[("counter.mirror.json", "0")]).await;
    let a = client(&running);
    spawn_connection(&a).unwrap();
    let counter = a.state("counter", Some(0_i64)).unwrap();
    assert!(eventually(|| a.is_attached()).await);

    std::fs::write(dir.path().join("counter.mirror.json"), "42").unwrap();

    assert!(eventually(|| counter.get().unwrap() == Some(42)).await);

    a.shutdown();
    running.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_offline_mutation_is_delivered_after_connecting() {
    let (dir, running) = start_hub(&[("counter.mirror.json", "0")]).await;
    let a = client(&running);
    let counter = a.state("counter", Some(0_i64)).unwrap();

    counter.set(7).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!a.is_attached());

    spawn_connection(&a).unwrap();

    let file = dir.path().join("counter.mirror.json");
    assert!(eventually(|| read_json(&file) == Some(Value::from(7))).await);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(counter.get().unwrap(), Some(7));
    assert_eq!(
        running
            .hub()
            .get(&mirrorstate_types::StateName::new("counter").unwrap())
            .unwrap()
            .sequence,
        mirrorstate_types::Sequence(1)
    );

    a.shutdown();
    running.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_default_materializes_missing_name() {
    let (dir, running) = start_hub(&[]).await;
    let a = client(&running);
    spawn_connection(&a).unwrap();
    let _todos = a.state("todos", Some(vec![String::from("write docs")])).unwrap();

    let file = dir.path().join("todos.mirror.json");
    assert!(eventually(|| read_json(&file) == Some(serde_json::json!(["write docs"]))).await);

    a.shutdown();
    running.shutdown().await.unwrap();
}
