//! End-to-end sync between replicas over the in-memory relay.

use skein_sdk::{
    shared, Document, MemoryHub, NetworkConfig, PeerId, SyncConfig, SyncConfigBuilder, SyncHandle,
    SyncManager, TextDoc,
};
use std::sync::Arc;
use std::time::Duration;

struct Replica {
    peer: PeerId,
    text: TextDoc,
    sync: Option<SyncHandle>,
}

impl Replica {
    fn new(name: &str, client: u64) -> Self {
        let doc = shared(Document::with_client_id(client));
        Self {
            peer: PeerId::new(name),
            text: TextDoc::new(doc, "body").unwrap(),
            sync: None,
        }
    }

    async fn connect(&mut self, hub: &MemoryHub, config: SyncConfig) {
        let transport = Arc::new(hub.transport(self.peer.clone()));
        let manager = SyncManager::new(
            transport,
            self.peer.clone(),
            self.text.doc().clone(),
            config,
        );
        self.sync = Some(manager.spawn().await.unwrap());
    }

    async fn stop(&mut self) {
        if let Some(sync) = self.sync.take() {
            sync.shutdown().await.unwrap();
        }
    }
}

fn fast_resync() -> SyncConfig {
    SyncConfigBuilder::new().resync_interval(20).build()
}

/// Poll until every replica shows the same text, or give up.
async fn converged(replicas: &[Replica], timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let first = replicas[0].text.get_text();
        if replicas.iter().all(|r| r.text.get_text() == first) {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn test_late_joiner_receives_existing_state() {
    let hub = MemoryHub::new(NetworkConfig::default());
    let mut a = Replica::new("a", 1);
    let mut b = Replica::new("b", 2);

    a.text.insert(0, "hello").unwrap();
    a.connect(&hub, SyncConfig::default()).await;
    b.connect(&hub, SyncConfig::default()).await;

    let replicas = [a, b];
    assert!(converged(&replicas, Duration::from_secs(2)).await);
    assert_eq!(replicas[1].text.get_text(), "hello");

    let [mut a, mut b] = replicas;
    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn test_live_edits_flow_both_ways() {
    let hub = MemoryHub::new(NetworkConfig::default());
    let mut a = Replica::new("a", 1);
    let mut b = Replica::new("b", 2);
    a.connect(&hub, SyncConfig::default()).await;
    b.connect(&hub, SyncConfig::default()).await;

    a.text.insert(0, "hello").unwrap();
    let replicas = [a, b];
    assert!(converged(&replicas, Duration::from_secs(2)).await);

    replicas[1].text.insert(0, "?").unwrap();
    replicas[0].text.insert(5, "!").unwrap();
    assert!(converged(&replicas, Duration::from_secs(2)).await);
    assert_eq!(replicas[0].text.get_text(), "?hello!");

    let [mut a, mut b] = replicas;
    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn test_offline_edits_merge_after_reconnect() {
    let hub = MemoryHub::new(NetworkConfig::default());
    let mut a = Replica::new("a", 1);
    let mut b = Replica::new("b", 2);
    a.connect(&hub, SyncConfig::default()).await;
    b.connect(&hub, SyncConfig::default()).await;

    a.text.insert(0, "base").unwrap();
    let replicas = [a, b];
    assert!(converged(&replicas, Duration::from_secs(2)).await);

    hub.disconnect(&replicas[1].peer);
    tokio::time::sleep(Duration::from_millis(10)).await;
    replicas[0].text.insert(4, "-online").unwrap();
    replicas[1].text.insert(0, "offline-").unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_ne!(replicas[0].text.get_text(), replicas[1].text.get_text());

    hub.reconnect(&replicas[1].peer);
    assert!(converged(&replicas, Duration::from_secs(2)).await);
    assert_eq!(replicas[0].text.get_text(), "offline-base-online");

    let [mut a, mut b] = replicas;
    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn test_lossy_network_converges_through_resync() {
    let hub = MemoryHub::new(NetworkConfig::lossy(0.3).seed(7));
    let mut replicas: Vec<Replica> = (0..3)
        .map(|i| Replica::new(&format!("peer-{}", i), i as u64 + 1))
        .collect();
    for replica in replicas.iter_mut() {
        replica.connect(&hub, fast_resync()).await;
    }

    for round in 0..5 {
        for (i, replica) in replicas.iter().enumerate() {
            replica.text.insert(0, &format!("{}{}", i, round)).unwrap();
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    assert!(converged(&replicas, Duration::from_secs(5)).await);
    assert_eq!(replicas[0].text.len(), 30);

    for replica in replicas.iter_mut() {
        replica.stop().await;
    }
}

#[tokio::test]
async fn test_chaotic_network_converges() {
    let hub = MemoryHub::new(NetworkConfig::chaotic().seed(99));
    let mut replicas: Vec<Replica> = (0..3)
        .map(|i| Replica::new(&format!("peer-{}", i), i as u64 + 10))
        .collect();
    for replica in replicas.iter_mut() {
        replica.connect(&hub, fast_resync()).await;
    }

    replicas[0].text.insert(0, "abc").unwrap();
    replicas[1].text.insert(0, "xyz").unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    replicas[2].text.insert(0, "123").unwrap();

    let converged_in_time = converged(&replicas, Duration::from_secs(5)).await;
    hub.flush();
    assert!(converged_in_time || converged(&replicas, Duration::from_secs(2)).await);
    assert_eq!(replicas[0].text.len(), 9);

    for replica in replicas.iter_mut() {
        replica.stop().await;
    }
}
