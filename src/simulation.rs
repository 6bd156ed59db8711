use async_stream::stream;
use futures::stream::Stream;
use futures::stream::StreamExt;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use skein_db::{Document, Lattice, StateVector, TextRef};
use skein_sdk::{
    shared, MemoryHub, NetworkConfig, PeerId, SharedDoc, SyncConfigBuilder, SyncHandle, SyncManager,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

/// Shape of one simulation run
#[derive(Clone, Debug)]
pub struct SimulationConfig {
    pub num_replicas: usize,
    pub edits_per_replica: usize,
    /// Chance that a generated step toggles a replica's connection
    pub outage_rate: f64,
    pub resync_interval_ms: u64,
    pub settle_timeout: Duration,
}

impl SimulationConfig {
    pub fn new(num_replicas: usize, edits_per_replica: usize) -> Self {
        Self {
            num_replicas,
            edits_per_replica,
            outage_rate: 0.0,
            resync_interval_ms: 50,
            settle_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_outages(mut self, rate: f64) -> Self {
        self.outage_rate = rate;
        self
    }
}

/// Statistics collected during a simulation
#[derive(Clone, Debug)]
pub struct SimulationStats {
    pub num_replicas: usize,
    pub total_edits: usize,
    pub outages: usize,
    pub delivered: u64,
    pub dropped: u64,
    pub edit_time: Duration,
    pub convergence_time: Duration,
    pub converged: bool,
    pub final_len: usize,
}

impl SimulationStats {
    pub fn print(&self) {
        println!("\n╔════════════════════════════════════════════════════════════╗");
        println!("║              Simulation Statistics                          ║");
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║  Number of Replicas:        {:>38} ║", self.num_replicas);
        println!("║  Total Edits:               {:>38} ║", self.total_edits);
        println!("║  Outages:                   {:>38} ║", self.outages);
        println!("║  Messages Delivered:        {:>38} ║", self.delivered);
        println!("║  Messages Dropped:          {:>38} ║", self.dropped);
        println!(
            "║  Edit Phase:                {:>39}s ║",
            format!("{:.3}", self.edit_time.as_secs_f64())
        );
        println!(
            "║  Convergence:               {:>39}s ║",
            format!("{:.3}", self.convergence_time.as_secs_f64())
        );
        println!("║  Final Length:              {:>38} ║", self.final_len);
        println!("║  Converged:                 {:>38} ║", self.converged);
        println!("╚════════════════════════════════════════════════════════════╝");
    }
}

/// One generated step of the workload
#[derive(Clone, Debug)]
enum Step {
    Insert { replica: usize, at: usize, text: String },
    Delete { replica: usize, at: usize, len: usize },
    ToggleConnection { replica: usize },
}

/// Generator that yields random edits and connection changes
fn step_generator(
    num_replicas: usize,
    num_edits: usize,
    outage_rate: f64,
) -> impl Stream<Item = Step> {
    stream! {
        let mut rng = StdRng::from_entropy();
        for i in 0..num_edits {
            let replica = rng.gen_range(0..num_replicas);
            if rng.gen_bool(outage_rate) {
                yield Step::ToggleConnection { replica };
            }
            let at = rng.gen_range(0..usize::MAX / 2);
            if rng.gen_bool(0.25) {
                yield Step::Delete { replica, at, len: rng.gen_range(1..4) };
            } else {
                yield Step::Insert { replica, at, text: format!("{}.{} ", replica, i) };
            }
        }
    }
}

struct Replica {
    peer: PeerId,
    doc: SharedDoc,
    text: TextRef,
    sync: SyncHandle,
}

impl Replica {
    fn content(&self) -> String {
        self.text.get_string(&*self.doc.lock())
    }

    /// Apply one edit under a single lock so remote updates cannot move
    /// the bounds between reading the length and editing.
    fn edit(&self, step: Step) -> skein_db::Result<()> {
        let mut doc = self.doc.lock();
        let len = self.text.len(&*doc);
        let mut txn = doc.transact();
        match step {
            Step::Insert { at, text, .. } => self.text.insert(&mut txn, at % (len + 1), &text)?,
            Step::Delete { at, len: count, .. } if len > 0 => {
                let at = at % len;
                self.text.remove_range(&mut txn, at, count.min(len - at))?
            }
            _ => {}
        }
        txn.commit();
        Ok(())
    }
}

/// Same text everywhere, and every replica has integrated everything any
/// replica has.
fn all_equal(replicas: &[Replica]) -> bool {
    let first = replicas[0].content();
    if !replicas.iter().all(|r| r.content() == first) {
        return false;
    }
    let states: Vec<StateVector> = replicas
        .iter()
        .map(|r| r.doc.lock().state_vector())
        .collect();
    let everything = StateVector::join_all(&states);
    states.iter().all(|state| *state == everything)
}

/// Run concurrent editors over a memory relay and wait for them to agree
pub async fn simulate(
    config: SimulationConfig,
    network: NetworkConfig,
) -> skein_sdk::Result<SimulationStats> {
    println!("\n╔════════════════════════════════════════════════════════════╗");
    println!("║        Text Replica Simulation                             ║");
    println!("║  Replicas: {} | Edits/Replica: {} | Loss: {:.0}% ║",
             config.num_replicas, config.edits_per_replica, network.loss_rate * 100.0);
    println!("╚════════════════════════════════════════════════════════════╝");

    let hub = MemoryHub::new(network);
    let sync_config = SyncConfigBuilder::new()
        .resync_interval(config.resync_interval_ms)
        .build();

    println!("\n[Phase 1/2] Editing...");
    let start = Instant::now();

    let mut replicas = Vec::with_capacity(config.num_replicas);
    for idx in 0..config.num_replicas {
        let peer = PeerId::new(format!("replica-{}", idx));
        let doc = shared(Document::with_client_id(idx as u64 + 1));
        let text = doc.lock().get_or_insert_text("content")?;
        let transport = Arc::new(hub.transport(peer.clone()));
        let sync = SyncManager::new(transport, peer.clone(), doc.clone(), sync_config.clone())
            .spawn()
            .await?;
        replicas.push(Replica { peer, doc, text, sync });
    }

    let total_edits = config.num_replicas * config.edits_per_replica;
    let mut steps = Box::pin(step_generator(config.num_replicas, total_edits, config.outage_rate));
    let mut offline = HashSet::new();
    let mut outages = 0;
    let mut applied = 0;

    while let Some(step) = steps.next().await {
        match step {
            Step::Insert { replica, .. } | Step::Delete { replica, .. } => {
                replicas[replica].edit(step)?;
                applied += 1;
            }
            Step::ToggleConnection { replica } => {
                let peer = &replicas[replica].peer;
                if offline.remove(&replica) {
                    hub.reconnect(peer);
                } else {
                    offline.insert(replica);
                    hub.disconnect(peer);
                    outages += 1;
                }
            }
        }

        if applied % 10 == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    for replica in offline.drain() {
        hub.reconnect(&replicas[replica].peer);
    }
    let edit_time = start.elapsed();
    println!("[Phase 1/2] ✓ Completed");
    println!("[Phase 2/2] Waiting for convergence...");

    let settle_start = Instant::now();
    let mut converged = all_equal(&replicas);
    while !converged && settle_start.elapsed() < config.settle_timeout {
        tokio::time::sleep(Duration::from_millis(10)).await;
        hub.flush();
        converged = all_equal(&replicas);
    }
    let convergence_time = settle_start.elapsed();
    info!(converged, elapsed_ms = convergence_time.as_millis() as u64, "simulation settled");

    let (delivered, dropped) = hub.stats();
    let final_len = replicas[0].content().chars().count();
    for replica in replicas {
        replica.sync.shutdown().await?;
    }

    println!("[Phase 2/2] ✓ Completed");

    Ok(SimulationStats {
        num_replicas: config.num_replicas,
        total_edits: applied,
        outages,
        delivered,
        dropped,
        edit_time,
        convergence_time,
        converged,
        final_len,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_small_simulation_converges() {
        let config = SimulationConfig::new(3, 20).with_outages(0.1);
        let stats = simulate(config, NetworkConfig::lossy(0.1).seed(3)).await.unwrap();
        assert!(stats.converged);
        assert_eq!(stats.total_edits, 60);
    }
}
