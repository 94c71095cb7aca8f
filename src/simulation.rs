//! Multi-peer sync simulation.
//!
//! Every pair of peers is joined by two [`Connection`]s, one on each side.
//! Peers edit documents locally and announce them; messages travel through a
//! [`NetworkSimulator`] that may drop, duplicate or reorder them. When a peer
//! applies remote changes it re-announces the document on its other links, so
//! edits spread beyond the peer that made them.

use crate::network::{NetworkConfig, NetworkSimulator, NetworkStats};
use anyhow::{ensure, Context};
use async_stream::stream;
use docsync_connection::memory::{LogChange, MemoryStore, OpLogBackend, OpLogDoc};
use docsync_connection::{Connection, DocumentId, Message, VectorClock};
use futures::stream::{Stream, StreamExt};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Configuration for a simulation run.
#[derive(Clone, Debug)]
pub struct SimulationConfig {
    pub peers: usize,
    pub documents: usize,
    pub edits_per_peer: usize,
    /// Network deliveries interleaved after each local edit.
    pub deliveries_per_edit: usize,
    /// Retransmission rounds allowed after the edit phase.
    pub max_rounds: usize,
    pub seed: u64,
    pub network: NetworkConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            peers: 3,
            documents: 2,
            edits_per_peer: 20,
            deliveries_per_edit: 2,
            max_rounds: 50,
            seed: 42,
            network: NetworkConfig::default(),
        }
    }
}

/// Builder for simulation configuration.
pub struct SimulationConfigBuilder {
    config: SimulationConfig,
}

impl SimulationConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: SimulationConfig::default(),
        }
    }

    pub fn peers(mut self, peers: usize) -> Self {
        self.config.peers = peers;
        self
    }

    pub fn documents(mut self, documents: usize) -> Self {
        self.config.documents = documents;
        self
    }

    pub fn edits_per_peer(mut self, edits: usize) -> Self {
        self.config.edits_per_peer = edits;
        self
    }

    pub fn deliveries_per_edit(mut self, deliveries: usize) -> Self {
        self.config.deliveries_per_edit = deliveries;
        self
    }

    pub fn max_rounds(mut self, rounds: usize) -> Self {
        self.config.max_rounds = rounds;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = seed;
        self
    }

    pub fn network(mut self, network: NetworkConfig) -> Self {
        self.config.network = network;
        self
    }

    pub fn build(self) -> anyhow::Result<SimulationConfig> {
        let config = self.config;
        ensure!(config.peers >= 2, "need at least two peers, got {}", config.peers);
        ensure!(config.documents >= 1, "need at least one document");
        for (name, rate) in [
            ("loss", config.network.loss_rate),
            ("duplication", config.network.dup_rate),
            ("reorder", config.network.reorder_rate),
        ] {
            ensure!(
                (0.0..=1.0).contains(&rate),
                "{} rate must be within 0.0..=1.0, got {}",
                name,
                rate
            );
        }
        ensure!(
            config.network.loss_rate < 1.0,
            "a network that loses every message can never converge"
        );
        Ok(config)
    }
}

impl Default for SimulationConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of a simulation run.
#[derive(Clone, Debug)]
pub struct SimulationReport {
    pub peers: usize,
    pub documents: usize,
    pub edits: usize,
    pub rounds: usize,
    pub converged: bool,
    pub network: NetworkStats,
    pub elapsed: Duration,
}

impl SimulationReport {
    pub fn print(&self) {
        println!("\n╔════════════════════════════════════════════════════════════╗");
        println!("║              Sync Simulation Report                        ║");
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║  Peers:                     {:>30} ║", self.peers);
        println!("║  Documents:                 {:>30} ║", self.documents);
        println!("║  Local Edits:               {:>30} ║", self.edits);
        println!("║  Retransmission Rounds:     {:>30} ║", self.rounds);
        println!("║  Messages Sent:             {:>30} ║", self.network.sent);
        println!("║  Messages Delivered:        {:>30} ║", self.network.delivered);
        println!("║  Messages Lost:             {:>30} ║", self.network.lost);
        println!("║  Messages Duplicated:       {:>30} ║", self.network.duplicated);
        println!("║  Messages Reordered:        {:>30} ║", self.network.reordered);
        println!("║  Total Time:                {:>29}s ║", format!("{:.3}", self.elapsed.as_secs_f64()));
        println!("║  Converged:                 {:>30} ║", if self.converged { "yes" } else { "NO" });
        println!("╚════════════════════════════════════════════════════════════╝");
    }
}

/// A message in transit from one peer to another.
#[derive(Clone, Debug)]
struct Envelope {
    from: usize,
    to: usize,
    message: Message<LogChange>,
}

type Sink = Box<dyn Fn(Message<LogChange>) + Send + Sync>;
type PeerConnection = Connection<OpLogBackend, MemoryStore<OpLogDoc>, Sink>;

struct SimPeer {
    actor: String,
    store: Arc<MemoryStore<OpLogDoc>>,
    /// Connection to each other peer, keyed by that peer's index.
    links: BTreeMap<usize, PeerConnection>,
}

/// A set of peers wired together over a simulated network.
pub struct Simulation {
    config: SimulationConfig,
    peers: Vec<SimPeer>,
    outbox: mpsc::UnboundedReceiver<Envelope>,
    network: NetworkSimulator<Envelope>,
    edits: usize,
}

impl Simulation {
    pub fn new(config: SimulationConfig) -> Self {
        let backend = Arc::new(OpLogBackend::new());
        let (tx, outbox) = mpsc::unbounded_channel();

        let mut peers: Vec<SimPeer> = (0..config.peers)
            .map(|i| SimPeer {
                actor: format!("peer-{}", i),
                store: Arc::new(MemoryStore::new()),
                links: BTreeMap::new(),
            })
            .collect();

        for from in 0..config.peers {
            for to in 0..config.peers {
                if from == to {
                    continue;
                }
                let tx = tx.clone();
                let sink: Sink = Box::new(move |message: Message<LogChange>| {
                    let _ = tx.send(Envelope { from, to, message });
                });
                let conn = Connection::new(backend.clone(), peers[from].store.clone(), sink);
                peers[from].links.insert(to, conn);
            }
        }

        let network = NetworkSimulator::new(config.network.clone(), config.seed);
        Self {
            config,
            peers,
            outbox,
            network,
            edits: 0,
        }
    }

    /// Run the edit phase, then deliver and retransmit until every peer
    /// holds the same clock for every document.
    pub async fn run(mut self) -> anyhow::Result<SimulationReport> {
        let start = Instant::now();
        info!(
            peers = self.config.peers,
            documents = self.config.documents,
            edits_per_peer = self.config.edits_per_peer,
            "starting simulation"
        );

        let schedule = edit_schedule(
            self.config.peers,
            self.config.documents,
            self.config.edits_per_peer,
            self.config.seed,
        );
        futures::pin_mut!(schedule);
        while let Some((peer, doc)) = schedule.next().await {
            self.edit(peer, &doc).await?;
            for _ in 0..self.config.deliveries_per_edit {
                self.step().await?;
            }
        }

        let mut rounds = 0;
        while !self.is_converged() && rounds < self.config.max_rounds {
            rounds += 1;
            self.network.retransmit_lost();
            while self.step().await? {}
            debug!(
                round = rounds,
                lost = self.network.lost_count(),
                in_flight = self.network.in_flight_count(),
                "round complete"
            );
        }

        let converged = self.is_converged();
        info!(converged, rounds, "simulation finished");
        Ok(SimulationReport {
            peers: self.config.peers,
            documents: self.config.documents,
            edits: self.edits,
            rounds,
            converged,
            network: self.network.stats(),
            elapsed: start.elapsed(),
        })
    }

    /// Append a value to `doc` on `peer` and announce it on every link.
    async fn edit(&mut self, peer: usize, doc: &DocumentId) -> anyhow::Result<()> {
        let sim_peer = &self.peers[peer];
        let mut current = sim_peer.store.get_now(doc).unwrap_or_default();
        let value = format!("{}/{}", sim_peer.actor, current.len());
        current
            .append(&sim_peer.actor, value)
            .context("appending local edit")?;
        sim_peer.store.insert(doc.clone(), current.clone());

        for conn in sim_peer.links.values() {
            conn.notify_local_change(doc, &current).await?;
        }
        self.edits += 1;
        Ok(())
    }

    /// Move sent messages onto the network and deliver one. Returns false
    /// once nothing is in flight.
    async fn step(&mut self) -> anyhow::Result<bool> {
        while let Ok(envelope) = self.outbox.try_recv() {
            self.network.send(envelope);
        }
        let Some(envelope) = self.network.receive() else {
            return Ok(false);
        };
        self.deliver(envelope).await?;
        Ok(true)
    }

    async fn deliver(&self, envelope: Envelope) -> anyhow::Result<()> {
        let Envelope { from, to, message } = envelope;
        let peer = &self.peers[to];
        let conn = peer
            .links
            .get(&from)
            .with_context(|| format!("no link from peer {} to peer {}", to, from))?;

        let id = message.document_id.clone();
        let had_changes = message.has_changes();
        let held = conn.receive_message(message).await?;

        if let (true, Some(doc)) = (had_changes, held) {
            for (other, conn) in &peer.links {
                if *other != from {
                    conn.notify_local_change(&id, &doc).await?;
                }
            }
        }
        Ok(())
    }

    /// Every peer holds every document at the same clock.
    pub fn is_converged(&self) -> bool {
        (0..self.config.documents).all(|d| {
            let id = document_id(d);
            let clocks: Vec<Option<VectorClock>> = self
                .peers
                .iter()
                .map(|p| p.store.get_now(&id).and_then(|doc| doc.clock().cloned()))
                .collect();
            match clocks.first() {
                Some(Some(first)) => clocks.iter().all(|c| c.as_ref() == Some(first)),
                _ => false,
            }
        })
    }

    /// The document `id` as held by `peer`.
    #[cfg(test)]
    fn document(&self, peer: usize, id: &DocumentId) -> Option<OpLogDoc> {
        self.peers.get(peer)?.store.get_now(id)
    }
}

fn document_id(index: usize) -> DocumentId {
    DocumentId::new(format!("doc-{}", index))
}

/// Generator yielding `(peer, document)` pairs for local edits
fn edit_schedule(
    peers: usize,
    documents: usize,
    edits_per_peer: usize,
    seed: u64,
) -> impl Stream<Item = (usize, DocumentId)> {
    stream! {
        let mut rng = StdRng::seed_from_u64(seed);
        for _ in 0..edits_per_peer {
            for peer in 0..peers {
                let doc = rng.gen_range(0..documents);
                yield (peer, document_id(doc));
            }
        }
        // Make sure every document exists somewhere.
        for doc in 0..documents {
            yield (doc % peers, document_id(doc));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(network: NetworkConfig) -> SimulationConfig {
        SimulationConfigBuilder::new()
            .peers(3)
            .documents(2)
            .edits_per_peer(10)
            .seed(7)
            .network(network)
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_rejects_bad_config() {
        assert!(SimulationConfigBuilder::new().peers(1).build().is_err());
        assert!(SimulationConfigBuilder::new()
            .network(NetworkConfig::lossy(1.5))
            .build()
            .is_err());
        assert!(SimulationConfigBuilder::new()
            .network(NetworkConfig::lossy(1.0))
            .build()
            .is_err());
    }

    #[tokio::test]
    async fn test_perfect_network_converges() {
        let report = Simulation::new(config(NetworkConfig::default()))
            .run()
            .await
            .unwrap();
        assert!(report.converged);
        assert_eq!(report.edits, 3 * 10 + 2);
        assert_eq!(report.network.lost, 0);
    }

    #[tokio::test]
    async fn test_chaotic_network_converges() {
        let report = Simulation::new(config(NetworkConfig::chaotic()))
            .run()
            .await
            .unwrap();
        assert!(report.converged, "{:?}", report);
    }

    #[tokio::test]
    async fn test_converged_documents_hold_every_edit() {
        let mut sim = Simulation::new(config(NetworkConfig::with_dups(0.5)));
        let schedule = edit_schedule(3, 2, 10, 7);
        futures::pin_mut!(schedule);
        while let Some((peer, doc)) = schedule.next().await {
            sim.edit(peer, &doc).await.unwrap();
        }

        let mut rounds = 0;
        while !sim.is_converged() && rounds < 50 {
            rounds += 1;
            sim.network.retransmit_lost();
            while sim.step().await.unwrap() {}
        }
        assert!(sim.is_converged());

        let total: usize = (0..2)
            .map(|d| sim.document(0, &document_id(d)).map_or(0, |doc| doc.len()))
            .sum();
        assert_eq!(total, sim.edits);
        for peer in 1..3 {
            for d in 0..2 {
                let ours = sim.document(0, &document_id(d)).unwrap();
                let theirs = sim.document(peer, &document_id(d)).unwrap();
                assert_eq!(ours.clock(), theirs.clock());
                assert_eq!(theirs.pending_len(), 0);
            }
        }
    }
}
