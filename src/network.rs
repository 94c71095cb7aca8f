//! Simulated unreliable network between peers.
//!
//! Models the three failure modes the sync protocol must tolerate: loss,
//! duplication and reordering. Lost messages are kept so they can be
//! retransmitted later, which stands in for delayed delivery.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;

/// Network configuration for simulation
#[derive(Debug, Clone, Default)]
pub struct NetworkConfig {
    /// Probability of message loss (0.0 - 1.0)
    pub loss_rate: f64,
    /// Probability of message duplication (0.0 - 1.0)
    pub dup_rate: f64,
    /// Probability of message reordering (0.0 - 1.0)
    pub reorder_rate: f64,
}

impl NetworkConfig {
    /// Create a lossy network configuration
    #[cfg(test)]
    pub fn lossy(loss_rate: f64) -> Self {
        Self {
            loss_rate,
            ..Default::default()
        }
    }

    /// Create a network with duplicates
    #[cfg(test)]
    pub fn with_dups(dup_rate: f64) -> Self {
        Self {
            dup_rate,
            ..Default::default()
        }
    }

    /// Create a chaotic network (all problems)
    pub fn chaotic() -> Self {
        Self {
            loss_rate: 0.1,
            dup_rate: 0.2,
            reorder_rate: 0.3,
        }
    }
}

/// Counters kept by the simulator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetworkStats {
    pub sent: usize,
    pub delivered: usize,
    pub lost: usize,
    pub duplicated: usize,
    pub reordered: usize,
    pub retransmitted: usize,
}

/// Messages in flight between peers.
#[derive(Debug)]
pub struct NetworkSimulator<M> {
    in_flight: VecDeque<M>,
    lost: Vec<M>,
    config: NetworkConfig,
    rng: StdRng,
    stats: NetworkStats,
}

impl<M: Clone> NetworkSimulator<M> {
    pub fn new(config: NetworkConfig, seed: u64) -> Self {
        Self {
            in_flight: VecDeque::new(),
            lost: Vec::new(),
            config,
            rng: StdRng::seed_from_u64(seed),
            stats: NetworkStats::default(),
        }
    }

    /// Send a message through the network
    pub fn send(&mut self, msg: M) {
        self.stats.sent += 1;

        if self.rng.gen_bool(self.config.loss_rate) {
            self.lost.push(msg);
            self.stats.lost += 1;
            return;
        }

        if self.rng.gen_bool(self.config.dup_rate) {
            self.in_flight.push_back(msg.clone());
            self.stats.duplicated += 1;
        }

        if !self.in_flight.is_empty() && self.rng.gen_bool(self.config.reorder_rate) {
            let pos = self.rng.gen_range(0..self.in_flight.len());
            self.in_flight.insert(pos, msg);
            self.stats.reordered += 1;
        } else {
            self.in_flight.push_back(msg);
        }
    }

    /// Receive the next message (if any)
    pub fn receive(&mut self) -> Option<M> {
        let msg = self.in_flight.pop_front()?;
        self.stats.delivered += 1;
        Some(msg)
    }

    /// Re-send lost messages (simulates retransmission)
    pub fn retransmit_lost(&mut self) {
        self.stats.retransmitted += self.lost.len();
        self.in_flight.extend(self.lost.drain(..));
    }

    /// Number of messages in flight
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Number of lost messages awaiting retransmission
    pub fn lost_count(&self) -> usize {
        self.lost.len()
    }

    pub fn stats(&self) -> NetworkStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_perfect_network_is_fifo() {
        let mut net = NetworkSimulator::new(NetworkConfig::default(), 7);
        for i in 0..5 {
            net.send(i);
        }
        let received: Vec<_> = std::iter::from_fn(|| net.receive()).collect();
        assert_eq!(received, vec![0, 1, 2, 3, 4]);
        assert_eq!(net.stats().delivered, 5);
    }

    #[test]
    fn test_lost_messages_are_retransmitted() {
        let mut net = NetworkSimulator::new(NetworkConfig::lossy(1.0), 7);
        net.send("a");
        net.send("b");
        assert_eq!(net.in_flight_count(), 0);
        assert_eq!(net.lost_count(), 2);

        net.retransmit_lost();
        assert_eq!(net.in_flight_count(), 2);
        assert_eq!(net.lost_count(), 0);
        assert_eq!(net.stats().retransmitted, 2);
    }

    #[test]
    fn test_duplication() {
        let mut net = NetworkSimulator::new(NetworkConfig::with_dups(1.0), 7);
        net.send(1);
        assert_eq!(net.in_flight_count(), 2);
        assert_eq!(net.stats().duplicated, 1);
    }

    #[test]
    fn test_reordering_keeps_every_message() {
        let mut net = NetworkSimulator::new(
            NetworkConfig {
                reorder_rate: 1.0,
                ..Default::default()
            },
            7,
        );
        for i in 0..20 {
            net.send(i);
        }
        let mut received: Vec<_> = std::iter::from_fn(|| net.receive()).collect();
        received.sort();
        assert_eq!(received, (0..20).collect::<Vec<_>>());
    }
}
