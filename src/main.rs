//! # docsync
//!
//! Runs a multi-peer sync simulation over an unreliable in-memory network
//! and reports whether every peer converged on the same document clocks.

mod network;
mod simulation;

use clap::Parser;
use network::NetworkConfig;
use simulation::{Simulation, SimulationConfigBuilder};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "docsync")]
#[command(about = "Simulate bilateral document sync between peers over a lossy network")]
#[command(version)]
struct Cli {
    /// Number of peers, fully meshed
    #[arg(long, default_value_t = 3)]
    peers: usize,

    /// Number of documents edited
    #[arg(long, default_value_t = 2)]
    documents: usize,

    /// Local edits made by each peer
    #[arg(long, default_value_t = 20)]
    edits: usize,

    /// Network deliveries interleaved after each edit
    #[arg(long, default_value_t = 2)]
    deliveries_per_edit: usize,

    /// Retransmission rounds allowed after the edit phase
    #[arg(long, default_value_t = 50)]
    max_rounds: usize,

    /// Seed for the edit schedule and the network
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Probability that a message is lost (and later retransmitted)
    #[arg(long, default_value_t = 0.0)]
    loss: f64,

    /// Probability that a message is delivered twice
    #[arg(long, default_value_t = 0.0)]
    dup: f64,

    /// Probability that a message overtakes others in flight
    #[arg(long, default_value_t = 0.0)]
    reorder: f64,

    /// Use the chaotic network preset, ignoring --loss/--dup/--reorder
    #[arg(long)]
    chaotic: bool,
}

impl Cli {
    fn network(&self) -> NetworkConfig {
        if self.chaotic {
            NetworkConfig::chaotic()
        } else {
            NetworkConfig {
                loss_rate: self.loss,
                dup_rate: self.dup,
                reorder_rate: self.reorder,
            }
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = SimulationConfigBuilder::new()
        .peers(cli.peers)
        .documents(cli.documents)
        .edits_per_peer(cli.edits)
        .deliveries_per_edit(cli.deliveries_per_edit)
        .max_rounds(cli.max_rounds)
        .seed(cli.seed)
        .network(cli.network())
        .build()?;

    let rt = tokio::runtime::Runtime::new()?;
    let report = rt.block_on(Simulation::new(config).run())?;
    report.print();

    anyhow::ensure!(
        report.converged,
        "peers did not converge after {} rounds",
        report.rounds
    );
    println!("\n✓ All peers converged");
    Ok(())
}
