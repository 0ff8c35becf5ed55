#![forbid(unsafe_code)]

//! Exam simulator binary - Spawn virtual students against an exam server
//!
//! Usage:
//!   exam-sim --server http://localhost:8080 --clients 15
//!   exam-sim --config sim.json --stagger-ms 100 --max-concurrent 50
//!   exam-sim --identity roster --seed 7

use anyhow::{Context, Result};
use clap::Parser;
use exam_sim::simulation::ClientStatus;
use exam_sim::{IdentityMode, Orchestrator, SimulationConfig};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "exam-sim", version, about = "Simulate students taking an exam")]
struct Cli {
    /// JSON config file; flags override its values
    #[arg(short = 'f', long)]
    config: Option<PathBuf>,

    /// Exam server address (http, https, ws or wss)
    #[arg(short, long, env = "EXAM_SIM_SERVER")]
    server: Option<String>,

    /// Number of virtual students
    #[arg(short, long, env = "EXAM_SIM_CLIENTS")]
    clients: Option<usize>,

    /// Delay between consecutive student launches
    #[arg(long, env = "EXAM_SIM_STAGGER_MS")]
    stagger_ms: Option<u64>,

    #[arg(long)]
    connect_timeout_ms: Option<u64>,

    /// Pause after connecting before joining
    #[arg(long)]
    settle_ms: Option<u64>,

    /// Pause after joining for the session acknowledgment
    #[arg(long)]
    join_wait_ms: Option<u64>,

    #[arg(long)]
    keystroke_min_ms: Option<u64>,

    #[arg(long)]
    keystroke_max_ms: Option<u64>,

    /// Idle time after typing before disconnecting
    #[arg(long)]
    idle_ms: Option<u64>,

    #[arg(long)]
    lifecycle_timeout_ms: Option<u64>,

    /// Upper bound on simultaneously running students
    #[arg(long)]
    max_concurrent: Option<usize>,

    #[arg(long, value_enum)]
    identity: Option<IdentityMode>,

    /// Seed for reproducible identities, snippets and keystroke delays
    #[arg(long)]
    seed: Option<u64>,
}

impl Cli {
    fn apply(self, config: &mut SimulationConfig) {
        if let Some(server) = self.server {
            config.server_address = server;
        }
        if let Some(clients) = self.clients {
            config.client_count = clients;
        }
        if let Some(ms) = self.stagger_ms {
            config.stagger_interval_ms = ms;
        }
        if let Some(ms) = self.connect_timeout_ms {
            config.connect_timeout_ms = ms;
        }
        if let Some(ms) = self.settle_ms {
            config.handshake_settle_ms = ms;
        }
        if let Some(ms) = self.join_wait_ms {
            config.join_wait_ms = ms;
        }
        if let Some(ms) = self.keystroke_min_ms {
            config.keystroke_min_ms = ms;
        }
        if let Some(ms) = self.keystroke_max_ms {
            config.keystroke_max_ms = ms;
        }
        if let Some(ms) = self.idle_ms {
            config.idle_ms = ms;
        }
        if let Some(ms) = self.lifecycle_timeout_ms {
            config.lifecycle_timeout_ms = ms;
        }
        if self.max_concurrent.is_some() {
            config.max_concurrent_clients = self.max_concurrent;
        }
        if let Some(mode) = self.identity {
            config.identity_mode = mode;
        }
        if self.seed.is_some() {
            config.seed = self.seed;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = SimulationConfig::load(cli.config.as_deref())
        .context("Failed to load simulation config")?;
    cli.apply(&mut config);
    config.validate()?;

    println!("\n=== Starting Exam Simulation ===");
    println!("Server: {}", config.server_address);
    println!("Students: {}", config.client_count);
    println!("Stagger: {}ms", config.stagger_interval_ms);
    println!(
        "Keystrokes: {}-{}ms, idle {}ms",
        config.keystroke_min_ms, config.keystroke_max_ms, config.idle_ms
    );
    if let Some(max) = config.max_concurrent_clients {
        println!("Max concurrent: {}", max);
    }
    println!("================================\n");

    let report = Orchestrator::new(config).run_socket_io().await;

    println!("\n=== Simulation Complete ===");
    for outcome in &report.outcomes {
        let state = match &outcome.status {
            ClientStatus::Completed => "completed".to_string(),
            ClientStatus::TimedOut => "timed out".to_string(),
            ClientStatus::ConnectFailed(reason) => format!("connect failed: {reason}"),
            ClientStatus::Panicked(reason) => format!("lifecycle failed: {reason}"),
        };
        println!("  student-{} ({}): {}", outcome.id, outcome.identity.name, state);
    }
    println!("===========================");

    Ok(())
}
