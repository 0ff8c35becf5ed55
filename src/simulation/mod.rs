#![forbid(unsafe_code)]

// Simulation orchestrator - staggered launch of independent virtual students
// and a join-all barrier over their lifecycles.

pub mod client;

use crate::catalog::{self, Identity};
use crate::config::{IdentityMode, SimulationConfig};
use crate::signaling::{ProtocolAdapter, SocketIoAdapter};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{error, info};

pub use client::{client_label, ClientOutcome, ClientPhase, ClientStatus, ClientTimings, VirtualClient};

/// Terminal state of every lifecycle, ordered by client id
#[derive(Debug, Clone, Default)]
pub struct SimulationReport {
    pub outcomes: Vec<ClientOutcome>,
}

impl SimulationReport {
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn completed(&self) -> usize {
        self.count(|status| matches!(status, ClientStatus::Completed))
    }

    pub fn connect_failures(&self) -> usize {
        self.count(|status| matches!(status, ClientStatus::ConnectFailed(_)))
    }

    pub fn timed_out(&self) -> usize {
        self.count(|status| matches!(status, ClientStatus::TimedOut))
    }

    fn count(&self, predicate: impl Fn(&ClientStatus) -> bool) -> usize {
        self.outcomes.iter().filter(|o| predicate(&o.status)).count()
    }
}

struct Launch {
    id: usize,
    identity: Identity,
    launched_at: Instant,
    handle: JoinHandle<ClientOutcome>,
}

/// Spawns `clientCount` virtual students and waits for all of them
pub struct Orchestrator {
    config: SimulationConfig,
}

impl Orchestrator {
    pub fn new(config: SimulationConfig) -> Self {
        Self { config }
    }

    /// Runs the simulation against a live Socket.IO server
    pub async fn run_socket_io(&self) -> SimulationReport {
        let connect_timeout = self.config.connect_timeout();
        self.run(|id| SocketIoAdapter::new(client_label(id), connect_timeout))
            .await
    }

    /// Runs the simulation with one adapter per client from `make_adapter`.
    ///
    /// Client ids run from 1 to `clientCount`. Client *i* is spawned one
    /// stagger interval after client *i-1*. Returns once every lifecycle has
    /// reached a terminal state; a failed or panicked lifecycle never stops
    /// the others.
    pub async fn run<A, F>(&self, mut make_adapter: F) -> SimulationReport
    where
        A: ProtocolAdapter + 'static,
        F: FnMut(usize) -> A,
    {
        let total = self.config.client_count;
        let stagger = self.config.stagger_interval();
        let timings = ClientTimings::from_config(&self.config);
        let limiter = self
            .config
            .max_concurrent_clients
            .map(|permits| Arc::new(Semaphore::new(permits)));
        let mut identity_rng = self.rng_for(0);

        info!(
            "Launching {} virtual students against {} ({}ms apart)",
            total,
            self.config.server_address,
            stagger.as_millis()
        );

        let mut launches = Vec::with_capacity(total);
        for id in 1..=total {
            if id > 1 {
                sleep(stagger).await;
            }

            // Bounded mode: wait for a finished lifecycle before launching the next
            let permit = match &limiter {
                Some(semaphore) => semaphore.clone().acquire_owned().await.ok(),
                None => None,
            };

            let identity = match self.config.identity_mode {
                IdentityMode::Random => catalog::random_identity(&mut identity_rng),
                IdentityMode::Roster => catalog::roster_identity(id - 1),
            };
            info!("Starting: {} ({})", identity.name, identity.class);

            let client = VirtualClient::new(
                id,
                identity.clone(),
                self.config.server_address.clone(),
                timings.clone(),
                make_adapter(id),
                self.rng_for(id as u64),
            );
            let launched_at = Instant::now();
            let handle = tokio::spawn(async move {
                let outcome = client.run(launched_at).await;
                drop(permit);
                outcome
            });

            launches.push(Launch {
                id,
                identity,
                launched_at,
                handle,
            });
        }

        let mut outcomes = Vec::with_capacity(total);
        for launch in launches {
            match launch.handle.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    error!("{}: Lifecycle task failed: {}", client_label(launch.id), e);
                    outcomes.push(ClientOutcome {
                        id: launch.id,
                        identity: launch.identity,
                        status: ClientStatus::Panicked(e.to_string()),
                        started_at: launch.launched_at,
                        phases: Vec::new(),
                        session_id: None,
                        project_files: None,
                        updates_sent: 0,
                    });
                }
            }
        }

        let report = SimulationReport { outcomes };
        info!(
            "All {} lifecycles finished: {} completed, {} failed to connect, {} timed out",
            report.len(),
            report.completed(),
            report.connect_failures(),
            report.timed_out()
        );
        report
    }

    /// Seeded per client when `seed` is configured, otherwise from OS entropy
    fn rng_for(&self, salt: u64) -> StdRng {
        match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(salt)),
            None => StdRng::from_entropy(),
        }
    }
}
