//! Supportability metrics actor.
//!
//! A single task owns the counter map. Everything else talks to it through a
//! [`MetricsHandle`], so increments never contend on a lock and a dump is a
//! consistent snapshot of every counter at one instant.
//!
//! A dump is destructive: the actor hands over its map and starts a fresh one
//! with `Sent` seeded to zero.

use crate::outcome::METRIC_SENT;
use crate::shutdown::ShutdownSignals;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Metric name to cumulative count since the previous dump.
pub type MetricsSnapshot = HashMap<String, f64>;

enum Command {
    Increment(String, f64),
    IncrementSent(f64),
    Dump(oneshot::Sender<MetricsSnapshot>),
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Increment(name, amount) => write!(f, "Increment({name}, {amount})"),
            Self::IncrementSent(amount) => write!(f, "IncrementSent({amount})"),
            Self::Dump(_) => f.write_str("Dump"),
        }
    }
}

fn fresh_snapshot() -> MetricsSnapshot {
    let mut metrics = HashMap::new();
    metrics.insert(METRIC_SENT.to_string(), 0.0);
    metrics
}

struct MetricsActor {
    metrics: MetricsSnapshot,
    commands: mpsc::UnboundedReceiver<Command>,
    signals: Arc<ShutdownSignals>,
}

impl MetricsActor {
    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;

                () = self.signals.application_shutdown() => break,

                command = self.commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
            }
        }
        tracing::debug!("supportability metrics actor stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Increment(name, amount) => {
                *self.metrics.entry(name).or_insert(0.0) += amount;
            }
            Command::IncrementSent(amount) => {
                *self.metrics.entry(METRIC_SENT.to_string()).or_insert(0.0) += amount;
            }
            Command::Dump(reply) => {
                let snapshot = std::mem::replace(&mut self.metrics, fresh_snapshot());
                // Requester gave up; the counters are gone either way.
                let _ = reply.send(snapshot);
            }
        }
    }
}

/// Cloneable handle to the metrics actor.
#[derive(Clone, Debug)]
pub struct MetricsHandle {
    commands: mpsc::UnboundedSender<Command>,
    signals: Arc<ShutdownSignals>,
}

impl MetricsHandle {
    /// Spawns the actor on the given runtime. It runs until application
    /// shutdown is requested; stream shutdown does not stop it.
    pub fn spawn(
        runtime: &tokio::runtime::Handle,
        signals: Arc<ShutdownSignals>,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let actor = MetricsActor {
            metrics: fresh_snapshot(),
            commands: rx,
            signals: Arc::clone(&signals),
        };
        let task = runtime.spawn(actor.run());
        (
            Self {
                commands: tx,
                signals,
            },
            task,
        )
    }

    /// Adds `amount` to the named counter. Fire-and-forget.
    pub fn increment(&self, name: impl Into<String>, amount: f64) {
        let _ = self.commands.send(Command::Increment(name.into(), amount));
    }

    pub fn increment_sent(&self, amount: f64) {
        let _ = self.commands.send(Command::IncrementSent(amount));
    }

    /// Takes the current counters and resets them.
    ///
    /// Returns `None` once application shutdown has been requested, without
    /// waiting on the actor.
    pub async fn dump(&self) -> Option<MetricsSnapshot> {
        if self.signals.application_shutdown_requested() {
            return None;
        }

        let (tx, rx) = oneshot::channel();
        self.commands.send(Command::Dump(tx)).ok()?;

        tokio::select! {
            snapshot = rx => snapshot.ok(),
            () = self.signals.application_shutdown() => None,
        }
    }
}
