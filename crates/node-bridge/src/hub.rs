//! Fan-out of server events to every registered client.

use crate::error::SendError;
use crate::protocol::Envelope;
use crate::registry::{ClientId, ClientRegistry};
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Upper bound for a single client send. A stalled client counts as failed
/// instead of holding up the rest of the broadcast.
pub const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Outcome of one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Clients in the snapshot
    pub attempted: usize,
    /// Sends that failed or timed out
    pub failed: usize,
}

impl BroadcastReport {
    pub fn delivered(&self) -> usize {
        self.attempted - self.failed
    }
}

/// Broadcasts envelopes to the clients in a [`ClientRegistry`].
#[derive(Clone)]
pub struct BroadcastHub {
    registry: ClientRegistry,
    send_timeout: Duration,
    /// Clients whose last send failed. Only entering and leaving this set is
    /// logged, since every log line is itself broadcast.
    failing: Arc<Mutex<HashSet<ClientId>>>,
}

impl BroadcastHub {
    pub fn new(registry: ClientRegistry) -> Self {
        Self {
            registry,
            send_timeout: SEND_TIMEOUT,
            failing: Arc::default(),
        }
    }

    /// Override the per-client send timeout.
    pub fn with_send_timeout(mut self, send_timeout: Duration) -> Self {
        self.send_timeout = send_timeout;
        self
    }

    /// Send an envelope to every client registered at call time.
    ///
    /// Failures are counted, never returned. Failed clients stay registered;
    /// their own connection loop notices the broken transport. A client that
    /// keeps failing is logged once, not once per broadcast.
    pub async fn broadcast(&self, envelope: &Envelope) -> BroadcastReport {
        let clients = self.registry.snapshot();
        if clients.is_empty() {
            return BroadcastReport::default();
        }

        let payload = envelope.to_json();
        let send_timeout = self.send_timeout;

        let results = join_all(clients.iter().map(|(id, sink)| {
            let payload = payload.as_str();
            async move {
                let result = match tokio::time::timeout(send_timeout, sink.send_text(payload)).await {
                    Ok(result) => result,
                    Err(_) => Err(SendError::TimedOut),
                };
                (*id, result)
            }
        }))
        .await;

        let mut report = BroadcastReport {
            attempted: clients.len(),
            failed: 0,
        };
        let mut newly_failing = Vec::new();
        let mut recovered = Vec::new();
        {
            let mut failing = self.failing.lock().unwrap_or_else(PoisonError::into_inner);
            let present: HashSet<ClientId> = clients.iter().map(|(id, _)| *id).collect();
            failing.retain(|id| present.contains(id));

            for (id, result) in results {
                match result {
                    Ok(()) => {
                        if failing.remove(&id) {
                            recovered.push(id);
                        }
                    }
                    Err(e) => {
                        report.failed += 1;
                        if failing.insert(id) {
                            newly_failing.push((id, e));
                        }
                    }
                }
            }
        }

        for (id, e) in newly_failing {
            warn!("Broadcasts to {} failing: {}", id, e);
        }
        for id in recovered {
            debug!("Broadcasts to {} recovered", id);
        }

        report
    }

    /// Publish each line from the relay channel as a `log` envelope.
    ///
    /// Lines are broadcast one at a time, so every client sees them in
    /// publish order. Returns when all senders are dropped.
    pub async fn run(self, mut lines: mpsc::UnboundedReceiver<String>) {
        while let Some(line) = lines.recv().await {
            self.broadcast(&Envelope::log(line)).await;
        }
        warn!("Log relay closed, broadcast hub stopping");
    }
}
