// src/registry/monitor.rs

//! Polling-based tracking of registered nodes and failover of dead ones.

use std::collections::{BTreeSet, HashMap};
use std::fmt::Debug;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::context::Stopper;
use crate::errors::Result;
use crate::registry::client::{DeadServerOp, RegistryClient};
use crate::types::NodeType;

/// Takes over the work of a node that left the registry.
pub trait FailoverHandler: Send + Sync + Debug {
    fn failover(&self, node_type: NodeType, host: &str) -> Result<()>;
}

/// Membership change observed between two polls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeEvent {
    Added { node_type: NodeType, host: String },
    Removed { node_type: NodeType, host: String },
}

/// Diffs successive snapshots of registered masters and workers.
#[derive(Debug)]
pub struct NodeMonitor {
    registry: Arc<RegistryClient>,
    handler: Arc<dyn FailoverHandler>,
    known: Mutex<HashMap<NodeType, BTreeSet<String>>>,
    /// Removed nodes whose failover was aborted; retried on later polls.
    unsettled: Mutex<HashMap<NodeType, BTreeSet<String>>>,
}

impl NodeMonitor {
    pub fn new(registry: Arc<RegistryClient>, handler: Arc<dyn FailoverHandler>) -> Self {
        Self {
            registry,
            handler,
            known: Mutex::new(HashMap::new()),
            unsettled: Mutex::new(HashMap::new()),
        }
    }

    /// Take one snapshot and react to the differences with the previous one.
    ///
    /// Removed nodes are recorded as dead servers and failed over while the
    /// failover lock of their type is held. Nodes that come back are removed
    /// from the dead servers. A snapshot that cannot be read is skipped and
    /// the previous one is kept. A failover aborted on a registry error is
    /// retried on the next poll unless the node has come back.
    pub fn poll(&self) -> Vec<NodeEvent> {
        let mut events = Vec::new();

        for node_type in [NodeType::Master, NodeType::Worker] {
            let current: BTreeSet<String> =
                match self.registry.try_get_server_node_list(node_type, true) {
                    Ok(nodes) => nodes.into_iter().collect(),
                    Err(e) => {
                        warn!(node_type = %node_type, error = %e, "registry snapshot unavailable; skipping");
                        continue;
                    }
                };

            let previous = {
                let mut known = self.known.lock().unwrap_or_else(|e| e.into_inner());
                known.insert(node_type, current.clone()).unwrap_or_default()
            };

            let retry: Vec<String> = {
                let mut unsettled = self.unsettled.lock().unwrap_or_else(|e| e.into_inner());
                let hosts = unsettled.entry(node_type).or_default();
                hosts.retain(|host| !current.contains(host));
                std::mem::take(hosts).into_iter().collect()
            };
            for host in retry {
                info!(node_type = %node_type, %host, "retrying aborted failover");
                self.fail_over(node_type, &host);
            }

            for host in previous.difference(&current) {
                warn!(node_type = %node_type, %host, "node left the registry");
                self.fail_over(node_type, host);
                events.push(NodeEvent::Removed {
                    node_type,
                    host: host.clone(),
                });
            }

            for host in current.difference(&previous) {
                info!(node_type = %node_type, %host, "node joined the registry");
                if let Err(e) = self
                    .registry
                    .handle_dead_server(host, node_type, DeadServerOp::Delete)
                {
                    warn!(%host, error = %e, "failed to clear dead-server entry");
                }
                events.push(NodeEvent::Added {
                    node_type,
                    host: host.clone(),
                });
            }
        }

        events
    }

    fn fail_over(&self, node_type: NodeType, host: &str) {
        if !self.try_fail_over(node_type, host) {
            self.unsettled
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .entry(node_type)
                .or_default()
                .insert(host.to_string());
        }
    }

    /// False when the registry could not confirm the node is gone.
    fn try_fail_over(&self, node_type: NodeType, host: &str) -> bool {
        if let Err(e) = self
            .registry
            .handle_dead_server(host, node_type, DeadServerOp::Add)
        {
            warn!(%host, error = %e, "failed to record dead server");
        }

        let lock_path = self.registry.failover_lock_path(node_type);
        let _lock = match self.registry.acquire_lock(&lock_path) {
            Ok(lock) => lock,
            Err(e) => {
                error!(%host, lock = %lock_path, error = %e, "failed to acquire failover lock");
                return false;
            }
        };

        // Another node may have handled it while we waited for the lock.
        match self.registry.try_check_node_exists(host, node_type) {
            Ok(true) => {
                info!(%host, "node re-registered; skipping failover");
                return true;
            }
            Ok(false) => {}
            Err(e) => {
                error!(%host, error = %e, "cannot confirm node is gone; aborting failover");
                return false;
            }
        }

        match self.handler.failover(node_type, host) {
            Ok(()) => info!(node_type = %node_type, %host, "failover complete"),
            Err(e) => error!(node_type = %node_type, %host, error = %e, "failover failed"),
        }
        true
    }

    /// Poll every `interval` until the stopper fires. Polls run on the
    /// blocking pool since lock acquisition may block.
    pub fn spawn(self: Arc<Self>, interval: Duration, stopper: Stopper) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = stopper.stopped() => break,
                    _ = ticker.tick() => {
                        let monitor = Arc::clone(&self);
                        if let Err(e) = tokio::task::spawn_blocking(move || monitor.poll()).await {
                            error!(error = %e, "node monitor poll panicked");
                        }
                    }
                }
            }
            info!("node monitor stopped");
        })
    }
}
