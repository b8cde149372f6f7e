// src/registry/client.rs

//! Typed access to the registry layout: node paths, heartbeats, locks and
//! dead-server bookkeeping.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::errors::Result;
use crate::registry::center::RegistryCenter;
use crate::registry::heartbeat::{Server, parse_heartbeat};
use crate::types::NodeType;

pub const MASTER_NODES: &str = "/nodes/master";
pub const WORKER_NODES: &str = "/nodes/worker";
pub const DEAD_SERVERS: &str = "/dead-servers";
pub const LOCK_MASTERS: &str = "/lock/masters";
pub const LOCK_FAILOVER_STARTUP_MASTERS: &str = "/lock/failover/startup-masters";
pub const LOCK_FAILOVER_MASTERS: &str = "/lock/failover/masters";
pub const LOCK_FAILOVER_WORKERS: &str = "/lock/failover/workers";

/// Whether a dead-server entry is being added or removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadServerOp {
    Add,
    Delete,
}

/// Registry client shared by every component of a node.
#[derive(Debug)]
pub struct RegistryClient {
    center: Arc<dyn RegistryCenter>,
    namespace: String,
}

impl RegistryClient {
    pub fn new(center: Arc<dyn RegistryCenter>, namespace: impl Into<String>) -> Self {
        let namespace = namespace.into().trim_end_matches('/').to_string();
        Self { center, namespace }
    }

    pub fn center(&self) -> &Arc<dyn RegistryCenter> {
        &self.center
    }

    fn path(&self, relative: &str) -> String {
        format!("{}{}", self.namespace, relative)
    }

    /// Parent path of the given node type.
    pub fn node_parent_path(&self, node_type: NodeType) -> String {
        match node_type {
            NodeType::Master => self.path(MASTER_NODES),
            NodeType::Worker => self.path(WORKER_NODES),
            NodeType::DeadServer => self.path(DEAD_SERVERS),
        }
    }

    pub fn master_lock_path(&self) -> String {
        self.path(LOCK_MASTERS)
    }

    pub fn startup_lock_path(&self) -> String {
        self.path(LOCK_FAILOVER_STARTUP_MASTERS)
    }

    /// Failover lock guarding takeover of a dead node of `node_type`.
    pub fn failover_lock_path(&self, node_type: NodeType) -> String {
        match node_type {
            NodeType::Worker => self.path(LOCK_FAILOVER_WORKERS),
            _ => self.path(LOCK_FAILOVER_MASTERS),
        }
    }

    /// Ensure the master, worker and dead-server parents exist.
    pub fn init_system_node(&self) -> Result<()> {
        for node_type in [NodeType::Master, NodeType::Worker, NodeType::DeadServer] {
            let path = self.node_parent_path(node_type);
            if !self.center.is_existed(&path)? {
                self.center.persist(&path, "")?;
                info!(%path, "created registry system node");
            }
        }
        Ok(())
    }

    /// Registry path of a node: `/nodes/master/{host:port}` or
    /// `/nodes/worker/{group}/{host:port}`.
    pub fn node_path(&self, node_type: NodeType, group: Option<&str>, address: &str) -> String {
        match (node_type, group) {
            (NodeType::Worker, Some(group)) => {
                format!("{}/{}/{}", self.node_parent_path(node_type), group, address)
            }
            _ => format!("{}/{}", self.node_parent_path(node_type), address),
        }
    }

    /// Register this node as an ephemeral entry holding its heartbeat.
    pub fn register(
        &self,
        node_type: NodeType,
        group: Option<&str>,
        address: &str,
        heartbeat: &str,
    ) -> Result<String> {
        let path = self.node_path(node_type, group, address);
        self.center.persist_ephemeral(&path, heartbeat)?;
        info!(%path, node_type = %node_type, "registered node");
        Ok(path)
    }

    pub fn update_heartbeat(&self, path: &str, heartbeat: &str) -> Result<()> {
        self.center.persist_ephemeral(path, heartbeat)
    }

    pub fn unregister(&self, path: &str) -> Result<()> {
        self.center.remove(path)?;
        info!(%path, "unregistered node");
        Ok(())
    }

    /// Worker group names.
    pub fn get_worker_groups(&self) -> Vec<String> {
        self.children_or_empty(&self.node_parent_path(NodeType::Worker))
    }

    /// Registered node keys with their heartbeat payloads; empty when the
    /// registry cannot be read.
    ///
    /// Master keys are `host:port`. Worker keys are `group/host:port`, or
    /// `host:port` with `host_only`.
    pub fn get_server_maps(&self, node_type: NodeType, host_only: bool) -> BTreeMap<String, String> {
        self.try_get_server_maps(node_type, host_only)
            .unwrap_or_else(|e| {
                warn!(node_type = %node_type, error = %e, "failed to list registered nodes");
                BTreeMap::new()
            })
    }

    /// Like [`RegistryClient::get_server_maps`], but a failed listing is an
    /// error instead of an empty map.
    pub fn try_get_server_maps(
        &self,
        node_type: NodeType,
        host_only: bool,
    ) -> Result<BTreeMap<String, String>> {
        let parent = self.node_parent_path(node_type);
        let mut servers = BTreeMap::new();

        let entries: Vec<(String, String)> = if node_type == NodeType::Worker {
            let mut entries = Vec::new();
            for group in self.center.get_children_keys(&parent)? {
                for node in self.center.get_children_keys(&format!("{parent}/{group}"))? {
                    entries.push((format!("{group}/{node}"), node));
                }
            }
            entries
        } else {
            self.center
                .get_children_keys(&parent)?
                .into_iter()
                .map(|node| (node.clone(), node))
                .collect()
        };

        for (relative, host) in entries {
            let path = format!("{parent}/{relative}");
            match self.center.get(&path)? {
                Some(payload) => {
                    let key = if host_only { host } else { relative };
                    servers.insert(key, payload);
                }
                None => debug!(%path, "node vanished while listing"),
            }
        }

        Ok(servers)
    }

    /// Parsed heartbeats of every registered node. Unparseable payloads are
    /// skipped.
    pub fn get_server_list(&self, node_type: NodeType) -> Vec<Server> {
        let parent = self.node_parent_path(node_type);
        self.get_server_maps(node_type, false)
            .into_iter()
            .filter_map(|(key, payload)| match parse_heartbeat(&payload) {
                Some(mut server) => {
                    server.registry_path = format!("{parent}/{key}");
                    Some(server)
                }
                None => {
                    warn!(node = %key, %payload, "skipping malformed heartbeat");
                    None
                }
            })
            .collect()
    }

    /// Sorted node keys, see [`RegistryClient::get_server_maps`].
    pub fn get_server_node_list(&self, node_type: NodeType, host_only: bool) -> Vec<String> {
        self.get_server_maps(node_type, host_only).into_keys().collect()
    }

    /// Sorted node keys, or the registry error that prevented listing them.
    pub fn try_get_server_node_list(
        &self,
        node_type: NodeType,
        host_only: bool,
    ) -> Result<Vec<String>> {
        Ok(self
            .try_get_server_maps(node_type, host_only)?
            .into_keys()
            .collect())
    }

    /// Number of live masters; 0 when the registry cannot be read.
    pub fn get_active_master_num(&self) -> usize {
        let parent = self.node_parent_path(NodeType::Master);
        match self.center.get_children_keys(&parent) {
            Ok(children) => children.len(),
            Err(e) => {
                error!(error = %e, "failed to count active masters");
                0
            }
        }
    }

    /// Whether any registered node key of `node_type` contains `host`.
    /// False when the registry cannot be read.
    pub fn check_node_exists(&self, host: &str, node_type: NodeType) -> bool {
        self.try_check_node_exists(host, node_type).unwrap_or_else(|e| {
            warn!(%host, error = %e, "failed to check node registration");
            false
        })
    }

    pub fn try_check_node_exists(&self, host: &str, node_type: NodeType) -> Result<bool> {
        Ok(self
            .try_get_server_maps(node_type, true)?
            .keys()
            .any(|key| key.contains(host)))
    }

    pub fn dead_server_path(&self, node_type: NodeType, host: &str) -> String {
        format!(
            "{}/{}_{}",
            self.path(DEAD_SERVERS),
            node_type_prefix(node_type),
            host
        )
    }

    /// Add or remove the dead-server entry for `node`, which may be a host
    /// or a full registry path (its last segment is used).
    pub fn handle_dead_server(&self, node: &str, node_type: NodeType, op: DeadServerOp) -> Result<()> {
        let host = node.rsplit('/').next().unwrap_or(node);
        let path = self.dead_server_path(node_type, host);
        let exists = self.center.is_existed(&path)?;

        match op {
            DeadServerOp::Add if !exists => {
                let value = format!("{}_{}", node_type_prefix(node_type), host);
                self.center.persist(&path, &value)?;
                info!(%path, "recorded dead server");
            }
            DeadServerOp::Delete if exists => {
                self.center.remove(&path)?;
                info!(%path, "removed dead server");
            }
            _ => {}
        }
        Ok(())
    }

    /// Dead-server entries, e.g. `worker_10.0.0.2:1234`.
    pub fn get_dead_servers(&self) -> Vec<String> {
        self.children_or_empty(&self.path(DEAD_SERVERS))
    }

    /// Block until the named distributed mutex is held.
    pub fn acquire_lock(&self, path: &str) -> Result<RegistryLock<'_>> {
        self.center.acquire_lock(path)?;
        debug!(%path, "acquired registry lock");
        Ok(RegistryLock {
            client: self,
            path: path.to_string(),
        })
    }

    /// Release a named mutex. A lock that is not held is logged, not raised.
    pub fn release_lock(&self, path: &str) {
        match self.center.release_lock(path) {
            Ok(()) => debug!(%path, "released registry lock"),
            Err(e) => error!(%path, error = %e, "failed to release registry lock"),
        }
    }

    /// End the registry session.
    pub fn close(&self) {
        if let Err(e) = self.center.close() {
            warn!(error = %e, "failed to close registry session");
        }
    }

    fn children_or_empty(&self, path: &str) -> Vec<String> {
        self.center.get_children_keys(path).unwrap_or_else(|e| {
            warn!(%path, error = %e, "failed to list registry children");
            Vec::new()
        })
    }
}

fn node_type_prefix(node_type: NodeType) -> &'static str {
    match node_type {
        NodeType::Master => NodeType::Master.prefix(),
        _ => NodeType::Worker.prefix(),
    }
}

/// Held distributed mutex, released on drop.
#[derive(Debug)]
pub struct RegistryLock<'a> {
    client: &'a RegistryClient,
    path: String,
}

impl RegistryLock<'_> {
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl Drop for RegistryLock<'_> {
    fn drop(&mut self) {
        self.client.release_lock(&self.path);
    }
}
