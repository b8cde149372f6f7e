// src/registry/center.rs

use std::fmt::Debug;

use crate::errors::Result;

/// Hierarchical coordination service.
///
/// Keys are absolute `/`-separated paths. Each implementation value is one
/// session: ephemeral nodes and held locks belong to it and disappear when
/// the session is closed or expires.
pub trait RegistryCenter: Send + Sync + Debug {
    fn is_existed(&self, key: &str) -> Result<bool>;

    /// Payload stored at `key`, or `None` when the node does not exist.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Names (not full paths) of the direct children of `key`; empty when
    /// `key` does not exist.
    fn get_children_keys(&self, key: &str) -> Result<Vec<String>>;

    /// Create or overwrite a persistent node, creating missing parents.
    fn persist(&self, key: &str, value: &str) -> Result<()>;

    /// Create or overwrite a node owned by this session.
    fn persist_ephemeral(&self, key: &str, value: &str) -> Result<()>;

    /// Remove `key` and everything below it. Removing a missing key is a no-op.
    fn remove(&self, key: &str) -> Result<()>;

    /// Block until the named mutex is held by this session. Reentrant.
    fn acquire_lock(&self, key: &str) -> Result<()>;

    /// Release one hold of the named mutex. Fails with
    /// [`DagflowError::LockNotHeld`](crate::errors::DagflowError::LockNotHeld)
    /// when this session does not hold it.
    fn release_lock(&self, key: &str) -> Result<()>;

    /// End the session, dropping its ephemeral nodes and locks.
    fn close(&self) -> Result<()>;
}
