// src/registry/memory.rs

//! In-process coordination service with session semantics.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use tracing::debug;

use crate::errors::{DagflowError, Result};
use crate::registry::center::RegistryCenter;

type SessionId = u64;

#[derive(Debug, Clone)]
struct Node {
    value: String,
    owner: Option<SessionId>,
}

#[derive(Debug, Default)]
struct State {
    nodes: BTreeMap<String, Node>,
    /// Lock path -> (holder, hold count).
    locks: HashMap<String, (SessionId, usize)>,
    closed: HashSet<SessionId>,
    next_session: SessionId,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<State>,
    released: Condvar,
}

/// [`RegistryCenter`] kept in memory and shared between sessions.
///
/// Every value is one session; [`MemoryRegistry::new_session`] opens another
/// session on the same tree, which is how tests simulate several nodes.
#[derive(Debug)]
pub struct MemoryRegistry {
    shared: Arc<Shared>,
    session: SessionId,
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRegistry {
    pub fn new() -> Self {
        let shared = Arc::new(Shared::default());
        let session = {
            let mut state = lock_state(&shared);
            state.next_session += 1;
            state.next_session
        };
        Self { shared, session }
    }

    /// Open a new session against the same tree.
    pub fn new_session(&self) -> Self {
        let mut state = self.state();
        state.next_session += 1;
        Self {
            shared: Arc::clone(&self.shared),
            session: state.next_session,
        }
    }

    /// Simulate a session timeout: same effect as [`RegistryCenter::close`].
    pub fn expire_session(&self) {
        self.end_session();
    }

    fn state(&self) -> MutexGuard<'_, State> {
        lock_state(&self.shared)
    }

    fn live_state(&self) -> Result<MutexGuard<'_, State>> {
        let state = self.state();
        if state.closed.contains(&self.session) {
            return Err(DagflowError::Registry(format!(
                "session {} is closed",
                self.session
            )));
        }
        Ok(state)
    }

    fn end_session(&self) {
        let mut state = self.state();
        if !state.closed.insert(self.session) {
            return;
        }

        let session = self.session;
        let owned: Vec<String> = state
            .nodes
            .iter()
            .filter(|(_, node)| node.owner == Some(session))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &owned {
            remove_subtree(&mut state.nodes, key);
        }
        state.locks.retain(|_, (holder, _)| *holder != session);

        debug!(
            session,
            ephemeral_removed = owned.len(),
            "registry session ended"
        );
        drop(state);
        self.shared.released.notify_all();
    }

    fn put(&self, key: &str, value: &str, owner: Option<SessionId>) -> Result<()> {
        let key = normalize(key)?;
        let mut state = self.live_state()?;
        for parent in ancestors(&key) {
            state.nodes.entry(parent).or_insert_with(|| Node {
                value: String::new(),
                owner: None,
            });
        }
        state.nodes.insert(
            key,
            Node {
                value: value.to_string(),
                owner,
            },
        );
        Ok(())
    }
}

fn lock_state(shared: &Shared) -> MutexGuard<'_, State> {
    shared.state.lock().unwrap_or_else(|e| e.into_inner())
}

fn normalize(key: &str) -> Result<String> {
    if !key.starts_with('/') {
        return Err(DagflowError::Registry(format!(
            "registry key '{key}' must be absolute"
        )));
    }
    let trimmed = key.trim_end_matches('/');
    Ok(if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    })
}

/// Proper ancestors of `key`, excluding the root.
fn ancestors(key: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut end = 0;
    while let Some(pos) = key[end + 1..].find('/') {
        end += pos + 1;
        out.push(key[..end].to_string());
    }
    out
}

fn remove_subtree(nodes: &mut BTreeMap<String, Node>, key: &str) {
    let prefix = format!("{key}/");
    nodes.retain(|k, _| k != key && !k.starts_with(&prefix));
}

impl RegistryCenter for MemoryRegistry {
    fn is_existed(&self, key: &str) -> Result<bool> {
        let key = normalize(key)?;
        Ok(self.live_state()?.nodes.contains_key(&key))
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        let key = normalize(key)?;
        Ok(self
            .live_state()?
            .nodes
            .get(&key)
            .map(|node| node.value.clone()))
    }

    fn get_children_keys(&self, key: &str) -> Result<Vec<String>> {
        let key = normalize(key)?;
        let prefix = if key == "/" { key } else { format!("{key}/") };
        let state = self.live_state()?;

        let children: BTreeSet<String> = state
            .nodes
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .filter_map(|(k, _)| k[prefix.len()..].split('/').next())
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect();

        Ok(children.into_iter().collect())
    }

    fn persist(&self, key: &str, value: &str) -> Result<()> {
        self.put(key, value, None)
    }

    fn persist_ephemeral(&self, key: &str, value: &str) -> Result<()> {
        self.put(key, value, Some(self.session))
    }

    fn remove(&self, key: &str) -> Result<()> {
        let key = normalize(key)?;
        let mut state = self.live_state()?;
        remove_subtree(&mut state.nodes, &key);
        Ok(())
    }

    fn acquire_lock(&self, key: &str) -> Result<()> {
        let key = normalize(key)?;
        let mut state = self.live_state()?;

        loop {
            match state.locks.get_mut(&key) {
                None => {
                    state.locks.insert(key, (self.session, 1));
                    return Ok(());
                }
                Some((holder, count)) if *holder == self.session => {
                    *count += 1;
                    return Ok(());
                }
                Some(_) => {
                    state = self
                        .shared
                        .released
                        .wait(state)
                        .unwrap_or_else(|e| e.into_inner());
                    if state.closed.contains(&self.session) {
                        return Err(DagflowError::Registry(format!(
                            "session {} closed while waiting for lock {key}",
                            self.session
                        )));
                    }
                }
            }
        }
    }

    fn release_lock(&self, key: &str) -> Result<()> {
        let key = normalize(key)?;
        let mut state = self.state();

        match state.locks.get_mut(&key) {
            Some((holder, count)) if *holder == self.session => {
                *count -= 1;
                if *count == 0 {
                    state.locks.remove(&key);
                    drop(state);
                    self.shared.released.notify_all();
                }
                Ok(())
            }
            _ => Err(DagflowError::LockNotHeld(key)),
        }
    }

    fn close(&self) -> Result<()> {
        self.end_session();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn persist_creates_parents_and_lists_children() {
        let registry = MemoryRegistry::new();
        registry.persist("/ns/nodes/worker/default/h1:1", "x").unwrap();
        registry.persist("/ns/nodes/worker/default/h2:1", "y").unwrap();

        assert!(registry.is_existed("/ns/nodes/worker").unwrap());
        assert_eq!(
            registry.get_children_keys("/ns/nodes/worker/default").unwrap(),
            vec!["h1:1", "h2:1"]
        );
        assert_eq!(registry.get_children_keys("/ns/nodes").unwrap(), vec!["worker"]);
        assert!(registry.get_children_keys("/missing").unwrap().is_empty());
    }

    #[test]
    fn remove_drops_subtree_only() {
        let registry = MemoryRegistry::new();
        registry.persist("/a/b/c", "1").unwrap();
        registry.persist("/a/bb", "2").unwrap();
        registry.remove("/a/b").unwrap();

        assert!(!registry.is_existed("/a/b/c").unwrap());
        assert_eq!(registry.get("/a/bb").unwrap(), Some("2".to_string()));
        registry.remove("/never").unwrap();
    }

    #[test]
    fn closing_a_session_removes_its_ephemeral_nodes() {
        let first = MemoryRegistry::new();
        let second = first.new_session();
        first.persist_ephemeral("/nodes/master/a:1", "a").unwrap();
        second.persist_ephemeral("/nodes/master/b:1", "b").unwrap();

        first.expire_session();

        assert_eq!(second.get_children_keys("/nodes/master").unwrap(), vec!["b:1"]);
        assert!(first.get("/nodes/master/b:1").is_err());
    }

    #[test]
    fn locks_are_reentrant_and_exclusive() {
        let first = MemoryRegistry::new();
        let second = first.new_session();

        first.acquire_lock("/lock/x").unwrap();
        first.acquire_lock("/lock/x").unwrap();
        assert!(matches!(
            second.release_lock("/lock/x"),
            Err(DagflowError::LockNotHeld(_))
        ));

        let waiter = thread::spawn(move || {
            second.acquire_lock("/lock/x").unwrap();
            second.release_lock("/lock/x").unwrap();
        });

        thread::sleep(Duration::from_millis(50));
        assert!(!waiter.is_finished());
        first.release_lock("/lock/x").unwrap();
        first.release_lock("/lock/x").unwrap();
        waiter.join().unwrap();
    }

    #[test]
    fn closed_session_releases_locks() {
        let first = MemoryRegistry::new();
        let second = first.new_session();
        first.acquire_lock("/lock/y").unwrap();
        first.close().unwrap();

        second.acquire_lock("/lock/y").unwrap();
        second.release_lock("/lock/y").unwrap();
    }
}
