// src/context.rs

//! Process-wide state passed explicitly to every component.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::info;

use crate::registry::RegistryClient;

/// Process-wide "keep running" flag.
///
/// Clones share the flag. Polling loops check [`Stopper::is_running`] or
/// await [`Stopper::stopped`].
#[derive(Debug, Clone, Default)]
pub struct Stopper {
    token: CancellationToken,
}

impl Stopper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        !self.token.is_cancelled()
    }

    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn stopped(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    /// Token cancelled together with this stopper, for per-task use.
    pub fn child_token(&self) -> CancellationToken {
        self.token.child_token()
    }
}

/// Shared registry connection plus the stopper of this node.
#[derive(Debug, Clone)]
pub struct ServerContext {
    pub registry: Arc<RegistryClient>,
    pub stopper: Stopper,
    closed: Arc<AtomicBool>,
}

impl ServerContext {
    pub fn new(registry: Arc<RegistryClient>) -> Self {
        Self {
            registry,
            stopper: Stopper::new(),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Stop every loop and close the registry session. Later calls are
    /// no-ops, also when the stopper was already stopped elsewhere.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("shutting down server context");
        self.stopper.stop();
        self.registry.close();
    }
}
