// src/registry/mod.rs

//! Node registry on top of a hierarchical coordination service.
//!
//! - [`center`] is the coordination-service trait.
//! - [`memory`] is an in-process implementation with sessions, ephemeral
//!   nodes and blocking named mutexes.
//! - [`client`] knows the path layout and exposes the typed operations.
//! - [`heartbeat`] builds, parses and periodically writes heartbeats.
//! - [`monitor`] tracks membership and triggers failover.

pub mod center;
pub mod client;
pub mod heartbeat;
pub mod memory;
pub mod monitor;

pub use center::RegistryCenter;
pub use client::{DeadServerOp, RegistryClient, RegistryLock};
pub use heartbeat::{HeartbeatWriter, ResInfo, Server, build_heartbeat, parse_heartbeat};
pub use memory::MemoryRegistry;
pub use monitor::{FailoverHandler, NodeEvent, NodeMonitor};
