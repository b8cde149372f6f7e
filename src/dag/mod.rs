// src/dag/mod.rs

//! DAG representation and workflow projection.
//!
//! - [`graph`] holds the generic thread-safe directed acyclic graph.
//! - [`workflow`] defines the stored workflow definition (task nodes and
//!   their `preTasks` relations).
//! - [`projector`] turns a workflow definition into a [`Dag`] and derives
//!   the Gantt ordering from it.

pub mod graph;
pub mod projector;
pub mod workflow;

pub use graph::Dag;
pub use projector::{WorkflowDag, build_dag, gantt_order};
pub use workflow::{RunFlag, TaskNode, TaskNodeRelation, WorkflowDefinition};
