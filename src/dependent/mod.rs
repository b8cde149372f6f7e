// src/dependent/mod.rs

//! Dependency evaluation for `DEPENDENT` tasks.
//!
//! - [`model`] holds the stored configuration (items, groups, relations).
//! - [`date_window`] resolves date expressions into `[start, end)` windows.
//! - [`store`] is the process-instance query collaborator plus an in-memory
//!   implementation.
//! - [`execute`] evaluates one group and combines verdicts with AND/OR.

pub mod date_window;
pub mod execute;
pub mod model;
pub mod store;

pub use date_window::{DateInterval, DateValue};
pub use execute::{DependentExecute, depend_result_for_relation};
pub use model::{ALL_TASKS, DependentItem, DependentParameters, DependentTaskModel};
pub use store::{MemoryProcessStore, ProcessInstance, ProcessInstanceStore, TaskInstance};
