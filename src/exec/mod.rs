// src/exec/mod.rs

//! Process execution layer.
//!
//! Runs a task as an OS process with `tokio::process::Command`:
//!
//! - [`context`] describes one task attempt (ids, paths, tenant, timeout).
//! - [`command`] owns the process: script file, elevation, output reader,
//!   timeout, kill cascade and cluster-job following.
//! - [`log_buffer`] batches output lines between the reader and the sink.
//! - [`sink`] provides the `LogSink` trait with file and tracing sinks.
//! - [`cluster`] detects cluster job ids and queries/kills those jobs.

pub mod cluster;
pub mod command;
pub mod context;
pub mod log_buffer;
pub mod sink;

pub use cluster::{ClusterJobClient, JobState, YarnCliClient, find_app_ids};
pub use command::{CommandExecuteResult, CommandExecutor, ExecutorState};
pub use context::TaskExecutionContext;
pub use log_buffer::LogBuffer;
pub use sink::{FileLogSink, LogSink, TracingLogSink};
