// src/lib.rs

pub mod cli;
pub mod config;
pub mod context;
pub mod dag;
pub mod dependent;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod registry;
pub mod task;
pub mod types;

use std::fs;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::load_or_default;
use crate::context::ServerContext;
use crate::dag::{WorkflowDefinition, gantt_order};
use crate::dependent::MemoryProcessStore;
use crate::engine::{WorkflowReport, WorkflowRunner};
use crate::exec::YarnCliClient;
use crate::registry::{HeartbeatWriter, MemoryRegistry, RegistryClient};
use crate::task::TaskEnvironment;
use crate::types::NodeType;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config and workflow loading
/// - worker registration and heartbeat
/// - the workflow runner
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let mut cfg = load_or_default(args.config.as_deref())?;
    if let Some(tenant) = args.tenant.clone() {
        cfg.worker.tenant = tenant;
    }

    let text = fs::read_to_string(&args.workflow)
        .with_context(|| format!("reading workflow {}", args.workflow.display()))?;
    let definition = WorkflowDefinition::from_json(&text)?;

    if args.dry_run {
        print_dry_run(&definition)?;
        return Ok(());
    }

    let center = Arc::new(MemoryRegistry::new());
    let registry = Arc::new(RegistryClient::new(center, cfg.registry.namespace.clone()));
    registry.init_system_node()?;
    let ctx = ServerContext::new(Arc::clone(&registry));

    let address = cfg.worker.address();
    let group = cfg.registry.worker_group.clone();
    let node_path = registry.node_path(NodeType::Worker, Some(&group), &address);
    let heartbeat = HeartbeatWriter::new(
        Arc::clone(&registry),
        node_path,
        cfg.worker.host.clone(),
        cfg.worker.port,
    );
    registry.register(NodeType::Worker, Some(&group), &address, &heartbeat.payload())?;
    let heartbeat_handle = heartbeat.spawn(cfg.registry.heartbeat_interval, ctx.stopper.clone());

    // Ctrl-C → stop the run; the runner cancels running tasks.
    {
        let stopper = ctx.stopper.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl+C");
                return;
            }
            info!("Ctrl+C received; stopping");
            stopper.stop();
        });
    }

    let store = Arc::new(MemoryProcessStore::new());
    let env = TaskEnvironment {
        executor: cfg.executor,
        dependent: cfg.dependent,
        use_sudo: cfg.worker.use_sudo,
        jobs: Arc::new(YarnCliClient::default()),
        store: store.clone(),
        stopper: ctx.stopper.clone(),
    };
    let runner = WorkflowRunner::new(definition, args.definition_id, store, env, cfg.worker.clone());
    let report = runner.run().await;

    ctx.shutdown();
    if let Err(e) = heartbeat_handle.await {
        warn!(error = %e, "heartbeat task ended abnormally");
    }

    let report = report?;
    print_report(&report);
    if !report.is_success() {
        bail!(
            "workflow run {} finished in state {:?}",
            report.process_instance_id,
            report.state
        );
    }
    Ok(())
}

/// Print the execution order and task kinds without running anything.
fn print_dry_run(definition: &WorkflowDefinition) -> Result<()> {
    let order = gantt_order(definition)?;

    println!("dagflow dry-run");
    if let Some(timeout) = definition.timeout {
        println!("  workflow timeout = {timeout}s");
    }
    println!();

    println!("tasks ({}):", order.len());
    for name in &order {
        let Some(node) = definition.task(name) else {
            continue;
        };
        println!("  - {name} [{:?}]", node.kind);
        if !node.pre_tasks.is_empty() {
            println!("      after: {:?}", node.pre_tasks);
        }
        if node.is_forbidden() {
            println!("      run_flag: FORBIDDEN");
        }
        if let Some(timeout) = node.timeout {
            println!("      timeout: {timeout}s");
        }
        node.task_params()?;
    }

    debug!("dry-run complete (no execution)");
    Ok(())
}

fn print_report(report: &WorkflowReport) {
    println!(
        "workflow run {} finished: {:?}",
        report.process_instance_id, report.state
    );
    for (name, outcome) in &report.tasks {
        println!("  - {name}: {outcome:?}");
    }
}
