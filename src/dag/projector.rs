// src/dag/projector.rs

//! Projection of a workflow definition onto a [`Dag`].

use tracing::debug;

use crate::dag::graph::Dag;
use crate::dag::workflow::{TaskNode, TaskNodeRelation, WorkflowDefinition};
use crate::errors::Result;

/// DAG of task names carrying the task node and relation metadata.
pub type WorkflowDag = Dag<String, TaskNode, TaskNodeRelation>;

/// Build the DAG of a workflow definition.
///
/// Every task becomes a node, then every `preTasks` relation becomes an edge.
/// Unknown pre-tasks and cycles are structural errors.
pub fn build_dag(definition: &WorkflowDefinition) -> Result<WorkflowDag> {
    let dag = WorkflowDag::new();

    for task in &definition.tasks {
        dag.add_node(task.name.clone(), task.clone());
    }

    for relation in definition.relations() {
        dag.add_edge(
            relation.start.clone(),
            relation.end.clone(),
            relation,
            false,
        )?;
    }

    debug!(
        nodes = dag.nodes_count(),
        edges = dag.edges_count(),
        "projected workflow definition onto DAG"
    );

    Ok(dag)
}

/// Task names in execution order, as shown on a Gantt chart.
pub fn gantt_order(definition: &WorkflowDefinition) -> Result<Vec<String>> {
    build_dag(definition)?.topological_sort()
}
