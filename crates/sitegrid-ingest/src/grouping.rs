//! Grouping the tasks of one batch into a single aggregate.
//!
//! Machines reported by several tasks are folded into one batch machine,
//! and every task's pass tree is relabelled into batch numbering and merged
//! into one tree. Event lists are kept per task, still in task-local
//! design-name numbering; they are rewritten against the site model's
//! design table when merged into the live lists.

use std::sync::Arc;

use sitegrid_core::SiteModelId;
use sitegrid_store::events::ProductionEventLists;
use sitegrid_store::machine::Machine;
use sitegrid_store::{MachineIndex, PassTree};

use crate::error::{IngestError, Result};
use crate::relabel::IndexMapping;
use crate::task::AggregationTask;

/// Events one task reported for one machine.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskEvents {
    /// Events in the task's design-name numbering.
    pub events: ProductionEventLists,
    /// The task's design names, indexed by task-local id.
    pub design_names: Arc<[String]>,
}

/// A machine of the batch, with every task's events for it.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchMachine {
    /// Identity and denormalized fields folded across tasks.
    pub machine: Machine,
    /// Event contributions in task order.
    pub events: Vec<TaskEvents>,
}

/// All tasks of a batch merged into one.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupedBatch {
    /// Target site model.
    pub site_model: SiteModelId,
    /// Number of tasks grouped.
    pub task_count: usize,
    /// Passes in batch machine numbering.
    pub pass_tree: PassTree,
    /// Machines, indexed by batch machine index.
    pub machines: Vec<BatchMachine>,
}

/// Merges the tasks of one batch.
///
/// # Errors
///
/// Returns [`IngestError::EmptyBatch`] for no tasks,
/// [`IngestError::MixedSiteModels`] if tasks target different site models,
/// and [`IngestError::InconsistentIndexMapping`] if a pass refers to a
/// machine its task does not list.
pub fn group_tasks(tasks: Vec<AggregationTask>) -> Result<GroupedBatch> {
    let Some(site_model) = tasks.first().map(|t| t.site_model) else {
        return Err(IngestError::EmptyBatch);
    };
    if let Some(other) = tasks.iter().find(|t| t.site_model != site_model) {
        return Err(IngestError::MixedSiteModels {
            expected: site_model,
            found: other.site_model,
        });
    }

    let task_count = tasks.len();
    let mut pass_tree = PassTree::new();
    let mut machines: Vec<BatchMachine> = Vec::new();

    for task in tasks {
        let AggregationTask {
            pass_tree: mut tree,
            machines: task_machines,
            design_names,
            ..
        } = task;
        let design_names: Arc<[String]> = design_names.into();

        let mut targets = Vec::with_capacity(task_machines.len());
        for entry in task_machines {
            let contribution = TaskEvents {
                events: entry.events,
                design_names: Arc::clone(&design_names),
            };
            let position = match machines
                .iter()
                .position(|m| m.machine.same_identity(&entry.machine))
            {
                Some(position) => {
                    let existing = &mut machines[position];
                    existing.machine.update_from(&entry.machine);
                    existing.events.push(contribution);
                    position
                }
                None => {
                    machines.push(BatchMachine {
                        machine: entry.machine,
                        events: vec![contribution],
                    });
                    machines.len() - 1
                }
            };
            targets.push(MachineIndex::try_from(position).ok());
        }

        IndexMapping::from_targets(targets)?.apply(&mut tree)?;
        pass_tree.absorb(tree);
    }

    for (position, batch_machine) in machines.iter_mut().enumerate() {
        batch_machine.machine.internal_index = MachineIndex::try_from(position)
            .map_err(|_| IngestError::index_mapping("batch machine index space exhausted", None))?;
    }

    tracing::debug!(
        site_model = %site_model,
        tasks = task_count,
        machines = machines.len(),
        leaves = pass_tree.leaf_count(),
        passes = pass_tree.pass_count(),
        "grouped batch"
    );

    Ok(GroupedBatch {
        site_model,
        task_count,
        pass_tree,
        machines,
    })
}
