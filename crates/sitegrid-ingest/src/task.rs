//! Aggregation tasks: decoded machine data awaiting integration.
//!
//! A task is produced upstream from one decoded TAG file. Its pass tree,
//! machines and event lists use task-local numbering: machine indices are
//! positions in [`AggregationTask::machines`] and design-name ids are
//! positions in [`AggregationTask::design_names`].

use sitegrid_core::SiteModelId;
use sitegrid_store::design::DesignNameId;
use sitegrid_store::events::ProductionEventLists;
use sitegrid_store::machine::Machine;
use sitegrid_store::{CellAddress, CellPass, MachineIndex, PassTree};

use crate::error::{IngestError, Result};

/// One machine of a task with the events it reported.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskMachine {
    /// Machine identity and denormalized fields.
    pub machine: Machine,
    /// Events in task-local design-name numbering.
    pub events: ProductionEventLists,
}

/// A decoded TAG file destined for one site model.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregationTask {
    /// Target site model.
    pub site_model: SiteModelId,
    /// Cell passes in task-local machine numbering.
    pub pass_tree: PassTree,
    /// Machines, indexed by task-local machine index.
    pub machines: Vec<TaskMachine>,
    /// Design names, indexed by task-local design-name id.
    pub design_names: Vec<String>,
}

impl AggregationTask {
    /// Creates an empty task for `site_model`.
    #[must_use]
    pub fn new(site_model: SiteModelId) -> Self {
        Self {
            site_model,
            pass_tree: PassTree::new(),
            machines: Vec::new(),
            design_names: Vec::new(),
        }
    }

    /// Adds a machine and returns its task-local index.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::InconsistentIndexMapping`] once the task-local
    /// index space is exhausted.
    pub fn add_machine(&mut self, mut machine: Machine) -> Result<MachineIndex> {
        let index = MachineIndex::try_from(self.machines.len())
            .map_err(|_| IngestError::index_mapping("task machine index space exhausted", None))?;
        machine.internal_index = index;
        self.machines.push(TaskMachine {
            machine,
            events: ProductionEventLists::default(),
        });
        Ok(index)
    }

    /// Events of the machine at task-local `index`.
    pub fn events_mut(&mut self, index: MachineIndex) -> Option<&mut ProductionEventLists> {
        self.machines
            .get_mut(usize::from(index))
            .map(|m| &mut m.events)
    }

    /// Returns the task-local id of `name`, adding it if new.
    pub fn design_name(&mut self, name: &str) -> DesignNameId {
        let position = match self.design_names.iter().position(|n| n == name) {
            Some(position) => position,
            None => {
                self.design_names.push(name.to_string());
                self.design_names.len() - 1
            }
        };
        DesignNameId::try_from(position).unwrap_or(DesignNameId::MAX)
    }

    /// Adds a pass at `cell`; the pass carries its task-local machine index.
    pub fn add_pass(&mut self, cell: CellAddress, pass: CellPass) {
        self.pass_tree.add_pass(cell, pass);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sitegrid_core::MachineUid;
    use sitegrid_store::machine::MachineType;

    #[test]
    fn test_local_numbering_is_positional() {
        let mut task = AggregationTask::new(SiteModelId::generate());
        let dozer = Machine::new(MachineUid::generate(), "a", MachineType::Dozer, false);
        let grader = Machine::new(MachineUid::generate(), "b", MachineType::Grader, false);
        let a = task.add_machine(dozer).unwrap();
        let b = task.add_machine(grader).unwrap();
        assert_eq!((a, b), (0, 1));
        assert_eq!(task.machines[1].machine.internal_index, 1);

        assert_eq!(task.design_name("base"), 0);
        assert_eq!(task.design_name("subgrade"), 1);
        assert_eq!(task.design_name("base"), 0);
        assert!(task.events_mut(2).is_none());
    }
}
