//! Create-or-update of batch machines against the site-model roster.

use sitegrid_store::MachineIndex;
use sitegrid_store::machine::MachineRoster;

use crate::error::Result;
use crate::grouping::GroupedBatch;
use crate::relabel::IndexMapping;

/// Staged roster and the batch-to-site index mapping.
#[derive(Debug, Clone, PartialEq)]
pub struct MachineResolution {
    /// Roster with every batch machine present.
    pub roster: MachineRoster,
    /// Batch machine index to site-model machine index.
    pub mapping: IndexMapping,
    /// Machines created.
    pub created: usize,
    /// True if a machine was created or any denormalized field changed.
    pub machines_changed: bool,
}

/// Resolves every batch machine against `roster`.
///
/// Known machines have their denormalized fields folded in; unknown ones
/// are created with the next free index.
///
/// # Errors
///
/// Returns an error if the roster index space is exhausted.
pub fn resolve_machines(
    mut roster: MachineRoster,
    batch: &GroupedBatch,
) -> Result<MachineResolution> {
    let mut targets: Vec<Option<MachineIndex>> = Vec::with_capacity(batch.machines.len());
    let mut created = 0;
    let mut machines_changed = false;

    for batch_machine in &batch.machines {
        let incoming = &batch_machine.machine;
        let known = roster.locate(incoming).map(|m| m.internal_index);
        let index = match known {
            Some(index) => {
                if let Some(live) = roster.get_mut(index) {
                    machines_changed |= live.update_from(incoming);
                }
                index
            }
            None => {
                let index = roster.create(incoming.clone())?.internal_index;
                tracing::info!(
                    machine = %incoming.uid,
                    name = %incoming.name,
                    index,
                    "created machine"
                );
                created += 1;
                machines_changed = true;
                index
            }
        };
        targets.push(Some(index));
    }

    Ok(MachineResolution {
        roster,
        mapping: IndexMapping::from_targets(targets)?,
        created,
        machines_changed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grouping::group_tasks;
    use crate::task::AggregationTask;
    use sitegrid_core::{MachineUid, SiteModelId};
    use sitegrid_store::machine::{Machine, MachineType};

    fn roster_of(n: usize) -> MachineRoster {
        let mut roster = MachineRoster::new();
        for i in 0..n {
            let name = format!("m{i}");
            let dozer = Machine::new(MachineUid::generate(), name, MachineType::Dozer, false);
            roster.create(dozer).unwrap();
        }
        roster
    }

    #[test]
    fn test_new_machine_maps_past_existing_roster() {
        let mut task = AggregationTask::new(SiteModelId::generate());
        task.add_machine(Machine::new(MachineUid::generate(), "new", MachineType::Excavator, false))
            .unwrap();
        let batch = group_tasks(vec![task]).unwrap();

        let resolution = resolve_machines(roster_of(3), &batch).unwrap();
        assert_eq!(resolution.mapping.get(0), Some(3));
        assert_eq!(resolution.created, 1);
        assert!(resolution.machines_changed);
        assert_eq!(resolution.roster.len(), 4);
    }

    #[test]
    fn test_known_machine_reuses_index() {
        let roster = roster_of(2);
        let known = roster.get(1).unwrap().clone();
        let mut task = AggregationTask::new(SiteModelId::generate());
        task.add_machine(known).unwrap();
        let batch = group_tasks(vec![task]).unwrap();

        let resolution = resolve_machines(roster, &batch).unwrap();
        assert_eq!(resolution.mapping.get(0), Some(1));
        assert_eq!(resolution.created, 0);
        assert!(!resolution.machines_changed);
    }
}
