//! Merging machine event lists into the live site model.
//!
//! Nothing here touches the live model: merged lists and the design-name
//! table are staged copies, published only after every commit succeeded.

use std::collections::HashMap;

use sitegrid_core::{SiteModelId, WriteBatch, json_bytes};
use sitegrid_core::storage_keys::{DocumentKey, EventListKey, SiteModelDocument};
use sitegrid_store::design::{DesignNameId, DesignNameTable};
use sitegrid_store::events::ProductionEventLists;
use sitegrid_store::machine::MachineRoster;
use sitegrid_store::{MachineIndex, SiteModel};

use crate::error::{IngestError, Result};
use crate::grouping::{GroupedBatch, TaskEvents};

/// Event lists merged for every machine of a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedEvents {
    /// Merged lists, indexed by batch machine index. `None` when the machine
    /// reported no events.
    pub lists: Vec<Option<ProductionEventLists>>,
    /// Staged design-name table.
    pub designs: DesignNameTable,
    /// True if some target-value list received events.
    pub targets_changed: bool,
    /// True if the design-name table grew.
    pub designs_changed: bool,
}

/// Merges every machine's event contributions onto its live lists.
///
/// Machines absent from `roster` start from empty lists. Design-name ids are
/// rewritten from task numbering to site-model ids, adding names to the
/// staged table as needed.
///
/// # Errors
///
/// Returns [`IngestError::UnknownDesignName`] if an event refers to a design
/// name its task does not list.
pub fn merge_events(
    model: &SiteModel,
    roster: &MachineRoster,
    batch: &GroupedBatch,
) -> Result<MergedEvents> {
    let mut designs = model.state().designs.clone();
    let mut designs_changed = false;
    let mut targets_changed = false;
    let mut lists = Vec::with_capacity(batch.machines.len());

    for batch_machine in &batch.machines {
        if batch_machine.events.iter().all(|c| c.events.is_empty()) {
            lists.push(None);
            continue;
        }
        let mut merged = roster
            .locate(&batch_machine.machine)
            .and_then(|live| model.machine_events(live.internal_index))
            .map(|live| (*live).clone())
            .unwrap_or_default();

        for contribution in &batch_machine.events {
            let (incoming, added) = to_site_designs(contribution, &mut designs)?;
            designs_changed |= added;
            targets_changed |= merged.merge_from(&incoming);
        }
        lists.push(Some(merged));
    }

    Ok(MergedEvents {
        lists,
        designs,
        targets_changed,
        designs_changed,
    })
}

fn to_site_designs(
    contribution: &TaskEvents,
    designs: &mut DesignNameTable,
) -> Result<(ProductionEventLists, bool)> {
    let mut site_ids: HashMap<DesignNameId, DesignNameId> = HashMap::new();
    let mut added = false;
    for event in contribution.events.design_name.events() {
        if site_ids.contains_key(&event.value) {
            continue;
        }
        let name = usize::try_from(event.value)
            .ok()
            .and_then(|i| contribution.design_names.get(i))
            .ok_or(IngestError::UnknownDesignName { id: event.value })?;
        let (site_id, inserted) = designs.get_or_insert(name);
        added |= inserted;
        site_ids.insert(event.value, site_id);
    }

    let mut incoming = contribution.events.clone();
    incoming.design_name = contribution
        .events
        .design_name
        .map_values(|local| site_ids.get(local).copied().unwrap_or(*local));
    Ok((incoming, added))
}

/// Builds the write batch persisting merged event lists.
///
/// `site_indices` maps batch machine indices to site-model indices; the
/// design-name table is written only when it changed.
///
/// # Errors
///
/// Returns an error if a machine is missing from `roster` or a document
/// cannot be serialized.
pub fn event_writes(
    site_model: SiteModelId,
    merged: &MergedEvents,
    site_indices: &[MachineIndex],
    roster: &MachineRoster,
) -> Result<WriteBatch> {
    let mut batch = WriteBatch::new();
    for (lists, index) in merged.lists.iter().zip(site_indices) {
        let Some(lists) = lists else {
            continue;
        };
        let machine = roster.require(*index)?;
        batch.put(
            EventListKey::new(site_model, machine.uid).to_string(),
            json_bytes(lists)?,
        );
    }
    if merged.designs_changed {
        batch.put(
            DocumentKey::new(site_model, SiteModelDocument::Designs).to_string(),
            json_bytes(&merged.designs)?,
        );
    }
    Ok(batch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grouping::group_tasks;
    use crate::task::AggregationTask;
    use chrono::{DateTime, TimeZone, Utc};
    use sitegrid_core::MachineUid;
    use sitegrid_store::machine::{Machine, MachineType};
    use std::sync::Arc;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_design_ids_are_rewritten_to_site_table() {
        let model = SiteModel::new(SiteModelId::generate());
        model.update_state(|s| {
            s.designs.get_or_insert("existing");
        });

        let mut task = AggregationTask::new(model.id());
        let m = task
            .add_machine(Machine::new(MachineUid::generate(), "grader", MachineType::Grader, false))
            .unwrap();
        let subgrade = task.design_name("subgrade");
        let existing = task.design_name("existing");
        let events = task.events_mut(m).unwrap();
        events.design_name.put(at(0), subgrade);
        events.design_name.put(at(10), existing);

        let batch = group_tasks(vec![task]).unwrap();
        let merged = merge_events(&model, &model.roster_snapshot(), &batch).unwrap();

        assert!(merged.designs_changed);
        assert!(!merged.targets_changed);
        let lists = merged.lists[0].as_ref().unwrap();
        let site_subgrade = merged.designs.id_of("subgrade").unwrap();
        assert_eq!(lists.design_name.value_at(at(5)), Some(&site_subgrade));
        assert_eq!(lists.design_name.value_at(at(11)), Some(&0));
        assert!(model.state().designs.id_of("subgrade").is_none());
    }

    #[test]
    fn test_merge_starts_from_live_lists() {
        let model = SiteModel::new(SiteModelId::generate());
        let uid = MachineUid::generate();
        let index = model.update_state(|s| {
            s.roster
                .create(Machine::new(uid, "roller", MachineType::SoilCompactor, false))
                .unwrap()
                .internal_index
        });
        let mut live = ProductionEventLists::default();
        live.target_ccv.put(at(0), 50);
        model.publish_machine_events(index, Arc::new(live));

        let mut task = AggregationTask::new(model.id());
        let m = task
            .add_machine(Machine::new(uid, "roller", MachineType::SoilCompactor, false))
            .unwrap();
        task.events_mut(m).unwrap().target_ccv.put(at(60), 70);

        let batch = group_tasks(vec![task]).unwrap();
        let merged = merge_events(&model, &model.roster_snapshot(), &batch).unwrap();

        assert!(merged.targets_changed);
        let lists = merged.lists[0].as_ref().unwrap();
        assert_eq!(lists.target_ccv.len(), 2);
        assert_eq!(model.machine_events(index).unwrap().target_ccv.len(), 1);
    }

    #[test]
    fn test_unknown_design_id_is_rejected() {
        let model = SiteModel::new(SiteModelId::generate());
        let mut task = AggregationTask::new(model.id());
        let m = task
            .add_machine(Machine::new(MachineUid::generate(), "dozer", MachineType::Dozer, false))
            .unwrap();
        task.events_mut(m).unwrap().design_name.put(at(0), 3);

        let batch = group_tasks(vec![task]).unwrap();
        let err = merge_events(&model, &model.roster_snapshot(), &batch).unwrap_err();
        assert!(matches!(err, IngestError::UnknownDesignName { id: 3 }));
    }
}
