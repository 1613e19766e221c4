//! The SiteModel aggregate.
//!
//! Owns the live spatial store, the machine roster, per-machine event lists,
//! the existence map, the design-name table and denormalized metadata.
//!
//! ## Locking
//!
//! - Roster, existence map, design names and metadata share one coarse lock,
//!   held only for short critical sections.
//! - Each machine's event lists sit behind their own lock and are replaced
//!   wholesale (copy, merge, publish).
//! - Leaf tiles are published per slot by [`SpatialStore`].
//!
//! No lock is held across an `.await`.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard};
use sitegrid_core::storage_keys::{DocumentKey, EventListKey, SiteModelDocument};
use sitegrid_core::{SiteModelId, SiteModelStorage};

use crate::address::SubGridKey;
use crate::cell_pass::MachineIndex;
use crate::codec::{LeafDirectory, checksum, decode_segment};
use crate::design::DesignNameTable;
use crate::error::{Result, StoreError};
use crate::events::ProductionEventLists;
use crate::existence::ExistenceMap;
use crate::leaf::LeafSubGrid;
use crate::machine::MachineRoster;
use crate::metadata::SiteModelMetadata;
use crate::segment::Segment;
use crate::spatial::SpatialStore;

/// Non-spatial state guarded by the coarse site-model lock.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SiteModelState {
    /// Machines, indexed by internal index.
    pub roster: MachineRoster,
    /// Leaf tiles holding data.
    pub existence: ExistenceMap,
    /// Design names reported by machines.
    pub designs: DesignNameTable,
    /// Denormalized metadata.
    pub metadata: SiteModelMetadata,
}

type EventSlot = Arc<RwLock<Arc<ProductionEventLists>>>;

/// A live site model.
#[derive(Debug)]
pub struct SiteModel {
    id: SiteModelId,
    spatial: SpatialStore,
    state: RwLock<SiteModelState>,
    machine_events: RwLock<HashMap<MachineIndex, EventSlot>>,
}

impl SiteModel {
    /// Creates an empty site model.
    #[must_use]
    pub fn new(id: SiteModelId) -> Self {
        Self::with_state(id, SiteModelState::default())
    }

    /// Creates a site model around existing non-spatial state.
    #[must_use]
    pub fn with_state(id: SiteModelId, state: SiteModelState) -> Self {
        Self {
            id,
            spatial: SpatialStore::new(),
            state: RwLock::new(state),
            machine_events: RwLock::new(HashMap::new()),
        }
    }

    /// Site model id.
    #[must_use]
    pub const fn id(&self) -> SiteModelId {
        self.id
    }

    /// Cell size in metres.
    #[must_use]
    pub fn cell_size(&self) -> f64 {
        self.state.read().metadata.cell_size
    }

    /// The live spatial store.
    #[must_use]
    pub const fn spatial(&self) -> &SpatialStore {
        &self.spatial
    }

    /// Current snapshot of the leaf at `key`.
    #[must_use]
    pub fn leaf(&self, key: SubGridKey) -> Option<Arc<LeafSubGrid>> {
        self.spatial.get(key)
    }

    /// Read access to the non-spatial state.
    ///
    /// Release the guard before any `.await`.
    pub fn state(&self) -> RwLockReadGuard<'_, SiteModelState> {
        self.state.read()
    }

    /// Runs `f` under the coarse write lock.
    pub fn update_state<R>(&self, f: impl FnOnce(&mut SiteModelState) -> R) -> R {
        f(&mut self.state.write())
    }

    /// Copy of the machine roster.
    #[must_use]
    pub fn roster_snapshot(&self) -> MachineRoster {
        self.state.read().roster.clone()
    }

    /// Current event lists of machine `index`.
    #[must_use]
    pub fn machine_events(&self, index: MachineIndex) -> Option<Arc<ProductionEventLists>> {
        let slot = self.machine_events.read().get(&index).cloned()?;
        let lists = slot.read().clone();
        Some(lists)
    }

    /// Publishes new event lists for machine `index`.
    pub fn publish_machine_events(&self, index: MachineIndex, lists: Arc<ProductionEventLists>) {
        let existing = self.machine_events.read().get(&index).cloned();
        match existing {
            Some(slot) => *slot.write() = lists,
            None => {
                self.machine_events
                    .write()
                    .entry(index)
                    .and_modify(|slot| *slot.write() = Arc::clone(&lists))
                    .or_insert_with(|| Arc::new(RwLock::new(lists)));
            }
        }
    }

    /// Rebuilds a site model from the durable store.
    ///
    /// Segment bytes are verified against the checksums recorded in their
    /// directories. A leaf found on disk but missing from the existence map
    /// (an ingest stopped between directory and metadata commits) is added
    /// back to the map.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Inconsistent`] if a directory references an
    /// absent or corrupt segment, or a storage/codec error.
    pub async fn load(storage: &SiteModelStorage) -> Result<Self> {
        let id = storage.site_model_id();
        let metadata: SiteModelMetadata = storage
            .read_json(&DocumentKey::new(id, SiteModelDocument::Metadata))
            .await?
            .unwrap_or_default();
        let roster: MachineRoster = storage
            .read_json(&DocumentKey::new(id, SiteModelDocument::Machines))
            .await?
            .unwrap_or_default();
        let designs: DesignNameTable = storage
            .read_json(&DocumentKey::new(id, SiteModelDocument::Designs))
            .await?
            .unwrap_or_default();
        let mut existence: ExistenceMap = storage
            .read_json(&DocumentKey::new(id, SiteModelDocument::ExistenceMap))
            .await?
            .unwrap_or_default();

        let mut events = Vec::new();
        for machine in roster.iter() {
            let lists: Option<ProductionEventLists> = storage
                .read_json(&EventListKey::new(id, machine.uid))
                .await?;
            events.push((machine.internal_index, lists.unwrap_or_default()));
        }

        let mut leaves = Vec::new();
        for path in storage.list_directory_paths().await? {
            let bytes = storage.backend().get(&path).await?;
            let directory: LeafDirectory =
                serde_json::from_slice(&bytes).map_err(sitegrid_core::Error::from)?;
            leaves.push(load_leaf(storage, directory).await?);
        }

        for leaf in &leaves {
            if !existence.contains(leaf.key()) {
                tracing::warn!(
                    site_model = %id,
                    origin_x = leaf.key().origin_x,
                    origin_y = leaf.key().origin_y,
                    "leaf missing from existence map; restoring"
                );
                existence.set(leaf.key());
            }
        }

        let model = Self::with_state(
            id,
            SiteModelState {
                roster,
                existence,
                designs,
                metadata,
            },
        );
        for (index, lists) in events {
            model.publish_machine_events(index, Arc::new(lists));
        }
        let leaf_count = leaves.len();
        for leaf in leaves {
            model.spatial.publish(Arc::new(leaf));
        }

        tracing::info!(site_model = %id, leaves = leaf_count, "loaded site model");
        Ok(model)
    }
}

async fn load_leaf(storage: &SiteModelStorage, directory: LeafDirectory) -> Result<LeafSubGrid> {
    let origin = directory.origin;
    let mut segments = Vec::with_capacity(directory.segments.len());
    for info in &directory.segments {
        let bytes = match storage.get(&info.key).await {
            Ok(bytes) => bytes,
            Err(e) if e.is_not_found() => {
                tracing::error!(
                    origin_x = origin.origin_x,
                    origin_y = origin.origin_y,
                    segment = %info.key,
                    "directory references absent segment"
                );
                return Err(StoreError::inconsistent(format!(
                    "directory of ({}, {}) references absent segment {}",
                    origin.origin_x, origin.origin_y, info.key
                )));
            }
            Err(e) => return Err(e.into()),
        };
        if checksum(&bytes) != info.checksum {
            return Err(StoreError::inconsistent(format!(
                "checksum mismatch for segment {}",
                info.key
            )));
        }
        let decoded = decode_segment(&bytes)?;
        if decoded.origin != origin
            || decoded.start_micros != info.start_micros
            || decoded.end_micros != info.end_micros
        {
            return Err(StoreError::inconsistent(format!(
                "segment {} does not match its directory entry",
                info.key
            )));
        }
        segments.push(Segment::from_persisted(decoded.cells, info.clone()));
    }
    LeafSubGrid::from_persisted(directory, segments)
}
