//! Per-tile retrieval.
//!
//! A retriever is built once per request. It resolves the filter against the
//! machine roster and takes snapshots of the machine event lists, then fills
//! any number of output tiles. Each call only reads published leaf snapshots,
//! so retrievals run concurrently with each other and with ingestion.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;

use sitegrid_core::observability::retrieval_span;
use sitegrid_store::design::{DesignElevationLookup, DesignLookupError, DesignRef, HeightGrid};
use sitegrid_store::event_snapshot::{EventPopulationControl, EventSnapshot};
use sitegrid_store::events::ProductionEventLists;
use sitegrid_store::latest::{LatestCell, LatestValue};
use sitegrid_store::{
    CellPass, LeafSubGrid, MachineIndex, PassType, SiteModel, SubGridBitmask, SubGridKey,
};

use super::client_tile::{
    CellProfileValue, CellValue, ClientLeafSubGrid, CompositeHeights, PassSource, TimedHeight,
};
use super::cut_fill::apply_design;
use super::lift::{CellLayers, LiftParams, analyzer_enabled};
use super::request::RetrievalRequest;
use crate::data_type::GridDataType;
use crate::error::{Result, RetrievalError};
use crate::filter::pass_count::{PassCountBuffer, full_pass_count};
use crate::filter::{ElevationRange, ElevationType, FilteredPassData, PreparedFilter};

/// Outcome of a successful retrieval call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalStatus {
    /// The tile was filled.
    NoError,
    /// No leaf exists at the tile origin; the tile is left empty.
    SubGridNotFound,
}

struct Resolved {
    value: CellValue,
    source: PassSource,
    from_last_pass: bool,
}

/// Accepted passes of one cell and the choice made among them.
struct Selection {
    passes: Vec<FilteredPassData>,
    considered: (usize, usize),
    selected: usize,
    counted: Option<u16>,
    layers: Option<CellLayers>,
}

/// Fills output tiles from one site model.
pub struct SubGridRetriever<'a> {
    model: &'a SiteModel,
    request: RetrievalRequest,
    filter: PreparedFilter,
    events: HashMap<MachineIndex, Arc<ProductionEventLists>>,
    control: EventPopulationControl,
    designs: Option<&'a dyn DesignElevationLookup>,
    lift: Option<LiftParams>,
    shortcut: bool,
}

impl std::fmt::Debug for SubGridRetriever<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubGridRetriever")
            .field("site_model", &self.model.id())
            .field("data_type", &self.request.data_type)
            .field("shortcut", &self.shortcut)
            .field("lift", &self.lift)
            .finish_non_exhaustive()
    }
}

impl<'a> SubGridRetriever<'a> {
    /// Prepares a retriever for `request` against `model`.
    ///
    /// `designs` is consulted for design-based elevation ranges and cut/fill
    /// tiles.
    #[must_use]
    pub fn new(
        model: &'a SiteModel,
        request: RetrievalRequest,
        designs: Option<&'a dyn DesignElevationLookup>,
    ) -> Self {
        let roster = model.roster_snapshot();
        let mut filter = request
            .filter
            .prepare(&roster)
            .with_temperature_by_last_pass(request.temperature_by_last_pass);
        if matches!(request.filter.elevation_range(), Some(ElevationRange::Level { .. })) {
            filter.init_elevation_range(None);
        }

        let lift = analyzer_enabled(request.data_type, &request.filter, request.lift.as_ref())
            .then(|| request.lift.unwrap_or_default());
        let mut control = filter.event_population();
        if lift.is_some_and(|l| l.detection.by_layer_id()) {
            control.layer_id = true;
        }

        let events = roster
            .iter()
            .filter_map(|m| {
                model
                    .machine_events(m.internal_index)
                    .map(|lists| (m.internal_index, lists))
            })
            .collect();

        let shortcut = lift.is_none()
            && request.filter.supports_last_value_shortcut()
            && request.data_type.shortcut_eligible();

        Self {
            model,
            request,
            filter,
            events,
            control,
            designs,
            lift,
            shortcut,
        }
    }

    /// True if the latest-value cache may answer cells.
    #[must_use]
    pub const fn uses_last_value_shortcut(&self) -> bool {
        self.shortcut
    }

    /// Forces every cell through a full stack scan.
    #[must_use]
    pub const fn without_shortcut(mut self) -> Self {
        self.shortcut = false;
        self
    }

    /// Fills `tile` from the leaf at its origin.
    ///
    /// `cell_override` further restricts the cells scanned.
    ///
    /// # Errors
    ///
    /// Fails if the tile type is incompatible with the configured type, if a
    /// design lookup fails, or if the leaf lacks cell storage.
    pub fn retrieve(
        &self,
        tile: &mut ClientLeafSubGrid,
        cell_override: Option<&SubGridBitmask>,
    ) -> Result<RetrievalStatus> {
        let origin = tile.origin();
        let data_type = tile.data_type();
        let _span = retrieval_span(
            self.model.id(),
            origin.origin_x,
            origin.origin_y,
            data_type.as_str(),
        )
        .entered();

        if !data_type.is_compatible_with(self.request.data_type) {
            return Err(RetrievalError::IncompatibleDataType {
                requested: data_type,
                configured: self.request.data_type,
            });
        }
        tile.clear();

        let Some(leaf) = self.model.leaf(origin) else {
            return Ok(RetrievalStatus::SubGridNotFound);
        };
        if !leaf.is_allocated() {
            tracing::error!(
                site_model = %self.model.id(),
                origin_x = origin.origin_x,
                origin_y = origin.origin_y,
                "leaf tile has no allocated cell storage"
            );
            return Err(RetrievalError::MissingCellStorage { origin });
        }

        let filter = self.tile_filter(origin)?;
        let mask = self.scan_mask(&leaf, origin, cell_override);
        let mut buffer = PassCountBuffer::new(self.request.max_passes_to_examine);

        for (x, y) in mask.iter_set() {
            let resolved = if self.shortcut {
                match self.from_latest(data_type, leaf.latest_cell(x, y), &filter) {
                    Some(resolved) => Some(resolved),
                    None => self.scan_cell(data_type, &leaf, &filter, x, y, &mut buffer)?,
                }
            } else {
                self.scan_cell(data_type, &leaf, &filter, x, y, &mut buffer)?
            };
            if let Some(r) = resolved {
                tile.set(x, y, r.value, r.source, r.from_last_pass);
            }
        }

        if data_type == GridDataType::CutFill {
            let design = self.request.cut_fill_design.ok_or(RetrievalError::DesignLookupFailed {
                origin,
                status: DesignLookupError::DesignDoesNotExist,
            })?;
            let grid = self.design_heights(&design, origin)?;
            apply_design(tile, &grid);
        }

        tracing::debug!(
            populated = tile.populated().count(),
            scanned = mask.count(),
            "tile retrieved"
        );
        Ok(RetrievalStatus::NoError)
    }

    fn scan_mask(
        &self,
        leaf: &LeafSubGrid,
        origin: SubGridKey,
        cell_override: Option<&SubGridBitmask>,
    ) -> SubGridBitmask {
        let mut mask = leaf
            .attribute_existence(self.request.data_type.pass_attribute())
            .and(&self.request.sieve.mask(origin));
        for extra in [
            self.request.spatial_restriction.as_ref(),
            self.request.production_mask.as_ref(),
            cell_override,
        ]
        .into_iter()
        .flatten()
        {
            mask = mask.and(extra);
        }
        mask
    }

    fn tile_filter(&self, origin: SubGridKey) -> Result<Cow<'_, PreparedFilter>> {
        let Some(design) = self.filter.elevation_range_design() else {
            return Ok(Cow::Borrowed(&self.filter));
        };
        let grid = self.design_heights(design, origin)?;
        let mut filter = self.filter.clone();
        filter.init_elevation_range(Some(&grid));
        Ok(Cow::Owned(filter))
    }

    fn design_heights(&self, design: &DesignRef, origin: SubGridKey) -> Result<HeightGrid> {
        let Some(lookup) = self.designs else {
            return Err(RetrievalError::DesignLookupFailed {
                origin,
                status: DesignLookupError::Failed("no design lookup configured".to_string()),
            });
        };
        match lookup.design_heights(
            self.model.id(),
            design,
            design.offset,
            origin,
            self.model.cell_size(),
        ) {
            Ok(grid) => Ok(grid),
            Err(DesignLookupError::NoElevationsInRequestedPatch) => Ok(HeightGrid::empty(origin)),
            Err(status) => {
                tracing::warn!(
                    site_model = %self.model.id(),
                    origin_x = origin.origin_x,
                    origin_y = origin.origin_y,
                    design = %design.design,
                    error = %status,
                    "design elevation lookup failed"
                );
                Err(RetrievalError::DesignLookupFailed { origin, status })
            }
        }
    }

    fn snapshot(&self, pass: &CellPass, control: EventPopulationControl) -> EventSnapshot {
        if !control.any() {
            return EventSnapshot::default();
        }
        self.events
            .get(&pass.internal_machine_index)
            .map_or_else(EventSnapshot::default, |lists| {
                EventSnapshot::populate(lists, pass.time, control)
            })
    }

    fn targets(&self, data_type: GridDataType, pass: &CellPass) -> EventSnapshot {
        if !data_type.needs_targets() {
            return EventSnapshot::default();
        }
        self.snapshot(
            pass,
            EventPopulationControl {
                targets: true,
                ..EventPopulationControl::default()
            },
        )
    }

    fn summary_allowed(&self, data_type: GridDataType, layered: bool) -> bool {
        if !data_type.is_compaction_summary() || data_type == GridDataType::Cca {
            return true;
        }
        self.request.lift.is_none_or(|l| !l.top_layer_only) || layered
    }

    fn from_latest(
        &self,
        data_type: GridDataType,
        cell: &LatestCell,
        filter: &PreparedFilter,
    ) -> Option<Resolved> {
        fn source<T>(v: &LatestValue<T>) -> (PassSource, PassType) {
            (
                PassSource {
                    time: v.time,
                    machine_index: v.machine_index,
                },
                v.pass_type,
            )
        }

        let (value, (src, pass_type)) = match data_type {
            GridDataType::Height | GridDataType::CutFill => {
                cell.height.map(|v| (CellValue::Height(v.value), source(&v)))
            }
            GridDataType::HeightAndTime => cell.height.map(|v| {
                let value = CellValue::HeightAndTime(TimedHeight {
                    height: v.value,
                    time: v.time,
                });
                (value, source(&v))
            }),
            GridDataType::Ccv | GridDataType::Mdp | GridDataType::Cca => {
                return self.latest_compaction(data_type, cell, filter);
            }
            GridDataType::Frequency => {
                cell.frequency.map(|v| (CellValue::Frequency(v.value), source(&v)))
            }
            GridDataType::Amplitude => {
                cell.amplitude.map(|v| (CellValue::Amplitude(v.value), source(&v)))
            }
            GridDataType::GpsMode => {
                cell.gps_mode.map(|v| (CellValue::GpsMode(v.value), source(&v)))
            }
            _ => None,
        }?;

        if !filter.filter_last_value(src.machine_index, pass_type) {
            return None;
        }
        Some(Resolved {
            value,
            source: src,
            from_last_pass: cell.came_from_last_pass(data_type.pass_attribute()),
        })
    }

    fn latest_compaction(
        &self,
        data_type: GridDataType,
        cell: &LatestCell,
        filter: &PreparedFilter,
    ) -> Option<Resolved> {
        let (time, machine_index, pass_type) = match data_type {
            GridDataType::Ccv => cell.ccv.map(|v| (v.time, v.machine_index, v.pass_type)),
            GridDataType::Mdp => cell.mdp.map(|v| (v.time, v.machine_index, v.pass_type)),
            _ => cell.cca.map(|v| (v.time, v.machine_index, v.pass_type)),
        }?;
        if !filter.filter_last_value(machine_index, pass_type)
            || !self.summary_allowed(data_type, false)
        {
            return None;
        }
        let mut latest = CellPass::new(time, 0.0, machine_index);
        latest.ccv = cell.ccv.map(|v| v.value);
        latest.mdp = cell.mdp.map(|v| v.value);
        latest.cca = cell.cca.map(|v| v.value);
        let targets = self.targets(data_type, &latest);
        let value = compaction_value(data_type, &latest, &targets)?;
        Some(Resolved {
            value,
            source: PassSource {
                time,
                machine_index,
            },
            from_last_pass: cell.came_from_last_pass(data_type.pass_attribute()),
        })
    }

    fn scan_cell(
        &self,
        data_type: GridDataType,
        leaf: &LeafSubGrid,
        filter: &PreparedFilter,
        x: u32,
        y: u32,
        buffer: &mut PassCountBuffer,
    ) -> Result<Option<Resolved>> {
        let stack: Vec<&CellPass> = leaf.cell_passes(x, y)?.collect();
        let Some(newest) = stack.last().map(|p| p.time) else {
            return Ok(None);
        };
        let Some(selection) = self.select(data_type, &stack, filter, x, y, buffer) else {
            return Ok(None);
        };

        let chosen = selection.passes[selection.selected];
        if filter.temperature_by_last_pass()
            && !filter.filter_pass_using_temperature_range(&chosen.pass)
        {
            return Ok(None);
        }
        if !self.summary_allowed(data_type, selection.layers.is_some()) {
            return Ok(None);
        }

        let Some(value) = self.cell_value(data_type, &selection, &chosen) else {
            return Ok(None);
        };
        Ok(Some(Resolved {
            value,
            source: PassSource {
                time: chosen.pass.time,
                machine_index: chosen.pass.internal_machine_index,
            },
            from_last_pass: chosen.pass.time == newest,
        }))
    }

    fn select(
        &self,
        data_type: GridDataType,
        stack: &[&CellPass],
        filter: &PreparedFilter,
        x: u32,
        y: u32,
        buffer: &mut PassCountBuffer,
    ) -> Option<Selection> {
        let f = filter.filter();
        let attribute = data_type.pass_attribute();
        let elevation_type = f.elevation_type();
        let earliest = f.return_earliest() || elevation_type == Some(ElevationType::First);
        let collect_all = self.lift.is_some()
            || f.has_pass_count_range()
            || matches!(elevation_type, Some(ElevationType::Highest | ElevationType::Lowest))
            || matches!(
                data_type,
                GridDataType::PassCount
                    | GridDataType::CompositeHeights
                    | GridDataType::CellPasses
                    | GridDataType::CellProfile
            );

        let limit = self.request.max_passes_to_examine;
        let window = if earliest {
            &stack[..stack.len().min(limit)]
        } else {
            &stack[stack.len().saturating_sub(limit)..]
        };
        let accept = |pass: &CellPass| {
            if !attribute.present_in(pass) {
                return None;
            }
            let data = FilteredPassData {
                pass: *pass,
                events: self.snapshot(pass, self.control),
            };
            filter.filter_pass(&data, x, y).then_some(data)
        };

        if !collect_all {
            let found = if earliest {
                window.iter().find_map(|p| accept(*p))
            } else {
                window.iter().rev().find_map(|p| accept(*p))
            }?;
            return Some(Selection {
                passes: vec![found],
                considered: (0, 1),
                selected: 0,
                counted: None,
                layers: None,
            });
        }

        buffer.clear();
        for pass in window {
            if let Some(data) = accept(*pass) {
                buffer.push(data);
            }
        }
        if buffer.is_empty() {
            return None;
        }

        if let Some(lift) = &self.lift {
            let layers = CellLayers::analyze(buffer.passes(), lift);
            let selected = layers.select(earliest)?;
            let top = layers.top_layer().map_or((0, 0), |l| (l.start, l.end));
            let considered = if lift.include_superseded {
                (0, buffer.len())
            } else {
                top
            };
            let counted = layers.top_layer().map(|l| l.pass_count);
            return Some(Selection {
                passes: buffer.passes().to_vec(),
                considered,
                selected,
                counted,
                layers: Some(layers),
            });
        }

        if let Some(range) = f.pass_count_range() {
            let sel = buffer.select(range, earliest)?;
            return Some(Selection {
                passes: buffer.passes().to_vec(),
                considered: sel.accepted,
                selected: sel.selected,
                counted: Some(sel.accepted_count),
                layers: None,
            });
        }

        let passes = buffer.passes();
        let selected = match elevation_type {
            Some(ElevationType::Highest) => passes
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.pass.height.total_cmp(&b.1.pass.height))
                .map(|(i, _)| i),
            Some(ElevationType::Lowest) => passes
                .iter()
                .enumerate()
                .min_by(|a, b| a.1.pass.height.total_cmp(&b.1.pass.height))
                .map(|(i, _)| i),
            _ if earliest => Some(0),
            _ => Some(passes.len() - 1),
        }?;
        Some(Selection {
            passes: passes.to_vec(),
            considered: (0, passes.len()),
            selected,
            counted: None,
            layers: None,
        })
    }

    fn cell_value(
        &self,
        data_type: GridDataType,
        selection: &Selection,
        chosen: &FilteredPassData,
    ) -> Option<CellValue> {
        let pass = &chosen.pass;
        let considered = &selection.passes[selection.considered.0..selection.considered.1];
        let value = match data_type {
            GridDataType::Height | GridDataType::CutFill => CellValue::Height(pass.height),
            GridDataType::HeightAndTime => CellValue::HeightAndTime(timed(pass)),
            GridDataType::CompositeHeights => CellValue::CompositeHeights(composite(considered)?),
            GridDataType::Ccv | GridDataType::Mdp | GridDataType::Cca => {
                compaction_value(data_type, pass, &self.targets(data_type, pass))?
            }
            GridDataType::PassCount => {
                let top_layer_half_passes = match &selection.layers {
                    Some(layers) => layers.top_layer().map_or(0, |l| l.half_pass_count),
                    None => half_passes(considered),
                };
                CellValue::PassCount {
                    count: selection.counted.unwrap_or_else(|| full_pass_count(considered)),
                    target: self.targets(data_type, pass).target_pass_count,
                    top_layer_half_passes,
                }
            }
            GridDataType::Temperature => CellValue::Temperature(pass.material_temperature?),
            GridDataType::MachineSpeed => CellValue::MachineSpeed(pass.machine_speed?),
            GridDataType::Frequency => CellValue::Frequency(pass.frequency?),
            GridDataType::Amplitude => CellValue::Amplitude(pass.amplitude?),
            GridDataType::GpsMode => CellValue::GpsMode(pass.gps_mode?),
            GridDataType::CellProfile => {
                let layers = match &selection.layers {
                    Some(layers) => Cow::Borrowed(layers),
                    None => Cow::Owned(CellLayers::analyze(
                        &selection.passes,
                        &LiftParams::default(),
                    )),
                };
                let top = layers.top_layer()?;
                CellValue::CellProfile(CellProfileValue {
                    layer_count: u16::try_from(layers.len()).unwrap_or(u16::MAX),
                    top_layer_pass_count: top.pass_count,
                    top_layer_height: top.height,
                    total_pass_count: full_pass_count(&selection.passes),
                })
            }
            GridDataType::CellPasses => match (&selection.layers, &self.lift) {
                (Some(layers), Some(lift)) => CellValue::CellPasses(
                    layers
                        .eligible(lift.include_superseded)
                        .map(|i| selection.passes[i].pass)
                        .collect(),
                ),
                _ => CellValue::CellPasses(considered.iter().map(|d| d.pass).collect()),
            },
        };
        Some(value)
    }
}

fn timed(pass: &CellPass) -> TimedHeight {
    TimedHeight {
        height: pass.height,
        time: pass.time,
    }
}

fn composite(passes: &[FilteredPassData]) -> Option<CompositeHeights> {
    let first = passes.first()?;
    let last = passes.last()?;
    let lowest = passes
        .iter()
        .min_by(|a, b| a.pass.height.total_cmp(&b.pass.height))?;
    let highest = passes
        .iter()
        .max_by(|a, b| a.pass.height.total_cmp(&b.pass.height))?;
    Some(CompositeHeights {
        first: timed(&first.pass),
        last: timed(&last.pass),
        lowest: timed(&lowest.pass),
        highest: timed(&highest.pass),
    })
}

#[allow(clippy::cast_possible_truncation)]
fn half_passes(passes: &[FilteredPassData]) -> u16 {
    passes.iter().filter(|d| d.pass.half_pass).count().min(usize::from(u16::MAX)) as u16
}

fn compaction_value(
    data_type: GridDataType,
    pass: &CellPass,
    targets: &EventSnapshot,
) -> Option<CellValue> {
    match data_type {
        GridDataType::Ccv => Some(CellValue::Ccv {
            value: pass.ccv?,
            target: targets.target_ccv,
        }),
        GridDataType::Mdp => Some(CellValue::Mdp {
            value: pass.mdp?,
            target: targets.target_mdp,
        }),
        GridDataType::Cca => Some(CellValue::Cca {
            value: pass.cca?,
            target: targets.target_cca,
        }),
        _ => None,
    }
}
