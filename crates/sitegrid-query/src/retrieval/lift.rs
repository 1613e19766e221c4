//! Lift (compaction layer) analysis of one cell's accepted passes.
//!
//! Passes are grouped oldest first into layers. A layer is superseded when a
//! later layer finishes below it by more than the superseded tolerance, for
//! example after material was cut away and re-laid.

use serde::{Deserialize, Serialize};

use crate::data_type::GridDataType;
use crate::filter::pass_count::full_pass_count;
use crate::filter::{CellPassAttributeFilter, FilteredPassData, LayerState};

/// How layer boundaries are found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LiftDetection {
    /// No layering; the whole stack is one layer.
    None,
    /// A pass rising above the current layer by the lift threshold starts a
    /// new layer.
    Automatic,
    /// A change of the machine's layer id starts a new layer.
    MapReset,
    /// Either condition starts a new layer.
    AutoMapReset,
}

impl LiftDetection {
    const fn by_height(self) -> bool {
        matches!(self, Self::Automatic | Self::AutoMapReset)
    }

    /// True if layer id events are consulted.
    #[must_use]
    pub const fn by_layer_id(self) -> bool {
        matches!(self, Self::MapReset | Self::AutoMapReset)
    }
}

/// Lift analysis configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LiftParams {
    /// Boundary detection mode.
    pub detection: LiftDetection,
    /// Rise in metres above the current layer that starts a new layer.
    pub lift_threshold: f64,
    /// Drop in metres below an earlier layer that supersedes it.
    pub superseded_tolerance: f64,
    /// Keep passes of superseded layers eligible for selection.
    pub include_superseded: bool,
    /// Summaries report the top layer only.
    pub top_layer_only: bool,
}

impl Default for LiftParams {
    fn default() -> Self {
        Self {
            detection: LiftDetection::Automatic,
            lift_threshold: 0.1,
            superseded_tolerance: 0.05,
            include_superseded: false,
            top_layer_only: true,
        }
    }
}

/// True if a scan for `data_type` under `filter` delegates pass selection to
/// the lift analyzer.
///
/// A layer state of `On` forces analysis and `Off` suppresses it; otherwise
/// analysis runs when lift parameters with a detection mode are supplied for
/// a type that supports it.
#[must_use]
pub fn analyzer_enabled(
    data_type: GridDataType,
    filter: &CellPassAttributeFilter,
    lift: Option<&LiftParams>,
) -> bool {
    match filter.layer_state() {
        Some(LayerState::Off) => false,
        Some(LayerState::On) => true,
        None => {
            data_type.supports_lift_analysis()
                && lift.is_some_and(|l| l.detection != LiftDetection::None)
        }
    }
}

/// One layer of a cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Layer {
    /// First pass position (oldest first).
    pub start: usize,
    /// One past the last pass position.
    pub end: usize,
    /// Layer id of the first pass, when known.
    pub layer_id: Option<u16>,
    /// Height of the newest pass in the layer.
    pub height: f32,
    /// Highest pass in the layer.
    pub top: f32,
    /// Full passes in the layer, half passes rounded up.
    pub pass_count: u16,
    /// Half passes in the layer.
    pub half_pass_count: u16,
    /// A later layer lies below this one.
    pub superseded: bool,
}

/// Layers of one cell, oldest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CellLayers {
    layers: Vec<Layer>,
}

impl CellLayers {
    /// Groups `passes` (oldest first) into layers.
    #[must_use]
    pub fn analyze(passes: &[FilteredPassData], params: &LiftParams) -> Self {
        let mut layers: Vec<Layer> = Vec::new();
        for (i, data) in passes.iter().enumerate() {
            let height = data.pass.height;
            let starts_layer = layers.last().is_none_or(|current| {
                let rose = params.detection.by_height()
                    && f64::from(height) > f64::from(current.top) + params.lift_threshold;
                let new_id = params.detection.by_layer_id()
                    && data.events.layer_id.is_some()
                    && data.events.layer_id != current.layer_id;
                rose || new_id
            });
            if starts_layer {
                layers.push(Layer {
                    start: i,
                    end: i,
                    layer_id: data.events.layer_id,
                    height,
                    top: height,
                    pass_count: 0,
                    half_pass_count: 0,
                    superseded: false,
                });
            }
            if let Some(current) = layers.last_mut() {
                current.end = i + 1;
                current.height = height;
                current.top = current.top.max(height);
                if data.pass.half_pass {
                    current.half_pass_count = current.half_pass_count.saturating_add(1);
                }
            }
        }

        for layer in &mut layers {
            layer.pass_count = full_pass_count(&passes[layer.start..layer.end]);
        }
        for i in 0..layers.len() {
            let floor = f64::from(layers[i].height) - params.superseded_tolerance;
            let superseded = layers[i + 1..]
                .iter()
                .any(|later| f64::from(later.height) < floor);
            layers[i].superseded = superseded;
        }
        Self { layers }
    }

    /// All layers, oldest first.
    #[must_use]
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Number of layers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// True if the cell had no passes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// The newest layer that is not superseded.
    #[must_use]
    pub fn top_layer(&self) -> Option<&Layer> {
        self.layers.iter().rev().find(|l| !l.superseded)
    }

    /// Pass positions eligible for selection, oldest first.
    pub fn eligible(&self, include_superseded: bool) -> impl Iterator<Item = usize> + '_ {
        self.layers
            .iter()
            .filter(move |l| include_superseded || !l.superseded)
            .flat_map(|l| l.start..l.end)
    }

    /// Position of the pass answering the query: the newest eligible pass of
    /// the top layer, or its oldest when `earliest` is set.
    #[must_use]
    pub fn select(&self, earliest: bool) -> Option<usize> {
        let top = self.top_layer()?;
        if top.start == top.end {
            return None;
        }
        Some(if earliest { top.start } else { top.end - 1 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use sitegrid_store::CellPass;

    fn passes(heights: &[f32]) -> Vec<FilteredPassData> {
        heights
            .iter()
            .enumerate()
            .map(|(i, h)| {
                let t = Utc.timestamp_opt(1_700_000_000 + i as i64, 0).unwrap();
                FilteredPassData::without_events(CellPass::new(t, *h, 0))
            })
            .collect()
    }

    #[test]
    fn test_height_rise_starts_layer() {
        let cell = CellLayers::analyze(&passes(&[1.0, 1.02, 1.3, 1.31]), &LiftParams::default());
        assert_eq!(cell.len(), 2);
        assert_eq!(cell.layers()[0].pass_count, 2);
        assert_eq!(cell.top_layer().map(|l| l.start), Some(2));
        assert_eq!(cell.select(false), Some(3));
        assert_eq!(cell.select(true), Some(2));
    }

    #[test]
    fn test_lower_later_layer_supersedes() {
        let params = LiftParams {
            detection: LiftDetection::MapReset,
            ..LiftParams::default()
        };
        let mut data = passes(&[2.0, 2.0, 1.5]);
        data[0].events.layer_id = Some(1);
        data[1].events.layer_id = Some(1);
        data[2].events.layer_id = Some(2);
        let cell = CellLayers::analyze(&data, &params);
        assert_eq!(cell.len(), 2);
        assert!(cell.layers()[0].superseded);
        assert_eq!(cell.eligible(false).collect::<Vec<_>>(), vec![2]);
        assert_eq!(cell.eligible(true).count(), 3);
    }

    #[test]
    fn test_layer_state_overrides_lift_params() {
        let mut filter = CellPassAttributeFilter::new();
        let params = LiftParams::default();
        assert!(analyzer_enabled(GridDataType::Ccv, &filter, Some(&params)));
        assert!(!analyzer_enabled(GridDataType::Height, &filter, Some(&params)));
        filter.set_layer_state(LayerState::Off);
        assert!(!analyzer_enabled(GridDataType::Ccv, &filter, Some(&params)));
        filter.set_layer_state(LayerState::On);
        assert!(analyzer_enabled(GridDataType::Height, &filter, None));
    }
}
