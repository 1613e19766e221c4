//! Property-based tests for attribute filter ordering and encoding.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::cmp::Ordering;

use chrono::{TimeZone, Utc};
use proptest::prelude::*;

use sitegrid_core::{MachineUid, SurveyedSurfaceUid};
use sitegrid_query::filter::{
    CellPassAttributeFilter, ElevationRange, ElevationType, GpsAccuracyFilter, LayerState,
    MachineDirection, PassCountRange, TemperatureRange, TimeRange,
};
use sitegrid_store::PassTypeSet;
use sitegrid_store::events::{GpsAccuracy, VibrationState};

fn arb_time_range() -> impl Strategy<Value = TimeRange> {
    (0i64..1_000_000, 0i64..1_000_000).prop_map(|(a, len)| TimeRange {
        start: Utc.timestamp_opt(1_700_000_000 + a, 0).unwrap(),
        end: Utc.timestamp_opt(1_700_000_000 + a + len, 0).unwrap(),
    })
}

fn arb_machines() -> impl Strategy<Value = Vec<MachineUid>> {
    prop::collection::vec(any::<[u8; 16]>().prop_map(MachineUid::from_bytes), 0..4)
}

fn arb_elevation_range() -> impl Strategy<Value = ElevationRange> {
    (-100i32..100, 0u8..10, 1u8..20).prop_map(|(level, offset, thickness)| ElevationRange::Level {
        level: f64::from(level),
        offset: f64::from(offset) / 10.0,
        thickness: f64::from(thickness) / 10.0,
    })
}

/// Generates filters with a random subset of predicates enabled.
fn arb_filter() -> impl Strategy<Value = CellPassAttributeFilter> {
    (
        (
            prop::option::of(arb_time_range()),
            prop::option::of(0i32..8),
            prop::option::of(arb_machines()),
            prop::option::of(prop::sample::select(vec![
                MachineDirection::Forward,
                MachineDirection::Reverse,
            ])),
            prop::option::of((1u8..16).prop_map(PassTypeSet::from_bits_truncate)),
            prop::option::of(prop::sample::select(vec![
                VibrationState::Off,
                VibrationState::On,
            ])),
        ),
        (
            prop::option::of(prop::sample::select(vec![
                ElevationType::First,
                ElevationType::Last,
                ElevationType::Highest,
                ElevationType::Lowest,
            ])),
            prop::option::of(prop::collection::vec(
                any::<[u8; 16]>().prop_map(SurveyedSurfaceUid::from_bytes),
                0..3,
            )),
            prop::option::of((
                prop::sample::select(vec![GpsAccuracy::Fine, GpsAccuracy::Medium]),
                any::<bool>(),
            )),
            prop::option::of(arb_elevation_range()),
            prop::option::of(prop::sample::select(vec![LayerState::On, LayerState::Off])),
            any::<bool>(),
        ),
        (
            prop::option::of(0u16..50),
            prop::option::of((0u16..1000, 0u16..1000)),
            prop::option::of((1u16..10, 0u16..10)),
            any::<bool>(),
        ),
    )
        .prop_map(|(a, b, c)| {
            let (time, design, machines, direction, pass_types, vibration) = a;
            let (elevation_type, exclusions, gps, range, layer_state, compaction) = b;
            let (layer_id, temperature, pass_count, earliest) = c;

            let mut f = CellPassAttributeFilter::new();
            if let Some(v) = time {
                f.set_time_range(v);
            }
            if let Some(v) = design {
                f.set_design_name(v);
            }
            if let Some(v) = machines {
                f.set_machines(v);
            }
            if let Some(v) = direction {
                f.set_direction(v);
            }
            if let Some(v) = pass_types {
                f.set_pass_types(v);
            }
            if let Some(v) = vibration {
                f.set_vibration_state(v);
            }
            if let Some(v) = elevation_type {
                f.set_elevation_type(v);
            }
            if let Some(v) = exclusions {
                f.set_surveyed_surface_exclusions(v);
            }
            if let Some((accuracy, inclusive)) = gps {
                f.set_gps_accuracy(GpsAccuracyFilter {
                    accuracy,
                    inclusive,
                });
            }
            if let Some(v) = range {
                f.set_elevation_range(v);
            }
            if let Some(v) = layer_state {
                f.set_layer_state(v);
            }
            if compaction {
                f.set_compaction_machines_only();
            }
            if let Some(v) = layer_id {
                f.set_layer_id(v);
            }
            if let Some((lo, span)) = temperature {
                f.set_temperature_range(TemperatureRange {
                    min: lo,
                    max: lo.saturating_add(span),
                });
            }
            if let Some((min, span)) = pass_count {
                f.set_pass_count_range(PassCountRange {
                    min,
                    max: min + span,
                });
            }
            f.set_return_earliest(earliest);
            f
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn compare_is_reflexive(f in arb_filter()) {
        prop_assert_eq!(f.compare(&f), Ordering::Equal);
        prop_assert_eq!(f.compare(&f.clone()), Ordering::Equal);
    }

    #[test]
    fn compare_is_antisymmetric(a in arb_filter(), b in arb_filter()) {
        prop_assert_eq!(a.compare(&b), b.compare(&a).reverse());
    }

    #[test]
    fn compare_is_transitive(a in arb_filter(), b in arb_filter(), c in arb_filter()) {
        let mut sorted = [a, b, c];
        sorted.sort_by(CellPassAttributeFilter::compare);
        prop_assert_ne!(sorted[0].compare(&sorted[1]), Ordering::Greater);
        prop_assert_ne!(sorted[1].compare(&sorted[2]), Ordering::Greater);
        prop_assert_ne!(sorted[0].compare(&sorted[2]), Ordering::Greater);
    }

    #[test]
    fn equal_filters_compare_equal(f in arb_filter()) {
        let decoded = CellPassAttributeFilter::from_bytes(&f.to_bytes()).unwrap();
        prop_assert_eq!(decoded.compare(&f), Ordering::Equal);
    }

    #[test]
    fn clear_is_idempotent_and_accepts_all(mut f in arb_filter()) {
        f.clear();
        let once = f.clone();
        f.clear();
        prop_assert_eq!(&f, &once);
        prop_assert!(!f.any_filter_selections());
        prop_assert_eq!(f.compare(&CellPassAttributeFilter::new()), Ordering::Equal);
    }

    #[test]
    fn encoding_round_trips_and_is_stable(f in arb_filter()) {
        let bytes = f.to_bytes();
        let decoded = CellPassAttributeFilter::from_bytes(&bytes).unwrap();
        prop_assert_eq!(&decoded, &f);
        prop_assert_eq!(decoded.to_bytes(), bytes);
    }

    #[test]
    fn truncated_encodings_are_rejected(f in arb_filter(), cut in 1usize..64) {
        let bytes = f.to_bytes();
        let len = bytes.len().saturating_sub(cut);
        prop_assume!(len < bytes.len());
        prop_assert!(CellPassAttributeFilter::from_bytes(&bytes[..len]).is_err());
    }
}
