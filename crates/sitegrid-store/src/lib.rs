//! # sitegrid-store
//!
//! Spatial store primitives for sitegrid.
//!
//! A site model's cell passes live in a sparse grid of 32x32 leaf tiles.
//! Each leaf owns time-bounded segments (the unit of persistence and
//! retirement) and a latest-value cache that lets queries skip full stack
//! scans. An existence map records which leaves hold data.
//!
//! ## Modules
//!
//! - [`cell_pass`]: the pass record and stack merge
//! - [`address`], [`bitmask`], [`existence`]: addressing and bitmasks
//! - [`segment`], [`leaf`], [`latest`], [`codec`]: tile storage and its
//!   durable encoding
//! - [`spatial`]: transient pass trees and the live leaf store
//! - [`machine`], [`events`], [`event_snapshot`], [`design`]: machines and
//!   their state over time
//! - [`site_model`]: the aggregate and loading it from durable storage

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod address;
pub mod bitmask;
pub mod cell_pass;
pub mod codec;
pub mod design;
pub mod error;
pub mod event_snapshot;
pub mod events;
pub mod existence;
pub mod latest;
pub mod leaf;
pub mod machine;
pub mod metadata;
pub mod segment;
pub mod site_model;
pub mod spatial;

pub use address::{CELLS_PER_SUB_GRID, CellAddress, SUB_GRID_TREE_DIMENSION, SubGridKey};
pub use bitmask::SubGridBitmask;
pub use cell_pass::{CellPass, GpsMode, MachineIndex, PassType, PassTypeSet};
pub use error::{Result, StoreError};
pub use existence::ExistenceMap;
pub use leaf::LeafSubGrid;
pub use site_model::{SiteModel, SiteModelState};
pub use spatial::PassTree;
