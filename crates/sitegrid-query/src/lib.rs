//! # sitegrid-query
//!
//! Filtering and per-tile retrieval over the sitegrid spatial store.
//!
//! A [`CellPassAttributeFilter`] bundles independently enabled predicates.
//! Prepared against a site model's machine roster it decides which cell
//! passes qualify. A [`SubGridRetriever`] walks each cell of a requested
//! tile, either answering from the latest-value cache or scanning the pass
//! stack, and fills a dense [`ClientLeafSubGrid`].

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod data_type;
pub mod error;
pub mod filter;
pub mod retrieval;

pub use data_type::GridDataType;
pub use error::{FilterCodecError, Result, RetrievalError};
pub use filter::{CellPassAttributeFilter, FilteredPassData, PreparedFilter};
pub use retrieval::{
    CellValue, ClientLeafSubGrid, RetrievalRequest, RetrievalStatus, SubGridRetriever,
};
