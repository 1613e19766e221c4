//! # sitegrid-ingest
//!
//! Integrates decoded machine data into a live site model.
//!
//! Upstream decoding produces one [`AggregationTask`] per TAG file. An
//! [`Integrator`] merges a batch of tasks for one site model: it groups
//! their pass trees, merges machine events, creates or updates machines,
//! relabels passes into site-model machine numbering, merges them into leaf
//! tiles and commits everything in an order that never exposes a directory
//! before its segments. Superseded segments are queued for a background
//! [`SegmentRetirer`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use sitegrid_ingest::{IngestConfig, Integrator};
//!
//! let integrator = Integrator::new(model, storage, IngestConfig::from_env()?)?;
//! if !integrator.process_batch(tasks).await {
//!     // redeliver the source files
//! }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod config;
pub mod error;
pub mod events;
pub mod grouping;
pub mod integrator;
pub mod machines;
pub mod metrics;
pub mod notify;
pub mod relabel;
pub mod retirement;
pub mod task;
pub mod worker;

pub use config::IngestConfig;
pub use error::{IngestError, Result};
pub use integrator::{BatchStats, Integrator};
pub use notify::{ChangeNotification, ChangeNotificationSink, InMemoryFeed, NullNotificationSink};
pub use retirement::{RetirementEntry, RetirementQueue, RetirementResult, SegmentRetirer};
pub use task::{AggregationTask, TaskMachine};
pub use worker::IngestWorkerPool;
