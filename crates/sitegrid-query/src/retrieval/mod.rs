//! Retrieval Engine: resolves one filtered attribute value per cell of a
//! tile.

pub mod client_tile;
pub mod cut_fill;
pub mod lift;
pub mod request;
pub mod retriever;

pub use client_tile::{CellValue, ClientLeafSubGrid, PassSource};
pub use lift::{LiftDetection, LiftParams};
pub use request::{RetrievalRequest, SieveParams};
pub use retriever::{RetrievalStatus, SubGridRetriever};
