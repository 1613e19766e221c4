//! Observability infrastructure.
//!
//! Structured logging with consistent spans for the ingest and retrieval
//! paths. Fields are named the same everywhere (`site_model`, `origin_x`,
//! `origin_y`, `batch_size`) so logs from one tile or batch can be joined.

use std::sync::Once;
use tracing::Span;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::id::SiteModelId;

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default)]
pub enum LogFormat {
    /// JSON structured logs (for production).
    Json,
    /// Pretty-printed logs (for development).
    #[default]
    Pretty,
}

/// Initializes the logging subsystem.
///
/// Safe to call multiple times; subsequent calls are no-ops. `RUST_LOG`
/// controls levels (e.g. `info`, `sitegrid_ingest=debug`).
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let registry = tracing_subscriber::registry().with(env_filter);
        let result = match format {
            LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
            LogFormat::Pretty => registry.with(fmt::layer().pretty()).try_init(),
        };
        if result.is_err() {
            tracing::debug!("global subscriber already installed");
        }
    });
}

/// Creates a span for one ingest batch.
#[must_use]
pub fn ingest_span(site_model: SiteModelId, batch_size: usize) -> Span {
    tracing::info_span!(
        "ingest",
        site_model = %site_model,
        batch_size,
    )
}

/// Creates a span for one tile retrieval.
#[must_use]
pub fn retrieval_span(
    site_model: SiteModelId,
    origin_x: u32,
    origin_y: u32,
    data_type: &str,
) -> Span {
    tracing::debug_span!(
        "retrieve",
        site_model = %site_model,
        origin_x,
        origin_y,
        data_type,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_is_idempotent() {
        init_logging(LogFormat::Pretty);
        init_logging(LogFormat::Json);
    }

    #[test]
    fn test_spans_enter() {
        let span = ingest_span(SiteModelId::generate(), 3);
        let _guard = span.enter();
        tracing::info!("inside ingest span");

        let span = retrieval_span(SiteModelId::generate(), 0, 32, "Height");
        let _guard = span.enter();
        tracing::debug!("inside retrieval span");
    }
}
