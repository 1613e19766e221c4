//! Change notifications published after a successful ingest.

use parking_lot::Mutex;
use sitegrid_core::SiteModelId;
use sitegrid_store::ExistenceMap;

/// What one ingest batch changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeNotification {
    /// Site model ingested into.
    pub site_model: SiteModelId,
    /// Leaf tiles written by the batch.
    pub existence_delta: ExistenceMap,
    /// A machine was created or its denormalized fields changed.
    pub machines_changed: bool,
    /// A target-value event list received events.
    pub targets_changed: bool,
    /// The design-name table grew.
    pub designs_changed: bool,
}

/// Receives change notifications.
///
/// Called after the batch is durable and published; implementations must not
/// block.
pub trait ChangeNotificationSink: Send + Sync {
    /// Delivers one notification.
    fn notify(&self, notification: ChangeNotification);
}

/// Discards notifications.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullNotificationSink;

impl ChangeNotificationSink for NullNotificationSink {
    fn notify(&self, _notification: ChangeNotification) {}
}

/// Buffers notifications in memory until drained.
#[derive(Debug, Default)]
pub struct InMemoryFeed {
    pending: Mutex<Vec<ChangeNotification>>,
}

impl InMemoryFeed {
    /// Creates an empty feed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes every buffered notification, oldest first.
    pub fn drain(&self) -> Vec<ChangeNotification> {
        std::mem::take(&mut *self.pending.lock())
    }

    /// Number of buffered notifications.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    /// True if nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

impl ChangeNotificationSink for InMemoryFeed {
    fn notify(&self, notification: ChangeNotification) {
        tracing::debug!(
            site_model = %notification.site_model,
            leaves = notification.existence_delta.len(),
            "buffered change notification"
        );
        self.pending.lock().push(notification);
    }
}
