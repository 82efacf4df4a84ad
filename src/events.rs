//! Host-provided notifications for memory pressure and background transitions. The
//! core only consumes these; registering with the OS/runtime for the actual signals
//! is the host's responsibility, not the cache's.

use std::sync::Arc;

/// Delivers memory-warning and background-entry notifications to subscribed
/// listeners. Implementations live outside this crate (the host application wires a
/// concrete `EventSource` to whatever platform API exposes these signals).
pub trait EventSource: Send + Sync {
    /// Registers `listener` to receive future events. Delivery order and threading
    /// are up to the implementation; listeners must tolerate being called from any
    /// thread at any time.
    fn subscribe(&self, listener: Arc<dyn EventListener>);
}

/// Receives host lifecycle notifications.
pub trait EventListener: Send + Sync {
    /// The host is under memory pressure and wants caches to shed resident data.
    fn on_memory_warning(&self);

    /// The application has moved to the background (or an equivalent low-priority
    /// state) and may want to release memory proactively.
    fn on_background_entry(&self);
}
