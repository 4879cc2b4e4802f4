// SPDX-License-Identifier: GPL-3.0-only

use storage_types::Event;

/// Sink for normalized events. Implementations must not block on subscribers.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: Event);
}
