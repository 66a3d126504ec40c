use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::EventId;

/// Marks that a handler has applied the effects of an event.
///
/// Keyed by `(event_id, handler_name)` so several handlers can consume the
/// same event independently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedEvent {
    pub event_id: EventId,
    pub handler_name: String,
    pub processed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl ProcessedEvent {
    /// Creates a marker stamped now that expires after `ttl`.
    pub fn new(event_id: EventId, handler_name: impl Into<String>, ttl: chrono::Duration) -> Self {
        let processed_at = Utc::now();
        Self {
            event_id,
            handler_name: handler_name.into(),
            processed_at,
            expires_at: processed_at + ttl,
        }
    }

    /// Returns true if the marker may be purged at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_expires_after_ttl() {
        let marker = ProcessedEvent::new(EventId::new(), "reject_losing_quotes", chrono::Duration::hours(1));
        assert!(!marker.is_expired(marker.processed_at));
        assert!(marker.is_expired(marker.processed_at + chrono::Duration::hours(1)));
    }
}
