//! Cache invalidation driven by policy events

use std::sync::Arc;

use super::{EventHandler, PolicyEvent};
use crate::store::DecisionCache;

/// A policy was created, changed or deleted
pub const POLICY_UPDATED: &str = "policy_updated";

/// An entity the policies reference was changed
pub const ENTITY_UPDATED: &str = "entity_updated";

/// Build a handler that evicts decisions affected by an event
///
/// Scoped events drop only their application's entries; unscoped ones clear
/// the store. Event types other than policy and entity updates are ignored.
pub fn invalidator(store: Arc<DecisionCache>) -> EventHandler {
    Arc::new(move |event: PolicyEvent| {
        if event.event_type != POLICY_UPDATED && event.event_type != ENTITY_UPDATED {
            tracing::debug!(event_type = %event.event_type, "Ignoring event");
            return;
        }

        let removed = match event.app_id {
            Some(app_id) => store.invalidate_app(app_id),
            None => store.invalidate_all(),
        };
        tracing::info!(
            event_type = %event.event_type,
            app_id = ?event.app_id,
            removed,
            "Invalidated cached decisions"
        );
    })
}
