//! Policy-change notifications
//!
//! The authorization service pushes a server-sent event stream whenever
//! policies or entities change. This module turns that stream into
//! [`PolicyEvent`]s and feeds them to a handler, normally the cache
//! [`invalidator`].

mod dispatch;
mod framing;
mod source;
mod subscriber;

pub use dispatch::{invalidator, ENTITY_UPDATED, POLICY_UPDATED};
pub use framing::{FrameParser, LineBuffer, RawFrame, MAX_FRAME_BYTES, MAX_LINE_BYTES};
pub use source::{EventSource, EventStream, HttpEventSource};
pub use subscriber::{EventSubscriber, SubscriberPhase};

use serde::Deserialize;
use std::sync::Arc;

use crate::error::{CacheError, Result};
use crate::request::AppId;

/// A parsed policy-change notification
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyEvent {
    /// `policy_updated`, `entity_updated`, ...
    pub event_type: String,
    /// Application the change applies to, if scoped
    pub app_id: Option<AppId>,
    /// Server timestamp, as sent
    pub timestamp: String,
    /// Optional structured payload
    pub data: Option<serde_json::Value>,
}

/// Callback invoked once per event, on the subscriber task
pub type EventHandler = Arc<dyn Fn(PolicyEvent) + Send + Sync>;

#[derive(Deserialize)]
struct EventPayload {
    #[serde(rename = "type")]
    event_type: Option<String>,
    app_id: Option<AppId>,
    timestamp: Option<String>,
    data: Option<serde_json::Value>,
}

impl PolicyEvent {
    /// Build an event from a completed frame
    ///
    /// The explicit `event:` field wins over the payload's `type`; with
    /// neither, the type is `"unknown"`.
    pub fn from_frame(frame: &RawFrame) -> Result<Self> {
        let payload: EventPayload = serde_json::from_str(&frame.data)
            .map_err(|e| CacheError::malformed_event(e.to_string()))?;
        let event_type = frame
            .event_type
            .clone()
            .or(payload.event_type)
            .unwrap_or_else(|| "unknown".to_string());
        Ok(Self {
            event_type,
            app_id: payload.app_id,
            timestamp: payload.timestamp.unwrap_or_default(),
            data: payload.data,
        })
    }
}
