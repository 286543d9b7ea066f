//! Wire and consumer event types for the realtime channel.
//!
//! The server pushes JSON frames of shape `{ "event": "...", "data": {...} }`.
//! Frames decode into [`ChannelMessage`]; the supervisor translates those into
//! the consumer-facing [`ProjectEvent`] stream.

use serde::{Deserialize, Serialize};

use crate::progress::Phase;

/// An `update` push: server state for the project changed, refetch it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateNotice {
    pub project_id: i64,
    /// Entity kind the server says changed, when it narrows it down.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<i64>,
}

/// A `progress` push: transient pipeline progress, rendered directly by the
/// consumer without touching the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressNotice {
    pub project_id: i64,
    pub phase: Phase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percent: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// One decoded frame from the channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ChannelMessage {
    Update(UpdateNotice),
    Progress(ProgressNotice),
    Heartbeat,
}

/// Typed event delivered to subscription consumers.
#[derive(Debug, Clone, PartialEq)]
pub enum ProjectEvent {
    Updated(UpdateNotice),
    Progress(ProgressNotice),
}
