//! Realtime subscription layer: wire message types, the WebSocket channel,
//! and the connection supervisor that keeps it alive.

pub mod channel;
pub mod events;
pub mod supervisor;

pub use channel::{Connector, Transport, WsConnector};
pub use events::{ChannelMessage, ProgressNotice, ProjectEvent, UpdateNotice};
pub use supervisor::{
    ConnectionState, ConnectionSupervisor, ProjectSubscription, SubscriptionOptions,
};
