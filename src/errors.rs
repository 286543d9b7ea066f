//! Typed error hierarchy for the sync core.
//!
//! Two top-level enums cover the two failure domains:
//! - `TransportError` — REST fetch/mutation failures (network, non-2xx, decode)
//! - `ChannelError` — realtime channel failures; these never reach calling
//!   code directly, they only drive the connection supervisor's state machine

use thiserror::Error;

/// Errors from REST fetches and remote mutations.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request to {endpoint} failed: {source}")]
    Request {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{endpoint} returned {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("failed to decode response from {endpoint}: {source}")]
    Decode {
        endpoint: String,
        #[source]
        source: serde_json::Error,
    },
}

impl TransportError {
    /// HTTP status code, when the server produced a response at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Errors from the realtime subscription channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("websocket connect failed: {0}")]
    Connect(String),

    #[error("websocket protocol error: {0}")]
    Protocol(String),

    #[error("failed to decode channel message: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("channel closed by peer")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_status_error_carries_code_and_body() {
        let err = TransportError::Status {
            endpoint: "/api/projects/7".to_string(),
            status: 502,
            body: "upstream unavailable".to_string(),
        };
        assert_eq!(err.status(), Some(502));
        let msg = err.to_string();
        assert!(msg.contains("502"));
        assert!(msg.contains("upstream unavailable"));
        assert!(msg.contains("/api/projects/7"));
    }

    #[test]
    fn transport_decode_error_has_no_status() {
        let source = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = TransportError::Decode {
            endpoint: "/api/projects/7".to_string(),
            source,
        };
        assert_eq!(err.status(), None);
    }

    #[test]
    fn channel_decode_converts_from_serde() {
        let source = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: ChannelError = source.into();
        assert!(matches!(err, ChannelError::Decode(_)));
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        let t = TransportError::Status {
            endpoint: "/x".into(),
            status: 500,
            body: String::new(),
        };
        assert_std_error(&t);
        let c = ChannelError::Closed;
        assert_std_error(&c);
    }
}
