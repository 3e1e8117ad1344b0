//! Error types for the Chatter wire format.

use thiserror::Error;

/// Errors that can occur encoding or decoding wire events.
#[derive(Debug, Error)]
pub enum WireError {
    /// Payload serialization failed.
    #[error("failed to encode payload for `{event}`: {source}")]
    Encode {
        /// The wire name of the event being encoded.
        event: &'static str,
        /// The underlying serializer error.
        #[source]
        source: serde_json::Error,
    },

    /// Payload deserialization failed.
    #[error("malformed payload for `{event}`: {source}")]
    Decode {
        /// The wire name of the event being decoded.
        event: String,
        /// The underlying deserializer error.
        #[source]
        source: serde_json::Error,
    },

    /// The event name is not part of the protocol.
    #[error("unknown event `{0}`")]
    UnknownEvent(String),
}
