//! Error types for configuration commands, persistence and the remote channel.

use crate::ParseColorError;

/// Errors from configuration commands and the persisted record.
///
/// Every variant except [`ConfigError::Storage`] means the input was
/// rejected and the configuration was left unchanged.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A colour-map id outside the predefined set.
    #[error("Invalid colour map id {0} (expected 0-6)")]
    InvalidColorMapId(u8),

    /// A brightness outside 0-255.
    #[error("Invalid brightness {0} (expected 0-255)")]
    InvalidBrightness(i64),

    /// A time of day that is not a valid `HH:MM`.
    #[error("Invalid time of day {0:?} (expected HH:MM, 00:00-23:59)")]
    InvalidTime(String),

    /// A colour that is not `#rrggbb`.
    #[error(transparent)]
    InvalidColor(#[from] ParseColorError),

    /// A custom colour-map slot other than 1 or 2.
    #[error("Invalid custom colour map slot {0} (expected 1 or 2)")]
    InvalidCustomSlot(u8),

    /// A control source name other than `standalone` or `remote`.
    #[error("Invalid control source {0:?} (expected standalone or remote)")]
    InvalidControlSource(String),

    /// Reading or writing the persisted record failed.
    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),
}

/// Errors on the remote-control channel.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    /// A message arrived on a topic we do not subscribe to.
    #[error("Unknown topic {0:?}")]
    UnknownTopic(String),

    /// The payload does not parse for its topic.
    #[error("Malformed payload {payload:?} on {topic}")]
    MalformedPayload {
        /// Topic the payload arrived on.
        topic: String,
        /// The raw payload, lossily decoded.
        payload: String,
    },

    /// The link could not be (re)established.
    #[error("Remote channel unavailable: {0}")]
    Unavailable(String),

    /// Publishing a message failed.
    #[error("Publish to {0} failed")]
    PublishFailed(String),
}
