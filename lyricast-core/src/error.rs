use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    // Configuration errors
    #[error("Failed to parse config file: {0}")]
    ConfigParseError(#[from] toml::de::Error),

    // Content errors
    #[error("Unsupported file kind: {name}")]
    InvalidFileKind { name: String },

    #[error("No audio loaded, cannot {action}")]
    NoContentLoaded { action: &'static str },

    // Protocol errors
    #[error("Failed to decode sync message: {reason}")]
    ProtocolDecode { reason: String },

    #[error("Broadcast channel send failed: {reason}")]
    ChannelSendFailed { reason: String },

    // Transport errors
    #[error("Audio transport fault: {reason}")]
    TransportFault { reason: String },

    // IO errors
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
