/*
 * SPDX-FileCopyrightText: 2024 A3Mailer Project
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Error types for the trapper listener

/// Result type for trapper operations
pub type Result<T> = std::result::Result<T, TrapperError>;

/// Trapper errors
#[derive(Debug, thiserror::Error)]
pub enum TrapperError {
    /// Frame does not start with the protocol signature
    #[error("Invalid frame header")]
    InvalidHeader,

    /// Frame flags not supported by this listener
    #[error("Unsupported frame flags {0:#04x}")]
    UnsupportedFlags(u8),

    /// Announced payload exceeds the configured maximum
    #[error("Frame of {size} bytes exceeds the maximum of {max} bytes")]
    FrameTooLarge { size: u64, max: u64 },

    /// Connection closed in the middle of a frame
    #[error("Connection closed with {0} bytes of an incomplete frame")]
    Truncated(usize),

    /// Peer did not send a request in time
    #[error("No request received within {0:?}")]
    Timeout(std::time::Duration),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TrapperError {
    /// Create a new configuration error
    pub fn config<T: Into<String>>(msg: T) -> Self {
        Self::Config(msg.into())
    }

    /// Whether the peer sent something that is not a valid request
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidHeader
                | Self::UnsupportedFlags(_)
                | Self::FrameTooLarge { .. }
                | Self::Truncated(_)
                | Self::Json(_)
        )
    }
}
