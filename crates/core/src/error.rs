//! Error types for hidpp-touch-core.

use thiserror::Error;

/// Core library error type.
#[derive(Debug, Error)]
pub enum Error {
    /// A report record was too short or structurally inconsistent.
    #[error("malformed {record} record: got {len} bytes, expected at least {expected}")]
    MalformedRecord {
        record: &'static str,
        len: usize,
        expected: usize,
    },

    /// HID transport failure reported by the command transport.
    #[error("HID error: {0}")]
    Hid(String),

    /// Command response did not arrive in time.
    #[error("timeout: {0}")]
    Timeout(String),

    /// HID++ protocol error (device returned an error report).
    #[error("HID++ error: feature 0x{feature:04X}, code {code}")]
    HidppProtocol { feature: u16, code: u8 },

    /// The root feature reported the logical feature as absent.
    #[error("feature 0x{0:04X} not supported by device")]
    FeatureNotFound(u16),

    /// Device-reported surface size differs from the size assumed for the model.
    #[error(
        "unexpected touch surface size: expected {expected_x}x{expected_y}, device reported {reported_x}x{reported_y}"
    )]
    UnsupportedGeometry {
        expected_x: u16,
        expected_y: u16,
        reported_x: u16,
        reported_y: u16,
    },

    /// Device node could not be found or opened.
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    /// Permission denied opening the device node.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Session configuration could not be parsed.
    #[error("config error: {0}")]
    Config(String),

    /// The input sink refused to start.
    #[error("input sink error: {0}")]
    Sink(String),
}

impl Error {
    /// Whether this error aborts a negotiation attempt as a transport failure.
    pub fn is_transport_failure(&self) -> bool {
        matches!(
            self,
            Self::Hid(_) | Self::Timeout(_) | Self::HidppProtocol { .. } | Self::FeatureNotFound(_)
        )
    }
}

/// Convenience Result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Classification of errors for logging and status reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Timeouts; usually the device is out of range.
    Transient,
    /// Device node vanished.
    Disconnected,
    /// Permission denied on the device node.
    PermissionDenied,
    /// Device answered with a HID++ error or lacks a feature.
    Protocol,
    /// Corrupted or truncated report data.
    Malformed,
    /// Configuration, sink, or geometry problems.
    Other,
}

impl ErrorClass {
    /// Classify an error.
    pub fn classify(err: &Error) -> Self {
        match err {
            Error::Timeout(_) => Self::Transient,
            Error::PermissionDenied(_) => Self::PermissionDenied,
            Error::DeviceNotFound(_) => Self::Disconnected,
            Error::HidppProtocol { .. } | Error::FeatureNotFound(_) => Self::Protocol,
            Error::MalformedRecord { .. } => Self::Malformed,
            Error::Hid(msg) => {
                let lower = msg.to_lowercase();
                if lower.contains("disconnect")
                    || lower.contains("not found")
                    || lower.contains("no such device")
                {
                    Self::Disconnected
                } else if lower.contains("permission") || lower.contains("access denied") {
                    Self::PermissionDenied
                } else if lower.contains("timeout") || lower.contains("timed out") {
                    Self::Transient
                } else {
                    Self::Protocol
                }
            }
            Error::UnsupportedGeometry { .. } | Error::Config(_) | Error::Sink(_) => Self::Other,
        }
    }

    /// Whether the failure most likely means the device is out of range.
    pub fn is_out_of_range(&self) -> bool {
        matches!(self, Self::Transient | Self::Disconnected)
    }
}
