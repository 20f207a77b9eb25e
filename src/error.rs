//! Closed error taxonomy shared by every component of the device gateway.
//!
//! Every error that can cross a component boundary is a [`DeviceError`]
//! carrying a stable numeric [`ErrorKind`] code, a default message, and an
//! optional underlying cause.

use std::fmt;

/// A closed set of error kinds, each with a stable numeric code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// TCP/SSH dial or re-dial failed.
    ConnectionFailed,
    /// Credentials rejected.
    AuthFailed,
    /// Pool not running, or session lost mid-op.
    ConnectionClosed,
    /// Pool at max connections and queue saturated.
    QueueFull,
    /// Submission waited longer than `queue_timeout`.
    QueueTimeout,
    /// Adapter reported a command error.
    CommandFailed,
    /// Per-command timeout elapsed.
    CommandTimeout,
    /// Output exceeded the log bound (informational, not a failure).
    OutputTooLarge,
    /// Validation rejected the configuration.
    InvalidConfig,
    /// Core asked to operate with no device config.
    DeviceNotConfigured,
}

impl ErrorKind {
    /// The stable numeric code for this error kind.
    pub const fn code(self) -> u32 {
        match self {
            ErrorKind::ConnectionFailed => 1001,
            ErrorKind::AuthFailed => 1002,
            ErrorKind::ConnectionClosed => 1003,
            ErrorKind::QueueFull => 1101,
            ErrorKind::QueueTimeout => 1102,
            ErrorKind::CommandFailed => 1201,
            ErrorKind::CommandTimeout => 1202,
            ErrorKind::OutputTooLarge => 1203,
            ErrorKind::InvalidConfig => 1301,
            ErrorKind::DeviceNotConfigured => 1302,
        }
    }

    /// The default human-readable message for this kind.
    pub const fn default_message(self) -> &'static str {
        match self {
            ErrorKind::ConnectionFailed => "Failed to connect to device",
            ErrorKind::AuthFailed => "Authentication failed",
            ErrorKind::ConnectionClosed => "Connection closed",
            ErrorKind::QueueFull => "Command queue is full, please try again later",
            ErrorKind::QueueTimeout => "Queue wait timeout",
            ErrorKind::CommandFailed => "Command execution failed",
            ErrorKind::CommandTimeout => "Command execution timeout",
            ErrorKind::OutputTooLarge => "Command output too large, truncated",
            ErrorKind::InvalidConfig => "Invalid device configuration",
            ErrorKind::DeviceNotConfigured => "Device not configured",
        }
    }

    /// Whether a caller can retry this error (possibly with backoff).
    pub const fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::ConnectionFailed
                | ErrorKind::ConnectionClosed
                | ErrorKind::QueueFull
                | ErrorKind::QueueTimeout
                | ErrorKind::CommandTimeout
        )
    }

    /// The `(status, message)` pair the HTTP layer maps this kind to (§7).
    pub const fn http_status_and_message(self) -> (u16, &'static str) {
        match self {
            ErrorKind::ConnectionFailed | ErrorKind::AuthFailed | ErrorKind::ConnectionClosed => {
                (503, "Device connection failed")
            }
            ErrorKind::QueueFull | ErrorKind::QueueTimeout => {
                (429, "Service busy, please try again later")
            }
            ErrorKind::CommandFailed => (500, "Command execution failed"),
            ErrorKind::CommandTimeout => (504, "Command execution timeout"),
            ErrorKind::InvalidConfig | ErrorKind::DeviceNotConfigured => {
                (500, "Device configuration error")
            }
            ErrorKind::OutputTooLarge => (200, "Command output too large, truncated"),
        }
    }
}

/// An operation error produced by any device-gateway component.
#[derive(Debug)]
pub struct DeviceError {
    kind: ErrorKind,
    message: Option<String>,
    cause: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl DeviceError {
    /// Builds an error with no message and no cause.
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            cause: None,
        }
    }

    /// Builds an error carrying an explicit message instead of the default.
    pub fn with_message(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: Some(message.into()),
            cause: None,
        }
    }

    /// Builds an error wrapping an underlying cause.
    pub fn with_cause(
        kind: ErrorKind,
        cause: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind,
            message: None,
            cause: Some(Box::new(cause)),
        }
    }

    /// The error's kind.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The stable numeric code for this error.
    pub fn code(&self) -> u32 {
        self.kind.code()
    }

    /// Whether a caller can retry this error.
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// The `(status, message)` pair the HTTP layer should surface (§7).
    pub fn http_status_and_message(&self) -> (u16, &'static str) {
        self.kind.http_status_and_message()
    }
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(message) = &self.message {
            write!(
                f,
                "[{}] {}: {}",
                self.kind.code(),
                self.kind.default_message(),
                message
            )
        } else if let Some(cause) = &self.cause {
            write!(
                f,
                "[{}] {}: {}",
                self.kind.code(),
                self.kind.default_message(),
                cause
            )
        } else {
            write!(f, "[{}] {}", self.kind.code(), self.kind.default_message())
        }
    }
}

impl std::error::Error for DeviceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_ref()
            .map(|c| c.as_ref() as &(dyn std::error::Error + 'static))
    }
}

pub type Result<T> = std::result::Result<T, DeviceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_matches_spec_table() {
        assert_eq!(ErrorKind::ConnectionFailed.code(), 1001);
        assert_eq!(ErrorKind::AuthFailed.code(), 1002);
        assert_eq!(ErrorKind::ConnectionClosed.code(), 1003);
        assert_eq!(ErrorKind::QueueFull.code(), 1101);
        assert_eq!(ErrorKind::QueueTimeout.code(), 1102);
        assert_eq!(ErrorKind::CommandFailed.code(), 1201);
        assert_eq!(ErrorKind::CommandTimeout.code(), 1202);
        assert_eq!(ErrorKind::OutputTooLarge.code(), 1203);
        assert_eq!(ErrorKind::InvalidConfig.code(), 1301);
        assert_eq!(ErrorKind::DeviceNotConfigured.code(), 1302);
    }

    #[test]
    fn retryability_matches_spec_table() {
        assert!(ErrorKind::ConnectionFailed.is_retryable());
        assert!(!ErrorKind::AuthFailed.is_retryable());
        assert!(ErrorKind::ConnectionClosed.is_retryable());
        assert!(ErrorKind::QueueFull.is_retryable());
        assert!(ErrorKind::QueueTimeout.is_retryable());
        assert!(ErrorKind::CommandTimeout.is_retryable());
        assert!(!ErrorKind::InvalidConfig.is_retryable());
    }

    #[test]
    fn display_with_message() {
        let err = DeviceError::with_message(ErrorKind::InvalidConfig, "connection.host is required");
        assert_eq!(
            err.to_string(),
            "[1301] Invalid device configuration: connection.host is required"
        );
    }

    #[test]
    fn display_without_message_or_cause() {
        let err = DeviceError::new(ErrorKind::QueueFull);
        assert_eq!(
            err.to_string(),
            "[1101] Command queue is full, please try again later"
        );
    }

    #[test]
    fn http_mapping_matches_spec() {
        assert_eq!(
            ErrorKind::ConnectionFailed.http_status_and_message().0,
            503
        );
        assert_eq!(ErrorKind::QueueTimeout.http_status_and_message().0, 429);
        assert_eq!(ErrorKind::CommandTimeout.http_status_and_message().0, 504);
        assert_eq!(ErrorKind::CommandFailed.http_status_and_message().0, 500);
    }
}
