//! Uniform capability implemented by every protocol backend.
//!
//! A [`ProtocolAdapter`] owns exactly one connection to one device. The pool
//! serializes access to a given adapter instance, so implementations don't
//! need their own internal locking.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::ConnectionConfig;
use crate::error::DeviceError;

/// Which wire protocol an adapter speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolType {
    Ssh,
    Telnet,
}

impl ProtocolType {
    /// Parses the `connection.protocol` config string.
    pub fn parse(protocol: &str) -> Option<Self> {
        match protocol {
            "ssh" => Some(ProtocolType::Ssh),
            "telnet" => Some(ProtocolType::Telnet),
            _ => None,
        }
    }
}

/// The outcome of running a single command against a device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResult {
    pub command: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub output: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error: String,
    pub duration_ms: i64,
    pub success: bool,
    /// Unix epoch seconds.
    pub timestamp: i64,
}

impl CommandResult {
    /// Builds a successful result.
    pub fn success(command: impl Into<String>, output: impl Into<String>, duration_ms: i64, timestamp: i64) -> Self {
        Self {
            command: command.into(),
            output: output.into(),
            error: String::new(),
            duration_ms,
            success: true,
            timestamp,
        }
    }

    /// Builds a failed result with no output.
    pub fn failure(command: impl Into<String>, error: impl Into<String>, duration_ms: i64, timestamp: i64) -> Self {
        Self {
            command: command.into(),
            output: String::new(),
            error: error.into(),
            duration_ms,
            success: false,
            timestamp,
        }
    }
}

/// A connection to a single network device over a single protocol.
///
/// Every method takes `&mut self`: the pool holds each adapter instance
/// behind a registry lock and never calls it concurrently, so adapters are
/// free to keep unsynchronized mutable state (a socket, a channel handle).
#[async_trait]
pub trait ProtocolAdapter: Send {
    /// Establishes the connection. Called once per `Connection` and again
    /// whenever the pool recreates a stale one.
    async fn connect(&mut self, config: &ConnectionConfig) -> Result<(), DeviceError>;

    /// Closes the connection. Idempotent: calling it on an already-closed
    /// adapter is not an error.
    async fn disconnect(&mut self) -> Result<(), DeviceError>;

    /// Runs one command and returns its result.
    async fn execute_command(&mut self, command: &str) -> Result<CommandResult, DeviceError>;

    /// Whether the adapter currently believes its connection is usable.
    /// Best-effort: an adapter can report `true` right before a write fails.
    fn is_connected(&self) -> bool;

    /// Which protocol this adapter speaks.
    fn protocol_type(&self) -> ProtocolType;
}
