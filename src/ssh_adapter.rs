//! SSH protocol adapter.
//!
//! Mirrors `original_source/pkg/device/ssh.go`: one persistent
//! [`async_ssh2_tokio::client::Client`] per [`SshAdapter`], a fresh channel
//! per command (no long-lived shell), host-key verification disabled per
//! `spec.md` §4.4's documented non-goal.

use std::time::Duration;

use async_ssh2_tokio::client::{AuthMethod, Client};
use async_ssh2_tokio::ServerCheckMethod;
use async_trait::async_trait;

use crate::adapter::{CommandResult, ProtocolAdapter, ProtocolType};
use crate::config::ConnectionConfig;
use crate::error::{DeviceError, ErrorKind};

/// SSH adapter: connects once, runs each command over its own channel.
pub struct SshAdapter {
    client: Option<Client>,
}

impl SshAdapter {
    pub fn new() -> Self {
        Self { client: None }
    }
}

impl Default for SshAdapter {
    fn default() -> Self {
        Self::new()
    }
}

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[async_trait]
impl ProtocolAdapter for SshAdapter {
    async fn connect(&mut self, config: &ConnectionConfig) -> Result<(), DeviceError> {
        let timeout = Duration::from_secs(config.timeout.max(1) as u64);

        let connect_fut = Client::connect(
            (config.host.as_str(), config.port),
            &config.username,
            AuthMethod::with_password(&config.password),
            ServerCheckMethod::NoCheck,
        );

        let client = tokio::time::timeout(timeout, connect_fut)
            .await
            .map_err(|_| {
                DeviceError::with_message(ErrorKind::ConnectionFailed, "connect timed out")
            })?
            .map_err(|e| DeviceError::with_cause(ErrorKind::ConnectionFailed, e))?;

        self.client = Some(client);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), DeviceError> {
        if let Some(client) = self.client.take() {
            client
                .disconnect()
                .await
                .map_err(|e| DeviceError::with_cause(ErrorKind::ConnectionClosed, e))?;
        }
        Ok(())
    }

    async fn execute_command(&mut self, command: &str) -> Result<CommandResult, DeviceError> {
        let client = self.client.as_ref().ok_or_else(|| {
            DeviceError::with_message(ErrorKind::ConnectionClosed, "not connected")
        })?;

        let start = std::time::Instant::now();
        let outcome = client.execute(command).await;
        let duration_ms = start.elapsed().as_millis() as i64;
        let timestamp = now_unix();

        match outcome {
            Ok(result) => {
                let success = result.exit_status == 0;
                let combined = if result.stderr.is_empty() {
                    result.stdout
                } else {
                    format!("{}{}", result.stdout, result.stderr)
                };
                if success {
                    Ok(CommandResult::success(command, combined, duration_ms, timestamp))
                } else {
                    let mut res = CommandResult::failure(
                        command,
                        format!("command exited with status {}", result.exit_status),
                        duration_ms,
                        timestamp,
                    );
                    res.output = combined;
                    Ok(res)
                }
            }
            Err(e) => Err(DeviceError::with_cause(ErrorKind::CommandFailed, e)),
        }
    }

    fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    fn protocol_type(&self) -> ProtocolType {
        ProtocolType::Ssh
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_adapter_is_not_connected() {
        let adapter = SshAdapter::new();
        assert!(!adapter.is_connected());
        assert_eq!(adapter.protocol_type(), ProtocolType::Ssh);
    }

    #[tokio::test]
    async fn execute_without_connect_is_connection_closed() {
        let mut adapter = SshAdapter::new();
        let err = adapter.execute_command("show version").await.unwrap_err();
        assert_eq!(err.code(), ErrorKind::ConnectionClosed.code());
    }
}
