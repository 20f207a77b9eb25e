//! Process-wide handle tying configuration, the connection pool, and the
//! execution logger together.
//!
//! Grounded on `original_source/pkg/device/init.go` (construction/shutdown
//! sequencing) and `original_source/app/device/service/command_service.go`
//! (the operations below and their response shapes). Unlike `init.go`'s
//! `sync.Once`-guarded globals, `DeviceGateway` is a plain value an embedder
//! constructs and holds as an `Arc` — see `SPEC_FULL.md` §4.8.

use std::sync::Arc;
use std::time::Duration;

use log::error;
use serde::Serialize;

use crate::adapter::CommandResult;
use crate::config::{ConfigManager, DeviceConfig};
use crate::error::DeviceError;
use crate::logger::{CallerInfo, ExecutionLog, ExecutionLogger};
use crate::pool::{ConnectionPool, PoolStatus};

/// The result of a single-command execution, as returned to a caller.
pub type CommandExecuteResponse = CommandResult;

/// The result of a batch execution.
#[derive(Debug, Clone, Serialize)]
pub struct BatchCommandResponse {
    pub results: Vec<CommandResult>,
    pub total: usize,
    pub success_count: usize,
    pub failed_count: usize,
}

/// Static device identity, for an unauthenticated liveness probe.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfoResponse {
    pub status: &'static str,
    #[serde(rename = "type")]
    pub device_type: &'static str,
}

/// A page of execution history.
#[derive(Debug, Clone, Serialize)]
pub struct CommandHistoryResponse {
    pub history: Vec<ExecutionLog>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

/// Device connectivity and pool occupancy, for a status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceStatusResponse {
    pub connected: bool,
    pub total_connections: usize,
    pub active_connections: usize,
    pub queue_size: usize,
    pub max_connections: i64,
    pub max_queue_size: i64,
}

impl From<PoolStatus> for DeviceStatusResponse {
    fn from(status: PoolStatus) -> Self {
        Self {
            connected: status.running,
            total_connections: status.total_connections,
            active_connections: status.active_connections,
            queue_size: status.queue_size,
            max_connections: status.max_connections,
            max_queue_size: status.max_queue_size,
        }
    }
}

/// Ties one device's configuration, connection pool, and execution logger
/// together behind a single handle an embedding application owns.
pub struct DeviceGateway {
    pool: Arc<ConnectionPool>,
    logger: Arc<ExecutionLogger>,
    config: DeviceConfig,
}

impl DeviceGateway {
    /// Validates `config`, builds the connection pool and the execution
    /// logger. Does not start the pool; call [`Self::start`] for that.
    pub fn new(config: DeviceConfig) -> Result<Self, DeviceError> {
        let config = ConfigManager::new().load(config)?;

        let logger = ExecutionLogger::new(config.log.clone())?;
        let pool = ConnectionPool::new(config.clone())?;

        Ok(Self {
            pool: Arc::new(pool),
            logger: Arc::new(logger),
            config,
        })
    }

    /// Starts the connection pool's workers and warms up `min_connections`.
    pub async fn start(&self) {
        self.pool.start().await;
    }

    /// Stops the pool and closes the logger. Safe to call more than once.
    pub async fn shutdown(&self) -> Result<(), DeviceError> {
        self.pool.stop().await;
        self.logger.close()
    }

    /// Runs one command. Logging happens after the response is computed and
    /// never turns a successful execution into a failed one: a logging
    /// error is reported via `log::error!`, not propagated to the caller.
    pub async fn execute_one(
        &self,
        command: &str,
        timeout_s: Option<i64>,
        caller: CallerInfo,
    ) -> Result<CommandExecuteResponse, DeviceError> {
        let timeout = self.resolve_timeout(timeout_s);

        let mut results = match self.pool.execute(vec![command.to_string()], timeout).await {
            Ok(results) => results,
            Err(e) => {
                for result in &e.partial_results {
                    self.log_result(result, &caller);
                }
                return Err(e.source);
            }
        };
        let result = results.pop().ok_or_else(|| {
            DeviceError::with_message(crate::error::ErrorKind::CommandFailed, "no result returned")
        })?;

        self.log_result(&result, &caller);

        Ok(result)
    }

    /// Runs a batch of commands over one reserved connection.
    pub async fn execute_batch(
        &self,
        commands: Vec<String>,
        timeout_s: Option<i64>,
        caller: CallerInfo,
    ) -> Result<BatchCommandResponse, DeviceError> {
        let timeout = self.resolve_timeout(timeout_s);

        let results = match self.pool.execute(commands, timeout).await {
            Ok(results) => results,
            Err(e) => {
                for result in &e.partial_results {
                    self.log_result(result, &caller);
                }
                return Err(e.source);
            }
        };

        for result in &results {
            self.log_result(result, &caller);
        }

        let success_count = results.iter().filter(|r| r.success).count();
        let failed_count = results.len() - success_count;

        Ok(BatchCommandResponse {
            total: results.len(),
            success_count,
            failed_count,
            results,
        })
    }

    /// Reads a page of execution history, newest first.
    pub fn get_history(&self, limit: usize, offset: usize) -> Result<CommandHistoryResponse, DeviceError> {
        let history = self.logger.get_history(limit, offset)?;
        Ok(CommandHistoryResponse {
            total: history.len(),
            limit,
            offset,
            history,
        })
    }

    /// Reports pool occupancy and whether the device is currently reachable.
    pub async fn status(&self) -> DeviceStatusResponse {
        self.pool.status().await.into()
    }

    /// A fixed liveness/identity response, independent of pool state.
    pub fn info(&self) -> DeviceInfoResponse {
        DeviceInfoResponse {
            status: "online",
            device_type: "switch",
        }
    }

    /// The configuration this gateway was built from (with defaults and
    /// secret decryption already applied).
    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    fn resolve_timeout(&self, timeout_s: Option<i64>) -> Duration {
        let seconds = timeout_s
            .filter(|t| *t > 0)
            .unwrap_or(self.config.pool.command_timeout);
        Duration::from_secs(seconds.max(1) as u64)
    }

    fn log_result(&self, result: &CommandResult, caller: &CallerInfo) {
        if let Err(e) = self.logger.log_from_result(result, caller) {
            error!("failed to write execution log entry: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConnectionConfig, LogConfig, PoolConfig};

    fn test_config() -> DeviceConfig {
        DeviceConfig {
            connection: ConnectionConfig {
                protocol: "ssh".to_string(),
                host: "127.0.0.1".to_string(),
                port: 22,
                username: "admin".to_string(),
                password: "secret".to_string(),
                timeout: 1,
            },
            pool: PoolConfig {
                max_connections: 1,
                min_connections: 0,
                idle_timeout: 300,
                command_timeout: 2,
                queue_timeout: 1,
                max_queue_size: 4,
            },
            log: LogConfig::default(),
        }
    }

    #[tokio::test]
    async fn execute_one_before_start_is_connection_closed() {
        let gateway = DeviceGateway::new(test_config()).unwrap();
        let err = gateway
            .execute_one("show version", None, CallerInfo::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorKind::ConnectionClosed.code());
    }

    #[tokio::test]
    async fn history_is_empty_when_logging_disabled() {
        let gateway = DeviceGateway::new(test_config()).unwrap();
        let history = gateway.get_history(10, 0).unwrap();
        assert!(history.history.is_empty());
        assert_eq!(history.total, 0);
    }

    #[tokio::test]
    async fn status_before_start_reports_disconnected() {
        let gateway = DeviceGateway::new(test_config()).unwrap();
        let status = gateway.status().await;
        assert!(!status.connected);
    }

    #[test]
    fn info_is_fixed_and_independent_of_pool_state() {
        let gateway = DeviceGateway::new(test_config()).unwrap();
        let info = gateway.info();
        assert_eq!(info.status, "online");
        assert_eq!(info.device_type, "switch");
    }
}
