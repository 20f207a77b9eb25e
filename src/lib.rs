//! # switchgate - queued command-execution gateway to a network device
//!
//! `switchgate` multiplexes command batches onto a bounded pool of persistent
//! SSH or Telnet sessions to a single network device. It enforces admission,
//! command, and queue timeouts, and keeps an append-only structured audit log
//! of every attempt.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use switchgate::config::DeviceConfig;
//! use switchgate::gateway::DeviceGateway;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config: DeviceConfig = serde_json::from_str(r#"{
//!         "connection": {"protocol": "ssh", "host": "10.0.0.1", "port": 22,
//!                        "username": "admin", "password": "secret"}
//!     }"#)?;
//!
//!     let gateway = DeviceGateway::new(config)?;
//!     gateway.start().await;
//!
//!     let result = gateway.execute_one("show version", None, Default::default()).await?;
//!     println!("{}", result.output);
//!     Ok(())
//! }
//! ```
//!
//! ## Main Components
//!
//! - [`gateway::DeviceGateway`] - process-wide handle tying config, pool, and logger together
//! - [`pool::ConnectionPool`] - bounded connection pool and worker set
//! - [`adapter::ProtocolAdapter`] - uniform capability implemented by [`ssh_adapter`] and [`telnet_adapter`]
//! - [`logger::ExecutionLogger`] - structured execution audit log with rotation
//! - [`config`] - configuration validation, defaulting, and secret handling
//! - [`error::DeviceError`] - closed error taxonomy shared by every component

pub mod adapter;
pub mod config;
pub mod error;
pub mod gateway;
pub mod logger;
pub mod pool;
pub mod ssh_adapter;
pub mod telnet_adapter;
