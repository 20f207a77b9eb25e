//! Configuration validation, defaulting, and secret handling.
//!
//! This module validates a [`DeviceConfig`] value, applies the defaults in
//! `spec.md` §4.2, and decrypts a password stored with the `encrypted:`
//! prefix. The crate never parses a configuration file itself — it receives
//! a fully populated [`DeviceConfig`] value from its embedder.

use aes::Aes128;
use cfb_mode::cipher::{AsyncStreamCipher, KeyIvInit};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};

use crate::error::{DeviceError, ErrorKind};

const ENCRYPTED_PREFIX: &str = "encrypted:";
const AES_BLOCK_SIZE: usize = 16;

/// Connection parameters for the target device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// `"ssh"` or `"telnet"`.
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    /// May be stored encrypted with the `encrypted:` prefix (see [`ConfigManager::load`]).
    pub password: String,
    /// Dial timeout in seconds.
    #[serde(default)]
    pub timeout: i64,
}

/// Bounded-pool behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    #[serde(default)]
    pub max_connections: i64,
    #[serde(default)]
    pub min_connections: i64,
    /// Idle timeout in seconds.
    #[serde(default)]
    pub idle_timeout: i64,
    /// Per-command timeout in seconds.
    #[serde(default)]
    pub command_timeout: i64,
    /// Queue admission timeout in seconds.
    #[serde(default)]
    pub queue_timeout: i64,
    #[serde(default)]
    pub max_queue_size: i64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 0,
            min_connections: 0,
            idle_timeout: 0,
            command_timeout: 0,
            queue_timeout: 0,
            max_queue_size: 0,
        }
    }
}

/// Execution logger behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub file: String,
    /// Rotation size threshold, in MB.
    #[serde(default)]
    pub max_size: i64,
    #[serde(default)]
    pub max_backups: i64,
    /// Purge age, in days.
    #[serde(default)]
    pub max_age: i64,
    #[serde(default)]
    pub compress: bool,
    #[serde(default)]
    pub include_output: bool,
    /// Truncation bound, in bytes.
    #[serde(default)]
    pub max_output_size: i64,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            file: String::new(),
            max_size: 0,
            max_backups: 0,
            max_age: 0,
            compress: false,
            include_output: false,
            max_output_size: 0,
        }
    }
}

/// Top-level device configuration, as handed to the gateway by its embedder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// Validates a [`DeviceConfig`] and applies defaults.
pub struct ConfigManager {
    encryption_key: Option<Vec<u8>>,
}

impl ConfigManager {
    /// Creates a manager that reads `DEVICE_ENCRYPTION_KEY` from the environment
    /// for decrypting `encrypted:`-prefixed passwords.
    pub fn new() -> Self {
        let key = std::env::var("DEVICE_ENCRYPTION_KEY")
            .ok()
            .filter(|k| !k.is_empty())
            .map(|k| k.into_bytes());
        Self { encryption_key: key }
    }

    /// Validates `config`, applies defaults in place, and decrypts the
    /// password if it carries the `encrypted:` prefix.
    pub fn load(&self, mut config: DeviceConfig) -> Result<DeviceConfig, DeviceError> {
        self.validate(&mut config)?;

        if config.connection.password.starts_with(ENCRYPTED_PREFIX) {
            let decrypted = self.decrypt_password(&config.connection.password)?;
            config.connection.password = decrypted;
        }

        Ok(config)
    }

    fn validate(&self, config: &mut DeviceConfig) -> Result<(), DeviceError> {
        if config.connection.host.is_empty() {
            return Err(DeviceError::with_message(
                ErrorKind::InvalidConfig,
                "connection.host is required",
            ));
        }
        if config.connection.port == 0 {
            return Err(DeviceError::with_message(
                ErrorKind::InvalidConfig,
                "connection.port must be positive",
            ));
        }
        if config.connection.protocol.is_empty() {
            return Err(DeviceError::with_message(
                ErrorKind::InvalidConfig,
                "connection.protocol is required",
            ));
        }
        if config.connection.username.is_empty() {
            return Err(DeviceError::with_message(
                ErrorKind::InvalidConfig,
                "connection.username is required",
            ));
        }
        if config.connection.password.is_empty() {
            return Err(DeviceError::with_message(
                ErrorKind::InvalidConfig,
                "connection.password is required",
            ));
        }
        if config.connection.timeout <= 0 {
            config.connection.timeout = 30;
        }

        if config.pool.max_connections <= 0 {
            config.pool.max_connections = 3;
        }
        if config.pool.min_connections < 0 {
            config.pool.min_connections = 1;
        }
        if config.pool.min_connections > config.pool.max_connections {
            config.pool.min_connections = config.pool.max_connections;
        }
        if config.pool.idle_timeout <= 0 {
            config.pool.idle_timeout = 300;
        }
        if config.pool.command_timeout <= 0 {
            config.pool.command_timeout = 30;
        }
        if config.pool.queue_timeout <= 0 {
            config.pool.queue_timeout = 60;
        }
        if config.pool.max_queue_size <= 0 {
            config.pool.max_queue_size = 100;
        }

        if config.log.file.is_empty() {
            config.log.file = "logs/command.log".to_string();
        }
        if config.log.max_size <= 0 {
            config.log.max_size = 100;
        }
        if config.log.max_backups < 0 {
            config.log.max_backups = 3;
        }
        if config.log.max_age <= 0 {
            config.log.max_age = 7;
        }
        if config.log.max_output_size < 0 {
            config.log.max_output_size = 10_240;
        }

        Ok(())
    }

    fn decrypt_password(&self, encrypted: &str) -> Result<String, DeviceError> {
        let key = self.encryption_key.as_ref().ok_or_else(|| {
            DeviceError::with_message(
                ErrorKind::InvalidConfig,
                "failed to decrypt password: encryption key not set (DEVICE_ENCRYPTION_KEY environment variable)",
            )
        })?;

        let stripped = encrypted.strip_prefix(ENCRYPTED_PREFIX).unwrap_or(encrypted);
        let raw = BASE64.decode(stripped).map_err(|e| {
            DeviceError::with_message(
                ErrorKind::InvalidConfig,
                format!("failed to decrypt password: failed to decode base64: {e}"),
            )
        })?;

        if raw.len() < AES_BLOCK_SIZE {
            return Err(DeviceError::with_message(
                ErrorKind::InvalidConfig,
                "failed to decrypt password: ciphertext too short",
            ));
        }

        let (iv, ciphertext) = raw.split_at(AES_BLOCK_SIZE);
        let mut buf = ciphertext.to_vec();
        decrypt_cfb(key, iv, &mut buf).map_err(|e| {
            DeviceError::with_message(
                ErrorKind::InvalidConfig,
                format!("failed to decrypt password: {e}"),
            )
        })?;

        String::from_utf8(buf).map_err(|e| {
            DeviceError::with_message(
                ErrorKind::InvalidConfig,
                format!("failed to decrypt password: {e}"),
            )
        })
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Encrypts `password` with AES-CFB under `key`, returning the `encrypted:`
/// form this crate's [`ConfigManager`] understands.
///
/// This is an operator utility for generating config values, not a security
/// boundary: it uses a zero initialization vector, which is insecure for
/// anything but throwaway lab passwords. Preserved only for compatibility
/// with operator tooling that already produced `encrypted:` values this way.
pub fn encrypt_password(password: &str, key: &[u8]) -> Result<String, DeviceError> {
    let iv = [0u8; AES_BLOCK_SIZE];
    let mut buf = password.as_bytes().to_vec();
    encrypt_cfb(key, &iv, &mut buf).map_err(|e| {
        DeviceError::with_message(ErrorKind::InvalidConfig, format!("failed to create cipher: {e}"))
    })?;

    let mut result = Vec::with_capacity(AES_BLOCK_SIZE + buf.len());
    result.extend_from_slice(&iv);
    result.extend_from_slice(&buf);

    Ok(format!("{ENCRYPTED_PREFIX}{}", BASE64.encode(result)))
}

type Aes128CfbEnc = cfb_mode::Encryptor<Aes128>;
type Aes128CfbDec = cfb_mode::Decryptor<Aes128>;

fn encrypt_cfb(key: &[u8], iv: &[u8], buf: &mut [u8]) -> Result<(), String> {
    let cipher = Aes128CfbEnc::new_from_slices(key, iv).map_err(|e| e.to_string())?;
    cipher.encrypt(buf);
    Ok(())
}

fn decrypt_cfb(key: &[u8], iv: &[u8], buf: &mut [u8]) -> Result<(), String> {
    let cipher = Aes128CfbDec::new_from_slices(key, iv).map_err(|e| e.to_string())?;
    cipher.decrypt(buf);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_config() -> DeviceConfig {
        DeviceConfig {
            connection: ConnectionConfig {
                protocol: "ssh".to_string(),
                host: "10.0.0.1".to_string(),
                port: 22,
                username: "admin".to_string(),
                password: "secret".to_string(),
                timeout: 0,
            },
            pool: PoolConfig::default(),
            log: LogConfig::default(),
        }
    }

    #[test]
    fn defaults_are_applied() {
        let manager = ConfigManager::new();
        let cfg = manager.load(minimal_config()).unwrap();

        assert_eq!(cfg.connection.timeout, 30);
        assert_eq!(cfg.pool.max_connections, 3);
        assert_eq!(cfg.pool.min_connections, 1);
        assert_eq!(cfg.pool.idle_timeout, 300);
        assert_eq!(cfg.pool.command_timeout, 30);
        assert_eq!(cfg.pool.queue_timeout, 60);
        assert_eq!(cfg.pool.max_queue_size, 100);
        assert_eq!(cfg.log.file, "logs/command.log");
        assert_eq!(cfg.log.max_size, 100);
        assert_eq!(cfg.log.max_backups, 3);
        assert_eq!(cfg.log.max_age, 7);
        assert_eq!(cfg.log.max_output_size, 10_240);
    }

    #[test]
    fn min_connections_clamps_to_max() {
        let manager = ConfigManager::new();
        let mut input = minimal_config();
        input.pool.max_connections = 2;
        input.pool.min_connections = 10;

        let cfg = manager.load(input).unwrap();
        assert_eq!(cfg.pool.min_connections, 2);
    }

    #[test]
    fn missing_host_is_rejected() {
        let manager = ConfigManager::new();
        let mut input = minimal_config();
        input.connection.host = String::new();

        let err = manager.load(input).unwrap_err();
        assert_eq!(err.code(), ErrorKind::InvalidConfig.code());
    }

    #[test]
    fn encrypt_then_decrypt_round_trips() {
        let key = b"0123456789abcdef";
        let encrypted = encrypt_password("hunter2", key).unwrap();
        assert!(encrypted.starts_with(ENCRYPTED_PREFIX));

        let manager = ConfigManager {
            encryption_key: Some(key.to_vec()),
        };
        let decrypted = manager.decrypt_password(&encrypted).unwrap();
        assert_eq!(decrypted, "hunter2");
    }

    #[test]
    fn decrypt_without_key_fails_invalid_config() {
        let manager = ConfigManager { encryption_key: None };
        let err = manager
            .decrypt_password("encrypted:not-relevant")
            .unwrap_err();
        assert_eq!(err.code(), ErrorKind::InvalidConfig.code());
    }
}
