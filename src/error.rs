// Error types for route collection, reconciliation and retention

use std::time::Duration;
use thiserror::Error;

use crate::collector::CollectionStats;

/// Main error type for the collection pipeline
#[derive(Error, Debug)]
pub enum CollectError {
    #[error("No devices matched the specified filters")]
    EmptyTargetSet,

    #[error("Unsupported platform for route collection: {0:?}")]
    UnsupportedPlatform(String),

    #[error("Device unreachable: {0}")]
    DeviceUnreachable(String),

    #[error("Fetch timed out after {0}s")]
    FetchTimeout(u64),

    #[error("Failed to parse device output: {0}")]
    ParseFailure(String),

    #[error("Invalid CIDR prefix: {0:?}")]
    InvalidPrefix(String),

    #[error("{summary}")]
    TotalCollectionFailure {
        summary: String,
        stats: CollectionStats,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Invalid parser grammar: {0}")]
    Grammar(#[from] regex::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Background task failed: {0}")]
    Task(String),
}

/// Result type alias using CollectError
pub type CollectResult<T> = Result<T, CollectError>;

impl CollectError {
    /// Convert error to user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            CollectError::EmptyTargetSet => {
                "No devices matched the filters. Check device status, platform and primary address.".to_string()
            }
            CollectError::UnsupportedPlatform(platform) => {
                format!("Platform {:?} has no route parser. Supported devices only.", platform)
            }
            CollectError::DeviceUnreachable(_) => {
                "Device could not be reached. Check connectivity and credentials.".to_string()
            }
            CollectError::FetchTimeout(secs) => {
                format!("Device did not answer within {}s. Consider raising the timeout.", secs)
            }
            CollectError::ParseFailure(_) => {
                "Device output could not be decoded. The CLI output format may have changed.".to_string()
            }
            CollectError::InvalidPrefix(_) => "Route skipped: invalid CIDR prefix.".to_string(),
            CollectError::TotalCollectionFailure { .. } => {
                "Every targeted device failed. No routes were collected.".to_string()
            }
            CollectError::Config(_) => {
                "Configuration error. Check your config file or command-line arguments.".to_string()
            }
            CollectError::Storage(_) => {
                "Route database error. Check the database path and permissions.".to_string()
            }
            CollectError::Grammar(_) => {
                "Parser grammar failed to compile. This is a bug, please report it.".to_string()
            }
            CollectError::Io(_) => "File system error. Check permissions and disk space.".to_string(),
            CollectError::Task(_) => "A background task panicked or was cancelled.".to_string(),
        }
    }

    /// Errors that fail one device but never the batch
    pub fn is_device_level(&self) -> bool {
        matches!(
            self,
            CollectError::UnsupportedPlatform(_)
                | CollectError::DeviceUnreachable(_)
                | CollectError::FetchTimeout(_)
                | CollectError::ParseFailure(_)
        )
    }
}

/// Errors raised by the route store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Invalid CIDR prefix: {0:?}")]
    InvalidPrefix(String),

    #[error("Outgoing interface {interface} does not belong to device {device}")]
    InvalidReference { interface: String, device: String },

    #[error("Concurrent write conflict on {0}")]
    Conflict(String),

    #[error("Corrupt stored value: {0}")]
    Corrupt(String),

    #[error("Store connection lock poisoned")]
    LockPoisoned,

    #[error("unsupported schema version {found}, max supported {supported}")]
    UnsupportedSchemaVersion { found: i64, supported: i64 },
}

impl StoreError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Conflict(_) => true,
            StoreError::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

/// Errors raised by the fetch collaborator
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("{0}")]
    Unreachable(String),

    #[error("timed out after {0}s")]
    Timeout(u64),

    #[error("output of {command:?} is not valid UTF-8")]
    Decode { command: String },

    #[error("command {command:?} failed: {message}")]
    Command { command: String, message: String },
}

impl From<TransportError> for CollectError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Unreachable(msg) => CollectError::DeviceUnreachable(msg),
            TransportError::Timeout(secs) => CollectError::FetchTimeout(secs),
            TransportError::Decode { .. } => CollectError::ParseFailure(err.to_string()),
            TransportError::Command { .. } => CollectError::DeviceUnreachable(err.to_string()),
        }
    }
}

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_attempts: 3,
            initial_delay_ms: 10,
            max_delay_ms: 500,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Calculate delay for a given attempt number
    pub fn delay_for_attempt(&self, attempt: u32) -> u64 {
        let delay = (self.initial_delay_ms as f64) * self.backoff_multiplier.powi(attempt as i32);
        delay.min(self.max_delay_ms as f64) as u64
    }
}

/// Retry a fallible store operation with exponential backoff.
///
/// Only errors for which `StoreError::is_retryable` holds are retried. The
/// store is synchronous, so the delay blocks the calling thread.
pub fn retry_with_backoff<F, T>(
    mut operation: F,
    config: &RetryConfig,
    operation_name: &str,
) -> Result<T, StoreError>
where
    F: FnMut() -> Result<T, StoreError>,
{
    let mut attempt = 0;

    loop {
        match operation() {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!("{} succeeded after {} attempt(s)", operation_name, attempt + 1);
                }
                return Ok(result);
            }
            Err(e) => {
                attempt += 1;

                if !e.is_retryable() || attempt >= config.max_attempts {
                    if attempt > 1 {
                        tracing::error!("{} failed after {} attempts: {}", operation_name, attempt, e);
                    }
                    return Err(e);
                }

                let delay = config.delay_for_attempt(attempt - 1);
                tracing::warn!(
                    "{} failed (attempt {}/{}): {}. Retrying in {}ms...",
                    operation_name,
                    attempt,
                    config.max_attempts,
                    e,
                    delay
                );

                std::thread::sleep(Duration::from_millis(delay));
            }
        }
    }
}
