//! From implementations for external error types

use super::types::FailoverError;

impl From<redb::TransactionError> for FailoverError {
    fn from(err: redb::TransactionError) -> Self {
        FailoverError::storage("transaction", err)
    }
}

impl From<redb::TableError> for FailoverError {
    fn from(err: redb::TableError) -> Self {
        FailoverError::storage("open_table", err)
    }
}

impl From<redb::StorageError> for FailoverError {
    fn from(err: redb::StorageError) -> Self {
        FailoverError::storage("storage_operation", err)
    }
}

impl From<redb::CommitError> for FailoverError {
    fn from(err: redb::CommitError) -> Self {
        FailoverError::storage("commit", err)
    }
}

impl From<redb::DatabaseError> for FailoverError {
    fn from(err: redb::DatabaseError) -> Self {
        FailoverError::database("open_database", err)
    }
}

impl From<serde_json::Error> for FailoverError {
    fn from(err: serde_json::Error) -> Self {
        FailoverError::JsonError(Box::new(err))
    }
}

impl From<std::io::Error> for FailoverError {
    fn from(err: std::io::Error) -> Self {
        FailoverError::IoError(Box::new(err))
    }
}

impl From<toml::de::Error> for FailoverError {
    fn from(err: toml::de::Error) -> Self {
        FailoverError::configuration("config_file", format!("Failed to parse TOML: {}", err))
    }
}

impl From<reqwest::Error> for FailoverError {
    fn from(err: reqwest::Error) -> Self {
        let operation = err
            .url()
            .map(|u| u.path().to_string())
            .unwrap_or_else(|| "http_request".to_string());
        match err.status() {
            Some(status) => FailoverError::from_cloud_status(operation, status.as_u16(), err.to_string()),
            None if err.is_timeout() => FailoverError::TransientCloud {
                operation,
                details: err.to_string(),
            },
            None => FailoverError::CloudApi {
                operation,
                status: None,
                message: err.to_string(),
            },
        }
    }
}

impl From<tokio::task::JoinError> for FailoverError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            FailoverError::internal("Task was cancelled")
        } else if err.is_panic() {
            FailoverError::internal("Task panicked")
        } else {
            FailoverError::internal(format!("Task join error: {}", err))
        }
    }
}

impl From<tokio::time::error::Elapsed> for FailoverError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        FailoverError::Timeout {
            operation: "async_operation".to_string(),
            duration: std::time::Duration::from_secs(0),
        }
    }
}
