//! Constructor helpers and classification for FailoverError

use super::types::FailoverError;

impl FailoverError {
    /// Create a configuration error for a named component
    ///
    /// # Examples
    /// ```rust
    /// use cloudha_core::error::FailoverError;
    ///
    /// let err = FailoverError::configuration("cloud.resource_group", "must not be empty");
    /// assert!(!err.is_transient());
    /// ```
    pub fn configuration(component: impl Into<String>, message: impl Into<String>) -> Self {
        FailoverError::ConfigurationError {
            component: component.into(),
            message: message.into(),
        }
    }

    pub fn storage<E: std::error::Error + Send + Sync + 'static>(
        operation: impl Into<String>,
        source: E,
    ) -> Self {
        FailoverError::Storage {
            operation: operation.into(),
            source: Box::new(source),
        }
    }

    pub fn database<E: std::error::Error + Send + Sync + 'static>(
        operation: impl Into<String>,
        source: E,
    ) -> Self {
        FailoverError::DatabaseError {
            operation: operation.into(),
            source: Box::new(source),
        }
    }

    /// Map an HTTP status from a cloud call into the matching error class
    ///
    /// 429 is the rate-limit signal and the only status that is retried.
    pub fn from_cloud_status(
        operation: impl Into<String>,
        status: u16,
        message: impl Into<String>,
    ) -> Self {
        if status == 429 {
            FailoverError::TransientCloud {
                operation: operation.into(),
                details: message.into(),
            }
        } else {
            FailoverError::CloudApi {
                operation: operation.into(),
                status: Some(status),
                message: message.into(),
            }
        }
    }

    pub fn device(
        host: impl Into<String>,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        FailoverError::Device {
            host: host.into(),
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        FailoverError::Internal {
            message: message.into(),
        }
    }

    /// Whether the failure is worth retrying under the bounded cloud policy
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FailoverError::TransientCloud { .. } | FailoverError::Timeout { .. }
        )
    }

    /// Fold a batch of per-item failures into one error, if there were any
    pub fn from_batch(context: impl Into<String>, mut errors: Vec<FailoverError>) -> Option<Self> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(FailoverError::Multiple {
                context: context.into(),
                errors,
            }),
        }
    }
}
