//! Error types for the provider.
//!
//! Every failure surfaced to the host is a [`ProviderError`]. Remote failures
//! carry the ARM error code and message; higher layers attach operation
//! context with [`ProviderError::context`].

use thiserror::Error;

/// Errors that can occur while serving provider requests.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The remote object does not exist.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// A create found an object that is not yet tracked in state.
    #[error(
        "A resource with the ID \"{id}\" already exists - to be managed via Terraform this \
         resource needs to be imported into the State. Please see the resource documentation \
         for \"{resource_type}\" for more information."
    )]
    AlreadyExists {
        /// The ID of the existing remote object.
        id: String,
        /// The resource type that collided.
        resource_type: String,
    },

    /// A resource ID could not be parsed.
    #[error("Invalid resource ID: {0}")]
    InvalidResourceId(String),

    /// The management API rejected a request.
    #[error("API error (status {status}, code {code}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// ARM error code, e.g. `InvalidParameter`.
        code: String,
        /// ARM error message.
        message: String,
    },

    /// A long-running operation reached a failed or cancelled state.
    #[error("Long-running operation failed: {0}")]
    OperationFailed(String),

    /// The operation did not finish before its deadline.
    #[error("Deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// Permission denied (authentication/authorization failure).
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Throttled by the management API.
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// The management API is temporarily unavailable.
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// A validation error occurred.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The provider is not configured, or its configuration is invalid.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The requested resource type is unknown.
    #[error("Unknown resource type: {0}")]
    UnknownResource(String),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An HTTP transport error talking to the management API.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A gRPC transport error occurred.
    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// Invalid request from the host.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Another error with the operation that produced it.
    #[error("{context}: {source}")]
    Context {
        /// Which operation failed, on which object.
        context: String,
        /// The underlying error.
        #[source]
        source: Box<ProviderError>,
    },
}

/// Result alias used throughout the crate.
pub type Result<T, E = ProviderError> = std::result::Result<T, E>;

impl ProviderError {
    /// Build the import collision error raised when a create finds an existing object.
    pub fn import_as_exists(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::AlreadyExists {
            id: id.into(),
            resource_type: resource_type.into(),
        }
    }

    /// Wrap this error with a description of the operation that failed.
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, skipping any context wrappers.
    pub fn root(&self) -> &ProviderError {
        match self {
            Self::Context { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether the remote object was reported missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self.root(), Self::NotFound(_))
    }

    /// Get the error message as a string.
    pub fn message(&self) -> &str {
        match self {
            Self::NotFound(msg)
            | Self::InvalidResourceId(msg)
            | Self::OperationFailed(msg)
            | Self::DeadlineExceeded(msg)
            | Self::PermissionDenied(msg)
            | Self::ResourceExhausted(msg)
            | Self::Unavailable(msg)
            | Self::Validation(msg)
            | Self::Configuration(msg)
            | Self::UnknownResource(msg)
            | Self::InvalidRequest(msg) => msg,
            Self::AlreadyExists { id, .. } => id,
            Self::Api { message, .. } => message,
            Self::Serialization(_) => "serialization error (see Debug output)",
            Self::Http(_) => "http error (see Debug output)",
            Self::Transport(_) => "transport error (see Debug output)",
            Self::Context { context, .. } => context,
        }
    }
}

/// Attach operation context to the error side of a result.
pub trait ResultExt<T> {
    /// Wrap any error with a lazily built context string.
    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T> ResultExt<T> for Result<T> {
    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| e.context(f()))
    }
}

impl From<ProviderError> for tonic::Status {
    fn from(err: ProviderError) -> Self {
        let code = status_code(err.root());
        tonic::Status::new(code, err.to_string())
    }
}

fn status_code(err: &ProviderError) -> tonic::Code {
    match err {
        ProviderError::NotFound(_) | ProviderError::UnknownResource(_) => tonic::Code::NotFound,
        ProviderError::AlreadyExists { .. } => tonic::Code::AlreadyExists,
        ProviderError::InvalidResourceId(_)
        | ProviderError::Validation(_)
        | ProviderError::Serialization(_)
        | ProviderError::InvalidRequest(_) => tonic::Code::InvalidArgument,
        ProviderError::Api { status, .. } if *status == 409 => tonic::Code::Aborted,
        ProviderError::Api { status, .. } if *status < 500 => tonic::Code::FailedPrecondition,
        ProviderError::Api { .. } | ProviderError::OperationFailed(_) => tonic::Code::Internal,
        ProviderError::DeadlineExceeded(_) => tonic::Code::DeadlineExceeded,
        ProviderError::PermissionDenied(_) => tonic::Code::PermissionDenied,
        ProviderError::ResourceExhausted(_) => tonic::Code::ResourceExhausted,
        ProviderError::Unavailable(_) | ProviderError::Http(_) | ProviderError::Transport(_) => {
            tonic::Code::Unavailable
        },
        ProviderError::Configuration(_) => tonic::Code::FailedPrecondition,
        ProviderError::Context { source, .. } => status_code(source),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProviderError::NotFound("diagnostic setting \"audit\"".to_string());
        assert_eq!(
            format!("{}", err),
            "Resource not found: diagnostic setting \"audit\""
        );

        let err = ProviderError::InvalidResourceId("no subscription".to_string());
        assert_eq!(format!("{}", err), "Invalid resource ID: no subscription");

        let err = ProviderError::Api {
            status: 400,
            code: "InvalidParameter".to_string(),
            message: "bad sid".to_string(),
        };
        assert_eq!(
            format!("{}", err),
            "API error (status 400, code InvalidParameter): bad sid"
        );
    }

    #[test]
    fn test_import_as_exists_guidance() {
        let err = ProviderError::import_as_exists(
            "azurerm_mssql_managed_instance_admin",
            "/subscriptions/0000/resourceGroups/rg/providers/Microsoft.Sql/managedInstances/mi/administrators/ActiveDirectory",
        );
        let msg = err.to_string();
        assert!(msg.contains("already exists"));
        assert!(msg.contains("needs to be imported into the State"));
        assert!(msg.contains("azurerm_mssql_managed_instance_admin"));
    }

    #[test]
    fn test_context_wrapping() {
        let err = ProviderError::NotFound("workspace".to_string())
            .context("retrieving Log Analytics DataSource \"perf\"");
        assert_eq!(
            err.to_string(),
            "retrieving Log Analytics DataSource \"perf\": Resource not found: workspace"
        );
        assert!(err.is_not_found());
        assert!(matches!(err.root(), ProviderError::NotFound(_)));
    }

    #[test]
    fn test_result_ext() {
        let res: Result<()> = Err(ProviderError::Unavailable("503".to_string()));
        let err = res.with_context(|| "deleting admin").unwrap_err();
        assert_eq!(err.message(), "deleting admin");
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_error_to_status() {
        let cases = vec![
            (
                ProviderError::NotFound("x".to_string()),
                tonic::Code::NotFound,
            ),
            (
                ProviderError::import_as_exists("t", "id"),
                tonic::Code::AlreadyExists,
            ),
            (
                ProviderError::InvalidResourceId("x".to_string()),
                tonic::Code::InvalidArgument,
            ),
            (
                ProviderError::OperationFailed("x".to_string()),
                tonic::Code::Internal,
            ),
            (
                ProviderError::DeadlineExceeded("x".to_string()),
                tonic::Code::DeadlineExceeded,
            ),
            (
                ProviderError::PermissionDenied("x".to_string()),
                tonic::Code::PermissionDenied,
            ),
            (
                ProviderError::ResourceExhausted("x".to_string()),
                tonic::Code::ResourceExhausted,
            ),
            (
                ProviderError::Configuration("x".to_string()),
                tonic::Code::FailedPrecondition,
            ),
            (
                ProviderError::Api {
                    status: 409,
                    code: "Conflict".to_string(),
                    message: "busy".to_string(),
                },
                tonic::Code::Aborted,
            ),
            (
                ProviderError::Api {
                    status: 500,
                    code: "InternalServerError".to_string(),
                    message: "boom".to_string(),
                },
                tonic::Code::Internal,
            ),
        ];

        for (err, code) in cases {
            let status: tonic::Status = err.into();
            assert_eq!(status.code(), code);
        }
    }

    #[test]
    fn test_context_keeps_status_code() {
        let err = ProviderError::PermissionDenied("token expired".to_string()).context("reading");
        let status: tonic::Status = err.into();
        assert_eq!(status.code(), tonic::Code::PermissionDenied);
        assert!(status.message().starts_with("reading: "));
    }
}
