//! Error types for the protocol engine

use thiserror::Error;

use crate::wire::ErrorDetails;

pub type Result<T> = std::result::Result<T, ServerError>;

/// Failures raised by protocol-layer operations.
///
/// Component operations fail outward; the message pump converts any
/// `ServerError` into a wire error response at the dispatch boundary.
/// `Io` is the one variant that is never sent to the client — it means
/// the transport itself is gone.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    #[error("The first request on a connection must be a connect request")]
    HandshakeRequired,

    #[error("A client with UUID '{0}' is already connected")]
    AlreadyConnected(String),

    #[error("Authentication failed for user '{0}'")]
    BadCredentials(String),

    #[error("Client API version {0}.{1} is incompatible with server")]
    IncompatibleVersion(u32, u32),

    #[error("No client registered under UUID '{0}'")]
    NotRegistered(String),

    #[error("Statement {0} not found")]
    StatementNotFound(u64),

    #[error("Statement {0} is not a prepared statement of the required kind")]
    NotPrepared(u64),

    #[error("Expected {expected} parameter values, got {actual}")]
    ParameterCountMismatch { expected: usize, actual: usize },

    #[error("Missing value for named parameter ':{0}'")]
    MissingParameter(String),

    #[error("Statement {0} has no open result cursor")]
    NoOpenCursor(u64),

    #[error("Namespace '{0}' not found")]
    UnknownNamespace(String),

    /// Failure surfaced by the external query processor. Provider code and
    /// state pass through to the wire when present.
    #[error("Execution failed: {message}")]
    Execution {
        message: String,
        code: Option<String>,
        state: Option<String>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    /// Stable error code for the wire protocol.
    pub fn code(&self) -> &'static str {
        match self {
            ServerError::MalformedRequest(_) => "MALFORMED_REQUEST",
            ServerError::HandshakeRequired => "HANDSHAKE_REQUIRED",
            ServerError::AlreadyConnected(_) => "ALREADY_CONNECTED",
            ServerError::BadCredentials(_) => "BAD_CREDENTIALS",
            ServerError::IncompatibleVersion(_, _) => "INCOMPATIBLE_VERSION",
            ServerError::NotRegistered(_) => "NOT_REGISTERED",
            ServerError::StatementNotFound(_) => "STATEMENT_NOT_FOUND",
            ServerError::NotPrepared(_) => "NOT_PREPARED",
            ServerError::ParameterCountMismatch { .. } => "PARAMETER_COUNT_MISMATCH",
            ServerError::MissingParameter(_) => "MISSING_PARAMETER",
            ServerError::NoOpenCursor(_) => "NO_OPEN_CURSOR",
            ServerError::UnknownNamespace(_) => "UNKNOWN_NAMESPACE",
            ServerError::Execution { code, .. } => {
                // Provider codes are dynamic; the generic bucket is used
                // when the processor attached none.
                if code.is_some() { "PROVIDER_ERROR" } else { "EXECUTION_ERROR" }
            }
            ServerError::Io(_) => "IO_ERROR",
        }
    }

    /// Whether this failure ends the connection rather than producing an
    /// error response on a still-healthy session. The pump consults this
    /// after writing the error response.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ServerError::MalformedRequest(_)
                | ServerError::HandshakeRequired
                | ServerError::IncompatibleVersion(_, _)
                | ServerError::Io(_)
        )
    }

    /// Convert into the wire error payload. Partial update counts (batch
    /// failures) are attached by the statement manager before mapping.
    pub fn to_details(&self) -> ErrorDetails {
        match self {
            ServerError::Execution { message, code, state } => ErrorDetails {
                message: message.clone(),
                code: code.clone().or_else(|| Some(self.code().to_string())),
                state: state.clone(),
                update_counts: None,
            },
            other => ErrorDetails {
                message: other.to_string(),
                code: Some(other.code().to_string()),
                state: None,
                update_counts: None,
            },
        }
    }
}
