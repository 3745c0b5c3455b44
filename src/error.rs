//! Error types for the MongoDB Lens core.
//!
//! This module defines semantic error types with MongoDB server error code
//! mapping, plus the protocol-facing error codes used when a handler renders
//! a failure.

pub use mcpkit::McpError;
use mcpkit::prelude::ToolOutput;
use thiserror::Error;

/// JSON-RPC error codes reported to protocol clients.
pub mod rpc_codes {
    /// Generic server error.
    pub const SERVER_ERROR: i32 = -32000;
    /// Referenced database, collection or resource does not exist.
    pub const RESOURCE_NOT_FOUND: i32 = -32040;
    /// Caller lacks privileges for the operation.
    pub const RESOURCE_ACCESS_DENIED: i32 = -32041;
    /// The database link is down or could not be established.
    pub const CONNECTION_ERROR: i32 = -32050;
    /// A database command failed.
    pub const QUERY_ERROR: i32 = -32051;
    /// A document failed server-side schema validation.
    pub const SCHEMA_ERROR: i32 = -32052;
}

/// Domain-specific errors for the MongoDB Lens core.
///
/// Named `ServerError` to avoid collision with `mcpkit::McpError`.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Connection error
    #[error("Connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Authentication error
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Database not found
    #[error("Database '{0}' does not exist")]
    DatabaseNotFound(String),

    /// Object not found (collection, index, file, etc.)
    #[error("{object_type} '{name}' does not exist")]
    ObjectNotFound { object_type: String, name: String },

    /// Sampling returned no documents
    #[error("Collection '{0}' is empty")]
    EmptyCollection(String),

    /// Permission denied
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Query execution error
    #[error("Query execution error: {message}")]
    QueryExecution { message: String, code: Option<i32> },

    /// Document failed collection validation
    #[error("Document validation failed: {0}")]
    SchemaValidation(String),

    /// Operation timeout
    #[error("Timeout: operation exceeded {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a connection error.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection {
            message: msg.into(),
            source: None,
        }
    }

    /// Create a connection error with a source.
    pub fn connection_with_source(
        msg: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection {
            message: msg.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an authentication error.
    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    /// Create a collection-not-found error.
    pub fn collection_not_found(name: impl Into<String>) -> Self {
        Self::ObjectNotFound {
            object_type: "Collection".to_string(),
            name: name.into(),
        }
    }

    /// Create an object not found error.
    pub fn object_not_found(object_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self::ObjectNotFound {
            object_type: object_type.into(),
            name: name.into(),
        }
    }

    /// Create a permission denied error.
    pub fn permission_denied(msg: impl Into<String>) -> Self {
        Self::PermissionDenied(msg.into())
    }

    /// Create a query execution error.
    pub fn query_error(msg: impl Into<String>) -> Self {
        Self::QueryExecution {
            message: msg.into(),
            code: None,
        }
    }

    /// Create a query execution error carrying the server error code.
    pub fn query_error_with_code(msg: impl Into<String>, code: i32) -> Self {
        Self::QueryExecution {
            message: msg.into(),
            code: Some(code),
        }
    }

    /// Create a timeout error.
    pub fn timeout(timeout_ms: u64) -> Self {
        Self::Timeout { timeout_ms }
    }

    /// Create an invalid input error.
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Check if this error is transient and may succeed on retry.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Connection { .. } => true,
            Self::Timeout { .. } => true,
            Self::QueryExecution {
                code: Some(code), ..
            } => is_network_error_code(*code),
            _ => false,
        }
    }

    /// Whether the error is a missing database or collection.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::DatabaseNotFound(_) | Self::ObjectNotFound { .. }
        )
    }

    /// Whether the error is a privilege failure.
    ///
    /// Non-essential diagnostics use this to return a partial result instead
    /// of failing the whole operation.
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Self::PermissionDenied(_))
    }

    /// Whether the error means the database link itself is unusable.
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Authentication(_))
    }

    /// JSON-RPC error code for this error.
    pub fn rpc_code(&self) -> i32 {
        match self {
            Self::PermissionDenied(_) => rpc_codes::RESOURCE_ACCESS_DENIED,
            Self::Connection { .. } | Self::Authentication(_) => rpc_codes::CONNECTION_ERROR,
            Self::SchemaValidation(_) => rpc_codes::SCHEMA_ERROR,
            Self::QueryExecution { .. } | Self::Timeout { .. } => rpc_codes::QUERY_ERROR,
            Self::DatabaseNotFound(_) | Self::ObjectNotFound { .. } => {
                rpc_codes::RESOURCE_NOT_FOUND
            }
            _ => rpc_codes::SERVER_ERROR,
        }
    }

    /// Render this error as a handler result: the message as text, flagged
    /// as an error. A failed operation never takes the process down.
    pub fn to_tool_output(&self, context: &str) -> ToolOutput {
        ToolOutput::error(format!("{}: {}", context, self))
    }

    /// Get a user-friendly suggestion for how to fix this error.
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::Config(_) => Some("Check your environment variables and config file"),
            Self::Connection { .. } => {
                Some("Check the connection string, server availability and network access")
            }
            Self::Authentication(_) => Some("Verify the credentials in the connection string"),
            Self::DatabaseNotFound(_) => Some("List databases to see which ones exist"),
            Self::ObjectNotFound { .. } => Some("List collections to see which ones exist"),
            Self::EmptyCollection(_) => Some("Insert documents before analyzing the schema"),
            Self::PermissionDenied(_) => {
                Some("Request the required roles from your database administrator")
            }
            Self::SchemaValidation(_) => Some("Check the document against the collection validator"),
            Self::Timeout { .. } => Some("Narrow the operation or raise the socket timeout"),
            _ => None,
        }
    }
}

/// Map MongoDB server error codes to semantic ServerError types.
pub fn from_server_code(code: i32, message: &str) -> ServerError {
    match code {
        // Authorization
        13 => ServerError::permission_denied(message),

        // Authentication
        18 => ServerError::auth(message),

        // NamespaceNotFound
        26 => ServerError::object_not_found("Namespace", message),

        // DocumentValidationFailure
        121 => ServerError::SchemaValidation(message.to_string()),

        // MaxTimeMSExpired
        50 => ServerError::query_error_with_code(format!("Operation timed out: {}", message), code),

        code if is_network_error_code(code) => {
            ServerError::connection(format!("{} (code {})", message, code))
        }

        _ => ServerError::query_error_with_code(message, code),
    }
}

/// Check if a server error code indicates a network or topology failure.
fn is_network_error_code(code: i32) -> bool {
    matches!(
        code,
        6       // HostUnreachable
        | 7     // HostNotFound
        | 89    // NetworkTimeout
        | 91    // ShutdownInProgress
        | 189   // PrimarySteppedDown
        | 9001  // SocketException
        | 10107 // NotWritablePrimary
        | 11600 // InterruptedAtShutdown
        | 11602 // InterruptedDueToReplStateChange
        | 13435 // NotPrimaryNoSecondaryOk
    )
}

/// Convert ServerError to mcpkit's McpError for protocol responses.
///
/// Note: Tool errors should generally return `ServerError::to_tool_output()`
/// instead of using this conversion. This is primarily for protocol-level errors.
impl From<ServerError> for McpError {
    fn from(e: ServerError) -> Self {
        match e {
            ServerError::Config(msg) => McpError::invalid_request(msg),
            ServerError::InvalidInput(msg) => McpError::invalid_params("input", msg),
            ServerError::DatabaseNotFound(name) => {
                McpError::resource_not_found(format!("Database '{}' does not exist", name))
            }
            ServerError::ObjectNotFound { object_type, name } => {
                McpError::resource_not_found(format!("{} '{}' does not exist", object_type, name))
            }
            ServerError::EmptyCollection(name) => {
                McpError::invalid_params("collection", format!("Collection '{}' is empty", name))
            }
            ServerError::Connection { message, .. } => McpError::internal(message),
            ServerError::Authentication(message) => McpError::internal(message),
            ServerError::PermissionDenied(message) => McpError::internal(message),
            ServerError::SchemaValidation(message) => McpError::internal(message),
            ServerError::QueryExecution { message, .. } => McpError::internal(message),
            ServerError::Internal(message) => McpError::internal(message),
            ServerError::Timeout { timeout_ms } => {
                McpError::internal(format!("Operation timed out after {} ms", timeout_ms))
            }
        }
    }
}

impl From<mongodb::error::Error> for ServerError {
    fn from(e: mongodb::error::Error) -> Self {
        use mongodb::error::ErrorKind;

        match e.kind.as_ref() {
            ErrorKind::Command(command) => from_server_code(command.code, &command.message),
            ErrorKind::Authentication { message, .. } => ServerError::auth(message.clone()),
            ErrorKind::ServerSelection { message, .. } => {
                ServerError::connection(format!("Server selection failed: {}", message))
            }
            ErrorKind::Io(io) => {
                ServerError::connection_with_source(format!("IO error: {}", io), e.clone())
            }
            ErrorKind::ConnectionPoolCleared { message, .. } => {
                ServerError::connection(format!("Connection pool cleared: {}", message))
            }
            ErrorKind::DnsResolve { message, .. } => {
                ServerError::connection(format!("DNS resolution failed: {}", message))
            }
            ErrorKind::InvalidArgument { message, .. } => ServerError::invalid_input(message.clone()),
            _ => ServerError::query_error(e.to_string()),
        }
    }
}
