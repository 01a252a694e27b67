//! MCP Error Handling
//!
//! Classifies failures into JSON-RPC error objects. Every error carries
//! `data.kind` so clients can tell a missing project header from a busy
//! store or a timeout without parsing messages.

use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

use crate::CodeRagError;
use crate::mcp::protocol::*;

#[derive(Error, Debug)]
pub enum McpError {
    #[error("JSON-RPC parse error: {message}")]
    ParseError { message: String },

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Method not found: {method}")]
    MethodNotFound { method: String },

    #[error("Invalid parameters: {message}")]
    InvalidParameters { message: String },

    #[error("Internal error: {message}")]
    InternalError { message: String },

    #[error("Server error: {message}")]
    ServerError { message: String },

    #[error("Tool not found: {name}")]
    ToolNotFound { name: String },

    #[error("Invalid arguments for tool '{tool}': {message}")]
    InvalidToolArguments { tool: String, message: String },

    #[error("Error executing {tool}: {message}")]
    ToolExecutionFailed {
        tool: String,
        message: String,
        kind: &'static str,
    },

    #[error("{message}")]
    Configuration { message: String },

    #[error("{message}")]
    ResourceBusy { message: String },

    #[error("{message}")]
    Timeout { message: String },
}

impl McpError {
    /// Classify an error raised while running `tool`
    #[inline]
    pub fn from_tool_error(tool: &str, error: CodeRagError) -> Self {
        match error {
            CodeRagError::Config(message) => Self::Configuration { message },
            CodeRagError::ResourceBusy { .. } => Self::ResourceBusy {
                message: error.to_string(),
            },
            CodeRagError::Timeout(_) => Self::Timeout {
                message: error.to_string(),
            },
            CodeRagError::Protocol(message) => Self::InvalidToolArguments {
                tool: tool.to_string(),
                message,
            },
            other => Self::ToolExecutionFailed {
                tool: tool.to_string(),
                kind: other.kind(),
                message: other.to_string(),
            },
        }
    }

    /// Machine-readable kind reported in `data.kind`
    #[inline]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ParseError { .. } => "parse",
            Self::InvalidRequest { .. } => "invalid_request",
            Self::MethodNotFound { .. } => "method_not_found",
            Self::InvalidParameters { .. } | Self::InvalidToolArguments { .. } => "protocol",
            Self::InternalError { .. } | Self::ServerError { .. } => "internal",
            Self::ToolNotFound { .. } => "tool_not_found",
            Self::ToolExecutionFailed { kind, .. } => *kind,
            Self::Configuration { .. } => "configuration",
            Self::ResourceBusy { .. } => "resource_busy",
            Self::Timeout { .. } => "timeout",
        }
    }

    #[inline]
    pub fn code(&self) -> i32 {
        match self {
            Self::ParseError { .. } => error_codes::PARSE_ERROR,
            Self::InvalidRequest { .. } => error_codes::INVALID_REQUEST,
            Self::MethodNotFound { .. } => error_codes::METHOD_NOT_FOUND,
            Self::InvalidParameters { .. } => error_codes::INVALID_PARAMS,
            Self::InternalError { .. } => error_codes::INTERNAL_ERROR,
            Self::ServerError { .. } => mcp_error_codes::SERVER_ERROR,
            Self::ToolNotFound { .. } => mcp_error_codes::TOOL_NOT_FOUND,
            Self::InvalidToolArguments { .. } => mcp_error_codes::INVALID_TOOL_ARGUMENTS,
            Self::ToolExecutionFailed { .. } => mcp_error_codes::TOOL_EXECUTION_FAILED,
            Self::Configuration { .. } => mcp_error_codes::CONFIGURATION,
            Self::ResourceBusy { .. } => mcp_error_codes::RESOURCE_BUSY,
            Self::Timeout { .. } => mcp_error_codes::TIMEOUT,
        }
    }

    /// Convert MCP error to JSON-RPC error
    #[inline]
    pub fn to_jsonrpc_error(&self) -> JsonRpcError {
        JsonRpcError::new(
            self.code(),
            self.to_string(),
            Some(json!({ "kind": self.kind() })),
        )
    }

    /// Create error response message
    #[inline]
    pub fn to_error_response(&self, id: Option<RequestId>) -> JsonRpcMessage {
        JsonRpcMessage::ErrorResponse(JsonRpcErrorResponse::new(self.to_jsonrpc_error(), id))
    }

    /// Log the error with appropriate level
    #[inline]
    pub fn log(&self) {
        match self {
            Self::InternalError { .. } | Self::ServerError { .. } | Self::ToolExecutionFailed { .. } => {
                error!("Server error: {}", self);
            }
            _ => {
                warn!("Client error: {}", self);
            }
        }
    }
}

/// Result type for MCP operations
pub type McpResult<T> = Result<T, McpError>;

impl From<serde_json::Error> for McpError {
    #[inline]
    fn from(error: serde_json::Error) -> Self {
        Self::InternalError {
            message: error.to_string(),
        }
    }
}

impl From<jsonschema::ValidationError<'_>> for McpError {
    #[inline]
    fn from(error: jsonschema::ValidationError<'_>) -> Self {
        Self::InternalError {
            message: format!("Invalid tool schema at {}: {}", error.instance_path, error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn tool_not_found_error() {
        let error = McpError::ToolNotFound {
            name: "test_tool".to_string(),
        };

        let jsonrpc_error = error.to_jsonrpc_error();
        assert_eq!(jsonrpc_error.code, mcp_error_codes::TOOL_NOT_FOUND);
        assert!(jsonrpc_error.message.contains("test_tool"));
        assert_eq!(jsonrpc_error.data, Some(json!({"kind": "tool_not_found"})));
    }

    #[test]
    fn domain_errors_get_dedicated_codes() {
        let config = McpError::from_tool_error(
            "search_code",
            CodeRagError::Config("No project configured".to_string()),
        );
        assert_eq!(config.code(), mcp_error_codes::CONFIGURATION);
        assert_eq!(config.kind(), "configuration");

        let busy = McpError::from_tool_error(
            "index_directory",
            CodeRagError::ResourceBusy {
                store: PathBuf::from("/p/.code-rag"),
                holder_pid: 42,
            },
        );
        assert_eq!(busy.code(), mcp_error_codes::RESOURCE_BUSY);
        assert!(busy.to_string().contains("42"));

        let timeout = McpError::from_tool_error("search_all", CodeRagError::Timeout("query".to_string()));
        assert_eq!(timeout.code(), mcp_error_codes::TIMEOUT);
        assert_eq!(timeout.kind(), "timeout");
    }

    #[test]
    fn malformed_arguments_map_to_invalid_tool_arguments() {
        let error = McpError::from_tool_error(
            "search_code",
            CodeRagError::Protocol("query must not be empty".to_string()),
        );
        assert_eq!(error.code(), mcp_error_codes::INVALID_TOOL_ARGUMENTS);
        assert_eq!(error.kind(), "protocol");
    }

    #[test]
    fn other_failures_keep_their_kind() {
        let error = McpError::from_tool_error(
            "search_docs",
            CodeRagError::Embedding("model unavailable".to_string()),
        );
        assert_eq!(error.code(), mcp_error_codes::TOOL_EXECUTION_FAILED);
        assert_eq!(error.kind(), "embedding");
        assert!(error.to_string().starts_with("Error executing search_docs"));
    }

    #[test]
    fn error_response_creation() {
        let error = McpError::InternalError {
            message: "test error".to_string(),
        };

        let response = error.to_error_response(Some(RequestId::String("test".to_string())));

        if let JsonRpcMessage::ErrorResponse(err_resp) = response {
            assert_eq!(err_resp.error.code, error_codes::INTERNAL_ERROR);
            assert!(err_resp.error.message.contains("test error"));
        } else {
            panic!("Expected error response");
        }
    }
}
