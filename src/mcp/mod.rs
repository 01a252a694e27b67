//! MCP (Model Context Protocol) Server Implementation
//!
//! JSON-RPC 2.0 tool server for semantic code search, served over a
//! streamable HTTP transport (one process, many projects) or stdio (one
//! project per process).

#[cfg(test)]
mod tests;

pub mod context;
pub mod errors;
pub mod http;
pub mod protocol;
pub mod server;
pub mod session;
pub mod tools;
pub mod validation;

pub use context::{AppContext, PROJECT_ROOT_ENV, PROJECT_ROOT_HEADER, ProjectContext};
pub use errors::{McpError, McpResult};
pub use server::McpServer;
pub use session::SessionStore;
