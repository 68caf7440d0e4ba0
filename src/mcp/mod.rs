pub mod client;
pub mod registry;

pub use client::{McpClient, McpError};
pub use registry::McpRegistry;
