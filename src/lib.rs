pub mod agentic;
pub mod auth;
pub mod cli;
pub mod config;
pub mod llm;
pub mod logging;
pub mod mcp;
