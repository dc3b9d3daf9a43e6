//! HTTP handlers for the MCP transports

pub mod sse;
pub mod streamable;
