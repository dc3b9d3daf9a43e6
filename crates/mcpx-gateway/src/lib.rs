//! mcpx-gateway - Backend aggregation for the mcpx proxy
//!
//! Brings each configured backend through start, handshake and capability
//! discovery, filters and registers what it offers, and assembles the
//! backends that made it into a [`Fleet`] ready to be mounted.

pub mod filter;
pub mod orchestrator;
pub mod session;
pub mod sync;

pub use filter::{FilterDecision, FilterMode, ToolFilterPolicy};
pub use orchestrator::{Fleet, Orchestrator, ShutdownHook};
pub use session::{BackendSession, SessionState, KEEPALIVE_INTERVAL};
pub use sync::{collect_pages, sync_capabilities};
