//! Shared data models for backends and the front door

mod capability;
mod handshake;
mod page;

pub use capability::*;
pub use handshake::*;
pub use page::*;
