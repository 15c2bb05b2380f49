// lib: OBEX session library for clients, servers and integration tests
// Drives the protocol state machine over any transport binding

// Re-export core protocol and types
pub use obex_core::*;

// Re-export transport abstractions
pub use obex_transport::*;

pub use obex_buffer::ByteBuffer;

pub mod config;
pub mod error;
pub mod event;
pub mod session;

pub use config::*;
pub use error::*;
pub use event::*;
pub use session::*;
