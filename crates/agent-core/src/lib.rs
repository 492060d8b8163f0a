//! Envelope protocol, `Agent` trait, and shared error/type definitions used
//! by every transport, middleware decorator, and composition pattern in the
//! fabric.
//!
//! This crate has no knowledge of sockets, HTTP, or gRPC — it only defines
//! the wire shape (`Envelope`), the payload types carried inside it
//! (`Message`, `ToolResult`), the error taxonomy, and the `Agent` trait that
//! every other crate in the workspace implements or decorates.

mod agent;
mod endpoint;
mod envelope;
mod error;
mod types;

pub use agent::{Agent, MessageStream};
pub use endpoint::Endpoint;
pub use envelope::{Envelope, EnvelopeKind, MAX_MESSAGE_SIZE, PROTOCOL_VERSION};
pub use error::{AgentError, ErrorDetails, ProtocolError, ProtocolErrorCode, RemoteExecutionError};
pub use types::{Message, Metadata, ToolResult};
