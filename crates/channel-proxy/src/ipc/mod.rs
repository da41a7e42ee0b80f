//! Local IPC transport for channels.
//!
//! Provides a lightweight TCP-based transport so a [`ServerChannel`] in one
//! process can be reached as a [`Channel`] from another. Uses length-prefixed
//! JSON-RPC 2.0 over `127.0.0.1` TCP connections.
//!
//! # Architecture
//!
//! - **Server**: Exposes one server channel, accepts connections, dispatches calls and subscriptions
//! - **Client**: Connects to a server and implements [`Channel`]; calls and
//!   subscriptions share one connection
//! - **Protocol**: Shared framing and JSON-RPC types used by both
//!
//! [`ServerChannel`]: crate::channel::ServerChannel
//! [`Channel`]: crate::channel::Channel

pub mod client;
pub mod protocol;
pub mod server;

pub use client::IpcClient;
pub use protocol::{IpcEvent, IpcRequest, IpcResponse, RequestKind, ServerFrame};
pub use server::{IpcServer, IpcServerHandle};
