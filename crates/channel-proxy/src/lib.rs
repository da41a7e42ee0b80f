//! Channel Proxy - forward service method calls across named channels.
//!
//! A process exposes a plain service as a [`ServerChannel`]; another process
//! holds a [`Channel`] to it and calls methods through a [`ChannelProxy`] as
//! if the service were local. Structured values such as [`Uri`] cross the
//! boundary as plain data and are revived on arrival, and a proxy can carry
//! an implicit context (for example the calling window's id) ahead of every
//! call's own arguments.
//!
//! # Example
//!
//! ```rust,ignore
//! use channel_proxy::{ChannelProxy, IpcClient, IpcServer, ServiceProxyChannel, Value};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> channel_proxy::Result<()> {
//!     let channel = ServiceProxyChannel::builder(Arc::new(Greeter))
//!         .method("greet", greet)
//!         .build();
//!     let server = IpcServer::start(Arc::new(channel)).await?;
//!
//!     let client = IpcClient::connect(server.addr()).await?;
//!     let proxy = ChannelProxy::new(Arc::new(client));
//!     let reply = proxy.call("greet", vec![Value::from("world")]).await?;
//!     println!("{:?}", reply);
//!
//!     Ok(())
//! }
//! ```

pub mod channel;
pub mod config;
pub mod context;
pub mod error;
pub mod event;
pub mod ipc;
pub mod native_host;
pub mod proxy;
pub mod revive;
pub mod service;
pub mod value;
pub mod windows;

// Re-export commonly used types
pub use channel::{Channel, EventStream, InProcessChannel, ServerChannel};
pub use context::{Argument, ContextEnvelope};
pub use error::{ChannelError, Result};
pub use event::{BufferedEvent, Emitter};
pub use ipc::{IpcClient, IpcServer, IpcServerHandle};
pub use native_host::{native_host_channel, HostService, LocalNativeHost, NativeHostClient, NativeHostService};
pub use proxy::{ChannelProxy, PropertyKey, RemoteMethod};
pub use revive::{revive, revive_all, Reviver, Revivers};
pub use service::{Arguments, ServiceProxyChannel, ServiceProxyChannelBuilder};
pub use value::{Map, RegExp, Uri, Value};
pub use windows::{
    LocalWindowsService, Recent, RecentlyOpened, WindowEvent, WindowEventSource, WindowsChannel,
    WindowsClient, WindowsCommand, WindowsService, WorkspaceIdentifier,
};
