//! The channel contract both sides of a connection are written against.
//!
//! [`Channel`] is what a caller holds: invoke a named command, subscribe to a
//! named event. [`ServerChannel`] is what a process exposes. A transport joins
//! the two; [`InProcessChannel`] does so without leaving the process, but still
//! marshals through JSON so the server sees exactly what a remote peer would.

use crate::value::Value;
use crate::Result;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::sync::Arc;

/// Live stream of event payloads. Dropping it unsubscribes.
pub type EventStream = BoxStream<'static, Value>;

/// Client side of a channel.
#[async_trait::async_trait]
pub trait Channel: Send + Sync {
    /// Invoke `command` with positional arguments.
    async fn call(&self, command: &str, args: Vec<Value>) -> Result<Value>;

    /// Subscribe to `event`.
    async fn listen(&self, event: &str) -> Result<EventStream>;
}

/// Server side of a channel.
#[async_trait::async_trait]
pub trait ServerChannel: Send + Sync + 'static {
    /// Handle one command with plain, unrevived arguments.
    async fn call(&self, command: &str, args: Vec<Value>) -> Result<Value>;

    /// Open a stream for `event`, or fail immediately.
    fn listen(&self, event: &str) -> Result<EventStream>;
}

/// A [`Channel`] that calls a [`ServerChannel`] in the same process.
#[derive(Clone)]
pub struct InProcessChannel {
    server: Arc<dyn ServerChannel>,
}

impl InProcessChannel {
    pub fn new(server: Arc<dyn ServerChannel>) -> Self {
        Self { server }
    }

    fn marshal(value: Value) -> Value {
        Value::from(serde_json::Value::from(value))
    }
}

#[async_trait::async_trait]
impl Channel for InProcessChannel {
    async fn call(&self, command: &str, args: Vec<Value>) -> Result<Value> {
        let args = args.into_iter().map(Self::marshal).collect();
        let result = self.server.call(command, args).await?;
        Ok(Self::marshal(result))
    }

    async fn listen(&self, event: &str) -> Result<EventStream> {
        let stream = self.server.listen(event)?;
        Ok(stream.map(Self::marshal).boxed())
    }
}
