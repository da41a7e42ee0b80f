//! Expose a plain service over a [`ServerChannel`].
//!
//! The adapter owns an explicit command table built once at construction:
//! each command name maps to a handler that receives the shared service and
//! the call's [`Arguments`]. Calling an unregistered name fails with
//! [`ChannelError::MethodNotFound`].
//!
//! ```rust,ignore
//! let channel = ServiceProxyChannel::builder(Arc::new(Greeter))
//!     .method("greet", greet)
//!     .build();
//!
//! async fn greet(service: Arc<Greeter>, args: Arguments) -> Result<Value> {
//!     Ok(Value::from(service.greet(&args.string(0)?)))
//! }
//! ```
//!
//! Before a handler runs, a leading context envelope is replaced by its
//! payload and every argument is revived. Results are returned as-is; the
//! caller revives them after they cross the boundary.

use crate::channel::{EventStream, ServerChannel};
use crate::context::Argument;
use crate::revive::Revivers;
use crate::value::{self, Uri, Value};
use crate::{ChannelError, Result};
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

type Handler<S> = Arc<dyn Fn(Arc<S>, Arguments) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// Positional arguments of one call, already context-substituted and revived.
#[derive(Debug, Clone)]
pub struct Arguments {
    command: String,
    values: Vec<Value>,
}

impl Arguments {
    pub fn new(command: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            command: command.into(),
            values,
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The argument at `index`; missing positions are an error.
    pub fn value(&self, index: usize) -> Result<&Value> {
        self.values
            .get(index)
            .ok_or_else(|| ChannelError::invalid_param(&self.command, index, "missing"))
    }

    /// The argument at `index`, treating missing and null alike.
    pub fn optional(&self, index: usize) -> Option<&Value> {
        self.values.get(index).filter(|v| !v.is_null())
    }

    pub fn string(&self, index: usize) -> Result<String> {
        let value = self.value(index)?;
        value
            .as_str()
            .map(String::from)
            .ok_or_else(|| self.mismatch(index, "string", value))
    }

    pub fn bool(&self, index: usize) -> Result<bool> {
        let value = self.value(index)?;
        value
            .as_bool()
            .ok_or_else(|| self.mismatch(index, "bool", value))
    }

    pub fn u64(&self, index: usize) -> Result<u64> {
        let value = self.value(index)?;
        value
            .as_u64()
            .ok_or_else(|| self.mismatch(index, "unsigned integer", value))
    }

    pub fn array(&self, index: usize) -> Result<&[Value]> {
        let value = self.value(index)?;
        value
            .as_array()
            .map(Vec::as_slice)
            .ok_or_else(|| self.mismatch(index, "array", value))
    }

    pub fn uri(&self, index: usize) -> Result<Uri> {
        Uri::revive(self.value(index)?.clone())
            .map_err(|e| ChannelError::invalid_param(&self.command, index, e))
    }

    /// Deserialize the argument at `index` into `T`.
    pub fn decode<T: DeserializeOwned>(&self, index: usize) -> Result<T> {
        value::from_value(self.value(index)?.clone())
            .map_err(|e| ChannelError::invalid_param(&self.command, index, e))
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    fn mismatch(&self, index: usize, expected: &str, actual: &Value) -> ChannelError {
        ChannelError::invalid_param(
            &self.command,
            index,
            format!("expected {}, got {}", expected, actual.kind()),
        )
    }
}

/// A [`ServerChannel`] that forwards commands to a service's registered handlers.
pub struct ServiceProxyChannel<S> {
    service: Arc<S>,
    handlers: HashMap<String, Handler<S>>,
    revivers: Revivers,
}

impl<S: Send + Sync + 'static> ServiceProxyChannel<S> {
    pub fn builder(service: Arc<S>) -> ServiceProxyChannelBuilder<S> {
        ServiceProxyChannelBuilder {
            service,
            handlers: HashMap::new(),
            revivers: Revivers::standard().clone(),
        }
    }

    pub fn service(&self) -> &Arc<S> {
        &self.service
    }

    /// Registered command names, sorted.
    pub fn commands(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn has_command(&self, command: &str) -> bool {
        self.handlers.contains_key(command)
    }
}

/// Builder registering the command table of a [`ServiceProxyChannel`].
pub struct ServiceProxyChannelBuilder<S> {
    service: Arc<S>,
    handlers: HashMap<String, Handler<S>>,
    revivers: Revivers,
}

impl<S: Send + Sync + 'static> ServiceProxyChannelBuilder<S> {
    /// Route `name` to `handler`. Registering a name twice keeps the last handler.
    pub fn method<F, Fut>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Arc<S>, Arguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let boxed: Handler<S> = Arc::new(
            move |service: Arc<S>, args: Arguments| -> BoxFuture<'static, Result<Value>> {
                Box::pin(handler(service, args))
            },
        );
        self.handlers.insert(name.into(), boxed);
        self
    }

    /// Replace the reviver set applied to incoming arguments.
    pub fn revivers(mut self, revivers: Revivers) -> Self {
        self.revivers = revivers;
        self
    }

    pub fn build(self) -> ServiceProxyChannel<S> {
        ServiceProxyChannel {
            service: self.service,
            handlers: self.handlers,
            revivers: self.revivers,
        }
    }
}

#[async_trait::async_trait]
impl<S: Send + Sync + 'static> ServerChannel for ServiceProxyChannel<S> {
    async fn call(&self, command: &str, mut args: Vec<Value>) -> Result<Value> {
        let Some(handler) = self.handlers.get(command) else {
            warn!("Method not found: {}", command);
            return Err(ChannelError::MethodNotFound {
                command: command.to_string(),
            });
        };

        if let Some(first) = args.first_mut() {
            *first = Argument::classify(std::mem::take(first)).into_value();
        }
        self.revivers.revive_all(&mut args);

        debug!("Dispatching {} with {} argument(s)", command, args.len());
        handler(Arc::clone(&self.service), Arguments::new(command, args)).await
    }

    fn listen(&self, event: &str) -> Result<EventStream> {
        Err(ChannelError::EventsUnsupported {
            event: event.to_string(),
        })
    }
}
