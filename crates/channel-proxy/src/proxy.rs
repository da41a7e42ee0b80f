//! Client-side call proxy.
//!
//! [`ChannelProxy`] turns method access into remote invocations over a
//! [`Channel`]. Any name yields a [`RemoteMethod`]; invoking it sends one
//! command carrying the configured context (if any) ahead of the call's own
//! arguments, and revives the result before handing it back.
//!
//! Typed clients wrap a proxy and implement the same trait as the local
//! service, so call sites look identical either way.

use crate::channel::{Channel, EventStream};
use crate::context::ContextEnvelope;
use crate::revive::Revivers;
use crate::value::{self, Value};
use crate::{ChannelError, Result};
use futures::StreamExt;
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Key used to access a member of a proxy.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PropertyKey {
    /// A method name; the only key a proxy answers.
    Name(String),
    /// An opaque symbol-like key (iteration, type inspection, ...).
    Symbol(String),
    /// A numeric index.
    Index(usize),
}

impl From<&str> for PropertyKey {
    fn from(name: &str) -> Self {
        PropertyKey::Name(name.to_string())
    }
}

impl From<String> for PropertyKey {
    fn from(name: String) -> Self {
        PropertyKey::Name(name)
    }
}

impl From<usize> for PropertyKey {
    fn from(index: usize) -> Self {
        PropertyKey::Index(index)
    }
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyKey::Name(name) => f.write_str(name),
            PropertyKey::Symbol(description) => write!(f, "Symbol({})", description),
            PropertyKey::Index(index) => write!(f, "{}", index),
        }
    }
}

/// A service-shaped handle backed by a live channel.
#[derive(Clone)]
pub struct ChannelProxy {
    channel: Arc<dyn Channel>,
    context: Option<ContextEnvelope>,
    revivers: Revivers,
    revive_results: bool,
}

impl ChannelProxy {
    pub fn new(channel: Arc<dyn Channel>) -> Self {
        Self::with_context(channel, None)
    }

    /// A proxy that sends `context` ahead of every call's arguments.
    pub fn with_context(channel: Arc<dyn Channel>, context: Option<Value>) -> Self {
        Self {
            channel,
            context: ContextEnvelope::wrap(context),
            revivers: Revivers::standard().clone(),
            revive_results: true,
        }
    }

    /// Choose whether call results and event payloads are revived (default: on).
    pub fn with_result_revival(mut self, enabled: bool) -> Self {
        self.revive_results = enabled;
        self
    }

    pub fn with_revivers(mut self, revivers: Revivers) -> Self {
        self.revivers = revivers;
        self
    }

    /// The configured context, if any.
    pub fn context(&self) -> Option<&Value> {
        self.context.as_ref().map(ContextEnvelope::payload)
    }

    /// Resolve a member. Only names resolve; every other key fails immediately.
    pub fn get(&self, key: impl Into<PropertyKey>) -> Result<RemoteMethod<'_>> {
        match key.into() {
            PropertyKey::Name(name) => Ok(RemoteMethod { proxy: self, name }),
            other => Err(ChannelError::UnsupportedProxyProperty {
                property: other.to_string(),
            }),
        }
    }

    /// Shorthand for `get(name)?.invoke(args)`.
    pub async fn call(&self, name: &str, args: Vec<Value>) -> Result<Value> {
        self.get(name)?.invoke(args).await
    }

    /// Call and decode the revived result into `T`.
    pub async fn call_as<T: DeserializeOwned>(&self, name: &str, args: Vec<Value>) -> Result<T> {
        value::from_value(self.call(name, args).await?)
    }

    /// Subscribe to an event on the channel. Subscriptions carry no context.
    pub async fn listen(&self, event: &str) -> Result<EventStream> {
        let stream = self.channel.listen(event).await?;
        if !self.revive_results {
            return Ok(stream);
        }
        let revivers = self.revivers.clone();
        Ok(stream.map(move |value| revivers.revive(value)).boxed())
    }

    fn outgoing(&self, args: Vec<Value>) -> Vec<Value> {
        match &self.context {
            Some(envelope) => {
                let mut outgoing = Vec::with_capacity(args.len() + 1);
                outgoing.push(envelope.to_value());
                outgoing.extend(args);
                outgoing
            }
            None => args,
        }
    }
}

impl fmt::Debug for ChannelProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelProxy")
            .field("context", &self.context())
            .field("revive_results", &self.revive_results)
            .finish()
    }
}

/// A forwarding callable for one remote command.
#[derive(Debug, Clone)]
pub struct RemoteMethod<'a> {
    proxy: &'a ChannelProxy,
    name: String,
}

impl RemoteMethod<'_> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Send the command and await its (revived) result.
    pub async fn invoke(&self, args: Vec<Value>) -> Result<Value> {
        let outgoing = self.proxy.outgoing(args);
        debug!("Calling {} with {} argument(s)", self.name, outgoing.len());

        let result = self.proxy.channel.call(&self.name, outgoing).await?;
        if self.proxy.revive_results {
            Ok(self.proxy.revivers.revive(result))
        } else {
            Ok(result)
        }
    }
}
