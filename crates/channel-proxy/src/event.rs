//! Push-style event sources adapted to the channel's listen contract.
//!
//! [`Emitter`] fans each fired value out to every live subscriber.
//! [`BufferedEvent`] wraps a source stream so nothing fired before the first
//! subscriber attaches is lost: that subscriber receives the backlog, in
//! order, before any live value. Later subscribers only see live values.

use crate::channel::EventStream;
use crate::value::Value;
use crate::{ChannelError, Result};
use futures::channel::mpsc::{unbounded, UnboundedSender};
use futures::{FutureExt, StreamExt};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Fan-out event source.
#[derive(Default)]
pub struct Emitter {
    listeners: Mutex<Vec<UnboundedSender<Value>>>,
}

impl Emitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to every value fired from now on.
    pub fn subscribe(&self) -> EventStream {
        let (tx, rx) = unbounded();
        self.listeners
            .lock()
            .expect("emitter lock poisoned")
            .push(tx);
        rx.boxed()
    }

    /// Deliver `value` to all live subscribers, dropping closed ones.
    pub fn fire(&self, value: impl Into<Value>) {
        let value = value.into();
        let mut listeners = self.listeners.lock().expect("emitter lock poisoned");
        listeners.retain(|tx| tx.unbounded_send(value.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        let mut listeners = self.listeners.lock().expect("emitter lock poisoned");
        listeners.retain(|tx| !tx.is_closed());
        listeners.len()
    }
}

struct BufferState {
    /// Source stream, held until the first subscriber arrives.
    source: Option<EventStream>,
    subscribers: Vec<UnboundedSender<Value>>,
    /// Set once the source has ended.
    closed: bool,
}

/// An event stream that replays its backlog to the first subscriber.
///
/// The source is consumed from construction, so anything it yields before
/// [`BufferedEvent::subscribe`] is first called queues up instead of being
/// dropped. Relaying live values after that runs on a tokio task, so the
/// first [`subscribe`](BufferedEvent::subscribe) must happen inside a runtime.
pub struct BufferedEvent {
    name: String,
    state: Arc<Mutex<BufferState>>,
}

impl BufferedEvent {
    pub fn new(name: impl Into<String>, source: EventStream) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(BufferState {
                source: Some(source),
                subscribers: Vec::new(),
                closed: false,
            })),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Attach a subscriber.
    ///
    /// Fails with [`ChannelError::NoRuntime`] when the first subscriber
    /// arrives outside a tokio runtime; the backlog is kept for a later try.
    pub fn subscribe(&self) -> Result<EventStream> {
        let (tx, rx) = unbounded();
        let mut state = self.state.lock().expect("buffer lock poisoned");

        if state.source.is_some() && tokio::runtime::Handle::try_current().is_err() {
            return Err(ChannelError::NoRuntime {
                event: self.name.clone(),
            });
        }

        if let Some(mut source) = state.source.take() {
            // First subscriber: hand over the backlog before going live.
            let mut replayed = 0usize;
            let mut ended = false;
            loop {
                match source.next().now_or_never() {
                    Some(Some(value)) => {
                        let _ = tx.unbounded_send(value);
                        replayed += 1;
                    }
                    Some(None) => {
                        ended = true;
                        break;
                    }
                    None => break,
                }
            }
            debug!("Replayed {} buffered {} event(s)", replayed, self.name);

            if ended {
                state.closed = true;
            } else {
                state.subscribers.push(tx);
                tokio::spawn(relay(source, Arc::clone(&self.state)));
            }
        } else if !state.closed {
            state.subscribers.push(tx);
        }

        Ok(rx.boxed())
    }
}

async fn relay(mut source: EventStream, state: Arc<Mutex<BufferState>>) {
    while let Some(value) = source.next().await {
        let mut state = state.lock().expect("buffer lock poisoned");
        state
            .subscribers
            .retain(|tx| tx.unbounded_send(value.clone()).is_ok());
    }
    // Source ended: dropping the senders ends every subscriber stream.
    let mut state = state.lock().expect("buffer lock poisoned");
    state.closed = true;
    state.subscribers.clear();
}
