//! TCP IPC client implementing [`Channel`] against an [`IpcServer`](super::IpcServer).
//!
//! # Thread Safety
//!
//! One connection carries every call and subscription. A writer task owns the
//! write half and sends queued frames whole and in order. A reader task hands
//! each response to the call waiting on its id and each event to the
//! subscription it is tagged with.
//!
//! Dropping a call future at any point is safe: its request is either queued
//! whole or not at all, and a response that arrives after the caller gave up
//! finds no waiter and is discarded. Dropping an event stream sends `unlisten`;
//! dropping the client ends all of its event streams.

use super::protocol::{read_frame, write_frame, IpcEvent, IpcRequest, IpcResponse, ServerFrame};
use crate::channel::{Channel, EventStream};
use crate::config::IpcConfig;
use crate::value::Value;
use crate::{ChannelError, Result};
use futures::StreamExt;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Why the connection is no longer usable.
#[derive(Debug, Clone)]
enum Closed {
    Lost,
    /// The server refused the connection with an error of its own.
    Refused { code: i32, message: String },
}

impl Closed {
    fn to_error(&self, addr: SocketAddr) -> ChannelError {
        match self {
            Closed::Lost => ChannelError::ConnectionLost { addr },
            Closed::Refused { code, message } => ChannelError::Remote {
                code: *code,
                message: message.clone(),
            },
        }
    }
}

/// Waiters and subscriptions keyed by request id.
#[derive(Debug, Default)]
struct ConnectionState {
    pending: HashMap<u64, oneshot::Sender<IpcResponse>>,
    subscriptions: HashMap<u64, mpsc::UnboundedSender<Value>>,
    closed: Option<Closed>,
}

type SharedState = Arc<Mutex<ConnectionState>>;

fn lock(state: &Mutex<ConnectionState>) -> MutexGuard<'_, ConnectionState> {
    state.lock().expect("ipc client lock poisoned")
}

/// Mark the connection closed. Dropping the waiters and subscription senders
/// wakes every pending call and ends every event stream.
fn close(state: &Mutex<ConnectionState>, reason: Closed) {
    let mut state = lock(state);
    if state.closed.is_none() {
        state.closed = Some(reason);
    }
    state.pending.clear();
    state.subscriptions.clear();
}

/// IPC client connected to one server channel.
#[derive(Debug)]
pub struct IpcClient {
    addr: SocketAddr,
    outgoing: mpsc::UnboundedSender<Vec<u8>>,
    state: SharedState,
    next_id: AtomicU64,
    reader_task: JoinHandle<()>,
}

impl IpcClient {
    /// Connect to an IPC server.
    ///
    /// Uses the configured connection timeout from `IpcConfig`.
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = tokio::time::timeout(IpcConfig::CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| ChannelError::Timeout(IpcConfig::CONNECT_TIMEOUT))?
            .map_err(|_| ChannelError::ConnectionLost { addr })?;

        let (reader, writer) = stream.into_split();
        let state = SharedState::default();
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();

        tokio::spawn(write_frames(writer, outgoing_rx, Arc::clone(&state)));
        let reader_task = tokio::spawn(read_frames(reader, Arc::clone(&state)));

        debug!("IPC client connected to {}", addr);

        Ok(Self {
            addr,
            outgoing,
            state,
            next_id: AtomicU64::new(1),
            reader_task,
        })
    }

    /// Get the address of the connected server.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Number of calls still waiting for a response.
    pub fn pending_calls(&self) -> usize {
        lock(&self.state).pending.len()
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn closed_error(&self) -> ChannelError {
        lock(&self.state)
            .closed
            .clone()
            .unwrap_or(Closed::Lost)
            .to_error(self.addr)
    }

    /// Send `request` and wait for the response carrying `id`.
    async fn request(&self, id: u64, request: &IpcRequest) -> Result<IpcResponse> {
        let bytes = serde_json::to_vec(request)?;
        let (tx, rx) = oneshot::channel();

        {
            let mut state = lock(&self.state);
            if let Some(closed) = &state.closed {
                return Err(closed.to_error(self.addr));
            }
            state.pending.insert(id, tx);
        }
        let _waiter = PendingCall {
            id,
            state: &self.state,
        };

        if self.outgoing.send(bytes).is_err() {
            return Err(self.closed_error());
        }
        rx.await.map_err(|_| self.closed_error())
    }
}

impl Drop for IpcClient {
    fn drop(&mut self) {
        self.reader_task.abort();
        if let Ok(mut state) = self.state.lock() {
            if state.closed.is_none() {
                state.closed = Some(Closed::Lost);
            }
            state.pending.clear();
            state.subscriptions.clear();
        }
    }
}

#[async_trait::async_trait]
impl Channel for IpcClient {
    /// Send one command and wait for its response.
    ///
    /// Errors raised by the server come back as [`ChannelError::Remote`]. A
    /// broken connection is [`ChannelError::ConnectionLost`].
    async fn call(&self, command: &str, args: Vec<Value>) -> Result<Value> {
        let id = self.next_id();
        let request = IpcRequest::call(command, args, id);
        self.request(id, &request).await?.into_result()
    }

    async fn listen(&self, event: &str) -> Result<EventStream> {
        let id = self.next_id();
        let (tx, rx) = mpsc::unbounded_channel();

        // Registered first so no event sent right after the ack is missed
        lock(&self.state).subscriptions.insert(id, tx);
        let subscription = Subscription {
            id,
            event: event.to_string(),
            outgoing: self.outgoing.clone(),
            state: Arc::clone(&self.state),
        };

        let request = IpcRequest::listen(event, id);
        self.request(id, &request).await?.into_result()?;

        debug!("IPC subscription {} to {} on {}", id, event, self.addr);

        Ok(futures::stream::unfold((rx, subscription), |(mut rx, subscription)| async move {
            rx.recv().await.map(|value| (value, (rx, subscription)))
        })
        .boxed())
    }
}

/// Removes an abandoned call's waiter.
struct PendingCall<'a> {
    id: u64,
    state: &'a Mutex<ConnectionState>,
}

impl Drop for PendingCall<'_> {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.pending.remove(&self.id);
        }
    }
}

/// Lives inside an event stream; ends the subscription when the stream goes.
struct Subscription {
    id: u64,
    event: String,
    outgoing: mpsc::UnboundedSender<Vec<u8>>,
    state: SharedState,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let active = match self.state.lock() {
            Ok(mut state) => state.subscriptions.remove(&self.id).is_some() && state.closed.is_none(),
            Err(_) => false,
        };
        if !active {
            return;
        }
        if let Ok(bytes) = serde_json::to_vec(&IpcRequest::unlisten(self.event.as_str(), self.id)) {
            let _ = self.outgoing.send(bytes);
        }
        debug!("IPC subscription {} to {} dropped", self.id, self.event);
    }
}

/// Write queued frames in order until every sender is gone or a write fails.
async fn write_frames(
    mut writer: OwnedWriteHalf,
    mut outgoing: mpsc::UnboundedReceiver<Vec<u8>>,
    state: SharedState,
) {
    while let Some(frame) = outgoing.recv().await {
        if let Err(e) = write_frame(&mut writer, &frame).await {
            debug!("IPC write failed: {}", e);
            close(&state, Closed::Lost);
            return;
        }
    }
}

/// Route incoming frames until the connection closes.
async fn read_frames(mut reader: OwnedReadHalf, state: SharedState) {
    let reason = loop {
        let bytes = match read_frame(&mut reader).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => break Closed::Lost,
            Err(e) => {
                debug!("IPC read failed: {}", e);
                break Closed::Lost;
            }
        };

        match serde_json::from_slice::<ServerFrame>(&bytes) {
            Ok(ServerFrame::Response(response)) => {
                if let Some(refused) = route_response(&state, response) {
                    break refused;
                }
            }
            Ok(ServerFrame::Event(event)) => route_event(&state, event),
            Err(e) => warn!("Discarding malformed IPC frame: {}", e),
        }
    };
    close(&state, reason);
}

/// Deliver a response to its waiter. A response without an id that carries
/// an error refuses the whole connection.
fn route_response(state: &Mutex<ConnectionState>, response: IpcResponse) -> Option<Closed> {
    let Some(id) = response.id.as_ref().and_then(serde_json::Value::as_u64) else {
        let err = response.error?;
        warn!("IPC connection refused: {}", err.message);
        return Some(Closed::Refused {
            code: err.code,
            message: err.message,
        });
    };

    let waiter = lock(state).pending.remove(&id);
    match waiter {
        Some(waiter) => {
            let _ = waiter.send(response);
        }
        None => debug!("Discarding response {} nobody is waiting for", id),
    }
    None
}

fn route_event(state: &Mutex<ConnectionState>, event: IpcEvent) {
    let Some(id) = event.id.as_u64() else {
        return;
    };
    let mut state = lock(state);
    if event.done {
        debug!("IPC subscription {} to {} ended by server", id, event.event);
        state.subscriptions.remove(&id);
        return;
    }
    let delivered = state
        .subscriptions
        .get(&id)
        .map(|tx| tx.send(event.data).is_ok());
    if delivered == Some(false) {
        state.subscriptions.remove(&id);
    }
}
