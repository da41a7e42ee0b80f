//! TCP IPC server exposing one [`ServerChannel`].
//!
//! Listens on a local address (port 0 lets the OS choose), accepts
//! connections, and hands each request to the server channel. Every
//! connection is handled in its own spawned task, and every call on it runs
//! in a task of its own, so a slow call never holds up the ones behind it.
//! Responses and event frames are queued to a single writer task per
//! connection.
//!
//! A `listen` request starts a subscription that forwards event frames,
//! tagged with the request id, until the client sends `unlisten`, the source
//! ends, the peer disconnects, or the server shuts down.

use super::protocol::{read_frame, write_frame, IpcEvent, IpcRequest, IpcResponse, RequestKind};
use crate::channel::{EventStream, ServerChannel};
use crate::config::IpcConfig;
use crate::{ChannelError, Result};
use futures::{FutureExt, StreamExt};
use serde::Serialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

type Outgoing = mpsc::UnboundedSender<Vec<u8>>;

/// Handle to a running IPC server. Dropping shuts down the server.
pub struct IpcServerHandle {
    pub addr: SocketAddr,
    pub port: u16,
    shutdown_tx: Option<oneshot::Sender<()>>,
    conn_shutdown_tx: watch::Sender<bool>,
    task_handle: Option<tokio::task::JoinHandle<()>>,
}

impl IpcServerHandle {
    /// Get the address the server is listening on.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Shut down the server gracefully.
    ///
    /// Stops accepting new connections and signals all active connection
    /// handlers, including event subscriptions, to close.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let _ = self.conn_shutdown_tx.send(true);
    }
}

impl Drop for IpcServerHandle {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
    }
}

/// One counted connection. Releases its slot when the connection task ends,
/// including by panic.
struct ConnectionSlot(Arc<AtomicUsize>);

impl ConnectionSlot {
    fn acquire(active: &Arc<AtomicUsize>) -> Self {
        active.fetch_add(1, Ordering::Relaxed);
        Self(Arc::clone(active))
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// IPC server that listens for client connections.
pub struct IpcServer;

impl IpcServer {
    /// Start the IPC server on a random local port.
    pub async fn start(channel: Arc<dyn ServerChannel>) -> Result<IpcServerHandle> {
        let addr: SocketAddr = IpcConfig::LOCALHOST.parse().map_err(|_| ChannelError::Validation {
            field: "addr".to_string(),
            message: format!("invalid address {}", IpcConfig::LOCALHOST),
        })?;
        Self::bind(channel, addr).await
    }

    /// Start the IPC server on `addr`.
    ///
    /// Returns a handle that can be used to get the port and shut down the server.
    /// The server runs in background tokio tasks.
    pub async fn bind(channel: Arc<dyn ServerChannel>, addr: SocketAddr) -> Result<IpcServerHandle> {
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;
        let port = addr.port();

        info!("IPC server listening on {}", addr);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let (conn_shutdown_tx, conn_shutdown_rx) = watch::channel(false);
        let active_connections = Arc::new(AtomicUsize::new(0));

        let task_handle = tokio::spawn(Self::accept_loop(
            listener,
            channel,
            shutdown_rx,
            conn_shutdown_rx,
            active_connections,
        ));

        Ok(IpcServerHandle {
            addr,
            port,
            shutdown_tx: Some(shutdown_tx),
            conn_shutdown_tx,
            task_handle: Some(task_handle),
        })
    }

    async fn accept_loop(
        listener: TcpListener,
        channel: Arc<dyn ServerChannel>,
        mut shutdown_rx: oneshot::Receiver<()>,
        conn_shutdown_rx: watch::Receiver<bool>,
        active_connections: Arc<AtomicUsize>,
    ) {
        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    info!("IPC server shutting down");
                    break;
                }
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, peer_addr)) => {
                            let current = active_connections.load(Ordering::Relaxed);
                            if current >= IpcConfig::MAX_CONNECTIONS {
                                warn!(
                                    "Rejecting IPC connection from {}: at max capacity ({})",
                                    peer_addr,
                                    IpcConfig::MAX_CONNECTIONS
                                );
                                tokio::spawn(Self::reject_connection(stream));
                                continue;
                            }

                            let slot = ConnectionSlot::acquire(&active_connections);
                            let channel = Arc::clone(&channel);
                            let conn_shutdown = conn_shutdown_rx.clone();

                            tokio::spawn(async move {
                                let _slot = slot;
                                debug!("IPC connection from {}", peer_addr);
                                if let Err(e) = Self::handle_connection(stream, channel, conn_shutdown).await {
                                    debug!("IPC connection {} ended: {}", peer_addr, e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("IPC accept error: {}", e);
                        }
                    }
                }
            }
        }
    }

    /// Tell an over-capacity peer why it is being turned away, then close.
    async fn reject_connection(mut stream: TcpStream) {
        let err = ChannelError::AtCapacity {
            limit: IpcConfig::MAX_CONNECTIONS,
        };
        let Ok(frame) = serde_json::to_vec(&IpcResponse::from_error(None, &err)) else {
            return;
        };
        if write_frame(&mut stream, &frame).await.is_err() {
            return;
        }
        let _ = stream.shutdown().await;

        // Closing with unread input would reset the connection and could
        // discard the frame above before the peer reads it.
        let _ = tokio::time::timeout(IpcConfig::REJECT_LINGER, async {
            while let Ok(Some(_)) = read_frame(&mut stream).await {}
        })
        .await;
    }

    async fn handle_connection(
        stream: TcpStream,
        channel: Arc<dyn ServerChannel>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> Result<()> {
        let (mut reader, writer) = stream.into_split();
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        tokio::spawn(write_frames(writer, outgoing_rx));

        let mut subscriptions: HashMap<String, JoinHandle<()>> = HashMap::new();

        let result = loop {
            // Wait for either a frame or a shutdown signal
            let frame = tokio::select! {
                result = read_frame(&mut reader) => match result {
                    Ok(Some(f)) => f,
                    Ok(None) => break Ok(()), // Clean disconnect
                    Err(e) => break Err(e),
                },
                _ = shutdown_rx.changed() => break Ok(()), // Server shutting down
            };

            let request = match Self::parse_request(&frame) {
                Ok(request) => request,
                Err(response) => {
                    if let Err(e) = queue(&outgoing, &response) {
                        break Err(e);
                    }
                    continue;
                }
            };

            let queued = match request.kind {
                RequestKind::Call => {
                    let channel = Arc::clone(&channel);
                    let outgoing = outgoing.clone();
                    // Keeps running if the caller gives up; the late response is the client's to discard.
                    tokio::spawn(async move {
                        let response = Self::process_call(request, channel.as_ref()).await;
                        let _ = queue(&outgoing, &response);
                    });
                    Ok(())
                }
                RequestKind::Listen => Self::start_subscription(request, channel.as_ref(), &outgoing, &mut subscriptions),
                RequestKind::Unlisten => {
                    let key = request.id.as_ref().map(serde_json::Value::to_string);
                    if let Some(task) = key.and_then(|key| subscriptions.remove(&key)) {
                        debug!("IPC subscription to {} cancelled", request.method);
                        task.abort();
                    }
                    Ok(())
                }
            };

            if let Err(e) = queued {
                break Err(e);
            }
        };

        for task in subscriptions.into_values() {
            task.abort();
        }
        result
    }

    /// Decode and validate a request frame, or build the error response for it.
    fn parse_request(frame: &[u8]) -> std::result::Result<IpcRequest, IpcResponse> {
        let request: IpcRequest = serde_json::from_slice(frame)
            .map_err(|e| IpcResponse::error(None, -32700, format!("Parse error: {}", e)))?;

        if request.jsonrpc != IpcConfig::JSONRPC_VERSION {
            return Err(IpcResponse::error(
                request.id,
                -32600,
                "Invalid Request: expected jsonrpc 2.0".to_string(),
            ));
        }

        Ok(request)
    }

    /// Run one call. A panicking handler becomes an internal error response.
    async fn process_call(request: IpcRequest, channel: &dyn ServerChannel) -> IpcResponse {
        let id = request.id;
        let outcome = AssertUnwindSafe(channel.call(&request.method, request.params))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(result)) => IpcResponse::success(id, result),
            Ok(Err(e)) => {
                debug!("IPC call {} failed: {}", request.method, e);
                IpcResponse::from_error(id, &e)
            }
            Err(_) => {
                error!("IPC call {} panicked", request.method);
                IpcResponse::error(id, -32603, format!("Internal error: {} panicked", request.method))
            }
        }
    }

    /// Acknowledge or reject a listen request, and start forwarding on success.
    fn start_subscription(
        request: IpcRequest,
        channel: &dyn ServerChannel,
        outgoing: &Outgoing,
        subscriptions: &mut HashMap<String, JoinHandle<()>>,
    ) -> Result<()> {
        let Some(id) = request.id else {
            let response = IpcResponse::error(None, -32600, "Invalid Request: listen needs an id".to_string());
            return queue(outgoing, &response);
        };

        match channel.listen(&request.method) {
            Ok(events) => {
                queue(outgoing, &IpcResponse::success(Some(id.clone()), crate::Value::Null))?;

                subscriptions.retain(|_, task| !task.is_finished());
                let task = tokio::spawn(forward_events(request.method, id.clone(), events, outgoing.clone()));
                if let Some(previous) = subscriptions.insert(id.to_string(), task) {
                    previous.abort();
                }
                Ok(())
            }
            Err(e) => {
                warn!("IPC listen for {} rejected: {}", request.method, e);
                queue(outgoing, &IpcResponse::from_error(Some(id), &e))
            }
        }
    }
}

/// Serialize a frame onto the connection's write queue.
fn queue<T: Serialize>(outgoing: &Outgoing, frame: &T) -> Result<()> {
    let bytes = serde_json::to_vec(frame)?;
    outgoing.send(bytes).map_err(|_| ChannelError::Io {
        message: "IPC connection writer closed".to_string(),
        source: None,
    })
}

/// Write queued frames in order until every sender is gone or a write fails.
async fn write_frames(mut writer: OwnedWriteHalf, mut outgoing: mpsc::UnboundedReceiver<Vec<u8>>) {
    while let Some(frame) = outgoing.recv().await {
        if let Err(e) = write_frame(&mut writer, &frame).await {
            debug!("IPC write failed: {}", e);
            return;
        }
    }
}

async fn forward_events(event: String, id: serde_json::Value, mut events: EventStream, outgoing: Outgoing) {
    debug!("IPC subscription {} to {} started", id, event);
    while let Some(data) = events.next().await {
        if queue(&outgoing, &IpcEvent::new(event.as_str(), id.clone(), data)).is_err() {
            return;
        }
    }
    debug!("IPC subscription {} to {} ended by source", id, event);
    let _ = queue(&outgoing, &IpcEvent::done(event.as_str(), id));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Emitter;
    use crate::ipc::protocol::ServerFrame;
    use crate::Value;

    struct EchoChannel {
        ticks: Emitter,
    }

    #[async_trait::async_trait]
    impl ServerChannel for EchoChannel {
        async fn call(&self, command: &str, args: Vec<Value>) -> Result<Value> {
            match command {
                "echo" => Ok(Value::Array(args)),
                "fail" => Err(ChannelError::Other("test failure".to_string())),
                "panic" => panic!("handler exploded"),
                _ => Err(ChannelError::MethodNotFound {
                    command: command.to_string(),
                }),
            }
        }

        fn listen(&self, event: &str) -> Result<EventStream> {
            match event {
                "tick" => Ok(self.ticks.subscribe()),
                _ => Err(ChannelError::EventNotFound {
                    event: event.to_string(),
                }),
            }
        }
    }

    fn echo_channel() -> Arc<EchoChannel> {
        Arc::new(EchoChannel {
            ticks: Emitter::new(),
        })
    }

    async fn roundtrip(stream: &mut TcpStream, request: &IpcRequest) -> IpcResponse {
        let (mut reader, mut writer) = stream.split();
        write_frame(&mut writer, &serde_json::to_vec(request).unwrap())
            .await
            .unwrap();
        let response_bytes = read_frame(&mut reader).await.unwrap().unwrap();
        serde_json::from_slice(&response_bytes).unwrap()
    }

    #[tokio::test]
    async fn test_server_start_and_shutdown() {
        let mut handle = IpcServer::start(echo_channel()).await.unwrap();

        assert!(handle.port > 0);
        assert_eq!(handle.addr.ip(), std::net::Ipv4Addr::LOCALHOST);

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_server_echo_roundtrip() {
        let mut handle = IpcServer::start(echo_channel()).await.unwrap();
        let mut stream = TcpStream::connect(handle.addr()).await.unwrap();

        let request = IpcRequest::call("echo", vec![Value::from("hello")], 1);
        let response = roundtrip(&mut stream, &request).await;

        assert!(response.error.is_none());
        assert_eq!(
            response.result,
            Some(Value::Array(vec![Value::from("hello")]))
        );

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_server_error_response() {
        let mut handle = IpcServer::start(echo_channel()).await.unwrap();
        let mut stream = TcpStream::connect(handle.addr()).await.unwrap();

        let response = roundtrip(&mut stream, &IpcRequest::call("fail", vec![], 2)).await;

        let err = response.error.unwrap();
        assert_eq!(err.code, -32603); // Internal error
        assert!(err.message.contains("test failure"));

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_server_method_not_found_code() {
        let mut handle = IpcServer::start(echo_channel()).await.unwrap();
        let mut stream = TcpStream::connect(handle.addr()).await.unwrap();

        let response = roundtrip(&mut stream, &IpcRequest::call("nope", vec![], 3)).await;
        assert_eq!(response.error.unwrap().code, -32601);

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_server_invalid_json_returns_parse_error() {
        let mut handle = IpcServer::start(echo_channel()).await.unwrap();
        let mut stream = TcpStream::connect(handle.addr()).await.unwrap();
        let (mut reader, mut writer) = stream.split();

        write_frame(&mut writer, b"not valid json").await.unwrap();

        let response_bytes = read_frame(&mut reader).await.unwrap().unwrap();
        let response: IpcResponse = serde_json::from_slice(&response_bytes).unwrap();

        assert_eq!(response.error.unwrap().code, -32700);

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_server_rejects_wrong_version() {
        let mut handle = IpcServer::start(echo_channel()).await.unwrap();
        let mut stream = TcpStream::connect(handle.addr()).await.unwrap();

        let mut request = IpcRequest::call("echo", vec![], 4);
        request.jsonrpc = "1.0".to_string();
        let response = roundtrip(&mut stream, &request).await;
        assert_eq!(response.error.unwrap().code, -32600);

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_server_streams_events_after_ack() {
        let channel = echo_channel();
        let mut handle = IpcServer::start(channel.clone()).await.unwrap();
        let mut stream = TcpStream::connect(handle.addr()).await.unwrap();

        let ack = roundtrip(&mut stream, &IpcRequest::listen("tick", 5)).await;
        assert!(ack.error.is_none());

        channel.ticks.fire(9u64);

        let (mut reader, _writer) = stream.split();
        let frame = read_frame(&mut reader).await.unwrap().unwrap();
        let event: IpcEvent = serde_json::from_slice(&frame).unwrap();
        assert_eq!(event.event, "tick");
        assert_eq!(event.id, serde_json::Value::Number(5.into()));
        assert_eq!(event.data, Value::from(9u64));

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_server_multiplexes_calls_and_events() {
        let channel = echo_channel();
        let mut handle = IpcServer::start(channel.clone()).await.unwrap();
        let mut stream = TcpStream::connect(handle.addr()).await.unwrap();

        let ack = roundtrip(&mut stream, &IpcRequest::listen("tick", 5)).await;
        assert!(ack.error.is_none());

        channel.ticks.fire(1u64);
        let (mut reader, mut writer) = stream.split();
        let call = IpcRequest::call("echo", vec![Value::from("x")], 6);
        write_frame(&mut writer, &serde_json::to_vec(&call).unwrap())
            .await
            .unwrap();

        let mut saw_event = false;
        let mut saw_response = false;
        for _ in 0..2 {
            let frame = read_frame(&mut reader).await.unwrap().unwrap();
            match serde_json::from_slice::<ServerFrame>(&frame).unwrap() {
                ServerFrame::Event(event) => {
                    assert_eq!(event.id, serde_json::Value::Number(5.into()));
                    saw_event = true;
                }
                ServerFrame::Response(response) => {
                    assert_eq!(response.id, Some(serde_json::Value::Number(6.into())));
                    saw_response = true;
                }
            }
        }
        assert!(saw_event && saw_response);

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_server_unlisten_stops_forwarding() {
        let channel = echo_channel();
        let mut handle = IpcServer::start(channel.clone()).await.unwrap();
        let mut stream = TcpStream::connect(handle.addr()).await.unwrap();

        roundtrip(&mut stream, &IpcRequest::listen("tick", 5)).await;
        assert_eq!(channel.ticks.subscriber_count(), 1);

        let (_reader, mut writer) = stream.split();
        let unlisten = IpcRequest::unlisten("tick", 5);
        write_frame(&mut writer, &serde_json::to_vec(&unlisten).unwrap())
            .await
            .unwrap();

        let mut remaining = 1;
        for _ in 0..50 {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            remaining = channel.ticks.subscriber_count();
            if remaining == 0 {
                break;
            }
        }
        assert_eq!(remaining, 0);

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_server_panicking_call_is_internal_error() {
        let mut handle = IpcServer::start(echo_channel()).await.unwrap();
        let mut stream = TcpStream::connect(handle.addr()).await.unwrap();

        let response = roundtrip(&mut stream, &IpcRequest::call("panic", vec![], 8)).await;
        let err = response.error.unwrap();
        assert_eq!(err.code, -32603);
        assert!(err.message.contains("panic"));

        let response = roundtrip(&mut stream, &IpcRequest::call("echo", vec![], 9)).await;
        assert!(response.error.is_none());

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_server_reports_capacity_before_closing() {
        let mut handle = IpcServer::start(echo_channel()).await.unwrap();

        let mut held = Vec::new();
        for i in 0..IpcConfig::MAX_CONNECTIONS {
            let mut stream = TcpStream::connect(handle.addr()).await.unwrap();
            // A completed roundtrip proves the connection was accepted and counted
            let response = roundtrip(&mut stream, &IpcRequest::call("echo", vec![], i as u64)).await;
            assert!(response.error.is_none());
            held.push(stream);
        }

        let mut refused = TcpStream::connect(handle.addr()).await.unwrap();
        let frame = read_frame(&mut refused).await.unwrap().unwrap();
        let response: IpcResponse = serde_json::from_slice(&frame).unwrap();
        assert!(response.id.is_none());
        let err = response.error.unwrap();
        assert_eq!(err.code, -32000);
        assert!(err.message.contains("max capacity"));

        // Freeing a slot lets the next client in
        drop(held.pop());
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        let mut stream = TcpStream::connect(handle.addr()).await.unwrap();
        let response = roundtrip(&mut stream, &IpcRequest::call("echo", vec![], 99)).await;
        assert!(response.error.is_none());

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_connection_slot_released_when_task_panics() {
        let active = Arc::new(AtomicUsize::new(0));
        let slot = ConnectionSlot::acquire(&active);
        assert_eq!(active.load(Ordering::Relaxed), 1);

        let task = tokio::spawn(async move {
            let _slot = slot;
            panic!("connection handler exploded");
        });
        assert!(task.await.is_err());
        assert_eq!(active.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_server_rejected_listen_keeps_connection() {
        let mut handle = IpcServer::start(echo_channel()).await.unwrap();
        let mut stream = TcpStream::connect(handle.addr()).await.unwrap();

        let rejected = roundtrip(&mut stream, &IpcRequest::listen("unknown", 6)).await;
        assert_eq!(rejected.error.unwrap().code, -32004);

        let response = roundtrip(&mut stream, &IpcRequest::call("echo", vec![], 7)).await;
        assert!(response.error.is_none());

        handle.shutdown();
    }
}
