//! Integration tests for the channel-proxy-host binary.
//!
//! These tests spawn the host, read the advertised ports from stdout and talk
//! to it the way a window process would: through typed clients over IPC, and
//! through the HTTP bridge.

use channel_proxy::{
    Channel, ChannelError, ChannelProxy, HostService, IpcClient, NativeHostClient, Recent, Uri,
    Value, WindowEvent, WindowsClient, WindowsService,
};
use futures::StreamExt;
use serde_json::json;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncBufReadExt;

struct HostHandle {
    child: tokio::process::Child,
    ports: HashMap<String, u16>,
    stdout_drain: Option<tokio::task::JoinHandle<()>>,
}

impl HostHandle {
    fn port(&self, name: &str) -> u16 {
        self.ports[name]
    }

    fn addr(&self, name: &str) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], self.port(name)))
    }

    async fn stop(mut self) {
        if let Some(drain) = self.stdout_drain.take() {
            drain.abort();
        }
        let _ = self.child.kill().await;
        let _ = self.child.wait().await;
    }
}

impl Drop for HostHandle {
    fn drop(&mut self) {
        if let Some(drain) = self.stdout_drain.take() {
            drain.abort();
        }
        let _ = self.child.start_kill();
    }
}

fn host_binary() -> Result<PathBuf, String> {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_channel-proxy-host") {
        return Ok(PathBuf::from(path));
    }

    let current_exe = std::env::current_exe()
        .map_err(|e| format!("failed to resolve current_exe for fallback: {e}"))?;
    let target_debug_dir = current_exe
        .parent()
        .and_then(|p| p.parent())
        .ok_or_else(|| "failed to resolve target/debug directory for fallback".to_string())?;

    let mut fallback = target_debug_dir.join("channel-proxy-host");
    if cfg!(target_os = "windows") {
        fallback.set_extension("exe");
    }
    if !fallback.exists() {
        return Err(format!(
            "CARGO_BIN_EXE_channel-proxy-host not set and fallback binary not found at {}",
            fallback.display()
        ));
    }
    Ok(fallback)
}

/// Start the host binary and wait until it has printed every expected port.
async fn start_host(with_http: bool) -> Result<HostHandle, String> {
    let binary = host_binary()?;

    let mut command = tokio::process::Command::new(&binary);
    command.arg("--host").arg("127.0.0.1").arg("--port").arg("0");
    if with_http {
        command.arg("--http-port").arg("0");
    }

    let mut child = command
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| format!("failed to spawn channel-proxy-host: {e}"))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| "failed to capture stdout".to_string())?;
    let mut lines = tokio::io::BufReader::new(stdout).lines();

    let mut expected = vec!["WINDOWS_PORT", "NATIVE_HOST_PORT"];
    if with_http {
        expected.push("HTTP_PORT");
    }

    let mut ports = HashMap::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
    while ports.len() < expected.len() && tokio::time::Instant::now() < deadline {
        match tokio::time::timeout(Duration::from_millis(250), lines.next_line()).await {
            Ok(Ok(Some(line))) => {
                if let Some((key, value)) = line.split_once('=') {
                    if expected.contains(&key) {
                        let parsed = value
                            .trim()
                            .parse::<u16>()
                            .map_err(|e| format!("invalid {key} value '{value}': {e}"))?;
                        ports.insert(key.to_string(), parsed);
                    }
                }
            }
            Ok(Ok(None)) => break,
            Ok(Err(err)) => return Err(format!("failed to read host stdout: {err}")),
            Err(_) => continue,
        }
    }

    if ports.len() < expected.len() {
        return Err(format!("host advertised only {:?}", ports));
    }

    let stdout_drain =
        tokio::spawn(async move { while let Ok(Some(_)) = lines.next_line().await {} });

    Ok(HostHandle {
        child,
        ports,
        stdout_drain: Some(stdout_drain),
    })
}

/// Make an RPC call through the HTTP bridge and return the full payload.
async fn rpc_call_raw(
    port: u16,
    method: &str,
    params: serde_json::Value,
    context: Option<serde_json::Value>,
) -> Result<serde_json::Value, String> {
    let mut body = json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": params,
        "id": 1
    });
    if let Some(context) = context {
        body["context"] = context;
    }

    let client = reqwest::Client::new();
    let response = client
        .post(format!("http://127.0.0.1:{}/rpc", port))
        .json(&body)
        .timeout(Duration::from_secs(10))
        .send()
        .await
        .map_err(|e| e.to_string())?;

    response
        .json::<serde_json::Value>()
        .await
        .map_err(|e| e.to_string())
}

async fn connect(handle: &HostHandle, name: &str) -> Arc<IpcClient> {
    Arc::new(
        IpcClient::connect(handle.addr(name))
            .await
            .expect("failed to connect to host"),
    )
}

#[tokio::test]
async fn test_host_advertises_ports() {
    let handle = start_host(false).await.expect("host failed to start");
    assert!(handle.port("WINDOWS_PORT") > 0);
    assert!(handle.port("NATIVE_HOST_PORT") > 0);
    assert_ne!(handle.port("WINDOWS_PORT"), handle.port("NATIVE_HOST_PORT"));
    handle.stop().await;
}

#[tokio::test]
async fn test_windows_client_over_ipc() {
    let handle = start_host(false).await.expect("host failed to start");
    let windows = WindowsClient::new(connect(&handle, "WINDOWS_PORT").await);

    let file = Uri::parse("file:///work/notes.md").unwrap();
    windows
        .add_recently_opened(vec![Recent::file(file.clone()).with_label("notes")])
        .await
        .unwrap();

    let recent = windows.get_recently_opened(Some(1)).await.unwrap();
    assert_eq!(recent.files.len(), 1);
    assert_eq!(recent.files[0].location(), &file);
    assert_eq!(recent.files[0].label(), Some("notes"));

    windows.remove_from_recently_opened(vec![file]).await.unwrap();
    assert!(windows.get_recently_opened(None).await.unwrap().is_empty());

    handle.stop().await;
}

#[tokio::test]
async fn test_startup_window_event_is_buffered() {
    let handle = start_host(false).await.expect("host failed to start");
    let windows = WindowsClient::new(connect(&handle, "WINDOWS_PORT").await);

    // The startup window opened before anyone subscribed
    let mut opened = windows.listen(WindowEvent::Open).await.unwrap();
    let first = tokio::time::timeout(Duration::from_secs(5), opened.next())
        .await
        .expect("no buffered open event");
    assert_eq!(first, Some(Value::from(1u64)));

    handle.stop().await;
}

#[tokio::test]
async fn test_unknown_window_command_and_event() {
    let handle = start_host(false).await.expect("host failed to start");
    let client = connect(&handle, "WINDOWS_PORT").await;

    let err = client.call("closeAllWindows", vec![]).await.unwrap_err();
    assert!(err.is_method_not_found());
    assert!(err.to_string().contains("Call not found: closeAllWindows"));

    let err = client.listen("onWindowClose").await.err().unwrap();
    assert!(matches!(err, ChannelError::Remote { code: -32004, .. }));

    handle.stop().await;
}

#[tokio::test]
async fn test_native_host_client_uses_window_context() {
    let handle = start_host(false).await.expect("host failed to start");
    let channel = connect(&handle, "NATIVE_HOST_PORT").await;
    let host = NativeHostClient::new(channel.clone(), 1);

    assert_eq!(host.window_count().await.unwrap(), 1);
    assert!(!host.is_maximized().await.unwrap());
    host.maximize().await.unwrap();
    assert!(host.is_maximized().await.unwrap());

    host.set_document_edited(true).await.unwrap();
    assert!(host.is_document_edited().await.unwrap());

    assert!(host.open_external("https://example.com").await.unwrap());

    // A window that does not exist is rejected by the service
    let stranger = NativeHostClient::new(channel, 42);
    let err = stranger.maximize().await.unwrap_err();
    assert!(matches!(err, ChannelError::Remote { code: -32005, .. }));

    handle.stop().await;
}

#[tokio::test]
async fn test_generic_adapter_errors_over_ipc() {
    let handle = start_host(false).await.expect("host failed to start");
    let channel = connect(&handle, "NATIVE_HOST_PORT").await;
    let proxy = ChannelProxy::with_context(channel.clone(), Some(Value::from(1u64)));

    let err = proxy.call("showSaveDialog", vec![]).await.unwrap_err();
    assert!(err.is_method_not_found());
    assert!(err.to_string().contains("Method not found: showSaveDialog"));

    let err = channel.listen("anyEvent").await.err().unwrap();
    match err {
        ChannelError::Remote { code, message } => {
            assert_eq!(code, -32004);
            assert!(message.contains("anyEvent"));
        }
        other => panic!("Expected Remote, got: {:?}", other),
    }

    handle.stop().await;
}

#[tokio::test]
async fn test_http_bridge() {
    let handle = start_host(true).await.expect("host failed to start");
    let port = handle.port("HTTP_PORT");

    let health = reqwest::get(format!("http://127.0.0.1:{}/health", port))
        .await
        .unwrap()
        .json::<serde_json::Value>()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");

    let channels = rpc_call_raw(port, "list_channels", json!([]), None).await.unwrap();
    assert_eq!(channels["result"], json!(["nativeHost", "windows"]));

    let focused = rpc_call_raw(port, "windows.isFocused", json!([1]), None).await.unwrap();
    assert_eq!(focused["result"], json!(false));

    let count = rpc_call_raw(port, "nativeHost.getWindowCount", json!([]), Some(json!(1)))
        .await
        .unwrap();
    assert_eq!(count["result"], json!(1));

    let missing = rpc_call_raw(port, "windows.nope", json!([]), None).await.unwrap();
    assert_eq!(missing["error"]["code"], json!(-32601));

    let bad = rpc_call_raw(port, "windows.isFocused", json!({"id": 1}), None)
        .await
        .unwrap();
    assert_eq!(bad["error"]["code"], json!(-32602));

    let wrong_version = reqwest::Client::new()
        .post(format!("http://127.0.0.1:{}/rpc", port))
        .json(&json!({"jsonrpc": "1.0", "method": "windows.isFocused", "params": [1], "id": 2}))
        .send()
        .await
        .unwrap()
        .json::<serde_json::Value>()
        .await
        .unwrap();
    assert_eq!(wrong_version["error"]["code"], json!(-32600));
    assert_eq!(wrong_version["id"], json!(2));

    handle.stop().await;
}
