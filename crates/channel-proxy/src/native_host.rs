//! Native host operations for windows, exposed through the generic adapter.
//!
//! The main process implements [`NativeHostService`], where every method is
//! told which window is calling. A window process holds a
//! [`NativeHostClient`] configured with its own window id as the proxy
//! context, so it sees the narrower [`HostService`] surface and never passes
//! its id explicitly.

use crate::channel::Channel;
use crate::proxy::ChannelProxy;
use crate::service::{Arguments, ServiceProxyChannel};
use crate::value::Value;
use crate::windows::LocalWindowsService;
use crate::{ChannelError, Result};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};
use url::Url;

/// Main-side native host operations. `window_id` is always the caller.
#[async_trait::async_trait]
pub trait NativeHostService: Send + Sync + 'static {
    async fn get_window_count(&self, window_id: u64) -> Result<u64>;

    async fn is_maximized(&self, window_id: u64) -> Result<bool>;

    async fn maximize_window(&self, window_id: u64) -> Result<()>;

    async fn unmaximize_window(&self, window_id: u64) -> Result<()>;

    async fn minimize_window(&self, window_id: u64) -> Result<()>;

    /// Focus `target`, or the calling window when `target` is `None`.
    async fn focus_window(&self, window_id: u64, target: Option<u64>) -> Result<()>;

    async fn toggle_full_screen(&self, window_id: u64) -> Result<()>;

    async fn set_document_edited(&self, window_id: u64, edited: bool) -> Result<()>;

    async fn is_document_edited(&self, window_id: u64) -> Result<bool>;

    /// Hand `url` to the OS. Returns whether it was accepted.
    async fn open_external(&self, window_id: u64, url: String) -> Result<bool>;

    async fn show_item_in_folder(&self, window_id: u64, path: String) -> Result<()>;

    async fn reload(&self, window_id: u64) -> Result<()>;

    async fn close_window(&self, window_id: u64) -> Result<()>;
}

/// Window-side view of the native host: the calling window is implicit.
#[async_trait::async_trait]
pub trait HostService: Send + Sync {
    async fn window_count(&self) -> Result<u64>;

    async fn is_maximized(&self) -> Result<bool>;

    async fn maximize(&self) -> Result<()>;

    async fn unmaximize(&self) -> Result<()>;

    async fn minimize(&self) -> Result<()>;

    async fn focus(&self, target: Option<u64>) -> Result<()>;

    async fn toggle_full_screen(&self) -> Result<()>;

    async fn set_document_edited(&self, edited: bool) -> Result<()>;

    async fn is_document_edited(&self) -> Result<bool>;

    async fn open_external(&self, url: &str) -> Result<bool>;

    async fn show_item_in_folder(&self, path: &str) -> Result<()>;

    async fn reload(&self) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

// ============================================================================
// Server side
// ============================================================================

/// Expose a native host service over a channel.
///
/// Command names are the camel-cased method names. The calling window id is
/// expected as the first argument, normally supplied as proxy context.
pub fn native_host_channel<S: NativeHostService>(service: Arc<S>) -> ServiceProxyChannel<S> {
    ServiceProxyChannel::builder(service)
        .method("getWindowCount", get_window_count::<S>)
        .method("isMaximized", is_maximized::<S>)
        .method("maximizeWindow", maximize_window::<S>)
        .method("unmaximizeWindow", unmaximize_window::<S>)
        .method("minimizeWindow", minimize_window::<S>)
        .method("focusWindow", focus_window::<S>)
        .method("toggleFullScreen", toggle_full_screen::<S>)
        .method("setDocumentEdited", set_document_edited::<S>)
        .method("isDocumentEdited", is_document_edited::<S>)
        .method("openExternal", open_external::<S>)
        .method("showItemInFolder", show_item_in_folder::<S>)
        .method("reload", reload::<S>)
        .method("closeWindow", close_window::<S>)
        .build()
}

async fn get_window_count<S: NativeHostService>(service: Arc<S>, args: Arguments) -> Result<Value> {
    Ok(Value::from(service.get_window_count(args.u64(0)?).await?))
}

async fn is_maximized<S: NativeHostService>(service: Arc<S>, args: Arguments) -> Result<Value> {
    Ok(Value::Bool(service.is_maximized(args.u64(0)?).await?))
}

async fn maximize_window<S: NativeHostService>(service: Arc<S>, args: Arguments) -> Result<Value> {
    service.maximize_window(args.u64(0)?).await?;
    Ok(Value::Null)
}

async fn unmaximize_window<S: NativeHostService>(service: Arc<S>, args: Arguments) -> Result<Value> {
    service.unmaximize_window(args.u64(0)?).await?;
    Ok(Value::Null)
}

async fn minimize_window<S: NativeHostService>(service: Arc<S>, args: Arguments) -> Result<Value> {
    service.minimize_window(args.u64(0)?).await?;
    Ok(Value::Null)
}

async fn focus_window<S: NativeHostService>(service: Arc<S>, args: Arguments) -> Result<Value> {
    let target = match args.optional(1) {
        Some(_) => Some(args.u64(1)?),
        None => None,
    };
    service.focus_window(args.u64(0)?, target).await?;
    Ok(Value::Null)
}

async fn toggle_full_screen<S: NativeHostService>(service: Arc<S>, args: Arguments) -> Result<Value> {
    service.toggle_full_screen(args.u64(0)?).await?;
    Ok(Value::Null)
}

async fn set_document_edited<S: NativeHostService>(service: Arc<S>, args: Arguments) -> Result<Value> {
    service
        .set_document_edited(args.u64(0)?, args.bool(1)?)
        .await?;
    Ok(Value::Null)
}

async fn is_document_edited<S: NativeHostService>(service: Arc<S>, args: Arguments) -> Result<Value> {
    Ok(Value::Bool(service.is_document_edited(args.u64(0)?).await?))
}

async fn open_external<S: NativeHostService>(service: Arc<S>, args: Arguments) -> Result<Value> {
    let opened = service
        .open_external(args.u64(0)?, args.string(1)?)
        .await?;
    Ok(Value::Bool(opened))
}

async fn show_item_in_folder<S: NativeHostService>(service: Arc<S>, args: Arguments) -> Result<Value> {
    service
        .show_item_in_folder(args.u64(0)?, args.string(1)?)
        .await?;
    Ok(Value::Null)
}

async fn reload<S: NativeHostService>(service: Arc<S>, args: Arguments) -> Result<Value> {
    service.reload(args.u64(0)?).await?;
    Ok(Value::Null)
}

async fn close_window<S: NativeHostService>(service: Arc<S>, args: Arguments) -> Result<Value> {
    service.close_window(args.u64(0)?).await?;
    Ok(Value::Null)
}

/// Per-window native state tracked by [`LocalNativeHost`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NativeWindowState {
    pub maximized: bool,
    pub minimized: bool,
    pub full_screen: bool,
    pub document_edited: bool,
    pub reloads: u32,
}

/// Native host backed by a [`LocalWindowsService`].
///
/// Nothing here touches a real window system: state changes are recorded
/// per window, and those that have a window event (focus, maximize, close)
/// are forwarded to the windows service so subscribers see them.
pub struct LocalNativeHost {
    windows: Arc<LocalWindowsService>,
    state: Mutex<HashMap<u64, NativeWindowState>>,
    opened_external: Mutex<Vec<Url>>,
    shown_items: Mutex<Vec<String>>,
}

impl LocalNativeHost {
    /// URL schemes `open_external` accepts.
    pub const EXTERNAL_SCHEMES: &'static [&'static str] = &["http", "https", "mailto"];

    pub fn new(windows: Arc<LocalWindowsService>) -> Self {
        Self {
            windows,
            state: Mutex::new(HashMap::new()),
            opened_external: Mutex::new(Vec::new()),
            shown_items: Mutex::new(Vec::new()),
        }
    }

    pub fn windows(&self) -> &Arc<LocalWindowsService> {
        &self.windows
    }

    /// Snapshot of a window's native state.
    pub fn window_state(&self, window_id: u64) -> Option<NativeWindowState> {
        let state = self.state.lock().expect("native host lock poisoned");
        state.get(&window_id).cloned()
    }

    /// URLs accepted by `open_external`, in order.
    pub fn opened_external(&self) -> Vec<Url> {
        self.opened_external
            .lock()
            .expect("native host lock poisoned")
            .clone()
    }

    pub fn shown_items(&self) -> Vec<String> {
        self.shown_items
            .lock()
            .expect("native host lock poisoned")
            .clone()
    }

    /// Apply `update` to an open window's state.
    fn with_window<R>(&self, window_id: u64, update: impl FnOnce(&mut NativeWindowState) -> R) -> Result<R> {
        if !self.windows.has_window(window_id) {
            return Err(unknown_window(window_id));
        }
        let mut state = self.state.lock().expect("native host lock poisoned");
        Ok(update(state.entry(window_id).or_default()))
    }
}

fn unknown_window(window_id: u64) -> ChannelError {
    ChannelError::Validation {
        field: "window_id".to_string(),
        message: format!("no open window with id {}", window_id),
    }
}

#[async_trait::async_trait]
impl NativeHostService for LocalNativeHost {
    async fn get_window_count(&self, _window_id: u64) -> Result<u64> {
        Ok(self.windows.windows().len() as u64)
    }

    async fn is_maximized(&self, window_id: u64) -> Result<bool> {
        self.with_window(window_id, |w| w.maximized)
    }

    async fn maximize_window(&self, window_id: u64) -> Result<()> {
        let changed = self.with_window(window_id, |w| {
            w.minimized = false;
            !std::mem::replace(&mut w.maximized, true)
        })?;
        if changed {
            self.windows.maximize_window(window_id);
        }
        Ok(())
    }

    async fn unmaximize_window(&self, window_id: u64) -> Result<()> {
        let changed = self.with_window(window_id, |w| std::mem::replace(&mut w.maximized, false))?;
        if changed {
            self.windows.unmaximize_window(window_id);
        }
        Ok(())
    }

    async fn minimize_window(&self, window_id: u64) -> Result<()> {
        self.with_window(window_id, |w| w.minimized = true)?;
        self.windows.blur_window(window_id);
        Ok(())
    }

    async fn focus_window(&self, window_id: u64, target: Option<u64>) -> Result<()> {
        let target = target.unwrap_or(window_id);
        self.with_window(target, |w| w.minimized = false)?;
        debug!("Window {} focuses window {}", window_id, target);
        self.windows.focus_window(target);
        Ok(())
    }

    async fn toggle_full_screen(&self, window_id: u64) -> Result<()> {
        self.with_window(window_id, |w| w.full_screen = !w.full_screen)
    }

    async fn set_document_edited(&self, window_id: u64, edited: bool) -> Result<()> {
        self.with_window(window_id, |w| w.document_edited = edited)
    }

    async fn is_document_edited(&self, window_id: u64) -> Result<bool> {
        self.with_window(window_id, |w| w.document_edited)
    }

    async fn open_external(&self, window_id: u64, url: String) -> Result<bool> {
        let Ok(parsed) = Url::parse(&url) else {
            debug!("Window {} asked to open unparseable URL {}", window_id, url);
            return Ok(false);
        };
        if !Self::EXTERNAL_SCHEMES.contains(&parsed.scheme()) {
            return Ok(false);
        }
        info!("Opening {} for window {}", parsed, window_id);
        self.opened_external
            .lock()
            .expect("native host lock poisoned")
            .push(parsed);
        Ok(true)
    }

    async fn show_item_in_folder(&self, window_id: u64, path: String) -> Result<()> {
        if !self.windows.has_window(window_id) {
            return Err(unknown_window(window_id));
        }
        self.shown_items
            .lock()
            .expect("native host lock poisoned")
            .push(path);
        Ok(())
    }

    async fn reload(&self, window_id: u64) -> Result<()> {
        self.with_window(window_id, |w| {
            w.reloads += 1;
            w.document_edited = false;
        })
    }

    async fn close_window(&self, window_id: u64) -> Result<()> {
        if !self.windows.close_window(window_id) {
            return Err(unknown_window(window_id));
        }
        self.state
            .lock()
            .expect("native host lock poisoned")
            .remove(&window_id);
        Ok(())
    }
}

// ============================================================================
// Client side
// ============================================================================

/// [`HostService`] for one window, forwarding to a remote native host channel.
#[derive(Debug, Clone)]
pub struct NativeHostClient {
    proxy: ChannelProxy,
    window_id: u64,
}

impl NativeHostClient {
    pub fn new(channel: Arc<dyn Channel>, window_id: u64) -> Self {
        Self {
            proxy: ChannelProxy::with_context(channel, Some(Value::from(window_id))),
            window_id,
        }
    }

    pub fn window_id(&self) -> u64 {
        self.window_id
    }

    async fn call<T: DeserializeOwned>(&self, command: &str, args: Vec<Value>) -> Result<T> {
        self.proxy.call_as(command, args).await
    }

    async fn run(&self, command: &str, args: Vec<Value>) -> Result<()> {
        self.proxy.call(command, args).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl HostService for NativeHostClient {
    async fn window_count(&self) -> Result<u64> {
        self.call("getWindowCount", vec![]).await
    }

    async fn is_maximized(&self) -> Result<bool> {
        self.call("isMaximized", vec![]).await
    }

    async fn maximize(&self) -> Result<()> {
        self.run("maximizeWindow", vec![]).await
    }

    async fn unmaximize(&self) -> Result<()> {
        self.run("unmaximizeWindow", vec![]).await
    }

    async fn minimize(&self) -> Result<()> {
        self.run("minimizeWindow", vec![]).await
    }

    async fn focus(&self, target: Option<u64>) -> Result<()> {
        let args = target.map(Value::from).into_iter().collect();
        self.run("focusWindow", args).await
    }

    async fn toggle_full_screen(&self) -> Result<()> {
        self.run("toggleFullScreen", vec![]).await
    }

    async fn set_document_edited(&self, edited: bool) -> Result<()> {
        self.run("setDocumentEdited", vec![Value::Bool(edited)]).await
    }

    async fn is_document_edited(&self) -> Result<bool> {
        self.call("isDocumentEdited", vec![]).await
    }

    async fn open_external(&self, url: &str) -> Result<bool> {
        self.call("openExternal", vec![Value::from(url)]).await
    }

    async fn show_item_in_folder(&self, path: &str) -> Result<()> {
        self.run("showItemInFolder", vec![Value::from(path)]).await
    }

    async fn reload(&self) -> Result<()> {
        self.run("reload", vec![]).await
    }

    async fn close(&self) -> Result<()> {
        self.run("closeWindow", vec![]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{InProcessChannel, ServerChannel};
    use crate::context::ContextEnvelope;
    use crate::windows::{WindowEvent, WindowEventSource, WindowsService};
    use futures::StreamExt;
    use std::time::Duration;

    fn host() -> (Arc<LocalNativeHost>, ServiceProxyChannel<LocalNativeHost>) {
        let host = Arc::new(LocalNativeHost::new(Arc::new(LocalWindowsService::new())));
        let channel = native_host_channel(host.clone());
        (host, channel)
    }

    fn client(channel: ServiceProxyChannel<LocalNativeHost>, window_id: u64) -> NativeHostClient {
        NativeHostClient::new(Arc::new(InProcessChannel::new(Arc::new(channel))), window_id)
    }

    #[test]
    fn test_channel_registers_every_command() {
        let (_, channel) = host();
        assert_eq!(channel.commands().len(), 13);
        assert!(channel.has_command("openExternal"));
        assert!(!channel.has_command("open_external"));
    }

    #[tokio::test]
    async fn test_context_supplies_window_id() {
        let (host, channel) = host();
        let id = host.windows().open_window();
        let envelope = ContextEnvelope::new(Value::from(id)).to_value();

        channel
            .call("setDocumentEdited", vec![envelope.clone(), Value::Bool(true)])
            .await
            .unwrap();
        let edited = channel.call("isDocumentEdited", vec![envelope]).await.unwrap();

        assert_eq!(edited, Value::Bool(true));
    }

    #[tokio::test]
    async fn test_unknown_window_is_rejected() {
        let (_, channel) = host();
        let err = client(channel, 99).maximize().await.unwrap_err();
        assert!(matches!(err, ChannelError::Validation { ref field, .. } if field == "window_id"));
    }

    #[tokio::test]
    async fn test_client_window_operations() {
        let (host, channel) = host();
        let id = host.windows().open_window();
        let other = host.windows().open_window();
        let client = client(channel, id);

        assert_eq!(client.window_id(), id);
        assert_eq!(client.window_count().await.unwrap(), 2);

        client.maximize().await.unwrap();
        assert!(client.is_maximized().await.unwrap());
        client.unmaximize().await.unwrap();
        assert!(!client.is_maximized().await.unwrap());

        client.toggle_full_screen().await.unwrap();
        client.set_document_edited(true).await.unwrap();
        assert!(client.is_document_edited().await.unwrap());
        client.reload().await.unwrap();
        assert!(!client.is_document_edited().await.unwrap());

        let state = host.window_state(id).unwrap();
        assert!(state.full_screen);
        assert_eq!(state.reloads, 1);

        client.focus(Some(other)).await.unwrap();
        assert!(host.windows().is_focused(other).await.unwrap());
        client.focus(None).await.unwrap();
        assert!(host.windows().is_focused(id).await.unwrap());

        client.close().await.unwrap();
        assert_eq!(host.windows().windows(), vec![other]);
        assert!(host.window_state(id).is_none());
    }

    #[tokio::test]
    async fn test_maximize_fires_window_event() {
        let (host, channel) = host();
        let id = host.windows().open_window();
        let mut maximized = host.windows().subscribe(WindowEvent::Maximize);

        let client = client(channel, id);
        client.maximize().await.unwrap();
        client.maximize().await.unwrap();
        client.unmaximize().await.unwrap();
        client.maximize().await.unwrap();

        let first = tokio::time::timeout(Duration::from_secs(1), maximized.next()).await.unwrap();
        let second = tokio::time::timeout(Duration::from_secs(1), maximized.next()).await.unwrap();
        assert_eq!(first, Some(Value::from(id)));
        assert_eq!(second, Some(Value::from(id)));
    }

    #[tokio::test]
    async fn test_open_external_filters_schemes() {
        let (host, channel) = host();
        let id = host.windows().open_window();
        let client = client(channel, id);

        assert!(client.open_external("https://example.com/docs").await.unwrap());
        assert!(!client.open_external("javascript:alert(1)").await.unwrap());
        assert!(!client.open_external("not a url").await.unwrap());
        assert_eq!(host.opened_external().len(), 1);

        client.show_item_in_folder("/tmp/file.txt").await.unwrap();
        assert_eq!(host.shown_items(), vec!["/tmp/file.txt".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_argument_is_invalid_params() {
        let (host, channel) = host();
        let id = host.windows().open_window();
        let err = client(channel, id).run("setDocumentEdited", vec![]).await.unwrap_err();
        assert!(matches!(err, ChannelError::InvalidParams { .. }));
    }
}
