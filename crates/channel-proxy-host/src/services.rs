//! The services this host owns and the IPC listeners serving them.

use anyhow::Context;
use channel_proxy::{
    native_host_channel, IpcServer, IpcServerHandle, LocalNativeHost, LocalWindowsService,
    ServerChannel, ServiceProxyChannel, WindowsChannel,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

/// Channel name of the window management channel.
pub const WINDOWS_CHANNEL: &str = "windows";

/// Channel name of the native host channel.
pub const NATIVE_HOST_CHANNEL: &str = "nativeHost";

/// Local services and the server channels exposing them.
pub struct Services {
    pub windows: Arc<LocalWindowsService>,
    pub native_host: Arc<LocalNativeHost>,
    pub windows_channel: Arc<WindowsChannel<LocalWindowsService>>,
    pub native_host_channel: Arc<ServiceProxyChannel<LocalNativeHost>>,
}

impl Default for Services {
    fn default() -> Self {
        Self::new()
    }
}

impl Services {
    pub fn new() -> Self {
        let windows = Arc::new(LocalWindowsService::new());
        let native_host = Arc::new(LocalNativeHost::new(Arc::clone(&windows)));
        let windows_channel = Arc::new(WindowsChannel::new(Arc::clone(&windows)));
        let native_host_channel = Arc::new(native_host_channel(Arc::clone(&native_host)));

        Self {
            windows,
            native_host,
            windows_channel,
            native_host_channel,
        }
    }

    /// Server channels by name.
    pub fn channels(&self) -> HashMap<String, Arc<dyn ServerChannel>> {
        let mut channels: HashMap<String, Arc<dyn ServerChannel>> = HashMap::new();
        channels.insert(WINDOWS_CHANNEL.to_string(), self.windows_channel.clone());
        channels.insert(NATIVE_HOST_CHANNEL.to_string(), self.native_host_channel.clone());
        channels
    }
}

/// Running IPC listeners. Dropping them stops serving.
pub struct IpcListeners {
    pub windows: IpcServerHandle,
    pub native_host: IpcServerHandle,
}

/// Serve each channel on its own listener.
pub async fn start_ipc(
    services: &Services,
    host: &str,
    windows_port: u16,
    native_host_port: u16,
) -> anyhow::Result<IpcListeners> {
    let windows_addr: SocketAddr = format!("{}:{}", host, windows_port).parse()?;
    let native_host_addr: SocketAddr = format!("{}:{}", host, native_host_port).parse()?;

    let windows = IpcServer::bind(services.windows_channel.clone(), windows_addr)
        .await
        .context("failed to start windows channel listener")?;
    let native_host = IpcServer::bind(services.native_host_channel.clone(), native_host_addr)
        .await
        .context("failed to start native host channel listener")?;

    info!(
        "Serving {} on {} and {} on {}",
        WINDOWS_CHANNEL, windows.addr, NATIVE_HOST_CHANNEL, native_host.addr
    );

    Ok(IpcListeners {
        windows,
        native_host,
    })
}
