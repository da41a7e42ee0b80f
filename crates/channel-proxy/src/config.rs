//! Centralized configuration for channel transports and the bundled services.

use std::time::Duration;

/// Local IPC transport limits.
pub struct IpcConfig;

impl IpcConfig {
    pub const JSONRPC_VERSION: &'static str = "2.0";
    pub const LOCALHOST: &'static str = "127.0.0.1:0";
    pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024; // 16MB
    pub const MAX_CONNECTIONS: usize = 64;
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
    /// How long a refused connection is drained before it is closed.
    pub const REJECT_LINGER: Duration = Duration::from_secs(1);
}

/// Window-management service limits.
pub struct WindowsConfig;

impl WindowsConfig {
    pub const MAX_RECENT_ENTRIES: usize = 50;
}
