//! Channel Proxy Host - main-process side of the window and native host channels.
//!
//! Serves each channel on its own local IPC listener and prints the ports on
//! stdout for the launching process to read. An optional HTTP JSON-RPC bridge
//! exposes the same channels to tools that cannot speak the framed protocol.

mod handler;
mod server;
mod services;

use anyhow::Result;
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "channel-proxy-host")]
#[command(about = "Serve window management and native host channels over local IPC")]
struct Args {
    /// Port for the windows channel (0 = auto-assign)
    #[arg(short, long, default_value = "0")]
    port: u16,

    /// Port for the native host channel (0 = auto-assign)
    #[arg(long, default_value = "0")]
    native_host_port: u16,

    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Also serve the HTTP JSON-RPC bridge on this port (0 = auto-assign)
    #[arg(long)]
    http_port: Option<u16>,

    /// Number of windows open at startup
    #[arg(long, default_value = "1")]
    windows: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    info!("Starting channel proxy host");

    let services = services::Services::new();

    // Opened after the channels exist, so their open events are buffered
    for _ in 0..args.windows {
        services.windows.open_window();
    }

    let listeners =
        services::start_ipc(&services, &args.host, args.port, args.native_host_port).await?;

    // Print ports for the launcher to read (intentional stdout for IPC)
    println!("WINDOWS_PORT={}", listeners.windows.port);
    println!("NATIVE_HOST_PORT={}", listeners.native_host.port);

    if let Some(http_port) = args.http_port {
        let addr = server::start_server(services.channels(), &args.host, http_port).await?;
        println!("HTTP_PORT={}", addr.port());
        info!("HTTP bridge running on {}", addr);
    }

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, exiting");

    drop(listeners);
    Ok(())
}
