//! footpedal-daemon: turns a USB foot pedal into a held Option key on macOS
//!
//! This daemon runs as a LaunchAgent and provides:
//! - Exclusive access to the pedal via hidapi
//! - A CGEventTap that drops the pedal's native "b" keystroke and adds
//!   Option to every event while the pedal is down
//! - Synthetic Option key press/release on pedal transitions
//! - IPC server for a menu bar app (status, enable toggle, quit)

mod config;
mod engine;
mod events;
mod hid;
mod ipc;
mod lifecycle;
mod tap;

use std::sync::mpsc::Receiver;

use anyhow::Result;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::engine::{Engine, LoopInput, LoopSender, MonotonicClock};
use crate::events::PedalEvent;
use crate::ipc::Server;
use crate::lifecycle::ShutdownSignal;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "footpedal-daemon starting"
    );

    // Load configuration
    let config = Config::load()?;
    config.ensure_dirs()?;
    info!(
        ?config.socket_path,
        vendor_id = format_args!("{:#06x}", config.vendor_id),
        product_id = format_args!("{:#06x}", config.product_id),
        "configuration loaded"
    );

    // Create shutdown signal handler
    let shutdown = ShutdownSignal::new();

    // Channels for inter-component communication
    // Device reader / IPC -> pedal loop
    let (loop_tx, loop_rx) = std::sync::mpsc::channel::<LoopInput>();
    let loop_tx = LoopSender::new(loop_tx);
    // Engine -> IPC server (for broadcasting pedal events)
    let (event_tx, _event_rx) = broadcast::channel::<PedalEvent>(64);
    let mut ipc_event_rx = event_tx.subscribe();

    // The engine moves onto the pedal loop thread and is owned there
    let clock = MonotonicClock::new();
    let engine = Engine::new(config.engine.clone(), event_tx.clone());
    let pedal = platform::start(&config, engine, clock, loop_tx.clone(), loop_rx)?;

    // Create IPC server
    let server = Server::new(
        &config.socket_path,
        loop_tx,
        event_tx.clone(),
        shutdown.trigger(),
    )?;
    let server_for_events = &server;

    info!("daemon initialized, entering main loop");

    // Main event loop
    tokio::select! {
        // Run the IPC server (accepts client connections)
        result = server.run() => {
            if let Err(e) = result {
                error!(?e, "IPC server error");
            }
        }

        // Keep the IPC server's view of the pedal current
        _ = async {
            loop {
                match ipc_event_rx.recv().await {
                    Ok(event) => {
                        info!(%event, "pedal event");
                        server_for_events.apply_event(&event).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "pedal event receiver lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        break;
                    }
                }
            }
        } => {
            info!("pedal event handler exited");
        }

        // Wait for shutdown signal
        result = shutdown.wait() => {
            match result {
                Ok(()) => info!("shutdown signal received"),
                Err(e) => error!(?e, "failed to listen for shutdown signals"),
            }
        }
    }

    // Cleanup
    info!("shutting down...");

    // Releases a held modifier before the process exits
    if let Err(e) = tokio::task::spawn_blocking(move || pedal.stop()).await {
        error!(?e, "pedal shutdown failed");
    }
    server.shutdown().await;

    info!("footpedal-daemon stopped");

    Ok(())
}

#[cfg(target_os = "macos")]
mod platform {
    use super::*;

    use crate::hid::DeviceReader;
    use crate::tap::PedalLoop;

    /// Running pedal threads
    pub struct Pedal {
        reader: DeviceReader,
        pedal_loop: PedalLoop,
    }

    impl Pedal {
        pub fn stop(self) {
            self.reader.stop();
            self.pedal_loop.shutdown();
        }
    }

    pub fn start(
        config: &Config,
        engine: Engine,
        clock: MonotonicClock,
        loop_tx: LoopSender,
        loop_rx: Receiver<LoopInput>,
    ) -> Result<Pedal> {
        // Start the pedal loop (owns the engine and the event tap)
        let pedal_loop = PedalLoop::spawn(engine, clock, loop_tx.clone(), loop_rx)?;
        info!("pedal loop started");

        // Start the device reader (runs on dedicated thread)
        let reader = DeviceReader::new(config.vendor_id, config.product_id, clock, loop_tx);
        match reader.start() {
            Ok(()) => {
                info!("device reader started");
            }
            Err(e) => {
                error!(?e, "failed to start device reader");
                warn!("continuing without pedal input");
            }
        }

        Ok(Pedal { reader, pedal_loop })
    }
}

#[cfg(not(target_os = "macos"))]
mod platform {
    use super::*;

    /// Placeholder for hosts without pedal support
    pub struct Pedal;

    impl Pedal {
        pub fn stop(self) {}
    }

    pub fn start(
        _config: &Config,
        _engine: Engine,
        _clock: MonotonicClock,
        _loop_tx: LoopSender,
        _loop_rx: Receiver<LoopInput>,
    ) -> Result<Pedal> {
        anyhow::bail!("footpedal-daemon requires macOS (CGEventTap and IOKit HID)")
    }
}
