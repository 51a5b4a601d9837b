//! Unix domain socket server for IPC
//!
//! Provides request-response communication and push notifications of
//! pedal events to subscribed clients.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, error, info, warn};

use crate::engine::{LoopInput, LoopSender};
use crate::events::PedalEvent;
use crate::lifecycle::ShutdownTrigger;

use super::protocol::{DaemonStatus, Request, Response};

/// Largest accepted request body
const MAX_MESSAGE_LEN: usize = 1024 * 1024;

/// IPC Server handling client connections
pub struct Server {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
    state: Arc<RwLock<ServerState>>,
    shutdown_tx: broadcast::Sender<()>,
    links: ClientLinks,
}

/// Shared server state
struct ServerState {
    status: DaemonStatus,
    start_time: std::time::Instant,
}

/// What each client handler needs to reach the rest of the daemon
#[derive(Clone)]
struct ClientLinks {
    /// Admin commands into the pedal loop
    loop_tx: LoopSender,
    /// Source of pedal events for subscribers
    event_tx: broadcast::Sender<PedalEvent>,
    /// Requests daemon shutdown
    shutdown: ShutdownTrigger,
}

impl Server {
    /// Create a new IPC server
    pub fn new(
        socket_path: &Path,
        loop_tx: LoopSender,
        event_tx: broadcast::Sender<PedalEvent>,
        shutdown: ShutdownTrigger,
    ) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).context("failed to create socket directory")?;
        }

        // Remove stale socket if it exists
        if socket_path.exists() {
            std::fs::remove_file(socket_path).context("failed to remove stale socket")?;
        }

        let listener = UnixListener::bind(socket_path).context("failed to bind Unix socket")?;

        // Set socket permissions to owner-only (0600)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        let state = Arc::new(RwLock::new(ServerState {
            status: DaemonStatus::default(),
            start_time: std::time::Instant::now(),
        }));

        info!(?socket_path, "IPC server listening");

        Ok(Self {
            socket_path: socket_path.to_owned(),
            listener: Some(listener),
            state,
            shutdown_tx,
            links: ClientLinks {
                loop_tx,
                event_tx,
                shutdown,
            },
        })
    }

    /// Fold a pedal event into the status served to clients
    pub async fn apply_event(&self, event: &PedalEvent) {
        let mut state = self.state.write().await;
        state.status.apply(event);
        debug!(%event, "IPC server: status updated");
    }

    /// Run the server, accepting connections
    pub async fn run(&self) -> Result<()> {
        let listener = self.listener.as_ref().context("server not initialized")?;

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    debug!("client connected");
                    let state = Arc::clone(&self.state);
                    let links = self.links.clone();
                    let mut shutdown_rx = self.shutdown_tx.subscribe();

                    tokio::spawn(async move {
                        tokio::select! {
                            result = Self::handle_client(stream, state, links) => {
                                if let Err(e) = result {
                                    warn!(?e, "client handler error");
                                }
                            }
                            _ = shutdown_rx.recv() => {
                                debug!("client handler shutting down");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(?e, "accept error");
                }
            }
        }
    }

    /// Handle a single client connection
    async fn handle_client(
        stream: UnixStream,
        state: Arc<RwLock<ServerState>>,
        links: ClientLinks,
    ) -> Result<()> {
        let (mut reader, mut writer) = stream.into_split();

        // Responses and notifications share one ordered writer
        let (out_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(32);
        let writer_task = tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                write_frame(&mut writer, &frame).await?;
            }
            Ok::<_, anyhow::Error>(())
        });

        let mut forwarder = None;
        let result = async {
            while let Some(body) = read_frame(&mut reader).await? {
                let request: Request =
                    serde_json::from_slice(&body).context("failed to parse request")?;
                debug!(?request, "received request");

                let (response, subscribe) = Self::process_request(request, &state, &links).await;
                if subscribe && forwarder.is_none() {
                    debug!("client subscribed to notifications");
                    forwarder = Some(tokio::spawn(forward_events(
                        links.event_tx.subscribe(),
                        out_tx.clone(),
                    )));
                }

                let frame = serde_json::to_vec(&response)?;
                if out_tx.send(frame).await.is_err() {
                    break;
                }
            }
            debug!("client disconnected");
            Ok::<_, anyhow::Error>(())
        }
        .await;

        if let Some(forwarder) = forwarder {
            forwarder.abort();
        }
        drop(out_tx);
        writer_task.await.context("writer task failed")??;

        result
    }

    /// Process a request and return a response
    /// Returns (Response, should_subscribe)
    async fn process_request(
        request: Request,
        state: &Arc<RwLock<ServerState>>,
        links: &ClientLinks,
    ) -> (Response, bool) {
        match request {
            Request::Ping => (Response::Pong, false),

            Request::GetStatus => {
                let mut state = state.write().await;
                state.status.uptime_secs = state.start_time.elapsed().as_secs();
                (Response::Status(state.status.clone()), false)
            }

            Request::SetEnabled { enabled } => {
                match links.loop_tx.send(LoopInput::SetEnabled(enabled)) {
                    Ok(()) => {
                        info!(enabled, "enable toggle via IPC");
                        (Response::EnabledChange { enabled }, false)
                    }
                    Err(_) => (
                        Response::Error {
                            code: "pedal_loop_unavailable".to_string(),
                            message: "pedal loop is not running".to_string(),
                        },
                        false,
                    ),
                }
            }

            Request::Subscribe => (Response::Subscribed, true),

            Request::Quit => {
                info!("quit requested via IPC");
                links.shutdown.fire();
                (Response::ShuttingDown, false)
            }
        }
    }

    /// Gracefully shutdown the server
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());

        // Remove socket file
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(?e, "failed to remove socket file");
            }
        }

        info!("IPC server shutdown complete");
    }
}

/// Push pedal events to one subscribed client until it goes away
async fn forward_events(mut event_rx: broadcast::Receiver<PedalEvent>, out_tx: mpsc::Sender<Vec<u8>>) {
    loop {
        match event_rx.recv().await {
            Ok(event) => {
                let Ok(frame) = serde_json::to_vec(&event) else {
                    continue;
                };
                if out_tx.send(frame).await.is_err() {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(skipped = n, "subscriber lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Read one length-prefixed frame, `None` on clean EOF
async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_MESSAGE_LEN {
        warn!(len, "message too large, disconnecting");
        return Ok(None);
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(body))
}

/// Write one length-prefixed frame
async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, body: &[u8]) -> Result<()> {
    let len = (body.len() as u32).to_le_bytes();
    writer.write_all(&len).await?;
    writer.write_all(body).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use serde_json::Value;

    use super::*;
    use crate::lifecycle::ShutdownSignal;

    static NEXT_SOCKET: AtomicUsize = AtomicUsize::new(0);

    fn socket_path() -> PathBuf {
        std::env::temp_dir().join(format!(
            "footpedal-ipc-test-{}-{}/daemon.sock",
            std::process::id(),
            NEXT_SOCKET.fetch_add(1, Ordering::SeqCst)
        ))
    }

    struct Harness {
        server: Arc<Server>,
        loop_rx: std::sync::mpsc::Receiver<LoopInput>,
        event_tx: broadcast::Sender<PedalEvent>,
        shutdown: ShutdownSignal,
        path: PathBuf,
    }

    fn harness() -> Harness {
        let path = socket_path();
        let (loop_tx, loop_rx) = std::sync::mpsc::channel();
        let (event_tx, _) = broadcast::channel(16);
        let shutdown = ShutdownSignal::new();
        let server = Server::new(
            &path,
            LoopSender::new(loop_tx),
            event_tx.clone(),
            shutdown.trigger(),
        )
        .unwrap();
        Harness {
            server: Arc::new(server),
            loop_rx,
            event_tx,
            shutdown,
            path,
        }
    }

    async fn connect(h: &Harness) -> UnixStream {
        let server = Arc::clone(&h.server);
        tokio::spawn(async move {
            let _ = server.run().await;
        });
        UnixStream::connect(&h.path).await.unwrap()
    }

    async fn request(stream: &mut UnixStream, request: &Request) -> Value {
        write_frame(stream, &serde_json::to_vec(request).unwrap()).await.unwrap();
        receive(stream).await
    }

    async fn receive(stream: &mut UnixStream) -> Value {
        let frame = tokio::time::timeout(Duration::from_secs(2), read_frame(stream))
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        serde_json::from_slice(&frame).unwrap()
    }

    #[tokio::test]
    async fn test_ping() {
        let h = harness();
        let mut client = connect(&h).await;
        let resp = request(&mut client, &Request::Ping).await;
        assert_eq!(resp["type"], "pong");
    }

    #[tokio::test]
    async fn test_status_reflects_events() {
        let h = harness();
        h.server
            .apply_event(&PedalEvent::ConnectionChanged { connected: true })
            .await;
        h.server
            .apply_event(&PedalEvent::PressChanged { pressed: true })
            .await;

        let mut client = connect(&h).await;
        let resp = request(&mut client, &Request::GetStatus).await;
        assert_eq!(resp["type"], "status");
        assert_eq!(resp["connected"], true);
        assert_eq!(resp["pressed"], true);
        assert_eq!(resp["enabled"], true);
    }

    #[tokio::test]
    async fn test_set_enabled_reaches_pedal_loop() {
        let h = harness();
        let mut client = connect(&h).await;
        let resp = request(&mut client, &Request::SetEnabled { enabled: false }).await;
        assert_eq!(resp["type"], "enabled_change");
        assert_eq!(resp["enabled"], false);
        assert_eq!(h.loop_rx.try_recv().unwrap(), LoopInput::SetEnabled(false));
    }

    #[tokio::test]
    async fn test_set_enabled_without_pedal_loop() {
        let h = harness();
        let Harness {
            server,
            loop_rx,
            path,
            ..
        } = h;
        drop(loop_rx);

        let runner = Arc::clone(&server);
        tokio::spawn(async move {
            let _ = runner.run().await;
        });
        let mut client = UnixStream::connect(&path).await.unwrap();
        let resp = request(&mut client, &Request::SetEnabled { enabled: true }).await;
        assert_eq!(resp["type"], "error");
        assert_eq!(resp["code"], "pedal_loop_unavailable");
    }

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let h = harness();
        let mut client = connect(&h).await;
        let resp = request(&mut client, &Request::Subscribe).await;
        assert_eq!(resp["type"], "subscribed");

        h.event_tx
            .send(PedalEvent::PressChanged { pressed: true })
            .unwrap();
        let pushed = receive(&mut client).await;
        assert_eq!(pushed["type"], "press_changed");
        assert_eq!(pushed["pressed"], true);
    }

    #[tokio::test]
    async fn test_quit_triggers_shutdown() {
        let h = harness();
        let mut client = connect(&h).await;
        let resp = request(&mut client, &Request::Quit).await;
        assert_eq!(resp["type"], "shutting_down");

        let waited = tokio::time::timeout(Duration::from_secs(1), h.shutdown.wait()).await;
        assert!(waited.is_ok());
    }

    #[test]
    fn test_shutdown_removes_socket() {
        tokio_test::block_on(async {
            let h = harness();
            assert!(h.path.exists());
            h.server.shutdown().await;
            assert!(!h.path.exists());
        });
    }
}
