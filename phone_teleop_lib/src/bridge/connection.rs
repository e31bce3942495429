//! Connection manager: the only place the phone socket is touched.
//!
//! Runs on a dedicated OS thread with its own current-thread tokio runtime.
//! The host thread talks to it through three things only: the shared
//! [`ConnectionStatus`], the [`CommandQueue`] it fills, and a bounded channel
//! of feedback payloads it drains.

use crate::{
    decode_command, CommandQueue, ConnectionRole, ConnectionState, ConnectionStatus, DecodeError,
    PhoneTeleopConfig, PushOutcome, TelemetryEncoder, TelemetryPayload, TeleopError,
};
use eyre::{eyre, Result};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use std::fmt;
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// How long a closing handshake may take before the socket is just dropped
const CLOSE_GRACE: Duration = Duration::from_millis(500);

/// Longest a single feedback write may block the session loop
const SEND_TIMEOUT: Duration = Duration::from_millis(500);

/// Sent once to the thread waiting in `connect()`
pub type ReadySignal = Result<(), String>;

/// Where the worker gets its peer from.
enum Endpoint {
    Dial { url: String },
    Listen { addr: String, listener: Option<TcpListener> },
}

impl Endpoint {
    fn from_config(config: &PhoneTeleopConfig) -> Self {
        match config.role {
            ConnectionRole::Client => Self::Dial {
                url: config.phone_url(),
            },
            ConnectionRole::Server => Self::Listen {
                addr: config.listen_addr(),
                listener: None,
            },
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dial { url } => write!(f, "dialing {}", url),
            Self::Listen { addr, .. } => write!(f, "listening on {}", addr),
        }
    }
}

/// An established WebSocket, whichever side opened it.
enum PeerLink {
    Dialed(WebSocketStream<MaybeTlsStream<TcpStream>>),
    Accepted(WebSocketStream<TcpStream>),
}

pub struct ConnectionManager {
    config: PhoneTeleopConfig,
    status: ConnectionStatus,
    commands: Arc<CommandQueue>,
    feedback_rx: mpsc::Receiver<TelemetryPayload>,
    encoder: TelemetryEncoder,
    ready: Option<std_mpsc::SyncSender<ReadySignal>>,
    shutdown: CancellationToken,
}

impl ConnectionManager {
    pub fn new(
        config: PhoneTeleopConfig,
        status: ConnectionStatus,
        commands: Arc<CommandQueue>,
        feedback_rx: mpsc::Receiver<TelemetryPayload>,
        ready: std_mpsc::SyncSender<ReadySignal>,
        shutdown: CancellationToken,
    ) -> Self {
        let encoder = TelemetryEncoder::new(config.video_quality);
        Self {
            config,
            status,
            commands,
            feedback_rx,
            encoder,
            ready: Some(ready),
            shutdown,
        }
    }

    /// Connect, serve, back off, repeat, until the shutdown token fires.
    pub async fn run(mut self) {
        let shutdown = self.shutdown.clone();
        let backoff = self.config.reconnect_interval();
        let mut endpoint = Endpoint::from_config(&self.config);

        info!("Phone link worker started, {}", endpoint);

        loop {
            self.status.set(ConnectionState::Connecting);

            let link = tokio::select! {
                _ = shutdown.cancelled() => break,
                link = self.establish(&mut endpoint) => link,
            };

            match link {
                Ok(link) => self.serve(link).await,
                Err(e) => warn!("Phone connection attempt failed: {}", e),
            }

            self.status.set(ConnectionState::Disconnected);
            if shutdown.is_cancelled() {
                break;
            }

            debug!("Reconnecting in {:.1}s", backoff.as_secs_f64());
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(backoff) => {}
            }
        }

        self.status.set(ConnectionState::Disconnected);
        info!("Phone link worker stopped");
    }

    async fn establish(&self, endpoint: &mut Endpoint) -> Result<PeerLink> {
        let handshake_timeout = self.config.connection_timeout();

        match endpoint {
            Endpoint::Dial { url } => {
                let (ws, _) = timeout(handshake_timeout, connect_async(url.as_str()))
                    .await
                    .map_err(|_| eyre!("timed out dialing {}", url))??;
                info!("Connected to phone at {}", url);
                Ok(PeerLink::Dialed(ws))
            }
            Endpoint::Listen { addr, listener } => {
                if listener.is_none() {
                    let bound = TcpListener::bind(addr.as_str()).await?;
                    info!("Waiting for phone on {}", bound.local_addr()?);
                    *listener = Some(bound);
                }
                let listener = listener
                    .as_ref()
                    .ok_or_else(|| eyre!("listener on {} unavailable", addr))?;

                let (tcp, peer) = listener.accept().await?;
                let ws = timeout(handshake_timeout, accept_async(tcp))
                    .await
                    .map_err(|_| eyre!("handshake with {} timed out", peer))??;
                info!("Phone connected from {}", peer);
                Ok(PeerLink::Accepted(ws))
            }
        }
    }

    async fn serve(&mut self, link: PeerLink) {
        match link {
            PeerLink::Dialed(ws) => self.serve_stream(ws).await,
            PeerLink::Accepted(ws) => self.serve_stream(ws).await,
        }
    }

    /// Read loop for one peer session. Returns when the peer goes away or on shutdown.
    async fn serve_stream<S>(&mut self, ws: WebSocketStream<S>)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let Self {
            status,
            commands,
            feedback_rx,
            encoder,
            ready,
            shutdown,
            ..
        } = self;
        let commands: &CommandQueue = commands;
        let encoder: &TelemetryEncoder = encoder;

        // Anything queued before this peer belongs to nobody
        commands.clear();
        while feedback_rx.try_recv().is_ok() {}

        let session = status.begin_session();
        let connection_id = Uuid::new_v4();
        info!("Phone session {} started (connection {})", session, connection_id);

        if let Some(ready) = ready.take() {
            let _ = ready.try_send(Ok(()));
        }

        let (mut sink, mut stream) = ws.split();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("Closing phone session {} on shutdown", session);
                    let _ = timeout(CLOSE_GRACE, sink.close()).await;
                    break;
                }

                Some(payload) = feedback_rx.recv() => {
                    send_feedback(&mut sink, encoder, &payload).await;
                }

                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => handle_frame(commands, session, text.as_str()),
                    Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                        Ok(text) => handle_frame(commands, session, text),
                        Err(_) => warn!("Dropping non-UTF-8 binary frame ({} bytes)", bytes.len()),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        info!(
                            "Phone closed session {}: {}",
                            session,
                            frame.map(|f| f.reason.to_string()).unwrap_or_default()
                        );
                        break;
                    }
                    // Ping/pong is answered by the transport
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("Phone session {} transport error: {}", session, e);
                        break;
                    }
                    None => {
                        info!("Phone session {} ended", session);
                        break;
                    }
                },
            }
        }

        status.set(ConnectionState::Disconnected);
    }
}

fn handle_frame(commands: &CommandQueue, session: u64, text: &str) {
    match decode_command(text) {
        Ok(command) if command.drives_motion() => {
            match commands.push(session, command) {
                PushOutcome::Queued => {}
                PushOutcome::EvictedOldest => debug!("Command queue full, evicted oldest command"),
                PushOutcome::Closed => debug!("Command queue closed, dropping command"),
            }
        }
        Ok(command) => debug!("Ignoring {} frame that does not drive motion", command.kind().as_str()),
        Err(e @ DecodeError::ParseFailure(_)) => warn!("Invalid JSON from phone: {}", e),
        Err(e @ DecodeError::UnknownType(_)) => warn!("Dropping phone frame: {}", e),
    }
}

async fn send_feedback<S>(
    sink: &mut SplitSink<WebSocketStream<S>, Message>,
    encoder: &TelemetryEncoder,
    payload: &TelemetryPayload,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let text = match encoder.encode(payload) {
        Ok(text) => text,
        Err(e) => {
            warn!("Failed to encode feedback: {}", e);
            return;
        }
    };

    match timeout(SEND_TIMEOUT, sink.send(Message::text(text))).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!("Feedback send failed: {}", e),
        Err(_) => warn!("Feedback send stalled for {:?}, dropping payload", SEND_TIMEOUT),
    }
}

/// Host-side handle on the running socket worker.
pub struct WorkerHandle {
    shutdown: CancellationToken,
    feedback_tx: mpsc::Sender<TelemetryPayload>,
    done_rx: std_mpsc::Receiver<()>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Start the worker thread. The returned receiver yields once the first peer is connected.
    pub fn spawn(
        config: PhoneTeleopConfig,
        status: ConnectionStatus,
        commands: Arc<CommandQueue>,
    ) -> Result<(Self, std_mpsc::Receiver<ReadySignal>), TeleopError> {
        let shutdown = CancellationToken::new();
        let (feedback_tx, feedback_rx) = mpsc::channel(config.feedback_queue_capacity.max(1));
        let (ready_tx, ready_rx) = std_mpsc::sync_channel(1);
        let (done_tx, done_rx) = std_mpsc::sync_channel(1);

        let worker_status = status.clone();
        let manager = ConnectionManager::new(
            config,
            status,
            commands,
            feedback_rx,
            ready_tx.clone(),
            shutdown.clone(),
        );

        let thread = std::thread::Builder::new()
            .name("phone-teleop-io".to_string())
            .spawn(move || {
                match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => {
                        runtime.block_on(manager.run());
                        // Dropping the runtime closes any socket still open
                        drop(runtime);
                    }
                    Err(e) => {
                        error!("Failed to start phone link runtime: {}", e);
                        worker_status.set(ConnectionState::Disconnected);
                        let _ = ready_tx.try_send(Err(e.to_string()));
                    }
                }
                let _ = done_tx.send(());
            })
            .map_err(|e| TeleopError::Worker(e.to_string()))?;

        Ok((
            Self {
                shutdown,
                feedback_tx,
                done_rx,
                thread: Some(thread),
            },
            ready_rx,
        ))
    }

    /// Hand a payload to the worker without waiting. Returns false if it was dropped.
    pub fn try_send_feedback(&self, payload: TelemetryPayload) -> bool {
        match self.feedback_tx.try_send(payload) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("Feedback channel full, dropping payload");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Cancel the worker and wait up to `wait` for its thread to exit.
    /// Returns false if the thread was still running when the wait ran out.
    pub fn stop(mut self, wait: Duration) -> bool {
        self.shutdown.cancel();

        match self.done_rx.recv_timeout(wait) {
            Ok(()) | Err(std_mpsc::RecvTimeoutError::Disconnected) => {
                if let Some(thread) = self.thread.take() {
                    if thread.join().is_err() {
                        warn!("Phone link worker panicked");
                    }
                }
                true
            }
            Err(std_mpsc::RecvTimeoutError::Timeout) => false,
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        // A handle dropped without `stop` must not leave the socket running
        self.shutdown.cancel();
    }
}
