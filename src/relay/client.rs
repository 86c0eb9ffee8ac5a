use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use base64::Engine;
use futures::{Sink, SinkExt, Stream, StreamExt};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use super::messages::{ClientEvent, ServerEvent, SessionProperties};
use super::turn::{TurnPolicy, TurnState};
use crate::audio::{CaptureBackendFactory, PlaybackSink};
use crate::config::Credential;

/// Errors from the realtime connection.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("invalid realtime endpoint: {0}")]
    Endpoint(String),

    #[error("realtime connection failed: {0}")]
    Connect(#[source] tokio_tungstenite::tungstenite::Error),
}

/// Configuration for the realtime duplex voice relay.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// WebSocket endpoint of the realtime speech service
    pub endpoint: String,
    /// Bearer credential, supplied out of band
    pub credential: Credential,
    /// Voice the remote side speaks with
    pub voice: String,
    /// Instructions declared in the session contract
    pub instructions: String,
    /// Transcription engine declared in the session contract
    pub transcription_model: String,
    /// Silence policy ending the local speaking turn
    pub turn: TurnPolicy,
}

/// State shared between the relay's loops.
struct RelayShared {
    running: AtomicBool,
    /// Guards against overlapping send loops; a turn start is always a
    /// reaction to an inbound event, never a timer.
    turn_active: AtomicBool,
    failed: AtomicBool,
    capture_factory: Arc<dyn CaptureBackendFactory>,
    capture_device: String,
    playback: Mutex<Box<dyn PlaybackSink>>,
    /// Taken on stop so the writer drains and closes the connection.
    outbound: Mutex<Option<mpsc::Sender<ClientEvent>>>,
    policy: TurnPolicy,
    turn_task: Mutex<Option<JoinHandle<()>>>,
}

/// Realtime duplex voice relay
///
/// Maintains one persistent WebSocket connection to the speech service.
/// A writer task owns the sink and drains an in-order outbound channel, so
/// a commit can never overtake a prior append. The receive loop reacts to
/// inbound events: response audio plays immediately, and turn boundaries
/// start a fresh send loop which captures, appends, and commits on
/// sustained silence.
pub struct RealtimeRelay {
    config: RelayConfig,
    capture_factory: Arc<dyn CaptureBackendFactory>,
    shared: Option<Arc<RelayShared>>,
    writer_task: Option<JoinHandle<()>>,
    receive_task: Option<JoinHandle<()>>,
}

impl RealtimeRelay {
    pub fn new(config: RelayConfig, capture_factory: Arc<dyn CaptureBackendFactory>) -> Self {
        Self {
            config,
            capture_factory,
            shared: None,
            writer_task: None,
            receive_task: None,
        }
    }

    /// Open the connection and start the relay loops.
    ///
    /// Sends the session contract before any audio; the first send loop
    /// starts only when the service confirms the session.
    pub async fn start(
        &mut self,
        capture_device: &str,
        playback: Box<dyn PlaybackSink>,
    ) -> Result<(), RelayError> {
        if self.shared.is_some() {
            warn!("Relay already started");
            return Ok(());
        }

        let mut request = self
            .config
            .endpoint
            .as_str()
            .into_client_request()
            .map_err(|e| RelayError::Endpoint(e.to_string()))?;

        let auth = format!("Bearer {}", self.config.credential.reveal())
            .parse()
            .map_err(|_| RelayError::Endpoint("credential is not header-safe".to_string()))?;
        request.headers_mut().insert("Authorization", auth);
        request
            .headers_mut()
            .insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

        let (ws, _) = connect_async(request).await.map_err(RelayError::Connect)?;

        info!("Connected to realtime service");

        let (sink, stream) = ws.split();
        let (out_tx, out_rx) = mpsc::channel(64);

        let shared = Arc::new(RelayShared {
            running: AtomicBool::new(true),
            turn_active: AtomicBool::new(false),
            failed: AtomicBool::new(false),
            capture_factory: Arc::clone(&self.capture_factory),
            capture_device: capture_device.to_string(),
            playback: Mutex::new(playback),
            outbound: Mutex::new(Some(out_tx.clone())),
            policy: self.config.turn.clone(),
            turn_task: Mutex::new(None),
        });

        self.writer_task = Some(tokio::spawn(run_writer(sink, out_rx, Arc::clone(&shared))));

        // The session contract goes out before any audio.
        let contract = ClientEvent::SessionUpdate {
            session: SessionProperties::pcm16(
                &self.config.voice,
                &self.config.instructions,
                &self.config.transcription_model,
            ),
        };
        if out_tx.send(contract).await.is_err() {
            warn!("Writer task gone before session contract was sent");
        }

        self.receive_task = Some(tokio::spawn(run_receive_loop(stream, Arc::clone(&shared))));
        self.shared = Some(shared);

        Ok(())
    }

    /// Stop the relay: signal the loops, close the connection, and wait for
    /// every relay task to exit. Safe to call if the connection never
    /// opened, and safe to call twice.
    pub async fn stop(&mut self) {
        let Some(shared) = self.shared.take() else {
            return;
        };

        info!("Stopping realtime relay");

        shared.running.store(false, Ordering::SeqCst);

        // Dropping the outbound sender lets the writer drain in-flight
        // messages and then close the connection, which in turn ends the
        // receive loop.
        shared.outbound.lock().await.take();

        if let Some(task) = shared.turn_task.lock().await.take() {
            if let Err(e) = task.await {
                error!("Relay send task panicked: {}", e);
            }
        }

        if let Some(task) = self.writer_task.take() {
            if let Err(e) = task.await {
                error!("Relay writer task panicked: {}", e);
            }
        }

        if let Some(task) = self.receive_task.take() {
            if let Err(e) = task.await {
                error!("Relay receive task panicked: {}", e);
            }
        }

        if let Err(e) = shared.playback.lock().await.close().await {
            warn!("Failed to close relay playback: {}", e);
        }

        info!("Realtime relay stopped");
    }

    /// Whether the relay hit a connection-level failure after starting.
    pub fn failed(&self) -> bool {
        self.shared
            .as_ref()
            .map(|s| s.failed.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    pub fn is_running(&self) -> bool {
        self.shared
            .as_ref()
            .map(|s| s.running.load(Ordering::SeqCst))
            .unwrap_or(false)
    }
}

/// Drain the outbound channel into the connection, in order.
async fn run_writer<S>(mut sink: S, mut out_rx: mpsc::Receiver<ClientEvent>, shared: Arc<RelayShared>)
where
    S: Sink<Message> + Unpin + Send,
    S::Error: std::fmt::Display,
{
    while let Some(event) = out_rx.recv().await {
        let text = match serde_json::to_string(&event) {
            Ok(text) => text,
            Err(e) => {
                error!("Failed to serialize client event: {}", e);
                continue;
            }
        };

        if let Err(e) = sink.send(Message::Text(text)).await {
            error!("Realtime send failed: {}", e);
            shared.failed.store(true, Ordering::SeqCst);
            shared.running.store(false, Ordering::SeqCst);
            break;
        }
    }

    let _ = sink.send(Message::Close(None)).await;
}

/// React to inbound events until the connection ends.
async fn run_receive_loop<S>(mut stream: S, shared: Arc<RelayShared>)
where
    S: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin + Send,
{
    while let Some(msg) = stream.next().await {
        if !shared.running.load(Ordering::SeqCst) {
            break;
        }

        match msg {
            Ok(Message::Text(text)) => match serde_json::from_str::<ServerEvent>(&text) {
                Ok(event) => handle_server_event(event, &shared).await,
                Err(e) => warn!("Unparseable server event: {}", e),
            },
            Ok(Message::Close(_)) => {
                info!("Realtime connection closed by server");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                error!("Realtime connection error: {}", e);
                shared.failed.store(true, Ordering::SeqCst);
                break;
            }
        }
    }

    shared.running.store(false, Ordering::SeqCst);
}

async fn handle_server_event(event: ServerEvent, shared: &Arc<RelayShared>) {
    match event {
        ServerEvent::SessionCreated => {
            info!("Realtime session created");
            start_send_turn(shared).await;
        }
        ServerEvent::ResponseDone => {
            info!("Response complete; turn returns to local side");
            start_send_turn(shared).await;
        }
        ServerEvent::ResponseAudioDelta { delta } => {
            match base64::engine::general_purpose::STANDARD.decode(delta.as_bytes()) {
                Ok(pcm) => {
                    let mut playback = shared.playback.lock().await;
                    if let Err(e) = playback.play(&pcm).await {
                        warn!("Response playback failed: {}", e);
                    }
                }
                Err(e) => warn!("Undecodable response audio: {}", e),
            }
        }
        ServerEvent::SpeechStarted => debug!("Remote detected speech start"),
        ServerEvent::SpeechStopped => debug!("Remote detected speech stop"),
        ServerEvent::Committed => debug!("Remote acknowledged commit"),
        ServerEvent::Unknown => debug!("Ignoring unhandled server event"),
    }
}

/// Start one send loop in reaction to an inbound event.
///
/// The atomic guard makes duplicate starts a no-op, so no two send loops
/// ever run concurrently and each triggering event starts at most one.
async fn start_send_turn(shared: &Arc<RelayShared>) {
    if !shared.running.load(Ordering::SeqCst) {
        return;
    }

    if shared
        .turn_active
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        warn!("Send turn already active; ignoring start");
        return;
    }

    let outbound = shared.outbound.lock().await.clone();
    let Some(outbound) = outbound else {
        shared.turn_active.store(false, Ordering::SeqCst);
        return;
    };

    let turn_shared = Arc::clone(shared);
    let task = tokio::spawn(async move {
        if let Err(e) = run_send_turn(&turn_shared, outbound).await {
            warn!("Send turn ended with error: {}", e);
        }
        turn_shared.turn_active.store(false, Ordering::SeqCst);
    });

    let mut slot = shared.turn_task.lock().await;
    if let Some(prev) = slot.take() {
        // The guard was clear, so the previous turn has already wound down.
        let _ = prev.await;
    }
    *slot = Some(task);
}

/// One local speaking turn: capture, append every chunk, commit on
/// sustained silence, then hand the turn to the remote side.
async fn run_send_turn(shared: &Arc<RelayShared>, outbound: mpsc::Sender<ClientEvent>) -> Result<()> {
    info!("Send turn started");

    let mut backend = shared
        .capture_factory
        .create(&shared.capture_device)
        .context("Failed to create capture backend")?;
    let mut frames = backend.start().await.context("Failed to start capture")?;

    let mut turn = TurnState::new();
    let mut committed = false;

    while shared.running.load(Ordering::SeqCst) {
        let Some(frame) = frames.recv().await else {
            break;
        };

        let audio = base64::engine::general_purpose::STANDARD.encode(frame.to_le_bytes());
        if outbound
            .send(ClientEvent::InputAudioAppend { audio })
            .await
            .is_err()
        {
            // Writer gone; the connection is down.
            break;
        }

        if turn.observe(&frame, &shared.policy) {
            if outbound.send(ClientEvent::InputAudioCommit).await.is_err() {
                break;
            }
            if outbound.send(ClientEvent::ResponseCreate).await.is_err() {
                break;
            }
            committed = true;
            break;
        }
    }

    drop(frames);
    backend.stop().await.context("Failed to stop capture")?;

    if committed {
        info!("Turn committed; awaiting response");
    }

    Ok(())
}
