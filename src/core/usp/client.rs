//! USP connection client.
//!
//! A [`Client`] holds an immutable configuration and a handle to the shared
//! [`ThreadService`]. [`Client::connect`] registers a session and spawns its
//! task, returning a [`Connection`] immediately; the WebSocket handshake runs
//! in the background and audio written before it completes is queued.
//!
//! # Example
//!
//! ```rust,no_run
//! use usp_client::{AuthenticationType, Client, ThreadService, UspConfig, UspEvent};
//!
//! # async fn example() -> Result<(), usp_client::UspError> {
//! let service = ThreadService::new()?;
//! service.init()?;
//!
//! let config = UspConfig::builder()
//!     .region("westus")
//!     .authentication(AuthenticationType::SubscriptionKey, "my-key")
//!     .build()?;
//!
//! let mut connection = Client::new(config, &service).connect()?;
//! let mut events = connection.events()?;
//!
//! connection.write_audio(b"RIFF....").await?;
//! connection.flush_audio().await?;
//!
//! while let Some(event) = events.recv().await {
//!     if let UspEvent::Recognition(r) = event {
//!         println!("{}", r.result.text);
//!         break;
//!     }
//! }
//!
//! connection.term().await;
//! service.term().await;
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures::{FutureExt, SinkExt, StreamExt};
use http::HeaderValue;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::{ResolvedEndpoint, UspConfig};
use super::errors::{ErrorCode, UsageError, UspError};
use super::events::{
    Callbacks, ErrorEvent, EventReceiver, RecognitionEvent, RecognitionResult, RecognitionStatus,
    UspEvent, dispatch,
};
use super::messages::{
    UspMessage, encode_audio_message, encode_text_message, headers, new_request_id, paths,
    speech_config_payload,
};
use super::service::{ConnectionState, SessionHandle, ThreadService};

/// Upper bound for `term()` waiting on the session task.
const TERM_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound for the closing handshake when a session is cancelled.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// =============================================================================
// Statistics
// =============================================================================

#[derive(Debug, Default)]
struct Counters {
    bytes_queued: AtomicU64,
    bytes_sent: AtomicU64,
    audio_messages_sent: AtomicU64,
    recognition_events: AtomicU64,
    error_events: AtomicU64,
}

/// Snapshot of a connection's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    /// Audio bytes accepted by `write_audio`.
    pub bytes_queued: u64,
    /// Audio payload bytes written to the socket.
    pub bytes_sent: u64,
    /// Binary audio frames written, end-of-stream frames included.
    pub audio_messages_sent: u64,
    pub recognition_events: u64,
    pub error_events: u64,
}

impl Counters {
    fn snapshot(&self) -> ConnectionStats {
        ConnectionStats {
            bytes_queued: self.bytes_queued.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            audio_messages_sent: self.audio_messages_sent.load(Ordering::Relaxed),
            recognition_events: self.recognition_events.load(Ordering::Relaxed),
            error_events: self.error_events.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// Client
// =============================================================================

/// Connection factory for one session.
pub struct Client {
    config: UspConfig,
    service: ThreadService,
    session_id: String,
    callbacks: Option<Arc<dyn Callbacks>>,
}

impl Client {
    /// Create a client with a fresh session identifier.
    pub fn new(config: UspConfig, service: &ThreadService) -> Self {
        Self {
            config,
            service: service.clone(),
            session_id: uuid::Uuid::new_v4().simple().to_string(),
            callbacks: None,
        }
    }

    /// Deliver events to `callbacks` instead of an [`EventReceiver`].
    pub fn with_callbacks(mut self, callbacks: Arc<dyn Callbacks>) -> Self {
        self.callbacks = Some(callbacks);
        self
    }

    /// 32 lowercase hex characters, sent as `X-ConnectionId`.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn config(&self) -> &UspConfig {
        &self.config
    }

    /// Start the session.
    ///
    /// Returns as soon as the session task is spawned. Handshake failures are
    /// reported as error events; only lifecycle misuse fails here.
    pub fn connect(self) -> Result<Connection, UspError> {
        let Self {
            config,
            service,
            session_id,
            callbacks,
        } = self;

        let (event_tx, event_rx) = mpsc::unbounded_channel::<UspEvent>();
        let handle = service.register(&session_id, event_tx)?;

        let closed = Arc::new(AtomicBool::new(false));
        let receiver = EventReceiver::new(event_rx, closed.clone());
        let endpoint = config.resolve();
        let (audio_tx, audio_rx) = mpsc::channel::<AudioCommand>(config.audio_queue_depth());
        let cancel = service.child_token();
        let stats = Arc::new(Counters::default());

        info!(
            "Connecting USP session {} to {} ({})",
            session_id, endpoint.url, endpoint.endpoint_type
        );

        let session = Session {
            service: service.clone(),
            handle,
            session_id: session_id.clone(),
            config: config.clone(),
            endpoint: endpoint.clone(),
            audio_rx,
            cancel: cancel.clone(),
            stats: stats.clone(),
            request_id: None,
        };
        let task = service.spawn(supervise(
            service.clone(),
            handle,
            session_id.clone(),
            stats.clone(),
            session.run(),
        ));

        // Callbacks consume the event stream on their own task.
        let (events, dispatch_task) = match callbacks {
            Some(callbacks) => {
                let mut receiver = receiver;
                let dispatch_task = service.spawn(async move {
                    while let Some(event) = receiver.recv().await {
                        dispatch(callbacks.as_ref(), event).await;
                    }
                });
                (None, Some(dispatch_task))
            }
            None => (Some(receiver), None),
        };

        Ok(Connection {
            handle,
            session_id,
            service,
            write_timeout: config.write_timeout(),
            endpoint,
            audio_tx: Some(audio_tx),
            events,
            task: Some(task),
            dispatch_task,
            cancel,
            closed,
            stats,
        })
    }
}

// =============================================================================
// Connection
// =============================================================================

enum AudioCommand {
    Chunk(Bytes),
    EndOfStream,
}

/// A live session created by [`Client::connect`].
///
/// Events are buffered without bound until they are consumed, so a caller
/// that neither takes [`events`](Self::events) nor registers callbacks should
/// keep sessions short.
pub struct Connection {
    handle: SessionHandle,
    session_id: String,
    service: ThreadService,
    write_timeout: Duration,
    endpoint: ResolvedEndpoint,
    audio_tx: Option<mpsc::Sender<AudioCommand>>,
    events: Option<EventReceiver>,
    task: Option<JoinHandle<()>>,
    dispatch_task: Option<JoinHandle<()>>,
    cancel: CancellationToken,
    closed: Arc<AtomicBool>,
    stats: Arc<Counters>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("session_id", &self.session_id)
            .field("handle", &self.handle)
            .field("endpoint", &self.endpoint.url.as_str())
            .field("state", &self.state())
            .finish()
    }
}

impl Connection {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Target the session connects to.
    pub fn endpoint(&self) -> &ResolvedEndpoint {
        &self.endpoint
    }

    pub fn state(&self) -> ConnectionState {
        if self.closed.load(Ordering::Acquire) {
            return ConnectionState::Terminated;
        }
        self.service.session_state(self.handle)
    }

    pub fn stats(&self) -> ConnectionStats {
        self.stats.snapshot()
    }

    /// Take the event stream. Fails if callbacks were registered or the
    /// stream was already taken.
    pub fn events(&mut self) -> Result<EventReceiver, UspError> {
        self.events
            .take()
            .ok_or_else(|| UsageError::EventsAlreadyTaken.into())
    }

    /// Queue audio bytes for upload.
    ///
    /// Empty slices are accepted and ignored. While the handshake is in
    /// progress a full queue waits for the handshake to resolve, so early
    /// audio is never lost. Once connected, a queue that stays full for the
    /// configured write timeout fails the session with a `WriteTimeout`
    /// error event; no stream with a gap is ever sent. Once the session has
    /// failed, bytes are accepted and discarded.
    pub async fn write_audio(&self, data: &[u8]) -> Result<(), UspError> {
        let tx = self.sender()?;
        if data.is_empty() {
            return Ok(());
        }

        let len = data.len();
        let chunk = AudioCommand::Chunk(Bytes::copy_from_slice(data));
        if self.enqueue(tx, chunk, len).await {
            self.stats.bytes_queued.fetch_add(len as u64, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Mark the end of the current audio stream so the service can finish
    /// the turn.
    pub async fn flush_audio(&self) -> Result<(), UspError> {
        let tx = self.sender()?;
        self.enqueue(tx, AudioCommand::EndOfStream, 0).await;
        Ok(())
    }

    /// Hand a command to the session task. Returns true if it was queued.
    ///
    /// A queue slot is reserved before the command is committed, so a wait
    /// that times out never consumes the command.
    async fn enqueue(
        &self,
        tx: &mpsc::Sender<AudioCommand>,
        command: AudioCommand,
        len: usize,
    ) -> bool {
        loop {
            if self.state() == ConnectionState::Failed {
                debug!(
                    "USP session {} has failed, discarding {} audio bytes",
                    self.session_id, len
                );
                return false;
            }

            match timeout(self.write_timeout, tx.reserve()).await {
                Ok(Ok(permit)) => {
                    permit.send(command);
                    return true;
                }
                Ok(Err(_)) => {
                    debug!(
                        "USP session {} has ended, discarding {} audio bytes",
                        self.session_id, len
                    );
                    return false;
                }
                // The handshake is bounded by the connect timeout and either
                // drains the queue or drops it.
                Err(_) if self.state() == ConnectionState::Connecting => {
                    debug!(
                        "USP session {} still connecting, audio queue full",
                        self.session_id
                    );
                }
                Err(_) => {
                    self.fail_write(len);
                    return false;
                }
            }
        }
    }

    /// The service stopped draining audio. Dropping the chunk would leave a
    /// hole in the stream, so the session ends instead.
    fn fail_write(&self, len: usize) {
        let event = ErrorEvent::new(
            ErrorCode::WriteTimeout,
            format!(
                "Audio queue full for {}ms, dropped {} bytes",
                self.write_timeout.as_millis(),
                len
            ),
        );
        error!("USP session {}: {}", self.session_id, event);
        self.service.set_state(self.handle, ConnectionState::Failed);
        if self.service.emit(self.handle, UspEvent::Error(event)) {
            self.stats.error_events.fetch_add(1, Ordering::Relaxed);
        }
        self.cancel.cancel();
    }

    fn sender(&self) -> Result<&mpsc::Sender<AudioCommand>, UspError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(UsageError::Terminated.into());
        }
        self.audio_tx
            .as_ref()
            .ok_or_else(|| UsageError::Terminated.into())
    }

    /// Release the session.
    ///
    /// Idempotent and infallible. After it returns no callback runs and the
    /// event receiver yields `None`.
    pub async fn term(&mut self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.service.release(self.handle);
        self.audio_tx = None;
        self.cancel.cancel();

        if let Some(task) = self.task.take() {
            let abort = task.abort_handle();
            if timeout(TERM_TIMEOUT, task).await.is_err() {
                warn!(
                    "USP session {} did not stop within {:?}, aborting",
                    self.session_id, TERM_TIMEOUT
                );
                abort.abort();
            }
        }

        if let Some(dispatch_task) = self.dispatch_task.take() {
            dispatch_task.abort();
            let _ = dispatch_task.await;
        }

        info!("USP session {} terminated", self.session_id);
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.service.release(self.handle);
        self.cancel.cancel();
        if let Some(dispatch_task) = self.dispatch_task.take() {
            dispatch_task.abort();
        }
        debug!("USP session {} dropped without term()", self.session_id);
    }
}

// =============================================================================
// Session task
// =============================================================================

struct Session {
    service: ThreadService,
    handle: SessionHandle,
    session_id: String,
    config: UspConfig,
    endpoint: ResolvedEndpoint,
    audio_rx: mpsc::Receiver<AudioCommand>,
    cancel: CancellationToken,
    stats: Arc<Counters>,
    /// Request id of the current turn, assigned on its first audio frame.
    request_id: Option<String>,
}

impl Session {
    async fn run(mut self) {
        let cancel = self.cancel.clone();
        let connected = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("USP session {} cancelled during handshake", self.session_id);
                return;
            }
            result = self.handshake() => result,
        };

        let ws_stream = match connected {
            Ok(ws_stream) => ws_stream,
            Err(event) => {
                self.fail(event);
                return;
            }
        };

        self.service.set_state(self.handle, ConnectionState::Connected);
        info!("USP session {} connected", self.session_id);

        self.stream(ws_stream).await;
        info!("USP session {} closed", self.session_id);
    }

    async fn handshake(&self) -> Result<WsStream, ErrorEvent> {
        let mut request = self
            .endpoint
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| ErrorEvent::new(ErrorCode::ConnectionError, format!("Invalid request: {e}")))?;

        let (auth_name, auth_value) = self.config.authentication().header();
        let mut auth_value = HeaderValue::from_str(auth_value.as_str()).map_err(|_| {
            ErrorEvent::new(
                ErrorCode::AuthenticationError,
                "Credential contains characters not allowed in a header",
            )
        })?;
        auth_value.set_sensitive(true);
        let connection_id = HeaderValue::from_str(&self.session_id).map_err(|_| {
            ErrorEvent::new(ErrorCode::ConnectionError, "Invalid connection id")
        })?;

        let request_headers = request.headers_mut();
        request_headers.insert(auth_name, auth_value);
        request_headers.insert(headers::CONNECTION_ID, connection_id);

        let connect_timeout = self.config.connect_timeout();
        match timeout(connect_timeout, connect_async(request)).await {
            Ok(Ok((ws_stream, _response))) => Ok(ws_stream),
            Ok(Err(e)) => Err(classify_handshake_error(e)),
            Err(_) => Err(ErrorEvent::new(
                ErrorCode::HandshakeTimeout,
                format!(
                    "WebSocket handshake timed out after {}ms",
                    connect_timeout.as_millis()
                ),
            )),
        }
    }

    async fn stream(&mut self, ws_stream: WsStream) {
        let (mut ws_sink, mut ws_stream) = ws_stream.split();

        let speech_config = encode_text_message(
            paths::SPEECH_CONFIG,
            &new_request_id(),
            &speech_config_payload(&self.config, &self.session_id),
        );
        if let Err(e) = ws_sink.send(Message::Text(speech_config.into())).await {
            self.fail(ErrorEvent::new(
                ErrorCode::TransportError,
                format!("Failed to send speech.config: {e}"),
            ));
            return;
        }
        debug!("USP session {} sent speech.config", self.session_id);

        let cancel = self.cancel.clone();
        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!("USP session {} received shutdown signal", self.session_id);
                    let _ = timeout(CLOSE_TIMEOUT, ws_sink.send(Message::Close(None))).await;
                    break;
                }

                command = self.audio_rx.recv() => {
                    let frame = match command {
                        Some(AudioCommand::Chunk(chunk)) => {
                            let request_id = self.request_id.get_or_insert_with(new_request_id);
                            self.stats.bytes_sent.fetch_add(chunk.len() as u64, Ordering::Relaxed);
                            encode_audio_message(request_id, &chunk)
                        }
                        Some(AudioCommand::EndOfStream) => match self.request_id.as_deref() {
                            Some(request_id) => encode_audio_message(request_id, &[]),
                            None => continue,
                        },
                        None => break,
                    };

                    if let Err(e) = ws_sink.send(Message::Binary(frame)).await {
                        self.fail(ErrorEvent::new(
                            ErrorCode::TransportError,
                            format!("Failed to send audio: {e}"),
                        ));
                        break;
                    }
                    self.stats.audio_messages_sent.fetch_add(1, Ordering::Relaxed);
                }

                message = ws_stream.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => self.handle_text(text.as_str()),
                        Some(Ok(Message::Close(frame))) => {
                            let reason = frame
                                .map(|f| format!("{} {}", u16::from(f.code), f.reason.as_str()))
                                .unwrap_or_else(|| "no close frame".to_string());
                            self.fail(ErrorEvent::new(
                                ErrorCode::ConnectionError,
                                format!("Connection closed by service: {reason}"),
                            ));
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            self.fail(ErrorEvent::new(
                                ErrorCode::ConnectionError,
                                format!("WebSocket error: {e}"),
                            ));
                            break;
                        }
                        None => {
                            self.fail(ErrorEvent::new(
                                ErrorCode::ConnectionError,
                                "WebSocket stream ended unexpectedly",
                            ));
                            break;
                        }
                    }
                }
            }
        }
    }

    fn handle_text(&mut self, text: &str) {
        let message = match UspMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                warn!("USP session {} received unparseable message: {}", self.session_id, e);
                self.report(ErrorEvent::new(
                    ErrorCode::BadResponse,
                    format!("Unparseable message: {e}"),
                ));
                return;
            }
        };

        debug!("USP session {} received {}", self.session_id, message.path());
        match message {
            UspMessage::TurnStart { request_id } => {
                self.emit(UspEvent::TurnStarted { request_id });
            }
            UspMessage::SpeechStartDetected(boundary) => {
                self.emit(UspEvent::SpeechStartDetected {
                    offset: boundary.offset,
                });
            }
            UspMessage::SpeechHypothesis(h) | UspMessage::SpeechFragment(h) => {
                self.recognized(RecognitionStatus::IntermediateResult, h.text, h.offset, h.duration);
            }
            UspMessage::SpeechPhrase(phrase) => {
                if phrase.is_service_error() {
                    self.report(ErrorEvent::new(
                        ErrorCode::ServiceError,
                        "Service reported a recognition error",
                    ));
                }
                let text = phrase.text();
                self.recognized(phrase.status(), text, phrase.offset, phrase.duration);
            }
            UspMessage::SpeechEndDetected(boundary) => {
                self.emit(UspEvent::SpeechEndDetected {
                    offset: boundary.offset,
                });
            }
            UspMessage::TurnEnd { request_id } => {
                // The next audio chunk opens a new turn.
                self.request_id = None;
                self.emit(UspEvent::TurnEnded { request_id });
            }
            UspMessage::Response(body) => {
                self.recognized(RecognitionStatus::OtherRecognizer, body, 0, 0);
            }
            UspMessage::Unknown { path } => {
                debug!("USP session {} ignoring message path {}", self.session_id, path);
            }
        }
    }

    fn recognized(&self, status: RecognitionStatus, text: String, offset: u64, duration: u64) {
        let event = RecognitionEvent {
            session_id: self.session_id.clone(),
            result: RecognitionResult {
                status,
                text,
                offset,
                duration,
            },
        };
        if self.emit(UspEvent::Recognition(event)) {
            self.stats.recognition_events.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn emit(&self, event: UspEvent) -> bool {
        self.service.emit(self.handle, event)
    }

    /// Deliver a non-fatal error.
    fn report(&self, event: ErrorEvent) {
        if self.emit(UspEvent::Error(event)) {
            self.stats.error_events.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Deliver an error and mark the session failed when it is fatal.
    fn fail(&self, event: ErrorEvent) {
        error!("USP session {}: {}", self.session_id, event);
        // State first, so an observer of the event sees the failure.
        if event.is_fatal() {
            self.service.set_state(self.handle, ConnectionState::Failed);
        }
        self.report(event);
    }
}

/// Run a session body, reporting a panic as a fatal `RuntimeError`.
async fn supervise<F>(
    service: ThreadService,
    handle: SessionHandle,
    session_id: String,
    stats: Arc<Counters>,
    session: F,
) where
    F: Future<Output = ()> + Send,
{
    if AssertUnwindSafe(session).catch_unwind().await.is_ok() {
        return;
    }

    let event = ErrorEvent::new(ErrorCode::RuntimeError, "USP session task panicked");
    error!("USP session {}: {}", session_id, event);
    service.set_state(handle, ConnectionState::Failed);
    if service.emit(handle, UspEvent::Error(event)) {
        stats.error_events.fetch_add(1, Ordering::Relaxed);
    }
}

/// Map a handshake failure onto an error event.
fn classify_handshake_error(error: WsError) -> ErrorEvent {
    match error {
        WsError::Http(response) => {
            let status = response.status();
            let code = match status.as_u16() {
                401 | 403 => ErrorCode::AuthenticationError,
                _ => ErrorCode::UpgradeRejected,
            };
            ErrorEvent::new(
                code,
                format!(
                    "WebSocket Upgrade failed with HTTP status code: {}",
                    status.as_u16()
                ),
            )
        }
        WsError::Tls(e) => {
            ErrorEvent::new(ErrorCode::SecurityError, format!("TLS handshake failed: {e}"))
        }
        WsError::Url(e) => {
            ErrorEvent::new(ErrorCode::ConnectionError, format!("Invalid endpoint URL: {e}"))
        }
        other => ErrorEvent::new(ErrorCode::ConnectionError, format!("Connection failed: {other}")),
    }
}
