//! Events delivered from a connection to its owner.
//!
//! Every connection owns one ordered event stream. Consumers either pull from
//! the [`EventReceiver`] returned by
//! [`Connection::events`](super::client::Connection::events), or register a
//! [`Callbacks`] implementation before connecting and let the client invoke it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::errors::{ErrorCode, UspError};

/// Outcome category of a recognition result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecognitionStatus {
    /// Final text for a phrase.
    Recognized,
    /// Partial text that may still change.
    IntermediateResult,
    /// Audio was processed but nothing was recognized.
    NoMatch,
    /// Recognition stopped before producing a result.
    Canceled,
    /// Result produced by a non-speech recognizer.
    OtherRecognizer,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionResult {
    pub status: RecognitionStatus,
    pub text: String,
    /// Offset from stream start, in 100-nanosecond ticks.
    pub offset: u64,
    /// Duration in 100-nanosecond ticks.
    pub duration: u64,
}

impl RecognitionResult {
    pub fn is_final(&self) -> bool {
        matches!(self.status, RecognitionStatus::Recognized)
    }

    pub fn offset_seconds(&self) -> f64 {
        self.offset as f64 / 10_000_000.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionEvent {
    pub session_id: String,
    pub result: RecognitionResult,
}

/// Failure surfaced on the event path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorEvent {
    pub is_transport: bool,
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorEvent {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            is_transport: code.is_transport(),
            code,
            message: message.into(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.code.is_fatal()
    }
}

/// For callers that want to surface a reported failure as a `Result`.
impl From<ErrorEvent> for UspError {
    fn from(event: ErrorEvent) -> Self {
        if event.is_transport {
            UspError::transport(event.code, event.message)
        } else {
            UspError::protocol(event.code, event.message)
        }
    }
}

impl std::fmt::Display for ErrorEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

/// Everything a connection can report.
#[derive(Debug, Clone, PartialEq)]
pub enum UspEvent {
    TurnStarted { request_id: Option<String> },
    SpeechStartDetected { offset: u64 },
    Recognition(RecognitionEvent),
    SpeechEndDetected { offset: u64 },
    TurnEnded { request_id: Option<String> },
    Error(ErrorEvent),
}

impl UspEvent {
    pub fn as_error(&self) -> Option<&ErrorEvent> {
        match self {
            Self::Error(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_recognition(&self) -> Option<&RecognitionEvent> {
        match self {
            Self::Recognition(r) => Some(r),
            _ => None,
        }
    }
}

/// Pull side of a connection's event stream.
///
/// Returns `None` once the connection has been terminated, even if events
/// were still buffered at that moment.
#[derive(Debug)]
pub struct EventReceiver {
    rx: mpsc::UnboundedReceiver<UspEvent>,
    closed: Arc<AtomicBool>,
}

impl EventReceiver {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<UspEvent>, closed: Arc<AtomicBool>) -> Self {
        Self { rx, closed }
    }

    pub async fn recv(&mut self) -> Option<UspEvent> {
        if self.closed.load(Ordering::Acquire) {
            return None;
        }
        let event = self.rx.recv().await?;
        if self.closed.load(Ordering::Acquire) {
            return None;
        }
        Some(event)
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<UspEvent> {
        if self.closed.load(Ordering::Acquire) {
            return None;
        }
        self.rx.try_recv().ok()
    }
}

/// Push-style event consumer.
///
/// Invoked from a runtime task in event order. Nothing is invoked after the
/// connection's `term()` has returned.
#[async_trait]
pub trait Callbacks: Send + Sync {
    async fn on_error(&self, event: ErrorEvent);

    async fn on_recognition(&self, _event: RecognitionEvent) {}

    async fn on_turn_started(&self) {}

    async fn on_turn_ended(&self) {}

    async fn on_speech_start_detected(&self, _offset: u64) {}

    async fn on_speech_end_detected(&self, _offset: u64) {}
}

/// Route one event to the matching callback.
pub(crate) async fn dispatch(callbacks: &dyn Callbacks, event: UspEvent) {
    match event {
        UspEvent::TurnStarted { .. } => callbacks.on_turn_started().await,
        UspEvent::SpeechStartDetected { offset } => callbacks.on_speech_start_detected(offset).await,
        UspEvent::Recognition(r) => callbacks.on_recognition(r).await,
        UspEvent::SpeechEndDetected { offset } => callbacks.on_speech_end_detected(offset).await,
        UspEvent::TurnEnded { .. } => callbacks.on_turn_ended().await,
        UspEvent::Error(e) => callbacks.on_error(e).await,
    }
}
