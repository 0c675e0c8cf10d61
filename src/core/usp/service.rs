//! Shared worker service for USP sessions.
//!
//! A [`ThreadService`] wraps a tokio runtime handle and tracks every session
//! task spawned through it. Session bookkeeping lives in an arena keyed by
//! opaque [`SessionHandle`]s: session tasks never hold a reference to their
//! owner, they look their slot up on every emission. Once a slot is released
//! nothing more can be delivered for that session.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use super::errors::{UsageError, UspError};
use super::events::UspEvent;

/// Upper bound for draining session tasks on service shutdown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Opaque key into the session arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle(u64);

impl std::fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Handshake in progress.
    Connecting,
    /// Handshake done, audio flows.
    Connected,
    /// A fatal error ended the session.
    Failed,
    /// Released by `term()`.
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServiceState {
    Created,
    Running,
    Terminated,
}

struct SessionSlot {
    session_id: String,
    events: mpsc::UnboundedSender<UspEvent>,
    state: ConnectionState,
}

struct Inner {
    handle: Handle,
    state: RwLock<ServiceState>,
    cancel: CancellationToken,
    tracker: TaskTracker,
    sessions: DashMap<SessionHandle, SessionSlot>,
    next_handle: AtomicU64,
}

/// Scheduling service shared by any number of clients.
///
/// Cloning is cheap; all clones refer to the same service.
#[derive(Clone)]
pub struct ThreadService {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ThreadService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadService")
            .field("state", &*self.inner.state.read())
            .field("sessions", &self.inner.sessions.len())
            .finish()
    }
}

impl ThreadService {
    /// Create a service bound to the current tokio runtime.
    pub fn new() -> Result<Self, UspError> {
        let handle = Handle::try_current().map_err(|e| {
            UspError::Configuration(format!("ThreadService requires a tokio runtime: {e}"))
        })?;
        Ok(Self::with_handle(handle))
    }

    /// Create a service bound to an explicit runtime handle.
    pub fn with_handle(handle: Handle) -> Self {
        // Another component may have installed a provider already.
        let _ = rustls::crypto::ring::default_provider().install_default();

        Self {
            inner: Arc::new(Inner {
                handle,
                state: RwLock::new(ServiceState::Created),
                cancel: CancellationToken::new(),
                tracker: TaskTracker::new(),
                sessions: DashMap::new(),
                next_handle: AtomicU64::new(1),
            }),
        }
    }

    /// Start accepting sessions. Calling it again while running is a no-op.
    pub fn init(&self) -> Result<(), UspError> {
        let mut state = self.inner.state.write();
        match *state {
            ServiceState::Created => {
                *state = ServiceState::Running;
                info!("USP thread service started");
                Ok(())
            }
            ServiceState::Running => Ok(()),
            ServiceState::Terminated => Err(UsageError::ServiceTerminated.into()),
        }
    }

    /// Stop the service: cancel every session and wait for their tasks.
    ///
    /// Idempotent. Waits at most a bounded time for tasks to finish.
    pub async fn term(&self) {
        {
            let mut state = self.inner.state.write();
            if *state == ServiceState::Terminated {
                return;
            }
            *state = ServiceState::Terminated;
        }

        let live = self.inner.sessions.len();
        self.inner.cancel.cancel();
        self.inner.sessions.clear();
        self.inner.tracker.close();

        if tokio::time::timeout(SHUTDOWN_TIMEOUT, self.inner.tracker.wait())
            .await
            .is_err()
        {
            warn!(
                "USP thread service shutdown timed out with {} tasks still running",
                self.inner.tracker.len()
            );
        }
        info!("USP thread service terminated ({} sessions released)", live);
    }

    pub fn is_running(&self) -> bool {
        *self.inner.state.read() == ServiceState::Running
    }

    /// Number of sessions currently registered.
    pub fn session_count(&self) -> usize {
        self.inner.sessions.len()
    }

    pub(crate) fn ensure_running(&self) -> Result<(), UspError> {
        match *self.inner.state.read() {
            ServiceState::Running => Ok(()),
            ServiceState::Created => Err(UsageError::ServiceNotRunning.into()),
            ServiceState::Terminated => Err(UsageError::ServiceTerminated.into()),
        }
    }

    /// Allocate a slot for a new session.
    pub(crate) fn register(
        &self,
        session_id: &str,
        events: mpsc::UnboundedSender<UspEvent>,
    ) -> Result<SessionHandle, UspError> {
        self.ensure_running()?;
        let handle = SessionHandle(self.inner.next_handle.fetch_add(1, Ordering::Relaxed));
        self.inner.sessions.insert(
            handle,
            SessionSlot {
                session_id: session_id.to_string(),
                events,
                state: ConnectionState::Connecting,
            },
        );
        debug!("Registered USP session {} as {}", session_id, handle);
        Ok(handle)
    }

    /// Deliver an event to a session. Returns false if the slot is gone.
    pub(crate) fn emit(&self, handle: SessionHandle, event: UspEvent) -> bool {
        match self.inner.sessions.get(&handle) {
            Some(slot) => slot.events.send(event).is_ok(),
            None => false,
        }
    }

    /// Remove a session slot. Safe to call repeatedly.
    pub(crate) fn release(&self, handle: SessionHandle) {
        if let Some((_, slot)) = self.inner.sessions.remove(&handle) {
            debug!("Released USP session {} ({})", slot.session_id, handle);
        }
    }

    pub(crate) fn set_state(&self, handle: SessionHandle, state: ConnectionState) {
        if let Some(mut slot) = self.inner.sessions.get_mut(&handle) {
            slot.state = state;
        }
    }

    /// Current state, or `Terminated` once the slot has been released.
    pub(crate) fn session_state(&self, handle: SessionHandle) -> ConnectionState {
        self.inner
            .sessions
            .get(&handle)
            .map(|slot| slot.state)
            .unwrap_or(ConnectionState::Terminated)
    }

    /// Token cancelled by either the caller or service shutdown.
    pub(crate) fn child_token(&self) -> CancellationToken {
        self.inner.cancel.child_token()
    }

    pub(crate) fn spawn<F>(&self, task: F) -> JoinHandle<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.inner.tracker.spawn_on(task, &self.inner.handle)
    }
}
