//! VPN session controller.
//!
//! This module contains the [`SessionController`], which owns the single
//! [`Session`] of a client and drives it through its lifecycle:
//!
//! ```text
//! Idle -> Connecting -> Connected -> Disconnecting -> Idle
//!            |              |
//!            +--> Failed <--+
//!                   |
//!                   +--> Idle
//! ```
//!
//! A disconnect while `Connecting` also goes through `Disconnecting`, and
//! stays there until the cancelled attempt has released its tunnel.
//!
//! Every transition bumps the session generation and is broadcast to
//! subscribers as a [`StateChange`]. Telemetry sampling runs exactly while
//! the session is `Connected`.

use crate::catalog::Server;
use crate::error::{Result, VpnError};
use crate::metrics::{MetricSample, MetricsSampler};
use crate::tunnel::Tunnel;
use std::net::IpAddr;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, SystemTime};

/// Lifecycle state of a session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SessionState {
    /// No session.
    #[default]
    Idle,
    /// Tunnel establishment in progress.
    Connecting,
    /// Tunnel is up.
    Connected,
    /// Tunnel is being torn down.
    Disconnecting,
    /// The last attempt or session failed. Always followed by `Idle`.
    Failed,
}

impl SessionState {
    /// Whether a tunnel is up or being brought up.
    pub fn is_active(self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::Connected)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Idle => write!(f, "Idle"),
            SessionState::Connecting => write!(f, "Connecting"),
            SessionState::Connected => write!(f, "Connected"),
            SessionState::Disconnecting => write!(f, "Disconnecting"),
            SessionState::Failed => write!(f, "Failed"),
        }
    }
}

/// Snapshot of the controller's session.
#[derive(Clone, Debug, Default)]
pub struct Session {
    /// Current state.
    pub state: SessionState,
    /// Server the session targets. Shared with the catalog snapshot it
    /// was picked from.
    pub server: Option<Arc<Server>>,
    /// When the tunnel came up.
    pub started_at: Option<SystemTime>,
    /// Address assigned inside the tunnel.
    pub tunnel_address: Option<IpAddr>,
    /// Reason of the most recent failure. Cleared by the next `connect`.
    pub failure: Option<String>,
    /// Incremented on every state transition.
    pub generation: u64,
}

impl Session {
    /// Time since the tunnel came up.
    pub fn uptime(&self) -> Option<Duration> {
        self.started_at
            .and_then(|start| SystemTime::now().duration_since(start).ok())
    }

    fn reset(&mut self) {
        self.server = None;
        self.started_at = None;
        self.tunnel_address = None;
    }
}

/// Notification sent to subscribers on every transition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StateChange {
    pub from: SessionState,
    pub to: SessionState,
    /// Session generation after the transition.
    pub generation: u64,
    /// Failure reason, set on transitions into `Failed`.
    pub reason: Option<String>,
}

/// Owns one session and coordinates the tunnel and the metrics sampler.
///
/// # Example
///
/// ```ignore
/// let catalog = ServerCatalog::builtin();
/// let controller = SessionController::new(Arc::new(SimulatedTunnel::default()), sampler);
/// controller.connect(catalog.pick_random("Europe")?)?;
/// controller.disconnect()?;
/// ```
pub struct SessionController {
    session: Mutex<Session>,
    /// Signalled when a cancelled connect has finished its teardown.
    settled: Condvar,
    subscribers: Mutex<Vec<Sender<StateChange>>>,
    tunnel: Arc<dyn Tunnel>,
    sampler: MetricsSampler,
    connect_timeout: Duration,
}

impl SessionController {
    /// Creates an idle controller.
    pub fn new(tunnel: Arc<dyn Tunnel>, sampler: MetricsSampler) -> Self {
        Self {
            session: Mutex::new(Session::default()),
            settled: Condvar::new(),
            subscribers: Mutex::new(Vec::new()),
            tunnel,
            sampler,
            connect_timeout: crate::constants::DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Sets how long tunnel establishment may take.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Current state. No side effects.
    pub fn current_state(&self) -> SessionState {
        self.lock().state
    }

    /// Copy of the current session.
    pub fn session(&self) -> Session {
        self.lock().clone()
    }

    /// Whether no transition happened since `generation` was observed.
    pub fn is_current(&self, generation: u64) -> bool {
        self.lock().generation == generation
    }

    /// Tunnel address, only while `Connected`.
    pub fn tunnel_address(&self) -> Option<IpAddr> {
        let session = self.lock();
        match session.state {
            SessionState::Connected => session.tunnel_address,
            _ => None,
        }
    }

    /// Subscribes to state transitions from now on.
    pub fn subscribe(&self) -> Receiver<StateChange> {
        let (tx, rx) = mpsc::channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    /// Subscribes to telemetry samples of connected sessions.
    pub fn subscribe_metrics(&self) -> Receiver<MetricSample> {
        self.sampler.subscribe()
    }

    /// Latest telemetry sample of the current session.
    pub fn latest_metrics(&self) -> Option<MetricSample> {
        self.sampler.latest()
    }

    /// Connects to `server`.
    ///
    /// Blocks until the tunnel is up, has failed, or the connect timeout
    /// elapsed. On failure the session passes through `Failed` back to
    /// `Idle`.
    ///
    /// # Errors
    ///
    /// - [`VpnError::InvalidState`] if the session is not `Idle`.
    /// - [`VpnError::TunnelEstablish`] if the tunnel failed, timed out, or the
    ///   attempt was cancelled by [`disconnect`](Self::disconnect).
    pub fn connect(&self, server: Arc<Server>) -> Result<Session> {
        let generation = {
            let mut session = self.lock();
            if session.state != SessionState::Idle {
                return Err(VpnError::InvalidState {
                    operation: "connect",
                    state: session.state,
                });
            }
            session.reset();
            session.failure = None;
            session.server = Some(Arc::clone(&server));
            self.transition(&mut session, SessionState::Connecting);
            tracing::info!(server = %server.id, city = %server.city, "connecting");
            session.generation
        };

        let outcome = self.establish(&server);

        let mut session = self.lock();
        if session.generation != generation {
            // Only `disconnect` moves a connecting session on; it waits in
            // `Disconnecting` until the attempt is torn down here.
            drop(session);
            if outcome.is_ok() {
                release(self.tunnel.as_ref(), &server);
            }
            let mut session = self.lock();
            session.reset();
            self.transition(&mut session, SessionState::Idle);
            self.settled.notify_all();
            tracing::info!(server = %server.id, "connect cancelled");
            return Err(VpnError::TunnelEstablish(
                "cancelled by disconnect".to_string(),
            ));
        }

        match outcome {
            Ok(address) => {
                session.tunnel_address = Some(address);
                session.started_at = Some(SystemTime::now());
                self.transition(&mut session, SessionState::Connected);
                self.sampler.start();
                tracing::info!(server = %server.id, %address, "connected");
                Ok(session.clone())
            }
            Err(reason) => {
                tracing::warn!(server = %server.id, %reason, "connect failed");
                self.fail(&mut session, reason.clone());
                self.transition(&mut session, SessionState::Idle);
                Err(VpnError::TunnelEstablish(reason))
            }
        }
    }

    /// Disconnects the current session.
    ///
    /// Teardown errors are logged and never propagated; the session always
    /// ends up `Idle`, and only once the tunnel has been released.
    ///
    /// Disconnecting while `Connecting` cancels the attempt. The session stays
    /// `Disconnecting` until the pending [`connect`](Self::connect) has
    /// resolved and released whatever tunnel came up, which is bounded by the
    /// connect timeout. New connects are rejected meanwhile.
    ///
    /// # Errors
    ///
    /// Returns [`VpnError::InvalidState`] unless `Connected` or `Connecting`.
    pub fn disconnect(&self) -> Result<()> {
        let mut session = self.lock();
        if !session.state.is_active() {
            return Err(VpnError::InvalidState {
                operation: "disconnect",
                state: session.state,
            });
        }

        if session.state == SessionState::Connecting {
            self.transition(&mut session, SessionState::Disconnecting);
            drop(
                self.settled
                    .wait_while(session, |s| s.state == SessionState::Disconnecting)
                    .unwrap_or_else(PoisonError::into_inner),
            );
            tracing::info!("disconnected");
            return Ok(());
        }

        self.sampler.stop();
        self.transition(&mut session, SessionState::Disconnecting);
        let server = session.server.clone();
        drop(session);

        if let Some(server) = &server {
            release(self.tunnel.as_ref(), server);
        }

        let mut session = self.lock();
        session.reset();
        self.transition(&mut session, SessionState::Idle);
        tracing::info!("disconnected");
        Ok(())
    }

    /// Reports that an established tunnel dropped.
    ///
    /// The session goes `Connected -> Failed -> Idle`; sampling stops and
    /// the tunnel is released best-effort.
    ///
    /// # Errors
    ///
    /// Returns [`VpnError::InvalidState`] unless `Connected`.
    pub fn report_tunnel_failure(&self, reason: &str) -> Result<()> {
        let server = {
            let mut session = self.lock();
            if session.state != SessionState::Connected {
                return Err(VpnError::InvalidState {
                    operation: "report a tunnel failure",
                    state: session.state,
                });
            }
            self.sampler.stop();
            tracing::warn!(%reason, "tunnel lost");
            self.fail(&mut session, reason.to_string());
            session.server.clone()
        };

        if let Some(server) = &server {
            release(self.tunnel.as_ref(), server);
        }

        let mut session = self.lock();
        session.reset();
        self.transition(&mut session, SessionState::Idle);
        Ok(())
    }

    /// Runs tunnel establishment on a worker thread, bounded by the connect
    /// timeout. A tunnel that comes up after the timeout is released by the
    /// worker.
    fn establish(&self, server: &Arc<Server>) -> std::result::Result<IpAddr, String> {
        let (tx, rx) = mpsc::channel();
        let abandoned = Arc::new(Mutex::new(false));

        {
            let tunnel = Arc::clone(&self.tunnel);
            let server = Arc::clone(server);
            let abandoned = Arc::clone(&abandoned);
            thread::spawn(move || {
                let result = tunnel.establish(&server);
                let gave_up = abandoned.lock().unwrap_or_else(PoisonError::into_inner);
                if *gave_up {
                    if result.is_ok() {
                        tracing::debug!(server = %server.id, "releasing late tunnel");
                        release(tunnel.as_ref(), &server);
                    }
                } else {
                    let _ = tx.send(result);
                }
            });
        }

        match rx.recv_timeout(self.connect_timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                *abandoned.lock().unwrap_or_else(PoisonError::into_inner) = true;
                // The worker may have delivered right before the flag was set.
                rx.try_recv().unwrap_or_else(|_| {
                    Err(format!(
                        "timed out after {} ms",
                        self.connect_timeout.as_millis()
                    ))
                })
            }
            Err(RecvTimeoutError::Disconnected) => Err("tunnel worker exited".to_string()),
        }
    }

    fn fail(&self, session: &mut Session, reason: String) {
        session.failure = Some(reason);
        self.transition(session, SessionState::Failed);
        session.reset();
    }

    fn transition(&self, session: &mut Session, to: SessionState) {
        let from = session.state;
        session.state = to;
        session.generation += 1;
        tracing::debug!(%from, %to, generation = session.generation, "session transition");

        let change = StateChange {
            from,
            to,
            generation: session.generation,
            reason: if to == SessionState::Failed {
                session.failure.clone()
            } else {
                None
            },
        };
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|tx| tx.send(change.clone()).is_ok());
    }

    fn lock(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if self.current_state() == SessionState::Connected {
            let _ = self.disconnect();
        }
    }
}

/// Best-effort teardown: errors are logged, never returned.
fn release(tunnel: &dyn Tunnel, server: &Server) {
    if let Err(e) = tunnel.teardown(server) {
        tracing::warn!(server = %server.id, error = %e, "tunnel teardown failed");
    }
}
