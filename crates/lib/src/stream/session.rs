//! Stream session: one client's push stream from open to close.
//!
//! A session writes the reconnect preamble and a ready event on open, then a
//! heartbeat every [`HEARTBEAT_PERIOD`] from its own timer task. It closes at
//! most once, either because a write was rejected (peer gone) or because the
//! consumer side cancelled it. Closing releases the timer in the same step, and
//! nothing is written afterwards.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::task::AbortHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use uuid::Uuid;

use super::frame::{self, Message};

/// Time between heartbeats; the first one fires one period after open.
pub const HEARTBEAT_PERIOD: Duration = Duration::from_millis(5000);

/// The transport refused a write or a close (the peer is gone or the sink was already closed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("write to closed transport")]
pub struct TransportClosed;

/// Outbound sink for framed event text.
///
/// Writes are append-only and must not block: the session calls them while it
/// holds its own state lock.
pub trait Transport: Send + 'static {
    fn write(&mut self, frame: &str) -> Result<(), TransportClosed>;
    fn close(&mut self) -> Result<(), TransportClosed>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Closed,
}

struct Inner<T> {
    state: SessionState,
    sequence: u64,
    transport: T,
    timer: Option<AbortHandle>,
}

impl<T> Inner<T> {
    /// Open -> Closed, releasing the timer. Returns false if already closed.
    fn shut(&mut self) -> bool {
        if self.state == SessionState::Closed {
            return false;
        }
        self.state = SessionState::Closed;
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        true
    }
}

impl<T: Transport> Inner<T> {
    /// Write-failure path: close the session, then a best-effort close of the transport.
    fn fail(&mut self) {
        if self.shut() {
            let _ = self.transport.close();
        }
    }
}

/// Handle to one live stream session. Clones share the same session.
pub struct Session<T> {
    id: Uuid,
    inner: Arc<Mutex<Inner<T>>>,
}

impl<T> Clone for Session<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            inner: self.inner.clone(),
        }
    }
}

impl<T: Transport> Session<T> {
    /// Write the preamble and the ready event to `transport`, then start the heartbeat timer.
    ///
    /// Must be called from within a tokio runtime. If either opening write is
    /// rejected the session comes back already closed and no timer is started.
    pub fn open(transport: T) -> Self {
        let started = Instant::now();
        let session = Self {
            id: Uuid::new_v4(),
            inner: Arc::new(Mutex::new(Inner {
                state: SessionState::Open,
                sequence: 0,
                transport,
                timer: None,
            })),
        };
        {
            let mut inner = session.lock();
            if write_opening(&mut inner.transport).is_err() {
                log::debug!("live session {}: opening write rejected, closing", session.id);
                inner.fail();
                return session.clone();
            }
            inner.timer = Some(spawn_heartbeat(
                session.id,
                Arc::downgrade(&session.inner),
                started,
            ));
        }
        log::debug!("live session {} opened", session.id);
        session
    }

    /// Emit the next heartbeat. Driven by the session's timer.
    ///
    /// Does nothing once the session is closed. A rejected write closes the
    /// session and the transport; the error is not reported.
    pub(crate) fn tick(&self) -> SessionState {
        let mut inner = self.lock();
        if inner.state == SessionState::Closed {
            return SessionState::Closed;
        }
        inner.sequence += 1;
        let event = frame::message_event(&Message::heartbeat(inner.sequence));
        if inner.transport.write(&event).is_err() {
            log::debug!(
                "live session {}: heartbeat {} rejected, closing",
                self.id,
                inner.sequence
            );
            inner.fail();
        }
        inner.state
    }

    /// Consumer stopped receiving: mark closed and stop the timer.
    ///
    /// Returns true only for the call that actually closed the session. The
    /// transport is left alone; its reader is already gone.
    pub fn cancel(&self) -> bool {
        let closed_now = self.lock().shut();
        if closed_now {
            log::debug!("live session {} cancelled", self.id);
        }
        closed_now
    }
}

impl<T> Session<T> {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    pub fn is_closed(&self) -> bool {
        self.state() == SessionState::Closed
    }

    /// Heartbeats attempted so far.
    pub fn sequence(&self) -> u64 {
        self.lock().sequence
    }

    /// True while the heartbeat timer is held (the session is open).
    pub fn has_timer(&self) -> bool {
        self.lock().timer.is_some()
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn write_opening<T: Transport>(transport: &mut T) -> Result<(), TransportClosed> {
    transport.write(&frame::retry_directive(frame::RETRY_MS))?;
    transport.write(&frame::message_event(&Message::ready()))
}

/// Periodic producer. Holds only a weak reference so an abandoned session is freed.
fn spawn_heartbeat<T: Transport>(
    id: Uuid,
    inner: Weak<Mutex<Inner<T>>>,
    started: Instant,
) -> AbortHandle {
    let task = tokio::spawn(async move {
        let mut ticker = time::interval_at(started + HEARTBEAT_PERIOD, HEARTBEAT_PERIOD);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let Some(inner) = inner.upgrade() else {
                break;
            };
            if (Session { id, inner }).tick() == SessionState::Closed {
                break;
            }
        }
        log::debug!("live session {}: heartbeat timer stopped", id);
    });
    task.abort_handle()
}
