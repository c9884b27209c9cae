//! Exclusive-session brokering for the engine conversation.
//!
//! The engine subprocess is one shared, stateful, line-buffered resource;
//! two interleaved conversations corrupt each other's parse state. The
//! broker guarantees that exactly one conversation is in flight at a time
//! and that waiting callers are served strictly in `acquire` call order.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::sync::{oneshot, watch};

use crate::error::EngineError;
use crate::session::EngineState;

/// Why the broker stopped granting tickets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseReason {
    Shutdown,
    Crashed,
}

impl CloseReason {
    fn as_error(self) -> EngineError {
        match self {
            CloseReason::Shutdown => EngineError::ShuttingDown,
            CloseReason::Crashed => EngineError::Crashed,
        }
    }
}

#[derive(Debug)]
struct Waiter {
    ticket: u64,
    grant: oneshot::Sender<Result<Ticket, EngineError>>,
}

#[derive(Debug)]
struct Inner {
    busy: bool,
    queue: VecDeque<Waiter>,
    next_ticket: u64,
    closed: Option<CloseReason>,
}

/// Grants [`Ticket`]s for exclusive conversations with the engine.
#[derive(Debug)]
pub(crate) struct SessionBroker {
    inner: Mutex<Inner>,
    state: Arc<watch::Sender<EngineState>>,
    max_pending: Option<usize>,
}

impl SessionBroker {
    pub(crate) fn new(
        state: Arc<watch::Sender<EngineState>>,
        max_pending: Option<usize>,
    ) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                busy: false,
                queue: VecDeque::new(),
                next_ticket: 0,
                closed: None,
            }),
            state,
            max_pending,
        })
    }

    /// Wait for exclusive use of the engine.
    ///
    /// Suspends until every earlier caller has released, or fails when the
    /// broker closes first. Dropping the returned future while queued simply
    /// removes the waiter; a grant that crosses the removal is returned to
    /// the broker by the ticket's own `Drop`.
    pub(crate) async fn acquire(self: &Arc<Self>) -> Result<Ticket, EngineError> {
        let pending = {
            let mut inner = self.inner.lock().unwrap();
            if let Some(reason) = inner.closed {
                return Err(reason.as_error());
            }
            let id = inner.next_ticket;
            inner.next_ticket += 1;
            if !inner.busy {
                inner.busy = true;
                self.set_busy(true);
                tracing::trace!(ticket = id, "session granted immediately");
                return Ok(Ticket {
                    id,
                    broker: Some(Arc::clone(self)),
                });
            }
            if let Some(max) = self.max_pending
                && inner.queue.len() >= max
            {
                return Err(EngineError::Busy);
            }
            let (grant, pending) = oneshot::channel();
            inner.queue.push_back(Waiter { ticket: id, grant });
            tracing::trace!(ticket = id, queued = inner.queue.len(), "session busy, waiting");
            pending
        };
        match pending.await {
            Ok(Ok(ticket)) => Ok(ticket),
            Ok(Err(e)) => Err(e),
            // The broker vanished without resolving us; treat as a shutdown.
            Err(_) => Err(EngineError::ShuttingDown),
        }
    }

    /// Hand the session to the next queued caller, or mark it free.
    fn release(self: &Arc<Self>, id: u64) {
        let mut inner = self.inner.lock().unwrap();
        debug_assert!(inner.busy, "release without an active ticket");
        tracing::trace!(ticket = id, "session released");
        if inner.closed.is_some() {
            inner.busy = false;
            return;
        }
        loop {
            match inner.queue.pop_front() {
                Some(waiter) => {
                    let next = waiter.ticket;
                    let ticket = Ticket {
                        id: next,
                        broker: Some(Arc::clone(self)),
                    };
                    match waiter.grant.send(Ok(ticket)) {
                        Ok(()) => {
                            // Handed over in the same tick; the session never
                            // reads as free in between.
                            tracing::trace!(ticket = next, "session granted");
                            return;
                        }
                        Err(rejected) => {
                            // The caller gave up while queued. Defuse the
                            // ticket we minted for it so its drop does not
                            // re-enter the lock, and try the next waiter.
                            if let Ok(mut ticket) = rejected {
                                ticket.defuse();
                            }
                            tracing::trace!(ticket = next, "skipping abandoned waiter");
                        }
                    }
                }
                None => {
                    inner.busy = false;
                    self.set_busy(false);
                    return;
                }
            }
        }
    }

    /// Reject every queued waiter with [`EngineError::ShuttingDown`] and
    /// refuse all future `acquire`s.
    pub(crate) fn close_for_shutdown(&self) {
        self.close(CloseReason::Shutdown);
    }

    /// Reject every queued waiter with [`EngineError::Crashed`] and refuse
    /// all future `acquire`s.
    pub(crate) fn close_after_crash(&self) {
        self.close(CloseReason::Crashed);
    }

    fn close(&self, reason: CloseReason) {
        let waiters = {
            let mut inner = self.inner.lock().unwrap();
            if inner.closed.is_some() {
                return;
            }
            inner.closed = Some(reason);
            std::mem::take(&mut inner.queue)
        };
        if !waiters.is_empty() {
            tracing::debug!(count = waiters.len(), ?reason, "rejecting queued tickets");
        }
        for waiter in waiters {
            let _ = waiter.grant.send(Err(reason.as_error()));
        }
    }

    /// Toggle `Ready <-> Busy`. Other states belong to the session lifecycle
    /// and are left alone.
    fn set_busy(&self, busy: bool) {
        self.state.send_if_modified(|state| match (*state, busy) {
            (EngineState::Ready, true) => {
                *state = EngineState::Busy;
                true
            }
            (EngineState::Busy, false) => {
                *state = EngineState::Ready;
                true
            }
            _ => false,
        });
    }
}

/// One exclusive occupation of the engine, released on drop.
///
/// Holding a ticket is the only licence to write commands to the engine and
/// receive its stdout lines. Dropping it hands the session to the next
/// queued caller, so a ticket must outlive its whole conversation, including
/// the post-timeout drain. A granted ticket whose receiver disappeared mid-
/// handoff releases itself the same way, so the session can never be leaked
/// as permanently busy.
#[derive(Debug)]
pub(crate) struct Ticket {
    id: u64,
    broker: Option<Arc<SessionBroker>>,
}

impl Ticket {
    /// Disarm the drop-release, for grants that were never delivered.
    fn defuse(&mut self) {
        self.broker = None;
    }

    #[cfg(test)]
    pub(crate) fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        if let Some(broker) = self.broker.take() {
            broker.release(self.id);
        }
    }
}
