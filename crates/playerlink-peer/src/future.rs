//! Handle for a response that arrives later.
//!
//! A [`ResponseFuture`] is shared between the caller and the I/O loop that
//! owns the request. Each request has its own condition variable, so
//! resolving one request only wakes the threads waiting on it.

use std::pin::Pin;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use bytes::Bytes;
use playerlink_message::MessageCodec;

use crate::error::{PeerError, Result};

/// Why a sent request ended without a response.
#[derive(Debug, Clone)]
pub(crate) enum Failure {
    Interrupted,
    WriteFailed(String),
}

#[derive(Debug)]
enum State {
    Queued,
    Sent(i32),
    Resolved(Bytes),
    Failed(Failure),
    Cancelled,
}

impl State {
    fn is_terminal(&self) -> bool {
        matches!(
            self,
            State::Resolved(_) | State::Failed(_) | State::Cancelled
        )
    }
}

#[derive(Debug)]
struct Inner {
    state: State,
    waker: Option<Waker>,
}

/// One request's lifecycle: `Queued → Sent → {Resolved | Failed | Cancelled}`,
/// or `Queued → Cancelled`. Terminal states never change.
#[derive(Debug)]
pub(crate) struct Slot {
    inner: Mutex<Inner>,
    cond: Condvar,
}

impl Slot {
    pub(crate) fn queued() -> Arc<Self> {
        Arc::new(Self::with_state(State::Queued))
    }

    fn with_state(state: State) -> Self {
        Self {
            inner: Mutex::new(Inner { state, waker: None }),
            cond: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record that the request is about to be written under `id`.
    ///
    /// Returns `false` when the request was cancelled first; it must not be
    /// written then.
    pub(crate) fn mark_sent(&self, id: i32) -> bool {
        let mut inner = self.lock();
        if matches!(inner.state, State::Queued) {
            inner.state = State::Sent(id);
            true
        } else {
            false
        }
    }

    pub(crate) fn resolve(&self, payload: Bytes) -> bool {
        self.finish(State::Resolved(payload))
    }

    pub(crate) fn fail(&self, failure: Failure) -> bool {
        self.finish(State::Failed(failure))
    }

    /// Cancel a request that was never written. No-op once sent.
    pub(crate) fn cancel_queued(&self) -> bool {
        let mut inner = self.lock();
        if matches!(inner.state, State::Queued) {
            Self::complete(&mut inner, State::Cancelled);
            drop(inner);
            self.cond.notify_all();
            true
        } else {
            false
        }
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        matches!(self.lock().state, State::Cancelled)
    }

    fn finish(&self, state: State) -> bool {
        let mut inner = self.lock();
        if inner.state.is_terminal() {
            return false;
        }
        Self::complete(&mut inner, state);
        drop(inner);
        self.cond.notify_all();
        true
    }

    fn complete(inner: &mut Inner, state: State) {
        inner.state = state;
        if let Some(waker) = inner.waker.take() {
            waker.wake();
        }
    }
}

/// Receives the ids of sent requests whose callers gave up on them.
pub(crate) trait CancelSink: Send + Sync {
    fn cancelled(&self, id: i32);
}

/// A cancelable handle for the response to one request.
///
/// Waiting is possible in three ways: block with [`get`](Self::get), block
/// with a deadline via [`get_timeout`](Self::get_timeout), or `.await` the
/// handle from async code.
pub struct ResponseFuture<C: MessageCodec> {
    slot: Arc<Slot>,
    codec: Arc<C>,
    sink: Option<Arc<dyn CancelSink>>,
}

impl<C: MessageCodec> ResponseFuture<C> {
    pub(crate) fn new(slot: Arc<Slot>, codec: Arc<C>, sink: Arc<dyn CancelSink>) -> Self {
        Self {
            slot,
            codec,
            sink: Some(sink),
        }
    }

    /// A future that is already cancelled (request made on a closed link).
    pub(crate) fn cancelled(codec: Arc<C>) -> Self {
        Self {
            slot: Arc::new(Slot::with_state(State::Cancelled)),
            codec,
            sink: None,
        }
    }

    /// Block until the request completes and decode the response.
    pub fn get(&self) -> Result<C::Item> {
        let mut inner = self.slot.lock();
        while !inner.state.is_terminal() {
            inner = self
                .slot
                .cond
                .wait(inner)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        self.outcome(&inner.state)
    }

    /// Like [`get`](Self::get) but gives up with [`PeerError::Timeout`] after
    /// `timeout`. The request itself stays outstanding.
    pub fn get_timeout(&self, timeout: Duration) -> Result<C::Item> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.slot.lock();
        while !inner.state.is_terminal() {
            let now = Instant::now();
            if now >= deadline {
                return Err(PeerError::Timeout(timeout));
            }
            inner = self
                .slot
                .cond
                .wait_timeout(inner, deadline - now)
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .0;
        }
        self.outcome(&inner.state)
    }

    /// Whether the request has completed in any way. Never blocks.
    pub fn is_done(&self) -> bool {
        self.slot.lock().state.is_terminal()
    }

    pub fn is_cancelled(&self) -> bool {
        self.slot.is_cancelled()
    }

    /// Correlation id, once the request has been written.
    pub fn id(&self) -> Option<i32> {
        match self.slot.lock().state {
            State::Sent(id) => Some(id),
            _ => None,
        }
    }

    /// Cancel the request.
    ///
    /// A request that has not been written yet is guaranteed never to be
    /// written. A written request is only abandoned when `may_interrupt` is
    /// set; its response, if one still arrives, is discarded.
    ///
    /// Returns `true` if this call cancelled the request.
    pub fn cancel(&self, may_interrupt: bool) -> bool {
        let mut inner = self.slot.lock();
        let sent_id = match inner.state {
            State::Queued => None,
            State::Sent(id) if may_interrupt => Some(id),
            _ => return false,
        };
        Slot::complete(&mut inner, State::Cancelled);
        drop(inner);
        self.slot.cond.notify_all();

        if let (Some(id), Some(sink)) = (sent_id, &self.sink) {
            sink.cancelled(id);
        }
        true
    }

    fn outcome(&self, state: &State) -> Result<C::Item> {
        match state {
            State::Resolved(payload) => Ok(self.codec.decode(payload)?),
            State::Failed(Failure::Interrupted) => Err(PeerError::Interrupted),
            State::Failed(Failure::WriteFailed(reason)) => {
                Err(PeerError::WriteFailed(reason.clone()))
            }
            State::Cancelled => Err(PeerError::Cancelled),
            State::Queued | State::Sent(_) => Err(PeerError::Interrupted),
        }
    }
}

impl<C: MessageCodec> std::future::Future for ResponseFuture<C> {
    type Output = Result<C::Item>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let mut inner = this.slot.lock();
        if inner.state.is_terminal() {
            return Poll::Ready(this.outcome(&inner.state));
        }
        match &inner.waker {
            Some(existing) if existing.will_wake(cx.waker()) => {}
            _ => inner.waker = Some(cx.waker().clone()),
        }
        Poll::Pending
    }
}

impl<C: MessageCodec> std::fmt::Debug for ResponseFuture<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseFuture")
            .field("state", &self.slot.lock().state)
            .finish()
    }
}
