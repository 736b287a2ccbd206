//! Plumbing shared by the runner and handler loops.

use std::io::Read;
use std::sync::mpsc::Sender;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};

use playerlink_frame::{FrameError, FrameReader, Framing};
use tracing::{error, trace};

use crate::error::{PeerError, Result};

/// What the reader thread observed.
pub(crate) enum ReadOutcome<T> {
    Frame(T),
    /// End of stream on a frame boundary.
    Closed,
    Failed(FrameError),
}

/// Spawn the blocking reader thread. It forwards every frame to the loop and
/// exits after reporting end-of-stream, a read error, or once the loop stops
/// listening.
pub(crate) fn spawn_reader<F, E>(
    owner: &str,
    mut reader: FrameReader<Box<dyn Read + Send>, F>,
    events: Sender<E>,
    wrap: fn(ReadOutcome<F::Frame>) -> E,
) -> Result<()>
where
    F: Framing,
    E: Send + 'static,
{
    let name = owner.to_string();
    thread::Builder::new()
        .name(format!("{owner}-reader"))
        .spawn(move || loop {
            let outcome = match reader.read_frame() {
                Ok(Some(frame)) => ReadOutcome::Frame(frame),
                Ok(None) => ReadOutcome::Closed,
                Err(err) => ReadOutcome::Failed(err),
            };
            let last = !matches!(outcome, ReadOutcome::Frame(_));
            if events.send(wrap(outcome)).is_err() || last {
                trace!(owner = %name, "reader thread finished");
                return;
            }
        })
        .map(drop)
        .map_err(|source| PeerError::Spawn {
            what: "reader thread",
            source,
        })
}

/// Sending side of a loop's event channel that can be shut for good.
pub(crate) struct EventGate<E> {
    sender: Mutex<Option<Sender<E>>>,
}

impl<E> EventGate<E> {
    pub(crate) fn new(sender: Sender<E>) -> Self {
        Self {
            sender: Mutex::new(Some(sender)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Sender<E>>> {
        self.sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Deliver an event, handing it back if the gate is shut.
    pub(crate) fn send(&self, event: E) -> std::result::Result<(), E> {
        match self.lock().as_ref() {
            Some(sender) => sender.send(event).map_err(|rejected| rejected.0),
            None => Err(event),
        }
    }

    /// Refuse all further events.
    pub(crate) fn shut(&self) {
        self.lock().take();
    }
}

/// Tracks the thread a loop runs on so `close()` can wait for it, except
/// when called from that very thread.
pub(crate) struct LoopThread {
    id: OnceLock<ThreadId>,
    handle: Mutex<Option<JoinHandle<()>>>,
    finished: Mutex<bool>,
    cond: Condvar,
}

impl LoopThread {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            id: OnceLock::new(),
            handle: Mutex::new(None),
            finished: Mutex::new(false),
            cond: Condvar::new(),
        })
    }

    /// Called first thing on the loop thread. The loop counts as finished
    /// once the returned guard drops, panics included.
    pub(crate) fn enter(self: &Arc<Self>) -> LoopExit {
        let _ = self.id.set(thread::current().id());
        LoopExit(Arc::clone(self))
    }

    pub(crate) fn attach(&self, handle: JoinHandle<()>) {
        *self
            .handle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(handle);
    }

    pub(crate) fn is_current(&self) -> bool {
        self.id.get() == Some(&thread::current().id())
    }

    /// Block until the loop has finished its teardown. Returns immediately on
    /// the loop thread itself.
    pub(crate) fn join(&self) {
        if self.is_current() {
            return;
        }
        let mut finished = self
            .finished
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        while !*finished {
            finished = self
                .cond
                .wait(finished)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        drop(finished);

        let handle = self
            .handle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("I/O loop thread panicked");
            }
        }
    }
}

pub(crate) struct LoopExit(Arc<LoopThread>);

impl Drop for LoopExit {
    fn drop(&mut self) {
        *self
            .0
            .finished
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = true;
        self.0.cond.notify_all();
    }
}
