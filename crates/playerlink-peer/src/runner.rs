//! The initiating side of a link: send requests, get futures back.

use std::collections::HashMap;
use std::io::Write;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use playerlink_frame::{Frame, FrameConfig, FrameError, FrameReader, FrameWriter};
use playerlink_message::{JsonCodec, MessageCodec};
use playerlink_transport::{StreamControl, Transport};
use tracing::{debug, error, info, trace, warn};

use crate::error::{PeerError, Result};
use crate::future::{CancelSink, Failure, ResponseFuture, Slot};
use crate::io::{spawn_reader, EventGate, LoopThread, ReadOutcome};
use crate::listeners::{ListenerId, ListenerSet, OnClose};

/// Configuration for a [`MessageRunner`].
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Used for thread names and log fields.
    pub name: String,
    pub frame: FrameConfig,
    /// How long a request cancelled after it was written is still owed a
    /// response. Later responses count as unknown.
    pub abandon_timeout: Duration,
}

/// Default for [`RunnerConfig::abandon_timeout`].
pub const DEFAULT_ABANDON_TIMEOUT: Duration = Duration::from_secs(5);

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            name: "runner".to_string(),
            frame: FrameConfig::default(),
            abandon_timeout: DEFAULT_ABANDON_TIMEOUT,
        }
    }
}

impl RunnerConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_frame_config(mut self, frame: FrameConfig) -> Self {
        self.frame = frame;
        self
    }

    pub fn with_abandon_timeout(mut self, timeout: Duration) -> Self {
        self.abandon_timeout = timeout;
        self
    }
}

/// Callback for unsolicited updates. Receives the update and the runner it
/// arrived on, so it can reply with a request of its own.
pub type UpdateListener<C> = dyn Fn(&<C as MessageCodec>::Item, &MessageRunner<C>) + Send + Sync;

/// An encoded request waiting for the I/O loop. Dropping it unsent cancels
/// its future.
pub(crate) struct QueuedRequest {
    pub(crate) payload: Vec<u8>,
    pub(crate) slot: Arc<Slot>,
}

impl Drop for QueuedRequest {
    fn drop(&mut self) {
        self.slot.cancel_queued();
    }
}

enum Event {
    Read(ReadOutcome<Frame>),
    Outbound(QueuedRequest),
    Forget(i32),
    Shutdown,
}

impl CancelSink for EventGate<Event> {
    fn cancelled(&self, id: i32) {
        let _ = self.send(Event::Forget(id));
    }
}

struct Shared<C: MessageCodec> {
    name: String,
    codec: Arc<C>,
    gate: Arc<EventGate<Event>>,
    closing: AtomicBool,
    running: AtomicBool,
    listeners: ListenerSet<UpdateListener<C>>,
    on_close: OnClose,
    thread: Arc<LoopThread>,
}

/// Sends requests over a transport and correlates the responses.
///
/// `send` never blocks: it queues the encoded request and returns a
/// [`ResponseFuture`]. One I/O thread assigns each request its id at write
/// time and resolves futures as responses come back, in whatever order the
/// peer answers. Frames with id `-1` are unsolicited updates and go to the
/// update listeners instead.
///
/// The handle is cheap to clone. Dropping it does not close the link; call
/// [`close`](Self::close).
pub struct MessageRunner<C: MessageCodec = JsonCodec> {
    shared: Arc<Shared<C>>,
}

impl<C: MessageCodec> Clone for MessageRunner<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl MessageRunner<JsonCodec> {
    /// Start a runner speaking [`JsonCodec`] with default configuration.
    pub fn new(transport: impl Transport) -> Result<Self> {
        Self::start(transport, JsonCodec, RunnerConfig::default())
    }
}

impl<C: MessageCodec> MessageRunner<C> {
    /// Split `transport` and start the reader and I/O threads.
    pub fn start(transport: impl Transport, codec: C, config: RunnerConfig) -> Result<Self> {
        let kind = transport.describe();
        let halves = transport.into_halves()?;
        let control: Arc<dyn StreamControl> = Arc::from(halves.control);
        let (tx, rx) = mpsc::channel();

        let runner = Self {
            shared: Arc::new(Shared {
                name: config.name.clone(),
                codec: Arc::new(codec),
                gate: Arc::new(EventGate::new(tx.clone())),
                closing: AtomicBool::new(false),
                running: AtomicBool::new(true),
                listeners: ListenerSet::new(),
                on_close: OnClose::new(),
                thread: LoopThread::new(),
            }),
        };

        let reader = FrameReader::with_config(halves.reader, config.frame.clone());
        spawn_reader(&config.name, reader, tx, Event::Read)?;

        let io = IoLoop {
            runner: runner.clone(),
            events: rx,
            writer: FrameWriter::with_config(halves.writer, config.frame),
            control: Arc::clone(&control),
            sent: HashMap::new(),
            abandoned: HashMap::new(),
            abandon_timeout: config.abandon_timeout,
            next_id: 0,
        };
        let handle = thread::Builder::new()
            .name(format!("{}-io", config.name))
            .spawn(move || io.run())
            .map_err(|source| {
                let _ = control.close_read();
                PeerError::Spawn {
                    what: "runner I/O loop",
                    source,
                }
            })?;
        runner.shared.thread.attach(handle);

        info!(runner = %config.name, transport = %kind, "runner started");
        Ok(runner)
    }

    /// Queue a request and return a future for its response.
    ///
    /// Fails only if the request cannot be encoded. On a closed runner the
    /// returned future is already cancelled.
    pub fn send(&self, request: impl Into<C::Item>) -> Result<ResponseFuture<C>> {
        let payload = self.shared.codec.encode(&request.into())?;
        Ok(self.send_encoded(payload))
    }

    fn send_encoded(&self, payload: Vec<u8>) -> ResponseFuture<C> {
        let codec = Arc::clone(&self.shared.codec);
        if self.shared.closing.load(Ordering::SeqCst) {
            debug!(runner = %self.shared.name, "send on closed runner");
            return ResponseFuture::cancelled(codec);
        }

        let slot = Slot::queued();
        let sink: Arc<dyn CancelSink> = self.shared.gate.clone();
        let future = ResponseFuture::new(Arc::clone(&slot), codec, sink);
        if self
            .shared
            .gate
            .send(Event::Outbound(QueuedRequest { payload, slot }))
            .is_err()
        {
            debug!(runner = %self.shared.name, "runner closed while sending");
        }
        future
    }

    /// Register a listener for unsolicited updates.
    pub fn add_update_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&C::Item, &MessageRunner<C>) + Send + Sync + 'static,
    {
        self.shared.listeners.add(Arc::new(listener))
    }

    pub fn remove_update_listener(&self, id: ListenerId) -> bool {
        self.shared.listeners.remove(id)
    }

    pub fn has_update_listener(&self, id: ListenerId) -> bool {
        self.shared.listeners.contains(id)
    }

    pub fn update_listener_count(&self) -> usize {
        self.shared.listeners.len()
    }

    /// Install the hook run once after teardown. Runs immediately if the
    /// runner is already closed.
    pub fn set_on_close(&self, hook: impl FnOnce() + Send + 'static) {
        self.shared.on_close.set(Box::new(hook));
    }

    /// Tear the link down and wait for the I/O thread to finish.
    ///
    /// Queued requests are cancelled, sent ones fail with
    /// [`PeerError::Interrupted`]. Safe to call more than once and from an
    /// update listener.
    pub fn close(&self) {
        if !self.shared.closing.swap(true, Ordering::SeqCst) {
            debug!(runner = %self.shared.name, "close requested");
            let _ = self.shared.gate.send(Event::Shutdown);
        }
        self.join();
    }

    /// Wait until the runner has shut down for any reason.
    pub fn join(&self) {
        self.shared.thread.join();
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn codec(&self) -> &C {
        &self.shared.codec
    }
}

impl<C: MessageCodec> std::fmt::Debug for MessageRunner<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageRunner")
            .field("name", &self.shared.name)
            .field("running", &self.is_running())
            .finish()
    }
}

enum Cause {
    Requested,
    PeerClosed,
    ReadFailed(FrameError),
    WriteFailed(FrameError),
}

struct IoLoop<C: MessageCodec> {
    runner: MessageRunner<C>,
    events: Receiver<Event>,
    writer: FrameWriter<Box<dyn Write + Send>>,
    control: Arc<dyn StreamControl>,
    sent: HashMap<i32, Arc<Slot>>,
    /// Requests cancelled after they were written, with the time their
    /// response stops being expected.
    abandoned: HashMap<i32, Instant>,
    abandon_timeout: Duration,
    next_id: i32,
}

impl<C: MessageCodec> IoLoop<C> {
    fn run(mut self) {
        let thread = Arc::clone(&self.runner.shared.thread);
        let _exit = thread.enter();
        let cause = self.pump();
        self.teardown(cause);
    }

    fn pump(&mut self) -> Cause {
        while let Ok(event) = self.events.recv() {
            match event {
                Event::Outbound(request) => {
                    if self.runner.shared.closing.load(Ordering::SeqCst) {
                        continue;
                    }
                    if let Err(err) = self.write(request) {
                        return Cause::WriteFailed(err);
                    }
                }
                Event::Read(ReadOutcome::Frame(frame)) => self.dispatch(frame),
                Event::Read(ReadOutcome::Closed) => return Cause::PeerClosed,
                Event::Read(ReadOutcome::Failed(err)) => return Cause::ReadFailed(err),
                Event::Forget(id) => self.forget(id),
                Event::Shutdown => return Cause::Requested,
            }
        }
        Cause::Requested
    }

    fn write(&mut self, request: QueuedRequest) -> std::result::Result<(), FrameError> {
        let id = next_free_id(&mut self.next_id, |id| {
            self.sent.contains_key(&id) || self.abandoned.contains_key(&id)
        });
        if !request.slot.mark_sent(id) {
            trace!(runner = %self.runner.shared.name, "request cancelled before send");
            return Ok(());
        }

        match self.writer.send(id, &request.payload) {
            Ok(()) => {
                trace!(runner = %self.runner.shared.name, id, size = request.payload.len(), "request sent");
                self.sent.insert(id, Arc::clone(&request.slot));
                Ok(())
            }
            Err(err @ FrameError::PayloadTooLarge { .. }) => {
                warn!(runner = %self.runner.shared.name, id, error = %err, "request rejected");
                request.slot.fail(Failure::WriteFailed(err.to_string()));
                Ok(())
            }
            Err(err) => {
                error!(runner = %self.runner.shared.name, id, error = %err, "failed to write request");
                request.slot.fail(Failure::WriteFailed(err.to_string()));
                Err(err)
            }
        }
    }

    fn dispatch(&mut self, frame: Frame) {
        if frame.is_update() {
            self.broadcast(&frame.payload);
            return;
        }

        let id = frame.id;
        match self.sent.remove(&id) {
            Some(slot) => {
                if slot.resolve(frame.payload) {
                    trace!(runner = %self.runner.shared.name, id, "response matched");
                } else {
                    debug!(runner = %self.runner.shared.name, id, "response for cancelled request; discarding");
                }
            }
            None if self.abandoned.remove(&id).is_some() => {
                debug!(runner = %self.runner.shared.name, id, "late response for cancelled request; discarding");
            }
            None => {
                warn!(runner = %self.runner.shared.name, id, "response for unknown request; discarding");
            }
        }
    }

    fn forget(&mut self, id: i32) {
        let cancelled = self.sent.get(&id).is_some_and(|slot| slot.is_cancelled());
        if cancelled {
            let now = Instant::now();
            let expired = prune_abandoned(&mut self.abandoned, now);
            if expired > 0 {
                debug!(runner = %self.runner.shared.name, expired, "stopped waiting for abandoned responses");
            }
            self.sent.remove(&id);
            self.abandoned.insert(id, now + self.abandon_timeout);
            debug!(runner = %self.runner.shared.name, id, "abandoned sent request");
        }
    }

    fn broadcast(&self, payload: &Bytes) {
        let shared = &self.runner.shared;
        let update = match shared.codec.decode(payload) {
            Ok(update) => update,
            Err(err) => {
                warn!(runner = %shared.name, error = %err, "dropping undecodable update");
                return;
            }
        };

        let listeners = shared.listeners.snapshot();
        trace!(runner = %shared.name, listeners = listeners.len(), "broadcasting update");
        for listener in listeners {
            let call = catch_unwind(AssertUnwindSafe(|| listener(&update, &self.runner)));
            if call.is_err() {
                error!(runner = %shared.name, "update listener panicked");
            }
        }
    }

    fn teardown(mut self, cause: Cause) {
        let shared = Arc::clone(&self.runner.shared);
        shared.closing.store(true, Ordering::SeqCst);
        shared.gate.shut();

        let mut cancelled = 0usize;
        while let Ok(event) = self.events.try_recv() {
            if let Event::Outbound(request) = event {
                if request.slot.cancel_queued() {
                    cancelled += 1;
                }
            }
        }

        let failed = self.sent.len();
        for (_, slot) in self.sent.drain() {
            slot.fail(Failure::Interrupted);
        }

        if let Err(err) = self.control.close_read() {
            warn!(runner = %shared.name, error = %err, "failed to close read half");
        }
        if let Err(err) = self.control.close_write() {
            warn!(runner = %shared.name, error = %err, "failed to close write half");
        }
        drop(self.writer);

        shared.running.store(false, Ordering::SeqCst);
        shared.listeners.clear();

        match &cause {
            Cause::Requested => info!(runner = %shared.name, cancelled, failed, "runner closed"),
            Cause::PeerClosed => {
                info!(runner = %shared.name, cancelled, failed, "peer closed the connection")
            }
            Cause::ReadFailed(err) => {
                warn!(runner = %shared.name, error = %err, cancelled, failed, "read failed; runner closed")
            }
            Cause::WriteFailed(err) => {
                warn!(runner = %shared.name, error = %err, cancelled, failed, "write failed; runner closed")
            }
        }

        if catch_unwind(AssertUnwindSafe(|| shared.on_close.fire())).is_err() {
            error!(runner = %shared.name, "on-close hook panicked");
        }
    }
}

/// Drop abandoned requests whose response is no longer expected. Returns how
/// many were dropped.
fn prune_abandoned(abandoned: &mut HashMap<i32, Instant>, now: Instant) -> usize {
    let before = abandoned.len();
    abandoned.retain(|_, until| *until > now);
    before - abandoned.len()
}

/// Next id from `next` that `taken` does not reject. Ids count up from zero
/// and wrap back to zero, never going negative.
fn next_free_id(next: &mut i32, taken: impl Fn(i32) -> bool) -> i32 {
    loop {
        let id = *next;
        *next = id.checked_add(1).unwrap_or(0);
        if !taken(id) {
            return id;
        }
    }
}
