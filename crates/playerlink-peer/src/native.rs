//! Runner for the browser's native-messaging channel.
//!
//! Native-host frames carry no correlation id, so requests are answered in
//! order and only one request is on the wire at a time. A request cancelled
//! after it was written keeps the wire until its answer arrives or the
//! abandon timeout passes.

use std::collections::VecDeque;
use std::io::Write;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use playerlink_frame::{FrameError, FrameReader, FrameWriter, NativeHost};
use playerlink_message::{JsonCodec, MessageCodec};
use playerlink_transport::{StreamControl, Transport};
use tracing::{debug, error, info, trace, warn};

use crate::error::{PeerError, Result};
use crate::future::{CancelSink, Failure, ResponseFuture, Slot};
use crate::io::{spawn_reader, EventGate, LoopThread, ReadOutcome};
use crate::listeners::{ListenerId, ListenerSet, OnClose};
use crate::runner::{QueuedRequest, RunnerConfig};

/// Callback for messages the browser pushes without being asked.
pub type NativeUpdateListener<C> =
    dyn Fn(&<C as MessageCodec>::Item, &NativeRunner<C>) + Send + Sync;

enum Event {
    Read(ReadOutcome<String>),
    Outbound(QueuedRequest),
    Forget(i32),
    Shutdown,
}

impl CancelSink for EventGate<Event> {
    fn cancelled(&self, seq: i32) {
        let _ = self.send(Event::Forget(seq));
    }
}

struct Shared<C: MessageCodec> {
    name: String,
    codec: Arc<C>,
    gate: Arc<EventGate<Event>>,
    closing: AtomicBool,
    running: AtomicBool,
    listeners: ListenerSet<NativeUpdateListener<C>>,
    on_close: OnClose,
    thread: Arc<LoopThread>,
}

/// Request/response over native-host framing.
///
/// Same surface as [`MessageRunner`](crate::MessageRunner). Requests queue up
/// and are written one at a time; the next inbound message answers the
/// request on the wire. Messages arriving while nothing is outstanding are
/// updates.
pub struct NativeRunner<C: MessageCodec = JsonCodec> {
    shared: Arc<Shared<C>>,
}

impl<C: MessageCodec> Clone for NativeRunner<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl NativeRunner<JsonCodec> {
    pub fn new(transport: impl Transport) -> Result<Self> {
        Self::start(
            transport,
            JsonCodec,
            RunnerConfig::default().with_name("native"),
        )
    }
}

impl<C: MessageCodec> NativeRunner<C> {
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

        let reader: FrameReader<_, NativeHost> =
            FrameReader::with_framing(halves.reader, config.frame.clone());
        spawn_reader(&config.name, reader, tx, Event::Read)?;

        let io = NativeLoop {
            runner: runner.clone(),
            events: rx,
            writer: FrameWriter::with_framing(halves.writer, config.frame),
            control: Arc::clone(&control),
            waiting: VecDeque::new(),
            wire: None,
            abandon_timeout: config.abandon_timeout,
            next_seq: 0,
        };
        let handle = thread::Builder::new()
            .name(format!("{}-io", config.name))
            .spawn(move || io.run())
            .map_err(|source| {
                let _ = control.close_read();
                PeerError::Spawn {
                    what: "native I/O loop",
                    source,
                }
            })?;
        runner.shared.thread.attach(handle);

        info!(runner = %config.name, transport = %kind, "native runner started");
        Ok(runner)
    }

    pub fn send(&self, request: impl Into<C::Item>) -> Result<ResponseFuture<C>> {
        let payload = self.shared.codec.encode(&request.into())?;
        let codec = Arc::clone(&self.shared.codec);
        if self.shared.closing.load(Ordering::SeqCst) {
            return Ok(ResponseFuture::cancelled(codec));
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
            debug!(runner = %self.shared.name, "native runner closed while sending");
        }
        Ok(future)
    }

    pub fn add_update_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&C::Item, &NativeRunner<C>) + Send + Sync + 'static,
    {
        self.shared.listeners.add(Arc::new(listener))
    }

    pub fn remove_update_listener(&self, id: ListenerId) -> bool {
        self.shared.listeners.remove(id)
    }

    pub fn has_update_listener(&self, id: ListenerId) -> bool {
        self.shared.listeners.contains(id)
    }

    pub fn set_on_close(&self, hook: impl FnOnce() + Send + 'static) {
        self.shared.on_close.set(Box::new(hook));
    }

    pub fn close(&self) {
        if !self.shared.closing.swap(true, Ordering::SeqCst) {
            let _ = self.shared.gate.send(Event::Shutdown);
        }
        self.join();
    }

    pub fn join(&self) {
        self.shared.thread.join();
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }
}

impl<C: MessageCodec> std::fmt::Debug for NativeRunner<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeRunner")
            .field("name", &self.shared.name)
            .field("running", &self.is_running())
            .finish()
    }
}

/// What the browser's next message answers.
enum OnWire {
    Request { seq: i32, slot: Arc<Slot> },
    /// Cancelled after it was written. Its answer is discarded.
    Abandoned { seq: i32, until: Instant },
}

struct NativeLoop<C: MessageCodec> {
    runner: NativeRunner<C>,
    events: Receiver<Event>,
    writer: FrameWriter<Box<dyn Write + Send>, NativeHost>,
    control: Arc<dyn StreamControl>,
    waiting: VecDeque<QueuedRequest>,
    wire: Option<OnWire>,
    abandon_timeout: Duration,
    next_seq: i32,
}

impl<C: MessageCodec> NativeLoop<C> {
    fn run(mut self) {
        let thread = Arc::clone(&self.runner.shared.thread);
        let _exit = thread.enter();
        let failure = self.pump();
        self.teardown(failure);
    }

    fn pump(&mut self) -> Option<FrameError> {
        loop {
            let event = match self.wire {
                Some(OnWire::Abandoned { seq, until }) => {
                    let wait = until.saturating_duration_since(Instant::now());
                    match self.events.recv_timeout(wait) {
                        Ok(event) => event,
                        Err(RecvTimeoutError::Timeout) => {
                            warn!(runner = %self.runner.shared.name, seq, "no response for abandoned request; freeing the wire");
                            self.wire = None;
                            if let Err(err) = self.write_next() {
                                return Some(err);
                            }
                            continue;
                        }
                        Err(RecvTimeoutError::Disconnected) => return None,
                    }
                }
                _ => match self.events.recv() {
                    Ok(event) => event,
                    Err(_) => return None,
                },
            };
            match event {
                Event::Outbound(request) => {
                    if self.runner.shared.closing.load(Ordering::SeqCst) {
                        continue;
                    }
                    self.waiting.push_back(request);
                }
                Event::Read(ReadOutcome::Frame(text)) => self.dispatch(text),
                Event::Read(ReadOutcome::Closed) | Event::Shutdown => return None,
                Event::Read(ReadOutcome::Failed(err)) => return Some(err),
                Event::Forget(seq) => self.forget(seq),
            }
            if let Err(err) = self.write_next() {
                return Some(err);
            }
        }
    }

    fn write_next(&mut self) -> std::result::Result<(), FrameError> {
        while self.wire.is_none() {
            let Some(request) = self.waiting.pop_front() else {
                return Ok(());
            };
            let seq = self.next_seq;
            self.next_seq = seq.checked_add(1).unwrap_or(0);
            if !request.slot.mark_sent(seq) {
                continue;
            }

            let text = match String::from_utf8(request.payload.clone()) {
                Ok(text) => text,
                Err(err) => {
                    warn!(runner = %self.runner.shared.name, error = %err, "request is not UTF-8");
                    request.slot.fail(Failure::WriteFailed(err.to_string()));
                    continue;
                }
            };
            match self.writer.send_text(&text) {
                Ok(()) => {
                    trace!(runner = %self.runner.shared.name, seq, size = text.len(), "request sent");
                    self.wire = Some(OnWire::Request {
                        seq,
                        slot: Arc::clone(&request.slot),
                    });
                }
                Err(err @ FrameError::PayloadTooLarge { .. }) => {
                    warn!(runner = %self.runner.shared.name, error = %err, "request rejected");
                    request.slot.fail(Failure::WriteFailed(err.to_string()));
                }
                Err(err) => {
                    error!(runner = %self.runner.shared.name, error = %err, "failed to write request");
                    request.slot.fail(Failure::WriteFailed(err.to_string()));
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    fn dispatch(&mut self, text: String) {
        match self.wire.take() {
            Some(OnWire::Request { seq, slot }) => {
                if !slot.resolve(Bytes::from(text)) {
                    debug!(runner = %self.runner.shared.name, seq, "response for cancelled request; discarding");
                }
            }
            Some(OnWire::Abandoned { seq, .. }) => {
                debug!(runner = %self.runner.shared.name, seq, "late response for abandoned request; discarding");
            }
            None => self.broadcast(&text),
        }
    }

    fn forget(&mut self, seq: i32) {
        let abandoned = matches!(
            &self.wire,
            Some(OnWire::Request { seq: current, slot }) if *current == seq && slot.is_cancelled()
        );
        if abandoned {
            self.wire = Some(OnWire::Abandoned {
                seq,
                until: Instant::now() + self.abandon_timeout,
            });
            debug!(runner = %self.runner.shared.name, seq, "abandoned in-flight request");
        }
    }

    fn broadcast(&self, text: &str) {
        let shared = &self.runner.shared;
        let update = match shared.codec.decode(text.as_bytes()) {
            Ok(update) => update,
            Err(err) => {
                warn!(runner = %shared.name, error = %err, "dropping undecodable update");
                return;
            }
        };
        for listener in shared.listeners.snapshot() {
            if catch_unwind(AssertUnwindSafe(|| listener(&update, &self.runner))).is_err() {
                error!(runner = %shared.name, "update listener panicked");
            }
        }
    }

    fn teardown(mut self, failure: Option<FrameError>) {
        let shared = Arc::clone(&self.runner.shared);
        shared.closing.store(true, Ordering::SeqCst);
        shared.gate.shut();

        // Dropping an unsent request cancels it.
        while let Ok(event) = self.events.try_recv() {
            drop(event);
        }
        let cancelled = self.waiting.len();
        self.waiting.clear();
        if let Some(OnWire::Request { slot, .. }) = self.wire.take() {
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
        match failure {
            Some(err) => warn!(runner = %shared.name, error = %err, cancelled, "native runner failed"),
            None => info!(runner = %shared.name, cancelled, "native runner closed"),
        }

        if catch_unwind(AssertUnwindSafe(|| shared.on_close.fire())).is_err() {
            error!(runner = %shared.name, "on-close hook panicked");
        }
    }
}
