//! The responding side of a link.
//!
//! Every inbound request is folded through the listener chain on a worker
//! thread and the result is written back under the request's id. The reader
//! never waits for a listener, so slow requests do not hold up fast ones.

use std::collections::HashMap;
use std::io::Write;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread;

use playerlink_frame::{Frame, FrameConfig, FrameError, FrameReader, FrameWriter, UPDATE_ID};
use playerlink_message::{JsonCodec, MessageCodec, RemoteError};
use playerlink_transport::{StreamControl, Transport};
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::error::{PeerError, Result};
use crate::io::{spawn_reader, EventGate, LoopThread, ReadOutcome};
use crate::listeners::{ListenerId, ListenerSet, OnClose};

/// Default number of threads running listener chains.
pub const DEFAULT_WORKERS: usize = 4;

/// One link in the listener chain.
///
/// Receives the request and whatever the previous listener produced (`None`
/// for the first). Returning an error records a failure reply; later
/// listeners still run and may replace it.
pub trait MessageListener<T>: Send + Sync {
    fn on_message(&self, message: &T, previous: Option<T>)
        -> std::result::Result<Option<T>, RemoteError>;
}

impl<T, F> MessageListener<T> for F
where
    F: Fn(&T, Option<T>) -> std::result::Result<Option<T>, RemoteError> + Send + Sync,
{
    fn on_message(
        &self,
        message: &T,
        previous: Option<T>,
    ) -> std::result::Result<Option<T>, RemoteError> {
        self(message, previous)
    }
}

#[derive(Debug, Clone)]
pub struct HandlerConfig {
    pub name: String,
    /// Maximum number of listener chains running at once.
    pub workers: usize,
    pub frame: FrameConfig,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            name: "handler".to_string(),
            workers: DEFAULT_WORKERS,
            frame: FrameConfig::default(),
        }
    }
}

impl HandlerConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_frame_config(mut self, frame: FrameConfig) -> Self {
        self.frame = frame;
        self
    }
}

enum Event {
    Read(ReadOutcome<Frame>),
    Completed { id: i32, seq: u64, payload: Vec<u8> },
    Update(Vec<u8>),
    Shutdown,
}

struct Task {
    seq: u64,
    handle: JoinHandle<()>,
}

struct Shared<C: MessageCodec> {
    name: String,
    codec: Arc<C>,
    gate: EventGate<Event>,
    closing: AtomicBool,
    running: AtomicBool,
    listeners: ListenerSet<dyn MessageListener<C::Item>>,
    on_close: OnClose,
    thread: Arc<LoopThread>,
}

impl<C: MessageCodec> Shared<C> {
    /// Run the listener chain for one request.
    fn fold(&self, request: &C::Item) -> C::Item {
        let mut result: Option<C::Item> = None;
        for listener in self.listeners.snapshot() {
            let previous = result.take();
            result = match catch_unwind(AssertUnwindSafe(|| {
                listener.on_message(request, previous)
            })) {
                Ok(Ok(next)) => next,
                Ok(Err(remote)) => {
                    debug!(handler = %self.name, error = %remote, "listener returned an error");
                    Some(self.codec.failure(remote))
                }
                Err(_) => {
                    error!(handler = %self.name, "listener panicked");
                    Some(
                        self.codec
                            .failure(RemoteError::new("ListenerPanic", "listener panicked")),
                    )
                }
            };
        }
        result.unwrap_or_else(|| self.codec.empty())
    }

    fn encode_reply(&self, reply: &C::Item) -> Option<Vec<u8>> {
        match self.codec.encode(reply) {
            Ok(payload) => Some(payload),
            Err(err) => {
                warn!(handler = %self.name, error = %err, "reply could not be encoded");
                let failure = self
                    .codec
                    .failure(RemoteError::new("EncodeError", err.to_string()));
                self.codec.encode(&failure).ok()
            }
        }
    }
}

/// Answers requests from a [`MessageRunner`](crate::MessageRunner) on the
/// other end of a transport, and pushes updates to it.
pub struct MessageHandler<C: MessageCodec = JsonCodec> {
    shared: Arc<Shared<C>>,
}

impl<C: MessageCodec> Clone for MessageHandler<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl MessageHandler<JsonCodec> {
    pub fn new(transport: impl Transport) -> Result<Self> {
        Self::start(transport, JsonCodec, HandlerConfig::default())
    }
}

impl<C: MessageCodec> MessageHandler<C> {
    /// Split `transport`, start the worker pool and the reader and I/O
    /// threads.
    pub fn start(transport: impl Transport, codec: C, config: HandlerConfig) -> Result<Self> {
        let kind = transport.describe();
        let workers = config.workers.max(1);
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(workers)
            .thread_name(format!("{}-worker", config.name))
            .build()
            .map_err(|source| PeerError::Spawn {
                what: "handler worker pool",
                source,
            })?;

        let halves = transport.into_halves()?;
        let control: Arc<dyn StreamControl> = Arc::from(halves.control);
        let (tx, rx) = mpsc::channel();

        let shared = Arc::new(Shared {
            name: config.name.clone(),
            codec: Arc::new(codec),
            gate: EventGate::new(tx.clone()),
            closing: AtomicBool::new(false),
            running: AtomicBool::new(true),
            listeners: ListenerSet::new(),
            on_close: OnClose::new(),
            thread: LoopThread::new(),
        });

        let reader = FrameReader::with_config(halves.reader, config.frame.clone());
        spawn_reader(&config.name, reader, tx, Event::Read)?;

        let io = HandlerLoop {
            shared: Arc::clone(&shared),
            events: rx,
            writer: FrameWriter::with_config(halves.writer, config.frame),
            control: Arc::clone(&control),
            runtime: Some(runtime),
            in_flight: HashMap::new(),
            next_seq: 0,
        };
        let handle = thread::Builder::new()
            .name(format!("{}-io", config.name))
            .spawn(move || io.run())
            .map_err(|source| {
                let _ = control.close_read();
                PeerError::Spawn {
                    what: "handler I/O loop",
                    source,
                }
            })?;
        shared.thread.attach(handle);

        info!(handler = %config.name, transport = %kind, workers, "handler started");
        Ok(Self { shared })
    }

    /// Append a closure to the listener chain.
    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&C::Item, Option<C::Item>) -> std::result::Result<Option<C::Item>, RemoteError>
            + Send
            + Sync
            + 'static,
    {
        self.shared.listeners.add(Arc::new(listener))
    }

    /// Append a [`MessageListener`] implementation to the chain.
    pub fn add_message_listener(
        &self,
        listener: Arc<dyn MessageListener<C::Item>>,
    ) -> ListenerId {
        self.shared.listeners.add(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.shared.listeners.remove(id)
    }

    pub fn has_listener(&self, id: ListenerId) -> bool {
        self.shared.listeners.contains(id)
    }

    pub fn listener_count(&self) -> usize {
        self.shared.listeners.len()
    }

    /// Push an unsolicited update to the runner.
    pub fn send_update(&self, update: impl Into<C::Item>) -> Result<()> {
        if self.shared.closing.load(Ordering::SeqCst) {
            return Err(PeerError::Closed);
        }
        let payload = self.shared.codec.encode(&update.into())?;
        self.shared
            .gate
            .send(Event::Update(payload))
            .map_err(|_| PeerError::Closed)
    }

    pub fn set_on_close(&self, hook: impl FnOnce() + Send + 'static) {
        self.shared.on_close.set(Box::new(hook));
    }

    /// Stop reading, drop requests nobody has started on, close the transport
    /// and wait for the I/O thread.
    pub fn close(&self) {
        if !self.shared.closing.swap(true, Ordering::SeqCst) {
            debug!(handler = %self.shared.name, "close requested");
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

impl<C: MessageCodec> std::fmt::Debug for MessageHandler<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageHandler")
            .field("name", &self.shared.name)
            .field("running", &self.is_running())
            .finish()
    }
}

struct HandlerLoop<C: MessageCodec> {
    shared: Arc<Shared<C>>,
    events: Receiver<Event>,
    writer: FrameWriter<Box<dyn Write + Send>>,
    control: Arc<dyn StreamControl>,
    runtime: Option<Runtime>,
    in_flight: HashMap<i32, Task>,
    next_seq: u64,
}

impl<C: MessageCodec> HandlerLoop<C> {
    fn run(mut self) {
        let thread = Arc::clone(&self.shared.thread);
        let _exit = thread.enter();
        let failure = self.pump();
        self.teardown(failure);
    }

    fn pump(&mut self) -> Option<FrameError> {
        while let Ok(event) = self.events.recv() {
            let written = match event {
                Event::Read(ReadOutcome::Frame(frame)) => self.submit(frame),
                Event::Read(ReadOutcome::Closed) | Event::Shutdown => return None,
                Event::Read(ReadOutcome::Failed(err)) => return Some(err),
                Event::Completed { id, seq, payload } => self.complete(id, seq, payload),
                Event::Update(payload) => self.write(UPDATE_ID, &payload),
            };
            if let Err(err) = written {
                return Some(err);
            }
        }
        None
    }

    fn submit(&mut self, frame: Frame) -> std::result::Result<(), FrameError> {
        let id = frame.id;
        let request = match self.shared.codec.decode(&frame.payload) {
            Ok(request) => request,
            Err(err) => {
                warn!(handler = %self.shared.name, id, error = %err, "undecodable request");
                if frame.is_update() {
                    return Ok(());
                }
                let failure = self
                    .shared
                    .codec
                    .failure(RemoteError::new("DecodeError", err.to_string()));
                return match self.shared.encode_reply(&failure) {
                    Some(payload) => self.write(id, &payload),
                    None => Ok(()),
                };
            }
        };

        let Some(runtime) = self.runtime.as_ref() else {
            return Ok(());
        };
        let shared = Arc::clone(&self.shared);

        if frame.is_update() {
            trace!(handler = %self.shared.name, "running chain for update");
            runtime.spawn_blocking(move || {
                if !shared.closing.load(Ordering::SeqCst) {
                    shared.fold(&request);
                }
            });
            return Ok(());
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        let handle = runtime.spawn_blocking(move || {
            if shared.closing.load(Ordering::SeqCst) {
                return;
            }
            let reply = shared.fold(&request);
            if let Some(payload) = shared.encode_reply(&reply) {
                let _ = shared.gate.send(Event::Completed { id, seq, payload });
            }
        });

        if let Some(previous) = self.in_flight.insert(id, Task { seq, handle }) {
            warn!(handler = %self.shared.name, id, "duplicate request id; superseding earlier request");
            previous.handle.abort();
        }
        trace!(handler = %self.shared.name, id, size = frame.payload.len(), "request submitted");
        Ok(())
    }

    fn complete(&mut self, id: i32, seq: u64, payload: Vec<u8>) -> std::result::Result<(), FrameError> {
        match self.in_flight.get(&id) {
            Some(task) if task.seq == seq => {
                self.in_flight.remove(&id);
                self.write(id, &payload)
            }
            _ => {
                debug!(handler = %self.shared.name, id, "discarding superseded reply");
                Ok(())
            }
        }
    }

    fn write(&mut self, id: i32, payload: &[u8]) -> std::result::Result<(), FrameError> {
        match self.writer.send(id, payload) {
            Ok(()) => {
                trace!(handler = %self.shared.name, id, size = payload.len(), "frame written");
                Ok(())
            }
            Err(err @ FrameError::PayloadTooLarge { .. }) => {
                warn!(handler = %self.shared.name, id, error = %err, "reply too large");
                if id == UPDATE_ID {
                    return Ok(());
                }
                let failure = self
                    .shared
                    .codec
                    .failure(RemoteError::new("PayloadTooLarge", err.to_string()));
                match self.shared.codec.encode(&failure) {
                    Ok(small) => self.writer.send(id, &small),
                    Err(_) => Ok(()),
                }
            }
            Err(err) => {
                error!(handler = %self.shared.name, id, error = %err, "failed to write frame");
                Err(err)
            }
        }
    }

    fn teardown(mut self, failure: Option<FrameError>) {
        let shared = Arc::clone(&self.shared);
        shared.closing.store(true, Ordering::SeqCst);
        shared.gate.shut();
        while self.events.try_recv().is_ok() {}

        let aborted = self.in_flight.len();
        for (_, task) in self.in_flight.drain() {
            task.handle.abort();
        }
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }

        if let Err(err) = self.control.close_read() {
            warn!(handler = %shared.name, error = %err, "failed to close read half");
        }
        if let Err(err) = self.control.close_write() {
            warn!(handler = %shared.name, error = %err, "failed to close write half");
        }
        drop(self.writer);

        shared.running.store(false, Ordering::SeqCst);
        shared.listeners.clear();
        match failure {
            Some(err) => warn!(handler = %shared.name, error = %err, aborted, "handler failed"),
            None => info!(handler = %shared.name, aborted, "handler closed"),
        }

        if catch_unwind(AssertUnwindSafe(|| shared.on_close.fire())).is_err() {
            error!(handler = %shared.name, "on-close hook panicked");
        }
    }
}
