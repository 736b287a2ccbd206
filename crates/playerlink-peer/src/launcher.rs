//! Start the browser intermediary and wait for it to connect back.

use std::ffi::OsString;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use playerlink_message::JsonCodec;
use playerlink_transport::{LoopbackListener, DEFAULT_PORT};
use tracing::{debug, info, warn};

use crate::error::{PeerError, Result};
use crate::ready::{self, ReadyReceiver, ReadySender};
use crate::runner::{MessageRunner, RunnerConfig};

/// Environment variable telling the launched process where to connect.
pub const ADDR_ENV: &str = "PLAYERLINK_ADDR";

/// How long the launcher waits for the browser to connect by default.
pub const DEFAULT_ACCEPT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct LaunchConfig {
    pub program: OsString,
    pub args: Vec<OsString>,
    /// Loopback port to listen on; `0` picks a free one.
    pub port: u16,
    pub accept_timeout: Duration,
    pub runner: RunnerConfig,
}

impl LaunchConfig {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            port: DEFAULT_PORT,
            accept_timeout: DEFAULT_ACCEPT_TIMEOUT,
            runner: RunnerConfig::default().with_name("browser"),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_accept_timeout(mut self, timeout: Duration) -> Self {
        self.accept_timeout = timeout;
        self
    }

    pub fn with_runner_config(mut self, runner: RunnerConfig) -> Self {
        self.runner = runner;
        self
    }
}

type SharedChild = Arc<Mutex<Child>>;

fn lock(child: &SharedChild) -> MutexGuard<'_, Child> {
    child.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn kill(child: &SharedChild) {
    let mut child = lock(child);
    let pid = child.id();
    match child.kill() {
        Ok(()) => debug!(pid, "browser process killed"),
        Err(err) if err.kind() == ErrorKind::InvalidInput => {}
        Err(err) => warn!(pid, error = %err, "failed to kill browser process"),
    }
    if let Err(err) = child.wait() {
        warn!(pid, error = %err, "failed to reap browser process");
    }
}

/// A launched browser process and the promise of its connection.
///
/// The runner resolved through [`ready`](Self::ready) owns the process: when
/// the runner closes, the process is killed.
pub struct BrowserLauncher {
    ready: ReadyReceiver<MessageRunner>,
    addr: SocketAddr,
    child: SharedChild,
}

impl BrowserLauncher {
    /// Listen on loopback, spawn the browser with [`ADDR_ENV`] set, and
    /// accept its connection on a background thread.
    pub fn launch(config: LaunchConfig) -> Result<Self> {
        let listener = LoopbackListener::bind(config.port)?;
        let addr = listener.local_addr();

        let child = Command::new(&config.program)
            .args(&config.args)
            .env(ADDR_ENV, addr.to_string())
            .stdin(Stdio::null())
            .spawn()
            .map_err(|source| PeerError::Spawn {
                what: "browser process",
                source,
            })?;
        let pid = child.id();
        let child = Arc::new(Mutex::new(child));
        info!(%addr, pid, program = ?config.program, "browser launched");

        let (tx, rx) = ready::channel();
        let accepting = Arc::clone(&child);
        let spawned = thread::Builder::new()
            .name("browser-accept".to_string())
            .spawn(move || accept(listener, accepting, config, tx));
        if let Err(source) = spawned {
            kill(&child);
            return Err(PeerError::Spawn {
                what: "accept thread",
                source,
            });
        }

        Ok(Self {
            ready: rx,
            addr,
            child,
        })
    }

    /// Readiness promise for the connected runner.
    pub fn ready(&self) -> ReadyReceiver<MessageRunner> {
        self.ready.clone()
    }

    pub fn wait(&self) -> Result<MessageRunner> {
        self.ready.wait()
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Result<MessageRunner> {
        self.ready.wait_timeout(timeout)
    }

    /// Address the browser was told to connect to.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn pid(&self) -> u32 {
        lock(&self.child).id()
    }

    pub fn is_browser_running(&self) -> bool {
        matches!(lock(&self.child).try_wait(), Ok(None))
    }

    /// Close the runner if connected, which kills the process; otherwise
    /// kill the process directly.
    pub fn close(&self) {
        match self.ready.try_get() {
            Some(Ok(runner)) => runner.close(),
            _ => kill(&self.child),
        }
    }
}

impl std::fmt::Debug for BrowserLauncher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrowserLauncher")
            .field("addr", &self.addr)
            .field("ready", &self.ready)
            .finish()
    }
}

fn accept(
    listener: LoopbackListener,
    child: SharedChild,
    config: LaunchConfig,
    ready: ReadySender<MessageRunner>,
) {
    let alive = || matches!(lock(&child).try_wait(), Ok(None));
    let connected = listener
        .accept_timeout(config.accept_timeout, alive)
        .map_err(PeerError::from)
        .and_then(|stream| MessageRunner::start(stream, JsonCodec, config.runner));

    match connected {
        Ok(runner) => {
            let owned = Arc::clone(&child);
            runner.set_on_close(move || kill(&owned));
            info!(runner = runner.name(), "browser connected");
            ready.resolve(Ok(runner));
        }
        Err(err) => {
            warn!(error = %err, "browser never connected");
            kill(&child);
            ready.resolve(Err(err));
        }
    }
}
