//! Request/response messaging between the player and its browser
//! intermediary.
//!
//! - [`MessageRunner`] sends requests and hands back [`ResponseFuture`]s,
//!   matched to responses by correlation id. Unsolicited updates go to its
//!   update listeners.
//! - [`MessageHandler`] answers requests by folding a listener chain on a
//!   worker pool, and pushes updates with [`MessageHandler::send_update`].
//! - [`NativeRunner`] is the runner for the browser's native-messaging
//!   channel, where responses are matched in order.
//! - [`BrowserLauncher`] starts the intermediary and resolves a
//!   [`ReadyReceiver`] once it has connected.
//!
//! ```no_run
//! use playerlink_peer::{connect, Endpoint, MessageRunner};
//!
//! let endpoint: Endpoint = "unix:/tmp/player.sock".parse()?;
//! let runner = MessageRunner::new(connect(&endpoint)?)?;
//! let reply = runner.send("Hello, world!")?.get()?;
//! println!("{reply:?}");
//! runner.close();
//! # Ok::<(), playerlink_peer::PeerError>(())
//! ```

pub mod endpoint;
pub mod error;
pub mod future;
pub mod handler;
mod io;
pub mod launcher;
mod listeners;
pub mod native;
pub mod ready;
pub mod runner;

pub use endpoint::{connect, Endpoint, PeerListener};
pub use error::{PeerError, Result};
pub use future::ResponseFuture;
pub use handler::{HandlerConfig, MessageHandler, MessageListener, DEFAULT_WORKERS};
pub use launcher::{BrowserLauncher, LaunchConfig, ADDR_ENV, DEFAULT_ACCEPT_TIMEOUT};
pub use listeners::ListenerId;
pub use native::NativeRunner;
pub use ready::{ReadyReceiver, ReadySender};
pub use runner::{MessageRunner, RunnerConfig, DEFAULT_ABANDON_TIMEOUT};
