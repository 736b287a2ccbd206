//! Native-messaging host sitting between the browser extension and the player.
//!
//! stdin/stdout carry native-host frames to and from the browser. The player
//! is reached over a correlated link: its requests are forwarded to the
//! browser one at a time, and whatever the browser sends unprompted is pushed
//! to the player as an update.

use std::sync::mpsc;
use std::time::Duration;

use playerlink_message::{JsonCodec, Message, RemoteError};
use playerlink_peer::{
    connect, HandlerConfig, MessageHandler, NativeRunner, PeerError, RunnerConfig,
};
use playerlink_transport::StdioTransport;
use tracing::{info, warn};

use crate::cmd::{parse_duration, parse_endpoint, BridgeArgs};
use crate::exit::{peer_error, CliResult, SUCCESS};

#[derive(Debug, Clone, Copy)]
enum Side {
    Browser,
    Player,
}

pub fn run(args: BridgeArgs) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let endpoint = parse_endpoint(&args.connect)?;

    let stream = connect(&endpoint).map_err(|err| peer_error("connect failed", err))?;
    let browser = NativeRunner::start(
        StdioTransport::new(),
        JsonCodec,
        RunnerConfig::default().with_name("browser"),
    )
    .map_err(|err| peer_error("browser channel failed", err))?;
    let player = MessageHandler::start(
        stream,
        JsonCodec,
        HandlerConfig::default().with_name("player").with_workers(1),
    )
    .map_err(|err| {
        browser.close();
        peer_error("player link failed", err)
    })?;

    let (done_tx, done_rx) = mpsc::channel();
    let tx = done_tx.clone();
    browser.set_on_close(move || {
        let _ = tx.send(Side::Browser);
    });
    player.set_on_close(move || {
        let _ = done_tx.send(Side::Player);
    });

    let forward_to = browser.clone();
    player.add_listener(move |request: &Message, _previous: Option<Message>| {
        forward(&forward_to, request, timeout).map(Some)
    });
    let push_to = player.clone();
    browser.add_update_listener(move |update, _| {
        if let Err(err) = push_to.send_update(update.clone()) {
            warn!(error = %err, "dropping browser update");
        }
    });
    info!(%endpoint, "bridge running");

    let closed = done_rx.recv().ok();
    info!(side = ?closed, "bridge side closed; shutting down");
    player.close();
    browser.close();
    Ok(SUCCESS)
}

fn forward(
    browser: &NativeRunner,
    request: &Message,
    timeout: Duration,
) -> Result<Message, RemoteError> {
    let bridge_error = |err: PeerError| RemoteError::new("BridgeError", err.to_string());
    let future = browser.send(request.clone()).map_err(bridge_error)?;
    match future.get_timeout(timeout) {
        Ok(reply) => Ok(reply),
        Err(err @ PeerError::Timeout(_)) => {
            // Give the wire back so later requests are not stuck behind this one.
            future.cancel(true);
            Err(bridge_error(err))
        }
        Err(err) => Err(bridge_error(err)),
    }
}
