use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use playerlink_message::{
    BrowserCommand, BrowserQuery, CommandConfirmation, JsonCodec, Message, PlaybackInfo,
    RemoteError,
};
use playerlink_peer::{HandlerConfig, MessageHandler, PeerListener};
use tracing::{info, warn};

use crate::cmd::{parse_endpoint, ServeArgs};
use crate::exit::{peer_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::OutputFormat;

pub fn run(args: ServeArgs, _format: OutputFormat) -> CliResult<i32> {
    let endpoint = parse_endpoint(&args.endpoint)?;
    let listener = PeerListener::bind(&endpoint).map_err(|err| peer_error("bind failed", err))?;
    info!(endpoint = %listener.local_endpoint(), "serving");

    let running = Arc::new(AtomicBool::new(true));
    let current: Arc<Mutex<Option<MessageHandler>>> = Arc::new(Mutex::new(None));
    install_ctrlc_handler(Arc::clone(&running), Arc::clone(&current))?;

    let mut served = 0usize;
    while running.load(Ordering::SeqCst) {
        let stream = listener
            .accept()
            .map_err(|err| peer_error("accept failed", err))?;
        let config = HandlerConfig::default()
            .with_name(format!("peer-{served}"))
            .with_workers(args.workers);
        let handler = MessageHandler::start(stream, JsonCodec, config)
            .map_err(|err| peer_error("handler start failed", err))?;
        handler.add_listener(respond);

        if let Some(text) = &args.update {
            if let Err(err) = handler.send_update(text.as_str()) {
                warn!(error = %err, "failed to push update");
            }
        }

        set_current(&current, Some(handler.clone()));
        handler.join();
        set_current(&current, None);

        served += 1;
        info!(served, "peer disconnected");
        if args.count.is_some_and(|count| served >= count) {
            break;
        }
    }

    Ok(SUCCESS)
}

fn set_current(current: &Mutex<Option<MessageHandler>>, handler: Option<MessageHandler>) {
    *current.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = handler;
}

fn install_ctrlc_handler(
    running: Arc<AtomicBool>,
    current: Arc<Mutex<Option<MessageHandler>>>,
) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
        let handler = current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handler) = handler {
            handler.close();
        }
        // accept() cannot be interrupted portably.
        std::process::exit(SUCCESS);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}

/// Built-in responder: answers the way an idle browser would.
fn respond(message: &Message, previous: Option<Message>) -> Result<Option<Message>, RemoteError> {
    let reply = match message {
        Message::Text(text) if text == "ping" => Message::text("pong"),
        Message::Text(text) if text == "Hello, world!" => Message::text("Goodnight, moon!"),
        Message::Ping(ping) => Message::Int(ping.number),
        Message::Command(BrowserCommand::RaiseError { .. }) => {
            return Err(RemoteError::new("RaisedError", "error raised on request"));
        }
        Message::Command(command) => Message::Confirmation(
            CommandConfirmation::success().with_message(format!("{} accepted", command.name())),
        ),
        Message::Query(query) => match query {
            BrowserQuery::CurrentTime | BrowserQuery::Length => Message::Float(0.0),
            BrowserQuery::IsPaused => Message::Bool(true),
            BrowserQuery::Status => Message::Playback(PlaybackInfo::default()),
            BrowserQuery::Song => Message::Null,
            BrowserQuery::SongData { url } => Message::text(url.clone()),
        },
        Message::Log(record) => {
            info!(logger = %record.logger, level = ?record.level, "{}", record.text());
            return Ok(previous);
        }
        other => other.clone(),
    };
    Ok(Some(reply))
}

#[cfg(test)]
mod tests {
    use playerlink_message::{LogLevel, LogRecord, NumberPing, PlaybackState};

    use super::*;

    fn reply(message: impl Into<Message>) -> Message {
        respond(&message.into(), None)
            .expect("responder should not fail")
            .unwrap_or(Message::Null)
    }

    #[test]
    fn greets_and_pongs() {
        assert_eq!(reply("Hello, world!"), Message::text("Goodnight, moon!"));
        assert_eq!(reply("ping"), Message::text("pong"));
        assert_eq!(reply("echo me"), Message::text("echo me"));
    }

    #[test]
    fn numbered_ping_returns_number() {
        assert_eq!(reply(Message::Ping(NumberPing { number: 42 })), Message::Int(42));
    }

    #[test]
    fn commands_are_confirmed() {
        let confirmation = reply(BrowserCommand::SetPlayback {
            state: PlaybackState::Play,
        });
        match confirmation {
            Message::Confirmation(confirmation) => {
                assert!(confirmation.was_successful());
                assert_eq!(confirmation.message.as_deref(), Some("playback accepted"));
            }
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[test]
    fn raise_error_fails() {
        let err = respond(
            &BrowserCommand::RaiseError { forward: false }.into(),
            None,
        )
        .unwrap_err();
        assert_eq!(err.name, "RaisedError");
    }

    #[test]
    fn queries_have_defaults() {
        assert_eq!(reply(BrowserQuery::IsPaused), Message::Bool(true));
        assert_eq!(reply(BrowserQuery::Length), Message::Float(0.0));
        assert_eq!(
            reply(BrowserQuery::Status),
            Message::Playback(PlaybackInfo::default())
        );
    }

    #[test]
    fn log_records_pass_previous_through() {
        let record = Message::Log(LogRecord {
            logger: "browser".into(),
            level: LogLevel::Info,
            message: vec!["song".into(), "loaded".into()],
        });
        assert_eq!(respond(&record, None).unwrap(), None);
    }
}
