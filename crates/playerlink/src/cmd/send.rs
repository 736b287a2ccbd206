use playerlink_message::{Message, NumberPing};
use playerlink_peer::{connect, MessageRunner};
use tracing::debug;

use crate::cmd::{parse_duration, parse_endpoint, SendArgs};
use crate::exit::{peer_error, CliError, CliResult, FAILURE, SUCCESS, USAGE};
use crate::output::{print_message, Direction, OutputFormat};

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let endpoint = parse_endpoint(&args.endpoint)?;
    let message = resolve_message(&args)?;

    let stream = connect(&endpoint).map_err(|err| peer_error("connect failed", err))?;
    let runner =
        MessageRunner::new(stream).map_err(|err| peer_error("runner start failed", err))?;
    runner.add_update_listener(move |update, _| print_message(update, Direction::Update, format));

    debug!(kind = message.kind(), %endpoint, "sending request");
    let outcome = runner
        .send(message)
        .and_then(|future| future.get_timeout(timeout));
    runner.close();

    let reply = outcome.map_err(|err| peer_error("request failed", err))?;
    print_message(&reply, Direction::Response, format);
    Ok(if reply.as_error().is_some() {
        FAILURE
    } else {
        SUCCESS
    })
}

fn resolve_message(args: &SendArgs) -> CliResult<Message> {
    if let Some(json) = &args.json {
        return serde_json::from_str(json)
            .map_err(|err| CliError::new(USAGE, format!("--json is not a valid message: {err}")));
    }
    if let Some(number) = args.ping {
        return Ok(Message::Ping(NumberPing { number }));
    }
    match &args.text {
        Some(text) => Ok(Message::text(text.as_str())),
        None => Err(CliError::new(USAGE, "no message given")),
    }
}

#[cfg(test)]
mod tests {
    use playerlink_message::BrowserQuery;

    use super::*;

    fn args() -> SendArgs {
        SendArgs {
            endpoint: "/tmp/player.sock".into(),
            text: None,
            json: None,
            ping: None,
            timeout: "5s".into(),
        }
    }

    #[test]
    fn json_payload_is_a_message() {
        let args = SendArgs {
            json: Some(r#"{"type":"query","value":{"query":"length"}}"#.into()),
            ..args()
        };
        assert_eq!(
            resolve_message(&args).unwrap(),
            Message::Query(BrowserQuery::Length)
        );
    }

    #[test]
    fn invalid_json_is_usage_error() {
        let args = SendArgs {
            json: Some(r#"{"type":"teleport"}"#.into()),
            ..args()
        };
        assert_eq!(resolve_message(&args).unwrap_err().code, USAGE);
    }

    #[test]
    fn ping_and_text() {
        let ping = SendArgs {
            ping: Some(9),
            ..args()
        };
        assert_eq!(
            resolve_message(&ping).unwrap(),
            Message::Ping(NumberPing { number: 9 })
        );
        let text = SendArgs {
            text: Some("Hello, world!".into()),
            ..args()
        };
        assert_eq!(resolve_message(&text).unwrap(), Message::text("Hello, world!"));
    }
}
