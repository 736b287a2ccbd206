use serde::{Deserialize, Serialize};

use crate::browser::{
    BrowserCommand, BrowserQuery, CommandConfirmation, CommandReturn, LogRecord, NumberPing,
    PlaybackInfo, RemoteError,
};

/// Every kind of payload the link carries.
///
/// The set is closed: a payload whose `type` is not listed here fails to
/// decode instead of being passed through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Message {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<Message>),
    Command(BrowserCommand),
    Query(BrowserQuery),
    Return(CommandReturn),
    Confirmation(CommandConfirmation),
    Error(RemoteError),
    Log(LogRecord),
    Playback(PlaybackInfo),
    Ping(NumberPing),
}

impl Message {
    pub fn text(text: impl Into<String>) -> Self {
        Message::Text(text.into())
    }

    /// The text of a [`Message::Text`].
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Message::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Message::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// The remote error carried by this message, if it reports a failure.
    pub fn as_error(&self) -> Option<&RemoteError> {
        match self {
            Message::Error(err) => Some(err),
            Message::Confirmation(confirmation) => confirmation.error.as_ref(),
            Message::Return(ret) => ret.confirmation.error.as_ref(),
            _ => None,
        }
    }

    /// The `type` tag used on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Null => "null",
            Message::Bool(_) => "bool",
            Message::Int(_) => "int",
            Message::Float(_) => "float",
            Message::Text(_) => "text",
            Message::List(_) => "list",
            Message::Command(_) => "command",
            Message::Query(_) => "query",
            Message::Return(_) => "return",
            Message::Confirmation(_) => "confirmation",
            Message::Error(_) => "error",
            Message::Log(_) => "log",
            Message::Playback(_) => "playback",
            Message::Ping(_) => "ping",
        }
    }

    /// First NaN or infinity anywhere in the message.
    pub(crate) fn first_non_finite(&self) -> Option<f64> {
        let check = |value: f64| (!value.is_finite()).then_some(value);
        match self {
            Message::Float(value) => check(*value),
            Message::List(items) => items.iter().find_map(Message::first_non_finite),
            Message::Return(ret) => ret.value.first_non_finite(),
            Message::Playback(info) => check(info.play_time),
            Message::Command(BrowserCommand::Seek { time, .. }) => check(f64::from(*time)),
            _ => None,
        }
    }
}

impl From<&str> for Message {
    fn from(text: &str) -> Self {
        Message::Text(text.to_string())
    }
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Message::Text(text)
    }
}

impl From<bool> for Message {
    fn from(value: bool) -> Self {
        Message::Bool(value)
    }
}

impl From<i64> for Message {
    fn from(value: i64) -> Self {
        Message::Int(value)
    }
}

impl From<f64> for Message {
    fn from(value: f64) -> Self {
        Message::Float(value)
    }
}

impl From<BrowserCommand> for Message {
    fn from(command: BrowserCommand) -> Self {
        Message::Command(command)
    }
}

impl From<BrowserQuery> for Message {
    fn from(query: BrowserQuery) -> Self {
        Message::Query(query)
    }
}

impl From<RemoteError> for Message {
    fn from(error: RemoteError) -> Self {
        Message::Error(error)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::browser::{PlaybackState, PlaybackStatus};

    #[test]
    fn adjacently_tagged_layout() {
        assert_eq!(
            serde_json::to_value(Message::text("Hello, world!")).unwrap(),
            json!({"type": "text", "value": "Hello, world!"})
        );
        assert_eq!(
            serde_json::to_value(Message::Null).unwrap(),
            json!({"type": "null"})
        );
        assert_eq!(
            serde_json::to_value(Message::Ping(NumberPing { number: 3 })).unwrap(),
            json!({"type": "ping", "value": {"number": 3}})
        );
    }

    #[test]
    fn kind_matches_serialized_tag() {
        let samples = vec![
            Message::Null,
            Message::Bool(true),
            Message::Int(-4),
            Message::Float(0.5),
            Message::text("x"),
            Message::List(vec![Message::Int(1), Message::Null]),
            BrowserCommand::SetPlayback {
                state: PlaybackState::Play,
            }
            .into(),
            BrowserQuery::IsPaused.into(),
            Message::Return(CommandReturn::new(Message::Float(93.2))),
            Message::Confirmation(CommandConfirmation::success()),
            RemoteError::new("TypeError", "undefined").into(),
            Message::Log(LogRecord {
                logger: "browser".into(),
                level: crate::browser::LogLevel::Info,
                message: vec!["ready".into()],
            }),
            Message::Playback(PlaybackInfo {
                song: None,
                play_time: 0.0,
                status: PlaybackStatus::Empty,
            }),
        ];
        for message in samples {
            let value = serde_json::to_value(&message).unwrap();
            assert_eq!(value["type"], message.kind());
            let back: Message = serde_json::from_value(value).unwrap();
            assert_eq!(back, message);
        }
    }

    #[test]
    fn unknown_kind_rejected() {
        let result = serde_json::from_value::<Message>(json!({"type": "song", "value": {}}));
        assert!(result.is_err());
    }

    #[test]
    fn as_error_looks_inside_results() {
        let err = RemoteError::new("NotFound", "missing");
        let confirmation = Message::Confirmation(CommandConfirmation::failure(err.clone()));
        assert_eq!(confirmation.as_error(), Some(&err));
        assert_eq!(Message::Error(err.clone()).as_error(), Some(&err));
        assert!(Message::Confirmation(CommandConfirmation::success())
            .as_error()
            .is_none());
        assert!(Message::Int(1).as_error().is_none());
    }

    #[test]
    fn conversions() {
        assert_eq!(Message::from("pong").as_text(), Some("pong"));
        assert_eq!(Message::from(7i64).as_int(), Some(7));
        assert_eq!(Message::from(true), Message::Bool(true));
    }
}
