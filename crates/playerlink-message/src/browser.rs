use serde::{Deserialize, Serialize};

use crate::message::Message;

/// An instruction for the browser to change playback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command")]
pub enum BrowserCommand {
    /// Load and start the song at `url`.
    #[serde(rename = "loadSong")]
    LoadSong { url: String },
    /// Jump to `time` seconds, or move by `time` seconds when `relative`.
    #[serde(rename = "seek")]
    Seek { time: f32, relative: bool },
    #[serde(rename = "playback")]
    SetPlayback { state: PlaybackState },
    /// Shut the browser side down.
    #[serde(rename = "quit")]
    Quit,
    /// Raise an error inside the browser. With `forward`, the error is
    /// pushed back to the player as well as returned.
    #[serde(rename = "error")]
    RaiseError { forward: bool },
}

impl BrowserCommand {
    /// The command name as it appears on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            BrowserCommand::LoadSong { .. } => "loadSong",
            BrowserCommand::Seek { .. } => "seek",
            BrowserCommand::SetPlayback { .. } => "playback",
            BrowserCommand::Quit => "quit",
            BrowserCommand::RaiseError { .. } => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PlaybackState {
    Play,
    Pause,
}

/// A question about the browser's playback state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "query")]
pub enum BrowserQuery {
    /// Position in seconds; answered with [`Message::Float`].
    #[serde(rename = "currentTime")]
    CurrentTime,
    /// Song length in seconds; answered with [`Message::Float`].
    #[serde(rename = "length")]
    Length,
    /// Answered with [`Message::Bool`].
    #[serde(rename = "isPaused")]
    IsPaused,
    /// Answered with [`Message::Playback`].
    #[serde(rename = "getStatus")]
    Status,
    /// URL of the loaded song; answered with [`Message::Text`].
    #[serde(rename = "getSong")]
    Song,
    /// Metadata for the song at `url`.
    #[serde(rename = "getSongData")]
    SongData { url: String },
}

impl BrowserQuery {
    /// The query name as it appears on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            BrowserQuery::CurrentTime => "currentTime",
            BrowserQuery::Length => "length",
            BrowserQuery::IsPaused => "isPaused",
            BrowserQuery::Status => "getStatus",
            BrowserQuery::Song => "getSong",
            BrowserQuery::SongData { .. } => "getSongData",
        }
    }
}

/// An error raised on the other side of the link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    /// Error kind, e.g. `"TypeError"` or `"ListenerPanic"`.
    pub name: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stack: Vec<String>,
}

impl RemoteError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            stack: Vec::new(),
        }
    }

    pub fn with_stack(mut self, stack: Vec<String>) -> Self {
        self.stack = stack;
        self
    }
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

/// Outcome of a command.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CommandConfirmation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RemoteError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CommandConfirmation {
    pub fn success() -> Self {
        Self::default()
    }

    pub fn failure(error: RemoteError) -> Self {
        Self {
            error: Some(error),
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn was_successful(&self) -> bool {
        self.error.is_none()
    }
}

/// A command result that carries a value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandReturn {
    pub value: Box<Message>,
    #[serde(default)]
    pub confirmation: CommandConfirmation,
}

impl CommandReturn {
    pub fn new(value: Message) -> Self {
        Self {
            value: Box::new(value),
            confirmation: CommandConfirmation::success(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// A log line forwarded from the browser side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub logger: String,
    pub level: LogLevel,
    pub message: Vec<String>,
}

impl LogRecord {
    /// Message parts joined with spaces.
    pub fn text(&self) -> String {
        self.message.join(" ")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PlaybackStatus {
    Playing,
    Paused,
    Stopped,
    Finished,
    #[default]
    Empty,
}

/// Snapshot of what the browser is playing.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PlaybackInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub song: Option<String>,
    /// Seconds into the song.
    #[serde(rename = "playTime")]
    pub play_time: f64,
    pub status: PlaybackStatus,
}

/// Liveness probe carrying a number the other side echoes back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumberPing {
    pub number: i64,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn command_wire_names() {
        let seek = BrowserCommand::Seek {
            time: 12.5,
            relative: true,
        };
        assert_eq!(
            serde_json::to_value(&seek).unwrap(),
            json!({"command": "seek", "time": 12.5, "relative": true})
        );
        assert_eq!(seek.name(), "seek");

        let play = BrowserCommand::SetPlayback {
            state: PlaybackState::Pause,
        };
        assert_eq!(
            serde_json::to_value(&play).unwrap(),
            json!({"command": "playback", "state": "PAUSE"})
        );
        assert_eq!(
            serde_json::to_value(BrowserCommand::Quit).unwrap(),
            json!({"command": "quit"})
        );
    }

    #[test]
    fn query_names_match_wire_tags() {
        let queries = [
            BrowserQuery::CurrentTime,
            BrowserQuery::Length,
            BrowserQuery::IsPaused,
            BrowserQuery::Status,
            BrowserQuery::Song,
            BrowserQuery::SongData {
                url: "file:///a.ogg".into(),
            },
        ];
        for query in queries {
            let value = serde_json::to_value(&query).unwrap();
            assert_eq!(value["query"], query.name());
        }
    }

    #[test]
    fn unknown_command_rejected() {
        let result = serde_json::from_value::<BrowserCommand>(json!({"command": "rewind"}));
        assert!(result.is_err());
    }

    #[test]
    fn confirmation_success_is_compact() {
        let ok = CommandConfirmation::success();
        assert!(ok.was_successful());
        assert_eq!(serde_json::to_value(&ok).unwrap(), json!({}));

        let failed = CommandConfirmation::failure(RemoteError::new("NotFound", "no such song"));
        assert!(!failed.was_successful());
        assert_eq!(failed.error.as_ref().unwrap().to_string(), "NotFound: no such song");
    }

    #[test]
    fn playback_info_field_names() {
        let info = PlaybackInfo {
            song: Some("file:///a.ogg".into()),
            play_time: 3.0,
            status: PlaybackStatus::Playing,
        };
        assert_eq!(
            serde_json::to_value(&info).unwrap(),
            json!({"song": "file:///a.ogg", "playTime": 3.0, "status": "PLAYING"})
        );
    }

    #[test]
    fn log_record_text_joins_parts() {
        let record: LogRecord = serde_json::from_value(json!({
            "logger": "player",
            "level": "warn",
            "message": ["buffer", "underrun"]
        }))
        .unwrap();
        assert_eq!(record.level, LogLevel::Warn);
        assert_eq!(record.text(), "buffer underrun");
    }
}
