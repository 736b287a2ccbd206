use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use playerlink_message::Message;
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// How a printed message reached us.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Response,
    Update,
}

impl Direction {
    fn as_str(self) -> &'static str {
        match self {
            Direction::Response => "response",
            Direction::Update => "update",
        }
    }
}

#[derive(Serialize)]
struct MessageOutput<'a> {
    direction: Direction,
    kind: &'static str,
    message: &'a Message,
    timestamp: String,
}

pub fn render_message(message: &Message, direction: Direction, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => {
            let out = MessageOutput {
                direction,
                kind: message.kind(),
                message,
                timestamp: now_unix_seconds(),
            };
            serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["DIRECTION", "KIND", "MESSAGE"])
                .add_row(vec![
                    direction.as_str().to_string(),
                    message.kind().to_string(),
                    summary(message),
                ]);
            table.to_string()
        }
        OutputFormat::Pretty => format!(
            "{} kind={} message={}",
            direction.as_str(),
            message.kind(),
            summary(message)
        ),
        OutputFormat::Raw => serde_json::to_string(message).unwrap_or_default(),
    }
}

pub fn print_message(message: &Message, direction: Direction, format: OutputFormat) {
    let mut out = std::io::stdout().lock();
    let _ = writeln!(out, "{}", render_message(message, direction, format));
    let _ = out.flush();
}

fn summary(message: &Message) -> String {
    match message {
        Message::Text(text) => text.clone(),
        Message::Error(error) => error.to_string(),
        Message::Log(record) => format!("[{:?}] {}", record.level, record.text()),
        other => serde_json::to_value(other)
            .ok()
            .and_then(|value| value.get("value").cloned())
            .map(|value| value.to_string())
            .unwrap_or_else(|| other.kind().to_string()),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
