mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "playerlink", version, about = "Player/browser messaging CLI")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(
        long,
        value_name = "LEVEL",
        default_value = "info",
        env = "PLAYERLINK_LOG",
        global = true
    )]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    match cmd::run(cli.command, format) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_send_subcommand() {
        let cli = Cli::try_parse_from([
            "playerlink",
            "send",
            "unix:/tmp/player.sock",
            "--text",
            "Hello, world!",
            "--timeout",
            "2s",
        ])
        .expect("send args should parse");

        assert!(matches!(cli.command, Command::Send(_)));
    }

    #[test]
    fn send_needs_exactly_one_payload() {
        let err = Cli::try_parse_from([
            "playerlink",
            "send",
            "/tmp/player.sock",
            "--text",
            "hi",
            "--ping",
            "3",
        ])
        .expect_err("conflicting payloads should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);

        let err = Cli::try_parse_from(["playerlink", "send", "/tmp/player.sock"])
            .expect_err("missing payload should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn parses_serve_and_bridge() {
        let cli = Cli::try_parse_from([
            "playerlink",
            "serve",
            "tcp:127.0.0.1:0",
            "--update",
            "ping",
            "--count",
            "1",
        ])
        .expect("serve args should parse");
        assert!(matches!(cli.command, Command::Serve(_)));

        let cli = Cli::try_parse_from(["playerlink", "bridge", "--connect", "127.0.0.1:3000"])
            .expect("bridge args should parse");
        assert!(matches!(cli.command, Command::Bridge(_)));
    }
}
