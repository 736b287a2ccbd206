use std::time::Duration;

use clap::{ArgGroup, Args, Subcommand};
use playerlink_peer::{Endpoint, ADDR_ENV};

use crate::exit::{CliError, CliResult};
use crate::output::OutputFormat;

pub mod bridge;
pub mod send;
pub mod serve;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Answer requests as the browser side would.
    Serve(ServeArgs),
    /// Send one request and print the response.
    Send(SendArgs),
    /// Run as the browser's native-messaging host.
    Bridge(BridgeArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args, format),
        Command::Send(args) => send::run(args, format),
        Command::Bridge(args) => bridge::run(args),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Endpoint to listen on (unix:PATH, tcp:HOST:PORT, a path or HOST:PORT).
    pub endpoint: String,
    /// Push this text as an update to every peer right after it connects.
    #[arg(long, value_name = "TEXT")]
    pub update: Option<String>,
    /// Exit after serving N peers.
    #[arg(long)]
    pub count: Option<usize>,
    /// Listener chains running at once per peer.
    #[arg(long, default_value_t = playerlink_peer::DEFAULT_WORKERS)]
    pub workers: usize,
}

#[derive(Args, Debug)]
#[command(group(ArgGroup::new("payload").required(true).args(["text", "json", "ping"])))]
pub struct SendArgs {
    /// Endpoint to connect to.
    pub endpoint: String,
    /// Send a text message.
    #[arg(long)]
    pub text: Option<String>,
    /// Send a message given in its JSON form, e.g. {"type":"query","value":{"query":"length"}}.
    #[arg(long)]
    pub json: Option<String>,
    /// Send a numbered ping.
    #[arg(long, value_name = "N")]
    pub ping: Option<i64>,
    /// How long to wait for the response (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct BridgeArgs {
    /// Player endpoint to connect to.
    #[arg(long, env = ADDR_ENV, value_name = "ENDPOINT")]
    pub connect: String,
    /// How long a forwarded request may wait for the browser (e.g. 30s).
    #[arg(long, default_value = "30s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub fn parse_endpoint(input: &str) -> CliResult<Endpoint> {
    input
        .parse()
        .map_err(|err| CliError::usage(format!("{err}")))
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::usage("duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::usage(format!("invalid duration value: {input}")))?;
    if value == 0 {
        return Err(CliError::usage("duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("bad").is_err());
        assert!(parse_duration(" ").is_err());
    }

    #[test]
    fn endpoint_errors_are_usage_errors() {
        assert_eq!(parse_endpoint("nowhere").unwrap_err().code, crate::exit::USAGE);
        assert!(parse_endpoint("tcp:127.0.0.1:3000").is_ok());
    }
}
