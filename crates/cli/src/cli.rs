use clap::{Parser, Subcommand};

use bayeux::LogLevel;

#[derive(Parser, Debug)]
#[command(name = "bayeux")]
#[command(about = "Bayeux (CometD) client - listen to and publish on channels")]
#[command(version)]
pub struct Cli {
	/// Bayeux server endpoint, e.g. http://localhost:8080/cometd
	#[arg(long)]
	pub url: String,

	/// Client log level (warn, info, debug)
	#[arg(long, global = true, default_value = "info")]
	pub log_level: LogLevel,

	/// Increase verbosity (-v debug, -vv trace); overrides --log-level
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// Try the WebSocket transport before the HTTP ones
	#[arg(long, global = true)]
	pub websocket: bool,

	/// Extra request header as NAME=VALUE (repeatable)
	#[arg(long = "header", global = true, value_name = "NAME=VALUE", value_parser = parse_header)]
	pub headers: Vec<(String, String)>,

	#[command(subcommand)]
	pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
	/// Subscribe to channels and print each message as one JSON line
	Listen {
		#[arg(required = true)]
		channels: Vec<String>,
		/// Disconnect after this many messages
		#[arg(short = 'n', long)]
		count: Option<usize>,
	},

	/// Publish one message and wait for the server's acknowledgement
	#[command(alias = "pub")]
	Publish {
		channel: String,
		/// Message data as JSON
		data: String,
		/// Time to wait for the acknowledgement (ms)
		#[arg(long, default_value = "10000")]
		timeout_ms: u64,
	},
}

fn parse_header(value: &str) -> Result<(String, String), String> {
	let Some((name, header)) = value.split_once('=') else {
		return Err(format!("expected NAME=VALUE, got '{value}'"));
	};
	if name.trim().is_empty() {
		return Err("header name is empty".to_string());
	}
	Ok((name.trim().to_string(), header.to_string()))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_listen_with_globals_after_the_subcommand() {
		let cli = Cli::try_parse_from([
			"bayeux",
			"--url",
			"http://localhost:8080/cometd",
			"listen",
			"/chat/demo",
			"/chat/other",
			"-n",
			"3",
			"-v",
			"--header",
			"X-Token=abc=def",
		])
		.unwrap();
		assert_eq!(cli.url, "http://localhost:8080/cometd");
		assert_eq!(cli.verbose, 1);
		assert_eq!(cli.headers, vec![("X-Token".to_string(), "abc=def".to_string())]);
		match cli.command {
			Commands::Listen { channels, count } => {
				assert_eq!(channels, vec!["/chat/demo", "/chat/other"]);
				assert_eq!(count, Some(3));
			}
			other => panic!("unexpected command {other:?}"),
		}
	}

	#[test]
	fn parses_publish_and_log_level() {
		let cli = Cli::try_parse_from(["bayeux", "--url", "http://h/cometd", "--log-level", "debug", "pub", "/chat", r#"{"a":1}"#]).unwrap();
		assert_eq!(cli.log_level, LogLevel::Debug);
		match cli.command {
			Commands::Publish { channel, data, timeout_ms } => {
				assert_eq!(channel, "/chat");
				assert_eq!(data, r#"{"a":1}"#);
				assert_eq!(timeout_ms, 10_000);
			}
			other => panic!("unexpected command {other:?}"),
		}
	}

	#[test]
	fn rejects_bad_input() {
		assert!(Cli::try_parse_from(["bayeux", "listen", "/chat"]).is_err());
		assert!(Cli::try_parse_from(["bayeux", "--url", "http://h", "listen"]).is_err());
		assert!(Cli::try_parse_from(["bayeux", "--url", "http://h", "--log-level", "loud", "listen", "/c"]).is_err());
		assert!(Cli::try_parse_from(["bayeux", "--url", "http://h", "--header", "novalue", "listen", "/c"]).is_err());
	}
}
