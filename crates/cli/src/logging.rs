use bayeux::LogLevel;
use tracing_subscriber::EnvFilter;

/// Installs the stderr subscriber. `RUST_LOG` wins over the flags.
pub fn init_logging(level: LogLevel, verbose: u8) {
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives(level, verbose)));
	let _ = tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_writer(std::io::stderr)
		.try_init();
}

fn directives(level: LogLevel, verbose: u8) -> String {
	let client = match verbose {
		0 => level.directive(),
		1 => LogLevel::Debug.directive(),
		_ => "bayeux=trace",
	};
	format!("warn,{client}")
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn verbosity_overrides_the_level() {
		assert_eq!(directives(LogLevel::Warn, 0), "warn,bayeux=warn");
		assert_eq!(directives(LogLevel::Info, 0), "warn,bayeux=info");
		assert_eq!(directives(LogLevel::Warn, 1), "warn,bayeux=debug");
		assert_eq!(directives(LogLevel::Info, 3), "warn,bayeux=trace");
	}
}
