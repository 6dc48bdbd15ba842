//! Logger
//!
//! Logs to stderr, filtered by `RUST_LOG` (defaults to `info`), and
//! optionally to a file, filtered by `RUST_LOG_FILE` (defaults to `debug`).

// Imports
use {
	std::{fs, path::Path, sync::Mutex},
	tracing_subscriber::{prelude::*, EnvFilter},
};

/// Initializes the global logger.
///
/// Any messages registered through [`pre_init`] are emitted right after.
pub fn init(log_file: Option<&Path>, log_file_append: bool) {
	let term_layer = tracing_subscriber::fmt::layer()
		.with_writer(std::io::stderr)
		.with_filter(env_filter("RUST_LOG", "info"));

	// Note: We don't fail if the log file can't be opened, logging to stderr is still useful.
	let mut log_file_err = None;
	let file_layer = log_file.and_then(|path| {
		let file = fs::OpenOptions::new()
			.create(true)
			.write(true)
			.append(log_file_append)
			.truncate(!log_file_append)
			.open(path);

		match file {
			Ok(file) => Some(
				tracing_subscriber::fmt::layer()
					.with_ansi(false)
					.with_writer(Mutex::new(file))
					.with_filter(env_filter("RUST_LOG_FILE", "debug")),
			),
			Err(err) => {
				log_file_err = Some((path.to_path_buf(), err));
				None
			},
		}
	});

	tracing_subscriber::registry().with(term_layer).with(file_layer).init();

	if let Some((path, err)) = log_file_err {
		tracing::warn!(?path, ?err, "Unable to open log file");
	}

	pre_init::flush();
}

/// Creates an env filter from variable `var`, falling back to `default`
fn env_filter(var: &str, default: &str) -> EnvFilter {
	EnvFilter::try_from_env(var).unwrap_or_else(|_| EnvFilter::new(default))
}

/// Logging before the logger is initialized.
///
/// Messages are buffered and emitted once [`init`](super::init) is called.
pub mod pre_init {
	// Imports
	use std::sync::Mutex;

	/// Buffered messages
	static MESSAGES: Mutex<Vec<String>> = Mutex::new(Vec::new());

	/// Registers a debug message
	pub fn debug(msg: impl Into<String>) {
		// Note: A poisoned buffer only ever contains complete messages, so we keep using it.
		let mut messages = MESSAGES.lock().unwrap_or_else(|err| err.into_inner());
		messages.push(msg.into());
	}

	/// Emits all buffered messages
	pub(super) fn flush() {
		let messages = std::mem::take(&mut *MESSAGES.lock().unwrap_or_else(|err| err.into_inner()));
		for msg in messages {
			tracing::debug!("{msg}");
		}
	}

}
