//! Errors

// Imports
use std::{io, path::PathBuf};

/// Result alias for ECM analyses
pub type Result<T> = std::result::Result<T, EcmError>;

/// ECM analysis error.
///
/// All errors are fatal for the analyzed `(kernel, machine)` pair.
#[derive(Debug, thiserror::Error)]
pub enum EcmError {
	/// Kernel is unsuitable for the requested analysis
	#[error("Kernel is unsuitable for {analysis} analysis: {reason}")]
	Configuration { analysis: &'static str, reason: String },

	/// Machine description is inconsistent or lacks data
	#[error("Machine description error: {reason}")]
	Machine { reason: String },

	/// External tool isn't resolvable
	#[error("`{program}` was not found, make sure it is in PATH")]
	ToolMissing { program: String },

	/// External tool failed to launch or exited unsuccessfully
	#[error("`{command}` failed: {reason}")]
	ToolFailure { command: String, reason: String },

	/// Expected pattern was absent from a tool's output
	#[error("Could not find {what} in {tool} output:\n{output}")]
	Parse {
		what:   &'static str,
		tool:   String,
		output: String,
	},

	/// Instrumented block has a zero byte size
	#[error("Block size is zero (pointer increment {pointer_increment}, element size {element_size})")]
	ZeroBlockSize { pointer_increment: i64, element_size: u64 },

	/// Kernel address generation failed
	#[error("Unable to generate kernel accesses")]
	Kernel(#[source] anyhow::Error),

	/// Filesystem error
	#[error("Unable to access {path:?}")]
	Io {
		path:   PathBuf,
		#[source]
		source: io::Error,
	},
}

impl EcmError {
	/// Creates a parse error for tool `tool`'s output `output`
	pub fn parse(what: &'static str, tool: impl Into<String>, output: impl Into<String>) -> Self {
		Self::Parse {
			what,
			tool: tool.into(),
			output: output.into(),
		}
	}

	/// Creates a machine description error
	pub fn machine(reason: impl Into<String>) -> Self {
		Self::Machine { reason: reason.into() }
	}
}
