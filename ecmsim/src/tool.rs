//! External tool invocation

// Imports
use {
	crate::error::{EcmError, Result},
	itertools::Itertools,
	std::{
		env,
		ffi::OsStr,
		path::{Path, PathBuf},
		process,
	},
};

/// External tool
#[derive(Clone, Debug)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct ToolConfig {
	/// Program, either a path or a name resolved through `PATH`
	pub program: String,

	/// Arguments passed before any analysis-specific ones
	#[serde(default)]
	pub prefix_args: Vec<String>,
}

impl ToolConfig {
	/// Creates a tool config for `program`
	pub fn new(program: impl Into<String>) -> Self {
		Self {
			program:     program.into(),
			prefix_args: vec![],
		}
	}

	/// Resolves this tool's program.
	///
	/// # Errors
	/// Returns [`EcmError::ToolMissing`] if the program can't be found
	pub fn resolve(&self) -> Result<PathBuf> {
		find_executable(&self.program).ok_or_else(|| EcmError::ToolMissing {
			program: self.program.clone(),
		})
	}

	/// Creates a command for this tool, with the prefix arguments already applied
	pub fn command(&self, program: &Path) -> process::Command {
		let mut cmd = process::Command::new(program);
		cmd.args(&self.prefix_args);
		cmd
	}
}

/// Finds an executable.
///
/// Programs containing a path separator are checked directly, others are
/// searched for in every `PATH` entry.
pub fn find_executable(program: &str) -> Option<PathBuf> {
	let program_path = Path::new(program);
	if program_path.components().count() > 1 {
		return program_path.is_file().then(|| program_path.to_path_buf());
	}

	let paths = env::var_os("PATH")?;
	env::split_paths(&paths)
		.map(|dir| dir.join(program))
		.find(|path| path.is_file())
}

/// Extension trait for running commands to completion
#[extend::ext(name = CommandExt)]
pub impl process::Command {
	/// Returns this command formatted as a shell-like command line
	fn command_line(&self) -> String {
		std::iter::once(self.get_program())
			.chain(self.get_args())
			.map(OsStr::to_string_lossy)
			.join(" ")
	}

	/// Runs this command, returning it's stdout.
	///
	/// # Errors
	/// Returns [`EcmError::ToolFailure`] if unable to launch the command, if
	/// it exits unsuccessfully or if it's output isn't utf-8.
	fn checked_stdout(&mut self) -> Result<String> {
		let command = self.command_line();
		tracing::debug!(%command, "Running command");

		let output = self.output().map_err(|err| EcmError::ToolFailure {
			command: command.clone(),
			reason:  format!("Unable to launch: {err}"),
		})?;

		if !output.status.success() {
			return Err(EcmError::ToolFailure {
				command,
				reason: format!(
					"Exited with {}:\n{}",
					output.status,
					String::from_utf8_lossy(&output.stderr)
				),
			});
		}

		String::from_utf8(output.stdout).map_err(|err| EcmError::ToolFailure {
			command,
			reason: format!("Output wasn't utf-8: {err}"),
		})
	}
}
