//! Arguments

// Imports
use std::path::PathBuf;

/// Arguments
#[derive(Debug)]
#[derive(clap::Parser)]
pub struct Args {
	/// Log file
	///
	/// Specifies a file to perform verbose logging to.
	/// You can use `RUST_LOG_FILE` to set filtering options
	#[clap(long = "log-file")]
	pub log_file: Option<PathBuf>,

	/// Whether to append to the log file
	#[clap(long = "log-file-append")]
	pub log_file_append: bool,

	/// Sub-command
	#[command(subcommand)]
	pub sub_cmd: SubCmd,
}

/// Sub-command
#[derive(Debug, clap::Subcommand)]
pub enum SubCmd {
	#[clap(name = "ecm")]
	Ecm(Ecm),
}

/// Creates the ECM plot of a full model result
#[derive(Debug, clap::Args)]
pub struct Ecm {
	/// Input, as written by `ecmsim --output`
	pub input_file: PathBuf,

	/// Output
	#[clap(flatten)]
	pub output: Output,
}

/// Output
#[derive(Debug, clap::Args)]
pub struct Output {
	/// Output file, either `.png` or `.svg`
	#[clap(short = 'o', long = "output")]
	pub file: PathBuf,

	/// Output file width
	#[clap(long = "output-width", default_value_t = 640)]
	pub width: u32,

	/// Output file height
	#[clap(long = "output-height", default_value_t = 480)]
	pub height: u32,
}
