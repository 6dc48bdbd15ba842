//! Arguments

// Imports
use {
	ecmsim::{kernel::AsmBlock, Unit},
	std::path::PathBuf,
};

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
	/// Full Execution-Cache-Memory model
	#[clap(name = "ecm")]
	Ecm(Analysis),

	/// Data transfers only
	#[clap(name = "ecm-data")]
	EcmData(Analysis),

	/// In-core execution only
	#[clap(name = "ecm-cpu")]
	EcmCpu(Analysis),
}

/// Analysis
#[derive(Debug, clap::Args)]
pub struct Analysis {
	/// Machine description file
	#[clap(long = "machine")]
	pub machine_file: PathBuf,

	/// Kernel description file
	#[clap(long = "kernel")]
	pub kernel_file: PathBuf,

	/// Unit to additionally report the prediction in
	#[clap(long = "unit")]
	pub unit: Option<Unit>,

	/// Use the latency instead of the throughput for overlapping cycles
	#[clap(long = "latency")]
	pub latency: bool,

	/// Instrumented block, `auto` or it's index
	#[clap(long = "asm-block", default_value = "auto")]
	pub asm_block: AsmBlock,

	/// Pointer increment of the instrumented block, in bytes
	#[clap(long = "asm-increment", allow_hyphen_values = true)]
	pub asm_increment: Option<i64>,

	/// Output file
	#[clap(long = "output")]
	pub output_file: Option<PathBuf>,

	/// Verbosity
	#[clap(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
	pub verbose: u8,
}
