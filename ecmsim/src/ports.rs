//! Port pressure estimation
//!
//! Compiles one kernel iteration, runs the instruction timing analyzer on it
//! in throughput and latency modes, and normalizes the results to a cacheline.

// Modules
pub mod analyzer;

// Imports
use {
	self::analyzer::ThroughputAnalysis,
	crate::{
		error::{EcmError, Result},
		kernel::{AsmBlock, Kernel},
		machine::MachineModel,
		tool::CommandExt,
	},
	std::{collections::BTreeMap, env},
};

/// Port pressure options
#[derive(Clone, Copy, Default, Debug)]
pub struct PortPressureOptions {
	/// Instrumented block to analyze
	pub asm_block: AsmBlock,

	/// Pointer increment override for the instrumented block
	pub pointer_increment: Option<i64>,

	/// Whether to use the latency instead of the throughput for `T_OL`
	pub latency: bool,
}

/// Port pressure estimator
#[derive(Clone, Copy, Default, Debug)]
pub struct PortPressureEstimator {
	options: PortPressureOptions,
}

impl PortPressureEstimator {
	/// Creates a new estimator
	pub fn new(options: PortPressureOptions) -> Self {
		Self { options }
	}

	/// Measures the port pressure of `kernel` on `machine`
	pub fn measure<K: Kernel>(&self, kernel: &K, machine: &MachineModel) -> Result<PortPressureReport> {
		let code = kernel.code().ok_or_else(|| EcmError::Configuration {
			analysis: "port pressure",
			reason:   format!("Kernel {:?} was not derived from code", kernel.name()),
		})?;

		let build_dir = tempfile::Builder::new()
			.prefix("ecmsim-")
			.tempdir()
			.map_err(|source| EcmError::Io {
				path: env::temp_dir(),
				source,
			})?;
		let block = code.compile(&machine.compiler, self.options.asm_block, build_dir.path())?;
		let pointer_increment = self.options.pointer_increment.unwrap_or(block.pointer_increment);
		tracing::debug!(binary = ?block.binary, pointer_increment, "Compiled instrumented block");

		let program = machine.analyzer.resolve()?;

		let arch = machine.micro_architecture.as_str();

		let mut cmd = machine.analyzer.command(&program);
		cmd.args(["-64", "-arch", arch]).arg(&block.binary);
		let throughput_tool = cmd.command_line();
		let throughput_output = cmd.checked_stdout()?;
		let throughput = analyzer::parse_throughput(&throughput_output, &throughput_tool)?;

		let mut cmd = machine.analyzer.command(&program);
		cmd.args(["-64", "-analysis", "LATENCY", "-arch", arch]).arg(&block.binary);
		let latency_output = cmd.checked_stdout()?;
		let block_latency = analyzer::parse_latency(&latency_output, &cmd.command_line())?;

		let block_size = block_size(pointer_increment, kernel.element_size())?;
		let mut report =
			PortPressureReport::from_block(machine, block_size, &throughput, block_latency, &throughput_tool)?;
		if self.options.latency {
			report.t_ol = report.cl_latency;
		}
		report.throughput_output = throughput_output;
		report.latency_output = latency_output;

		Ok(report)
	}
}

/// Returns the bytes processed by one execution of a block advancing its
/// pointers by `pointer_increment` bytes.
fn block_size(pointer_increment: i64, element_size: u64) -> Result<u64> {
	let zero_block_size = || EcmError::ZeroBlockSize {
		pointer_increment,
		element_size,
	};

	let element_size_signed = i64::try_from(element_size).map_err(|_| zero_block_size())?;
	if element_size_signed == 0 {
		return Err(zero_block_size());
	}

	match pointer_increment.div_euclid(element_size_signed).unsigned_abs() * element_size {
		0 => Err(zero_block_size()),
		block_size => Ok(block_size),
	}
}

/// Port pressure report.
///
/// All cycles are per cacheline.
#[derive(Clone, Debug)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct PortPressureReport {
	/// Cycles per port
	pub port_cycles: BTreeMap<String, f64>,

	/// Ports whose work overlaps with data transfers
	pub overlapping_ports: Vec<String>,

	/// Throughput reported by the analyzer
	pub cl_throughput: f64,

	/// Latency reported by the analyzer
	pub cl_latency: f64,

	/// Micro-ops
	pub uops: f64,

	/// Non-overlapping cycles
	pub t_nol: f64,

	/// Overlapping cycles
	pub t_ol: f64,

	/// Raw throughput analysis
	pub throughput_output: String,

	/// Raw latency analysis
	pub latency_output: String,
}

impl PortPressureReport {
	/// Builds a report from the analysis of a block processing `block_size` bytes.
	///
	/// The raw outputs are left empty.
	pub fn from_block(
		machine: &MachineModel,
		block_size: u64,
		throughput: &ThroughputAnalysis,
		block_latency: f64,
		tool: &str,
	) -> Result<Self> {
		let ratio = machine.cacheline_size as f64 / block_size as f64;
		let port_cycles = throughput
			.port_cycles
			.iter()
			.map(|(port, &cycles)| (port.clone(), cycles * ratio))
			.collect::<BTreeMap<_, _>>();
		let cl_throughput = throughput.block_throughput * ratio;
		let cl_latency = block_latency * ratio;

		let max_cycles = |ports: &[String], what| {
			ports
				.iter()
				.filter_map(|port| port_cycles.get(port))
				.copied()
				.reduce(f64::max)
				.ok_or_else(|| EcmError::parse(what, tool, format!("{:?}", throughput.port_cycles)))
		};
		let t_nol = max_cycles(&machine.non_overlapping_ports, "non-overlapping ports")?;
		let mut t_ol = max_cycles(&machine.overlapping_ports, "overlapping ports")?;
		if cl_throughput > t_nol {
			tracing::debug!(cl_throughput, t_ol, "Using analyzer throughput as overlapping cycles");
			t_ol = cl_throughput;
		}

		Ok(Self {
			port_cycles,
			overlapping_ports: machine.overlapping_ports.clone(),
			cl_throughput,
			cl_latency,
			uops: throughput.uops as f64 * ratio,
			t_nol,
			t_ol,
			throughput_output: String::new(),
			latency_output: String::new(),
		})
	}
}

#[cfg(test)]
mod tests {
	use {
		super::{analyzer::tests::*, *},
		crate::{
			kernel::{InstrumentedBlock, IterationAccesses, KernelCode},
			machine::{tests::machine, CompilerConfig},
			tool::ToolConfig,
		},
		std::{fs, path::Path},
	};

	/// Kernel whose code "compiles" to a fixed block
	struct FakeKernel {
		element_size:      u64,
		pointer_increment: i64,
		with_code:         bool,
	}

	impl Kernel for FakeKernel {
		fn name(&self) -> &str {
			"fake"
		}

		fn element_size(&self) -> u64 {
			self.element_size
		}

		fn iteration_length(&self) -> u64 {
			1024
		}

		fn inner_iteration_length(&self) -> u64 {
			1024
		}

		fn working_set_size(&self) -> u64 {
			1024 * self.element_size
		}

		fn flops_per_iteration(&self) -> u64 {
			2
		}

		fn accesses(&self, iteration: u64) -> anyhow::Result<IterationAccesses> {
			Ok(IterationAccesses {
				reads:  vec![iteration * self.element_size],
				writes: vec![],
			})
		}

		fn code(&self) -> Option<&dyn KernelCode> {
			self.with_code.then_some(self as &dyn KernelCode)
		}
	}

	impl KernelCode for FakeKernel {
		fn compile(&self, _compiler: &CompilerConfig, _block: AsmBlock, build_dir: &Path) -> Result<InstrumentedBlock> {
			let binary = build_dir.join("kernel.o");
			fs::write(&binary, "").map_err(|source| EcmError::Io {
				path: binary.clone(),
				source,
			})?;

			Ok(InstrumentedBlock {
				binary,
				pointer_increment: self.pointer_increment,
			})
		}
	}

	/// Writes a fake analyzer script into `dir`, printing the canned reports
	fn fake_analyzer(dir: &Path, throughput: &str, latency: &str) -> ToolConfig {
		let script = dir.join("analyzer.sh");
		let contents = [
			"for arg in \"$@\"; do",
			"if [ \"$arg\" = LATENCY ]; then",
			format!("cat <<'EOT'\n{latency}EOT").as_str(),
			"exit 0",
			"fi",
			"done",
			format!("cat <<'EOT'\n{throughput}EOT").as_str(),
			"",
		]
		.join("\n");
		fs::write(&script, contents).expect("Unable to write analyzer");

		ToolConfig {
			program:     "sh".to_owned(),
			prefix_args: vec![script.to_str().expect("Non utf-8 temporary path").to_owned()],
		}
	}

	fn kernel(pointer_increment: i64) -> FakeKernel {
		FakeKernel {
			element_size: 8,
			pointer_increment,
			with_code: true,
		}
	}

	#[test]
	fn measure() {
		let dir = tempfile::tempdir().expect("Unable to create temporary directory");
		let mut machine = machine();
		machine.analyzer = fake_analyzer(dir.path(), THROUGHPUT_OUTPUT, LATENCY_OUTPUT);

		// Note: 32 bytes per block, so everything is doubled to reach a cacheline
		let report = PortPressureEstimator::default()
			.measure(&kernel(32), &machine)
			.expect("Unable to measure");
		assert_eq!(report.port_cycles["2D"], 6.0);
		assert_eq!(report.port_cycles["0DV"], 0.0);
		assert_eq!(report.cl_throughput, 8.0);
		assert_eq!(report.cl_latency, 32.0);
		assert_eq!(report.uops, 28.0);
		assert_eq!(report.t_nol, 6.0);

		// Note: The throughput (8) exceeds `T_nOL`, so it replaces the port maximum (4)
		assert_eq!(report.t_ol, 8.0);
		assert_eq!(report.throughput_output, THROUGHPUT_OUTPUT);
		assert_eq!(report.latency_output, LATENCY_OUTPUT);
	}

	#[test]
	fn measure_latency() {
		let dir = tempfile::tempdir().expect("Unable to create temporary directory");
		let mut machine = machine();
		machine.analyzer = fake_analyzer(dir.path(), THROUGHPUT_OUTPUT, LATENCY_OUTPUT);

		let estimator = PortPressureEstimator::new(PortPressureOptions {
			latency: true,
			..PortPressureOptions::default()
		});
		let report = estimator.measure(&kernel(-64), &machine).expect("Unable to measure");
		assert_eq!(report.cl_latency, 16.0);
		assert_eq!(report.t_ol, 16.0);
	}

	#[test]
	fn port_maximum_kept_below_non_overlapping() {
		let throughput = ThroughputAnalysis {
			block_throughput: 2.0,
			port_cycles:      [("0", 4.0), ("1", 1.0), ("2D", 3.0), ("4", 1.0)]
				.into_iter()
				.map(|(port, cycles)| (port.to_owned(), cycles))
				.collect(),
			uops:             6,
		};

		let report =
			PortPressureReport::from_block(&machine(), 64, &throughput, 5.0, "iaca.sh").expect("Unable to build");
		assert_eq!(report.t_nol, 3.0);
		assert_eq!(report.t_ol, 4.0);
		assert_eq!(report.cl_latency, 5.0);
	}

	#[test]
	fn zero_block_size() {
		let dir = tempfile::tempdir().expect("Unable to create temporary directory");
		let mut machine = machine();
		machine.analyzer = fake_analyzer(dir.path(), THROUGHPUT_OUTPUT, LATENCY_OUTPUT);

		let err = PortPressureEstimator::default()
			.measure(&kernel(4), &machine)
			.expect_err("Block size should be zero");
		assert!(matches!(err, EcmError::ZeroBlockSize {
			pointer_increment: 4,
			element_size:      8,
		}));
	}

	#[test]
	fn kernel_without_code() {
		let kernel = FakeKernel {
			with_code: false,
			..kernel(32)
		};
		let err = PortPressureEstimator::default()
			.measure(&kernel, &machine())
			.expect_err("Kernel has no code");
		assert!(matches!(err, EcmError::Configuration { .. }));
	}

	#[test]
	fn missing_analyzer() {
		let mut machine = machine();
		machine.analyzer = ToolConfig::new("ecmsim-surely-missing-analyzer");

		let err = PortPressureEstimator::default()
			.measure(&kernel(32), &machine)
			.expect_err("Analyzer is missing");
		assert!(matches!(err, EcmError::ToolMissing { .. }));
	}

	#[test]
	fn analyzer_missing_throughput() {
		let dir = tempfile::tempdir().expect("Unable to create temporary directory");
		let mut machine = machine();
		let output = THROUGHPUT_OUTPUT.replace("Block Throughput", "Block Thruput");
		machine.analyzer = fake_analyzer(dir.path(), &output, LATENCY_OUTPUT);

		let err = PortPressureEstimator::default()
			.measure(&kernel(32), &machine)
			.expect_err("Output is missing the throughput");
		assert!(matches!(err, EcmError::Parse {
			what: "Block Throughput",
			..
		}));
	}

	#[test]
	fn analyzer_failure() {
		let dir = tempfile::tempdir().expect("Unable to create temporary directory");
		let script = dir.path().join("analyzer.sh");
		fs::write(&script, "echo 'unknown arch' >&2\nexit 1\n").expect("Unable to write analyzer");

		let mut machine = machine();
		machine.analyzer = ToolConfig {
			program:     "sh".to_owned(),
			prefix_args: vec![script.to_str().expect("Non utf-8 temporary path").to_owned()],
		};

		let err = PortPressureEstimator::default()
			.measure(&kernel(32), &machine)
			.expect_err("Analyzer should fail");
		assert!(matches!(err, EcmError::ToolFailure { ref reason, .. } if reason.contains("unknown arch")));
	}
}
