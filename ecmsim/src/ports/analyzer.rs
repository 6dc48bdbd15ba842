//! Analyzer output parsing
//!
//! The instruction timing analyzer only reports in text, so everything we
//! need is scraped from it here. Any missing piece is an error.

// Imports
use {
	crate::error::{EcmError, Result},
	regex::Regex,
	std::{collections::BTreeMap, sync::LazyLock},
};

/// Block throughput line
static BLOCK_THROUGHPUT: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"(?m)^Block Throughput: ([0-9.]+) Cycles").expect("Invalid regex"));

/// Total uops line
static TOTAL_UOPS: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"(?m)^Total Num Of Uops: ([0-9]+)").expect("Invalid regex"));

/// Latency line
static LATENCY: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"(?m)^Latency: ([0-9.]+) Cycles").expect("Invalid regex"));

/// Throughput analysis of a block
#[derive(PartialEq, Clone, Debug)]
pub struct ThroughputAnalysis {
	/// Cycles per block execution
	pub block_throughput: f64,

	/// Cycles per block execution, per port
	pub port_cycles: BTreeMap<String, f64>,

	/// Micro-ops per block execution
	pub uops: u64,
}

/// Parses the throughput report `output` of `tool`
pub fn parse_throughput(output: &str, tool: &str) -> Result<ThroughputAnalysis> {
	let block_throughput = capture(&BLOCK_THROUGHPUT, output, "Block Throughput", tool)?;
	let port_cycles = parse_port_table(output, tool)?;
	let uops = capture(&TOTAL_UOPS, output, "Total Num Of Uops", tool)?;

	Ok(ThroughputAnalysis {
		block_throughput,
		port_cycles,
		uops,
	})
}

/// Parses the latency report `output` of `tool`, returning the cycles per block execution
pub fn parse_latency(output: &str, tool: &str) -> Result<f64> {
	capture(&LATENCY, output, "Latency", tool)
}

/// Parses the first capture group of `regex` in `output`
fn capture<T: std::str::FromStr>(regex: &Regex, output: &str, what: &'static str, tool: &str) -> Result<T> {
	regex
		.captures(output)
		.and_then(|captures| captures.get(1))
		.and_then(|value| value.as_str().parse().ok())
		.ok_or_else(|| EcmError::parse(what, tool, output))
}

/// Parses the port table, made of a `Port` row and a `Cycles` row.
///
/// A port cell with two ports joined by `-` holds two cycle values: the first
/// port gets the first, and both ports' names concatenated get the second.
fn parse_port_table(output: &str, tool: &str) -> Result<BTreeMap<String, f64>> {
	let row = |header: &str| {
		output.lines().find_map(|line| {
			let mut cells = line.split('|').map(str::trim);
			match (cells.next(), cells.next()) {
				(Some(""), Some(cell)) if cell == header => Some(cells.collect::<Vec<_>>()),
				_ => None,
			}
		})
	};
	let (Some(ports), Some(cycles)) = (row("Port"), row("Cycles")) else {
		return Err(EcmError::parse("Port and Cycles rows", tool, output));
	};

	let parse_cycles = |cycles: &str| {
		cycles
			.parse::<f64>()
			.map_err(|_| EcmError::parse("valid port cycles", tool, output))
	};

	let mut port_cycles = BTreeMap::new();
	for (&port, &cycles) in ports.iter().zip(&cycles) {
		match (port.split_once('-'), cycles.split_whitespace().collect::<Vec<_>>().as_slice()) {
			(Some((first_port, second_port)), &[first_cycles, second_cycles]) => {
				let first_port = first_port.trim();
				let second_port = second_port.trim();
				port_cycles.insert(first_port.to_owned(), parse_cycles(first_cycles)?);
				port_cycles.insert(format!("{first_port}{second_port}"), parse_cycles(second_cycles)?);
			},
			_ if !port.is_empty() && !cycles.is_empty() => {
				port_cycles.insert(port.to_owned(), parse_cycles(cycles)?);
			},
			_ => (),
		}
	}

	Ok(port_cycles)
}

#[cfg(test)]
pub(crate) mod tests {
	use super::*;

	/// Throughput report, as emitted for a triad-like block
	pub const THROUGHPUT_OUTPUT: &str = "\
Intel(R) Architecture Code Analyzer Version - 2.1
Analyzed File - kernel.o
Binary Format - 64Bit
Architecture  - HSW
Analysis Type - Throughput

Throughput Analysis Report
--------------------------
Block Throughput: 4.00 Cycles       Throughput Bottleneck: Port2_AGU, Port3_AGU

Port Binding In Cycles Per Iteration:
---------------------------------------------------------------------------------------
|  Port  |  0   -  DV  |  1   |  2   -  D   |  3   -  D   |  4   |  5   |  6   |  7   |
---------------------------------------------------------------------------------------
| Cycles | 2.0    0.0  | 2.0  | 4.0    3.0  | 4.0    3.0  | 2.0  | 1.0  | 1.0  | 0.0  |
---------------------------------------------------------------------------------------

Total Num Of Uops: 14
";

	/// Latency report for the same block
	pub const LATENCY_OUTPUT: &str = "\
Intel(R) Architecture Code Analyzer Version - 2.1
Analysis Type - Latency

Latency Analysis Report
---------------------------
Latency: 16.00 Cycles
";

	#[test]
	fn throughput_report() {
		let analysis = parse_throughput(THROUGHPUT_OUTPUT, "iaca.sh").expect("Unable to parse");
		assert_eq!(analysis.block_throughput, 4.0);
		assert_eq!(analysis.uops, 14);

		let expected = [
			("0", 2.0),
			("0DV", 0.0),
			("1", 2.0),
			("2", 4.0),
			("2D", 3.0),
			("3", 4.0),
			("3D", 3.0),
			("4", 2.0),
			("5", 1.0),
			("6", 1.0),
			("7", 0.0),
		]
		.into_iter()
		.map(|(port, cycles)| (port.to_owned(), cycles))
		.collect::<BTreeMap<_, _>>();
		assert_eq!(analysis.port_cycles, expected);
	}

	#[test]
	fn port_pair_split() {
		let output = "\
Block Throughput: 1.00 Cycles
|  Port  |  1-5  |
| Cycles | 2.0 3.0 |
Total Num Of Uops: 2
";
		let analysis = parse_throughput(output, "iaca.sh").expect("Unable to parse");
		assert_eq!(analysis.port_cycles.len(), 2);
		assert_eq!(analysis.port_cycles["1"], 2.0);
		assert_eq!(analysis.port_cycles["15"], 3.0);
	}

	#[test]
	fn missing_block_throughput() {
		let output = THROUGHPUT_OUTPUT.replace("Block Throughput: 4.00 Cycles", "");
		let err = parse_throughput(&output, "iaca.sh").expect_err("Should fail to parse");
		assert!(
			matches!(err, EcmError::Parse { what: "Block Throughput", ref tool, .. } if tool == "iaca.sh"),
			"Unexpected error: {err:?}"
		);
	}

	#[test]
	fn missing_port_table() {
		let output = THROUGHPUT_OUTPUT.replace("| Cycles |", "| Cyc |");
		let err = parse_throughput(&output, "iaca.sh").expect_err("Should fail to parse");
		assert!(matches!(err, EcmError::Parse {
			what: "Port and Cycles rows",
			..
		}));
	}

	#[test]
	fn missing_uops() {
		let output = THROUGHPUT_OUTPUT.replace("Total Num Of Uops", "Total Uops");
		let err = parse_throughput(&output, "iaca.sh").expect_err("Should fail to parse");
		assert!(matches!(err, EcmError::Parse {
			what: "Total Num Of Uops",
			..
		}));
	}

	#[test]
	fn invalid_port_cycles() {
		let output = THROUGHPUT_OUTPUT.replace("| 1.0  | 1.0  |", "| 1.0  | x.y  |");
		let err = parse_throughput(&output, "iaca.sh").expect_err("Should fail to parse");
		assert!(matches!(err, EcmError::Parse { what: "valid port cycles", .. }));
	}

	#[test]
	fn latency_report() {
		assert_eq!(parse_latency(LATENCY_OUTPUT, "iaca.sh").expect("Unable to parse"), 16.0);

		let err = parse_latency(THROUGHPUT_OUTPUT, "iaca.sh").expect_err("Should fail to parse");
		assert!(matches!(err, EcmError::Parse { what: "Latency", .. }));
	}
}
