//! Performance units

// Imports
use {
	crate::{kernel::Kernel, machine::MachineModel},
	std::fmt,
};

/// Performance unit
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
#[derive(clap::ValueEnum)]
#[derive(serde::Serialize, serde::Deserialize)]
pub enum Unit {
	/// Cycles per cacheline
	#[value(name = "cy/CL")]
	#[serde(rename = "cy/CL")]
	CyclesPerCacheline,

	/// Cycles per iteration.
	///
	/// Cycles per cacheline divided by the elements per cacheline, so one
	/// cacheline of `n` elements at `c cy/CL` runs at `c / n cy/It`.
	#[value(name = "cy/It")]
	#[serde(rename = "cy/It")]
	CyclesPerIteration,

	/// Iterations per second
	#[value(name = "It/s")]
	#[serde(rename = "It/s")]
	IterationsPerSecond,

	/// Floating point operations per second
	#[value(name = "FLOP/s")]
	#[serde(rename = "FLOP/s")]
	FlopsPerSecond,
}

/// Everything needed to convert between units
#[derive(PartialEq, Clone, Copy, Debug)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct UnitContext {
	/// Clock (Hz)
	pub clock: f64,

	/// Kernel elements per cacheline
	pub elements_per_cacheline: u64,

	/// Floating point operations per iteration
	pub flops_per_iteration: u64,
}

impl UnitContext {
	/// Creates the unit context of `kernel` running on `machine`
	pub fn new<K: Kernel>(kernel: &K, machine: &MachineModel) -> Self {
		Self {
			clock:                  machine.clock,
			elements_per_cacheline: machine.elements_per_cacheline(kernel.element_size()),
			flops_per_iteration:    kernel.flops_per_iteration(),
		}
	}
}

impl Unit {
	/// Returns this unit's symbol
	pub fn symbol(self) -> &'static str {
		match self {
			Self::CyclesPerCacheline => "cy/CL",
			Self::CyclesPerIteration => "cy/It",
			Self::IterationsPerSecond => "It/s",
			Self::FlopsPerSecond => "FLOP/s",
		}
	}

	/// Converts `cycles` per cacheline to this unit
	pub fn from_cycles_per_cacheline(self, cycles: f64, ctx: &UnitContext) -> f64 {
		let elements_per_cacheline = ctx.elements_per_cacheline as f64;
		match self {
			Self::CyclesPerCacheline => cycles,
			Self::CyclesPerIteration => cycles / elements_per_cacheline,
			Self::IterationsPerSecond => ctx.clock / cycles * elements_per_cacheline,
			Self::FlopsPerSecond => ctx.clock / cycles * elements_per_cacheline * ctx.flops_per_iteration as f64,
		}
	}

	/// Converts `value` in this unit to cycles per cacheline
	pub fn to_cycles_per_cacheline(self, value: f64, ctx: &UnitContext) -> f64 {
		let elements_per_cacheline = ctx.elements_per_cacheline as f64;
		match self {
			Self::CyclesPerCacheline => value,
			Self::CyclesPerIteration => value * elements_per_cacheline,
			Self::IterationsPerSecond => ctx.clock * elements_per_cacheline / value,
			Self::FlopsPerSecond => ctx.clock * elements_per_cacheline * ctx.flops_per_iteration as f64 / value,
		}
	}

	/// Returns `cycles` per cacheline in this unit, displayable with an SI prefix
	pub fn convert(self, cycles: f64, ctx: &UnitContext) -> PrefixedValue {
		PrefixedValue {
			value: self.from_cycles_per_cacheline(cycles, ctx),
			unit:  self,
		}
	}
}

impl fmt::Display for Unit {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.symbol())
	}
}

/// Value in a unit, displayed with an SI prefix
#[derive(PartialEq, Clone, Copy, Debug)]
pub struct PrefixedValue {
	pub value: f64,
	pub unit:  Unit,
}

impl fmt::Display for PrefixedValue {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		const PREFIXES: [&str; 5] = ["", "k", "M", "G", "T"];

		let mut value = self.value;
		let mut prefix_idx = 0;
		while value.abs() >= 1000.0 && prefix_idx < PREFIXES.len() - 1 {
			value /= 1000.0;
			prefix_idx += 1;
		}

		write!(f, "{value:.2} {}{}", PREFIXES[prefix_idx], self.unit)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const CTX: UnitContext = UnitContext {
		clock:                  2.0e9,
		elements_per_cacheline: 8,
		flops_per_iteration:    2,
	};

	#[test]
	fn from_cycles_per_cacheline() {
		assert_eq!(Unit::CyclesPerCacheline.from_cycles_per_cacheline(16.0, &CTX), 16.0);
		assert_eq!(Unit::CyclesPerIteration.from_cycles_per_cacheline(16.0, &CTX), 2.0);
		assert_eq!(Unit::IterationsPerSecond.from_cycles_per_cacheline(16.0, &CTX), 1.0e9);
		assert_eq!(Unit::FlopsPerSecond.from_cycles_per_cacheline(16.0, &CTX), 2.0e9);
	}

	#[test]
	fn to_cycles_per_cacheline() {
		for unit in [
			Unit::CyclesPerCacheline,
			Unit::CyclesPerIteration,
			Unit::IterationsPerSecond,
			Unit::FlopsPerSecond,
		] {
			let value = unit.from_cycles_per_cacheline(16.0, &CTX);
			assert_eq!(unit.to_cycles_per_cacheline(value, &CTX), 16.0, "Unit {unit}");
		}
	}

	#[test]
	fn prefixed_display() {
		assert_eq!(Unit::FlopsPerSecond.convert(16.0, &CTX).to_string(), "2.00 GFLOP/s");
		assert_eq!(Unit::IterationsPerSecond.convert(32.0e6, &CTX).to_string(), "500.00 It/s");
		assert_eq!(Unit::CyclesPerCacheline.convert(47.5, &CTX).to_string(), "47.50 cy/CL");
		assert_eq!(Unit::IterationsPerSecond.convert(1.0e-6, &CTX).to_string(), "16000.00 TIt/s");
	}

	#[test]
	fn parse_unit() {
		use clap::ValueEnum;

		assert_eq!(Unit::from_str("cy/It", false), Ok(Unit::CyclesPerIteration));
		assert_eq!(Unit::from_str("FLOP/s", false), Ok(Unit::FlopsPerSecond));
		assert!(Unit::from_str("flops", false).is_err());
	}
}
