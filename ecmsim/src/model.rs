//! Model combination
//!
//! Merges the port pressure and the cache traffic of a kernel into the
//! ECM prediction.

// Imports
use {
	crate::{
		error::{EcmError, Result},
		ports::PortPressureReport,
		traffic::CacheTrafficReport,
	},
	std::fmt,
};

/// Combined ECM result
#[derive(Clone, Debug)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct CombinedResult {
	/// Port pressure
	pub cpu: PortPressureReport,

	/// Cache traffic
	pub data: CacheTrafficReport,

	/// Cycle ladder, `T_nOL` followed by every boundary, fastest first
	pub ladder: Vec<(String, f64)>,

	/// Single core cycles per cacheline
	pub total_cycles: f64,

	/// Cores at which the memory boundary saturates
	pub scaling_cores: ScalingCores,
}

/// Cores at which the memory boundary saturates
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
#[derive(serde::Serialize, serde::Deserialize)]
pub enum ScalingCores {
	/// Saturates at this many cores
	Cores(u32),

	/// Never saturates, the working set doesn't reach main memory
	Unbounded,
}

impl fmt::Display for ScalingCores {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Cores(cores) => write!(f, "{cores}"),
			Self::Unbounded => write!(f, "unbounded"),
		}
	}
}

/// Combines the port pressure `cpu` and the costed cache traffic `data`
pub fn combine(cpu: &PortPressureReport, data: &CacheTrafficReport) -> Result<CombinedResult> {
	let boundary_cycles = data.cycles().ok_or_else(|| EcmError::Configuration {
		analysis: "ECM",
		reason:   "Cache traffic wasn't costed".to_owned(),
	})?;
	let Some(&(_, memory_cycles)) = boundary_cycles.last() else {
		return Err(EcmError::Configuration {
			analysis: "ECM",
			reason:   "Cache traffic has no boundaries".to_owned(),
		});
	};

	let ladder = std::iter::once(("T_nOL".to_owned(), cpu.t_nol))
		.chain(boundary_cycles)
		.collect::<Vec<_>>();
	let total_cycles = cpu.t_ol.max(ladder.iter().map(|(_, cycles)| cycles).sum());

	let scaling_cores = match memory_cycles == 0.0 {
		true => ScalingCores::Unbounded,
		false => ScalingCores::Cores(((total_cycles / memory_cycles).ceil() as u32).max(1)),
	};
	tracing::debug!(?ladder, total_cycles, %scaling_cores, "Combined model");

	Ok(CombinedResult {
		cpu: cpu.clone(),
		data: data.clone(),
		ladder,
		total_cycles,
		scaling_cores,
	})
}

impl CombinedResult {
	/// Returns the cycles after each successive boundary.
	///
	/// Each is the maximum between `T_OL` and `T_nOL` plus all boundaries up to it.
	pub fn cumulative_cycles(&self) -> Vec<f64> {
		self.ladder
			.iter()
			.skip(1)
			.scan(self.cpu.t_nol, |partial, (_, cycles)| {
				*partial += cycles;
				Some(partial.max(self.cpu.t_ol))
			})
			.collect()
	}

	/// Returns the in-core cycles, the maximum of `T_OL` and `T_nOL`
	pub fn core_cycles(&self) -> f64 {
		self.cpu.t_ol.max(self.cpu.t_nol)
	}
}
