//! Output data

// Imports
use crate::{model::CombinedResult, ports::PortPressureReport, traffic::CacheTrafficReport, units::UnitContext};

/// Output data
#[derive(Clone, Debug)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct Data {
	/// Kernel name
	pub kernel: String,

	/// Machine model name
	pub machine: String,

	/// Unit context of the kernel on the machine
	pub unit_context: UnitContext,

	/// Model result
	pub result: ModelResult,
}

/// Model result
#[derive(Clone, Debug)]
#[derive(serde::Serialize, serde::Deserialize)]
pub enum ModelResult {
	/// Full model
	Ecm(CombinedResult),

	/// Data transfers only
	Data(CacheTrafficReport),

	/// In-core execution only
	Cpu(PortPressureReport),
}
