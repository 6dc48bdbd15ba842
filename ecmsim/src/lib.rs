//! Execution-Cache-Memory simulator (`ecmsim`)
//!
//! Predicts the steady state cycles a loop kernel takes per cacheline on a
//! machine, from its in-core port pressure and its cache traffic.

// Modules
pub mod cache_sim;
pub mod data;
pub mod error;
pub mod kernel;
pub mod machine;
pub mod model;
pub mod ports;
pub mod report;
pub mod tool;
pub mod traffic;
pub mod units;

// Exports
pub use self::{
	cache_sim::{CacheHierarchy, CacheSimulator},
	error::{EcmError, Result},
	kernel::{Kernel, KernelDescription},
	machine::MachineModel,
	model::{combine, CombinedResult, ScalingCores},
	ports::{PortPressureEstimator, PortPressureOptions, PortPressureReport},
	traffic::{CacheTrafficEstimator, CacheTrafficReport},
	units::{Unit, UnitContext},
};
