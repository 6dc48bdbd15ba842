//! Machine description
//!
//! Describes the target CPU: its clock, execution ports, memory hierarchy and
//! the measured bandwidths used for transfers without a fixed cost.

// Imports
use {
	crate::{
		cache_sim::{CacheHierarchy, CacheLevel},
		error::{self, EcmError},
		tool::ToolConfig,
	},
	anyhow::Context,
	std::{collections::BTreeMap, fs, path::Path},
};

/// Machine model
#[derive(Clone, Debug)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct MachineModel {
	/// Model name
	pub model_name: String,

	/// Micro-architecture, as understood by the analyzer
	pub micro_architecture: String,

	/// Clock (Hz)
	pub clock: f64,

	/// Cacheline size (bytes)
	pub cacheline_size: u64,

	/// Cores per socket
	pub cores_per_socket: u32,

	/// Ports whose work overlaps with data transfers
	pub overlapping_ports: Vec<String>,

	/// Ports whose work doesn't overlap with data transfers
	pub non_overlapping_ports: Vec<String>,

	/// Compiler
	pub compiler: CompilerConfig,

	/// Instruction timing analyzer
	#[serde(default = "default_analyzer")]
	pub analyzer: ToolConfig,

	/// Memory hierarchy, from the fastest cache to main memory
	pub memory_hierarchy: Vec<MemoryLevel>,

	/// Bandwidth benchmarks
	#[serde(default)]
	pub benchmarks: Benchmarks,
}

/// Default analyzer
fn default_analyzer() -> ToolConfig {
	ToolConfig::new("iaca.sh")
}

/// Compiler configuration
#[derive(Clone, Debug)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct CompilerConfig {
	pub program: String,
	#[serde(default)]
	pub flags:   Vec<String>,
}

/// Memory hierarchy level
#[derive(Clone, Debug)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct MemoryLevel {
	/// Level name
	pub level: String,

	/// Cache geometry, `None` for main memory
	#[serde(default)]
	pub cache: Option<CacheGeometry>,

	/// Fixed cost of transferring a cacheline from the next level.
	///
	/// If `None`, the cost is derived from the measured bandwidth.
	#[serde(default)]
	pub cycles_per_cacheline_transfer: Option<f64>,

	/// Penalty for each read stream from the next level
	#[serde(default)]
	pub penalty_cycles_per_read_stream: Option<f64>,

	/// Cores sharing one instance of this level
	#[serde(default)]
	pub cores_per_group: Option<u32>,
}

/// Cache geometry
#[derive(Clone, Copy, Debug)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct CacheGeometry {
	pub sets:      u64,
	pub ways:      u64,
	pub line_size: u64,
}

impl CacheGeometry {
	/// Returns the size of this cache, in bytes
	pub fn size(&self) -> u64 {
		self.sets * self.ways * self.line_size
	}
}

/// Bandwidth benchmarks
#[derive(Clone, Default, Debug)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct Benchmarks {
	/// Benchmark kernels, by name
	pub kernels: BTreeMap<String, BenchmarkKernel>,

	/// Measurements, by level name
	pub measurements: BTreeMap<String, Vec<BenchmarkMeasurement>>,
}

/// Benchmark kernel
#[derive(Clone, Copy, Debug)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct BenchmarkKernel {
	pub read_streams:       u64,
	pub write_streams:      u64,
	/// Streams both read and written
	#[serde(default)]
	pub read_write_streams: u64,
}

impl BenchmarkKernel {
	/// Returns the ratio between read and write streams
	pub fn stream_ratio(&self) -> f64 {
		stream_ratio(
			(self.read_streams + self.write_streams).saturating_sub(self.read_write_streams) as f64,
			self.write_streams as f64,
		)
	}
}

/// Benchmark measurement for a level
#[derive(Clone, Debug)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct BenchmarkMeasurement {
	/// Threads per core
	pub threads_per_core: u32,

	/// Core counts measured
	pub cores: Vec<u32>,

	/// Bandwidths (bytes/s), per kernel, indexed like `cores`
	pub results: BTreeMap<String, Vec<f64>>,
}

/// Bandwidth chosen for a transfer
#[derive(PartialEq, Clone, Debug)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct Bandwidth {
	/// Bandwidth (bytes/s)
	pub value: f64,

	/// Benchmark kernel that measured it
	pub kernel: String,
}

impl MachineModel {
	/// Loads a machine model from a json file
	pub fn from_path(path: &Path) -> Result<Self, anyhow::Error> {
		let file = fs::File::open(path).context("Unable to open machine file")?;
		let machine = serde_json::from_reader::<_, Self>(file).context("Unable to parse machine file")?;
		machine.validate().context("Invalid machine description")?;

		Ok(machine)
	}

	/// Validates this machine's clock and memory hierarchy
	pub fn validate(&self) -> error::Result<()> {
		if !(self.clock > 0.0 && self.clock.is_finite()) {
			return Err(EcmError::machine(format!("Clock must be positive, found {}", self.clock)));
		}
		if self.memory_hierarchy.len() < 2 {
			return Err(EcmError::machine("Memory hierarchy needs at least one cache and main memory"));
		}
		if !self.cacheline_size.is_power_of_two() {
			return Err(EcmError::machine(format!(
				"Cacheline size must be a power of two, found {}",
				self.cacheline_size
			)));
		}

		let (memory, caches) = self.memory_hierarchy.split_last().expect("Just checked length");
		if memory.cache.is_some() {
			return Err(EcmError::machine(format!("Last level {:?} must be main memory", memory.level)));
		}
		for level in caches {
			let cache = level
				.cache
				.ok_or_else(|| EcmError::machine(format!("Level {:?} has no cache geometry", level.level)))?;
			if cache.line_size != self.cacheline_size || cache.sets == 0 || cache.ways == 0 {
				return Err(EcmError::machine(format!(
					"Level {:?} has an invalid geometry {cache:?} for cacheline size {}",
					level.level, self.cacheline_size
				)));
			}
		}

		Ok(())
	}

	/// Returns the elements of `element_size` bytes that fit in a cacheline
	pub fn elements_per_cacheline(&self, element_size: u64) -> u64 {
		self.cacheline_size / element_size
	}

	/// Returns the name of the boundary between level `level_idx` and the next one
	pub fn boundary_name(&self, level_idx: usize) -> String {
		let next = self
			.memory_hierarchy
			.get(level_idx + 1)
			.map_or("?", |level| level.level.as_str());
		format!("{}-{next}", self.memory_hierarchy[level_idx].level)
	}

	/// Creates a cache simulator for this machine, starting cold
	pub fn cache_simulator(&self) -> error::Result<CacheHierarchy> {
		self.validate()?;

		let (memory, caches) = self.memory_hierarchy.split_last().expect("Validated");
		let levels = caches
			.iter()
			.map(|level| CacheLevel::new(&level.level, level.cache.expect("Validated")))
			.collect();

		Ok(CacheHierarchy::new(levels, &memory.level))
	}

	/// Returns the bandwidth when transferring to level `level_idx`.
	///
	/// The benchmark kernel with the closest read/write stream ratio is chosen, and
	/// then the maximum bandwidth measured with at most as many cores as share the level.
	pub fn bandwidth(
		&self,
		level_idx: usize,
		read_streams: u64,
		write_streams: u64,
		threads_per_core: u32,
	) -> error::Result<Bandwidth> {
		let target_ratio = stream_ratio(read_streams as f64, write_streams as f64);
		let (kernel, _) = self
			.benchmarks
			.kernels
			.iter()
			.map(|(name, kernel)| (name, ratio_distance(kernel.stream_ratio(), target_ratio)))
			.fold(None, |closest: Option<(&String, f64)>, (name, distance)| match closest {
				Some((_, closest_distance)) if closest_distance <= distance => closest,
				_ => Some((name, distance)),
			})
			.ok_or_else(|| EcmError::machine("No benchmark kernels"))?;

		let level = self
			.memory_hierarchy
			.get(level_idx)
			.ok_or_else(|| EcmError::machine(format!("No memory level {level_idx}")))?;
		let measurement = self
			.benchmarks
			.measurements
			.get(&level.level)
			.and_then(|measurements| {
				measurements
					.iter()
					.find(|measurement| measurement.threads_per_core == threads_per_core)
			})
			.ok_or_else(|| {
				EcmError::machine(format!(
					"No bandwidth measurement for {:?} with {threads_per_core} threads per core",
					level.level
				))
			})?;

		let max_cores = level
			.cores_per_group
			.unwrap_or(self.cores_per_socket)
			.min(self.cores_per_socket)
			.max(1) as usize;
		let value = measurement
			.results
			.get(kernel)
			.into_iter()
			.flat_map(|results| results.iter().take(max_cores))
			.copied()
			.reduce(f64::max)
			.ok_or_else(|| {
				EcmError::machine(format!("No {kernel:?} bandwidth results for {:?}", level.level))
			})?;
		if !(value > 0.0 && value.is_finite()) {
			return Err(EcmError::machine(format!(
				"Invalid {kernel:?} bandwidth {value} for {:?}",
				level.level
			)));
		}
		tracing::debug!(level = ?level.level, ?kernel, ?value, read_streams, write_streams, "Selected bandwidth");

		Ok(Bandwidth {
			value,
			kernel: kernel.clone(),
		})
	}
}

/// Ratio between read and write streams, infinite without writes
fn stream_ratio(read_streams: f64, write_streams: f64) -> f64 {
	match write_streams == 0.0 {
		true => f64::INFINITY,
		false => read_streams / write_streams,
	}
}

/// Distance between two stream ratios, where equal infinities are 0 apart
fn ratio_distance(lhs: f64, rhs: f64) -> f64 {
	match lhs == rhs {
		true => 0.0,
		false => (lhs - rhs).abs(),
	}
}
