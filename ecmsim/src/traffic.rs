//! Cache traffic estimation
//!
//! Measures the transfers between every pair of adjacent memory levels caused
//! by one cacheline's worth of iterations, in steady state, and derives their cost.

// Imports
use {
	crate::{
		cache_sim::{CacheSimulator, LevelStats},
		error::{EcmError, Result},
		kernel::Kernel,
		machine::{Bandwidth, MachineModel},
	},
	std::ops::Range,
};

/// Cache traffic estimator
#[derive(Clone, Copy, Debug)]
pub struct CacheTrafficEstimator {
	/// Calibration policy
	policy: CalibrationPolicy,
}

/// Warm-up calibration policy.
///
/// Warm-ups ending within `edge_fraction` of either end of the innermost
/// loop are moved away from it by `edge_shift_fraction` of the loop's length.
#[derive(Clone, Copy, Debug)]
pub struct CalibrationPolicy {
	pub edge_fraction:       f64,
	pub edge_shift_fraction: f64,
}

impl Default for CalibrationPolicy {
	fn default() -> Self {
		Self {
			edge_fraction:       0.1,
			edge_shift_fraction: 0.2,
		}
	}
}

impl CacheTrafficEstimator {
	/// Creates a new estimator
	pub fn new(policy: CalibrationPolicy) -> Self {
		Self { policy }
	}

	/// Measures the cache traffic of `kernel` on `machine`, using the machine's cache simulator
	pub fn measure<K: Kernel>(&self, kernel: &K, machine: &MachineModel) -> Result<CacheTrafficReport> {
		let mut sim = machine.cache_simulator()?;
		self.measure_with(kernel, machine, &mut sim)
	}

	/// Measures the cache traffic of `kernel` on `machine` with simulator `sim`.
	///
	/// `sim` must have one statistics entry per level of the machine's memory hierarchy.
	pub fn measure_with<K: Kernel, S: CacheSimulator>(
		&self,
		kernel: &K,
		machine: &MachineModel,
		sim: &mut S,
	) -> Result<CacheTrafficReport> {
		let element_size = kernel.element_size();
		let elements_per_cacheline = machine.elements_per_cacheline(element_size);
		if elements_per_cacheline == 0 {
			return Err(EcmError::Configuration {
				analysis: "cache traffic",
				reason:   format!(
					"Element size {element_size} is larger than the cacheline size {}",
					machine.cacheline_size
				),
			});
		}

		// If everything fits, go through the whole iteration space first
		let largest_cache_size = sim.largest_cache_size();
		if kernel.working_set_size() <= largest_cache_size {
			tracing::info!(
				working_set_size = kernel.working_set_size(),
				largest_cache_size,
				"Working set fits in cache, warming up with all iterations"
			);
			play(kernel, sim, 0..kernel.iteration_length())?;
		}

		// Then warm-up and reset, so only the benchmark is measured
		let warmup_iterations = self.warmup_iterations(kernel, sim.line_bits(), largest_cache_size)?;
		tracing::info!(warmup_iterations, "Warming up");
		play(kernel, sim, 0..warmup_iterations)?;
		sim.force_write_back();
		sim.reset_stats();

		let bench_iterations = warmup_iterations..warmup_iterations + elements_per_cacheline;
		tracing::info!(?bench_iterations, "Benchmarking");
		play(kernel, sim, bench_iterations)?;
		sim.force_write_back();

		let stats = sim.stats();
		if stats.len() != machine.memory_hierarchy.len() {
			return Err(EcmError::machine(format!(
				"Cache simulator has {} levels, but the memory hierarchy has {}",
				stats.len(),
				machine.memory_hierarchy.len()
			)));
		}

		// Note: Evictions from a level are approximated by the stores into the next one,
		//       assuming all evictions are contiguous.
		let boundaries = stats
			.iter()
			.zip(&stats[1..])
			.enumerate()
			.map(|(level_idx, (level_stats, next_stats))| BoundaryTraffic {
				name:        machine.boundary_name(level_idx),
				miss_bytes:  level_stats.misses.bytes,
				hit_bytes:   level_stats.hits.bytes,
				evict_bytes: level_stats.stores.bytes,
				miss_lines:  level_stats.misses.count,
				hit_lines:   level_stats.hits.count,
				evict_lines: next_stats.stores.count,
				cycles:      None,
				bandwidth:   None,
			})
			.collect();

		Ok(CacheTrafficReport {
			element_size,
			boundaries,
			stats,
		})
	}

	/// Returns the number of warm-up iterations before benchmarking `kernel`.
	///
	/// The count is chosen so the benchmarked iterations start on a cacheline
	/// boundary, away from the edges of the innermost loop.
	pub fn warmup_iterations<K: Kernel>(&self, kernel: &K, line_bits: u32, largest_cache_size: u64) -> Result<u64> {
		let element_size = kernel.element_size();
		let mut warmup_iterations = (2 * kernel.iteration_length() / 3).min(2 * largest_cache_size / element_size / 3);

		// Stay away from the innermost loop edges, where accesses jump
		let inner_length = kernel.inner_iteration_length() as f64;
		let edge = self.policy.edge_fraction * inner_length;
		let shift = (self.policy.edge_shift_fraction * inner_length) as u64;
		if ((warmup_iterations as f64) % inner_length) < edge {
			tracing::debug!(warmup_iterations, shift, "Warm-up too close to loop start, moving forward");
			warmup_iterations += shift;
		}
		if ((warmup_iterations as f64) % inner_length - inner_length).abs() < edge {
			tracing::debug!(warmup_iterations, shift, "Warm-up too close to loop end, moving backwards");
			warmup_iterations = warmup_iterations.saturating_sub(shift);
		}

		// Then align the first access with a cacheline
		let accesses = kernel.accesses(warmup_iterations).map_err(EcmError::Kernel)?;
		if let Some(first_addr) = accesses.first_address() {
			let line_offset = first_addr - (first_addr >> line_bits << line_bits);
			tracing::debug!(warmup_iterations, first_addr, line_offset, "Aligning warm-up to cacheline");
			warmup_iterations = warmup_iterations.saturating_sub(line_offset / element_size);
		}

		Ok(warmup_iterations)
	}

	/// Derives the cycles of every boundary in `report`.
	///
	/// Boundaries with a fixed transfer cost use it, others use the bandwidth
	/// measured for their stream counts, plus any read stream penalty.
	pub fn cost(report: &CacheTrafficReport, machine: &MachineModel) -> Result<CacheTrafficReport> {
		machine.validate()?;
		let element_size = report.element_size as f64;
		let elements_per_cacheline = machine.elements_per_cacheline(report.element_size) as f64;

		let mut report = report.clone();
		for (level_idx, boundary) in report.boundaries.iter_mut().enumerate() {
			let level = machine
				.memory_hierarchy
				.get(level_idx)
				.ok_or_else(|| EcmError::machine(format!("No memory level for boundary {:?}", boundary.name)))?;
			let lines = (boundary.miss_lines + boundary.evict_lines) as f64;

			let cycles = match level.cycles_per_cacheline_transfer {
				Some(cycles_per_transfer) => lines * cycles_per_transfer,
				None => {
					let bandwidth = machine.bandwidth(level_idx + 1, boundary.miss_lines, boundary.evict_lines, 1)?;
					let transfer_cycles =
						lines * elements_per_cacheline * element_size * machine.clock / bandwidth.value;
					let penalty_cycles = level
						.penalty_cycles_per_read_stream
						.map_or(0.0, |penalty| boundary.miss_lines as f64 * penalty);
					boundary.bandwidth = Some(bandwidth);

					transfer_cycles + penalty_cycles
				},
			};
			tracing::debug!(boundary = ?boundary.name, cycles, "Costed boundary");
			boundary.cycles = Some(cycles);
		}

		Ok(report)
	}
}

impl Default for CacheTrafficEstimator {
	fn default() -> Self {
		Self::new(CalibrationPolicy::default())
	}
}

/// Feeds all accesses of `iterations` to `sim`
fn play<K: Kernel, S: CacheSimulator>(kernel: &K, sim: &mut S, iterations: Range<u64>) -> Result<()> {
	let element_size = kernel.element_size();
	for accesses in kernel.accesses_in(iterations) {
		let accesses = accesses.map_err(EcmError::Kernel)?;
		sim.load_store(&accesses, element_size);
	}

	Ok(())
}

/// Cache traffic report
#[derive(Clone, Debug)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct CacheTrafficReport {
	/// Element size of the measured kernel
	pub element_size: u64,

	/// Traffic per boundary, fastest first
	pub boundaries: Vec<BoundaryTraffic>,

	/// Raw simulator statistics of the benchmark
	pub stats: Vec<LevelStats>,
}

impl CacheTrafficReport {
	/// Returns the cycles of each boundary, if they've all been costed
	pub fn cycles(&self) -> Option<Vec<(String, f64)>> {
		self.boundaries
			.iter()
			.map(|boundary| Some((boundary.name.clone(), boundary.cycles?)))
			.collect()
	}
}

/// Traffic across the boundary between two adjacent levels
#[derive(Clone, Debug)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct BoundaryTraffic {
	/// Name, `<level>-<next level>`
	pub name: String,

	pub miss_bytes:  u64,
	pub hit_bytes:   u64,
	pub evict_bytes: u64,
	pub miss_lines:  u64,
	pub hit_lines:   u64,
	pub evict_lines: u64,

	/// Cycles per cacheline, once costed
	pub cycles: Option<f64>,

	/// Bandwidth used for costing, if not a fixed cost transfer
	pub bandwidth: Option<Bandwidth>,
}

#[cfg(test)]
mod tests {
	use {
		super::*,
		crate::{
			kernel::{description::DescribedKernel, IterationAccesses, KernelDescription},
			machine::tests::machine,
		},
		anyhow::Context,
	};

	/// Kernel whose accesses can't be generated for `failing` iterations
	struct BrokenKernel {
		failing: Range<u64>,
	}

	impl Kernel for BrokenKernel {
		fn name(&self) -> &str {
			"broken"
		}

		fn element_size(&self) -> u64 {
			8
		}

		fn iteration_length(&self) -> u64 {
			1 << 20
		}

		fn inner_iteration_length(&self) -> u64 {
			1 << 20
		}

		fn working_set_size(&self) -> u64 {
			8 << 20
		}

		fn flops_per_iteration(&self) -> u64 {
			0
		}

		fn accesses(&self, iteration: u64) -> anyhow::Result<IterationAccesses> {
			(!self.failing.contains(&iteration))
				.then(|| IterationAccesses {
					reads:  vec![iteration * 8],
					writes: vec![],
				})
				.context("Index out of bounds")
		}
	}

	/// Returns a kernel copying `b` into `a`, `length` elements of `element_size` bytes
	fn copy_kernel(element_size: u64, length: u64) -> DescribedKernel {
		serde_json::from_value::<KernelDescription>(serde_json::json!({
			"name": "copy",
			"element_size": element_size,
			"loops": [{ "index": "i", "length": length }],
			"arrays": [
				{ "name": "a", "dimensions": [length] },
				{ "name": "b", "dimensions": [length] },
			],
			"reads": [{ "array": "b", "index": [{ "loop": "i" }] }],
			"writes": [{ "array": "a", "index": [{ "loop": "i" }] }],
		}))
		.expect("Unable to parse kernel")
		.build()
		.expect("Unable to build kernel")
	}

	/// Returns a 2d kernel `a[j][i] = b[j][i-1] + b[j][i+1]` over a `rows * cols` grid
	fn row_kernel(rows: u64, cols: u64) -> DescribedKernel {
		serde_json::from_value::<KernelDescription>(serde_json::json!({
			"name": "row",
			"element_size": 8,
			"loops": [
				{ "index": "j", "length": rows },
				{ "index": "i", "start": 1, "length": cols - 2 },
			],
			"arrays": [
				{ "name": "a", "dimensions": [rows, cols] },
				{ "name": "b", "dimensions": [rows, cols] },
			],
			"reads": [
				{ "array": "b", "index": [{ "loop": "j" }, { "loop": "i", "offset": -1 }] },
				{ "array": "b", "index": [{ "loop": "j" }, { "loop": "i", "offset": 1 }] },
			],
			"writes": [{ "array": "a", "index": [{ "loop": "j" }, { "loop": "i" }] }],
		}))
		.expect("Unable to parse kernel")
		.build()
		.expect("Unable to build kernel")
	}

	#[test]
	fn warmup_is_cacheline_aligned() {
		let estimator = CacheTrafficEstimator::default();
		for line_bits in [5, 6, 7] {
			for element_size in [4, 8, 16, 32, 64] {
				for (length, cache_size) in [(1000, 1 << 20), (12_345, 1 << 16), (1 << 22, 4 << 20)] {
					let kernel = copy_kernel(element_size, length);
					let warmup = estimator
						.warmup_iterations(&kernel, line_bits, cache_size)
						.expect("Unable to calibrate");
					let first_addr = kernel
						.accesses(warmup)
						.expect("Unable to get accesses")
						.first_address()
						.expect("Kernel has accesses");
					assert_eq!(
						first_addr % (1 << line_bits),
						0,
						"Line bits {line_bits}, element size {element_size}, length {length}, cache size {cache_size}"
					);
				}
			}
		}
	}

	#[test]
	fn warmup_avoids_loop_edges() {
		let estimator = CacheTrafficEstimator::default();

		// `2 * (100 * 1000) / 3 = 66666`, which is row 66, column 666: not close to an edge
		let kernel = row_kernel(100, 1002);
		let warmup = estimator
			.warmup_iterations(&kernel, 6, 1 << 30)
			.expect("Unable to calibrate");
		assert_eq!(warmup / 1000, 66);

		// `2 * (90 * 1000) / 3 = 60000`, which starts row 60 exactly, so it's moved forward by 200
		let kernel = row_kernel(90, 1002);
		let warmup = estimator
			.warmup_iterations(&kernel, 6, 1 << 30)
			.expect("Unable to calibrate");
		let column = warmup % 1000;
		assert!((190..=200).contains(&column), "Warm-up {warmup} ended at column {column}");

		let first_addr = kernel
			.accesses(warmup)
			.expect("Unable to get accesses")
			.first_address()
			.expect("Kernel has accesses");
		assert_eq!(first_addr % 64, 0);
	}

	#[test]
	fn fitting_working_set_has_no_memory_misses() {
		let machine = machine();
		let kernel = copy_kernel(8, 1000);
		let report = CacheTrafficEstimator::default()
			.measure(&kernel, &machine)
			.expect("Unable to measure");

		assert_eq!(report.boundaries.len(), 3);
		assert_eq!(report.stats.len(), 4);
		for boundary in &report.boundaries {
			assert_eq!(boundary.miss_lines, 0, "Boundary {boundary:?} missed");
		}
	}

	#[test]
	fn streaming_copy() {
		let machine = machine();
		let kernel = copy_kernel(8, 1 << 22);
		let report = CacheTrafficEstimator::default()
			.measure(&kernel, &machine)
			.expect("Unable to measure");

		// A read line and a write-allocated line come in, the written line goes out
		let names = report.boundaries.iter().map(|boundary| boundary.name.as_str()).collect::<Vec<_>>();
		assert_eq!(names, ["L1-L2", "L2-L3", "L3-MEM"]);
		for boundary in &report.boundaries {
			assert_eq!(boundary.miss_lines, 2, "Boundary {boundary:?}");
			assert_eq!(boundary.evict_lines, 1, "Boundary {boundary:?}");
			assert_eq!(boundary.cycles, None);
		}
		assert_eq!(report.cycles(), None);

		let report = CacheTrafficEstimator::cost(&report, &machine).expect("Unable to cost");
		let cycles = report.cycles().expect("Report was costed");
		assert_eq!(cycles[0], ("L1-L2".to_owned(), 3.0 * 2.0));
		assert_eq!(cycles[1], ("L2-L3".to_owned(), 3.0 * 10.0));

		// 3 lines of 64 bytes at 2 GHz over 25 GB/s, plus 1 cycle per read stream
		let expected_mem_cycles = 3.0 * 64.0 * 2.0e9 / 25.0e9 + 2.0;
		assert!((cycles[2].1 - expected_mem_cycles).abs() < 1e-9, "Found {cycles:?}");
		assert_eq!(report.boundaries[2].bandwidth, Some(Bandwidth {
			value:  25.0e9,
			kernel: "copy".to_owned(),
		}));
		assert_eq!(report.boundaries[0].bandwidth, None);
	}

	#[test]
	fn fixed_cost_boundaries() {
		let machine = machine();
		let report = CacheTrafficReport {
			element_size: 8,
			boundaries:   [(3, 0), (5, 7), (0, 0)]
				.into_iter()
				.enumerate()
				.map(|(level_idx, (miss_lines, evict_lines))| BoundaryTraffic {
					name: machine.boundary_name(level_idx),
					miss_bytes: miss_lines * 64,
					hit_bytes: 0,
					evict_bytes: evict_lines * 64,
					miss_lines,
					hit_lines: 0,
					evict_lines,
					cycles: None,
					bandwidth: None,
				})
				.collect(),
			stats:        vec![],
		};

		let report = CacheTrafficEstimator::cost(&report, &machine).expect("Unable to cost");
		assert_eq!(report.boundaries[0].cycles, Some(3.0 * 2.0));
		assert_eq!(report.boundaries[1].cycles, Some(12.0 * 10.0));
		assert_eq!(report.boundaries[2].cycles, Some(0.0));
	}

	#[test]
	fn kernel_errors_are_propagated() {
		let machine = machine();

		// Fails while calibrating, then while warming up
		for failing in [0..u64::MAX, 10..11] {
			let err = CacheTrafficEstimator::default()
				.measure(&BrokenKernel { failing: failing.clone() }, &machine)
				.expect_err("Kernel accesses fail");
			assert!(matches!(err, EcmError::Kernel(_)), "Failing {failing:?}, found {err:?}");
		}
	}

	#[test]
	fn invalid_bandwidth_is_rejected() {
		let kernel = copy_kernel(8, 1 << 22);
		let report = CacheTrafficEstimator::default()
			.measure(&kernel, &machine())
			.expect("Unable to measure");

		let mut zero_bandwidth = machine();
		for measurement in zero_bandwidth.benchmarks.measurements.get_mut("MEM").expect("Has MEM measurements") {
			measurement.results.insert("copy".to_owned(), vec![0.0; 8]);
		}
		let err = CacheTrafficEstimator::cost(&report, &zero_bandwidth).expect_err("Bandwidth is zero");
		assert!(matches!(err, EcmError::Machine { .. }), "Found {err:?}");

		let mut zero_clock = machine();
		zero_clock.clock = 0.0;
		let err = CacheTrafficEstimator::cost(&report, &zero_clock).expect_err("Clock is zero");
		assert!(matches!(err, EcmError::Machine { .. }), "Found {err:?}");
	}

	#[test]
	fn oversized_elements() {
		let machine = machine();
		let kernel = copy_kernel(128, 100);
		let err = CacheTrafficEstimator::default()
			.measure(&kernel, &machine)
			.expect_err("Elements don't fit a cacheline");
		assert!(matches!(err, EcmError::Configuration { .. }));
	}
}
