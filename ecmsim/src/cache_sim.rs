//! Cache simulator
//!
//! Inclusive-on-fill, write-back, write-allocate hierarchy of LRU caches,
//! ending in main memory.

// Modules
pub mod level;
pub mod statistics;

// Exports
pub use self::{
	level::CacheLevel,
	statistics::{Counter, LevelStats},
};

// Imports
use crate::kernel::IterationAccesses;

/// Cache simulator
pub trait CacheSimulator {
	/// Loads `length` bytes at `addr`
	fn load(&mut self, addr: u64, length: u64);

	/// Stores `length` bytes at `addr`
	fn store(&mut self, addr: u64, length: u64);

	/// Performs all loads and then all stores of an iteration, each of `length` bytes
	fn load_store(&mut self, accesses: &IterationAccesses, length: u64) {
		for &addr in &accesses.reads {
			self.load(addr, length);
		}
		for &addr in &accesses.writes {
			self.store(addr, length);
		}
	}

	/// Writes back all dirty lines, on every level
	fn force_write_back(&mut self);

	/// Resets all statistics
	fn reset_stats(&mut self);

	/// Returns the statistics of every cache level, followed by main memory
	fn stats(&self) -> Vec<LevelStats>;

	/// Returns the number of bits of a line offset in the first level
	fn line_bits(&self) -> u32;

	/// Returns the size of the largest cache, in bytes
	fn largest_cache_size(&self) -> u64;
}

/// Cache hierarchy
#[derive(Clone, Debug)]
pub struct CacheHierarchy {
	/// Caches, fastest first
	levels: Vec<CacheLevel>,

	/// Main memory statistics
	memory: LevelStats,
}

impl CacheHierarchy {
	/// Creates a new hierarchy over `levels`, backed by main memory.
	///
	/// # Panics
	/// Panics if `levels` is empty or if the levels' line sizes differ.
	pub fn new(levels: Vec<CacheLevel>, memory_name: &str) -> Self {
		let line_size = levels.first().expect("Hierarchy needs at least 1 cache").line_size();
		assert!(
			levels.iter().all(|level| level.line_size() == line_size),
			"All caches must have the same line size"
		);

		Self {
			levels,
			memory: LevelStats::new(memory_name),
		}
	}

	/// Returns the line size of all levels
	pub fn line_size(&self) -> u64 {
		self.levels[0].line_size()
	}

	/// Loads `bytes` of line `line` through level `level_idx`
	fn load_line(&mut self, level_idx: usize, line: u64, bytes: u64) {
		let Some(level) = self.levels.get_mut(level_idx) else {
			self.memory.loads.register(bytes);
			return;
		};

		level.stats.loads.register(bytes);
		if level.touch(line, false) {
			level.stats.hits.register(bytes);
			return;
		}
		level.stats.misses.register(bytes);

		let line_size = level.line_size();
		self.load_line(level_idx + 1, line, line_size);
		self.allocate(level_idx, line, false);
	}

	/// Stores `bytes` of line `line` through level `level_idx`
	fn store_line(&mut self, level_idx: usize, line: u64, bytes: u64) {
		let Some(level) = self.levels.get_mut(level_idx) else {
			self.memory.stores.register(bytes);
			return;
		};

		level.stats.stores.register(bytes);
		if level.touch(line, true) {
			level.stats.hits.register(bytes);
			return;
		}
		level.stats.misses.register(bytes);

		// Note: Partial lines must be fetched first, full lines are simply overwritten
		let line_size = level.line_size();
		if bytes < line_size {
			self.load_line(level_idx + 1, line, line_size);
		}
		self.allocate(level_idx, line, true);
	}

	/// Allocates line `line` on level `level_idx`, writing back any dirty victim
	fn allocate(&mut self, level_idx: usize, line: u64, dirty: bool) {
		let level = &mut self.levels[level_idx];
		let line_size = level.line_size();
		if let Some(victim) = level.insert(line, dirty) {
			level.stats.evicts.register(line_size);
			tracing::trace!(level = ?level.name(), ?victim, "Evicted line");
			if victim.dirty {
				self.store_line(level_idx + 1, victim.line, line_size);
			}
		}
	}

	/// Calls `f` for each line and byte count covered by `length` bytes at `addr`
	fn for_each_line(&mut self, addr: u64, length: u64, mut f: impl FnMut(&mut Self, u64, u64)) {
		let line_bits = self.line_bits();
		let line_size = self.line_size();
		let end = addr + length.max(1);
		for line in (addr >> line_bits)..=((end - 1) >> line_bits) {
			let line_start = line << line_bits;
			let bytes = end.min(line_start + line_size) - addr.max(line_start);
			f(self, line, bytes);
		}
	}
}

impl CacheSimulator for CacheHierarchy {
	fn load(&mut self, addr: u64, length: u64) {
		self.for_each_line(addr, length, |this, line, bytes| this.load_line(0, line, bytes));
	}

	fn store(&mut self, addr: u64, length: u64) {
		self.for_each_line(addr, length, |this, line, bytes| this.store_line(0, line, bytes));
	}

	fn force_write_back(&mut self) {
		// Note: Fastest first, so dirty lines trickle all the way down to memory
		for level_idx in 0..self.levels.len() {
			let line_size = self.levels[level_idx].line_size();
			for line in self.levels[level_idx].clean_all() {
				self.store_line(level_idx + 1, line, line_size);
			}
		}
	}

	fn reset_stats(&mut self) {
		for level in &mut self.levels {
			level.stats.reset();
		}
		self.memory.reset();
	}

	fn stats(&self) -> Vec<LevelStats> {
		self.levels
			.iter()
			.map(|level| level.stats.clone())
			.chain([self.memory.clone()])
			.collect()
	}

	fn line_bits(&self) -> u32 {
		self.levels[0].line_bits()
	}

	fn largest_cache_size(&self) -> u64 {
		self.levels.iter().map(CacheLevel::size).max().unwrap_or(0)
	}
}
