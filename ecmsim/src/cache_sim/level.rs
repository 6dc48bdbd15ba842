//! Cache level

// Imports
use {super::LevelStats, crate::machine::CacheGeometry};

/// Set-associative cache level with LRU replacement
#[derive(Clone, Debug)]
pub struct CacheLevel {
	/// Geometry
	geometry: CacheGeometry,

	/// Line offset bits
	line_bits: u32,

	/// Sets, each ordered from least to most recently used
	sets: Vec<Vec<Line>>,

	/// Statistics
	pub stats: LevelStats,
}

impl CacheLevel {
	/// Creates a new, empty, cache level
	///
	/// # Panics
	/// Panics if the line size isn't a power of two, or if there are no sets or ways.
	pub fn new(name: &str, geometry: CacheGeometry) -> Self {
		assert!(geometry.line_size.is_power_of_two(), "Line size must be a power of two");
		assert!(geometry.sets > 0 && geometry.ways > 0, "Cache must have sets and ways");

		Self {
			geometry,
			line_bits: geometry.line_size.trailing_zeros(),
			sets: vec![Vec::with_capacity(geometry.ways as usize); geometry.sets as usize],
			stats: LevelStats::new(name),
		}
	}

	/// Returns this level's name
	pub fn name(&self) -> &str {
		&self.stats.name
	}

	/// Returns the line size
	pub fn line_size(&self) -> u64 {
		self.geometry.line_size
	}

	/// Returns the line offset bits
	pub fn line_bits(&self) -> u32 {
		self.line_bits
	}

	/// Returns the total size, in bytes
	pub fn size(&self) -> u64 {
		self.geometry.size()
	}

	/// Set of line `line`
	fn set_mut(&mut self, line: u64) -> &mut Vec<Line> {
		let set_idx = (line % self.geometry.sets) as usize;
		&mut self.sets[set_idx]
	}

	/// Marks line `line` as most recently used, dirtying it if `dirty`.
	///
	/// Returns whether the line was present.
	pub fn touch(&mut self, line: u64, dirty: bool) -> bool {
		let set = self.set_mut(line);
		let Some(pos) = set.iter().position(|cached| cached.line == line) else {
			return false;
		};

		let mut cached = set.remove(pos);
		cached.dirty |= dirty;
		set.push(cached);
		true
	}

	/// Inserts line `line`, which must not be present.
	///
	/// Returns the evicted line, if the set was full.
	pub fn insert(&mut self, line: u64, dirty: bool) -> Option<Line> {
		let ways = self.geometry.ways as usize;
		let set = self.set_mut(line);
		debug_assert!(set.iter().all(|cached| cached.line != line), "Line was already cached");

		let victim = (set.len() >= ways).then(|| set.remove(0));
		set.push(Line { line, dirty });
		victim
	}

	/// Marks all lines as clean, returning the ones that were dirty
	pub fn clean_all(&mut self) -> Vec<u64> {
		self.sets
			.iter_mut()
			.flatten()
			.filter(|cached| cached.dirty)
			.map(|cached| {
				cached.dirty = false;
				cached.line
			})
			.collect()
	}
}

/// Cached line
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub struct Line {
	/// Line number (address without the offset bits)
	pub line: u64,

	/// Whether the line was modified
	pub dirty: bool,
}
