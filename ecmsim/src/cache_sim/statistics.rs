//! Statistics

/// Statistics of a single level
#[derive(PartialEq, Eq, Clone, Debug)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct LevelStats {
	/// Level name
	pub name: String,

	pub loads:  Counter,
	pub stores: Counter,
	pub hits:   Counter,
	pub misses: Counter,
	pub evicts: Counter,
}

impl LevelStats {
	/// Creates new, empty, statistics
	pub fn new(name: &str) -> Self {
		Self {
			name:   name.to_owned(),
			loads:  Counter::default(),
			stores: Counter::default(),
			hits:   Counter::default(),
			misses: Counter::default(),
			evicts: Counter::default(),
		}
	}

	/// Resets all counters
	pub fn reset(&mut self) {
		*self = Self::new(&self.name);
	}
}

/// Event counter
#[derive(PartialEq, Eq, Clone, Copy, Default, Debug)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct Counter {
	/// Number of events
	pub count: u64,

	/// Bytes involved in all events
	pub bytes: u64,
}

impl Counter {
	/// Registers an event of `bytes` bytes
	pub fn register(&mut self, bytes: u64) {
		self.count += 1;
		self.bytes += bytes;
	}
}
