//! Kernel
//!
//! The loop kernel being modeled. Analyses only see it through the [`Kernel`]
//! trait: its iteration space, the bytes it touches per iteration and,
//! when it was derived from code, a way to compile one instrumented iteration.

// Modules
pub mod description;

// Exports
pub use self::description::KernelDescription;

// Imports
use {
	crate::{error, machine::CompilerConfig},
	std::{ops::Range, path::Path, str::FromStr},
};

/// Kernel
pub trait Kernel {
	/// Returns the kernel's name
	fn name(&self) -> &str;

	/// Returns the byte size of each element
	fn element_size(&self) -> u64;

	/// Returns the total number of iterations
	fn iteration_length(&self) -> u64;

	/// Returns the number of iterations of the innermost loop
	fn inner_iteration_length(&self) -> u64;

	/// Returns the total bytes of all arrays accessed by this kernel
	fn working_set_size(&self) -> u64;

	/// Returns the floating point operations performed per iteration
	fn flops_per_iteration(&self) -> u64;

	/// Returns the byte addresses accessed by iteration `iteration`
	fn accesses(&self, iteration: u64) -> Result<IterationAccesses, anyhow::Error>;

	/// Returns the byte addresses accessed by all iterations in `iterations`, in order
	fn accesses_in(
		&self,
		iterations: Range<u64>,
	) -> impl Iterator<Item = Result<IterationAccesses, anyhow::Error>> + '_ {
		iterations.map(|iteration| self.accesses(iteration))
	}

	/// Returns this kernel's code, if it was derived from code
	fn code(&self) -> Option<&dyn KernelCode> {
		None
	}
}

/// Kernel code
pub trait KernelCode {
	/// Compiles one loop iteration, bracketed by analyzer markers, into `build_dir`.
	fn compile(&self, compiler: &CompilerConfig, block: AsmBlock, build_dir: &Path) -> error::Result<InstrumentedBlock>;
}

/// Accesses of a single iteration
#[derive(PartialEq, Eq, Clone, Default, Debug)]
pub struct IterationAccesses {
	/// Read byte addresses
	pub reads: Vec<u64>,

	/// Write byte addresses
	pub writes: Vec<u64>,
}

impl IterationAccesses {
	/// Returns the first address of this iteration.
	///
	/// Writes are preferred, since they're what get evicted.
	pub fn first_address(&self) -> Option<u64> {
		match self.writes.iter().min() {
			Some(&addr) => Some(addr),
			None => self.reads.iter().min().copied(),
		}
	}
}

/// Instrumented block selection
#[derive(PartialEq, Eq, Clone, Copy, Default, Debug)]
pub enum AsmBlock {
	/// Chooses the block with the most packed instructions
	#[default]
	Auto,

	/// Chooses the block with this index
	Index(usize),
}

impl FromStr for AsmBlock {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"auto" => Ok(Self::Auto),
			s => s
				.parse()
				.map(Self::Index)
				.map_err(|_| format!("Asm block must be \"auto\" or an integer, found {s:?}")),
		}
	}
}

/// Compiled, instrumented, loop iteration
#[derive(Clone, Debug)]
pub struct InstrumentedBlock {
	/// Binary containing the marked block
	pub binary: std::path::PathBuf,

	/// Bytes the block's pointers advance per execution of the block
	pub pointer_increment: i64,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn first_address_prefers_writes() {
		let accesses = IterationAccesses {
			reads:  vec![8, 16],
			writes: vec![136, 128],
		};
		assert_eq!(accesses.first_address(), Some(128));

		let accesses = IterationAccesses {
			reads:  vec![24, 16],
			writes: vec![],
		};
		assert_eq!(accesses.first_address(), Some(16));

		assert_eq!(IterationAccesses::default().first_address(), None);
	}

	#[test]
	fn parse_asm_block() {
		assert_eq!("auto".parse(), Ok(AsmBlock::Auto));
		assert_eq!("3".parse(), Ok(AsmBlock::Index(3)));
		assert!("manual".parse::<AsmBlock>().is_err());
	}
}
