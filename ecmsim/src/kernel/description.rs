//! Kernel description
//!
//! Kernels described declaratively in JSON: a loop nest, the arrays it walks
//! over and the affine accesses performed each iteration.

// Imports
use {
	super::{AsmBlock, InstrumentedBlock, IterationAccesses, Kernel, KernelCode},
	crate::{
		error::EcmError,
		machine::CompilerConfig,
		tool::CommandExt,
	},
	anyhow::Context,
	std::{
		collections::BTreeMap,
		fs,
		path::{Path, PathBuf},
		process,
	},
};

/// Alignment of every array's base address
pub const ARRAY_ALIGNMENT: u64 = 0x1000;

/// Kernel description
#[derive(Clone, Debug)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct KernelDescription {
	/// Name
	pub name: String,

	/// Element byte size
	pub element_size: u64,

	/// Loop nest, outermost first
	pub loops: Vec<Loop>,

	/// Arrays, laid out in memory in this order
	pub arrays: Vec<Array>,

	/// Reads performed each iteration
	#[serde(default)]
	pub reads: Vec<Access>,

	/// Writes performed each iteration
	#[serde(default)]
	pub writes: Vec<Access>,

	/// Floating point operations per iteration, by operator
	#[serde(default)]
	pub flops: BTreeMap<String, u64>,

	/// Code
	#[serde(default)]
	pub code: Option<CodeDescription>,
}

/// Loop
#[derive(Clone, Debug)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct Loop {
	/// Index variable
	pub index: String,

	/// First value of the index
	#[serde(default)]
	pub start: i64,

	/// Number of iterations
	pub length: u64,
}

/// Array
#[derive(Clone, Debug)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct Array {
	pub name:       String,
	pub dimensions: Vec<u64>,
}

/// Array access
#[derive(Clone, Debug)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct Access {
	/// Array name
	pub array: String,

	/// Index, per dimension
	pub index: Vec<IndexExpr>,
}

/// Index expression: `loop + offset`, or just `offset`
#[derive(Clone, Debug)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct IndexExpr {
	#[serde(rename = "loop", default)]
	pub loop_index: Option<String>,

	#[serde(default)]
	pub offset: i64,
}

/// Code description
#[derive(Clone, Debug)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct CodeDescription {
	/// Candidate blocks
	pub blocks: Vec<CodeBlock>,
}

/// Code block
#[derive(Clone, Debug)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct CodeBlock {
	/// Assembly source, with the block already bracketed by analyzer markers.
	///
	/// Relative paths are relative to the kernel description.
	pub source: PathBuf,

	/// Bytes the block's pointers advance per execution
	pub pointer_increment: i64,

	/// Number of packed (vector) instructions in the block
	#[serde(default)]
	pub packed_instructions: u64,
}

impl KernelDescription {
	/// Loads a kernel description from a json file and builds it.
	pub fn from_path(path: &Path) -> Result<DescribedKernel, anyhow::Error> {
		let file = fs::File::open(path).context("Unable to open kernel file")?;
		let mut desc = serde_json::from_reader::<_, Self>(file).context("Unable to parse kernel file")?;

		// Make all code sources relative to the description
		if let (Some(code), Some(parent)) = (&mut desc.code, path.parent()) {
			for block in &mut code.blocks {
				block.source = parent.join(&block.source);
			}
		}

		desc.build().context("Invalid kernel description")
	}

	/// Builds a kernel from this description
	pub fn build(self) -> Result<DescribedKernel, anyhow::Error> {
		anyhow::ensure!(self.element_size > 0, "Element size must be positive");
		anyhow::ensure!(!self.loops.is_empty(), "Kernel must have at least one loop");
		if let Some(empty_loop) = self.loops.iter().find(|l| l.length == 0) {
			anyhow::bail!("Loop {:?} has no iterations", empty_loop.index);
		}

		// Lay out all arrays one after the other, with a gap between them for any halos.
		let mut bases = BTreeMap::new();
		let mut next_base = ARRAY_ALIGNMENT;
		for array in &self.arrays {
			let size = array.dimensions.iter().product::<u64>() * self.element_size;
			anyhow::ensure!(
				bases.insert(array.name.as_str(), next_base).is_none(),
				"Array {:?} is declared twice",
				array.name
			);
			next_base = (next_base + size).next_multiple_of(ARRAY_ALIGNMENT) + ARRAY_ALIGNMENT;
		}

		let resolve_all = |accesses: &[Access]| {
			accesses
				.iter()
				.map(|access| self.resolve(access, &bases))
				.collect::<Result<Vec<_>, anyhow::Error>>()
		};
		let reads = resolve_all(&self.reads)?;
		let writes = resolve_all(&self.writes)?;

		Ok(DescribedKernel {
			desc: self,
			reads,
			writes,
		})
	}

	/// Resolves an access to it's affine form
	fn resolve(&self, access: &Access, bases: &BTreeMap<&str, u64>) -> Result<ResolvedAccess, anyhow::Error> {
		let array = self
			.arrays
			.iter()
			.find(|array| array.name == access.array)
			.with_context(|| format!("Unknown array {:?}", access.array))?;
		anyhow::ensure!(
			access.index.len() == array.dimensions.len(),
			"Access to {:?} has {} indices, expected {}",
			array.name,
			access.index.len(),
			array.dimensions.len()
		);

		let element_size = self.element_size as i64;
		let mut constant = bases[array.name.as_str()] as i64;
		let mut coefficients = vec![0; self.loops.len()];
		for (dim_idx, index) in access.index.iter().enumerate() {
			// Note: Row-major, so the stride is the product of all following dimensions
			let stride = array.dimensions[dim_idx + 1..].iter().product::<u64>() as i64 * element_size;
			constant += index.offset * stride;

			if let Some(loop_index) = &index.loop_index {
				let loop_idx = self
					.loops
					.iter()
					.position(|l| &l.index == loop_index)
					.with_context(|| format!("Unknown loop index {loop_index:?}"))?;
				constant += self.loops[loop_idx].start * stride;
				coefficients[loop_idx] += stride;
			}
		}

		Ok(ResolvedAccess { constant, coefficients })
	}
}

/// Access in affine form: `constant + sum(coefficients[l] * idx[l])`, in bytes,
/// with `idx[l]` counting from 0 for every loop.
#[derive(Clone, Debug)]
struct ResolvedAccess {
	constant:     i64,
	coefficients: Vec<i64>,
}

impl ResolvedAccess {
	/// Returns the address for the loop indices `idxs`
	fn address(&self, idxs: &[i64]) -> Result<u64, anyhow::Error> {
		let addr = self.constant +
			self.coefficients
				.iter()
				.zip(idxs)
				.map(|(coefficient, idx)| coefficient * idx)
				.sum::<i64>();

		u64::try_from(addr).with_context(|| format!("Access address is negative: {addr}"))
	}
}

/// Kernel built from a [`KernelDescription`]
#[derive(Clone, Debug)]
pub struct DescribedKernel {
	/// Description
	desc: KernelDescription,

	/// Resolved accesses
	reads:  Vec<ResolvedAccess>,
	writes: Vec<ResolvedAccess>,
}

impl DescribedKernel {
	/// Returns the description of this kernel
	pub fn description(&self) -> &KernelDescription {
		&self.desc
	}

	/// Returns the indices, per loop, of iteration `iteration`
	fn loop_indices(&self, iteration: u64) -> Vec<i64> {
		let mut idxs = vec![0; self.desc.loops.len()];
		let mut rest = iteration;
		for (idx, l) in idxs.iter_mut().zip(&self.desc.loops).rev() {
			*idx = (rest % l.length) as i64;
			rest /= l.length;
		}

		// Note: Iterations past the end keep advancing the outermost loop
		idxs[0] += (rest * self.desc.loops[0].length) as i64;
		idxs
	}
}

impl Kernel for DescribedKernel {
	fn name(&self) -> &str {
		&self.desc.name
	}

	fn element_size(&self) -> u64 {
		self.desc.element_size
	}

	fn iteration_length(&self) -> u64 {
		self.desc.loops.iter().map(|l| l.length).product()
	}

	fn inner_iteration_length(&self) -> u64 {
		self.desc.loops.last().map_or(1, |l| l.length)
	}

	fn working_set_size(&self) -> u64 {
		self.desc
			.arrays
			.iter()
			.map(|array| array.dimensions.iter().product::<u64>() * self.desc.element_size)
			.sum()
	}

	fn flops_per_iteration(&self) -> u64 {
		self.desc.flops.values().sum()
	}

	fn accesses(&self, iteration: u64) -> Result<IterationAccesses, anyhow::Error> {
		let idxs = self.loop_indices(iteration);
		let addresses = |accesses: &[ResolvedAccess]| {
			accesses
				.iter()
				.map(|access| access.address(&idxs))
				.collect::<Result<Vec<_>, _>>()
		};

		Ok(IterationAccesses {
			reads:  addresses(&self.reads).with_context(|| format!("Unable to compute reads of iteration {iteration}"))?,
			writes: addresses(&self.writes)
				.with_context(|| format!("Unable to compute writes of iteration {iteration}"))?,
		})
	}

	fn code(&self) -> Option<&dyn KernelCode> {
		self.desc.code.as_ref().map(|code| code as &dyn KernelCode)
	}
}

impl KernelCode for CodeDescription {
	fn compile(
		&self,
		compiler: &CompilerConfig,
		block: AsmBlock,
		build_dir: &Path,
	) -> crate::error::Result<InstrumentedBlock> {
		let (block_idx, code_block) = match block {
			// Note: `max_by_key` returns the last maximum, so we reverse to get the first
			AsmBlock::Auto => self
				.blocks
				.iter()
				.enumerate()
				.rev()
				.max_by_key(|(_, code_block)| code_block.packed_instructions),
			AsmBlock::Index(idx) => self.blocks.get(idx).map(|code_block| (idx, code_block)),
		}
		.ok_or_else(|| EcmError::Configuration {
			analysis: "port pressure",
			reason:   format!("No block matches {block:?} among {} blocks", self.blocks.len()),
		})?;
		tracing::debug!(?block_idx, ?code_block, "Selected block");

		if !code_block.source.is_file() {
			return Err(EcmError::Io {
				path:   code_block.source.clone(),
				source: std::io::Error::from(std::io::ErrorKind::NotFound),
			});
		}

		let binary = build_dir.join(format!("block{block_idx}.o"));
		process::Command::new(&compiler.program)
			.args(&compiler.flags)
			.arg("-c")
			.arg(&code_block.source)
			.arg("-o")
			.arg(&binary)
			.checked_stdout()?;

		Ok(InstrumentedBlock {
			binary,
			pointer_increment: code_block.pointer_increment,
		})
	}
}
