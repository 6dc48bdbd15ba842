//! Report rendering

// Imports
use {
	crate::{
		data::{Data, ModelResult},
		model::{CombinedResult, ScalingCores},
		ports::PortPressureReport,
		traffic::CacheTrafficReport,
		units::{Unit, UnitContext},
	},
	anyhow::Context,
	ecmsim_util::{DisplayWrapper, GeneralFloat},
	std::io::{self, Write},
};

/// Report renderer
pub trait Renderer {
	/// Renders `data`
	fn render(&mut self, data: &Data) -> Result<(), anyhow::Error>;
}

/// Text renderer
#[derive(Debug)]
pub struct TextRenderer<W> {
	/// Writer
	writer: W,

	/// Verbosity.
	///
	/// At 2, sub-reports are included, at 3, also the raw analyzer output and cache statistics.
	verbosity: u8,

	/// Unit to convert to, if any
	unit: Option<Unit>,
}

impl<W: Write> TextRenderer<W> {
	/// Creates a new text renderer
	pub fn new(writer: W, verbosity: u8, unit: Option<Unit>) -> Self {
		Self {
			writer,
			verbosity,
			unit,
		}
	}

	/// Returns the inner writer
	pub fn into_inner(self) -> W {
		self.writer
	}

	/// Renders the full model
	fn render_ecm(&mut self, result: &CombinedResult, ctx: &UnitContext) -> Result<(), io::Error> {
		if self.verbosity > 1 {
			self.render_cpu(&result.cpu, ctx)?;
			self.render_data(&result.data, ctx)?;
		}

		let boundaries = DisplayWrapper::new(|f| {
			for (_, cycles) in result.ladder.iter().skip(1) {
				write!(f, " | {}", GeneralFloat::short(*cycles))?;
			}
			Ok(())
		});
		write!(
			self.writer,
			"{{ {} || {}{boundaries} }} cy/CL",
			GeneralFloat::short(result.cpu.t_ol),
			GeneralFloat::short(result.cpu.t_nol)
		)?;
		if let Some(unit) = self.unit {
			write!(self.writer, " = {}", unit.convert(result.total_cycles, ctx))?;
		}
		writeln!(self.writer)?;

		let cumulative_cycles = result.cumulative_cycles();
		let cumulative = DisplayWrapper::new(|f| {
			for cycles in &cumulative_cycles {
				write!(f, " \\ {}", GeneralFloat::short(*cycles))?;
			}
			Ok(())
		});
		writeln!(
			self.writer,
			"{{ {}{cumulative} }} cy/CL",
			GeneralFloat::short(result.core_cycles())
		)?;

		match result.scaling_cores {
			ScalingCores::Cores(cores) => writeln!(self.writer, "saturating at {cores} cores"),
			ScalingCores::Unbounded => writeln!(self.writer, "not saturating (unbounded)"),
		}
	}

	/// Renders the data transfers
	fn render_data(&mut self, report: &CacheTrafficReport, ctx: &UnitContext) -> Result<(), io::Error> {
		if self.verbosity > 2 {
			writeln!(self.writer, "Cache simulation statistics:")?;
			for stats in &report.stats {
				writeln!(
					self.writer,
					"{:>5} loads={}/{}B stores={}/{}B hits={}/{}B misses={}/{}B evicts={}/{}B",
					stats.name,
					stats.loads.count,
					stats.loads.bytes,
					stats.stores.count,
					stats.stores.bytes,
					stats.hits.count,
					stats.hits.bytes,
					stats.misses.count,
					stats.misses.bytes,
					stats.evicts.count,
					stats.evicts.bytes,
				)?;
			}
		}

		let unit = self.unit.unwrap_or(Unit::CyclesPerCacheline);
		for boundary in &report.boundaries {
			match boundary.cycles {
				Some(cycles) => writeln!(self.writer, "{} = {}", boundary.name, unit.convert(cycles, ctx))?,
				None => writeln!(self.writer, "{} = ?", boundary.name)?,
			}

			if self.verbosity > 1 {
				writeln!(
					self.writer,
					"  {} misses, {} hits, {} evicts (lines)",
					boundary.miss_lines, boundary.hit_lines, boundary.evict_lines
				)?;
				if let Some(bandwidth) = &boundary.bandwidth {
					writeln!(
						self.writer,
						"  based on the {} kernel with {:.2} GB/s",
						bandwidth.kernel,
						bandwidth.value / 1.0e9
					)?;
				}
			}
		}

		Ok(())
	}

	/// Renders the in-core execution
	fn render_cpu(&mut self, report: &PortPressureReport, ctx: &UnitContext) -> Result<(), io::Error> {
		if self.verbosity > 2 {
			writeln!(self.writer, "Analyzer output:")?;
			writeln!(self.writer, "{}", report.throughput_output)?;
			writeln!(self.writer, "{}", report.latency_output)?;
		}

		if self.verbosity > 1 {
			let ports = DisplayWrapper::new(|f| {
				for (idx, (port, cycles)) in report.port_cycles.iter().enumerate() {
					if idx != 0 {
						f.write_str(", ")?;
					}
					write!(f, "{port}: {}", GeneralFloat::short(*cycles))?;
				}
				Ok(())
			});
			writeln!(self.writer, "Ports and cycles: {ports}")?;
			writeln!(self.writer, "Uops: {}", GeneralFloat::short(report.uops))?;

			let unit = self.unit.unwrap_or(Unit::CyclesPerCacheline);
			writeln!(self.writer, "Throughput: {}", unit.convert(report.cl_throughput, ctx))?;
			writeln!(self.writer, "Latency: {}", unit.convert(report.cl_latency, ctx))?;
		}

		writeln!(self.writer, "T_nOL = {} cy/CL", GeneralFloat::short(report.t_nol))?;
		writeln!(self.writer, "T_OL = {} cy/CL", GeneralFloat::short(report.t_ol))
	}
}

impl<W: Write> Renderer for TextRenderer<W> {
	fn render(&mut self, data: &Data) -> Result<(), anyhow::Error> {
		tracing::debug!(kernel = ?data.kernel, machine = ?data.machine, "Rendering report");
		let res = match &data.result {
			ModelResult::Ecm(result) => self.render_ecm(result, &data.unit_context),
			ModelResult::Data(report) => self.render_data(report, &data.unit_context),
			ModelResult::Cpu(report) => self.render_cpu(report, &data.unit_context),
		};
		res.context("Unable to write report")?;
		self.writer.flush().context("Unable to flush report")
	}
}
