//! Execution-Cache-Memory simulator (`ecmsim`)

// Modules
mod args;

// Imports
use {
	self::args::{Args, SubCmd},
	anyhow::Context,
	clap::Parser,
	ecmsim::{
		data::{Data, ModelResult},
		report::{Renderer, TextRenderer},
		CacheTrafficEstimator,
		CacheTrafficReport,
		Kernel,
		KernelDescription,
		MachineModel,
		PortPressureEstimator,
		PortPressureOptions,
		UnitContext,
	},
	ecmsim_util::logger,
	std::{fs, io},
};

fn main() -> Result<(), anyhow::Error> {
	// Get arguments
	let args = Args::parse();
	logger::pre_init::debug(format!("Args: {args:?}"));

	// Initialize logging
	logger::init(args.log_file.as_deref(), args.log_file_append);

	let (model, analysis) = match args.sub_cmd {
		SubCmd::Ecm(analysis) => (Model::Ecm, analysis),
		SubCmd::EcmData(analysis) => (Model::Data, analysis),
		SubCmd::EcmCpu(analysis) => (Model::Cpu, analysis),
	};

	// Read the machine and kernel
	let machine = MachineModel::from_path(&analysis.machine_file).context("Unable to load machine")?;
	let kernel = KernelDescription::from_path(&analysis.kernel_file).context("Unable to load kernel")?;
	tracing::info!(kernel = ?kernel.name(), machine = ?machine.model_name, ?model, "Analyzing");

	let port_estimator = PortPressureEstimator::new(PortPressureOptions {
		asm_block:         analysis.asm_block,
		pointer_increment: analysis.asm_increment,
		latency:           analysis.latency,
	});
	let measure_data = || -> Result<CacheTrafficReport, anyhow::Error> {
		let report = CacheTrafficEstimator::default()
			.measure(&kernel, &machine)
			.context("Unable to measure cache traffic")?;
		tracing::info!("Measured cache traffic");

		CacheTrafficEstimator::cost(&report, &machine).context("Unable to derive cache traffic cycles")
	};
	let measure_cpu = || {
		let report = port_estimator
			.measure(&kernel, &machine)
			.context("Unable to estimate port pressure")?;
		tracing::info!("Estimated port pressure");

		Ok::<_, anyhow::Error>(report)
	};

	// Then run the model
	let result = match model {
		Model::Ecm => {
			let cpu = measure_cpu()?;
			let data = measure_data()?;
			ModelResult::Ecm(ecmsim::combine(&cpu, &data).context("Unable to combine model")?)
		},
		Model::Data => ModelResult::Data(measure_data()?),
		Model::Cpu => ModelResult::Cpu(measure_cpu()?),
	};
	let data = Data {
		kernel: kernel.name().to_owned(),
		machine: machine.model_name.clone(),
		unit_context: UnitContext::new(&kernel, &machine),
		result,
	};

	TextRenderer::new(io::stdout().lock(), analysis.verbose, analysis.unit)
		.render(&data)
		.context("Unable to render report")?;

	if let Some(output_path) = &analysis.output_file {
		let output_file = fs::File::create(output_path).context("Unable to create output file")?;
		serde_json::to_writer_pretty(output_file, &data).context("Unable to write to output file")?;
		tracing::info!(?output_path, "Wrote output");
	}

	Ok(())
}

/// Model to run
#[derive(Clone, Copy, Debug)]
enum Model {
	Ecm,
	Data,
	Cpu,
}
