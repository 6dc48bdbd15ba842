//! Creates graphs from `ecmsim`'s output

// Modules
mod args;

// Imports
use {
	anyhow::Context,
	args::Args,
	clap::Parser,
	ecmsim::{
		data::{Data, ModelResult},
		model::CombinedResult,
		report::Renderer,
	},
	ecmsim_util::{logger, GeneralFloat},
	gnuplot::{AutoOption, AxesCommon, Caption, Coordinate, Figure, Tick},
	itertools::Itertools,
	std::path::PathBuf,
};

fn main() -> Result<(), anyhow::Error> {
	// Get arguments
	let args = Args::parse();
	logger::pre_init::debug(format!("Args: {args:?}"));

	// Initialize logging
	logger::init(args.log_file.as_deref(), args.log_file_append);

	// Then check the sub-command
	match args.sub_cmd {
		args::SubCmd::Ecm(cmd_args) => {
			let data = {
				let input_file = std::fs::File::open(&cmd_args.input_file).context("Unable to open input file")?;
				serde_json::from_reader::<_, Data>(input_file).context("Unable to parse input file")?
			};

			let mut renderer = PlotRenderer {
				output_file: cmd_args.output.file,
				width:       cmd_args.output.width,
				height:      cmd_args.output.height,
			};
			renderer.render(&data).context("Unable to render plot")?;
		},
	}

	Ok(())
}

/// Plot renderer
#[derive(Debug)]
struct PlotRenderer {
	output_file: PathBuf,
	width:       u32,
	height:      u32,
}

impl Renderer for PlotRenderer {
	fn render(&mut self, data: &Data) -> Result<(), anyhow::Error> {
		let ModelResult::Ecm(result) = &data.result else {
			anyhow::bail!("Only full model results can be plotted");
		};
		let bars = EcmBars::new(result);
		tracing::debug!(?bars, "Plotting");

		let mut fig = Figure::new();
		let axes = fig.axes2d();

		// Overlapping ports, one bar each
		let port_count = bars.ports.len();
		axes.boxes_set_width(
			(0..port_count).map(|idx| idx as f64),
			bars.ports.iter().map(|(_, cycles)| *cycles),
			std::iter::repeat(0.9).take(port_count),
			&[Caption("Overlapping ports")],
		);
		if let Some((_, t_ol)) = bars.ports.last() {
			axes.label(
				"T_OL",
				Coordinate::Axis((port_count - 1) as f64),
				Coordinate::Axis(t_ol / 2.0),
				&[],
			);
		}

		// `T_nOL` and transfers, stacked by drawing the taller bars first
		for (name, end) in bars.stack.iter().rev() {
			axes.boxes_set_width([port_count as f64], [*end], [0.9], &[Caption(name.as_str())]);
		}

		let ticks = bars
			.ports
			.iter()
			.map(|(port, _)| port.clone())
			.chain(["LD".to_owned()])
			.enumerate()
			.map(|(idx, label)| Tick::Major(idx as f64, AutoOption::Fix(label)))
			.collect::<Vec<_>>();
		axes.set_x_ticks_custom(ticks, &[], &[])
			.set_x_label("execution port", &[])
			.set_y_label("t [cy]", &[])
			.set_title(
				&format!(
					"{} on {}: {} cy/CL",
					data.kernel,
					data.machine,
					GeneralFloat::short(result.total_cycles)
				),
				&[],
			);

		let res = match self.output_file.extension().and_then(|ext| ext.to_str()) {
			Some("png") => fig.save_to_png(&self.output_file, self.width, self.height),
			Some("svg") => fig.save_to_svg(&self.output_file, self.width, self.height),
			ext => anyhow::bail!("Unsupported output extension {ext:?}, expected `png` or `svg`"),
		};
		res.map_err(|err| anyhow::anyhow!("Unable to save output file: {err:?}"))
	}
}

/// Bars of the ECM plot
#[derive(PartialEq, Debug)]
struct EcmBars {
	/// Overlapping ports, sorted by cycles
	ports: Vec<(String, f64)>,

	/// Cycle ladder, with the cumulative end of each entry
	stack: Vec<(String, f64)>,
}

impl EcmBars {
	fn new(result: &CombinedResult) -> Self {
		let ports = result
			.cpu
			.overlapping_ports
			.iter()
			.map(|port| (port.clone(), result.cpu.port_cycles.get(port).copied().unwrap_or(0.0)))
			.sorted_by(|(_, lhs), (_, rhs)| lhs.total_cmp(rhs))
			.collect();

		let stack = result
			.ladder
			.iter()
			.scan(0.0, |end, (name, cycles)| {
				*end += cycles;
				Some((name.clone(), *end))
			})
			.collect();

		Self { ports, stack }
	}
}
