#![forbid(unsafe_code)]

use anyhow::{bail, Context};
use clap::{ArgGroup, Parser};
use std::path::PathBuf;
use std::sync::Arc;
use trace_perf_core::device::select_device;
use trace_perf_core::{restore_device_settings, AdbDevice, DeviceContext, RendererSelection, RunConfig, RunMode, Runner};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "trace-perf", version, about = "Benchmark trace replays on an Android device and compare renderers")]
#[command(group(ArgGroup::new("mode").args(["vsync", "offscreen"])))]
struct Cli {
	/// TOML file with run options (default: $TRACE_PERF_CONFIG, then ./trace-perf.toml)
	#[arg(long)]
	config: Option<PathBuf>,
	/// Trace filter, shell glob. Defaults to all
	#[arg(short, long)]
	filter: Option<String>,
	/// Logging level: trace, debug, info, warn or error
	#[arg(short, long = "log")]
	log: Option<String>,
	/// native, vulkan, default or both
	#[arg(long)]
	renderer: Option<RendererSelection>,
	/// Only print wall time per frame to the console
	#[arg(long = "walltimeonly")]
	wall_time_only: bool,
	/// Collect GPU and CPU power (requires --fixedtime)
	#[arg(long)]
	power: bool,
	/// Collect GPU memory and process memory
	#[arg(long)]
	memory: bool,
	/// Frames to run per trace
	#[arg(long = "maxsteps")]
	max_steps: Option<u32>,
	/// Seconds to run each trace after warmup
	#[arg(long = "fixedtime")]
	fixed_time: Option<f64>,
	/// Ask the harness to keep GPU work to a minimum
	#[arg(long = "minimizegpuwork")]
	minimize_gpu_work: bool,
	/// Names the output files: raw_data.<tag>.csv and summary.<tag>.csv
	#[arg(long)]
	output_tag: Option<String>,
	/// Directory for the output files
	#[arg(long)]
	output_dir: Option<PathBuf>,
	/// ANGLE revision recorded in the summary (default: from git)
	#[arg(long)]
	angle_version: Option<String>,
	/// Repetitions per trace
	#[arg(long)]
	loop_count: Option<usize>,
	/// adb serial of the device to use (default: $ANDROID_SERIAL)
	#[arg(long)]
	device: Option<String>,
	/// Seconds to sleep after every run
	#[arg(long = "sleep")]
	sleep_secs: Option<u64>,
	/// Wait between runs until IThermal skin temperatures drop below this
	#[arg(long)]
	custom_throttling_temp: Option<f64>,
	/// Wait between runs until thermalservice temperatures drop below this
	#[arg(long)]
	custom_throttling_thermalservice_temp: Option<f64>,
	/// Wait between runs until the battery is charged to this level
	#[arg(long)]
	min_battery_level: Option<u32>,
	/// Package to load ANGLE from; `system` uses the libraries on the system image
	#[arg(long)]
	angle_package: Option<String>,
	/// Build directory containing gen/trace_list.json
	#[arg(long)]
	build_dir: Option<PathBuf>,
	/// Host directory for screenshots
	#[arg(long)]
	screenshot_dir: Option<PathBuf>,
	/// Frame to take a screenshot of
	#[arg(long)]
	screenshot_frame: Option<u32>,
	/// Frame rate limit passed to the harness
	#[arg(long)]
	fps_limit: Option<u32>,
	/// Run with vsync
	#[arg(long)]
	vsync: bool,
	/// Run offscreen
	#[arg(long)]
	offscreen: bool,
	/// Seconds between on-device GPU memory snapshots
	#[arg(long = "memory-poll-interval")]
	memory_poll_interval_secs: Option<f64>,
}

impl Cli {
	/// Flags override file and environment values.
	fn apply(&self, cfg: &mut RunConfig) {
		if let Some(v) = &self.filter { cfg.filter = v.clone(); }
		if let Some(v) = &self.log { cfg.log_level = v.to_lowercase(); }
		if let Some(v) = self.renderer { cfg.renderer = v; }
		if self.wall_time_only { cfg.wall_time_only = true; }
		if self.power { cfg.power = true; }
		if self.memory { cfg.memory = true; }
		if self.max_steps.is_some() { cfg.max_steps = self.max_steps; }
		if self.fixed_time.is_some() { cfg.fixed_time = self.fixed_time; }
		if self.minimize_gpu_work { cfg.minimize_gpu_work = true; }
		if let Some(v) = &self.output_tag { cfg.output_tag = v.clone(); }
		if let Some(v) = &self.output_dir { cfg.output_dir = v.clone(); }
		if self.angle_version.is_some() { cfg.angle_version = self.angle_version.clone(); }
		if let Some(v) = self.loop_count { cfg.loop_count = v; }
		if self.device.is_some() { cfg.device = self.device.clone(); }
		if let Some(v) = self.sleep_secs { cfg.sleep_secs = v; }
		if self.custom_throttling_temp.is_some() { cfg.custom_throttling_temp = self.custom_throttling_temp; }
		if self.custom_throttling_thermalservice_temp.is_some() {
			cfg.custom_throttling_thermalservice_temp = self.custom_throttling_thermalservice_temp;
		}
		if self.min_battery_level.is_some() { cfg.min_battery_level = self.min_battery_level; }
		if let Some(v) = &self.angle_package { cfg.angle_package = v.clone(); }
		if let Some(v) = &self.build_dir { cfg.build_dir = v.clone(); }
		if self.screenshot_dir.is_some() { cfg.screenshot_dir = self.screenshot_dir.clone(); }
		if self.screenshot_frame.is_some() { cfg.screenshot_frame = self.screenshot_frame; }
		if self.fps_limit.is_some() { cfg.fps_limit = self.fps_limit; }
		if self.vsync { cfg.mode = RunMode::Vsync; }
		if self.offscreen { cfg.mode = RunMode::Offscreen; }
		if let Some(v) = self.memory_poll_interval_secs { cfg.memory_poll_interval_secs = v; }
	}
}

/// Invocation arguments as recorded in the summary, without the output tag.
fn logged_args(args: &[String]) -> String {
	let mut kept = Vec::new();
	let mut iter = args.iter();
	while let Some(a) = iter.next() {
		if a == "--output-tag" {
			iter.next();
		} else if !a.starts_with("--output-tag=") {
			kept.push(a.as_str());
		}
	}
	kept.join(" ")
}

fn init_tracing(level: &str) {
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
	tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).with_target(false).init();
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
	let cli = Cli::parse();
	let args: Vec<String> = std::env::args().skip(1).collect();

	// Defaults, then file, then environment, then flags.
	let mut cfg = RunConfig::discover(cli.config.as_deref()).context("loading configuration")?;
	cfg.apply_env();
	cli.apply(&mut cfg);
	cfg.validate()?;
	init_tracing(&cfg.log_level);

	let connected = AdbDevice::connected_serials().await.context("listing devices with adb")?;
	let env_serial = std::env::var("ANDROID_SERIAL").ok();
	let requested = cli.device.as_deref().or(cfg.device.as_deref().filter(|d| Some(*d) != env_serial.as_deref()));
	let serial = select_device(&connected, requested, env_serial.as_deref())?;
	let device = Arc::new(AdbDevice::new(serial));
	let ctx = DeviceContext::discover(device.as_ref()).await.context("reading the current device user")?;

	let runner = Runner::new(device.clone(), cfg.clone(), ctx, logged_args(&args));
	let outcome = tokio::select! {
		r = runner.run() => Some(r),
		_ = tokio::signal::ctrl_c() => {
			warn!("interrupted");
			None
		}
	};

	if let Err(e) = restore_device_settings(device.as_ref(), &cfg).await {
		error!("failed to restore device settings: {e}");
	}

	match outcome {
		Some(Ok(summary)) if summary.is_success() => {
			info!("{} traces completed", summary.completed);
			Ok(())
		}
		Some(Ok(summary)) => {
			for f in &summary.failed {
				error!("{}: {}", f.trace, f.error);
			}
			bail!("{} of {} traces failed", summary.failed.len(), summary.failed.len() + summary.completed)
		}
		Some(Err(e)) => Err(e.into()),
		None => bail!("interrupted"),
	}
}
