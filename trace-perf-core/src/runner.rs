//! Trace / iteration / renderer loop.

use crate::config::{DeviceContext, RunConfig};
use crate::device::Device;
use crate::error::{Error, Result};
use crate::harness;
use crate::power::PowerSampler;
use crate::report::{metadata_row, raw_trace_name, ConsoleColumns, RawWriter, SampleTable, SummaryLayout, SummaryWriter, TraceReportRow};
use crate::scrape::{scrape_iteration, IterationOutput, IterationSample};
use crate::thermal;
use crate::traces::{glob_filter, load_trace_list, test_name};
use crate::types::{Renderer, RunMode};
use console::style;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// A trace whose run was abandoned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedTrace {
	pub trace: String,
	pub error: String,
}

#[derive(Debug, Default)]
pub struct RunSummary {
	/// Traces written to the summary table.
	pub completed: usize,
	pub failed: Vec<FailedTrace>,
}

impl RunSummary {
	pub fn is_success(&self) -> bool { self.failed.is_empty() }
}

pub struct Runner<D: Device + 'static> {
	device: Arc<D>,
	cfg: RunConfig,
	ctx: DeviceContext,
	invocation_args: String,
}

impl<D: Device + 'static> Runner<D> {
	/// `invocation_args` is recorded in the summary metadata row.
	pub fn new(device: Arc<D>, cfg: RunConfig, ctx: DeviceContext, invocation_args: impl Into<String>) -> Self {
		Self { device, cfg, ctx, invocation_args: invocation_args.into() }
	}

	pub fn config(&self) -> &RunConfig { &self.cfg }

	pub async fn run(&self) -> Result<RunSummary> {
		let cfg = &self.cfg;
		let device = self.device.as_ref();
		let traces = load_trace_list(cfg.trace_list_path())?;
		let selected = glob_filter(&traces, &cfg.filter)?;
		if selected.is_empty() {
			warn!("no traces match filter {:?}", cfg.filter);
		}

		tokio::fs::create_dir_all(&cfg.output_dir).await?;
		let raw_name = cfg.raw_data_filename();
		let mut raw = RawWriter::create(cfg.output_dir.join(&raw_name))?;
		let columns = ConsoleColumns::new(cfg.mode, cfg.wall_time_only);
		println!("{}", columns.header());

		let fingerprint = harness::android_fingerprint(device).await?;
		let angle_version = match &cfg.angle_version {
			Some(v) => v.clone(),
			None => harness::angle_version().await?,
		};
		let metadata = metadata_row(&fingerprint, &angle_version, &raw_name, &self.invocation_args);
		let layout = SummaryLayout::for_selection(cfg.renderer);
		let mut summary = SummaryWriter::create(cfg.output_dir.join(cfg.summary_filename()), layout, &metadata)?;

		if cfg.custom_throttling_temp.is_some() {
			thermal::set_vendor_thermal_control(device, true).await?;
		}
		if cfg.memory {
			harness::install_gpumem_script(device).await?;
		}

		let renderers = cfg.renderer.renderers();
		let mut result = RunSummary::default();
		for entry in selected {
			let names: Vec<&str> = renderers.iter().map(Renderer::as_str).collect();
			println!(
				"\n{}\n",
				style(format!(
					"Starting run for {entry} loopcount {} with [{}] at {}",
					cfg.loop_count,
					names.join(", "),
					chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
				))
				.bold()
			);
			match self.run_trace(test_name(entry), &renderers, &columns, &mut raw).await {
				Ok(row) => {
					let number = summary.write(&row)?;
					println!("{}", layout.table(number, &row)?);
					result.completed += 1;
				}
				Err(e) => {
					error!("trace {entry} failed: {e}");
					result.failed.push(FailedTrace { trace: entry.to_string(), error: e.to_string() });
				}
			}
		}
		info!("{} traces completed, {} failed", result.completed, result.failed.len());
		Ok(result)
	}

	async fn run_trace(&self, test: &str, renderers: &[Renderer], columns: &ConsoleColumns, raw: &mut RawWriter) -> Result<TraceReportRow> {
		let mut samples = SampleTable::new();
		for _ in 0..self.cfg.loop_count {
			for &renderer in renderers {
				let sample = self.run_iteration(test, renderer).await?;
				let name = raw_trace_name(self.cfg.mode, renderer, test);
				samples.push(renderer, &sample);
				raw.write(&name, &sample)?;
				println!("{}", columns.line(&name, &sample));
				self.backoff().await?;
			}
			println!();
		}
		samples.aggregate(test, renderers, self.cfg.loop_count)
	}

	async fn run_iteration(&self, test: &str, renderer: Renderer) -> Result<IterationSample> {
		let cfg = &self.cfg;
		let ctx = &self.ctx;
		let device = self.device.as_ref();

		harness::apply_renderer(device, renderer, &cfg.angle_package).await?;
		harness::cleanup(device, ctx).await?;
		harness::clear_blob_cache(device, ctx).await?;

		let sampler = match (cfg.power, cfg.fixed_time) {
			(true, Some(secs)) => {
				// The sampler waits for a fresh warmup line.
				device.adb(&["logcat", "-c"]).await?;
				Some(PowerSampler::start(self.device.clone(), Duration::from_secs_f64(secs)))
			}
			(true, None) => return Err(Error::config("--power requires --fixedtime")),
			_ => None,
		};

		let screenshot_dir = if cfg.wants_screenshots() { Some(harness::make_temp_dir(device).await?) } else { None };
		let gpumem = if cfg.memory {
			Some(harness::start_gpumem_sampler(device, ctx, cfg.memory_poll_interval_secs).await?)
		} else {
			None
		};

		debug!("running {test} on {renderer}");
		let command = harness::instrument_command(test, cfg, ctx, screenshot_dir.as_deref());
		let elapsed = harness::run_trace(device, &command).await;

		if let Some(process) = gpumem {
			debug!("killing gpumem sampler");
			process.kill().await;
		}
		if let Some(dir) = &screenshot_dir {
			let dest = cfg.screenshot_dir.as_deref().unwrap_or(Path::new("."));
			let pulled = harness::pull_screenshot(device, dir, renderer, dest).await;
			harness::remove_dir(device, dir).await?;
			pulled?;
		}
		let power = match sampler {
			Some(s) => s.finish(Duration::from_secs_f64(cfg.power_join_timeout_secs)).await,
			None => None,
		};
		let elapsed = elapsed?;

		let test_output = harness::read_test_output(device, ctx).await.unwrap_or_else(|e| {
			warn!("no test output for {test} on {renderer}: {e}");
			String::new()
		});
		let gpumem_output = if cfg.memory {
			Some(harness::read_gpumem_output(device, ctx).await.unwrap_or_else(|e| {
				warn!("no gpu memory snapshots for {test} on {renderer}: {e}");
				String::new()
			}))
		} else {
			None
		};

		Ok(scrape_iteration(&IterationOutput {
			test_output: &test_output,
			gpumem_output: gpumem_output.as_deref(),
			run_duration_secs: elapsed.as_secs_f64(),
			scrape_gpu_time: cfg.mode == RunMode::Vsync,
			power,
		}))
	}

	/// Pause before the next iteration to let the device cool down or recharge.
	async fn backoff(&self) -> Result<()> {
		let device = self.device.as_ref();
		if self.cfg.sleep_secs > 0 {
			tokio::time::sleep(Duration::from_secs(self.cfg.sleep_secs)).await;
		}
		if let Some(limit) = self.cfg.custom_throttling_temp {
			thermal::sleep_until_temps_below(device, limit).await?;
		}
		if let Some(limit) = self.cfg.custom_throttling_thermalservice_temp {
			thermal::sleep_until_temps_below_thermalservice(device, limit).await?;
		}
		if let Some(level) = self.cfg.min_battery_level {
			thermal::sleep_until_battery_level(device, level).await?;
		}
		Ok(())
	}
}

/// Undo every device setting a run may have changed. Every step is attempted.
pub async fn restore_device_settings<D: Device + ?Sized>(device: &D, cfg: &RunConfig) -> Result<()> {
	let thermal = if cfg.custom_throttling_temp.is_some() {
		thermal::set_vendor_thermal_control(device, false).await
	} else {
		Ok(())
	};
	let drivers = harness::restore_driver_settings(device).await;
	thermal.and(drivers)
}
