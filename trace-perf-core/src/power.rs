//! GPU/CPU power measured from the on-device energy meters while a trace runs.

use crate::device::Device;
use crate::error::{Error, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

const ENERGY_VALUE_CMD: &str = "cat /sys/bus/iio/devices/iio:device*/energy_value";
/// Logged by the harness once warmup is over and measured frames begin.
const WARMUP_DONE_MARKER: &str = "running test name";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rail { Gpu, BigCpu, MidCpu, LittleCpu }

static RAILS: Lazy<Vec<(Regex, Rail)>> = Lazy::new(|| {
	[
		(r"S2S_VDD_G3D\b|S2S_VDD_GPU\b", Rail::Gpu),
		(r"S\d+M_VDD_CPUCL2\b|S2M_VDD_CPU2\b", Rail::BigCpu),
		(r"S\d+M_VDD_CPUCL1\b|S3M_VDD_CPU1\b", Rail::MidCpu),
		(r"S\d+M_VDD_CPUCL0\b|S4M_VDD_CPU\b", Rail::LittleCpu),
	]
	.into_iter()
	.map(|(re, rail)| (Regex::new(re).expect("static regex"), rail))
	.collect()
});

/// Accumulated energy per rail, in µWs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PowerSnapshot {
	pub gpu: u64,
	pub big_cpu: u64,
	pub mid_cpu: u64,
	pub little_cpu: u64,
}

impl PowerSnapshot {
	fn slot(&mut self, rail: Rail) -> &mut u64 {
		match rail {
			Rail::Gpu => &mut self.gpu,
			Rail::BigCpu => &mut self.big_cpu,
			Rail::MidCpu => &mut self.mid_cpu,
			Rail::LittleCpu => &mut self.little_cpu,
		}
	}

	/// Parse `energy_value` output. Channel order does not matter:
	///
	/// ```text
	/// t=16086645
	/// CH3(T=16086645)[S2M_VDD_CPUCL2], 124265856
	/// CH4(T=16086645)[S3M_VDD_CPUCL1], 170096352
	/// ```
	pub fn parse(text: &str) -> Result<Self> {
		let mut snap = Self::default();
		for line in text.lines() {
			for (re, rail) in RAILS.iter() {
				if !re.is_match(line) { continue; }
				let token = line.split_whitespace().nth(1).unwrap_or_default();
				let value: u64 = token.parse().map_err(|_| Error::parse("energy value", token))?;
				debug!("power metric {} ({rail:?}): {value}", re.as_str());
				let slot = snap.slot(*rail);
				if *slot != 0 { return Err(Error::power(format!("duplicate power metric: {} ({rail:?})", re.as_str()))); }
				*slot = value;
			}
		}
		for (re, rail) in RAILS.iter() {
			if *snap.slot(*rail) == 0 { return Err(Error::power(format!("power metric not found: {} ({rail:?})", re.as_str()))); }
		}
		Ok(snap)
	}

	pub async fn read<D: Device + ?Sized>(device: &D) -> Result<Self> {
		Self::parse(&device.shell(ENERGY_VALUE_CMD).await?)
	}

	pub fn gpu_delta(&self, start: &Self) -> i64 { self.gpu as i64 - start.gpu as i64 }

	pub fn cpu_delta(&self, start: &Self) -> i64 {
		(self.big_cpu as i64 - start.big_cpu as i64)
			+ (self.mid_cpu as i64 - start.mid_cpu as i64)
			+ (self.little_cpu as i64 - start.little_cpu as i64)
	}
}

/// Average power over the measured window, in W.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PowerReading {
	pub gpu_watts: f64,
	pub cpu_watts: f64,
}

impl PowerReading {
	pub fn between(start: &PowerSnapshot, end: &PowerSnapshot, elapsed: Duration) -> Self {
		let dt = elapsed.as_secs_f64();
		if dt <= 0.0 { return Self::default(); }
		// µWs -> W
		Self {
			gpu_watts: end.gpu_delta(start) as f64 / dt / 1e6,
			cpu_watts: end.cpu_delta(start) as f64 / dt / 1e6,
		}
	}
}

async fn stopped(stop: &mut watch::Receiver<bool>) {
	// A dropped sender also means stop.
	let _ = stop.wait_for(|s| *s).await;
}

/// Block until the harness reports the end of warmup, the run stops, or the log ends.
pub async fn wait_for_warmup<D: Device + ?Sized>(device: &D, stop: &mut watch::Receiver<bool>) -> Result<()> {
	let mut log = device.watch_log(&["*:S", "ANGLE:I"]).await?;
	loop {
		tokio::select! {
			line = log.next_line() => match line {
				Some(l) if l.contains(WARMUP_DONE_MARKER) => return Ok(()),
				Some(_) => continue,
				None => {
					warn!("logcat terminated unexpectedly");
					return Ok(());
				}
			},
			_ = stopped(stop) => {
				warn!("test finished without logging to logcat");
				return Ok(());
			}
		}
	}
}

async fn measure<D: Device + ?Sized>(device: &D, fixed_time: Duration, mut stop: watch::Receiver<bool>) -> Result<PowerReading> {
	// Warmup has power spikes; start measuring after it.
	wait_for_warmup(device, &mut stop).await?;
	let start = PowerSnapshot::read(device).await?;
	debug!("starting power: {start:?}");

	// Stop a second early so test teardown is not measured.
	let window = fixed_time.saturating_sub(Duration::from_secs(1));
	let began = Instant::now();
	tokio::select! {
		_ = tokio::time::sleep(window) => {}
		_ = stopped(&mut stop) => warn!("test finished earlier than expected by the power sampler"),
	}

	let end = PowerSnapshot::read(device).await?;
	debug!("ending power: {end:?}");
	Ok(PowerReading::between(&start, &end, began.elapsed()))
}

/// Background power measurement for one benchmark invocation.
#[derive(Debug)]
pub struct PowerSampler {
	stop: watch::Sender<bool>,
	result: oneshot::Receiver<Result<PowerReading>>,
	task: JoinHandle<()>,
}

impl PowerSampler {
	pub fn start<D: Device + 'static>(device: Arc<D>, fixed_time: Duration) -> Self {
		let (stop, stop_rx) = watch::channel(false);
		let (tx, result) = oneshot::channel();
		let task = tokio::spawn(async move {
			let r = measure(device.as_ref(), fixed_time, stop_rx).await;
			let _ = tx.send(r);
		});
		Self { stop, result, task }
	}

	/// Signal stop and wait up to `timeout` for the reading. Never fails the run.
	pub async fn finish(self, timeout: Duration) -> Option<PowerReading> {
		let _ = self.stop.send(true);
		match tokio::time::timeout(timeout, self.result).await {
			Ok(Ok(Ok(reading))) => Some(reading),
			Ok(Ok(Err(e))) => {
				warn!("power collection failed: {e}");
				None
			}
			Ok(Err(_)) => {
				warn!("power sampler exited without a result");
				None
			}
			Err(_) => {
				warn!("power sampler did not terminate within {timeout:?}");
				self.task.abort();
				None
			}
		}
	}
}
