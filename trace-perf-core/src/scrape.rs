//! Text scrapers for the harness output files.
//!
//! Every scraper is a pure function over text already read from the device. A
//! marker line that is absent yields the metric's default; a marker line whose
//! value is not a number yields [`Error::Parse`] and the caller decides which
//! sentinel to record (see [`scrape_iteration`]).

use crate::error::{Error, Result};
use crate::power::PowerReading;
use crate::types::{Metric, TEST_PACKAGE};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use tracing::{debug, warn};

const WALL_TIME_MARKER: &str = "Mean result time";
const MISSING_EXTENSION_MARKER: &str = "Test skipped due to missing extension";
const PASSED_MARKER: &str = "[  PASSED  ]";

static PROC_TOTAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*Proc\s+(\d+)\s+total:\s*(\S+)").expect("static regex"));

/// Lines used for timing metrics: anything mentioning `Error` or `Frame` is per-frame noise.
pub fn timing_lines(text: &str) -> impl Iterator<Item = &str> {
	text.lines().filter(|l| !l.contains("Error") && !l.contains("Frame"))
}

fn second_to_last(line: &str) -> Option<&str> {
	let tokens: Vec<&str> = line.split_whitespace().collect();
	(tokens.len() >= 2).then(|| tokens[tokens.len() - 2])
}

fn value_token<'a>(what: &'static str, line: &'a str) -> Result<&'a str> {
	second_to_last(line).ok_or_else(|| Error::parse(what, line.trim()))
}

fn parse_f64(what: &'static str, token: &str) -> Result<f64> {
	if token.is_empty() { return Ok(0.0); }
	token.parse::<f64>().map_err(|_| Error::parse(what, token))
}

fn parse_u64(what: &'static str, token: &str) -> Result<u64> {
	if token.is_empty() { return Ok(0); }
	token.parse::<u64>().map_err(|_| Error::parse(what, token))
}

/// Outcome of the wall-time scrape. Non-numeric outcomes stay human-readable in the raw table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WallTime {
	/// Token reported on the `Mean result time` line.
	Measured(String),
	/// The test was skipped; holds the name of the missing capability.
	MissingExtension(String),
	/// The run passed but never reported a time.
	Missing,
	/// Neither a time nor a pass marker was found.
	Crashed,
}

impl WallTime {
	/// Numeric sample for aggregation; anything that is not a number becomes -1.
	pub fn sample(&self) -> f64 {
		match self {
			WallTime::Measured(t) => parse_f64("wall time", t).unwrap_or(-1.0),
			_ => -1.0,
		}
	}
}

impl fmt::Display for WallTime {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			WallTime::Measured(t) => f.write_str(t),
			WallTime::MissingExtension(ext) => f.write_str(ext),
			WallTime::Missing => f.write_str("missing"),
			WallTime::Crashed => f.write_str("crashed"),
		}
	}
}

pub fn wall_time(test_output: &str) -> WallTime {
	for line in timing_lines(test_output) {
		debug!("checking line: {line}");
		if line.contains(WALL_TIME_MARKER) {
			return WallTime::Measured(second_to_last(line).unwrap_or_default().to_string());
		}
		if line.contains(MISSING_EXTENSION_MARKER) {
			let ext = line.split_whitespace().last().unwrap_or_default().to_string();
			debug!("skipping test due to missing extension: {ext}");
			return WallTime::MissingExtension(ext);
		}
	}
	if timing_lines(test_output).any(|l| l.contains(PASSED_MARKER)) { WallTime::Missing } else { WallTime::Crashed }
}

fn first_marked_value<'a>(lines: impl Iterator<Item = &'a str>, marker: &str, what: &'static str) -> Result<Option<String>> {
	for line in lines {
		if line.contains(marker) { return value_token(what, line).map(|t| Some(t.to_string())); }
	}
	Ok(None)
}

/// GPU time per frame in ms; 0 when not reported.
pub fn gpu_time(test_output: &str) -> Result<f64> {
	match first_marked_value(test_output.lines(), "gpu_time", "gpu time")? {
		Some(t) => parse_f64("gpu time", &t),
		None => Ok(0.0),
	}
}

/// CPU time per frame in ms; 0 when not reported.
pub fn cpu_time(test_output: &str) -> Result<f64> {
	match first_marked_value(test_output.lines(), "cpu_time", "cpu time")? {
		Some(t) => parse_f64("cpu time", &t),
		None => Ok(0.0),
	}
}

pub fn frame_count(test_output: &str) -> Result<u64> {
	let count = match first_marked_value(timing_lines(test_output), "trial_steps", "frame count")? {
		Some(t) => parse_u64("frame count", &t)?,
		None => 0,
	};
	debug!("frame count: {count}");
	Ok(count)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcMemory {
	pub median: u64,
	pub peak: u64,
}

/// Process memory reported by the harness. The last matching line wins.
pub fn proc_memory(test_output: &str) -> Result<ProcMemory> {
	let mut median = "";
	let mut peak = "";
	for line in test_output.lines() {
		if line.contains("memory_median") {
			median = value_token("memory median", line)?;
		} else if line.contains("memory_max") {
			peak = value_token("memory max", line)?;
		}
	}
	Ok(ProcMemory { median: parse_u64("memory median", median)?, peak: parse_u64("memory max", peak)? })
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GpuMemory {
	pub sustained: u64,
	pub peak: u64,
}

/// GPU memory of the test process from periodic snapshots.
///
/// The sampler output repeats, once per period:
///
/// ```text
/// time_elapsed: 9
/// com.android.angle.test:test_process 16513
/// Memory snapshot for GPU 0:
/// Global total: 516833280
/// Proc 504 total: 170385408
/// Proc 16513 total: 348479488
/// ```
///
/// `sustained` averages the samples taken at or after half of `run_duration_secs`,
/// `peak` is the maximum over all samples.
pub fn gpu_memory(snapshots: &str, run_duration_secs: f64) -> Result<GpuMemory> {
	let midpoint = run_duration_secs / 2.0;
	let mut elapsed = 0.0;
	let mut pid: Option<&str> = None;
	let mut all: Vec<u64> = Vec::new();
	let mut sustained: Vec<u64> = Vec::new();
	let test_process = format!("{TEST_PACKAGE}:test_process");

	for line in snapshots.lines().filter(|l| !l.trim().is_empty()) {
		debug!("checking line: {line}");
		if line.contains("time_elapsed") {
			elapsed = parse_f64("time elapsed", line.split_whitespace().last().unwrap_or_default())?;
			continue;
		}
		if line.contains(TEST_PACKAGE) {
			// The instrumentation host shares the package name; only the test process counts.
			let mut tokens = line.split_whitespace();
			if tokens.next() == Some(test_process.as_str()) {
				pid = tokens.last();
				debug!("test process: {pid:?}");
			}
			continue;
		}
		let Some(current) = pid else { continue };
		let Some(caps) = PROC_TOTAL.captures(line) else { continue };
		if &caps[1] != current { continue; }
		let bytes = parse_u64("gpu memory", &caps[2])?;
		all.push(bytes);
		if elapsed >= midpoint {
			sustained.push(bytes);
		}
	}

	let peak = all.iter().copied().max().unwrap_or(0);
	let sustained = if sustained.is_empty() {
		0
	} else {
		(sustained.iter().map(|&b| b as f64).sum::<f64>() / sustained.len() as f64) as u64
	};
	debug!("gpu_mem_sustained = {sustained}, gpu_mem_peak = {peak}");
	Ok(GpuMemory { sustained, peak })
}

/// All measurements of one (trace, renderer, iteration).
#[derive(Debug, Clone, PartialEq)]
pub struct IterationSample {
	pub wall_time: WallTime,
	pub gpu_time: f64,
	pub cpu_time: f64,
	pub gpu_power: f64,
	pub cpu_power: f64,
	pub gpu_mem_sustained: u64,
	pub gpu_mem_peak: u64,
	pub proc_mem_median: u64,
	pub proc_mem_peak: u64,
	pub frame_count: u64,
}

impl IterationSample {
	pub fn value(&self, metric: Metric) -> f64 {
		match metric {
			Metric::WallTime => self.wall_time.sample(),
			Metric::GpuTime => self.gpu_time,
			Metric::CpuTime => self.cpu_time,
			Metric::GpuPower => self.gpu_power,
			Metric::CpuPower => self.cpu_power,
			Metric::GpuMemSustained => self.gpu_mem_sustained as f64,
			Metric::GpuMemPeak => self.gpu_mem_peak as f64,
			Metric::ProcMemMedian => self.proc_mem_median as f64,
			Metric::ProcMemPeak => self.proc_mem_peak as f64,
		}
	}
}

/// What was read back from the device after one invocation.
#[derive(Debug, Clone, Default)]
pub struct IterationOutput<'a> {
	pub test_output: &'a str,
	/// GPU memory snapshots, when memory collection ran.
	pub gpumem_output: Option<&'a str>,
	/// Wall-clock duration of the invocation, in seconds.
	pub run_duration_secs: f64,
	/// GPU time is only meaningful in vsync mode.
	pub scrape_gpu_time: bool,
	pub power: Option<PowerReading>,
}

fn or_zero<T: Default>(metric: &str, r: Result<T>) -> T {
	r.unwrap_or_else(|e| {
		warn!("{metric}: {e}; recording 0");
		T::default()
	})
}

/// Scrape everything; parse failures degrade to sentinels instead of aborting the run.
pub fn scrape_iteration(out: &IterationOutput<'_>) -> IterationSample {
	let wall_time = wall_time(out.test_output);
	let gpu_time = if out.scrape_gpu_time { or_zero("gpu_time", gpu_time(out.test_output)) } else { 0.0 };
	let cpu_time = or_zero("cpu_time", cpu_time(out.test_output));
	let frame_count = or_zero("frame_count", frame_count(out.test_output));
	let power = out.power.unwrap_or_default();
	let (gpu_mem, proc_mem) = match out.gpumem_output {
		Some(snapshots) => (
			or_zero("gpu_mem", gpu_memory(snapshots, out.run_duration_secs)),
			or_zero("proc_mem", proc_memory(out.test_output)),
		),
		None => (GpuMemory::default(), ProcMemory::default()),
	};
	IterationSample {
		wall_time,
		gpu_time,
		cpu_time,
		gpu_power: power.gpu_watts,
		cpu_power: power.cpu_watts,
		gpu_mem_sustained: gpu_mem.sustained,
		gpu_mem_peak: gpu_mem.peak,
		proc_mem_median: proc_mem.median,
		proc_mem_peak: proc_mem.peak,
		frame_count,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const OUT: &str = "\
[ RUN      ] TraceTest.trex_200
Frame 12 Error: swap interval ignored
running test name: \"TraceTest\", backend: \"_native\", story: \"trex_200\"
TraceTest_native.trial_steps: story= 1250 count
TraceTest_native.gpu_time: story= 1.0423 ms
TraceTest_native.cpu_time: story= 0.8812 ms
TraceTest_native.memory_median: story= 123456 B
TraceTest_native.memory_max: story= 234567 B
Mean result time: 1.2793 ms
[  PASSED  ] 1 test.
";

	#[test]
	fn wall_time_found() {
		assert_eq!(wall_time(OUT), WallTime::Measured("1.2793".into()));
		assert_eq!(wall_time(OUT).sample(), 1.2793);
	}

	#[test]
	fn wall_time_missing_or_crashed() {
		let passed = "[ RUN ] TraceTest.x\n[  PASSED  ] 1 test.\n";
		assert_eq!(wall_time(passed), WallTime::Missing);
		assert_eq!(wall_time(passed).to_string(), "missing");
		let crashed = "[ RUN ] TraceTest.x\nSegmentation fault\n";
		assert_eq!(wall_time(crashed), WallTime::Crashed);
		assert_eq!(wall_time(crashed).to_string(), "crashed");
		assert_eq!(wall_time(crashed).sample(), -1.0);
	}

	#[test]
	fn wall_time_missing_extension() {
		let skipped = "Test skipped due to missing extension: GL_EXT_foo\n[  PASSED  ] 1 test.\n";
		let w = wall_time(skipped);
		assert_eq!(w, WallTime::MissingExtension("GL_EXT_foo".into()));
		assert_eq!(w.to_string(), "GL_EXT_foo");
		assert_eq!(w.sample(), -1.0);
	}

	#[test]
	fn wall_time_marker_hidden_by_frame_filter() {
		// Lines with "Frame" are dropped before the wall-time search.
		let text = "Frame Mean result time: 5.0 ms\n";
		assert_eq!(wall_time(text), WallTime::Crashed);
	}

	#[test]
	fn per_frame_times() {
		assert_eq!(gpu_time(OUT).unwrap(), 1.0423);
		assert_eq!(cpu_time(OUT).unwrap(), 0.8812);
		assert_eq!(gpu_time("nothing here").unwrap(), 0.0);
		assert!(matches!(cpu_time("cpu_time: story= abc ms"), Err(Error::Parse { .. })));
	}

	#[test]
	fn frames_and_process_memory() {
		assert_eq!(frame_count(OUT).unwrap(), 1250);
		assert_eq!(proc_memory(OUT).unwrap(), ProcMemory { median: 123456, peak: 234567 });
		assert_eq!(proc_memory("").unwrap(), ProcMemory::default());
	}

	#[test]
	fn gpu_memory_sustained_after_midpoint() {
		let snaps = "\
time_elapsed: 1
com.android.angle.test:test_process 111
Memory snapshot for GPU 0:
Global total: 9999
Proc 111 total: 100

time_elapsed: 9
com.android.angle.test:test_process 222
Memory snapshot for GPU 0:
Global total: 9999
Proc 111 total: 50
Proc 222 total: 300
";
		let m = gpu_memory(snaps, 10.0).unwrap();
		assert_eq!(m, GpuMemory { sustained: 300, peak: 300 });
	}

	#[test]
	fn gpu_memory_ignores_instrumentation_host() {
		let snaps = "\
time_elapsed: 6
com.android.angle.test:test_process 500
com.android.angle.test 900
Proc 500 total: 348479488
Proc 900 total: 1024
";
		assert_eq!(gpu_memory(snaps, 10.0).unwrap(), GpuMemory { sustained: 348479488, peak: 348479488 });
	}

	#[test]
	fn gpu_memory_without_process_is_zero() {
		let snaps = "time_elapsed: 3\nGlobal total: 10\nProc 5 total: 10\n";
		assert_eq!(gpu_memory(snaps, 4.0).unwrap(), GpuMemory::default());
	}

	#[test]
	fn gpu_memory_averages_sustained_samples() {
		let snaps = "\
time_elapsed: 0
com.android.angle.test:test_process 7
Proc 7 total: 1000
time_elapsed: 2
Proc 7 total: 10
time_elapsed: 3
Proc 7 total: 21
";
		assert_eq!(gpu_memory(snaps, 4.0).unwrap(), GpuMemory { sustained: 15, peak: 1000 });
	}

	#[test]
	fn scrape_iteration_degrades() {
		let text = "cpu_time: story= bogus ms\n";
		let out = IterationOutput {
			test_output: text,
			gpumem_output: None,
			run_duration_secs: 1.0,
			scrape_gpu_time: true,
			power: Some(PowerReading { gpu_watts: 1.5, cpu_watts: 2.5 }),
		};
		let s = scrape_iteration(&out);
		assert_eq!(s.wall_time, WallTime::Crashed);
		assert_eq!(s.value(Metric::WallTime), -1.0);
		assert_eq!(s.cpu_time, 0.0);
		assert_eq!(s.gpu_power, 1.5);
		assert_eq!(s.value(Metric::CpuPower), 2.5);
	}

	#[test]
	fn scrape_iteration_skips_gpu_time_without_vsync() {
		let out = IterationOutput { test_output: OUT, scrape_gpu_time: false, ..Default::default() };
		let s = scrape_iteration(&out);
		assert_eq!(s.gpu_time, 0.0);
		assert_eq!(s.proc_mem_peak, 0);
		assert_eq!(s.frame_count, 1250);
	}
}
