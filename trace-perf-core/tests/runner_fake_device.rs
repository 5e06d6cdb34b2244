#![forbid(unsafe_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use trace_perf_core::device::{BackgroundProcess, LogWatcher};
use trace_perf_core::{Device, DeviceContext, Error, Renderer, RendererSelection, Result, RunConfig, Runner};

/// Answers like a phone running the trace tests: the wall time reported for each run
/// depends on which driver the settings currently force.
#[derive(Default)]
struct FakeDevice {
	state: Mutex<State>,
	/// The memory sampler never wrote its output file.
	no_gpumem_file: bool,
}

#[derive(Default)]
struct State {
	driver: String,
	runs: HashMap<String, usize>,
	commands: Vec<String>,
}

const NATIVE_TIMES: [&str; 3] = ["2.0", "1.0", "3.0"];
const ANGLE_TIMES: [&str; 3] = ["4.0", "4.0", "4.0"];

const GPUMEM: &str = "\
time_elapsed: 0
com.android.angle.test:test_process 42
Proc 7 total: 99999
Proc 42 total: 3000
time_elapsed: 1
com.android.angle.test:test_process 42
Proc 42 total: 3000
";

impl FakeDevice {
	fn commands(&self) -> Vec<String> { self.state.lock().unwrap().commands.clone() }

	fn answer(&self, cmd: &str) -> Result<String> {
		let mut st = self.state.lock().unwrap();
		st.commands.push(cmd.to_string());
		if let Some(v) = cmd.strip_prefix("settings put global angle_gl_driver_selection_values ") {
			st.driver = v.to_string();
		}
		if cmd.starts_with("am instrument") {
			if cmd.contains("TraceTest.broken_trace ") {
				return Err(Error::device("instrumentation died"));
			}
			let driver = st.driver.clone();
			*st.runs.entry(driver).or_default() += 1;
			return Ok("INSTRUMENTATION_CODE: -1\n".into());
		}
		if cmd.ends_with("/out.txt") && cmd.starts_with("cat ") {
			let n = st.runs.get(&st.driver).copied().unwrap_or(1) - 1;
			let wall = if st.driver == "angle" { ANGLE_TIMES[n % 3] } else { NATIVE_TIMES[n % 3] };
			return Ok(format!(
				"running test name: \"TraceTest\"\n\
				 TraceTest.trial_steps: story= 500 count\n\
				 TraceTest.cpu_time: story= 0.5 ms\n\
				 TraceTest.memory_median: story= 2048 B\n\
				 TraceTest.memory_max: story= 4096 B\n\
				 Mean result time: {wall} ms\n\
				 [  PASSED  ] 1 test.\n"
			));
		}
		if cmd.ends_with("/gpumem.txt") && cmd.starts_with("cat ") {
			if self.no_gpumem_file {
				return Err(Error::device("cat: gpumem.txt: No such file or directory"));
			}
			return Ok(GPUMEM.into());
		}
		if cmd == "getprop ro.build.fingerprint" {
			return Ok("google/oriole/oriole:14/UQ1A/1:userdebug/dev-keys\n".into());
		}
		Ok(String::new())
	}
}

#[async_trait]
impl Device for FakeDevice {
	async fn adb(&self, args: &[&str]) -> Result<String> { self.answer(&args.join(" ")) }
	async fn shell(&self, cmd: &str) -> Result<String> { self.answer(cmd) }
	async fn shell_run_as(&self, cmd: &str) -> Result<String> { self.answer(cmd) }
	async fn spawn_shell(&self, cmd: &str) -> Result<BackgroundProcess> {
		self.answer(cmd)?;
		Ok(BackgroundProcess::detached())
	}
	async fn watch_log(&self, _filters: &[&str]) -> Result<LogWatcher> { Ok(LogWatcher::from_lines(Vec::new())) }
}

fn config(root: &Path, traces: &[&str]) -> RunConfig {
	let gen = root.join("build").join("gen");
	fs::create_dir_all(&gen).unwrap();
	fs::write(gen.join("trace_list.json"), serde_json::to_string(traces).unwrap()).unwrap();
	RunConfig {
		output_tag: "ci".into(),
		output_dir: root.join("out"),
		build_dir: root.join("build"),
		angle_version: Some("abc123".into()),
		loop_count: 3,
		..RunConfig::default()
	}
}

fn read_records(path: &Path) -> Vec<csv::StringRecord> {
	let mut rdr = csv::ReaderBuilder::new().has_headers(false).flexible(true).from_path(path).unwrap();
	rdr.records().map(|r| r.unwrap()).collect()
}

#[tokio::test]
async fn compares_renderers_and_skips_failing_trace() {
	let dir = tempfile::tempdir().unwrap();
	let mut cfg = config(dir.path(), &["trex_200", "broken_trace", "manhattan_10 v2"]);
	cfg.validate().unwrap();
	cfg.filter = "*".into();
	let device = Arc::new(FakeDevice::default());
	let runner = Runner::new(device.clone(), cfg, DeviceContext::for_user("0"), "--renderer both --loop-count 3");

	let summary = runner.run().await.unwrap();
	assert_eq!(summary.completed, 2);
	assert_eq!(summary.failed.len(), 1);
	assert_eq!(summary.failed[0].trace, "broken_trace");
	assert!(!summary.is_success());

	let out = dir.path().join("out");
	let raw = read_records(&out.join("raw_data.ci.csv"));
	// header + 2 traces x 3 loops x 2 renderers
	assert_eq!(raw.len(), 1 + 12);
	assert_eq!(&raw[0][0], "trace");
	assert_eq!(&raw[0][10], "frame_count");
	assert_eq!(&raw[1][0], "native_trex_200");
	assert_eq!(&raw[1][1], "2.0");
	assert_eq!(&raw[2][0], "vulkan_trex_200");
	assert_eq!(&raw[2][1], "4.0");
	assert_eq!(&raw[12][0], "vulkan_manhattan_10");

	let rows = read_records(&out.join("summary.ci.csv"));
	assert_eq!(rows.len(), 4);
	assert_eq!(
		&rows[0][0],
		"Android: google/oriole/oriole:14/UQ1A/1:userdebug/dev-keys\nANGLE: abc123\nSource: raw_data.ci.csv\nArgs: --renderer both --loop-count 3"
	);
	assert_eq!(&rows[1][6], "wall\ntime\ncompare");
	// native [2, 1, 3] trims to 2; angle [4, 4, 4] keeps one 4.
	let trex: Vec<&str> = rows[2].iter().collect();
	assert_eq!(&trex[..7], &["1", "trex_200", "2.000", "0.00%", "4.000", "0.00%", "50.00%"]);
	assert_eq!(&rows[3][0], "2");
	assert_eq!(&rows[3][1], "manhattan_10");

	let cmds = device.commands();
	assert!(cmds.iter().any(|c| c == "settings put global angle_debug_package com.android.angle.test"));
	assert!(!cmds.iter().any(|c| c.contains("logcat")));
}

#[tokio::test]
async fn single_renderer_with_memory() {
	let dir = tempfile::tempdir().unwrap();
	let mut cfg = config(dir.path(), &["trex_200", "aztec_ruins"]);
	cfg.filter = "trex*".into();
	cfg.renderer = RendererSelection::Single(Renderer::Native);
	cfg.memory = true;
	let device = Arc::new(FakeDevice::default());
	let runner = Runner::new(device.clone(), cfg, DeviceContext::for_user("0"), "--memory");

	let summary = runner.run().await.unwrap();
	assert!(summary.is_success());
	assert_eq!(summary.completed, 1);

	let out = dir.path().join("out");
	let raw = read_records(&out.join("raw_data.ci.csv"));
	assert_eq!(raw.len(), 1 + 3);
	// gpu_mem_sustained, gpu_mem_peak, proc_mem_median, proc_mem_peak, frame_count
	let first: Vec<&str> = raw[1].iter().collect();
	assert_eq!(&first[6..], &["3000", "3000", "2048", "4096", "500"]);

	let rows = read_records(&out.join("summary.ci.csv"));
	assert_eq!(rows[1].len(), 2 + 2 * 9);
	assert_eq!(&rows[1][2], "native\nwall\ntime\nper\nframe\n(ms)");
	assert_eq!(&rows[2][1], "trex_200");
	assert_eq!(&rows[2][12], "3000");

	let cmds = device.commands();
	assert!(cmds.iter().any(|c| c.starts_with("push ") && c.ends_with(" /data/local/tmp/gpumem.sh")));
	assert!(cmds.iter().any(|c| c == "sh /data/local/tmp/gpumem.sh 0.25 /data/user/0/com.android.angle.test/files"));
	assert!(!cmds.iter().any(|c| c.contains("aztec_ruins")));
}

#[tokio::test]
async fn missing_gpu_memory_file_records_zero() {
	let dir = tempfile::tempdir().unwrap();
	let mut cfg = config(dir.path(), &["trex_200"]);
	cfg.memory = true;
	let device = Arc::new(FakeDevice { no_gpumem_file: true, ..FakeDevice::default() });
	let runner = Runner::new(device.clone(), cfg, DeviceContext::for_user("0"), "--memory");

	let summary = runner.run().await.unwrap();
	assert!(summary.is_success(), "{:?}", summary.failed);
	assert_eq!(summary.completed, 1);

	let out = dir.path().join("out");
	let raw = read_records(&out.join("raw_data.ci.csv"));
	// header + 3 loops x 2 renderers
	assert_eq!(raw.len(), 1 + 6);
	for row in &raw[1..] {
		assert_eq!(&row[6], "0");
		assert_eq!(&row[7], "0");
		assert_eq!(&row[8], "2048");
	}
	let runs = device.commands().iter().filter(|c| c.starts_with("am instrument")).count();
	assert_eq!(runs, 6);
	assert_eq!(read_records(&out.join("summary.ci.csv")).len(), 3);
}
