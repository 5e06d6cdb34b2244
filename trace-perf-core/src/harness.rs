//! Device-side steps around one benchmark invocation of the trace test binary.

use crate::config::{DeviceContext, RunConfig};
use crate::device::{BackgroundProcess, Device};
use crate::error::{Error, Result};
use crate::types::{Renderer, TEST_PACKAGE};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, info};

const GPUMEM_SCRIPT: &str = include_str!("../scripts/gpumem.sh");
const GPUMEM_DEVICE_PATH: &str = "/data/local/tmp/gpumem.sh";
const RUNNER: &str = "org.chromium.native_test.NativeTestInstrumentationTestRunner";

/// `settings` commands that force the GLES driver for the test package.
pub fn renderer_settings(renderer: Renderer) -> Vec<String> {
	let force = |value: &str| {
		vec![
			format!("settings put global angle_gl_driver_selection_pkgs {TEST_PACKAGE}"),
			format!("settings put global angle_gl_driver_selection_values {value}"),
		]
	};
	match renderer {
		Renderer::Native => force("native"),
		Renderer::Vulkan => force("angle"),
		Renderer::Default => [
			"angle_debug_package",
			"angle_gl_driver_all_angle",
			"angle_gl_driver_selection_pkgs",
			"angle_gl_driver_selection_values",
		]
		.iter()
		.map(|k| format!("settings delete global {k}"))
		.collect(),
	}
}

/// `system` loads ANGLE from the system image; anything else names the APK to load it from.
pub fn angle_package_settings(package: &str) -> String {
	if package == "system" {
		"settings delete global angle_debug_package".to_string()
	} else {
		format!("settings put global angle_debug_package {package}")
	}
}

pub fn test_flags(test: &str, cfg: &RunConfig, screenshot_dir: Option<&str>) -> Vec<String> {
	let mut flags: Vec<String> = vec![
		format!("--gtest_filter=TraceTest.{test}"),
		"--use-gl=native".into(),
		"--verbose".into(),
		"--verbose-logging".into(),
	];
	if let Some(f) = cfg.mode.flag() { flags.push(f.into()); }
	if let Some(n) = cfg.max_steps { flags.extend(["--max-steps-performed".into(), n.to_string()]); }
	if let Some(t) = cfg.fixed_time { flags.extend(["--fixed-test-time-with-warmup".into(), t.to_string()]); }
	if cfg.minimize_gpu_work { flags.push("--minimize-gpu-work".into()); }
	if let Some(d) = screenshot_dir { flags.extend(["--screenshot-dir".into(), d.into()]); }
	if let Some(n) = cfg.screenshot_frame { flags.extend(["--screenshot-frame".into(), n.to_string()]); }
	if let Some(n) = cfg.fps_limit { flags.extend(["--fps-limit".into(), n.to_string()]); }
	flags
}

/// `am instrument` invocation that runs one trace and writes its stdout to the storage dir.
pub fn instrument_command(test: &str, cfg: &RunConfig, ctx: &DeviceContext, screenshot_dir: Option<&str>) -> String {
	let flags = test_flags(test, cfg, screenshot_dir).join(" ");
	format!(
		"am instrument -w \
		 -e {RUNNER}.StdoutFile {out} \
		 -e org.chromium.native_test.NativeTest.CommandLineFlags \"{flags}\" \
		 -e {RUNNER}.ShardNanoTimeout \"1000000000000000000\" \
		 -e {RUNNER}.NativeTestActivity {TEST_PACKAGE}.AngleUnitTestActivity \
		 {TEST_PACKAGE}/org.chromium.build.gtest_apk.NativeTestInstrumentationTestRunner",
		out = ctx.test_output(),
	)
}

pub async fn apply_renderer<D: Device + ?Sized>(device: &D, renderer: Renderer, angle_package: &str) -> Result<()> {
	if renderer == Renderer::Default {
		info!("deleting settings that force the GLES driver, letting the system load the default");
	}
	for cmd in renderer_settings(renderer) {
		device.shell(&cmd).await?;
	}
	device.shell(&angle_package_settings(angle_package)).await?;
	Ok(())
}

/// Remove results of the previous invocation.
pub async fn cleanup<D: Device + ?Sized>(device: &D, ctx: &DeviceContext) -> Result<()> {
	device.shell_run_as(&format!("rm -f {} {}", ctx.test_output(), ctx.gpumem_output())).await?;
	Ok(())
}

/// Drop the shader blob cache so it is not evicted mid-run.
pub async fn clear_blob_cache<D: Device + ?Sized>(device: &D, ctx: &DeviceContext) -> Result<()> {
	device.shell_run_as(&format!("rm -rf {}", ctx.cache_dir)).await?;
	Ok(())
}

pub async fn install_gpumem_script<D: Device + ?Sized>(device: &D) -> Result<()> {
	let local = std::env::temp_dir().join(format!("trace-perf-gpumem-{}.sh", std::process::id()));
	tokio::fs::write(&local, GPUMEM_SCRIPT).await?;
	let pushed = device.push(&local.to_string_lossy(), GPUMEM_DEVICE_PATH).await;
	if let Err(e) = tokio::fs::remove_file(&local).await { debug!("leaving {}: {e}", local.display()); }
	pushed?;
	Ok(())
}

pub async fn start_gpumem_sampler<D: Device + ?Sized>(device: &D, ctx: &DeviceContext, interval_secs: f64) -> Result<BackgroundProcess> {
	device.spawn_shell(&format!("sh {GPUMEM_DEVICE_PATH} {interval_secs} {}", ctx.storage_dir)).await
}

pub async fn make_temp_dir<D: Device + ?Sized>(device: &D) -> Result<String> {
	let dir = device.shell("mktemp -d -p /data/local/tmp").await?.trim().to_string();
	if dir.is_empty() { return Err(Error::device("mktemp returned no directory")); }
	Ok(dir)
}

pub async fn remove_dir<D: Device + ?Sized>(device: &D, dir: &str) -> Result<()> {
	device.shell(&format!("rm -rf {dir}")).await?;
	Ok(())
}

/// PNG files in a directory listing.
pub fn screenshot_files(listing: &str) -> Vec<&str> {
	listing.lines().map(str::trim).filter(|f| !f.is_empty() && f.to_lowercase().ends_with(".png")).collect()
}

/// Pull the single screenshot the run left in `device_dir`, renamed for `renderer`.
///
/// No screenshot (e.g. a skipped test) is not an error; more than one is.
pub async fn pull_screenshot<D: Device + ?Sized>(device: &D, device_dir: &str, renderer: Renderer, dest: &Path) -> Result<Option<PathBuf>> {
	let listing = device.shell(&format!("ls -1 {device_dir}")).await?;
	let pngs = screenshot_files(&listing);
	let src = match pngs.as_slice() {
		[] => return Ok(None),
		[one] => *one,
		many => {
			return Err(Error::device(format!("{} PNG files in {device_dir}, expected 1: {many:?}", many.len())));
		}
	};
	// The run always goes through the platform as "native".
	let local = dest.join(src.replace("native", renderer.as_str()));
	info!("pulling screenshot {} to {}", local.display(), dest.display());
	device.pull(&format!("{device_dir}/{src}"), &local.to_string_lossy()).await?;
	Ok(Some(local))
}

/// Run one invocation and return how long it took.
pub async fn run_trace<D: Device + ?Sized>(device: &D, command: &str) -> Result<Duration> {
	debug!("{command}");
	let start = Instant::now();
	device.shell(command).await?;
	Ok(start.elapsed())
}

pub async fn read_test_output<D: Device + ?Sized>(device: &D, ctx: &DeviceContext) -> Result<String> {
	device.shell_run_as(&format!("cat {}", ctx.test_output())).await
}

pub async fn read_gpumem_output<D: Device + ?Sized>(device: &D, ctx: &DeviceContext) -> Result<String> {
	device.shell_run_as(&format!("cat {}", ctx.gpumem_output())).await
}

pub async fn android_fingerprint<D: Device + ?Sized>(device: &D) -> Result<String> {
	Ok(device.shell("getprop ro.build.fingerprint").await?.trim().to_string())
}

async fn git_rev(rev: &str) -> Result<String> {
	let out = Command::new("git").args(["rev-parse", rev]).output().await?;
	if !out.status.success() {
		return Err(Error::config(format!("git rev-parse {rev} failed; pass --angle-version")));
	}
	Ok(String::from_utf8_lossy(&out.stdout).trim().to_string())
}

/// Checked-out revision, noting `origin/main` when it differs.
pub async fn angle_version() -> Result<String> {
	let head = git_rev("HEAD").await?;
	let main = git_rev("origin/main").await?;
	Ok(describe_version(head, &main))
}

pub fn describe_version(head: String, origin_main: &str) -> String {
	if head == origin_main { head } else { format!("{head} (origin/main {origin_main})") }
}

/// Drop every driver override this tool may have set.
pub async fn restore_driver_settings<D: Device + ?Sized>(device: &D) -> Result<()> {
	for key in ["angle_debug_package", "angle_gl_driver_selection_pkgs", "angle_gl_driver_selection_values"] {
		device.shell(&format!("settings delete global {key}")).await?;
	}
	Ok(())
}
