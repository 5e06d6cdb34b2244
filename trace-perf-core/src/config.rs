use crate::device::Device;
use crate::error::{Error, Result};
use crate::types::{RendererSelection, RunMode, TEST_PACKAGE};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::{env, fs};
use tracing::debug;

/// Every option of a benchmark run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RunConfig {
	/// Shell-style glob over trace-list entries.
	pub filter: String,
	pub log_level: String,
	pub renderer: RendererSelection,
	pub wall_time_only: bool,
	pub power: bool,
	pub memory: bool,
	pub max_steps: Option<u32>,
	/// Seconds of fixed replay time after warmup.
	pub fixed_time: Option<f64>,
	pub minimize_gpu_work: bool,
	pub output_tag: String,
	pub output_dir: PathBuf,
	pub angle_version: Option<String>,
	pub loop_count: usize,
	pub device: Option<String>,
	pub sleep_secs: u64,
	pub custom_throttling_temp: Option<f64>,
	pub custom_throttling_thermalservice_temp: Option<f64>,
	pub min_battery_level: Option<u32>,
	/// Where ANGLE libraries are loaded from; `system` uses the ones on the device.
	pub angle_package: String,
	pub build_dir: PathBuf,
	pub screenshot_dir: Option<PathBuf>,
	pub screenshot_frame: Option<u32>,
	pub fps_limit: Option<u32>,
	pub mode: RunMode,
	pub memory_poll_interval_secs: f64,
	pub power_join_timeout_secs: f64,
}

impl Default for RunConfig {
	fn default() -> Self {
		Self {
			filter: "*".into(),
			log_level: "info".into(),
			renderer: RendererSelection::Both,
			wall_time_only: false,
			power: false,
			memory: false,
			max_steps: None,
			fixed_time: None,
			minimize_gpu_work: false,
			output_tag: String::new(),
			output_dir: PathBuf::from("."),
			angle_version: None,
			loop_count: 5,
			device: None,
			sleep_secs: 0,
			custom_throttling_temp: None,
			custom_throttling_thermalservice_temp: None,
			min_battery_level: None,
			angle_package: TEST_PACKAGE.into(),
			build_dir: PathBuf::from("."),
			screenshot_dir: None,
			screenshot_frame: None,
			fps_limit: None,
			mode: RunMode::Normal,
			memory_poll_interval_secs: 0.25,
			power_join_timeout_secs: 2.0,
		}
	}
}

impl RunConfig {
	pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
		let data = fs::read_to_string(path)?;
		toml::from_str(&data).map_err(|e| Error::config(format!("toml parse error: {e}")))
	}

	/// Explicit path, then `$TRACE_PERF_CONFIG`, then `./trace-perf.toml` when present.
	pub fn discover(explicit: Option<&Path>) -> Result<Self> {
		if let Some(p) = explicit { return Self::load_from_file(p); }
		if let Ok(p) = env::var("TRACE_PERF_CONFIG") {
			if !p.trim().is_empty() { return Self::load_from_file(p.trim()); }
		}
		let local = Path::new("trace-perf.toml");
		if local.exists() {
			debug!("using {}", local.display());
			return Self::load_from_file(local);
		}
		Ok(Self::default())
	}

	pub fn apply_env(&mut self) {
		if let Ok(v) = env::var("TRACE_PERF_LOG_LEVEL") {
			if !v.trim().is_empty() { self.log_level = v.trim().to_lowercase(); }
		}
		if self.device.is_none() {
			if let Ok(v) = env::var("ANDROID_SERIAL") {
				if !v.trim().is_empty() { self.device = Some(v.trim().to_string()); }
			}
		}
	}

	pub fn write_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
		let s = toml::to_string_pretty(self).map_err(|e| Error::config(format!("toml serialize error: {e}")))?;
		fs::write(path, s)?;
		Ok(())
	}

	pub fn validate(&self) -> Result<()> {
		let allowed = ["trace", "debug", "info", "warn", "error"];
		if !allowed.contains(&self.log_level.as_str()) {
			return Err(Error::config(format!("invalid log_level: {}", self.log_level)));
		}
		if self.loop_count == 0 {
			return Err(Error::config("loop_count must be at least 1"));
		}
		if self.output_tag.trim().is_empty() {
			return Err(Error::config("output tag is required (--output-tag)"));
		}
		if self.output_tag.contains('/') || self.output_tag.contains('\\') {
			return Err(Error::config(format!("output tag must not contain a path separator: {}", self.output_tag)));
		}
		if self.power && self.fixed_time.is_none() {
			return Err(Error::config("--power requires --fixedtime"));
		}
		if let Some(t) = self.fixed_time {
			if !(t > 0.0) { return Err(Error::config(format!("fixed time must be positive: {t}"))); }
		}
		if let Some(level) = self.min_battery_level {
			if level > 100 { return Err(Error::config(format!("invalid min battery level: {level}"))); }
		}
		if !(self.memory_poll_interval_secs > 0.0) {
			return Err(Error::config("memory poll interval must be positive"));
		}
		if !(self.power_join_timeout_secs > 0.0) {
			return Err(Error::config("power join timeout must be positive"));
		}
		Ok(())
	}

	pub fn raw_data_filename(&self) -> String { format!("raw_data.{}.csv", self.output_tag) }
	pub fn summary_filename(&self) -> String { format!("summary.{}.csv", self.output_tag) }
	pub fn trace_list_path(&self) -> PathBuf { self.build_dir.join("gen").join("trace_list.json") }
	pub fn wants_screenshots(&self) -> bool { self.screenshot_dir.is_some() || self.screenshot_frame.is_some() }
}

/// Per-device paths, resolved once at startup and read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceContext {
	pub user: String,
	pub storage_dir: String,
	pub cache_dir: String,
}

impl DeviceContext {
	pub fn for_user(user: impl Into<String>) -> Self {
		let user = user.into();
		Self {
			storage_dir: format!("/data/user/{user}/{TEST_PACKAGE}/files"),
			cache_dir: format!("/data/user_de/{user}/{TEST_PACKAGE}/cache"),
			user,
		}
	}

	pub async fn discover<D: Device + ?Sized>(device: &D) -> Result<Self> {
		let user = device.shell("am get-current-user").await?;
		let user = user.trim();
		if user.is_empty() || !user.chars().all(|c| c.is_ascii_digit()) {
			return Err(Error::device(format!("unexpected current user: {user:?}")));
		}
		let ctx = Self::for_user(user);
		debug!("running with user {}, storage {}, cache {}", ctx.user, ctx.storage_dir, ctx.cache_dir);
		Ok(ctx)
	}

	pub fn test_output(&self) -> String { format!("{}/out.txt", self.storage_dir) }
	pub fn gpumem_output(&self) -> String { format!("{}/gpumem.txt", self.storage_dir) }
}
