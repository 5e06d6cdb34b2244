use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Package of the on-device test harness.
pub const TEST_PACKAGE: &str = "com.android.angle.test";

/// Rendering backend a trace is replayed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Renderer {
	/// Platform GLES driver.
	Native,
	/// Translation layer on top of Vulkan.
	Vulkan,
	/// Whatever driver the system selects when no override is set.
	Default,
}

impl Renderer {
	pub fn as_str(&self) -> &'static str {
		match self {
			Renderer::Native => "native",
			Renderer::Vulkan => "vulkan",
			Renderer::Default => "default",
		}
	}

	/// Column label used by the comparison summary.
	pub fn label(&self) -> &'static str {
		match self {
			Renderer::Native => "Native",
			Renderer::Vulkan => "ANGLE",
			Renderer::Default => "default",
		}
	}
}

impl fmt::Display for Renderer {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for Renderer {
	type Err = Error;
	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"native" => Ok(Renderer::Native),
			"vulkan" => Ok(Renderer::Vulkan),
			"default" => Ok(Renderer::Default),
			other => Err(Error::config(format!("unsupported renderer: {other}"))),
		}
	}
}

/// Which backends every trace is run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RendererSelection {
	#[default]
	Both,
	Single(Renderer),
}

impl RendererSelection {
	pub fn renderers(&self) -> Vec<Renderer> {
		match self {
			RendererSelection::Both => vec![Renderer::Native, Renderer::Vulkan],
			RendererSelection::Single(r) => vec![*r],
		}
	}
}

impl FromStr for RendererSelection {
	type Err = Error;
	fn from_str(s: &str) -> Result<Self, Self::Err> {
		if s == "both" { return Ok(RendererSelection::Both); }
		s.parse().map(RendererSelection::Single)
	}
}

impl TryFrom<String> for RendererSelection {
	type Error = Error;
	fn try_from(s: String) -> Result<Self, Self::Error> { s.parse() }
}

impl From<RendererSelection> for String {
	fn from(sel: RendererSelection) -> Self { sel.to_string() }
}

impl fmt::Display for RendererSelection {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			RendererSelection::Both => f.write_str("both"),
			RendererSelection::Single(r) => write!(f, "{r}"),
		}
	}
}

/// Replay mode passed through to the test binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
	#[default]
	Normal,
	Vsync,
	Offscreen,
}

impl RunMode {
	/// Extra harness flag, if any.
	pub fn flag(&self) -> Option<&'static str> {
		match self {
			RunMode::Normal => None,
			RunMode::Vsync => Some("--vsync"),
			RunMode::Offscreen => Some("--offscreen"),
		}
	}

	/// Prefix for raw-table trace names, e.g. `vsync_native_foo`.
	pub fn prefix(&self) -> &'static str {
		match self {
			RunMode::Normal => "",
			RunMode::Vsync => "vsync_",
			RunMode::Offscreen => "offscreen_",
		}
	}

	pub fn trace_width(&self) -> usize {
		match self {
			RunMode::Normal => 40,
			RunMode::Vsync => 45,
			RunMode::Offscreen => 50,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind { Time, Power, Memory }

/// The report metrics, in summary column order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
	WallTime,
	GpuTime,
	CpuTime,
	GpuPower,
	CpuPower,
	GpuMemSustained,
	GpuMemPeak,
	ProcMemMedian,
	ProcMemPeak,
}

impl Metric {
	pub const COUNT: usize = 9;
	pub const ALL: [Metric; Metric::COUNT] = [
		Metric::WallTime,
		Metric::GpuTime,
		Metric::CpuTime,
		Metric::GpuPower,
		Metric::CpuPower,
		Metric::GpuMemSustained,
		Metric::GpuMemPeak,
		Metric::ProcMemMedian,
		Metric::ProcMemPeak,
	];

	pub fn index(&self) -> usize { *self as usize }

	pub fn kind(&self) -> MetricKind {
		match self {
			Metric::WallTime | Metric::GpuTime | Metric::CpuTime => MetricKind::Time,
			Metric::GpuPower | Metric::CpuPower => MetricKind::Power,
			_ => MetricKind::Memory,
		}
	}

	pub fn name(&self) -> &'static str {
		match self {
			Metric::WallTime => "wall_time",
			Metric::GpuTime => "gpu_time",
			Metric::CpuTime => "cpu_time",
			Metric::GpuPower => "gpu_power",
			Metric::CpuPower => "cpu_power",
			Metric::GpuMemSustained => "gpu_mem_sustained",
			Metric::GpuMemPeak => "gpu_mem_peak",
			Metric::ProcMemMedian => "proc_mem_median",
			Metric::ProcMemPeak => "proc_mem_peak",
		}
	}

	/// Raw-table column header.
	pub fn raw_column(&self) -> &'static str {
		match self {
			Metric::WallTime => "wall_time(ms)",
			Metric::GpuTime => "gpu_time(ms)",
			Metric::CpuTime => "cpu_time(ms)",
			Metric::GpuPower => "gpu_power(W)",
			Metric::CpuPower => "cpu_power(W)",
			other => other.name(),
		}
	}

	/// Console column width.
	pub fn width(&self) -> usize {
		match self {
			Metric::GpuPower | Metric::CpuPower => 10,
			Metric::GpuMemSustained | Metric::ProcMemMedian => 20,
			_ => 15,
		}
	}

	// Summary header labels are stacked one word per line.
	fn words(&self) -> &'static [&'static str] {
		match self {
			Metric::WallTime => &["wall", "time"],
			Metric::GpuTime => &["GPU", "time"],
			Metric::CpuTime => &["CPU", "time"],
			Metric::GpuPower => &["GPU", "power"],
			Metric::CpuPower => &["CPU", "power"],
			Metric::GpuMemSustained => &["GPU", "mem"],
			Metric::GpuMemPeak => &["peak", "GPU", "mem"],
			Metric::ProcMemMedian => &["process", "mem"],
			Metric::ProcMemPeak => &["peak", "process", "mem"],
		}
	}

	fn unit(&self) -> &'static str {
		match self.kind() {
			MetricKind::Time => "per\nframe\n(ms)",
			MetricKind::Power => "(W)",
			MetricKind::Memory => "(B)",
		}
	}

	pub fn value_label(&self, variant: &str) -> String {
		format!("{variant}\n{}\n{}", self.words().join("\n"), self.unit())
	}

	pub fn variance_label(&self, variant: &str) -> String {
		format!("{variant}\n{}\nvariance", self.words().join("\n"))
	}

	pub fn compare_label(&self) -> &'static str {
		match self {
			Metric::WallTime => "wall\ntime\ncompare",
			Metric::GpuTime => "GPU\ntime\ncompare",
			Metric::CpuTime => "CPU\ntime\ncompare",
			Metric::GpuPower => "GPU\npower\ncompare",
			Metric::CpuPower => "CPU\npower\ncompare",
			Metric::GpuMemSustained => "GPU\nmem\ncompare",
			Metric::GpuMemPeak => "GPU\npeak\nmem\ncompare",
			Metric::ProcMemMedian => "process\nmem\ncompare",
			Metric::ProcMemPeak => "process\npeak\nmem\ncompare",
		}
	}
}

impl fmt::Display for Metric {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.name()) }
}
