//! Raw and summary tables.
//!
//! Raw rows are written once per invocation; summary rows once per trace, after every
//! iteration of that trace has been aggregated. Every row is flushed as it is written so an
//! interrupted run leaves complete rows behind.

use crate::error::{Error, Result};
use crate::scrape::IterationSample;
use crate::stats::{aggregate, safe_divide, AggregateResult};
use crate::types::{Metric, MetricKind, Renderer, RendererSelection, RunMode};
use comfy_table::{presets, Table};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// `x` as a percentage with two decimals, e.g. `0.5` -> `50.00%`.
pub fn percent(x: f64) -> String { format!("{:.2}%", x * 100.0) }

/// Time and power with three decimals, memory truncated to whole bytes.
pub fn format_value(metric: Metric, value: f64) -> String {
	match metric.kind() {
		MetricKind::Time | MetricKind::Power => format!("{value:.3}"),
		MetricKind::Memory => format!("{}", value.trunc() as i64),
	}
}

/// Per-renderer metric series of the trace being run.
#[derive(Debug, Default)]
pub struct SampleTable {
	series: BTreeMap<Renderer, [Vec<f64>; Metric::COUNT]>,
}

impl SampleTable {
	pub fn new() -> Self { Self::default() }

	pub fn push(&mut self, renderer: Renderer, sample: &IterationSample) {
		let series = self.series.entry(renderer).or_default();
		for metric in Metric::ALL {
			series[metric.index()].push(sample.value(metric));
		}
	}

	/// Aggregate every series; each must hold exactly `loop_count` samples.
	pub fn aggregate(&self, trace: &str, renderers: &[Renderer], loop_count: usize) -> Result<TraceReportRow> {
		let mut variants = BTreeMap::new();
		for &renderer in renderers {
			let series = self.series.get(&renderer);
			let mut results = [AggregateResult::default(); Metric::COUNT];
			for metric in Metric::ALL {
				let values = series.map_or(&[][..], |s| s[metric.index()].as_slice());
				if values.len() != loop_count {
					return Err(Error::IncompleteSeries {
						metric: metric.name(),
						renderer: renderer.to_string(),
						expected: loop_count,
						actual: values.len(),
					});
				}
				results[metric.index()] = aggregate(values)?;
			}
			variants.insert(renderer, results);
		}
		Ok(TraceReportRow { trace: trace.to_string(), variants })
	}
}

/// Aggregates of one trace, per renderer, in [`Metric::ALL`] order.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceReportRow {
	pub trace: String,
	pub variants: BTreeMap<Renderer, [AggregateResult; Metric::COUNT]>,
}

impl TraceReportRow {
	pub fn get(&self, renderer: Renderer, metric: Metric) -> Option<AggregateResult> {
		self.variants.get(&renderer).map(|r| r[metric.index()])
	}

	fn require(&self, renderer: Renderer, metric: Metric) -> Result<AggregateResult> {
		self.get(renderer, metric)
			.ok_or_else(|| Error::report(format!("no {renderer} results for {} in {}", metric, self.trace)))
	}
}

/// Column layout of the summary table, fixed for a whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryLayout {
	Single(Renderer),
	/// Both renderers side by side, plus `baseline / candidate` per metric.
	Compare { baseline: Renderer, candidate: Renderer },
}

impl SummaryLayout {
	pub fn for_selection(selection: RendererSelection) -> Self {
		match selection {
			RendererSelection::Both => SummaryLayout::Compare { baseline: Renderer::Native, candidate: Renderer::Vulkan },
			RendererSelection::Single(r) => SummaryLayout::Single(r),
		}
	}

	pub fn header(&self) -> Vec<String> {
		let mut h = vec!["#".to_string(), "Trace".to_string()];
		for metric in Metric::ALL {
			match self {
				SummaryLayout::Single(r) => {
					h.push(metric.value_label(r.as_str()));
					h.push(metric.variance_label(r.as_str()));
				}
				SummaryLayout::Compare { baseline, candidate } => {
					for r in [baseline, candidate] {
						h.push(metric.value_label(r.label()));
						h.push(metric.variance_label(r.label()));
					}
					h.push(metric.compare_label().to_string());
				}
			}
		}
		h
	}

	pub fn render_row(&self, number: usize, row: &TraceReportRow) -> Result<Vec<String>> {
		let mut cells = vec![number.to_string(), row.trace.clone()];
		for metric in Metric::ALL {
			match *self {
				SummaryLayout::Single(r) => {
					let a = row.require(r, metric)?;
					cells.push(format_value(metric, a.mean));
					cells.push(percent(a.relative_variance));
				}
				SummaryLayout::Compare { baseline, candidate } => {
					let b = row.require(baseline, metric)?;
					let c = row.require(candidate, metric)?;
					cells.push(format_value(metric, b.mean));
					cells.push(percent(b.relative_variance));
					cells.push(format_value(metric, c.mean));
					cells.push(percent(c.relative_variance));
					cells.push(percent(safe_divide(b.mean, c.mean)));
				}
			}
		}
		Ok(cells)
	}

	/// Console rendering of one summary row.
	pub fn table(&self, number: usize, row: &TraceReportRow) -> Result<Table> {
		let mut table = Table::new();
		table.load_preset(presets::UTF8_FULL);
		let cells = self.render_row(number, row)?;
		let header = self.header();
		table.set_header(vec!["metric".to_string(), "value".to_string()]);
		for (h, v) in header.iter().zip(cells.iter()).skip(2) {
			table.add_row(vec![h.replace('\n', " "), v.clone()]);
		}
		Ok(table)
	}
}

/// Single-cell environment row heading the summary.
pub fn metadata_row(fingerprint: &str, angle_version: &str, raw_file: &str, args: &str) -> String {
	format!("Android: {fingerprint}\nANGLE: {angle_version}\nSource: {raw_file}\nArgs: {args}")
}

/// Name of a raw-table row, e.g. `vsync_native_trex_200`.
pub fn raw_trace_name(mode: RunMode, renderer: Renderer, test: &str) -> String {
	format!("{}{}_{}", mode.prefix(), renderer, test)
}

fn raw_record(trace: &str, s: &IterationSample) -> Vec<String> {
	vec![
		trace.to_string(),
		s.wall_time.to_string(),
		s.gpu_time.to_string(),
		s.cpu_time.to_string(),
		s.gpu_power.to_string(),
		s.cpu_power.to_string(),
		s.gpu_mem_sustained.to_string(),
		s.gpu_mem_peak.to_string(),
		s.proc_mem_median.to_string(),
		s.proc_mem_peak.to_string(),
		s.frame_count.to_string(),
	]
}

/// `raw_data.<tag>.csv`: one row per invocation.
pub struct RawWriter<W: Write = File> {
	csv: csv::Writer<W>,
}

impl RawWriter<File> {
	pub fn create(path: impl AsRef<Path>) -> Result<Self> { Self::new(File::create(path)?) }
}

impl<W: Write> RawWriter<W> {
	pub fn new(out: W) -> Result<Self> {
		let mut csv = csv::WriterBuilder::new().flexible(false).from_writer(out);
		let mut header: Vec<&str> = vec!["trace"];
		header.extend(Metric::ALL.iter().map(|m| m.raw_column()));
		header.push("frame_count");
		csv.write_record(&header)?;
		csv.flush()?;
		Ok(Self { csv })
	}

	pub fn write(&mut self, trace: &str, sample: &IterationSample) -> Result<()> {
		self.csv.write_record(raw_record(trace, sample))?;
		self.csv.flush()?;
		Ok(())
	}

	pub fn into_inner(self) -> Result<W> {
		self.csv.into_inner().map_err(|e| Error::report(format!("flushing raw table: {}", e.error())))
	}
}

/// `summary.<tag>.csv`: metadata row, header, then one row per trace.
pub struct SummaryWriter<W: Write = File> {
	csv: csv::Writer<W>,
	layout: SummaryLayout,
	rows: usize,
}

impl SummaryWriter<File> {
	pub fn create(path: impl AsRef<Path>, layout: SummaryLayout, metadata: &str) -> Result<Self> {
		Self::new(File::create(path)?, layout, metadata)
	}
}

impl<W: Write> SummaryWriter<W> {
	pub fn new(out: W, layout: SummaryLayout, metadata: &str) -> Result<Self> {
		// The metadata row is one cell wide; the rest are not.
		let mut csv = csv::WriterBuilder::new().flexible(true).from_writer(out);
		csv.write_record([metadata])?;
		csv.write_record(layout.header())?;
		csv.flush()?;
		Ok(Self { csv, layout, rows: 0 })
	}

	pub fn layout(&self) -> SummaryLayout { self.layout }

	/// Append a trace; rows are numbered from 1 across the whole run.
	pub fn write(&mut self, row: &TraceReportRow) -> Result<usize> {
		let number = self.rows + 1;
		let cells = self.layout.render_row(number, row)?;
		self.csv.write_record(&cells)?;
		self.csv.flush()?;
		self.rows = number;
		Ok(number)
	}

	pub fn into_inner(self) -> Result<W> {
		self.csv.into_inner().map_err(|e| Error::report(format!("flushing summary table: {}", e.error())))
	}
}

/// Fixed-width progress columns printed while the run proceeds.
#[derive(Debug, Clone, Copy)]
pub struct ConsoleColumns {
	pub trace_width: usize,
	pub wall_time_only: bool,
}

impl ConsoleColumns {
	pub fn new(mode: RunMode, wall_time_only: bool) -> Self { Self { trace_width: mode.trace_width(), wall_time_only } }

	pub fn header(&self) -> String {
		if self.wall_time_only {
			return format!("{:<w$}", "wall_time_per_frame", w = self.trace_width);
		}
		let mut line = format!("{:<w$}", "trace", w = self.trace_width);
		for m in Metric::ALL {
			line.push_str(&format!(" {:<w$}", m.name(), w = m.width()));
		}
		line.trim_end().to_string()
	}

	pub fn line(&self, trace: &str, s: &IterationSample) -> String {
		if self.wall_time_only {
			return format!("{:<w$}", s.wall_time.to_string(), w = self.trace_width);
		}
		let cells = [
			s.wall_time.to_string(),
			s.gpu_time.to_string(),
			s.cpu_time.to_string(),
			format!("{:.3}", s.gpu_power),
			format!("{:.3}", s.cpu_power),
			s.gpu_mem_sustained.to_string(),
			s.gpu_mem_peak.to_string(),
			s.proc_mem_median.to_string(),
			s.proc_mem_peak.to_string(),
		];
		let mut line = format!("{:<w$}", trace, w = self.trace_width);
		for (m, cell) in Metric::ALL.iter().zip(cells) {
			line.push_str(&format!(" {:<w$}", cell, w = m.width()));
		}
		line.trim_end().to_string()
	}
}
