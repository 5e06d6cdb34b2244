use crate::error::{Error, Result};

/// Robust average of one metric series and its spread relative to that average.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AggregateResult {
	pub mean: f64,
	pub relative_variance: f64,
}

fn position_of(values: &[f64], better: impl Fn(f64, f64) -> bool) -> Option<usize> {
	let mut best: Option<usize> = None;
	for (i, &v) in values.iter().enumerate() {
		match best {
			Some(b) if !better(v, values[b]) => {}
			_ => best = Some(i),
		}
	}
	best
}

/// Drop one minimum and one maximum (when there are at least three samples), then average.
///
/// With all samples equal both removals hit the same value, leaving `len - 2` copies.
/// `relative_variance` is the sample standard deviation over `|mean|`, and 0 when fewer
/// than two samples remain or the mean is 0.
pub fn aggregate(series: &[f64]) -> Result<AggregateResult> {
	if series.is_empty() { return Err(Error::EmptySeries); }
	let mut kept = series.to_vec();
	if kept.len() >= 3 {
		if let Some(i) = position_of(&kept, |a, b| a < b) { kept.remove(i); }
		if let Some(i) = position_of(&kept, |a, b| a > b) { kept.remove(i); }
	}

	let n = kept.len() as f64;
	let mean = kept.iter().sum::<f64>() / n;
	let relative_variance = if kept.len() >= 2 && mean != 0.0 {
		let var = kept.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
		var.sqrt() / mean.abs()
	} else {
		0.0
	};
	Ok(AggregateResult { mean, relative_variance })
}

/// `x / y`, or 0 when `y` is 0.
pub fn safe_divide(x: f64, y: f64) -> f64 {
	if y == 0.0 { 0.0 } else { x / y }
}
