use thiserror::Error;

pub type Result<T, E = Error> = core::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
	#[error("io: {0}")]
	Io(#[from] std::io::Error),
	#[error("json: {0}")]
	Json(#[from] serde_json::Error),
	#[error("csv: {0}")]
	Csv(#[from] csv::Error),
	#[error("config: {0}")]
	Config(String),
	#[error("device: {0}")]
	Device(String),
	#[error("parse: cannot read {what} from {token:?}")]
	Parse { what: &'static str, token: String },
	#[error("power: {0}")]
	Power(String),
	#[error("thermal: {0}")]
	Thermal(String),
	#[error("cannot aggregate an empty series")]
	EmptySeries,
	#[error("{metric} for {renderer} has {actual} samples, expected {expected}")]
	IncompleteSeries { metric: &'static str, renderer: String, expected: usize, actual: usize },
	#[error("report: {0}")]
	Report(String),
}

impl Error {
	pub fn config(msg: impl Into<String>) -> Self { Self::Config(msg.into()) }
	pub fn device(msg: impl Into<String>) -> Self { Self::Device(msg.into()) }
	pub fn power(msg: impl Into<String>) -> Self { Self::Power(msg.into()) }
	pub fn thermal(msg: impl Into<String>) -> Self { Self::Thermal(msg.into()) }
	pub fn report(msg: impl Into<String>) -> Self { Self::Report(msg.into()) }
	pub fn parse(what: &'static str, token: impl Into<String>) -> Self { Self::Parse { what, token: token.into() } }
}
