#![forbid(unsafe_code)]

//! Repeated trace-replay benchmarks on an Android device.
//!
//! [`runner::Runner`] drives the loop; [`scrape`] turns harness output into samples,
//! [`stats`] reduces each metric series and [`report`] writes the raw and summary tables.

pub mod config;
pub mod device;
pub mod error;
pub mod harness;
pub mod power;
pub mod report;
pub mod runner;
pub mod scrape;
pub mod stats;
pub mod thermal;
pub mod traces;
pub mod types;

pub use config::{DeviceContext, RunConfig};
pub use device::{AdbDevice, Device};
pub use error::{Error, Result};
pub use runner::{restore_device_settings, RunSummary, Runner};
pub use types::{Metric, Renderer, RendererSelection, RunMode};
