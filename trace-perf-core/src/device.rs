//! Command bridge to the device under test.
//!
//! Everything the runner needs from the device goes through [`Device`]: one-shot
//! shell commands returning decoded text, a background shell process, and a
//! line stream from the system log. [`AdbDevice`] implements it over `adb`.

use crate::error::{Error, Result};
use crate::types::TEST_PACKAGE;
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, info};

#[async_trait]
pub trait Device: Send + Sync {
	/// Run `adb <args>` against this device and return its output.
	async fn adb(&self, args: &[&str]) -> Result<String>;

	/// Run a shell command on the device.
	async fn shell(&self, cmd: &str) -> Result<String>;

	/// Run a shell command as the test package, with access to its private storage.
	async fn shell_run_as(&self, cmd: &str) -> Result<String> {
		self.shell(&format!("run-as {TEST_PACKAGE} sh -c {}", shell_quote(cmd))).await
	}

	/// Start a shell command that keeps running until killed.
	async fn spawn_shell(&self, cmd: &str) -> Result<BackgroundProcess>;

	/// Stream system log lines matching the given logcat filter specs.
	async fn watch_log(&self, filters: &[&str]) -> Result<LogWatcher>;

	async fn push(&self, local: &str, remote: &str) -> Result<String> { self.adb(&["push", local, remote]).await }

	async fn pull(&self, remote: &str, local: &str) -> Result<String> { self.adb(&["pull", remote, local]).await }
}

/// Single-quote a string for `sh -c`.
pub fn shell_quote(s: &str) -> String { format!("'{}'", s.replace('\'', r"'\''")) }

/// A long-running device command; killed explicitly or on drop.
#[derive(Debug, Default)]
pub struct BackgroundProcess {
	child: Option<Child>,
}

impl BackgroundProcess {
	pub fn new(child: Child) -> Self { Self { child: Some(child) } }

	/// Handle with nothing behind it, for devices without real processes.
	pub fn detached() -> Self { Self { child: None } }

	pub async fn kill(mut self) {
		if let Some(mut child) = self.child.take() {
			if let Err(e) = child.kill().await { debug!("background process already gone: {e}"); }
		}
	}
}

/// Lines read from the system log, in arrival order.
#[derive(Debug)]
pub struct LogWatcher {
	lines: mpsc::Receiver<String>,
	_child: Option<Child>,
}

impl LogWatcher {
	pub fn new(lines: mpsc::Receiver<String>, child: Option<Child>) -> Self { Self { lines, _child: child } }

	/// A finished log holding the given lines.
	pub fn from_lines<I: IntoIterator<Item = String>>(lines: I) -> Self {
		let lines: Vec<String> = lines.into_iter().collect();
		let (tx, rx) = mpsc::channel(lines.len().max(1));
		for l in lines { let _ = tx.try_send(l); }
		Self { lines: rx, _child: None }
	}

	/// Next line, or `None` once the log stream has ended.
	pub async fn next_line(&mut self) -> Option<String> { self.lines.recv().await }
}

/// `adb` bound to one device serial.
#[derive(Debug, Clone)]
pub struct AdbDevice {
	adb: String,
	serial: Option<String>,
}

impl AdbDevice {
	pub fn new(serial: Option<String>) -> Self {
		let adb = std::env::var("ADB").ok().filter(|s| !s.trim().is_empty()).unwrap_or_else(|| "adb".into());
		Self { adb, serial }
	}

	pub fn serial(&self) -> Option<&str> { self.serial.as_deref() }

	fn command(&self, args: &[&str]) -> Command {
		let mut cmd = Command::new(&self.adb);
		if let Some(s) = &self.serial { cmd.arg("-s").arg(s); }
		cmd.args(args);
		cmd.kill_on_drop(true);
		cmd
	}

	async fn run(&self, args: &[&str]) -> Result<String> {
		debug!("adb {}", args.join(" "));
		let out = self.command(args).stdin(Stdio::null()).output().await?;
		let stdout = String::from_utf8_lossy(&out.stdout).into_owned();
		if !out.status.success() {
			let stderr = String::from_utf8_lossy(&out.stderr);
			return Err(Error::device(format!("adb {} exited with {}: {}{}", args.join(" "), out.status, stdout, stderr)));
		}
		Ok(stdout)
	}

	/// Serials reported by `adb devices`.
	pub async fn connected_serials() -> Result<Vec<String>> {
		let out = Self::new(None).run(&["devices"]).await?;
		Ok(list_devices(&out))
	}
}

#[async_trait]
impl Device for AdbDevice {
	async fn adb(&self, args: &[&str]) -> Result<String> { self.run(args).await }

	async fn shell(&self, cmd: &str) -> Result<String> { self.run(&["shell", cmd]).await }

	async fn spawn_shell(&self, cmd: &str) -> Result<BackgroundProcess> {
		debug!("kicking off background command {cmd}");
		let child = self.command(&["shell", cmd]).stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::null()).spawn()?;
		Ok(BackgroundProcess::new(child))
	}

	async fn watch_log(&self, filters: &[&str]) -> Result<LogWatcher> {
		let mut args = vec!["logcat"];
		args.extend_from_slice(filters);
		let mut child = self.command(&args).stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::null()).spawn()?;
		let stdout = child.stdout.take().ok_or_else(|| Error::device("logcat stdout unavailable"))?;
		let (tx, rx) = mpsc::channel(256);
		tokio::spawn(async move {
			let mut lines = BufReader::new(stdout).lines();
			while let Ok(Some(line)) = lines.next_line().await {
				if tx.send(line).await.is_err() { break; }
			}
		});
		Ok(LogWatcher::new(rx, Some(child)))
	}
}

/// Parse `adb devices` output into serials. The first line is always a header.
pub fn list_devices(output: &str) -> Vec<String> {
	output
		.trim()
		.lines()
		.skip(1)
		.filter_map(|l| l.split_whitespace().next())
		.map(str::to_string)
		.collect()
}

/// Pick the device to run on. `requested` wins over `env_serial` (`$ANDROID_SERIAL`).
pub fn select_device(connected: &[String], requested: Option<&str>, env_serial: Option<&str>) -> Result<Option<String>> {
	let serial = requested.or(env_serial).filter(|s| !s.is_empty());
	if connected.is_empty() {
		return Err(Error::device("no devices detected; connect a device and try again"));
	}
	let listing = || format!("available devices:\n{}", connected.join("\n"));
	match serial {
		None if connected.len() > 1 => Err(Error::device(format!(
			"more than one device detected; pick one with --device or $ANDROID_SERIAL\n{}",
			listing()
		))),
		None => {
			info!("default device ({}) selected", connected[0]);
			Ok(None)
		}
		Some(s) if !connected.iter().any(|c| c == s) => {
			let source = if requested.is_some() { "--device" } else { "$ANDROID_SERIAL or the config file" };
			Err(Error::device(format!("device with serial {s} not detected; update {source}\n{}", listing())))
		}
		Some(s) => {
			info!("device with serial {s} selected");
			Ok(Some(s.to_string()))
		}
	}
}


#[cfg(test)]
mod tests {
	use super::*;

	const DEVICES: &str = "List of devices attached\nAB12\tdevice\nemulator-5554\tdevice\n\n";

	#[test]
	fn parses_device_list() {
		assert_eq!(list_devices(DEVICES), vec!["AB12".to_string(), "emulator-5554".to_string()]);
		assert!(list_devices("List of devices attached\n\n").is_empty());
	}

	#[test]
	fn selection_rules() {
		let two = list_devices(DEVICES);
		assert!(select_device(&[], None, None).is_err());
		assert!(select_device(&two, None, None).unwrap_err().to_string().contains("more than one"));
		assert_eq!(select_device(&two, Some("AB12"), None).unwrap(), Some("AB12".into()));
		assert_eq!(select_device(&two, None, Some("emulator-5554")).unwrap(), Some("emulator-5554".into()));
		assert!(select_device(&two, Some("nope"), None).unwrap_err().to_string().contains("--device"));
		let one = vec!["AB12".to_string()];
		assert_eq!(select_device(&one, None, None).unwrap(), None);
	}

	#[test]
	fn quotes_for_sh() {
		assert_eq!(shell_quote("cat a | grep b"), "'cat a | grep b'");
		assert_eq!(shell_quote("it's"), r"'it'\''s'");
	}

	#[tokio::test]
	async fn log_watcher_drains_then_ends() {
		let mut w = LogWatcher::from_lines(vec!["a".to_string(), "b".to_string()]);
		assert_eq!(w.next_line().await.as_deref(), Some("a"));
		assert_eq!(w.next_line().await.as_deref(), Some("b"));
		assert_eq!(w.next_line().await, None);
	}
}
