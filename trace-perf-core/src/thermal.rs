//! Thermal and battery backoff between iterations.

use crate::device::Device;
use crate::error::{Error, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info};

const ITHERMAL_CMD: &str = "dumpsys android.hardware.thermal.IThermal/default";
const THERMALSERVICE_CMD: &str = "dumpsys thermalservice";
const BATTERY_CMD: &str = "dumpsys battery get level";

const THROTTLING_POLL: Duration = Duration::from_secs(10);
const TEMPERATURE_POLL: Duration = Duration::from_secs(5);
const BATTERY_POLL: Duration = Duration::from_secs(10);

static NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"Name: ([^ ]*)").expect("static regex"));
static CURRENT_VALUE: Lazy<Regex> = Lazy::new(|| Regex::new(r"CurrentValue: ([^ ]*)").expect("static regex"));
static M_VALUE: Lazy<Regex> = Lazy::new(|| Regex::new(r"mValue=([^,}]+)").expect("static regex"));

/// Skin-temperature sensor lines from `dumpsys ... IThermal/default`.
///
/// Charging-only sensors and `MODEL` sensors (different units, not used for throttling) are skipped.
pub fn skin_throttling_lines(dump: &str) -> Result<Vec<&str>> {
	let mut lines = Vec::new();
	for line in dump.lines() {
		debug!("checking line in thermal info: {line:?}");
		if !line.contains("ThrottlingStatus:") { continue; }
		let Some(name) = NAME.captures(line).and_then(|c| c.get(1)).map(|m| m.as_str()) else { continue };
		if name.contains("VIRTUAL-SKIN") && !name.contains("-CHARGE-") && !name.split('-').any(|p| p == "MODEL") {
			lines.push(line);
		}
	}
	if lines.is_empty() {
		error!("unexpected dumpsys IThermal response:\n{dump}");
		return Err(Error::thermal("unexpected dumpsys IThermal response"));
	}
	Ok(lines)
}

pub fn current_value(line: &str) -> Result<f64> {
	let token = CURRENT_VALUE.captures(line).and_then(|c| c.get(1)).map(|m| m.as_str()).unwrap_or_default();
	token.parse().map_err(|_| Error::parse("current temperature", token))
}

/// Temperatures listed under `Current temperatures from HAL:` in `dumpsys thermalservice`.
pub fn thermalservice_temperatures(dump: &str) -> Result<Vec<(f64, &str)>> {
	let lines: Vec<&str> = dump.lines().collect();
	if !lines.iter().any(|l| *l == "HAL Ready: true") {
		return Err(Error::thermal("thermal HAL not ready"));
	}
	let start = lines
		.iter()
		.position(|l| *l == "Current temperatures from HAL:")
		.ok_or_else(|| Error::thermal("no current temperatures in dumpsys thermalservice"))?;
	let mut temps = Vec::new();
	for line in lines[start + 1..].iter().take_while(|l| l.contains("Temperature{")) {
		let token = M_VALUE.captures(line).and_then(|c| c.get(1)).map(|m| m.as_str()).unwrap_or_default();
		let value: f64 = token.parse().map_err(|_| Error::parse("thermalservice temperature", token))?;
		temps.push((value, *line));
	}
	Ok(temps)
}

pub fn battery_level(out: &str) -> Result<u32> {
	let token = out.trim();
	token.parse().map_err(|_| Error::parse("battery level", token))
}

/// Toggle `persist.vendor.disable.thermal.control`.
///
/// Before disabling, waits for vendor throttling to end so its state starts clean.
pub async fn set_vendor_thermal_control<D: Device + ?Sized>(device: &D, disabled: bool) -> Result<()> {
	if disabled {
		'wait: loop {
			let dump = device.shell(ITHERMAL_CMD).await?;
			for line in skin_throttling_lines(&dump)? {
				if !line.contains("ThrottlingStatus: NONE") {
					info!("waiting for vendor throttling to finish: {}", line.trim());
					sleep(THROTTLING_POLL).await;
					continue 'wait;
				}
			}
			break;
		}
	}
	device.shell(&format!("setprop persist.vendor.disable.thermal.control {}", u8::from(disabled))).await?;
	Ok(())
}

pub async fn sleep_until_temps_below<D: Device + ?Sized>(device: &D, limit: f64) -> Result<()> {
	'wait: loop {
		let dump = device.shell(ITHERMAL_CMD).await?;
		for line in skin_throttling_lines(&dump)? {
			if current_value(line)? > limit {
				info!("waiting for device temps below {limit:.1}: {}", line.trim());
				sleep(TEMPERATURE_POLL).await;
				continue 'wait;
			}
		}
		return Ok(());
	}
}

pub async fn sleep_until_temps_below_thermalservice<D: Device + ?Sized>(device: &D, limit: f64) -> Result<()> {
	loop {
		let dump = device.shell(THERMALSERVICE_CMD).await?;
		let temps = thermalservice_temperatures(&dump)?;
		match temps.iter().find(|(v, _)| *v > limit) {
			Some((_, line)) => {
				info!("waiting for device temps below {limit:.1}: {}", line.trim());
				sleep(TEMPERATURE_POLL).await;
			}
			None => return Ok(()),
		}
	}
}

pub async fn sleep_until_battery_level<D: Device + ?Sized>(device: &D, min_level: u32) -> Result<()> {
	loop {
		let level = battery_level(&device.shell(BATTERY_CMD).await?)?;
		if level >= min_level { return Ok(()); }
		info!("waiting for device battery level to reach {min_level}; current level: {level}");
		sleep(BATTERY_POLL).await;
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::device::scripted::ScriptedDevice;

	const ITHERMAL: &str = "\
IsTemperatureCallbackRegistered: true
Temperature{ Type: SKIN Name: VIRTUAL-SKIN CurrentValue: 31.5 ThrottlingStatus: NONE }
Temperature{ Type: SKIN Name: VIRTUAL-SKIN-CHARGE-WIRED CurrentValue: 45.0 ThrottlingStatus: NONE }
Temperature{ Type: SKIN Name: VIRTUAL-SKIN-MODEL CurrentValue: 99.0 ThrottlingStatus: NONE }
Temperature{ Type: SKIN Name: VIRTUAL-SKIN-HINT CurrentValue: 33.0 ThrottlingStatus: LIGHT }
Temperature{ Type: CPU Name: BIG CurrentValue: 60.0 ThrottlingStatus: NONE }
";

	const HOT: &str = "Temperature{ Type: SKIN Name: VIRTUAL-SKIN CurrentValue: 40.0 ThrottlingStatus: MODERATE }\n";
	const COOL: &str = "Temperature{ Type: SKIN Name: VIRTUAL-SKIN CurrentValue: 30.0 ThrottlingStatus: NONE }\n";

	const THERMALSERVICE: &str = "\
IsStatusOverride: false
ThermalEventListeners:
HAL Ready: true
HAL connection:
Current temperatures from HAL:
	Temperature{mValue=28.2, mType=3, mName=skin, mStatus=0}
	Temperature{mValue=41.0, mType=0, mName=cpu, mStatus=0}
Current cooling devices from HAL:
	CoolingDevice{mValue=0, mType=2, mName=fan}
";

	#[test]
	fn picks_virtual_skin_sensors() {
		let lines = skin_throttling_lines(ITHERMAL).unwrap();
		assert_eq!(lines.len(), 2);
		assert_eq!(current_value(lines[0]).unwrap(), 31.5);
		assert_eq!(current_value(lines[1]).unwrap(), 33.0);
		assert!(skin_throttling_lines("nothing").is_err());
	}

	#[test]
	fn reads_thermalservice() {
		let temps = thermalservice_temperatures(THERMALSERVICE).unwrap();
		assert_eq!(temps.iter().map(|(v, _)| *v).collect::<Vec<_>>(), vec![28.2, 41.0]);
		let not_ready = THERMALSERVICE.replace("HAL Ready: true", "HAL Ready: false");
		assert!(thermalservice_temperatures(&not_ready).is_err());
	}

	#[test]
	fn reads_battery() {
		assert_eq!(battery_level("87\n").unwrap(), 87);
		assert!(battery_level("full").is_err());
	}

	#[tokio::test(start_paused = true)]
	async fn waits_for_cooldown() {
		let dev = ScriptedDevice::default().reply(ITHERMAL_CMD, &[HOT, HOT, COOL]);
		sleep_until_temps_below(&dev, 35.0).await.unwrap();
		assert_eq!(dev.sent().len(), 3);
	}

	#[tokio::test(start_paused = true)]
	async fn waits_for_battery() {
		let dev = ScriptedDevice::default().reply(BATTERY_CMD, &["10", "49", "50"]);
		sleep_until_battery_level(&dev, 50).await.unwrap();
		assert_eq!(dev.sent().len(), 3);
	}

	#[tokio::test(start_paused = true)]
	async fn disabling_waits_for_throttling_to_end() {
		let dev = ScriptedDevice::default().reply(ITHERMAL_CMD, &[HOT, COOL]);
		set_vendor_thermal_control(&dev, true).await.unwrap();
		assert_eq!(dev.sent(), vec![ITHERMAL_CMD, ITHERMAL_CMD, "setprop persist.vendor.disable.thermal.control 1"]);

		let dev = ScriptedDevice::default();
		set_vendor_thermal_control(&dev, false).await.unwrap();
		assert_eq!(dev.sent(), vec!["setprop persist.vendor.disable.thermal.control 0"]);
	}
}
