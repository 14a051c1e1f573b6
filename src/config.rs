// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 rvocd contributors

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::usb::{FtdiChannel, Pid, Vid};

/// Name of the configuration file looked for in the platform configuration directory
pub const CONFIG_FILE_NAME: &str = "config.json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config
{
	pub probe: ProbeConfig,
	pub jtag: JtagConfig,
	pub dmi: DmiConfig,
	pub server: ServerConfig,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsbId
{
	pub vid: Vid,
	pub pid: Pid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig
{
	/// USB identities that are treated as JTAG probes
	pub devices: Vec<UsbId>,
	pub serial: Option<String>,
	pub channel: FtdiChannel,
	/// MPSSE TCK divisor, TCK = 30MHz / (divisor + 1)
	pub clock_divisor: u16,
	pub transfer_timeout_ms: u64,
	/// Time allowed for TAP reset and idle sequences while the device settles
	pub reset_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JtagConfig
{
	pub ir_length: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DmiConfig
{
	/// Number of times a busy DMI transaction is retried before giving up
	pub max_retries: usize,
	/// Number of abstractcs polls allowed while waiting on an abstract command
	pub abstract_poll_limit: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig
{
	pub bind: String,
	pub port: u16,
	pub poll_interval_ms: u64,
	pub launcher: Option<LauncherConfig>,
}

/// External debugger process started alongside each client connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LauncherConfig
{
	pub program: PathBuf,
	#[serde(default)]
	pub args: Vec<String>,
}

impl Default for ProbeConfig
{
	fn default() -> Self
	{
		Self {
			devices: vec![
				UsbId { vid: Vid::FTDI, pid: Pid::FT2232H },
				UsbId { vid: Vid::FTDI, pid: Pid::FT4232H },
				UsbId { vid: Vid::FTDI, pid: Pid::FT232H },
			],
			serial: None,
			channel: FtdiChannel::A,
			clock_divisor: 5,
			transfer_timeout_ms: 1000,
			reset_timeout_ms: 3000,
		}
	}
}

impl Default for JtagConfig
{
	fn default() -> Self
	{
		Self { ir_length: 5 }
	}
}

impl Default for DmiConfig
{
	fn default() -> Self
	{
		Self {
			max_retries: 5,
			abstract_poll_limit: 100,
		}
	}
}

impl Default for ServerConfig
{
	fn default() -> Self
	{
		Self {
			bind: "0.0.0.0".into(),
			port: 11000,
			poll_interval_ms: 50,
			launcher: None,
		}
	}
}

impl ProbeConfig
{
	pub fn transfer_timeout(&self) -> Duration
	{
		Duration::from_millis(self.transfer_timeout_ms)
	}

	pub fn reset_timeout(&self) -> Duration
	{
		Duration::from_millis(self.reset_timeout_ms)
	}
}

impl ServerConfig
{
	pub fn poll_interval(&self) -> Duration
	{
		Duration::from_millis(self.poll_interval_ms)
	}
}

impl Config
{
	/// Load the configuration from an explicit path, or from the platform configuration directory
	/// when no path is given. A missing default file yields the built-in defaults.
	pub fn load(path: Option<&Path>) -> Result<Self, Error>
	{
		match path {
			Some(path) => Self::from_file(path),
			None => match Self::default_path() {
				Some(path) if path.is_file() => Self::from_file(&path),
				_ => {
					debug!("No configuration file found, using defaults");
					Ok(Self::default())
				},
			},
		}
	}

	pub fn from_file(path: &Path) -> Result<Self, Error>
	{
		debug!("Loading configuration from {}", path.display());
		let reader = BufReader::new(File::open(path)?);
		Ok(serde_json::from_reader(reader)?)
	}

	pub fn default_path() -> Option<PathBuf>
	{
		ProjectDirs::from("org", "rvocd", "rvocd").map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
	}
}

#[cfg(test)]
mod tests
{
	use super::*;

	#[test]
	fn partial_file_keeps_defaults()
	{
		let config: Config = serde_json::from_str(r#"{ "server": { "port": 3333 }, "dmi": { "max_retries": 8 } }"#)
			.expect("config should parse");
		assert_eq!(config.server.port, 3333);
		assert_eq!(config.server.bind, "0.0.0.0");
		assert_eq!(config.dmi.max_retries, 8);
		assert_eq!(config.dmi.abstract_poll_limit, 100);
		assert_eq!(config.jtag.ir_length, 5);
		assert_eq!(config.probe.transfer_timeout(), Duration::from_secs(1));
	}

	#[test]
	fn launcher_args_are_optional()
	{
		let config: Config =
			serde_json::from_str(r#"{ "server": { "launcher": { "program": "gdb" } } }"#).expect("config should parse");
		let launcher = config.server.launcher.expect("launcher should be set");
		assert_eq!(launcher.program, PathBuf::from("gdb"));
		assert!(launcher.args.is_empty());
	}
}
