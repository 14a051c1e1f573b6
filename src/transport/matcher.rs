// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 rvocd contributors

use std::fmt::{self, Display};
use std::mem;

use log::{error, warn};
use nusb::{DeviceInfo, list_devices};

use crate::config::{ProbeConfig, UsbId};
use crate::error::TransportError;
use crate::transport::FtdiTransport;
use crate::usb::{PortId, Pid, Vid};

/// An FTDI JTAG probe found on the USB bus, not yet opened
#[derive(Debug, Clone)]
pub struct FtdiProbe
{
	device: DeviceInfo,
}

impl FtdiProbe
{
	pub fn serial_number(&self) -> Option<&str>
	{
		self.device.serial_number()
	}

	pub fn port(&self) -> PortId
	{
		PortId::new(&self.device)
	}

	pub fn product(&self) -> &str
	{
		self.device.product_string().unwrap_or("FTDI probe")
	}

	/// Open the probe and bring its MPSSE engine up for JTAG
	pub fn open(&self, config: &ProbeConfig) -> Result<FtdiTransport, TransportError>
	{
		FtdiTransport::open(&self.device, config)
	}
}

impl Display for FtdiProbe
{
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
	{
		write!(
			f,
			"{} ({:04x}:{:04x}), serial {}, port {}",
			self.product(),
			self.device.vendor_id(),
			self.device.product_id(),
			self.serial_number().unwrap_or("<none>"),
			self.port()
		)
	}
}

#[derive(Debug, Clone, Default)]
pub struct ProbeMatcher
{
	devices: Vec<UsbId>,
	index: Option<usize>,
	serial: Option<String>,
	port: Option<String>,
}

enum MatchResult
{
	NoMatch(DeviceInfo),
	Found(FtdiProbe),
}

impl ProbeMatcher
{
	pub fn new() -> Self
	{
		Default::default()
	}

	/// Start from the USB identities and serial number of the probe configuration
	pub fn from_config(config: &ProbeConfig) -> Self
	{
		Self::new()
			.devices(config.devices.clone())
			.serial(config.serial.as_deref())
	}

	/// Set the USB identities that count as probes.
	#[must_use]
	pub fn devices(mut self, devices: Vec<UsbId>) -> Self
	{
		self.devices = devices;
		self
	}

	/// Set the index to match against.
	#[must_use]
	pub fn index(mut self, idx: Option<usize>) -> Self
	{
		self.index = idx;
		self
	}

	/// Set the serial number to match against.
	#[must_use]
	pub fn serial<'s, IntoOptStrT>(mut self, serial: IntoOptStrT) -> Self
	where
		IntoOptStrT: Into<Option<&'s str>>,
	{
		self.serial = serial.into().map(|s| s.to_string());
		self
	}

	/// Set the port path to match against.
	#[must_use]
	pub fn port(mut self, port: Option<String>) -> Self
	{
		self.port = port;
		self
	}

	fn is_probe(&self, device: &DeviceInfo) -> bool
	{
		let (vid, pid) = (Vid(device.vendor_id()), Pid(device.product_id()));
		self.devices.iter().any(|id| id.vid == vid && id.pid == pid)
	}

	/// Find all connected probes that match the selection criteria, treating any criterion that
	/// was not provided as always matching.
	///
	/// Errors from enumerating the bus are collected rather than returned so that they do not
	/// hide probes that were found; a non-empty error list means the results may be incomplete.
	pub fn find_matching_probes(&self) -> ProbeMatchResults
	{
		let mut results = ProbeMatchResults::default();

		let devices = match list_devices() {
			Ok(d) => d,
			Err(e) => {
				results.errors.push(TransportError::Usb {
					source: e,
					operation: "enumerate USB devices",
				});
				return results;
			},
		};

		devices
			.filter(|dev| self.is_probe(dev))
			.enumerate()
			.map(|(index, device_info)| self.matching_probe(index, device_info))
			.collect()
	}

	fn matching_probe(&self, index: usize, device_info: DeviceInfo) -> MatchResult
	{
		let serial_matches = self
			.serial
			.as_deref()
			.is_none_or(|s| Some(s) == device_info.serial_number());
		let index_matches = self.index.is_none_or(|needle| needle == index);
		let port_matches = self
			.port
			.as_deref()
			.is_none_or(|p| PortId::new(&device_info).matches(p));

		if index_matches && port_matches && serial_matches {
			MatchResult::Found(FtdiProbe { device: device_info })
		} else {
			MatchResult::NoMatch(device_info)
		}
	}
}

#[derive(Debug, Default)]
pub struct ProbeMatchResults
{
	pub found: Vec<FtdiProbe>,
	pub filtered_out: Vec<DeviceInfo>,
	pub errors: Vec<TransportError>,
}

impl FromIterator<MatchResult> for ProbeMatchResults
{
	fn from_iter<I: IntoIterator<Item = MatchResult>>(iter: I) -> Self
	{
		let mut results = ProbeMatchResults::default();

		for match_result in iter {
			match match_result {
				MatchResult::NoMatch(device_info) => results.filtered_out.push(device_info),
				MatchResult::Found(probe) => results.found.push(probe),
			};
		}

		results
	}
}

impl ProbeMatchResults
{
	fn report_filtered(&self)
	{
		if !self.filtered_out.is_empty() {
			let (suffix, verb) = if self.filtered_out.len() > 1 {
				("s", "were")
			} else {
				("", "was")
			};
			warn!(
				"Matching probe not found and {} FTDI device{} {} filtered out.",
				self.filtered_out.len(),
				suffix,
				verb,
			);
			warn!("Filter arguments (--serial, --index, --port) may be incorrect.");
		}
		if !self.errors.is_empty() {
			warn!("Probe not found and errors occurred when searching for devices.");
			warn!("One of these may be why the probe was not found: {:?}", self.errors.as_slice());
		}
	}

	/// Pops all found probes, handling printing error and warning cases.
	pub fn pop_all(&mut self) -> Result<Vec<FtdiProbe>, TransportError>
	{
		if self.found.is_empty() {
			self.report_filtered();
			self.filtered_out.clear();
			return Err(TransportError::DeviceNotFound);
		}
		if !self.errors.is_empty() {
			warn!("Matching probe found but errors occurred when searching for devices.");
			warn!("Other device errors: {:?}", self.errors.as_slice());
		}
		Ok(mem::take(&mut self.found))
	}

	/// Pops a single found probe, handling printing error and warning cases.
	pub fn pop_single(&mut self, operation: &str) -> Result<FtdiProbe, TransportError>
	{
		match self.found.len() {
			0 => {
				self.report_filtered();
				Err(TransportError::DeviceNotFound)
			},
			1 => {
				if !self.errors.is_empty() {
					warn!("Matching probe found but errors occurred when searching for devices.");
					warn!("It is unlikely but possible that the incorrect probe was selected!");
				}
				Ok(self.found.remove(0))
			},
			found_len => {
				error!("{} operation only accepts one probe, but {} were found!", operation, found_len);
				error!("Hint: try rvocd-cli probe info and revise your filter arguments (--serial, --index, --port).");
				Err(TransportError::TooManyDevices(found_len))
			},
		}
	}
}
