// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 rvocd contributors

use std::fmt::{self, Display};
use std::io;
#[cfg(any(target_os = "linux", target_os = "android"))]
use std::path::PathBuf;
use std::time::Duration;

use async_io::{Timer, block_on};
use futures_lite::FutureExt;
use nusb::DeviceInfo;
use nusb::transfer::{RequestBuffer, TransferError};
use serde::{Deserialize, Serialize};

use crate::error::TransportError;

/// Simple newtype struct for some clarity in function arguments and whatnot.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Vid(pub u16);

/// Simple newtype struct for some clarity in function arguments and whatnot.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Pid(pub u16);

impl Vid
{
	pub const FTDI: Self = Self(0x0403);
}

impl Pid
{
	/// FT2232H dual channel high-speed bridge
	pub const FT2232H: Self = Self(0x6010);
	/// FT4232H quad channel high-speed bridge
	pub const FT4232H: Self = Self(0x6011);
	/// FT232H single channel high-speed bridge
	pub const FT232H: Self = Self(0x6014);
}

/// One of the MPSSE-capable channels of a multi-channel FTDI bridge
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FtdiChannel
{
	#[default]
	A,
	B,
	C,
	D,
}

impl FtdiChannel
{
	/// USB interface number the channel enumerates as
	pub fn interface_number(self) -> u8
	{
		match self {
			Self::A => 0,
			Self::B => 1,
			Self::C => 2,
			Self::D => 3,
		}
	}

	/// `wIndex` value used to address the channel in SIO vendor requests
	pub fn sio_index(self) -> u16
	{
		self.interface_number() as u16 + 1
	}

	pub fn read_endpoint(self) -> u8
	{
		match self {
			Self::A => 0x81,
			Self::B => 0x83,
			Self::C => 0x85,
			Self::D => 0x87,
		}
	}

	pub fn write_endpoint(self) -> u8
	{
		match self {
			Self::A => 0x02,
			Self::B => 0x04,
			Self::C => 0x06,
			Self::D => 0x08,
		}
	}
}

// Abstraction of an arbitrary nusb device's location on the host system
#[derive(Debug, Eq, Clone)]
pub struct PortId
{
	bus_number: u8,
	#[cfg(any(target_os = "linux", target_os = "android"))]
	path: PathBuf,
}

impl PortId
{
	pub fn new(device: &DeviceInfo) -> Self
	{
		Self {
			bus_number: device.bus_number(),
			#[cfg(any(target_os = "linux", target_os = "android"))]
			path: device.sysfs_path().to_path_buf(),
		}
	}

	/// Check a user-supplied port string (`bus-port.port...` or the bare port path) against this port
	pub fn matches(&self, needle: &str) -> bool
	{
		let name = self.to_string();
		name == needle || needle.split_once(':').is_some_and(|(_, port)| port == name)
	}
}

impl PartialEq for PortId
{
	fn eq(&self, other: &Self) -> bool
	{
		#[cfg(any(target_os = "linux", target_os = "android"))]
		return self.bus_number == other.bus_number && self.path == other.path;
		#[cfg(not(any(target_os = "linux", target_os = "android")))]
		return self.bus_number == other.bus_number;
	}
}

impl Display for PortId
{
	#[cfg(any(target_os = "linux", target_os = "android"))]
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
	{
		let port = self
			.path
			.file_name()
			.map_or_else(|| Ok("Invalid PortId (bad path)".into()), |name| name.to_os_string().into_string());

		match port {
			Ok(port) => write!(f, "{}", port),
			Err(_) => Err(fmt::Error),
		}
	}

	#[cfg(not(any(target_os = "linux", target_os = "android")))]
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
	{
		write!(f, "bus {}", self.bus_number)
	}
}

/// Blocking bulk transfers with a timeout on top of nusb's async transfer API
pub trait InterfaceExt
{
	fn read_bulk(&self, endpoint: u8, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError>;
	fn write_bulk(&self, endpoint: u8, buf: &[u8], timeout: Duration) -> Result<usize, TransportError>;
}

impl InterfaceExt for nusb::Interface
{
	fn write_bulk(&self, endpoint: u8, buf: &[u8], timeout: Duration) -> Result<usize, TransportError>
	{
		let transfer = async {
			let completion = self.bulk_out(endpoint, buf.to_vec()).await;
			completion.status.map_err(transfer_error("write to the probe"))?;
			Ok::<_, TransportError>(completion.data.actual_length())
		};

		block_on(transfer.or(async {
			Timer::after(timeout).await;
			Err(TransportError::Timeout(timeout))
		}))
	}

	fn read_bulk(&self, endpoint: u8, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError>
	{
		let mut queue = self.bulk_in_queue(endpoint);
		queue.submit(RequestBuffer::new(buf.len()));
		let completion = block_on(async { Some(queue.next_complete().await) }.or(async {
			Timer::after(timeout).await;
			None
		}));
		let Some(completion) = completion else {
			// Reap the cancelled request so the queue does not outlive the endpoint claim
			queue.cancel_all();
			let _ = block_on(queue.next_complete());
			return Err(TransportError::Timeout(timeout));
		};
		completion.status.map_err(transfer_error("read from the probe"))?;
		let count = completion.data.len().min(buf.len());
		buf[..count].copy_from_slice(&completion.data[..count]);
		Ok(count)
	}
}

/// Convert a nusb transfer failure, singling out physical disconnection
pub fn transfer_error(operation: &'static str) -> impl Fn(TransferError) -> TransportError
{
	move |error| match error {
		TransferError::Disconnected => TransportError::Disconnected,
		error => TransportError::Usb {
			source: io::Error::other(error),
			operation,
		},
	}
}

#[cfg(test)]
mod tests
{
	use super::*;

	#[test]
	fn channel_endpoints_pair_up()
	{
		for channel in [FtdiChannel::A, FtdiChannel::B, FtdiChannel::C, FtdiChannel::D] {
			assert_eq!(channel.read_endpoint() & 0x80, 0x80);
			assert_eq!(channel.write_endpoint() & 0x80, 0);
			assert_eq!((channel.read_endpoint() & 0x7f) + 1, channel.write_endpoint());
			assert_eq!(channel.sio_index(), channel.interface_number() as u16 + 1);
		}
	}
}
