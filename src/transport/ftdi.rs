// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 rvocd contributors

use std::collections::VecDeque;
use std::io;
use std::time::{Duration, Instant};

use log::{debug, trace, warn};
use nusb::DeviceInfo;
use nusb::transfer::{Control, ControlType, Recipient};

use crate::config::ProbeConfig;
use crate::error::TransportError;
use crate::jtag::mpsse;
use crate::transport::Transport;
use crate::usb::{FtdiChannel, InterfaceExt, transfer_error};

const SIO_RESET_REQUEST: u8 = 0x00;
const SIO_SET_LATENCY_TIMER_REQUEST: u8 = 0x09;
const SIO_SET_BITMODE_REQUEST: u8 = 0x0b;

const SIO_RESET_SIO: u16 = 0;
const SIO_RESET_PURGE_RX: u16 = 1;
const SIO_RESET_PURGE_TX: u16 = 2;

/// Bulk packet size of the high-speed FTDI bridges
const MAX_PACKET_SIZE: usize = 512;
/// Every inbound bulk packet starts with two modem status bytes
const STATUS_BYTES: usize = 2;

#[derive(Debug, Copy, Clone)]
#[repr(u8)]
enum BitMode
{
	Reset = 0x00,
	Mpsse = 0x02,
}

/// An FTDI MPSSE channel driven directly over USB with nusb
pub struct FtdiTransport
{
	interface: nusb::Interface,
	channel: FtdiChannel,
	control_timeout: Duration,
	read_queue: VecDeque<u8>,
	read_buffer: Box<[u8]>,
}

fn open_error(operation: &'static str) -> impl Fn(io::Error) -> TransportError
{
	move |source| match source.kind() {
		io::ErrorKind::PermissionDenied | io::ErrorKind::ResourceBusy => TransportError::DeviceInUse {
			source,
			operation,
		},
		_ => TransportError::Usb { source, operation },
	}
}

impl FtdiTransport
{
	pub fn open(device: &DeviceInfo, config: &ProbeConfig) -> Result<Self, TransportError>
	{
		let handle = device.open().map_err(open_error("open the USB device"))?;
		let interface = handle
			.claim_interface(config.channel.interface_number())
			.map_err(open_error("claim the probe's JTAG channel"))?;
		debug!("Claimed FTDI channel {:?}", config.channel);

		let mut transport = Self {
			interface,
			channel: config.channel,
			control_timeout: config.transfer_timeout(),
			read_queue: VecDeque::new(),
			read_buffer: vec![0; MAX_PACKET_SIZE].into_boxed_slice(),
		};
		transport.init_mpsse(config)?;
		Ok(transport)
	}

	fn init_mpsse(&mut self, config: &ProbeConfig) -> Result<(), TransportError>
	{
		self.sio_write(SIO_RESET_REQUEST, SIO_RESET_SIO)?;
		self.sio_write(SIO_SET_LATENCY_TIMER_REQUEST, 1)?;
		self.set_bitmode(0, BitMode::Reset)?;
		self.set_bitmode(0, BitMode::Mpsse)?;
		self.purge_buffers()?;

		// Send two deliberately invalid opcodes, the engine must echo each back after 0xfa
		let timeout = config.transfer_timeout();
		for opcode in [0xaa, 0xab] {
			self.synchronise(opcode, timeout)?;
		}

		self.write(&mpsse::setup_commands(config.clock_divisor), timeout)?;
		debug!("MPSSE engine ready, TCK divisor {}", config.clock_divisor);
		Ok(())
	}

	fn synchronise(&mut self, opcode: u8, timeout: Duration) -> Result<(), TransportError>
	{
		self.write(&[opcode, mpsse::SEND_IMMEDIATE], timeout)?;
		let response = self.read_exact(2, timeout)?;
		if response != [mpsse::BAD_COMMAND, opcode] {
			return Err(TransportError::Usb {
				source: io::Error::other(format!("unexpected response {response:02x?}")),
				operation: "synchronise with the MPSSE engine",
			});
		}
		Ok(())
	}

	fn sio_write(&mut self, request: u8, value: u16) -> Result<(), TransportError>
	{
		self.interface
			.control_out_blocking(
				Control {
					control_type: ControlType::Vendor,
					recipient: Recipient::Device,
					request,
					value,
					index: self.channel.sio_index(),
				},
				&[],
				self.control_timeout,
			)
			.map_err(transfer_error("send a control request"))?;
		trace!("SIO request {:02x}/{:04x}", request, value);
		Ok(())
	}

	fn set_bitmode(&mut self, bitmask: u8, mode: BitMode) -> Result<(), TransportError>
	{
		self.sio_write(SIO_SET_BITMODE_REQUEST, u16::from_le_bytes([bitmask, mode as u8]))
	}

	fn purge_buffers(&mut self) -> Result<(), TransportError>
	{
		self.sio_write(SIO_RESET_REQUEST, SIO_RESET_PURGE_RX)?;
		self.sio_write(SIO_RESET_REQUEST, SIO_RESET_PURGE_TX)?;
		self.read_queue.clear();
		Ok(())
	}

	/// Pull one bulk packet from the device into the read queue
	fn fill_queue(&mut self, timeout: Duration) -> Result<usize, TransportError>
	{
		let count = self
			.interface
			.read_bulk(self.channel.read_endpoint(), &mut self.read_buffer, timeout)?;
		if count <= STATUS_BYTES {
			return Ok(0);
		}
		let data = &self.read_buffer[STATUS_BYTES..count];
		trace!("Read {:02x?} from probe", data);
		self.read_queue.extend(data);
		Ok(data.len())
	}
}

impl Transport for FtdiTransport
{
	fn write(&mut self, data: &[u8], timeout: Duration) -> Result<usize, TransportError>
	{
		let mut total = 0;
		for chunk in data.chunks(MAX_PACKET_SIZE) {
			total += self
				.interface
				.write_bulk(self.channel.write_endpoint(), chunk, timeout)?;
		}
		trace!("Wrote {} bytes to probe", total);
		Ok(total)
	}

	fn read(&mut self, max: usize, timeout: Duration) -> Result<Vec<u8>, TransportError>
	{
		let deadline = Instant::now() + timeout;
		// Status-only packets arrive every latency period, so keep polling until real data shows
		while self.read_queue.is_empty() {
			let remaining = deadline.saturating_duration_since(Instant::now());
			if remaining.is_zero() {
				return Err(TransportError::Timeout(timeout));
			}
			self.fill_queue(remaining)?;
		}
		let count = max.min(self.read_queue.len());
		Ok(self.read_queue.drain(..count).collect())
	}

	fn available(&mut self) -> Result<usize, TransportError>
	{
		if self.read_queue.is_empty() {
			match self.fill_queue(Duration::from_millis(1)) {
				Ok(_) | Err(TransportError::Timeout(_)) => {},
				Err(error) => return Err(error),
			}
		}
		Ok(self.read_queue.len())
	}

	fn close(&mut self) -> Result<(), TransportError>
	{
		if !self.read_queue.is_empty() {
			warn!("Discarding {} unread bytes from the probe", self.read_queue.len());
		}
		self.read_queue.clear();
		self.set_bitmode(0, BitMode::Reset)
	}
}
