// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 rvocd contributors

//! Module for error handling code.
//!
//! Each layer of the bridge has its own error type, and [Error] unifies them so that the RSP
//! session can turn any failure into a protocol-legal `E<nn>` reply.

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::jtag::TapState;
use crate::riscv::CmdErr;

#[derive(Debug, Error)]
pub enum TransportError
{
	#[error("No connected FTDI JTAG probe was found! Check connection?")]
	DeviceNotFound,

	#[error("Probe is in use by another program, failed to {operation}")]
	DeviceInUse
	{
		#[source]
		source: io::Error,
		operation: &'static str,
	},

	#[error("Operation only accepts one probe, but {0} were found")]
	TooManyDevices(usize),

	#[error("Probe did not complete a transfer within {0:?}")]
	Timeout(Duration),

	#[error("Probe found disconnected during a transfer")]
	Disconnected,

	#[error("USB error when attempting to {operation}")]
	Usb
	{
		#[source]
		source: io::Error,
		operation: &'static str,
	},
}

#[derive(Debug, Error)]
pub enum TapError
{
	#[error("No TMS path exists from {from:?} to {to:?}")]
	Unreachable
	{
		from: TapState,
		to: TapState,
	},

	#[error("TAP state is unknown after an aborted operation, a reset is required")]
	StateUnknown,

	#[error("Cannot shift bits while the TAP is in {0:?}")]
	NotShifting(TapState),

	#[error("Probe accepted {written} of {expected} command bytes")]
	ShortWrite
	{
		expected: usize,
		written: usize,
	},

	#[error("TAP shift aborted by transport failure")]
	Transport(#[from] TransportError),
}

#[derive(Debug, Error)]
pub enum DmiError
{
	#[error("DMI access to {address:#x} still busy after {attempts} attempts")]
	DmiTimeout
	{
		address: u32,
		attempts: usize,
	},

	#[error("DMI access to {address:#x} failed")]
	DmiOperationFailed
	{
		address: u32,
	},

	#[error("Debug transport not connected, connect() must succeed first")]
	NotConnected,

	#[error("Unsupported debug module (DTM version {version}, abits {abits})")]
	UnsupportedDebugModule
	{
		version: u8,
		abits: u8,
	},

	#[error("DMI address {address:#x} does not fit in {abits} address bits")]
	AddressOutOfRange
	{
		address: u32,
		abits: u8,
	},

	#[error("Abstract command failed: {0:?}")]
	AbstractCommand(CmdErr),

	#[error("Abstract command did not complete after {0} polls")]
	AbstractCommandBusy(usize),

	#[error("Unknown register {0}")]
	UnknownRegister(String),

	#[error("Hart did not {0} in time")]
	HartUnresponsive(&'static str),

	#[error(transparent)]
	Tap(#[from] TapError),
}

impl From<TransportError> for DmiError
{
	fn from(error: TransportError) -> Self
	{
		Self::Tap(TapError::Transport(error))
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RspError
{
	#[error("Packet checksum mismatch (got {received:02x}, computed {computed:02x})")]
	Checksum
	{
		received: u8,
		computed: u8,
	},

	#[error("Packet is missing its $...#xx framing")]
	Framing,

	#[error("Malformed parameters for '{command}' packet")]
	MalformedParameters
	{
		command: char,
	},

	#[error("Unsupported command '{0}'")]
	UnsupportedCommand(char),

	#[error("Register index {0} out of range")]
	BadRegister(usize),
}

/// Crate-level error, covering every layer of the debugger bridge
#[derive(Debug, Error)]
pub enum Error
{
	#[error(transparent)]
	Transport(#[from] TransportError),

	#[error(transparent)]
	Tap(#[from] TapError),

	#[error(transparent)]
	Dmi(#[from] DmiError),

	#[error(transparent)]
	Rsp(#[from] RspError),

	#[error("Failed to read configuration")]
	Config(#[from] serde_json::Error),

	#[error(transparent)]
	Io(#[from] io::Error),
}

/// POSIX-style error numbers used for `E<nn>` replies
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum Errno
{
	Eperm = 1,
	Enoent = 2,
	Eio = 5,
	Eagain = 11,
	Efault = 14,
	Ebusy = 16,
	Enodev = 19,
	Einval = 22,
	Enosys = 38,
}

impl Errno
{
	/// Render as the payload of an error reply, numbered in decimal
	pub fn reply(self) -> String
	{
		format!("E{:02}", self as u8)
	}
}

impl TransportError
{
	pub fn errno(&self) -> Errno
	{
		match self {
			Self::DeviceNotFound => Errno::Enodev,
			Self::DeviceInUse { .. } => Errno::Ebusy,
			Self::TooManyDevices(_) => Errno::Einval,
			Self::Timeout(_) => Errno::Eagain,
			Self::Disconnected | Self::Usb { .. } => Errno::Eio,
		}
	}
}

impl DmiError
{
	pub fn errno(&self) -> Errno
	{
		match self {
			Self::DmiTimeout { .. } | Self::AbstractCommandBusy(_) => Errno::Ebusy,
			Self::DmiOperationFailed { .. } => Errno::Eio,
			Self::NotConnected | Self::UnsupportedDebugModule { .. } => Errno::Enodev,
			Self::AddressOutOfRange { .. } => Errno::Efault,
			Self::AbstractCommand(CmdErr::Exception | CmdErr::BusError) => Errno::Efault,
			Self::AbstractCommand(CmdErr::NotSupported) => Errno::Enosys,
			Self::AbstractCommand(_) => Errno::Eio,
			Self::UnknownRegister(_) => Errno::Einval,
			Self::HartUnresponsive(_) => Errno::Eagain,
			Self::Tap(TapError::Transport(error)) => error.errno(),
			Self::Tap(_) => Errno::Eio,
		}
	}
}

impl Error
{
	/// Map this error onto the error number reported to the debugger
	pub fn errno(&self) -> Errno
	{
		match self {
			Self::Transport(error) => error.errno(),
			Self::Tap(TapError::Transport(error)) => error.errno(),
			Self::Tap(_) => Errno::Eio,
			Self::Dmi(error) => error.errno(),
			Self::Rsp(RspError::UnsupportedCommand(_)) => Errno::Enosys,
			Self::Rsp(_) => Errno::Einval,
			Self::Config(_) => Errno::Einval,
			Self::Io(_) => Errno::Eio,
		}
	}

	/// Only physical loss of the probe ends an RSP session
	pub fn is_fatal_to_session(&self) -> bool
	{
		matches!(
			self,
			Self::Transport(TransportError::Disconnected) |
				Self::Tap(TapError::Transport(TransportError::Disconnected)) |
				Self::Dmi(DmiError::Tap(TapError::Transport(TransportError::Disconnected)))
		)
	}
}
