// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 rvocd contributors

//! Debug module registers and abstract commands.

use bitfield::bitfield;
use log::{debug, trace, warn};

use crate::error::DmiError;
use crate::riscv::DmiController;
use crate::riscv::registers;
use crate::transport::Transport;

/// Debug module register addresses on the DMI bus
pub mod dm
{
	pub const DATA0: u32 = 0x04;
	pub const DATA1: u32 = 0x05;
	pub const DMCONTROL: u32 = 0x10;
	pub const DMSTATUS: u32 = 0x11;
	pub const ABSTRACTCS: u32 = 0x16;
	pub const COMMAND: u32 = 0x17;
}

bitfield! {
	#[derive(Copy, Clone)]
	pub struct Dmcontrol(u32);
	impl Debug;

	pub haltreq, set_haltreq: 31;
	pub resumereq, set_resumereq: 30;
	pub ndmreset, set_ndmreset: 1;
	pub dmactive, set_dmactive: 0;
}

bitfield! {
	#[derive(Copy, Clone)]
	pub struct Dmstatus(u32);
	impl Debug;

	pub allresumeack, _: 17;
	pub anyresumeack, _: 16;
	pub allrunning, _: 11;
	pub anyrunning, _: 10;
	pub allhalted, _: 9;
	pub anyhalted, _: 8;
	pub version, _: 3, 0;
}

bitfield! {
	#[derive(Copy, Clone)]
	pub struct Abstractcs(u32);
	impl Debug;

	pub progbufsize, _: 28, 24;
	pub busy, _: 12;
	pub cmderr, set_cmderr: 10, 8;
	pub datacount, _: 3, 0;
}

bitfield! {
	/// The hart's debug control and status CSR
	#[derive(Copy, Clone)]
	pub struct Dcsr(u32);
	impl Debug;

	pub ebreakm, set_ebreakm: 15;
	pub ebreaks, set_ebreaks: 13;
	pub ebreaku, set_ebreaku: 12;
	pub cause, _: 8, 6;
	pub step, set_step: 2;
}

/// Debug module version field value for debug spec 0.13
const DMSTATUS_VERSION_0_13: u32 = 2;

/// Abstract command error codes from `abstractcs.cmderr`
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CmdErr
{
	NoError,
	Busy,
	NotSupported,
	Exception,
	HaltOrResume,
	BusError,
	Other,
}

impl From<u32> for CmdErr
{
	fn from(value: u32) -> Self
	{
		match value {
			0 => Self::NoError,
			1 => Self::Busy,
			2 => Self::NotSupported,
			3 => Self::Exception,
			4 => Self::HaltOrResume,
			5 => Self::BusError,
			_ => Self::Other,
		}
	}
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct AbstractCommandStatus
{
	pub cmderr: CmdErr,
	pub busy: bool,
}

impl From<Abstractcs> for AbstractCommandStatus
{
	fn from(abstractcs: Abstractcs) -> Self
	{
		Self {
			cmderr: abstractcs.cmderr().into(),
			busy: abstractcs.busy(),
		}
	}
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RegisterOp
{
	Read,
	Write,
}

/// Build an Access Register abstract command moving 32 bits between `data0` and `regno`
pub fn access_register_command(op: RegisterOp, regno: u16) -> u32
{
	const CMDTYPE_ACCESS_REGISTER: u32 = 0;
	const AARSIZE_32: u32 = 2;
	const TRANSFER: u32 = 1 << 17;
	const WRITE: u32 = 1 << 16;

	let write = match op {
		RegisterOp::Read => 0,
		RegisterOp::Write => WRITE,
	};
	(CMDTYPE_ACCESS_REGISTER << 24) | (AARSIZE_32 << 20) | TRANSFER | write | u32::from(regno)
}

/// Width of a single Access Memory transfer
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u32)]
pub enum AccessSize
{
	Byte = 0,
	Word = 2,
}

/// Build an Access Memory abstract command using the address in `data1`, post-incremented
pub fn access_memory_command(op: RegisterOp, size: AccessSize) -> u32
{
	const CMDTYPE_ACCESS_MEMORY: u32 = 2;
	const AAMPOSTINCREMENT: u32 = 1 << 19;
	const WRITE: u32 = 1 << 16;

	let write = match op {
		RegisterOp::Read => 0,
		RegisterOp::Write => WRITE,
	};
	(CMDTYPE_ACCESS_MEMORY << 24) | ((size as u32) << 20) | AAMPOSTINCREMENT | write
}

impl<T: Transport> DmiController<T>
{
	pub fn abstract_status(&mut self) -> Result<AbstractCommandStatus, DmiError>
	{
		Ok(Abstractcs(self.dmi_read(dm::ABSTRACTCS)?).into())
	}

	/// `cmderr` is write-1-to-clear
	fn clear_cmderr(&mut self) -> Result<(), DmiError>
	{
		let mut abstractcs = Abstractcs(0);
		abstractcs.set_cmderr(0b111);
		self.dmi_write(dm::ABSTRACTCS, abstractcs.0)
	}

	fn wait_abstract_idle(&mut self) -> Result<AbstractCommandStatus, DmiError>
	{
		for _ in 0..self.poll_limit {
			let status = self.abstract_status()?;
			if !status.busy {
				return Ok(status);
			}
		}
		Err(DmiError::AbstractCommandBusy(self.poll_limit))
	}

	/// Issue an abstract command and wait for it to finish.
	///
	/// An error code left over from an earlier command is cleared first and not reported.
	pub fn execute_abstract_command(&mut self, command: u32) -> Result<(), DmiError>
	{
		let status = self.wait_abstract_idle()?;
		if status.cmderr != CmdErr::NoError {
			warn!("Clearing leftover abstract command error {:?}", status.cmderr);
			self.clear_cmderr()?;
		}

		trace!("Abstract command {:#010x}", command);
		self.dmi_write(dm::COMMAND, command)?;

		let status = self.wait_abstract_idle()?;
		if status.cmderr != CmdErr::NoError {
			self.clear_cmderr()?;
			return Err(DmiError::AbstractCommand(status.cmderr));
		}
		Ok(())
	}

	/// Read or write a hart register by its debug module register number
	pub fn access_register_number(&mut self, op: RegisterOp, regno: u16, data: u32) -> Result<u32, DmiError>
	{
		if op == RegisterOp::Write {
			self.dmi_write(dm::DATA0, data)?;
		}
		self.execute_abstract_command(access_register_command(op, regno))?;
		match op {
			RegisterOp::Read => self.dmi_read(dm::DATA0),
			RegisterOp::Write => Ok(data),
		}
	}

	/// Read or write a hart register by name (`x5`, `t0`, `pc`, `dcsr` ...)
	pub fn access_register(&mut self, op: RegisterOp, register_name: &str, data: u32) -> Result<u32, DmiError>
	{
		let regno = registers::register_number(register_name)
			.ok_or_else(|| DmiError::UnknownRegister(register_name.to_string()))?;
		self.access_register_number(op, regno, data)
	}

	pub fn read_memory(&mut self, address: u32, length: usize) -> Result<Vec<u8>, DmiError>
	{
		self.dmi_write(dm::DATA1, address)?;
		let command = access_memory_command(RegisterOp::Read, AccessSize::Byte);
		let mut data = Vec::with_capacity(length);
		for _ in 0..length {
			self.execute_abstract_command(command)?;
			data.push(self.dmi_read(dm::DATA0)? as u8);
		}
		Ok(data)
	}

	pub fn write_memory(&mut self, address: u32, data: &[u8]) -> Result<(), DmiError>
	{
		self.dmi_write(dm::DATA1, address)?;
		let command = access_memory_command(RegisterOp::Write, AccessSize::Byte);
		for &byte in data {
			self.dmi_write(dm::DATA0, byte.into())?;
			self.execute_abstract_command(command)?;
		}
		Ok(())
	}

	pub fn read_word(&mut self, address: u32) -> Result<u32, DmiError>
	{
		self.dmi_write(dm::DATA1, address)?;
		self.execute_abstract_command(access_memory_command(RegisterOp::Read, AccessSize::Word))?;
		self.dmi_read(dm::DATA0)
	}

	pub fn write_word(&mut self, address: u32, value: u32) -> Result<(), DmiError>
	{
		self.dmi_write(dm::DATA1, address)?;
		self.dmi_write(dm::DATA0, value)?;
		self.execute_abstract_command(access_memory_command(RegisterOp::Write, AccessSize::Word))
	}

	pub fn dmstatus(&mut self) -> Result<Dmstatus, DmiError>
	{
		Ok(Dmstatus(self.dmi_read(dm::DMSTATUS)?))
	}

	/// Bring the debug module out of reset
	pub fn activate(&mut self) -> Result<(), DmiError>
	{
		let mut dmcontrol = Dmcontrol(0);
		dmcontrol.set_dmactive(true);
		self.dmi_write(dm::DMCONTROL, dmcontrol.0)?;

		let dmstatus = self.dmstatus()?;
		if dmstatus.version() == 0 {
			return Err(DmiError::UnsupportedDebugModule {
				version: 0,
				abits: self.abits()?,
			});
		}
		if dmstatus.version() != DMSTATUS_VERSION_0_13 {
			warn!("Debug module reports version {}, expected 0.13", dmstatus.version());
		}
		debug!("{:?}", dmstatus);
		Ok(())
	}

	pub fn is_halted(&mut self) -> Result<bool, DmiError>
	{
		Ok(self.dmstatus()?.allhalted())
	}

	fn request(&mut self, haltreq: bool, resumereq: bool) -> Result<(), DmiError>
	{
		let mut dmcontrol = Dmcontrol(0);
		dmcontrol.set_dmactive(true);
		dmcontrol.set_haltreq(haltreq);
		dmcontrol.set_resumereq(resumereq);
		self.dmi_write(dm::DMCONTROL, dmcontrol.0)
	}

	pub fn halt(&mut self) -> Result<(), DmiError>
	{
		self.request(true, false)?;
		let mut halted = false;
		for _ in 0..self.poll_limit {
			if self.dmstatus()?.allhalted() {
				halted = true;
				break;
			}
		}
		self.request(false, false)?;
		if !halted {
			return Err(DmiError::HartUnresponsive("halt"));
		}
		debug!("Hart halted");
		Ok(())
	}

	pub fn resume(&mut self) -> Result<(), DmiError>
	{
		self.request(false, true)?;
		let mut resumed = false;
		for _ in 0..self.poll_limit {
			if self.dmstatus()?.allresumeack() {
				resumed = true;
				break;
			}
		}
		self.request(false, false)?;
		if !resumed {
			return Err(DmiError::HartUnresponsive("resume"));
		}
		debug!("Hart resumed");
		Ok(())
	}
}
