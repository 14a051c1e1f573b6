// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 rvocd contributors

//! The debugged hart as seen by GDB: cached registers, the active breakpoint set, and
//! execution control.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, info, trace};

use crate::error::{DmiError, Error, RspError};
use crate::riscv::debug_module::Dcsr;
use crate::riscv::registers::{DCSR, REGISTERS};
use crate::riscv::{CpuRegisterFile, DmiController, REGISTER_COUNT, RegisterOp};
use crate::transport::Transport;

/// `ebreak`
pub const EBREAK: u32 = 0x0010_0073;
/// `c.ebreak`, used for 2 byte breakpoint kinds
pub const C_EBREAK: u16 = 0x9002;

/// Signal reported for a hart stopped by a debugger interrupt
pub const SIGINT: u8 = 2;
/// Signal reported for a breakpoint, a step, or the initial attach
pub const SIGTRAP: u8 = 5;

/// The breakpoint classes of GDB's `Z`/`z` packets
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum BreakpointType
{
	Software,
	Hardware,
	WriteWatch,
	ReadWatch,
	AccessWatch,
}

impl TryFrom<u32> for BreakpointType
{
	type Error = RspError;

	fn try_from(value: u32) -> Result<Self, Self::Error>
	{
		match value {
			0 => Ok(Self::Software),
			1 => Ok(Self::Hardware),
			2 => Ok(Self::WriteWatch),
			3 => Ok(Self::ReadWatch),
			4 => Ok(Self::AccessWatch),
			_ => Err(RspError::MalformedParameters { command: 'Z' }),
		}
	}
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Breakpoint
{
	pub breakpoint_type: BreakpointType,
	pub address: u32,
	/// Size in bytes of the instruction the breakpoint replaces
	pub kind: u32,
}

/// Target model shared by every connection; all hardware access goes through its lock
pub type SharedTarget<T> = Arc<Mutex<TargetModel<T>>>;

/// Lock the shared target. A panic in another session does not leave the hardware state any
/// less valid than an aborted operation would, so poisoning is ignored.
pub fn lock<T>(target: &SharedTarget<T>) -> MutexGuard<'_, TargetModel<T>>
{
	target.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct TargetModel<T>
{
	dmi: DmiController<T>,
	registers: CpuRegisterFile,
	breakpoints: BTreeMap<(u32, u32), Breakpoint>,
	/// Original instructions under planted `ebreak`s
	planted: BTreeMap<u32, (u32, Vec<u8>)>,
	running: bool,
	stop_signal: u8,
}

impl<T: Transport> TargetModel<T>
{
	pub fn new(dmi: DmiController<T>) -> Self
	{
		Self {
			dmi,
			registers: CpuRegisterFile::default(),
			breakpoints: BTreeMap::new(),
			planted: BTreeMap::new(),
			running: false,
			stop_signal: SIGTRAP,
		}
	}

	pub fn into_shared(self) -> SharedTarget<T>
	{
		Arc::new(Mutex::new(self))
	}

	pub fn dmi_mut(&mut self) -> &mut DmiController<T>
	{
		&mut self.dmi
	}

	/// Connect to the debug module, halt the hart and make `ebreak` enter debug mode
	pub fn attach(&mut self) -> Result<(), Error>
	{
		self.dmi.connect()?;
		self.dmi.activate()?;
		self.dmi.halt()?;
		self.update_dcsr(|dcsr| {
			dcsr.set_ebreakm(true);
			dcsr.set_step(false);
		})?;
		self.running = false;
		self.stop_signal = SIGTRAP;
		self.sync_registers()?;
		info!("Attached, hart halted at {:#010x}", self.registers.pc());
		Ok(())
	}

	pub fn is_running(&self) -> bool
	{
		self.running
	}

	/// Signal behind the most recent stop
	pub fn stop_signal(&self) -> u8
	{
		self.stop_signal
	}

	pub fn registers(&self) -> &CpuRegisterFile
	{
		&self.registers
	}

	/// Refresh the register cache from the hart
	pub fn sync_registers(&mut self) -> Result<(), Error>
	{
		for (index, register) in REGISTERS.iter().enumerate() {
			let value = self.dmi.access_register_number(RegisterOp::Read, register.number, 0)?;
			self.registers.set(index, value);
		}
		trace!("Registers synchronised, pc {:#010x}", self.registers.pc());
		Ok(())
	}

	pub fn write_register(&mut self, index: usize, value: u32) -> Result<(), Error>
	{
		let register = REGISTERS.get(index).ok_or(RspError::BadRegister(index))?;
		self.dmi
			.access_register_number(RegisterOp::Write, register.number, value)?;
		self.registers.set(index, value);
		Ok(())
	}

	pub fn write_registers(&mut self, values: &[u32]) -> Result<(), Error>
	{
		if values.len() != REGISTER_COUNT {
			return Err(RspError::MalformedParameters { command: 'G' }.into());
		}
		for (index, &value) in values.iter().enumerate() {
			self.write_register(index, value)?;
		}
		Ok(())
	}

	pub fn read_memory(&mut self, address: u32, length: usize) -> Result<Vec<u8>, Error>
	{
		Ok(self.dmi.read_memory(address, length)?)
	}

	pub fn write_memory(&mut self, address: u32, data: &[u8]) -> Result<(), Error>
	{
		Ok(self.dmi.write_memory(address, data)?)
	}

	/// Add a breakpoint, returning false if one with the same address and kind is already set
	pub fn insert_breakpoint(&mut self, breakpoint: Breakpoint) -> bool
	{
		let key = (breakpoint.address, breakpoint.kind);
		if self.breakpoints.contains_key(&key) {
			return false;
		}
		debug!("Breakpoint {:?} at {:#010x}", breakpoint.breakpoint_type, breakpoint.address);
		self.breakpoints.insert(key, breakpoint);
		true
	}

	pub fn remove_breakpoint(&mut self, address: u32, kind: u32) -> Option<Breakpoint>
	{
		self.breakpoints.remove(&(address, kind))
	}

	pub fn clear_breakpoints(&mut self)
	{
		self.breakpoints.clear();
	}

	pub fn breakpoints(&self) -> impl Iterator<Item = &Breakpoint>
	{
		self.breakpoints.values()
	}

	pub fn has_breakpoint_at(&self, address: u32) -> bool
	{
		self.breakpoints.values().any(|breakpoint| breakpoint.address == address)
	}

	fn update_dcsr(&mut self, update: impl FnOnce(&mut Dcsr)) -> Result<(), DmiError>
	{
		let mut dcsr = Dcsr(self.dmi.access_register_number(RegisterOp::Read, DCSR, 0)?);
		update(&mut dcsr);
		self.dmi.access_register_number(RegisterOp::Write, DCSR, dcsr.0)?;
		Ok(())
	}

	/// Replace the instruction under every software breakpoint with an `ebreak`
	fn plant_breakpoints(&mut self) -> Result<(), Error>
	{
		let software: Vec<Breakpoint> = self
			.breakpoints
			.values()
			.filter(|breakpoint| breakpoint.breakpoint_type == BreakpointType::Software)
			.copied()
			.collect();
		for breakpoint in software {
			if self.planted.contains_key(&breakpoint.address) {
				continue;
			}
			let original = if breakpoint.kind == 2 {
				let original = self.dmi.read_memory(breakpoint.address, 2)?;
				self.dmi.write_memory(breakpoint.address, &C_EBREAK.to_le_bytes())?;
				original
			} else {
				let original = self.dmi.read_word(breakpoint.address)?;
				self.dmi.write_word(breakpoint.address, EBREAK)?;
				original.to_le_bytes().to_vec()
			};
			trace!("Planted ebreak at {:#010x}", breakpoint.address);
			self.planted.insert(breakpoint.address, (breakpoint.kind, original));
		}
		Ok(())
	}

	/// Put back the instructions replaced by [TargetModel::plant_breakpoints]
	fn restore_breakpoints(&mut self) -> Result<(), Error>
	{
		while let Some((address, (kind, original))) = self.planted.pop_first() {
			if kind == 2 {
				self.dmi.write_memory(address, &original)?;
			} else {
				let mut word = [0; 4];
				word.copy_from_slice(&original[..4]);
				self.dmi.write_word(address, u32::from_le_bytes(word))?;
			}
		}
		Ok(())
	}

	fn enter_halted(&mut self, signal: u8) -> Result<(), Error>
	{
		self.running = false;
		self.stop_signal = signal;
		self.restore_breakpoints()?;
		self.sync_registers()
	}

	pub fn halt(&mut self) -> Result<(), Error>
	{
		self.dmi.halt()?;
		self.enter_halted(SIGINT)
	}

	/// Single-step one instruction with `dcsr.step`
	pub fn step(&mut self) -> Result<(), Error>
	{
		self.update_dcsr(|dcsr| dcsr.set_step(true))?;
		self.dmi.resume()?;
		let mut halted = false;
		for _ in 0..self.dmi.poll_limit {
			if self.dmi.is_halted()? {
				halted = true;
				break;
			}
		}
		self.update_dcsr(|dcsr| dcsr.set_step(false))?;
		if !halted {
			self.running = true;
			return Err(DmiError::HartUnresponsive("complete a step").into());
		}
		self.enter_halted(SIGTRAP)
	}

	/// Continue execution with the software breakpoints armed
	pub fn resume(&mut self) -> Result<(), Error>
	{
		if self.running {
			return Ok(());
		}
		// Leaving from a breakpoint address would immediately hit the planted ebreak again
		if self.has_breakpoint_at(self.registers.pc()) {
			self.step()?;
		}
		self.plant_breakpoints()?;
		self.dmi.resume()?;
		self.running = true;
		Ok(())
	}

	/// Check whether a running hart has stopped; on a stop the breakpoints are disarmed and
	/// the register cache refreshed
	pub fn poll_halted(&mut self) -> Result<bool, Error>
	{
		if !self.running {
			return Ok(false);
		}
		if !self.dmi.is_halted()? {
			return Ok(false);
		}
		self.enter_halted(SIGTRAP)?;
		debug!("Hart stopped at {:#010x}", self.registers.pc());
		Ok(true)
	}

	/// Drop every breakpoint and let the hart run free
	pub fn detach(&mut self) -> Result<(), Error>
	{
		if self.running {
			self.halt()?;
		}
		self.clear_breakpoints();
		self.dmi.resume()?;
		self.running = true;
		Ok(())
	}

	/// Release the probe
	pub fn close(&mut self) -> Result<(), Error>
	{
		Ok(self.dmi.tap_mut().close()?)
	}
}
