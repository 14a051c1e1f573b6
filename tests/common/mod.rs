// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 rvocd contributors

//! A simulated FTDI probe wired to a model RISC-V target.
//!
//! [SimTransport] decodes the MPSSE command stream the TAP controller produces, clocks it
//! through its own IEEE-1149.1 state machine, and backs the DTM's data registers with a
//! small debug module driving one RV32 hart. Test code keeps a [SimProbe] handle to the same
//! state to inject faults and inspect the hart.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rvocd::config::Config;
use rvocd::error::TransportError;
use rvocd::jtag::{TapController, TapState};
use rvocd::riscv::DmiController;
use rvocd::target::{SharedTarget, TargetModel};
use rvocd::transport::Transport;

pub const IDCODE: u32 = 0x2000_0913;
pub const ABITS: u32 = 7;
pub const DTM_IDLE: u32 = 1;
pub const RESET_PC: u32 = 0x0000_0100;
pub const MEMORY_SIZE: usize = 0x1_0000;

const IR_LENGTH: usize = 5;
const IR_IDCODE: u32 = 0x01;
const IR_DTMCS: u32 = 0x10;
const IR_DMI: u32 = 0x11;

const DMI_SUCCESS: u32 = 0;
const DMI_FAILED: u32 = 2;
const DMI_BUSY: u32 = 3;

const DATA0: u32 = 0x04;
const DATA1: u32 = 0x05;
const DMCONTROL: u32 = 0x10;
const DMSTATUS: u32 = 0x11;
const ABSTRACTCS: u32 = 0x16;
const COMMAND: u32 = 0x17;

const CMDERR_NOT_SUPPORTED: u32 = 2;
const CMDERR_EXCEPTION: u32 = 3;
const CMDERR_HALT_RESUME: u32 = 4;
const CMDERR_BUS: u32 = 5;

const DCSR_STEP: u32 = 1 << 2;
const DCSR_CAUSE_SHIFT: u32 = 6;
/// xdebugver 4, prv M
const DCSR_RESET: u32 = 0x4000_0003;

/// Debug causes reported in `dcsr.cause`
pub const CAUSE_EBREAK: u32 = 1;
pub const CAUSE_HALTREQ: u32 = 3;
pub const CAUSE_STEP: u32 = 4;

/// The model hart and its debug module
pub struct Hart
{
	pub halted: bool,
	pub resumeack: bool,
	pub dmactive: bool,
	pub gprs: [u32; 32],
	pub pc: u32,
	pub dcsr: u32,
	pub memory: Vec<u8>,
	pub data0: u32,
	pub data1: u32,
	pub cmderr: u32,
}

impl Hart
{
	fn new() -> Self
	{
		Self {
			halted: false,
			resumeack: false,
			dmactive: false,
			gprs: [0; 32],
			pc: RESET_PC,
			dcsr: DCSR_RESET,
			memory: vec![0; MEMORY_SIZE],
			data0: 0,
			data1: 0,
			cmderr: 0,
		}
	}

	fn stop(&mut self, cause: u32)
	{
		self.halted = true;
		self.dcsr = (self.dcsr & !(0b111 << DCSR_CAUSE_SHIFT)) | (cause << DCSR_CAUSE_SHIFT);
	}

	fn read(&mut self, address: u32) -> u32
	{
		match address {
			DATA0 => self.data0,
			DATA1 => self.data1,
			DMCONTROL => u32::from(self.dmactive),
			DMSTATUS => {
				let mut value = 2;
				if self.halted {
					value |= (1 << 9) | (1 << 8);
				} else {
					value |= (1 << 11) | (1 << 10);
				}
				if self.resumeack {
					value |= (1 << 17) | (1 << 16);
				}
				value
			},
			ABSTRACTCS => (self.cmderr << 8) | 2,
			_ => 0,
		}
	}

	fn write(&mut self, address: u32, value: u32)
	{
		match address {
			DATA0 => self.data0 = value,
			DATA1 => self.data1 = value,
			DMCONTROL => {
				self.dmactive = value & 1 != 0;
				if value & (1 << 31) != 0 {
					self.stop(CAUSE_HALTREQ);
				} else if value & (1 << 30) != 0 && self.halted {
					self.resumeack = true;
					if self.dcsr & DCSR_STEP != 0 {
						self.pc = self.pc.wrapping_add(4);
						self.stop(CAUSE_STEP);
					} else {
						self.halted = false;
					}
				}
			},
			ABSTRACTCS => self.cmderr &= !((value >> 8) & 0b111),
			COMMAND => {
				// Commands are ignored until a previous error is cleared
				if self.cmderr == 0 {
					if let Err(cmderr) = self.execute(value) {
						self.cmderr = cmderr;
					}
				}
			},
			_ => {},
		}
	}

	fn execute(&mut self, command: u32) -> Result<(), u32>
	{
		let write = command & (1 << 16) != 0;
		match command >> 24 {
			0 => {
				if (command >> 20) & 0b111 != 2 {
					return Err(CMDERR_NOT_SUPPORTED);
				}
				if !self.halted {
					return Err(CMDERR_HALT_RESUME);
				}
				if command & (1 << 17) == 0 {
					return Ok(());
				}
				let regno = command & 0xffff;
				let register = match regno {
					0x1000..=0x101f => &mut self.gprs[(regno - 0x1000) as usize],
					0x7b0 => &mut self.dcsr,
					0x7b1 => &mut self.pc,
					_ => return Err(CMDERR_EXCEPTION),
				};
				if write {
					*register = self.data0;
				} else {
					self.data0 = *register;
				}
				self.gprs[0] = 0;
				Ok(())
			},
			2 => {
				let width = match (command >> 20) & 0b111 {
					0 => 1,
					2 => 4,
					_ => return Err(CMDERR_NOT_SUPPORTED),
				};
				let address = self.data1 as usize;
				let Some(cells) = self.memory.get_mut(address..address + width) else {
					return Err(CMDERR_BUS);
				};
				if write {
					cells.copy_from_slice(&self.data0.to_le_bytes()[..width]);
				} else {
					let mut bytes = [0; 4];
					bytes[..width].copy_from_slice(cells);
					self.data0 = u32::from_le_bytes(bytes);
				}
				if command & (1 << 19) != 0 {
					self.data1 = self.data1.wrapping_add(width as u32);
				}
				Ok(())
			},
			_ => Err(CMDERR_NOT_SUPPORTED),
		}
	}
}

pub struct SimState
{
	pub tap_state: TapState,
	ir: u32,
	shift_register: u128,
	shift_length: usize,
	/// TCK cycles clocked by TMS commands
	pub tms_clocks: usize,
	pending: VecDeque<u8>,
	dmi_sticky: u32,
	dmi_address: u32,
	dmi_data: u32,
	/// Number of upcoming DMI operations answered with busy
	pub busy_remaining: usize,
	/// Answer the next DMI operation with a failure
	pub fail_next: bool,
	/// Fail every transport call with a timeout
	pub transport_fault: bool,
	pub disconnected: bool,
	pub dmi_operations: usize,
	pub hart: Hart,
}

/// Transition table kept separate from the controller's own
fn advance(state: TapState, tms: bool) -> TapState
{
	use TapState::*;
	match state {
		TestLogicReset => if tms { TestLogicReset } else { RunTestIdle },
		RunTestIdle => if tms { SelectDrScan } else { RunTestIdle },
		SelectDrScan => if tms { SelectIrScan } else { CaptureDr },
		CaptureDr => if tms { Exit1Dr } else { ShiftDr },
		ShiftDr => if tms { Exit1Dr } else { ShiftDr },
		Exit1Dr => if tms { UpdateDr } else { PauseDr },
		PauseDr => if tms { Exit2Dr } else { PauseDr },
		Exit2Dr => if tms { UpdateDr } else { ShiftDr },
		UpdateDr => if tms { SelectDrScan } else { RunTestIdle },
		SelectIrScan => if tms { TestLogicReset } else { CaptureIr },
		CaptureIr => if tms { Exit1Ir } else { ShiftIr },
		ShiftIr => if tms { Exit1Ir } else { ShiftIr },
		Exit1Ir => if tms { UpdateIr } else { PauseIr },
		PauseIr => if tms { Exit2Ir } else { PauseIr },
		Exit2Ir => if tms { UpdateIr } else { ShiftIr },
		UpdateIr => if tms { SelectDrScan } else { RunTestIdle },
	}
}

/// Fewest TCK cycles between two states, found by searching every TMS sequence breadth first
pub fn minimum_clocks(from: TapState, to: TapState) -> usize
{
	let mut frontier = vec![from];
	let mut clocks = 0;
	while !frontier.contains(&to) {
		frontier = frontier
			.iter()
			.flat_map(|&state| [advance(state, false), advance(state, true)])
			.collect();
		frontier.sort();
		frontier.dedup();
		clocks += 1;
	}
	clocks
}

impl SimState
{
	fn new() -> Self
	{
		Self {
			tap_state: TapState::TestLogicReset,
			ir: IR_IDCODE,
			shift_register: 0,
			shift_length: 1,
			tms_clocks: 0,
			pending: VecDeque::new(),
			dmi_sticky: DMI_SUCCESS,
			dmi_address: 0,
			dmi_data: 0,
			busy_remaining: 0,
			fail_next: false,
			transport_fault: false,
			disconnected: false,
			dmi_operations: 0,
			hart: Hart::new(),
		}
	}

	fn dr_length(&self) -> usize
	{
		match self.ir {
			IR_IDCODE | IR_DTMCS => 32,
			IR_DMI => ABITS as usize + 34,
			_ => 1,
		}
	}

	fn dtmcs(&self) -> u32
	{
		1 | (ABITS << 4) | (self.dmi_sticky << 10) | (DTM_IDLE << 12)
	}

	fn capture_dr(&mut self)
	{
		self.shift_length = self.dr_length();
		self.shift_register = match self.ir {
			IR_IDCODE => IDCODE.into(),
			IR_DTMCS => self.dtmcs().into(),
			IR_DMI => {
				(u128::from(self.dmi_address) << 34) | (u128::from(self.dmi_data) << 2) | u128::from(self.dmi_sticky)
			},
			_ => 0,
		};
	}

	fn update_dr(&mut self)
	{
		let value = self.shift_register;
		match self.ir {
			IR_DTMCS => {
				// dmireset or dmihardreset
				if value & (0b11 << 16) != 0 {
					self.dmi_sticky = DMI_SUCCESS;
				}
			},
			IR_DMI => self.update_dmi(value),
			_ => {},
		}
	}

	fn update_dmi(&mut self, value: u128)
	{
		let op = (value & 0b11) as u32;
		if op == 0 || self.dmi_sticky != DMI_SUCCESS {
			return;
		}
		if self.busy_remaining > 0 {
			self.busy_remaining -= 1;
			self.dmi_sticky = DMI_BUSY;
			return;
		}
		if self.fail_next {
			self.fail_next = false;
			self.dmi_sticky = DMI_FAILED;
			return;
		}

		let address = ((value >> 34) as u32) & ((1 << ABITS) - 1);
		let data = (value >> 2) as u32;
		self.dmi_operations += 1;
		self.dmi_address = address;
		match op {
			1 => self.dmi_data = self.hart.read(address),
			2 => {
				self.hart.write(address, data);
				self.dmi_data = data;
			},
			_ => {},
		}
	}

	/// One TCK cycle, returning the TDO level sampled on it
	fn clock(&mut self, tms: bool, tdi: bool) -> bool
	{
		let mut tdo = false;
		if self.tap_state.is_shift() {
			tdo = self.shift_register & 1 == 1;
			self.shift_register >>= 1;
			self.shift_register |= u128::from(tdi) << (self.shift_length - 1);
		}

		self.tap_state = advance(self.tap_state, tms);
		match self.tap_state {
			TapState::TestLogicReset => self.ir = IR_IDCODE,
			TapState::CaptureIr => {
				self.shift_length = IR_LENGTH;
				self.shift_register = 0b00001;
			},
			TapState::UpdateIr => self.ir = (self.shift_register as u32) & ((1 << IR_LENGTH) - 1),
			TapState::CaptureDr => self.capture_dr(),
			TapState::UpdateDr => self.update_dr(),
			_ => {},
		}
		tdo
	}

	/// Pack sampled bits the way MPSSE bit-mode reads do, first sample lowest after the shift down
	fn push_bits(&mut self, samples: &[bool])
	{
		let byte = samples
			.iter()
			.fold(0u8, |byte, &sample| (byte >> 1) | (u8::from(sample) << 7));
		self.pending.push_back(byte);
	}

	fn run_commands(&mut self, data: &[u8])
	{
		let mut offset = 0;
		while offset < data.len() {
			let opcode = data[offset];
			match opcode {
				0x4b | 0x6b => {
					let count = data[offset + 1] as usize + 1;
					let byte = data[offset + 2];
					let tdi = byte & 0x80 != 0;
					let samples: Vec<bool> = (0..count)
						.map(|bit| {
							self.tms_clocks += 1;
							self.clock((byte >> bit) & 1 == 1, tdi)
						})
						.collect();
					if opcode == 0x6b {
						self.push_bits(&samples);
					}
					offset += 3;
				},
				0x1b | 0x3b => {
					let count = data[offset + 1] as usize + 1;
					let byte = data[offset + 2];
					let samples: Vec<bool> = (0..count).map(|bit| self.clock(false, (byte >> bit) & 1 == 1)).collect();
					if opcode == 0x3b {
						self.push_bits(&samples);
					}
					offset += 3;
				},
				0x19 | 0x39 => {
					let count = u16::from_le_bytes([data[offset + 1], data[offset + 2]]) as usize + 1;
					let payload = data[offset + 3..offset + 3 + count].to_vec();
					for byte in payload {
						let tdo = (0..8).fold(0u8, |tdo, bit| {
							tdo | (u8::from(self.clock(false, (byte >> bit) & 1 == 1)) << bit)
						});
						if opcode == 0x39 {
							self.pending.push_back(tdo);
						}
					}
					offset += 3 + count;
				},
				0x87 => offset += 1,
				_ => {
					self.pending.extend([0xfa, opcode]);
					offset += 1;
				},
			}
		}
	}
}

/// Handle on the simulator for tests
#[derive(Clone)]
pub struct SimProbe
{
	state: Arc<Mutex<SimState>>,
}

pub struct SimTransport
{
	state: Arc<Mutex<SimState>>,
}

impl SimProbe
{
	pub fn new() -> Self
	{
		Self {
			state: Arc::new(Mutex::new(SimState::new())),
		}
	}

	pub fn transport(&self) -> SimTransport
	{
		SimTransport {
			state: self.state.clone(),
		}
	}

	pub fn state(&self) -> MutexGuard<'_, SimState>
	{
		self.state.lock().unwrap()
	}

	/// Simulate the running hart stopping on its own, as on an `ebreak`
	pub fn stop_hart(&self)
	{
		self.state().hart.stop(CAUSE_EBREAK);
	}

	pub fn load_memory(&self, address: u32, bytes: &[u8])
	{
		let address = address as usize;
		self.state().hart.memory[address..address + bytes.len()].copy_from_slice(bytes);
	}

	pub fn memory(&self, address: u32, length: usize) -> Vec<u8>
	{
		let address = address as usize;
		self.state().hart.memory[address..address + length].to_vec()
	}

	pub fn word(&self, address: u32) -> u32
	{
		let bytes: [u8; 4] = self.memory(address, 4).try_into().unwrap();
		u32::from_le_bytes(bytes)
	}
}

impl Transport for SimTransport
{
	fn write(&mut self, data: &[u8], timeout: Duration) -> Result<usize, TransportError>
	{
		let mut state = self.state.lock().unwrap();
		if state.disconnected {
			return Err(TransportError::Disconnected);
		}
		if state.transport_fault {
			return Err(TransportError::Timeout(timeout));
		}
		state.run_commands(data);
		Ok(data.len())
	}

	fn read(&mut self, max: usize, timeout: Duration) -> Result<Vec<u8>, TransportError>
	{
		let mut state = self.state.lock().unwrap();
		if state.disconnected {
			return Err(TransportError::Disconnected);
		}
		if state.pending.is_empty() {
			return Err(TransportError::Timeout(timeout));
		}
		let count = max.min(state.pending.len());
		Ok(state.pending.drain(..count).collect())
	}

	fn available(&mut self) -> Result<usize, TransportError>
	{
		Ok(self.state.lock().unwrap().pending.len())
	}

	fn close(&mut self) -> Result<(), TransportError>
	{
		Ok(())
	}
}

pub fn tap_controller(probe: &SimProbe) -> TapController<SimTransport>
{
	TapController::new(probe.transport(), &Config::default())
}

pub fn dmi_controller(probe: &SimProbe) -> DmiController<SimTransport>
{
	DmiController::new(tap_controller(probe), &Config::default())
}

/// A target attached through the simulator, with the hart halted
pub fn attached_target(probe: &SimProbe) -> SharedTarget<SimTransport>
{
	let mut target = TargetModel::new(dmi_controller(probe));
	target.attach().unwrap();
	target.into_shared()
}
