// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 rvocd contributors

//! Debug Transport Module handling.
//!
//! The DTM exposes two JTAG data registers: `dtmcs` for control and status, and `dmi` which
//! carries addressed reads and writes to the debug module. A `dmi` access only reports its
//! outcome on the following scan, so every transaction here is an operation scan followed by
//! a no-op scan that collects the status and any read data.

use bitfield::bitfield;
use log::{debug, info, trace, warn};

use crate::config::Config;
use crate::error::DmiError;
use crate::jtag::TapController;
use crate::transport::Transport;

/// JTAG instruction selecting the IDCODE register
pub const IR_IDCODE: u32 = 0x01;
/// JTAG instruction selecting the `dtmcs` register
pub const IR_DTMCS: u32 = 0x10;
/// JTAG instruction selecting the `dmi` register
pub const IR_DMI: u32 = 0x11;
pub const IR_BYPASS: u32 = 0x1f;

const DTMCS_WIDTH: usize = 32;
const IDCODE_WIDTH: usize = 32;
/// Offset of the `data` field in the `dmi` register
const DMI_DATA_OFFSET: u32 = 2;
/// Offset of the `address` field in the `dmi` register
const DMI_ADDRESS_OFFSET: u32 = 34;

bitfield! {
	/// The `dtmcs` JTAG register
	#[derive(Copy, Clone)]
	pub struct Dtmcs(u32);
	impl Debug;

	pub dmihardreset, set_dmihardreset: 17;
	pub dmireset, set_dmireset: 16;
	pub idle, _: 14, 12;
	pub dmistat, _: 11, 10;
	pub abits, _: 9, 4;
	pub version, _: 3, 0;
}

/// Outcome of a DMI access as reported in the `op` field of the following scan
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DmiStatus
{
	Success,
	Failed,
	Busy,
}

impl From<u32> for DmiStatus
{
	fn from(value: u32) -> Self
	{
		match value & 0b11 {
			0 => Self::Success,
			3 => Self::Busy,
			// 1 is reserved, and is treated the same as an explicit failure
			_ => Self::Failed,
		}
	}
}

/// Decoded `dtmcs` contents cached at connect time
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DtmcsStatus
{
	pub version: u8,
	pub abits: u8,
	pub dmistat: DmiStatus,
	pub idle: u8,
}

impl From<Dtmcs> for DtmcsStatus
{
	fn from(dtmcs: Dtmcs) -> Self
	{
		Self {
			version: dtmcs.version() as u8,
			abits: dtmcs.abits() as u8,
			dmistat: dtmcs.dmistat().into(),
			idle: dtmcs.idle() as u8,
		}
	}
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum DmiOp
{
	Nop = 0,
	Read = 1,
	Write = 2,
}

/// One scan through the `dmi` register
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DmiRegisterAccess
{
	pub address: u32,
	pub op: DmiOp,
	pub data: u32,
}

/// What the target shifted back out of the `dmi` register
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DmiResponse
{
	pub address: u32,
	pub status: DmiStatus,
	pub data: u32,
}

impl DmiRegisterAccess
{
	pub fn nop() -> Self
	{
		Self {
			address: 0,
			op: DmiOp::Nop,
			data: 0,
		}
	}

	/// Width of the scan for the given address width
	pub fn scan_length(abits: u8) -> usize
	{
		abits as usize + DMI_ADDRESS_OFFSET as usize
	}

	/// Pack into scan order, rejecting addresses wider than `abits`
	pub fn encode(&self, abits: u8) -> Result<u128, DmiError>
	{
		if abits < 32 && self.address >> abits != 0 {
			return Err(DmiError::AddressOutOfRange {
				address: self.address,
				abits,
			});
		}
		Ok((u128::from(self.address) << DMI_ADDRESS_OFFSET) |
			(u128::from(self.data) << DMI_DATA_OFFSET) |
			u128::from(self.op as u8))
	}

	pub fn decode(raw: u128, abits: u8) -> DmiResponse
	{
		let address_mask = (1u128 << abits) - 1;
		DmiResponse {
			address: ((raw >> DMI_ADDRESS_OFFSET) & address_mask) as u32,
			status: DmiStatus::from(raw as u32),
			data: (raw >> DMI_DATA_OFFSET) as u32,
		}
	}
}

/// Addressed access to the debug module through the DTM.
///
/// Owns the TAP, and with it the whole scan chain: callers serialise access by holding the
/// controller behind a single lock.
pub struct DmiController<T>
{
	pub(crate) tap: TapController<T>,
	status: Option<DtmcsStatus>,
	selected_ir: Option<u32>,
	idle_cycles: usize,
	pub(crate) max_retries: usize,
	pub(crate) poll_limit: usize,
}

impl<T: Transport> DmiController<T>
{
	pub fn new(tap: TapController<T>, config: &Config) -> Self
	{
		Self {
			tap,
			status: None,
			selected_ir: None,
			idle_cycles: 0,
			max_retries: config.dmi.max_retries,
			poll_limit: config.dmi.abstract_poll_limit,
		}
	}

	pub fn tap_mut(&mut self) -> &mut TapController<T>
	{
		&mut self.tap
	}

	/// The `dtmcs` contents read by the last successful [DmiController::connect]
	pub fn status(&self) -> Option<DtmcsStatus>
	{
		self.status
	}

	pub fn abits(&self) -> Result<u8, DmiError>
	{
		self.status.map(|status| status.abits).ok_or(DmiError::NotConnected)
	}

	/// Current number of Run-Test/Idle cycles inserted after each DMI scan
	pub fn idle_cycles(&self) -> usize
	{
		self.idle_cycles
	}

	/// Bring the TAP back to a known state after an aborted transfer
	fn recover(&mut self) -> Result<(), DmiError>
	{
		if self.tap.state().is_none() {
			warn!("TAP state lost, resetting before the next scan");
			// Test-Logic-Reset reloads the instruction register
			self.selected_ir = None;
			self.tap.reset()?;
		}
		Ok(())
	}

	fn select(&mut self, instruction: u32) -> Result<(), DmiError>
	{
		self.recover()?;
		if self.selected_ir != Some(instruction) {
			self.tap.scan_ir(instruction)?;
			self.selected_ir = Some(instruction);
		}
		Ok(())
	}

	pub fn read_idcode(&mut self) -> Result<u32, DmiError>
	{
		self.select(IR_IDCODE)?;
		Ok(self.tap.scan_dr(0, IDCODE_WIDTH)? as u32)
	}

	/// Reset the TAP and negotiate the DMI geometry from `dtmcs`
	pub fn connect(&mut self) -> Result<DtmcsStatus, DmiError>
	{
		self.status = None;
		// Test-Logic-Reset loads IDCODE (or BYPASS) into the instruction register
		self.selected_ir = None;
		self.tap.reset()?;

		let idcode = self.read_idcode()?;
		debug!("JTAG IDCODE {:#010x}", idcode);

		self.select(IR_DTMCS)?;
		let dtmcs = Dtmcs(self.tap.scan_dr(0, DTMCS_WIDTH)? as u32);
		debug!("{:?}", dtmcs);
		let status = DtmcsStatus::from(dtmcs);

		if !(1..=32).contains(&status.abits) {
			return Err(DmiError::UnsupportedDebugModule {
				version: status.version,
				abits: status.abits,
			});
		}
		if status.version != 1 {
			warn!("DTM reports version {}, expected 1 (debug spec 0.13)", status.version);
		}

		self.idle_cycles = status.idle as usize;
		self.status = Some(status);
		info!(
			"Connected to DTM v{}: {} address bits, {} idle cycles",
			status.version, status.abits, status.idle
		);
		Ok(status)
	}

	/// Clear a sticky busy or failed DMI condition
	pub fn dmireset(&mut self) -> Result<(), DmiError>
	{
		let mut dtmcs = Dtmcs(0);
		dtmcs.set_dmireset(true);
		self.select(IR_DTMCS)?;
		self.tap.scan_dr(dtmcs.0.into(), DTMCS_WIDTH)?;
		Ok(())
	}

	fn scan(&mut self, access: DmiRegisterAccess, abits: u8) -> Result<DmiResponse, DmiError>
	{
		let raw = self
			.tap
			.scan_dr(access.encode(abits)?, DmiRegisterAccess::scan_length(abits))?;
		self.tap.idle(self.idle_cycles)?;
		Ok(DmiRegisterAccess::decode(raw, abits))
	}

	/// Perform one DMI operation, retrying while the target reports busy
	fn transact(&mut self, access: DmiRegisterAccess) -> Result<u32, DmiError>
	{
		let abits = self.abits()?;
		// Check the address before anything reaches the wire
		access.encode(abits)?;

		let attempts = self.max_retries + 1;
		for attempt in 1..=attempts {
			self.select(IR_DMI)?;
			self.scan(access, abits)?;
			let response = self.scan(DmiRegisterAccess::nop(), abits)?;
			trace!("DMI {:?} -> {:?}", access, response);

			match response.status {
				DmiStatus::Success => return Ok(response.data),
				DmiStatus::Busy => {
					debug!(
						"DMI busy on {:#x} (attempt {}/{}), backing off to {} idle cycles",
						access.address,
						attempt,
						attempts,
						self.idle_cycles + 1
					);
					self.dmireset()?;
					self.idle_cycles += 1;
				},
				DmiStatus::Failed => {
					self.dmireset()?;
					return Err(DmiError::DmiOperationFailed {
						address: access.address,
					});
				},
			}
		}

		warn!("DMI access to {:#x} still busy after {} attempts", access.address, attempts);
		Err(DmiError::DmiTimeout {
			address: access.address,
			attempts,
		})
	}

	pub fn dmi_read(&mut self, address: u32) -> Result<u32, DmiError>
	{
		self.transact(DmiRegisterAccess {
			address,
			op: DmiOp::Read,
			data: 0,
		})
	}

	pub fn dmi_write(&mut self, address: u32, data: u32) -> Result<(), DmiError>
	{
		self.transact(DmiRegisterAccess {
			address,
			op: DmiOp::Write,
			data,
		})?;
		Ok(())
	}
}
