// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 rvocd contributors

use std::time::Duration;

use log::{debug, trace, warn};

use crate::config::Config;
use crate::error::TapError;
use crate::jtag::mpsse::CommandBuffer;
use crate::jtag::{TapState, bits_from, bits_to};
use crate::transport::Transport;

/// TMS sequence that reaches Test-Logic-Reset from any state, then drops into Run-Test/Idle
const RESET_SEQUENCE: [bool; 6] = [true, true, true, true, true, false];

/// Drives a single TAP through its state machine via an MPSSE transport.
///
/// The tracked state is `None` whenever a transfer failed part way, in which case only
/// [TapController::reset] is accepted until the TAP is back in a known state.
pub struct TapController<T>
{
	transport: T,
	state: Option<TapState>,
	transfer_timeout: Duration,
	settle_timeout: Duration,
	ir_length: usize,
}

impl<T: Transport> TapController<T>
{
	pub fn new(transport: T, config: &Config) -> Self
	{
		Self {
			transport,
			state: Some(TapState::TestLogicReset),
			transfer_timeout: config.probe.transfer_timeout(),
			settle_timeout: config.probe.reset_timeout(),
			ir_length: config.jtag.ir_length as usize,
		}
	}

	pub fn state(&self) -> Option<TapState>
	{
		self.state
	}

	pub fn ir_length(&self) -> usize
	{
		self.ir_length
	}

	pub fn transport_mut(&mut self) -> &mut T
	{
		&mut self.transport
	}

	/// Release the transport, closing the probe
	pub fn close(&mut self) -> Result<(), TapError>
	{
		self.state = None;
		Ok(self.transport.close()?)
	}

	/// Send a batch of commands, returning the captured TDO bits. Any failure leaves the TAP state unknown.
	fn execute(&mut self, mut commands: CommandBuffer, timeout: Duration) -> Result<Vec<bool>, TapError>
	{
		if commands.expects_response() {
			commands.send_immediate();
		}
		let result = self.transfer(&commands, timeout);
		if result.is_err() {
			warn!("TAP operation aborted, state is now unknown");
			self.state = None;
		}
		result
	}

	fn transfer(&mut self, commands: &CommandBuffer, timeout: Duration) -> Result<Vec<bool>, TapError>
	{
		let bytes = commands.as_bytes();
		let written = self.transport.write(bytes, timeout)?;
		if written != bytes.len() {
			return Err(TapError::ShortWrite {
				expected: bytes.len(),
				written,
			});
		}
		if !commands.expects_response() {
			return Ok(Vec::new());
		}
		let expected = commands.response_len();
		let response = self.transport.read_exact(expected, timeout)?;
		Ok(commands.decode(&response))
	}

	/// Force the TAP through Test-Logic-Reset and leave it in Run-Test/Idle, whatever state it was in
	pub fn reset(&mut self) -> Result<(), TapError>
	{
		let mut commands = CommandBuffer::new();
		commands.clock_tms(&RESET_SEQUENCE, false, false);
		self.execute(commands, self.settle_timeout)?;
		debug!("TAP reset");
		self.state = Some(TapState::RunTestIdle);
		Ok(())
	}

	/// Walk the shortest TMS path to `target`, returning the number of TCK cycles it took
	pub fn goto(&mut self, target: TapState) -> Result<usize, TapError>
	{
		let current = self.state.ok_or(TapError::StateUnknown)?;
		let path = current
			.path_to(target)
			.ok_or(TapError::Unreachable { from: current, to: target })?;
		if path.is_empty() {
			return Ok(0);
		}

		let mut commands = CommandBuffer::new();
		commands.clock_tms(&path, false, false);
		self.execute(commands, self.transfer_timeout)?;
		trace!("TAP {:?} -> {:?} in {} clocks", current, target, path.len());
		self.state = Some(target);
		Ok(path.len())
	}

	/// Shift `bits` LSB first through the selected register, exiting the shift state on the last bit.
	///
	/// When `capture` is set the TDO level sampled on each clock is returned.
	pub fn shift(&mut self, bits: &[bool], capture: bool) -> Result<Vec<bool>, TapError>
	{
		let current = self.state.ok_or(TapError::StateUnknown)?;
		if !current.is_shift() {
			return Err(TapError::NotShifting(current));
		}
		let Some((&last, body)) = bits.split_last() else {
			return Ok(Vec::new());
		};

		let mut commands = CommandBuffer::new();
		commands.clock_data(body, capture);
		// The final data bit goes out with TMS high, exiting to Exit1 on the same clock
		commands.clock_tms(&[true], last, capture);
		let captured = self.execute(commands, self.transfer_timeout)?;
		self.state = Some(current.next(true));
		Ok(captured)
	}

	/// Clock `cycles` TCKs in Run-Test/Idle
	pub fn idle(&mut self, cycles: usize) -> Result<(), TapError>
	{
		self.goto(TapState::RunTestIdle)?;
		if cycles == 0 {
			return Ok(());
		}
		let mut commands = CommandBuffer::new();
		commands.clock_tms(&vec![false; cycles], false, false);
		self.execute(commands, self.settle_timeout)?;
		Ok(())
	}

	/// Load an instruction and return to Run-Test/Idle, returning the captured IR value
	pub fn scan_ir(&mut self, instruction: u32) -> Result<u32, TapError>
	{
		self.goto(TapState::ShiftIr)?;
		let captured = self.shift(&bits_from(instruction.into(), self.ir_length), true)?;
		self.goto(TapState::RunTestIdle)?;
		Ok(bits_to(&captured) as u32)
	}

	/// Scan `length` bits of `value` through the selected data register and return to Run-Test/Idle
	pub fn scan_dr(&mut self, value: u128, length: usize) -> Result<u128, TapError>
	{
		self.goto(TapState::ShiftDr)?;
		let captured = self.shift(&bits_from(value, length), true)?;
		self.goto(TapState::RunTestIdle)?;
		Ok(bits_to(&captured))
	}
}
