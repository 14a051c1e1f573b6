// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 rvocd contributors

//! Encoding of TAP traffic as FTDI MPSSE commands.
//!
//! Data leaves LSB first on the falling edge of TCK and TDO is sampled on the rising edge.
//! Bit-mode reads shift each sampled bit in from the top of the returned byte, so a read of
//! `n` bits holds the first sample at bit `8 - n`.

use bitmask_enum::bitmask;

/// Flush the MPSSE read buffer back to the host straight away
pub const SEND_IMMEDIATE: u8 = 0x87;
/// Prefix of the engine's response to an unknown opcode
pub const BAD_COMMAND: u8 = 0xfa;

const SET_LOW_BITS: u8 = 0x80;
const LOOPBACK_OFF: u8 = 0x85;
const SET_TCK_DIVISOR: u8 = 0x86;
const DISABLE_CLOCK_DIVIDE_BY_5: u8 = 0x8a;
const DISABLE_THREE_PHASE_CLOCK: u8 = 0x8d;
const DISABLE_ADAPTIVE_CLOCK: u8 = 0x97;

/// ADBUS pin assignments for JTAG: TCK, TDI and TMS driven, TDO sampled
const PIN_TCK: u8 = 0x01;
const PIN_TDI: u8 = 0x02;
const PIN_TMS: u8 = 0x08;

/// Most TMS bits a single TMS clocking command can carry
pub const MAX_TMS_BITS: usize = 7;

/// Flag bits making up the MPSSE clocking opcodes
#[bitmask(u8)]
pub enum Opcode
{
	WriteNegative = 0x01,
	BitMode = 0x02,
	ReadNegative = 0x04,
	LsbFirst = 0x08,
	WriteTdi = 0x10,
	ReadTdo = 0x20,
	WriteTms = 0x40,
}

impl Opcode
{
	/// Clock out whole bytes on TDI
	pub fn data_bytes(capture: bool) -> Self
	{
		Self::WriteNegative | Self::LsbFirst | Self::WriteTdi | Self::read_flag(capture)
	}

	/// Clock out up to 8 bits on TDI
	pub fn data_bits(capture: bool) -> Self
	{
		Self::data_bytes(capture) | Self::BitMode
	}

	/// Clock out up to 7 bits on TMS while holding TDI at bit 7 of the data byte
	pub fn tms_bits(capture: bool) -> Self
	{
		Self::WriteNegative | Self::BitMode | Self::LsbFirst | Self::WriteTms | Self::read_flag(capture)
	}

	fn read_flag(capture: bool) -> Self
	{
		if capture {
			Self::ReadTdo
		} else {
			Self::none()
		}
	}
}

/// Commands that put a freshly reset MPSSE engine into a known JTAG configuration
pub fn setup_commands(clock_divisor: u16) -> Vec<u8>
{
	let [divisor_low, divisor_high] = clock_divisor.to_le_bytes();
	vec![
		DISABLE_CLOCK_DIVIDE_BY_5,
		DISABLE_ADAPTIVE_CLOCK,
		DISABLE_THREE_PHASE_CLOCK,
		LOOPBACK_OFF,
		SET_TCK_DIVISOR,
		divisor_low,
		divisor_high,
		SET_LOW_BITS,
		PIN_TMS,
		PIN_TCK | PIN_TDI | PIN_TMS,
	]
}

/// Where captured TDO data sits in the probe's response
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Capture
{
	Bytes(usize),
	Bits(usize),
}

/// A batch of MPSSE commands along with the layout of the response they produce
#[derive(Debug, Default)]
pub struct CommandBuffer
{
	bytes: Vec<u8>,
	captures: Vec<Capture>,
}

impl CommandBuffer
{
	pub fn new() -> Self
	{
		Self::default()
	}

	pub fn as_bytes(&self) -> &[u8]
	{
		&self.bytes
	}

	pub fn expects_response(&self) -> bool
	{
		!self.captures.is_empty()
	}

	/// Number of bytes the probe returns for this batch
	pub fn response_len(&self) -> usize
	{
		self.captures
			.iter()
			.map(|capture| match capture {
				Capture::Bytes(count) => *count,
				Capture::Bits(_) => 1,
			})
			.sum()
	}

	/// Clock a TMS sequence, holding TDI at `tdi` throughout
	pub fn clock_tms(&mut self, tms: &[bool], tdi: bool, capture: bool)
	{
		let opcode = Opcode::tms_bits(capture).bits();
		for chunk in tms.chunks(MAX_TMS_BITS) {
			let mut data = if tdi { 0x80 } else { 0x00 };
			for (bit, &level) in chunk.iter().enumerate() {
				data |= u8::from(level) << bit;
			}
			self.bytes.extend_from_slice(&[opcode, (chunk.len() - 1) as u8, data]);
			if capture {
				self.captures.push(Capture::Bits(chunk.len()));
			}
		}
	}

	/// Clock data bits out on TDI with TMS held low
	pub fn clock_data(&mut self, bits: &[bool], capture: bool)
	{
		let whole_bytes = bits.len() / 8;
		if whole_bytes > 0 {
			let [length_low, length_high] = ((whole_bytes - 1) as u16).to_le_bytes();
			self.bytes
				.extend_from_slice(&[Opcode::data_bytes(capture).bits(), length_low, length_high]);
			for byte in bits[..whole_bytes * 8].chunks(8) {
				self.bytes.push(pack_byte(byte));
			}
			if capture {
				self.captures.push(Capture::Bytes(whole_bytes));
			}
		}

		let tail = &bits[whole_bytes * 8..];
		if !tail.is_empty() {
			self.bytes
				.extend_from_slice(&[Opcode::data_bits(capture).bits(), (tail.len() - 1) as u8, pack_byte(tail)]);
			if capture {
				self.captures.push(Capture::Bits(tail.len()));
			}
		}
	}

	pub fn send_immediate(&mut self)
	{
		self.bytes.push(SEND_IMMEDIATE);
	}

	/// Unpack the probe's response into the captured TDO bits, in the order they were clocked
	pub fn decode(&self, response: &[u8]) -> Vec<bool>
	{
		let mut bits = Vec::new();
		let mut offset = 0;
		for capture in &self.captures {
			match *capture {
				Capture::Bytes(count) => {
					for &byte in &response[offset..offset + count] {
						bits.extend((0..8).map(|bit| (byte >> bit) & 1 == 1));
					}
					offset += count;
				},
				Capture::Bits(count) => {
					let byte = response[offset] >> (8 - count);
					bits.extend((0..count).map(|bit| (byte >> bit) & 1 == 1));
					offset += 1;
				},
			}
		}
		bits
	}
}

fn pack_byte(bits: &[bool]) -> u8
{
	bits.iter()
		.enumerate()
		.fold(0, |byte, (bit, &set)| byte | (u8::from(set) << bit))
}
