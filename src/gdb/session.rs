// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 rvocd contributors

//! One GDB connection: turns received bytes into target operations and framed replies.
//!
//! Requests are handled strictly in arrival order. Every failure inside a handler becomes an
//! `E<nn>` reply, and only loss of the probe itself ends the session.

use std::fmt::Write;

use log::{debug, error, info, trace, warn};

use crate::error::{Errno, Error, RspError};
use crate::gdb::packet::{Incoming, PacketReceiver, RspPacket, format_packet, format_response};
use crate::riscv::REGISTER_COUNT;
use crate::target::{self, Breakpoint, BreakpointType, SharedTarget};
use crate::transport::Transport;

/// Stop reply for a halted hart, always reported on the single thread
pub const HALTED_REASON: &str = "T05thread:01;";
/// Stop reply after an interrupt request
pub const INTERRUPTED: &str = "T02";
/// Highest address plus one reachable with `m`/`M`
const MEMORY_LIMIT: u32 = 0x1_0000;

/// What the connection should do after feeding bytes to a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent
{
	/// Send these bytes to this client
	Reply(String),
	/// Send these bytes to every connected client
	Broadcast(String),
	/// Close this client's connection
	Close,
}

/// Stop reply naming the signal and the single thread
fn stop_reply(signal: u8) -> String
{
	format!("T{signal:02x}thread:01;")
}

fn reply(payload: &str) -> SessionEvent
{
	SessionEvent::Reply(format_response(payload))
}

fn ack() -> SessionEvent
{
	SessionEvent::Reply("+".into())
}

fn ok() -> Result<Vec<SessionEvent>, Error>
{
	Ok(vec![reply("OK")])
}

fn parse_hex(text: Option<&str>) -> Option<u32>
{
	u32::from_str_radix(text?, 16).ok()
}

fn decode_hex(text: &str) -> Option<Vec<u8>>
{
	if text.len() % 2 != 0 {
		return None;
	}
	(0..text.len())
		.step_by(2)
		.map(|index| u8::from_str_radix(text.get(index..index + 2)?, 16).ok())
		.collect()
}

fn encode_hex(bytes: &[u8]) -> String
{
	bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut text, byte| {
		let _ = write!(text, "{byte:02x}");
		text
	})
}

/// Register values travel as target-endian (little-endian) hex
fn decode_register(text: &str) -> Option<u32>
{
	let bytes: [u8; 4] = decode_hex(text)?.try_into().ok()?;
	Some(u32::from_le_bytes(bytes))
}

/// Validate an `m`/`M` range against the 16-bit address space
fn memory_range(packet: &RspPacket) -> Option<(u32, usize)>
{
	let address = parse_hex(packet.parameter(0))?;
	let length = parse_hex(packet.parameter(1))?;
	if address >= MEMORY_LIMIT || length > MEMORY_LIMIT - address {
		return None;
	}
	Some((address, length as usize))
}

pub struct RspSession<T>
{
	target: SharedTarget<T>,
	receiver: PacketReceiver,
	extended_mode: bool,
	last_reply: Option<String>,
}

impl<T: Transport> RspSession<T>
{
	/// Start a session. GDB re-sends its breakpoints on every connection, so any left over
	/// from an earlier one are dropped.
	pub fn new(target: SharedTarget<T>) -> Self
	{
		target::lock(&target).clear_breakpoints();
		Self {
			target,
			receiver: PacketReceiver::new(),
			extended_mode: false,
			last_reply: None,
		}
	}

	pub fn extended_mode(&self) -> bool
	{
		self.extended_mode
	}

	/// Feed bytes received from the client
	pub fn feed(&mut self, bytes: &[u8]) -> Vec<SessionEvent>
	{
		let mut events = Vec::new();
		for incoming in self.receiver.feed(bytes) {
			match incoming {
				Incoming::Interrupt => events.extend(self.interrupt()),
				Incoming::Ack => {},
				Incoming::Nack => {
					if let Some(last) = &self.last_reply {
						debug!("Client requested retransmission");
						events.push(SessionEvent::Reply(last.clone()));
					}
				},
				Incoming::Malformed(error) => {
					debug!("Rejecting packet: {}", error);
					events.push(SessionEvent::Reply("-".into()));
				},
				Incoming::Packet(packet) => events.extend(self.handle_packet(&packet)),
			}
			if events.contains(&SessionEvent::Close) {
				break;
			}
		}
		events
	}

	fn interrupt(&mut self) -> Vec<SessionEvent>
	{
		info!("Interrupt requested by client");
		let mut events = Vec::new();
		if let Err(error) = target::lock(&self.target).halt() {
			warn!("Failed to stop target: {}", error);
			if error.is_fatal_to_session() {
				events.push(SessionEvent::Close);
				return events;
			}
		}
		events.push(SessionEvent::Broadcast(format_response(INTERRUPTED)));
		events
	}

	/// Dispatch one packet, converting any failure into an error reply
	pub fn handle_packet(&mut self, packet: &RspPacket) -> Vec<SessionEvent>
	{
		let events = match self.dispatch(packet) {
			Ok(events) => events,
			Err(error) if error.is_fatal_to_session() => {
				error!("Probe lost while handling '{}': {}", packet.payload(), error);
				vec![reply(&error.errno().reply()), SessionEvent::Close]
			},
			Err(error) => {
				warn!("Request '{}' failed: {}", packet.payload(), error);
				vec![reply(&error.errno().reply())]
			},
		};

		for event in &events {
			if let SessionEvent::Reply(bytes) = event {
				trace!("--> {}", bytes);
				self.last_reply = Some(bytes.clone());
			}
		}
		events
	}

	fn dispatch(&mut self, packet: &RspPacket) -> Result<Vec<SessionEvent>, Error>
	{
		let Some(command) = packet.command() else {
			return Ok(vec![ack()]);
		};
		match command {
			'q' | 'Q' => Ok(vec![reply(Self::query(packet))]),
			'?' => {
				let signal = target::lock(&self.target).stop_signal();
				Ok(vec![reply(&stop_reply(signal))])
			},
			'!' => {
				self.extended_mode = true;
				ok()
			},
			'g' => self.read_registers(),
			'G' => self.write_registers(packet),
			'p' => self.read_register(packet),
			'P' => self.write_register(packet),
			'm' => self.read_memory(packet),
			'M' => self.write_memory(packet),
			'Z' => self.insert_breakpoint(packet),
			'z' => self.remove_breakpoint(packet),
			'c' => {
				target::lock(&self.target).resume()?;
				Ok(vec![ack()])
			},
			's' => {
				target::lock(&self.target).step()?;
				Ok(vec![ack(), SessionEvent::Reply(format_packet(HALTED_REASON))])
			},
			'D' => {
				info!("Client detached");
				target::lock(&self.target).detach()?;
				Ok(vec![ack(), SessionEvent::Close])
			},
			'k' => {
				info!("Client requested kill, closing session");
				Ok(vec![ack(), SessionEvent::Close])
			},
			'H' => ok(),
			// Unsupported packets GDB knows to fall back from must get an empty reply
			'v' | 'X' => Ok(vec![reply("")]),
			command => Err(RspError::UnsupportedCommand(command).into()),
		}
	}

	fn query(packet: &RspPacket) -> &'static str
	{
		let name = packet.parameter(0).unwrap_or("");
		match name {
			"Supported" => "PacketSize=4096",
			"Attached" => "1",
			"C" => "QC1",
			"fThreadInfo" => "m1",
			"sThreadInfo" => "l",
			"Symbol" => "OK",
			name if name.starts_with("Offset") => "Text=0;Data=0;Bss=0",
			_ => "",
		}
	}

	fn read_registers(&mut self) -> Result<Vec<SessionEvent>, Error>
	{
		let mut target = target::lock(&self.target);
		if !target.is_running() {
			target.sync_registers()?;
		}
		let mut payload = String::with_capacity(REGISTER_COUNT * 8);
		for &value in target.registers().values() {
			payload.push_str(&encode_hex(&value.to_le_bytes()));
		}
		Ok(vec![reply(&payload)])
	}

	fn write_registers(&mut self, packet: &RspPacket) -> Result<Vec<SessionEvent>, Error>
	{
		let text = packet.arguments();
		let malformed = || RspError::MalformedParameters { command: 'G' };
		// Byte offsets below are only valid on an all-ASCII payload
		if !text.is_ascii() || text.len() != REGISTER_COUNT * 8 {
			return Err(malformed().into());
		}
		let values = (0..REGISTER_COUNT)
			.map(|index| decode_register(&text[index * 8..index * 8 + 8]))
			.collect::<Option<Vec<u32>>>()
			.ok_or_else(malformed)?;
		target::lock(&self.target).write_registers(&values)?;
		ok()
	}

	fn read_register(&mut self, packet: &RspPacket) -> Result<Vec<SessionEvent>, Error>
	{
		let index = parse_hex(Some(packet.arguments())).ok_or(RspError::MalformedParameters { command: 'p' })?
			as usize;
		if index >= REGISTER_COUNT {
			return Err(RspError::BadRegister(index).into());
		}
		let mut target = target::lock(&self.target);
		if !target.is_running() {
			target.sync_registers()?;
		}
		let value = target.registers().get(index).ok_or(RspError::BadRegister(index))?;
		Ok(vec![reply(&encode_hex(&value.to_le_bytes()))])
	}

	fn write_register(&mut self, packet: &RspPacket) -> Result<Vec<SessionEvent>, Error>
	{
		let malformed = RspError::MalformedParameters { command: 'P' };
		let (index, value) = packet.arguments().split_once('=').ok_or(malformed.clone())?;
		let index = parse_hex(Some(index)).ok_or(malformed.clone())? as usize;
		let value = decode_register(value).ok_or(malformed)?;
		target::lock(&self.target).write_register(index, value)?;
		ok()
	}

	fn read_memory(&mut self, packet: &RspPacket) -> Result<Vec<SessionEvent>, Error>
	{
		let Some((address, length)) = memory_range(packet) else {
			return Ok(vec![reply(&Errno::Eperm.reply())]);
		};
		let data = target::lock(&self.target).read_memory(address, length)?;
		Ok(vec![reply(&encode_hex(&data))])
	}

	fn write_memory(&mut self, packet: &RspPacket) -> Result<Vec<SessionEvent>, Error>
	{
		let Some((address, length)) = memory_range(packet) else {
			return Ok(vec![reply(&Errno::Enoent.reply())]);
		};
		let Some(data) = packet.parameter(2).and_then(decode_hex) else {
			return Ok(vec![reply(&Errno::Enoent.reply())]);
		};
		if data.len() != length {
			return Err(RspError::MalformedParameters { command: 'M' }.into());
		}
		target::lock(&self.target).write_memory(address, &data)?;
		ok()
	}

	/// Parse `type,address,kind`. `Err` carries the reply for a rejected request.
	fn parse_breakpoint(packet: &RspPacket) -> Result<Breakpoint, &'static str>
	{
		let breakpoint_type = parse_hex(packet.parameter(0))
			.and_then(|value| BreakpointType::try_from(value).ok())
			.ok_or("E01")?;
		if breakpoint_type != BreakpointType::Software {
			return Err("E00");
		}
		let address = parse_hex(packet.parameter(1)).ok_or("E01")?;
		let kind = parse_hex(packet.parameter(2)).ok_or("E01")?;
		Ok(Breakpoint {
			breakpoint_type,
			address,
			kind,
		})
	}

	fn insert_breakpoint(&mut self, packet: &RspPacket) -> Result<Vec<SessionEvent>, Error>
	{
		let breakpoint = match Self::parse_breakpoint(packet) {
			Ok(breakpoint) => breakpoint,
			Err(rejection) => return Ok(vec![reply(rejection)]),
		};
		target::lock(&self.target).insert_breakpoint(breakpoint);
		ok()
	}

	fn remove_breakpoint(&mut self, packet: &RspPacket) -> Result<Vec<SessionEvent>, Error>
	{
		let breakpoint = match Self::parse_breakpoint(packet) {
			Ok(breakpoint) => breakpoint,
			Err(rejection) => return Ok(vec![reply(rejection)]),
		};
		match target::lock(&self.target).remove_breakpoint(breakpoint.address, breakpoint.kind) {
			Some(_) => ok(),
			None => Ok(vec![reply("E01")]),
		}
	}
}

#[cfg(test)]
mod tests
{
	use super::*;

	#[test]
	fn hex_helpers()
	{
		assert_eq!(decode_hex("00ff10"), Some(vec![0x00, 0xff, 0x10]));
		assert_eq!(decode_hex("0"), None);
		assert_eq!(decode_hex("zz"), None);
		assert_eq!(encode_hex(&[0xde, 0xad]), "dead");
		assert_eq!(decode_register("78563412"), Some(0x1234_5678));
	}

	#[test]
	fn stop_reply_carries_the_signal()
	{
		assert_eq!(stop_reply(5), HALTED_REASON);
		assert_eq!(stop_reply(2), "T02thread:01;");
	}

	#[test]
	fn memory_range_is_16_bit()
	{
		assert_eq!(memory_range(&RspPacket::from_payload("mfff0,10")), Some((0xfff0, 0x10)));
		assert_eq!(memory_range(&RspPacket::from_payload("mfff0,11")), None);
		assert_eq!(memory_range(&RspPacket::from_payload("m10000,1")), None);
		assert_eq!(memory_range(&RspPacket::from_payload("m100")), None);
	}
}
