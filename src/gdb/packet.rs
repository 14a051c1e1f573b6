// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 rvocd contributors

use std::fmt::Write;

use log::trace;

use crate::error::RspError;

/// Out-of-band interrupt request (Ctrl-C)
pub const INTERRUPT: u8 = 0x03;
/// Largest packet accepted, matching the `PacketSize` advertised in `qSupported`
pub const MAX_PACKET_SIZE: usize = 4096;

const PARAMETER_DELIMITERS: [char; 4] = [',', '#', ':', ';'];

/// Sum of the payload bytes modulo 256
pub fn checksum(payload: &[u8]) -> u8
{
	payload.iter().fold(0u8, |sum, &byte| sum.wrapping_add(byte))
}

/// Frame a payload as `$<payload>#<checksum>`
pub fn format_packet(payload: &str) -> String
{
	let mut packet = String::with_capacity(payload.len() + 4);
	// Writing to a String cannot fail
	let _ = write!(packet, "${}#{:02x}", payload, checksum(payload.as_bytes()));
	packet
}

/// Acknowledge the request and frame the reply as `+$<payload>#<checksum>`
pub fn format_response(payload: &str) -> String
{
	format!("+{}", format_packet(payload))
}

fn hex_digit(byte: u8) -> Option<u8>
{
	(byte as char).to_digit(16).map(|digit| digit as u8)
}

/// A framed, checksum-verified RSP packet split into its command and parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RspPacket
{
	raw: Vec<u8>,
	payload: String,
	command: Option<char>,
	parameters: Vec<String>,
}

impl RspPacket
{
	/// Parse `[+]$<payload>#<checksum>`, validating the framing and checksum
	pub fn parse(raw: &[u8]) -> Result<Self, RspError>
	{
		let framed = raw.strip_prefix(b"+").unwrap_or(raw);
		let framed = framed.strip_prefix(b"$").ok_or(RspError::Framing)?;
		let hash = framed.iter().rposition(|&byte| byte == b'#').ok_or(RspError::Framing)?;
		let (body, trailer) = framed.split_at(hash);
		let [_, high, low] = trailer else {
			return Err(RspError::Framing);
		};
		let received = hex_digit(*high)
			.zip(hex_digit(*low))
			.map(|(high, low)| (high << 4) | low)
			.ok_or(RspError::Framing)?;

		let computed = checksum(body);
		if received != computed {
			return Err(RspError::Checksum { received, computed });
		}

		let payload = String::from_utf8_lossy(body).into_owned();
		Ok(Self::build(raw.to_vec(), payload))
	}

	/// Build a packet straight from its payload, skipping framing
	pub fn from_payload(payload: &str) -> Self
	{
		Self::build(format_packet(payload).into_bytes(), payload.to_string())
	}

	fn build(raw: Vec<u8>, payload: String) -> Self
	{
		let mut chars = payload.chars();
		let command = chars.next();
		let rest = chars.as_str();
		let parameters = if rest.is_empty() {
			Vec::new()
		} else {
			rest.split(PARAMETER_DELIMITERS).map(str::to_string).collect()
		};
		Self {
			raw,
			payload,
			command,
			parameters,
		}
	}

	pub fn raw(&self) -> &[u8]
	{
		&self.raw
	}

	pub fn payload(&self) -> &str
	{
		&self.payload
	}

	/// First character of the payload, `None` for an empty packet
	pub fn command(&self) -> Option<char>
	{
		self.command
	}

	/// Everything after the command character
	pub fn arguments(&self) -> &str
	{
		self.command
			.map_or("", |command| &self.payload[command.len_utf8()..])
	}

	pub fn parameters(&self) -> &[String]
	{
		&self.parameters
	}

	pub fn parameter(&self, index: usize) -> Option<&str>
	{
		self.parameters.get(index).map(String::as_str)
	}
}

/// Something received from the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming
{
	Interrupt,
	Ack,
	Nack,
	Packet(RspPacket),
	Malformed(RspError),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum State
{
	Ready,
	Body,
	Checksum1,
	Checksum2,
}

/// Incremental packet framer, so packets split across socket reads are reassembled
#[derive(Debug)]
pub struct PacketReceiver
{
	state: State,
	buffer: Vec<u8>,
	garbage: bool,
}

impl Default for PacketReceiver
{
	fn default() -> Self
	{
		Self {
			state: State::Ready,
			buffer: Vec::new(),
			garbage: false,
		}
	}
}

impl PacketReceiver
{
	pub fn new() -> Self
	{
		Self::default()
	}

	/// Feed received bytes, returning everything completed by them in arrival order
	pub fn feed(&mut self, bytes: &[u8]) -> Vec<Incoming>
	{
		let mut incoming = Vec::new();
		for &byte in bytes {
			if let Some(item) = self.pump(byte, &mut incoming) {
				incoming.push(item);
			}
		}
		// Bytes outside any packet are reported once per read
		if self.garbage && self.state == State::Ready {
			self.garbage = false;
			incoming.push(Incoming::Malformed(RspError::Framing));
		}
		incoming
	}

	fn flush_garbage(&mut self, incoming: &mut Vec<Incoming>)
	{
		if self.garbage {
			self.garbage = false;
			incoming.push(Incoming::Malformed(RspError::Framing));
		}
	}

	fn pump(&mut self, byte: u8, incoming: &mut Vec<Incoming>) -> Option<Incoming>
	{
		match self.state {
			State::Ready => match byte {
				INTERRUPT => {
					self.flush_garbage(incoming);
					Some(Incoming::Interrupt)
				},
				b'+' => {
					self.flush_garbage(incoming);
					Some(Incoming::Ack)
				},
				b'-' => {
					self.flush_garbage(incoming);
					Some(Incoming::Nack)
				},
				b'$' => {
					self.flush_garbage(incoming);
					self.buffer.clear();
					self.buffer.push(byte);
					self.state = State::Body;
					None
				},
				b'\r' | b'\n' | b' ' => None,
				_ => {
					self.garbage = true;
					None
				},
			},
			State::Body => {
				self.buffer.push(byte);
				if byte == b'#' {
					self.state = State::Checksum1;
				} else if self.buffer.len() > MAX_PACKET_SIZE {
					self.state = State::Ready;
					self.buffer.clear();
					return Some(Incoming::Malformed(RspError::Framing));
				}
				None
			},
			State::Checksum1 => {
				self.buffer.push(byte);
				self.state = State::Checksum2;
				None
			},
			State::Checksum2 => {
				self.buffer.push(byte);
				self.state = State::Ready;
				trace!("<-- {}", String::from_utf8_lossy(&self.buffer));
				let result = RspPacket::parse(&self.buffer);
				self.buffer.clear();
				Some(match result {
					Ok(packet) => Incoming::Packet(packet),
					Err(error) => Incoming::Malformed(error),
				})
			},
		}
	}
}

#[cfg(test)]
mod tests
{
	use super::*;

	#[test]
	fn checksum_matches_known_packets()
	{
		assert_eq!(checksum(b"qSupported"), 0x37);
		assert_eq!(checksum(b"g"), 0x67);
		assert_eq!(format_response("OK"), "+$OK#9a");
		assert_eq!(format_packet(""), "$#00");
	}

	#[test]
	fn parameters_split_on_delimiters()
	{
		let packet = RspPacket::parse(b"$M1000,4:01020304#32").expect("valid packet");
		assert_eq!(packet.command(), Some('M'));
		assert_eq!(packet.parameters(), &["1000", "4", "01020304"]);

		let packet = RspPacket::from_payload("qSupported:multiprocess+;swbreak+");
		assert_eq!(packet.parameter(0), Some("Supported"));
		assert_eq!(packet.parameter(2), Some("swbreak+"));
		assert_eq!(packet.arguments(), "Supported:multiprocess+;swbreak+");
	}

	#[test]
	fn bad_checksum_and_framing_are_rejected()
	{
		assert!(matches!(
			RspPacket::parse(b"$g#68"),
			Err(RspError::Checksum { received: 0x68, computed: 0x67 })
		));
		assert!(matches!(RspPacket::parse(b"g#67"), Err(RspError::Framing)));
		assert!(matches!(RspPacket::parse(b"$g#6"), Err(RspError::Framing)));
		assert!(RspPacket::parse(b"+$g#67").is_ok());
	}

	#[test]
	fn receiver_reassembles_split_packets()
	{
		let mut receiver = PacketReceiver::new();
		assert_eq!(receiver.feed(b"+$qSupp"), vec![Incoming::Ack]);
		let incoming = receiver.feed(b"orted#37\x03");
		assert_eq!(incoming.len(), 2);
		assert!(matches!(&incoming[0], Incoming::Packet(packet) if packet.payload() == "qSupported"));
		assert_eq!(incoming[1], Incoming::Interrupt);
	}

	#[test]
	fn receiver_flags_garbage_once()
	{
		let mut receiver = PacketReceiver::new();
		let incoming = receiver.feed(b"junk$g#67");
		assert_eq!(incoming.len(), 2);
		assert_eq!(incoming[0], Incoming::Malformed(RspError::Framing));
		assert!(matches!(&incoming[1], Incoming::Packet(_)));
	}
}
