// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 rvocd contributors

//! Byte-level channel to the physical probe.
//!
//! Everything above this module speaks MPSSE command bytes; a [Transport] only moves those
//! bytes to and from the wire, blocking for at most the timeout given on each call.

use std::time::{Duration, Instant};

use crate::error::TransportError;

pub mod ftdi;
pub mod matcher;

pub use ftdi::FtdiTransport;
pub use matcher::{FtdiProbe, ProbeMatcher};

pub trait Transport: Send
{
	/// Write the bytes to the probe, returning how many were accepted
	fn write(&mut self, data: &[u8], timeout: Duration) -> Result<usize, TransportError>;
	/// Read up to `max` bytes, blocking until at least one arrives or the timeout elapses
	fn read(&mut self, max: usize, timeout: Duration) -> Result<Vec<u8>, TransportError>;
	/// Number of bytes that can be read without blocking
	fn available(&mut self) -> Result<usize, TransportError>;
	fn close(&mut self) -> Result<(), TransportError>;

	/// Read exactly `count` bytes, failing with a timeout if they do not all arrive in time
	fn read_exact(&mut self, count: usize, timeout: Duration) -> Result<Vec<u8>, TransportError>
	{
		let deadline = Instant::now() + timeout;
		let mut data = Vec::with_capacity(count);
		while data.len() < count {
			let remaining = deadline.saturating_duration_since(Instant::now());
			if remaining.is_zero() {
				return Err(TransportError::Timeout(timeout));
			}
			let chunk = self.read(count - data.len(), remaining)?;
			data.extend_from_slice(&chunk);
		}
		Ok(data)
	}
}

impl<T: Transport + ?Sized> Transport for Box<T>
{
	fn write(&mut self, data: &[u8], timeout: Duration) -> Result<usize, TransportError>
	{
		(**self).write(data, timeout)
	}

	fn read(&mut self, max: usize, timeout: Duration) -> Result<Vec<u8>, TransportError>
	{
		(**self).read(max, timeout)
	}

	fn available(&mut self) -> Result<usize, TransportError>
	{
		(**self).available()
	}

	fn close(&mut self) -> Result<(), TransportError>
	{
		(**self).close()
	}
}
