// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 rvocd contributors

//! IEEE-1149.1 Test Access Port control over an FTDI MPSSE engine.

pub mod mpsse;
mod state;
mod tap;

pub use state::TapState;
pub use tap::TapController;

/// Expand the low `length` bits of `value` into a bit sequence, LSB first
pub fn bits_from(value: u128, length: usize) -> Vec<bool>
{
	(0..length).map(|bit| (value >> bit) & 1 == 1).collect()
}

/// Collapse an LSB-first bit sequence back into an integer
pub fn bits_to(bits: &[bool]) -> u128
{
	bits.iter()
		.enumerate()
		.fold(0, |value, (bit, &set)| value | (u128::from(set) << bit))
}

#[cfg(test)]
mod tests
{
	use super::*;

	#[test]
	fn bit_sequences_are_lsb_first()
	{
		assert_eq!(bits_from(0b1101, 5), vec![true, false, true, true, false]);
		assert_eq!(bits_to(&[false, true, true]), 0b110);
		assert_eq!(bits_to(&bits_from(0x1_2345_6789_a, 41)), 0x1_2345_6789_a);
	}
}
