// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 rvocd contributors

mod common;

use color_eyre::eyre::Result;
use rvocd::error::TapError;
use rvocd::jtag::TapState;

use crate::common::{IDCODE, SimProbe, minimum_clocks, tap_controller};

#[test]
fn every_state_pair_takes_the_shortest_path() -> Result<()>
{
	let probe = SimProbe::new();
	let mut tap = tap_controller(&probe);

	for from in TapState::ALL {
		for to in TapState::ALL {
			tap.reset()?;
			tap.goto(from)?;
			assert_eq!(probe.state().tap_state, from);

			let before = probe.state().tms_clocks;
			let clocks = tap.goto(to)?;
			let clocked = probe.state().tms_clocks - before;

			assert_eq!(clocks, minimum_clocks(from, to), "{from:?} -> {to:?}");
			assert_eq!(clocked, clocks, "{from:?} -> {to:?}");
			assert_eq!(probe.state().tap_state, to, "{from:?} -> {to:?}");
			assert_eq!(tap.state(), Some(to));
		}
	}
	Ok(())
}

#[test]
fn reset_is_idempotent() -> Result<()>
{
	let probe = SimProbe::new();
	let mut tap = tap_controller(&probe);

	tap.goto(TapState::PauseIr)?;
	tap.reset()?;
	assert_eq!(tap.state(), Some(TapState::RunTestIdle));
	tap.reset()?;
	assert_eq!(tap.state(), Some(TapState::RunTestIdle));
	assert_eq!(probe.state().tap_state, TapState::RunTestIdle);
	Ok(())
}

#[test]
fn scans_return_captured_values() -> Result<()>
{
	let probe = SimProbe::new();
	let mut tap = tap_controller(&probe);
	tap.reset()?;

	// IR capture always loads 0b00001
	assert_eq!(tap.scan_ir(0x01)?, 0b00001);
	assert_eq!(tap.scan_dr(0, 32)?, u128::from(IDCODE));
	assert_eq!(tap.state(), Some(TapState::RunTestIdle));

	tap.idle(10)?;
	assert_eq!(probe.state().tap_state, TapState::RunTestIdle);
	Ok(())
}

#[test]
fn transport_failure_leaves_state_unknown() -> Result<()>
{
	let probe = SimProbe::new();
	let mut tap = tap_controller(&probe);
	tap.reset()?;

	probe.state().transport_fault = true;
	assert!(tap.scan_dr(0, 32).is_err());
	assert_eq!(tap.state(), None);
	assert!(matches!(tap.goto(TapState::ShiftDr), Err(TapError::StateUnknown)));

	probe.state().transport_fault = false;
	tap.reset()?;
	assert_eq!(tap.state(), Some(TapState::RunTestIdle));
	Ok(())
}

#[test]
fn shifting_outside_a_shift_state_is_refused() -> Result<()>
{
	let probe = SimProbe::new();
	let mut tap = tap_controller(&probe);
	tap.reset()?;

	let result = tap.shift(&[true, false], false);
	assert!(matches!(result, Err(TapError::NotShifting(TapState::RunTestIdle))));
	Ok(())
}
