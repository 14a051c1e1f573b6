// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 rvocd contributors

use std::collections::VecDeque;

/// The 16 states of the IEEE-1149.1 TAP controller
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TapState
{
	TestLogicReset,
	RunTestIdle,
	SelectDrScan,
	CaptureDr,
	ShiftDr,
	Exit1Dr,
	PauseDr,
	Exit2Dr,
	UpdateDr,
	SelectIrScan,
	CaptureIr,
	ShiftIr,
	Exit1Ir,
	PauseIr,
	Exit2Ir,
	UpdateIr,
}

impl TapState
{
	pub const ALL: [TapState; 16] = [
		Self::TestLogicReset,
		Self::RunTestIdle,
		Self::SelectDrScan,
		Self::CaptureDr,
		Self::ShiftDr,
		Self::Exit1Dr,
		Self::PauseDr,
		Self::Exit2Dr,
		Self::UpdateDr,
		Self::SelectIrScan,
		Self::CaptureIr,
		Self::ShiftIr,
		Self::Exit1Ir,
		Self::PauseIr,
		Self::Exit2Ir,
		Self::UpdateIr,
	];

	/// The state entered on the next TCK rising edge for the given TMS level
	pub fn next(self, tms: bool) -> TapState
	{
		use TapState::*;
		match (self, tms) {
			(TestLogicReset, false) => RunTestIdle,
			(TestLogicReset, true) => TestLogicReset,
			(RunTestIdle, false) => RunTestIdle,
			(RunTestIdle, true) => SelectDrScan,
			(SelectDrScan, false) => CaptureDr,
			(SelectDrScan, true) => SelectIrScan,
			(CaptureDr, false) | (ShiftDr, false) | (Exit2Dr, false) => ShiftDr,
			(CaptureDr, true) | (ShiftDr, true) => Exit1Dr,
			(Exit1Dr, false) | (PauseDr, false) => PauseDr,
			(Exit1Dr, true) | (Exit2Dr, true) => UpdateDr,
			(PauseDr, true) => Exit2Dr,
			(UpdateDr, false) | (UpdateIr, false) => RunTestIdle,
			(UpdateDr, true) | (UpdateIr, true) => SelectDrScan,
			(SelectIrScan, false) => CaptureIr,
			(SelectIrScan, true) => TestLogicReset,
			(CaptureIr, false) | (ShiftIr, false) | (Exit2Ir, false) => ShiftIr,
			(CaptureIr, true) | (ShiftIr, true) => Exit1Ir,
			(Exit1Ir, false) | (PauseIr, false) => PauseIr,
			(Exit1Ir, true) | (Exit2Ir, true) => UpdateIr,
			(PauseIr, true) => Exit2Ir,
		}
	}

	pub fn is_shift(self) -> bool
	{
		matches!(self, Self::ShiftDr | Self::ShiftIr)
	}

	fn index(self) -> usize
	{
		self as usize
	}

	/// Compute the shortest TMS sequence that moves the TAP from this state to `target`.
	///
	/// Returns an empty sequence when already there, and `None` if `target` cannot be reached.
	pub fn path_to(self, target: TapState) -> Option<Vec<bool>>
	{
		// Breadth-first search over the transition table, remembering how each state was entered
		let mut entered_from: [Option<(TapState, bool)>; 16] = [None; 16];
		let mut visited = [false; 16];
		let mut queue = VecDeque::from([self]);
		visited[self.index()] = true;

		while let Some(state) = queue.pop_front() {
			if state == target {
				let mut path = Vec::new();
				let mut cursor = state;
				while let Some((previous, tms)) = entered_from[cursor.index()] {
					path.push(tms);
					cursor = previous;
				}
				path.reverse();
				return Some(path);
			}
			for tms in [false, true] {
				let next = state.next(tms);
				if !visited[next.index()] {
					visited[next.index()] = true;
					entered_from[next.index()] = Some((state, tms));
					queue.push_back(next);
				}
			}
		}
		None
	}
}
