// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 rvocd contributors

//! RISC-V External Debug Support (v0.13) over JTAG: the debug transport module, the debug
//! module's abstract commands, and the hart's register map.

pub mod debug_module;
pub mod dtm;
pub mod registers;

pub use debug_module::{AbstractCommandStatus, CmdErr, RegisterOp};
pub use dtm::{DmiController, DmiOp, DmiRegisterAccess, DmiStatus, DtmcsStatus};
pub use registers::{CpuRegisterFile, REGISTER_COUNT};
