// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 rvocd contributors

pub mod config;
pub mod error;
pub mod gdb;
pub mod jtag;
pub mod riscv;
pub mod target;
pub mod transport;
pub mod usb;
