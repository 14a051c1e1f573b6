// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 rvocd contributors

//! GDB Remote Serial Protocol front end.

pub mod packet;
pub mod server;
pub mod session;

pub use packet::{Incoming, PacketReceiver, RspPacket, checksum, format_packet, format_response};
pub use server::{RspServer, ServerHandle};
pub use session::{RspSession, SessionEvent};
