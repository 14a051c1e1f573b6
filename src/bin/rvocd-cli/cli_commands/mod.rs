// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 rvocd contributors

use clap::Subcommand;
use color_eyre::eyre::Result;
use log::info;
use rvocd::config::Config;
use rvocd::jtag::TapController;
use rvocd::riscv::DmiController;
use rvocd::transport::FtdiTransport;

use crate::cli_commands::probe::ProbeArguments;
use crate::cli_commands::server::ServerArguments;
use crate::{CliArguments, CompletionArguments};

pub mod probe;
pub mod server;

#[derive(Subcommand)]
pub enum ToplevelCommands
{
	/// Attach to the target and serve GDB remote protocol clients
	Server(ServerArguments),
	/// Actions to be performed against a probe
	Probe(ProbeArguments),
	/// Generate completions data for the shell
	Complete(CompletionArguments),
}

/// Open the single probe selected on the command line and wrap it in a DMI controller
fn open_dmi(cli_args: &CliArguments, config: &Config, operation: &str) -> Result<DmiController<FtdiTransport>>
{
	let mut results = cli_args.matcher(config).find_matching_probes();
	let probe = results.pop_single(operation)?;
	info!("Using probe {}", probe);

	let transport = probe.open(&config.probe)?;
	let tap = TapController::new(transport, config);
	Ok(DmiController::new(tap, config))
}
