// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 rvocd contributors

use clap::{Args, Subcommand};
use color_eyre::eyre::{Context, Result};
use log::debug;

use crate::CliArguments;
use crate::cli_commands::open_dmi;

#[derive(Args)]
pub struct ProbeArguments
{
	#[command(subcommand)]
	subcommand: ProbeCommands,
}

impl ProbeArguments
{
	pub fn subcommand(&self, cli_args: &CliArguments) -> Result<()>
	{
		match &self.subcommand {
			ProbeCommands::Info => info_command(cli_args),
			ProbeCommands::Dtm => dtm_command(cli_args),
		}
	}
}

#[derive(Subcommand)]
#[command(arg_required_else_help(true))]
enum ProbeCommands
{
	/// Print information about connected FTDI JTAG probes
	Info,
	/// Connect to the RISC-V debug transport module and print its status
	Dtm,
}

fn info_command(cli_args: &CliArguments) -> Result<()>
{
	let config = cli_args.config()?;
	let mut results = cli_args.matcher(&config).find_matching_probes();
	let probes = results.pop_all()?;
	let multiple = probes.len() > 1;

	for (index, probe) in probes.iter().enumerate() {
		println!("Found: {probe}");

		// With several probes attached the index is what selects one
		if multiple {
			println!("  Index:  {index}\n");
		}
	}

	Ok(())
}

fn dtm_command(cli_args: &CliArguments) -> Result<()>
{
	let config = cli_args.config()?;
	let mut dmi = open_dmi(cli_args, &config, "DTM status")?;

	let status = dmi.connect().wrap_err("Failed to connect to the DTM")?;
	let idcode = dmi.read_idcode()?;
	debug!("{:?}", status);

	println!("IDCODE:        {idcode:#010x}");
	println!("DTM version:   {}", status.version);
	println!("Address bits:  {}", status.abits);
	println!("Idle cycles:   {}", status.idle);
	println!("DMI status:    {:?}", status.dmistat);

	dmi.tap_mut().close()?;
	Ok(())
}
