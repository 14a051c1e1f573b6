// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 rvocd contributors

use std::path::PathBuf;
use std::str::FromStr;

use clap::Args;
use color_eyre::eyre::{Context, Result};
use log::info;
use rvocd::config::LauncherConfig;
use rvocd::gdb::RspServer;
use rvocd::target::TargetModel;

use crate::CliArguments;
use crate::cli_commands::open_dmi;

#[derive(Args)]
pub struct ServerArguments
{
	#[arg(short = 'l', long = "listen-port", value_parser = u16::from_str)]
	/// TCP port to accept GDB connections on
	listen_port: Option<u16>,
	#[arg(long = "bind")]
	/// Address to bind the listening socket to
	bind: Option<String>,
	#[arg(long = "launch")]
	/// Program to start for every GDB client (for example a debugger front-end)
	launch: Option<PathBuf>,
	#[arg(long = "launch-arg", requires = "launch", allow_hyphen_values = true)]
	/// Argument passed to the launched program (may be repeated)
	launch_args: Vec<String>,
}

impl ServerArguments
{
	pub fn run(&self, cli_args: &CliArguments) -> Result<()>
	{
		let mut config = cli_args.config()?;
		if let Some(port) = self.listen_port {
			config.server.port = port;
		}
		if let Some(bind) = &self.bind {
			config.server.bind = bind.clone();
		}
		if let Some(program) = &self.launch {
			config.server.launcher = Some(LauncherConfig {
				program: program.clone(),
				args: self.launch_args.clone(),
			});
		}

		let dmi = open_dmi(cli_args, &config, "serve")?;
		let mut target = TargetModel::new(dmi);
		target.attach().wrap_err("Failed to attach to the target")?;
		info!("Serving GDB on {}:{}", config.server.bind, config.server.port);

		RspServer::new(target.into_shared(), &config.server).run()?;
		Ok(())
	}
}
