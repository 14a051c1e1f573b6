// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 rvocd contributors

mod cli_commands;

use std::io::stdout;
use std::path::PathBuf;
use std::str::FromStr;

use clap::builder::styling::Styles;
use clap::{Args, CommandFactory, Parser, crate_description, crate_version};
use clap_complete::{Shell, generate};
use color_eyre::config::HookBuilder;
use color_eyre::eyre::{EyreHandler, InstallError, Result};
use owo_colors::OwoColorize;
use rvocd::config::Config;
use rvocd::transport::ProbeMatcher;

use crate::cli_commands::ToplevelCommands;

#[derive(Parser)]
#[command(
	version,
	about = format!("{} v{}", crate_description!(), crate_version!()),
	styles(style()),
	disable_colored_help(false),
	arg_required_else_help(true)
)]
struct CliArguments
{
	#[arg(global = true, short = 's', long = "serial", alias = "serial-number")]
	/// Use the probe with the given serial number
	serial_number: Option<String>,
	#[arg(global = true, long = "index", value_parser = usize::from_str)]
	/// Use the nth found probe (may be unstable!)
	index: Option<usize>,
	#[arg(global = true, short = 'p', long = "port")]
	/// Use the probe on the given USB port
	port: Option<String>,
	#[arg(global = true, short = 'c', long = "config")]
	/// Read configuration from this file instead of the default location
	config: Option<PathBuf>,

	#[command(subcommand)]
	pub subcommand: ToplevelCommands,
}

impl CliArguments
{
	/// Load the configuration file, applying the probe selection given on the command line
	fn config(&self) -> Result<Config>
	{
		let mut config = Config::load(self.config.as_deref())?;
		if let Some(serial) = &self.serial_number {
			config.probe.serial = Some(serial.clone());
		}
		Ok(config)
	}

	fn matcher(&self, config: &Config) -> ProbeMatcher
	{
		ProbeMatcher::from_config(&config.probe)
			.index(self.index)
			.port(self.port.clone())
	}
}

#[derive(Args)]
struct CompletionArguments
{
	shell: Shell,
}

type EyreHookFunc = Box<dyn Fn(&(dyn std::error::Error + 'static)) -> Box<dyn EyreHandler> + Send + Sync + 'static>;
type PanicHookFunc = Box<dyn Fn(&std::panic::PanicHookInfo<'_>) + Send + Sync + 'static>;

const CUT_HERE: &str = "------------[ ✂ cut here ✂ ]------------";

struct RvocdHook
{
	inner_hook: EyreHookFunc,
}

struct RvocdPanic
{
	inner_hook: PanicHookFunc,
}

struct RvocdHandler
{
	inner_handler: Box<dyn EyreHandler>,
}

impl RvocdHook
{
	fn build_handler(&self, error: &(dyn std::error::Error + 'static)) -> RvocdHandler
	{
		RvocdHandler {
			inner_handler: (*self.inner_hook)(error),
		}
	}

	pub fn install(self) -> Result<(), InstallError>
	{
		color_eyre::eyre::set_hook(self.into_eyre_hook())
	}

	pub fn into_eyre_hook(self) -> EyreHookFunc
	{
		Box::new(move |err| Box::new(self.build_handler(err)))
	}
}

impl RvocdPanic
{
	pub fn install(self)
	{
		std::panic::set_hook(self.into_panic_hook());
	}

	pub fn into_panic_hook(self) -> PanicHookFunc
	{
		Box::new(move |panic_info| {
			eprintln!("{CUT_HERE}");
			eprintln!("Unhandled crash in rvocd-cli v{}", crate_version!());
			eprintln!();
			(*self.inner_hook)(panic_info);
			eprintln!();
			eprintln!("{}", "Please include all lines down to this one from the cut here".yellow());
			eprintln!("{}", "marker when reporting this issue".yellow());
		})
	}
}

impl EyreHandler for RvocdHandler
{
	fn debug(&self, error: &(dyn std::error::Error + 'static), fmt: &mut core::fmt::Formatter<'_>)
	-> core::fmt::Result
	{
		writeln!(fmt, "{CUT_HERE}")?;
		write!(fmt, "Unhandled error in rvocd-cli v{}", crate_version!())?;
		self.inner_handler.debug(error, fmt)?;
		writeln!(fmt)?;
		writeln!(fmt)?;
		writeln!(
			fmt,
			"{}",
			"Please include all lines down to this one from the cut here".yellow()
		)?;
		write!(fmt, "{}", " marker when reporting this issue".yellow())
	}

	fn track_caller(&mut self, location: &'static std::panic::Location<'static>)
	{
		self.inner_handler.track_caller(location);
	}
}

fn install_error_handler() -> Result<()>
{
	let (panic_hook, eyre_hook) = HookBuilder::default().try_into_hooks()?;

	// Both hooks wrap the stock color-eyre ones and only add the report banner
	RvocdPanic {
		inner_hook: panic_hook.into_panic_hook(),
	}
	.install();
	RvocdHook {
		inner_hook: eyre_hook.into_eyre_hook(),
	}
	.install()?;
	Ok(())
}

fn style() -> clap::builder::Styles
{
	Styles::styled()
		.usage(
			anstyle::Style::new()
				.fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Yellow)))
				.bold(),
		)
		.header(
			anstyle::Style::new()
				.bold()
				.fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Yellow))),
		)
		.literal(anstyle::Style::new().fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Green))))
}

fn main() -> Result<()>
{
	install_error_handler()?;
	env_logger::Builder::new()
		.filter_level(log::LevelFilter::Info)
		.parse_default_env()
		.init();

	let cli_args = CliArguments::parse();

	match &cli_args.subcommand {
		ToplevelCommands::Server(server_args) => server_args.run(&cli_args),
		ToplevelCommands::Probe(probe_args) => probe_args.subcommand(&cli_args),
		ToplevelCommands::Complete(comp_args) => {
			let mut cmd = CliArguments::command();
			generate(comp_args.shell, &mut cmd, "rvocd-cli", &mut stdout());
			Ok(())
		},
	}
}
