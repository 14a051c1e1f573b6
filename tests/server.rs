// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 rvocd contributors

mod common;

use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::{Duration, Instant};

use color_eyre::eyre::{Result, bail};
use rvocd::config::ServerConfig;
use rvocd::gdb::{RspServer, ServerHandle, format_packet};
use rvocd::target::{self, EBREAK, SharedTarget};

use crate::common::{SimProbe, SimTransport, attached_target};

const DEADLINE: Duration = Duration::from_secs(5);

fn start(probe: &SimProbe, config: ServerConfig) -> Result<ServerHandle>
{
	Ok(start_with_target(probe, config)?.0)
}

fn start_with_target(probe: &SimProbe, config: ServerConfig) -> Result<(ServerHandle, SharedTarget<SimTransport>)>
{
	let target = attached_target(probe);
	let handle = RspServer::new(target.clone(), &config).spawn()?;
	Ok((handle, target))
}

fn local_config() -> ServerConfig
{
	ServerConfig {
		bind: "127.0.0.1".into(),
		port: 0,
		poll_interval_ms: 10,
		launcher: None,
	}
}

fn connect(handle: &ServerHandle) -> Result<TcpStream>
{
	let stream = TcpStream::connect(handle.local_addr())?;
	stream.set_read_timeout(Some(Duration::from_millis(100)))?;
	Ok(stream)
}

/// Read until `needle` shows up in the received text
fn read_until(stream: &mut TcpStream, needle: &str) -> Result<String>
{
	let start = Instant::now();
	let mut received = String::new();
	let mut buffer = [0; 512];
	while !received.contains(needle) {
		if start.elapsed() > DEADLINE {
			bail!("timed out waiting for {needle:?}, got {received:?}");
		}
		match stream.read(&mut buffer) {
			Ok(0) => bail!("connection closed waiting for {needle:?}, got {received:?}"),
			Ok(count) => received.push_str(&String::from_utf8_lossy(&buffer[..count])),
			Err(_) => continue,
		}
	}
	Ok(received)
}

fn request(stream: &mut TcpStream, payload: &str, expected: &str) -> Result<String>
{
	stream.write_all(format_packet(payload).as_bytes())?;
	read_until(stream, expected)
}

#[test]
fn answers_over_tcp() -> Result<()>
{
	let probe = SimProbe::new();
	let handle = start(&probe, local_config())?;

	let mut client = connect(&handle)?;
	let received = request(&mut client, "qSupported", "+$PacketSize=4096#03")?;
	assert_eq!(received, "+$PacketSize=4096#03");

	drop(client);
	handle.shutdown();
	Ok(())
}

#[test]
fn stop_is_broadcast_to_every_client() -> Result<()>
{
	let probe = SimProbe::new();
	let handle = start(&probe, local_config())?;

	let mut first = connect(&handle)?;
	let mut second = connect(&handle)?;
	// A round trip on each makes sure both are registered for broadcasts
	request(&mut first, "qC", "QC1")?;
	request(&mut second, "qC", "QC1")?;

	request(&mut first, "c", "+")?;
	probe.stop_hart();

	read_until(&mut first, "$T05thread:01;#07")?;
	read_until(&mut second, "$T05thread:01;#07")?;
	handle.shutdown();
	Ok(())
}

#[test]
fn breakpoint_hit_clears_the_breakpoint_set() -> Result<()>
{
	let probe = SimProbe::new();
	probe.load_memory(0x1000, &0x0000_0013u32.to_le_bytes());
	let (handle, target) = start_with_target(&probe, local_config())?;

	let mut client = connect(&handle)?;
	request(&mut client, "Z0,1000,4", "OK")?;
	request(&mut client, "c", "+")?;
	assert_eq!(probe.word(0x1000), EBREAK);

	probe.stop_hart();
	read_until(&mut client, "$T05thread:01;#07")?;
	assert_eq!(target::lock(&target).breakpoints().count(), 0);
	assert_eq!(probe.word(0x1000), 0x0000_0013);

	handle.shutdown();
	Ok(())
}

#[test]
fn kill_closes_only_that_connection() -> Result<()>
{
	let probe = SimProbe::new();
	let handle = start(&probe, local_config())?;

	let mut first = connect(&handle)?;
	let mut second = connect(&handle)?;
	request(&mut first, "k", "+")?;
	wait_for_close(&mut first)?;
	request(&mut second, "?", "T05thread:01;")?;
	handle.shutdown();
	Ok(())
}

#[cfg(unix)]
#[test]
fn launcher_runs_for_each_client() -> Result<()>
{
	use std::path::PathBuf;

	use rvocd::config::LauncherConfig;

	let marker = std::env::temp_dir().join(format!("rvocd-launcher-{}", std::process::id()));
	let _ = std::fs::remove_file(&marker);

	let probe = SimProbe::new();
	let mut config = local_config();
	config.launcher = Some(LauncherConfig {
		program: PathBuf::from("sh"),
		args: vec!["-c".into(), format!("echo started > {}; cat", marker.display())],
	});
	let handle = start(&probe, config)?;

	let mut client = connect(&handle)?;
	request(&mut client, "qC", "QC1")?;

	let start = Instant::now();
	while !marker.exists() {
		if start.elapsed() > DEADLINE {
			bail!("launcher never ran");
		}
		std::thread::sleep(Duration::from_millis(10));
	}

	drop(client);
	handle.shutdown();
	let _ = std::fs::remove_file(&marker);
	Ok(())
}

/// Wait for the server to close the connection from its end
fn wait_for_close(stream: &mut TcpStream) -> Result<()>
{
	let start = Instant::now();
	let mut buffer = [0; 16];
	loop {
		match stream.read(&mut buffer) {
			Ok(0) => return Ok(()),
			_ if start.elapsed() > DEADLINE => bail!("connection was not closed"),
			_ => continue,
		}
	}
}

#[cfg(target_os = "linux")]
#[test]
fn launcher_is_reaped_before_the_socket_closes() -> Result<()>
{
	use std::path::{Path, PathBuf};

	use rvocd::config::LauncherConfig;

	let pid_file = std::env::temp_dir().join(format!("rvocd-launcher-pid-{}", std::process::id()));
	let _ = std::fs::remove_file(&pid_file);

	let probe = SimProbe::new();
	let mut config = local_config();
	config.launcher = Some(LauncherConfig {
		program: PathBuf::from("sh"),
		args: vec![
			"-c".into(),
			format!("echo $$ >> {}; exec cat > /dev/null", pid_file.display()),
		],
	});
	let handle = start(&probe, config)?;

	let mut client = connect(&handle)?;
	request(&mut client, "qC", "QC1")?;

	// Every launch appends its pid. The server starts the next client's launcher as soon as
	// this one is accepted, so only some of them belong to this connection.
	let launched = || -> Vec<String> {
		std::fs::read_to_string(&pid_file)
			.map(|text| text.lines().map(str::to_string).collect())
			.unwrap_or_default()
	};
	let alive = |pid: &String| Path::new(&format!("/proc/{pid}")).exists();

	let start = Instant::now();
	while launched().is_empty() {
		if start.elapsed() > DEADLINE {
			bail!("launcher never ran");
		}
		std::thread::sleep(Duration::from_millis(10));
	}
	assert!(launched().iter().all(alive));

	// Kill tears the connection down from the server side
	request(&mut client, "k", "+")?;
	wait_for_close(&mut client)?;
	assert!(
		launched().iter().any(|pid| !alive(pid)),
		"launcher outlived its connection: {:?}",
		launched()
	);

	handle.shutdown();
	let _ = std::fs::remove_file(&pid_file);
	Ok(())
}
