// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 rvocd contributors

use std::io::{self, ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::config::{LauncherConfig, ServerConfig};
use crate::error::Error;
use crate::gdb::packet::format_response;
use crate::gdb::session::{HALTED_REASON, RspSession, SessionEvent};
use crate::target::{self, SharedTarget};
use crate::transport::Transport;

const READ_BUFFER_SIZE: usize = 4096;

/// Writers for every connected client, used to fan out stop notifications
#[derive(Clone, Default)]
struct ClientRegistry
{
	clients: Arc<Mutex<Vec<(usize, Arc<Mutex<TcpStream>>)>>>,
}

impl ClientRegistry
{
	fn add(&self, id: usize, stream: Arc<Mutex<TcpStream>>)
	{
		self.clients.lock().unwrap_or_else(PoisonError::into_inner).push((id, stream));
	}

	fn remove(&self, id: usize)
	{
		self.clients
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.retain(|(client, _)| *client != id);
	}

	fn len(&self) -> usize
	{
		self.clients.lock().unwrap_or_else(PoisonError::into_inner).len()
	}

	/// Send to every client, dropping any whose socket has gone away
	fn broadcast(&self, message: &str)
	{
		let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
		clients.retain(|(id, stream)| {
			let mut stream = stream.lock().unwrap_or_else(PoisonError::into_inner);
			match stream.write_all(message.as_bytes()) {
				Ok(()) => true,
				Err(error) => {
					debug!("Dropping client {} from broadcasts: {}", id, error);
					false
				},
			}
		});
	}
}

/// Handle to a running server, used to find where it listens and to stop it
pub struct ServerHandle
{
	local_addr: SocketAddr,
	shutdown: Arc<AtomicBool>,
	threads: Vec<JoinHandle<()>>,
}

impl ServerHandle
{
	pub fn local_addr(&self) -> SocketAddr
	{
		self.local_addr
	}

	/// Stop accepting clients and wait for the server threads to finish
	pub fn shutdown(mut self)
	{
		self.shutdown.store(true, Ordering::SeqCst);
		self.join();
	}

	/// Block until the server stops
	pub fn join(&mut self)
	{
		for thread in self.threads.drain(..) {
			if thread.join().is_err() {
				error!("Server thread panicked");
			}
		}
	}
}

/// GDB RSP server: one thread per client plus a monitor that reports when the hart stops
pub struct RspServer<T>
{
	target: SharedTarget<T>,
	config: ServerConfig,
	clients: ClientRegistry,
	shutdown: Arc<AtomicBool>,
}

impl<T: Transport + 'static> RspServer<T>
{
	pub fn new(target: SharedTarget<T>, config: &ServerConfig) -> Self
	{
		Self {
			target,
			config: config.clone(),
			clients: ClientRegistry::default(),
			shutdown: Arc::new(AtomicBool::new(false)),
		}
	}

	/// Bind the listener and start serving in the background
	pub fn spawn(self) -> Result<ServerHandle, Error>
	{
		let listener = TcpListener::bind((self.config.bind.as_str(), self.config.port))?;
		listener.set_nonblocking(true)?;
		let local_addr = listener.local_addr()?;
		info!("GDB RSP server listening on {}", local_addr);

		let monitor = {
			let target = self.target.clone();
			let clients = self.clients.clone();
			let shutdown = self.shutdown.clone();
			let interval = self.config.poll_interval();
			thread::Builder::new()
				.name("rsp-monitor".into())
				.spawn(move || monitor_target(target, clients, shutdown, interval))?
		};

		let shutdown = self.shutdown.clone();
		let acceptor = thread::Builder::new()
			.name("rsp-accept".into())
			.spawn(move || self.accept_loop(listener))?;

		Ok(ServerHandle {
			local_addr,
			shutdown,
			threads: vec![acceptor, monitor],
		})
	}

	/// Serve until the listener fails
	pub fn run(self) -> Result<(), Error>
	{
		let mut handle = self.spawn()?;
		handle.join();
		Ok(())
	}

	fn accept_loop(self, listener: TcpListener)
	{
		let next_id = AtomicUsize::new(0);
		let mut launcher = None;
		let mut workers = Vec::new();

		while !self.shutdown.load(Ordering::SeqCst) {
			// The launcher is started ahead of the connection it will make
			if launcher.is_none() {
				if let Some(config) = &self.config.launcher {
					launcher = spawn_launcher(config);
				}
			}

			match listener.accept() {
				Ok((stream, peer)) => {
					let id = next_id.fetch_add(1, Ordering::Relaxed);
					info!("Client {} connected from {}", id, peer);
					let connection = Connection {
						id,
						target: self.target.clone(),
						clients: self.clients.clone(),
						shutdown: self.shutdown.clone(),
						launcher: launcher.take(),
						read_timeout: self.config.poll_interval(),
					};
					match thread::Builder::new()
						.name(format!("rsp-client-{id}"))
						.spawn(move || connection.serve(stream))
					{
						Ok(worker) => workers.push(worker),
						Err(error) => error!("Failed to start client thread: {}", error),
					}
				},
				Err(error) if error.kind() == ErrorKind::WouldBlock => thread::sleep(self.config.poll_interval()),
				Err(error) => {
					error!("Accepting connections failed: {}", error);
					self.shutdown.store(true, Ordering::SeqCst);
				},
			}
			workers.retain(|worker: &JoinHandle<()>| !worker.is_finished());
		}

		if let Some(child) = launcher {
			stop_launcher(child);
		}
		for worker in workers {
			let _ = worker.join();
		}
		debug!("Accept loop finished with {} clients registered", self.clients.len());
	}
}

fn spawn_launcher(config: &LauncherConfig) -> Option<Child>
{
	match Command::new(&config.program)
		.args(&config.args)
		.stdin(Stdio::piped())
		.spawn()
	{
		Ok(child) => {
			debug!("Started debugger launcher {} (pid {})", config.program.display(), child.id());
			Some(child)
		},
		Err(error) => {
			warn!("Failed to start debugger launcher {}: {}", config.program.display(), error);
			None
		},
	}
}

fn stop_launcher(mut child: Child)
{
	if let Some(stdin) = child.stdin.as_mut() {
		let _ = stdin.write_all(b"quit\n");
	}
	let _ = child.kill();
	match child.wait() {
		Ok(status) => debug!("Debugger launcher exited with {}", status),
		Err(error) => warn!("Failed to reap debugger launcher: {}", error),
	}
}

fn monitor_target<T: Transport>(
	target: SharedTarget<T>,
	clients: ClientRegistry,
	shutdown: Arc<AtomicBool>,
	interval: Duration,
)
{
	while !shutdown.load(Ordering::SeqCst) {
		thread::sleep(interval);
		let stopped = {
			let mut target = target::lock(&target);
			match target.poll_halted() {
				Ok(true) => {
					// GDB re-establishes its breakpoint set at every stop
					target.clear_breakpoints();
					true
				},
				Ok(false) => false,
				Err(error) if error.is_fatal_to_session() => {
					error!("Probe lost while monitoring target: {}", error);
					return;
				},
				Err(error) => {
					warn!("Failed to poll target state: {}", error);
					false
				},
			}
		};
		if stopped {
			info!("Target stopped, notifying clients");
			clients.broadcast(&format_response(HALTED_REASON));
		}
	}
}

struct Connection<T>
{
	id: usize,
	target: SharedTarget<T>,
	clients: ClientRegistry,
	shutdown: Arc<AtomicBool>,
	launcher: Option<Child>,
	read_timeout: Duration,
}

impl<T: Transport> Connection<T>
{
	fn serve(mut self, stream: TcpStream)
	{
		if let Err(error) = self.run_session(&stream) {
			warn!("Client {} connection failed: {}", self.id, error);
		}
		self.clients.remove(self.id);
		// The launcher goes before the socket it was started for
		if let Some(child) = self.launcher.take() {
			stop_launcher(child);
		}
		let _ = stream.shutdown(Shutdown::Both);
		info!("Client {} disconnected", self.id);
	}

	fn run_session(&mut self, stream: &TcpStream) -> io::Result<()>
	{
		stream.set_nonblocking(false)?;
		stream.set_nodelay(true)?;
		stream.set_read_timeout(Some(self.read_timeout))?;
		let writer = Arc::new(Mutex::new(stream.try_clone()?));
		self.clients.add(self.id, writer.clone());

		let mut session = RspSession::new(self.target.clone());
		let mut reader = stream;
		let mut buffer = [0; READ_BUFFER_SIZE];
		while !self.shutdown.load(Ordering::SeqCst) {
			let count = match reader.read(&mut buffer) {
				Ok(0) => return Ok(()),
				Ok(count) => count,
				Err(error) if matches!(error.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => continue,
				Err(error) if error.kind() == ErrorKind::Interrupted => continue,
				Err(error) => return Err(error),
			};

			for event in session.feed(&buffer[..count]) {
				match event {
					SessionEvent::Reply(bytes) => {
						writer
							.lock()
							.unwrap_or_else(PoisonError::into_inner)
							.write_all(bytes.as_bytes())?;
					},
					SessionEvent::Broadcast(bytes) => self.clients.broadcast(&bytes),
					SessionEvent::Close => return Ok(()),
				}
			}
		}
		Ok(())
	}
}
