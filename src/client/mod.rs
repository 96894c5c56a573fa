//! Client sync session
//!
//! Drives the protocol from the watching side: logs in, turns detected
//! changes into message sequences, waits for one acknowledgment per
//! sub-operation and keeps a Valid/Invalid tag per tracked path. Anything
//! left Invalid is retried by the next probe, which first verifies entries
//! by content hash and only re-sends what actually differs.
//!
//! The session is strictly sequential: one operation is in flight at a time
//! and each waits for its ack before the next one is issued.

pub mod prompt;
pub mod state;

use std::io;
use std::path::PathBuf;
use tokio::fs as afs;
use tokio::io::{AsyncBufReadExt, BufStream};
use tokio::net::TcpStream;

use crate::chunking::{self, CHUNK_SIZE};
use crate::config::{ClientProfile, NetworkConfig};
use crate::error::SyncError;
use crate::logging::*;
use crate::protocol::{read_message, write_message, Message, Opcode};
use crate::util;
use crate::watcher::{Change, ChangeDetector, EntryKind};

pub use prompt::{CredentialPrompt, NoPrompt, StdinPrompt};
pub use state::{LastAction, SyncStatus, TrackedEntries, TrackedEntry};

/// Login attempts before the session gives up
pub const MAX_LOGIN_ATTEMPTS: u32 = 5;

/// Path carried by the `eop` closing a probe phase
pub const PROBE_EOP_PATH: &str = "";

type Stream = BufStream<TcpStream>;

/// Server verdict on one sub-operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ack {
	Positive,
	Negative,
	/// Socket failed before a verdict arrived
	Broken,
}

/// Outcome of streaming one file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileTransfer {
	/// All chunks and the `eop` were sent
	Complete,
	/// The `eop` was sent but the local read failed part way
	Incomplete,
	/// The local file could not be opened; nothing was sent
	NotSent,
	Broken,
}

pub struct SyncSession {
	network: NetworkConfig,
	profile: ClientProfile,
	/// Profile file rewritten after a login with corrected credentials
	profile_path: Option<PathBuf>,
	stream: Option<Stream>,
	detector: ChangeDetector,
	entries: TrackedEntries,
	prompt: Box<dyn CredentialPrompt>,
	/// A socket write or read failed since the last probe
	transport_error: bool,
	/// The server rejected an operation since the last probe
	server_error: bool,
	ticks: u32,
}

async fn open(address: &str) -> io::Result<Stream> {
	let stream = TcpStream::connect(address).await?;
	let _ = stream.set_nodelay(true);
	Ok(BufStream::new(stream))
}

impl SyncSession {
	/// Connect, log in, snapshot the watched tree and run the first probe
	///
	/// Socket errors here and exhausted login attempts are fatal.
	pub async fn connect(
		network: NetworkConfig,
		profile: ClientProfile,
		profile_path: Option<PathBuf>,
		prompt: Box<dyn CredentialPrompt>,
	) -> Result<Self, SyncError> {
		let mut detector = ChangeDetector::new(profile.watch_path.clone());
		let scanned = detector.prime()?;

		let address = network.address();
		let stream = open(&address).await.map_err(|e| {
			error!("Cannot connect to {}: {}", address, e);
			SyncError::Transport(e)
		})?;

		let mut entries = TrackedEntries::new();
		for entry in scanned {
			let action = match entry.kind {
				EntryKind::Dir => LastAction::DirCreated,
				EntryKind::File => LastAction::Created,
			};
			entries.record(&entry.path, action);
		}

		let mut session = SyncSession {
			network,
			profile,
			profile_path,
			stream: Some(stream),
			detector,
			entries,
			prompt,
			transport_error: false,
			server_error: false,
			ticks: 0,
		};

		session.login().await?;
		info!("Tracking {} entries under {}", session.entries.len(), session.profile.watch_path.display());
		session.probe().await;
		Ok(session)
	}

	pub fn entries(&self) -> &TrackedEntries {
		&self.entries
	}

	pub fn status_of(&self, path: &str) -> Option<SyncStatus> {
		self.entries.get(path).map(|e| e.status)
	}

	pub fn profile(&self) -> &ClientProfile {
		&self.profile
	}

	/// True while a transport error awaits recovery
	pub fn is_degraded(&self) -> bool {
		self.transport_error
	}

	/// Run detection ticks forever
	pub async fn run(&mut self) -> Result<(), SyncError> {
		loop {
			tokio::time::sleep(self.network.tick_interval()).await;
			self.tick().await?;
		}
	}

	/// One detection pass, its propagation, and a probe when one is due
	///
	/// A probe runs after a transport error once the connection is live
	/// again, after any negative ack, and every `probe_period` ticks.
	pub async fn tick(&mut self) -> Result<(), SyncError> {
		self.ticks += 1;

		match self.detector.detect() {
			Ok(changes) => {
				for change in changes {
					self.apply(change).await;
				}
			}
			Err(e) => warn!("Scan of {} failed: {}", self.detector.root().display(), e),
		}

		let reconnected = if self.transport_error { self.check_liveness().await? } else { false };
		let periodic = self.ticks >= self.network.probe_period;
		if reconnected || self.server_error || periodic {
			if periodic {
				self.ticks = 0;
			}
			self.entries.invalidate_all();
			self.probe().await;
		}
		Ok(())
	}

	async fn apply(&mut self, change: Change) {
		let (path, action) = match change {
			Change::Deleted { path } => {
				info!("Erased {}", path);
				(path, LastAction::DeletedPending)
			}
			Change::Created { path, kind: EntryKind::File } => {
				info!("File created: {}", path);
				(path, LastAction::Created)
			}
			Change::Created { path, kind: EntryKind::Dir } => {
				info!("Directory created: {}", path);
				(path, LastAction::DirCreated)
			}
			Change::Modified { path } => {
				info!("File modified: {}", path);
				(path, LastAction::Modified)
			}
		};

		self.entries.record(&path, action);
		if self.propagate(&path, action).await {
			debug!("Server ok for {}", path);
			if action == LastAction::DeletedPending {
				self.entries.remove(&path);
				self.detector.forget(&path);
			} else {
				self.entries.set_status(&path, SyncStatus::Valid);
			}
		} else {
			warn!("Server error for {}, left for the next probe", path);
		}
	}

	/// Send the message sequence for one entry and read its acks
	///
	/// A modification is a `remove_entry` followed by a full re-upload, and
	/// reads two acks. Returns true only if every ack was positive.
	pub async fn propagate(&mut self, path: &str, action: LastAction) -> bool {
		let mut pending = 0;
		let mut clean = true;

		if matches!(action, LastAction::DeletedPending | LastAction::Modified) {
			if !self.send(&Message::new(Opcode::RemoveEntry, path)).await {
				return false;
			}
			pending += 1;
		}

		match action {
			LastAction::DirCreated => {
				if !self.send(&Message::new(Opcode::CreateDir, path)).await {
					return false;
				}
				pending += 1;
			}
			LastAction::Created | LastAction::Modified => match self.send_file(path).await {
				FileTransfer::Complete => pending += 1,
				FileTransfer::Incomplete => {
					pending += 1;
					clean = false;
				}
				FileTransfer::NotSent => clean = false,
				FileTransfer::Broken => return false,
			},
			LastAction::DeletedPending => {}
		}

		let mut positive = true;
		for _ in 0..pending {
			match self.read_ack().await {
				Ack::Positive => {}
				Ack::Negative => {
					self.server_error = true;
					positive = false;
				}
				Ack::Broken => return false,
			}
		}
		positive && clean
	}

	async fn send_file(&mut self, path: &str) -> FileTransfer {
		let local = self.detector.root().join(path);
		let mut file = match afs::File::open(&local).await {
			Ok(f) => f,
			Err(e) => {
				warn!("Error on opening file {}: {}", local.display(), e);
				self.server_error = true;
				return FileTransfer::NotSent;
			}
		};

		let mut buf = vec![0u8; CHUNK_SIZE];
		let mut outcome = FileTransfer::Complete;
		loop {
			let n = match chunking::read_chunk(&mut file, &mut buf).await {
				Ok(n) => n,
				Err(e) => {
					warn!("Read of {} failed mid-transfer: {}", local.display(), e);
					self.server_error = true;
					outcome = FileTransfer::Incomplete;
					break;
				}
			};
			if n == 0 {
				break;
			}
			if !self.send(&Message::with_data(Opcode::CreateFile, path, buf[..n].to_vec())).await {
				return FileTransfer::Broken;
			}
		}

		if !self.send(&Message::eop(path)).await {
			return FileTransfer::Broken;
		}
		outcome
	}

	async fn send(&mut self, msg: &Message) -> bool {
		let Some(stream) = self.stream.as_mut() else {
			self.transport_error = true;
			return false;
		};
		match write_message(stream, msg).await {
			Ok(()) => true,
			Err(e) if e.is_transport() => {
				warn!(
					"Socket error ({}), connection will be resumed soon. All file modifications are monitored and saved.",
					e
				);
				self.transport_error = true;
				false
			}
			Err(e) => {
				// The server may be mid-sequence; only a fresh connection realigns it
				error!("Cannot send {} for {}: {}, dropping the connection", msg.opcode, msg.path, e);
				self.stream = None;
				self.transport_error = true;
				false
			}
		}
	}

	async fn read_ack(&mut self) -> Ack {
		let Some(stream) = self.stream.as_mut() else {
			self.transport_error = true;
			return Ack::Broken;
		};
		match read_message(stream).await {
			Ok(msg) if msg.opcode == Opcode::Ok => Ack::Positive,
			Ok(msg) => {
				debug!("Negative ack: {}", msg.opcode);
				Ack::Negative
			}
			Err(e) if e.is_transport() => {
				warn!("Socket error ({}) while waiting for the server", e);
				self.transport_error = true;
				Ack::Broken
			}
			Err(e) => {
				warn!("Unreadable ack: {}", e);
				Ack::Negative
			}
		}
	}

	/// Ask the server whether it already holds the current version of an entry
	async fn verify(&mut self, path: &str, action: LastAction) -> Ack {
		let msg = if action == LastAction::DirCreated {
			Message::new(Opcode::CheckDir, path)
		} else {
			let local = self.detector.root().join(path);
			let digest = match util::hash_file(&local).await {
				Ok(h) => h,
				Err(e) => {
					debug!("Cannot hash {}: {}", local.display(), e);
					String::new()
				}
			};
			Message::with_hash(Opcode::CheckFile, path, digest)
		};

		if !self.send(&msg).await {
			return Ack::Broken;
		}
		self.read_ack().await
	}

	/// Resynchronize with the server
	///
	/// 1. Verify: every Invalid entry is checked by hash (files) or presence
	///    (directories); a match flips it to Valid without moving data.
	/// 2. Reconcile: whatever is still Invalid is propagated again.
	/// 3. Garbage collect: acknowledged deletions leave every local map.
	///
	/// Phases 1 and 2 are each closed by an `eop`. The server deletes every
	/// path that was not confirmed by either phase.
	pub async fn probe(&mut self) {
		info!("Probe started");
		self.transport_error = false;
		self.server_error = false;

		if !self.send(&Message::new(Opcode::StartProbe, "")).await {
			return;
		}

		let mut verified = 0;
		for (path, entry) in self.entries.invalid() {
			if entry.action == LastAction::DeletedPending {
				continue;
			}
			match self.verify(&path, entry.action).await {
				Ack::Positive => {
					self.entries.set_status(&path, SyncStatus::Valid);
					verified += 1;
				}
				Ack::Negative => {}
				Ack::Broken => return,
			}
		}
		if !self.send(&Message::eop(PROBE_EOP_PATH)).await {
			return;
		}

		let mut resent = 0;
		for (path, entry) in self.entries.invalid() {
			if self.propagate(&path, entry.action).await {
				self.entries.set_status(&path, SyncStatus::Valid);
				resent += 1;
			} else if self.transport_error {
				return;
			}
		}
		if !self.send(&Message::eop(PROBE_EOP_PATH)).await {
			return;
		}

		for path in self.entries.collect_garbage() {
			self.detector.forget(&path);
		}
		info!("Probe finished: {} verified, {} re-sent", verified, resent);
	}

	/// Ping the server; reconnect and log in again if it does not answer
	///
	/// Returns true when the connection is usable afterwards. Only exhausted
	/// login attempts are returned as an error.
	pub async fn check_liveness(&mut self) -> Result<bool, SyncError> {
		let grace = self.network.tick_interval();
		if let Some(stream) = self.stream.as_mut() {
			if write_message(stream, &Message::new(Opcode::Ping, "")).await.is_ok() {
				let readable = matches!(
					tokio::time::timeout(grace, stream.fill_buf()).await,
					Ok(Ok(buf)) if !buf.is_empty()
				);
				if readable && read_message(stream).await.is_ok() {
					debug!("Server answered ping");
					self.transport_error = false;
					return Ok(true);
				}
			}
		}

		info!("Connection lost, reconnecting to {}", self.network.address());
		self.stream = None;
		match self.login().await {
			Ok(()) => {
				self.transport_error = false;
				Ok(true)
			}
			Err(e) if e.is_transport() => {
				warn!("Reconnection failed: {}", e);
				Ok(false)
			}
			Err(e) => Err(e),
		}
	}

	/// Log in, reconnecting and re-prompting on failure
	///
	/// The server closes the socket after a rejected login, so every retry
	/// starts from a fresh connection. Credentials corrected through the
	/// prompt are written back to the profile file once accepted.
	pub async fn login(&mut self) -> Result<(), SyncError> {
		let address = self.network.address();
		let mut rewrite = false;
		let mut last_err = None;

		for attempt in 1..=MAX_LOGIN_ATTEMPTS {
			if self.stream.is_none() {
				match open(&address).await {
					Ok(s) => self.stream = Some(s),
					Err(e) => {
						warn!("Socket error, trying to resume connection: {}", e);
						last_err = Some(SyncError::Transport(e));
						continue;
					}
				}
			}

			match self.send_login().await {
				Ok(true) => {
					info!("Login success as {}", self.profile.user);
					if rewrite {
						if let Some(path) = &self.profile_path {
							self.profile.save(path)?;
							info!("Updated credentials written to {}", path.display());
						}
					}
					return Ok(());
				}
				Ok(false) => {
					warn!("Login rejected for {} (attempt {})", self.profile.user, attempt);
					last_err =
						Some(SyncError::Auth { user: self.profile.user.clone(), attempts: attempt });
					if attempt < MAX_LOGIN_ATTEMPTS {
						if let Some((user, password)) = self.prompt.prompt().await {
							self.profile.user = user;
							self.profile.password = password;
							rewrite = true;
						}
					}
				}
				Err(e) => {
					warn!("Socket error, trying to resume connection: {}", e);
					last_err = Some(e);
				}
			}
			self.stream = None;
		}

		Err(last_err.unwrap_or_else(|| SyncError::Auth {
			user: self.profile.user.clone(),
			attempts: MAX_LOGIN_ATTEMPTS,
		}))
	}

	async fn send_login(&mut self) -> Result<bool, SyncError> {
		let stream = self
			.stream
			.as_mut()
			.ok_or_else(|| SyncError::Transport(io::Error::from(io::ErrorKind::NotConnected)))?;
		write_message(stream, &Message::login(&self.profile.user, &self.profile.password)).await?;
		let reply = read_message(stream).await?;
		Ok(reply.opcode == Opcode::Ok)
	}
}

// vim: ts=4
