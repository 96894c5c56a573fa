//! Server side of one client connection
//!
//! A [`SessionHandler`] lives exactly as long as its TCP connection. It owns
//! the client's sandbox directory (`<server-root>/<client-name>`) and a table
//! of every path in it together with a presence flag. The table is rebuilt
//! from disk after every ordinary operation; during a probe it is updated
//! in place and, at the end, every path the client did not reconfirm is
//! deleted.
//!
//! Incoming files are staged under `<server-root>/.mirrord-staging/<client-name>`
//! and moved into the sandbox once complete, so the sandbox only ever holds
//! client files.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs as afs;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufStream};

use crate::credentials::CredentialStore;
use crate::error::SyncError;
use crate::logging::*;
use crate::protocol::{read_message, write_message, Message, Opcode, ProtocolError};
use crate::util;
use crate::watcher::{self, EntryKind};

/// Directory below the server root holding in-flight transfers
pub const STAGING_DIR: &str = ".mirrord-staging";

pub struct SessionHandler<S> {
	client_name: String,
	sandbox: PathBuf,
	/// Per-client staging directory for incomplete files
	staging: PathBuf,
	stream: BufStream<S>,
	credentials: CredentialStore,
	/// Absolute sandbox path -> confirmed by the client in the current probe
	paths: BTreeMap<PathBuf, bool>,
	in_probe: bool,
	open: bool,
}

fn protocol_violation(msg: String) -> SyncError {
	SyncError::Protocol(ProtocolError::ProtocolViolation(msg))
}

// Clean up orphaned temporary files from interrupted transfers
fn cleanup_temp_files(dir: &Path) {
	let entries = match fs::read_dir(dir) {
		Ok(e) => e,
		Err(e) if e.kind() == io::ErrorKind::NotFound => return,
		Err(e) => {
			warn!("Cannot read {} during cleanup: {}", dir.display(), e);
			return;
		}
	};

	let mut count = 0;
	for entry_result in entries {
		let Ok(entry) = entry_result else {
			continue;
		};
		let path = entry.path();
		match fs::remove_file(&path) {
			Ok(()) => count += 1,
			Err(e) if e.kind() == io::ErrorKind::NotFound => {}
			Err(e) => warn!("Failed to remove temp file {}: {}", path.display(), e),
		}
	}
	if count > 0 {
		info!("Cleaned up {} temporary files in {}", count, dir.display());
	}
}

/// Remove a file or a directory tree; a missing path counts as removed
async fn remove_path(path: &Path) -> io::Result<()> {
	let meta = match afs::symlink_metadata(path).await {
		Ok(m) => m,
		Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
		Err(e) => return Err(e),
	};
	let result =
		if meta.is_dir() { afs::remove_dir_all(path).await } else { afs::remove_file(path).await };
	match result {
		Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
		other => other,
	}
}

impl<S> SessionHandler<S>
where
	S: AsyncRead + AsyncWrite + Unpin + Send,
{
	/// Read the login frame and establish the session
	///
	/// On bad credentials a negative ack is sent and the socket is closed.
	/// On success the sandbox is created if needed, the path table is built
	/// with every entry unconfirmed, and a positive ack is sent.
	pub async fn accept(
		stream: S,
		server_root: &Path,
		credentials: CredentialStore,
	) -> Result<Self, SyncError> {
		let mut stream = BufStream::new(stream);
		let login = match read_message(&mut stream).await {
			Ok(m) => m,
			Err(e) if e.is_transport() => return Err(e.into()),
			Err(e) => {
				info!("Malformed login frame: {}", e);
				write_message(&mut stream, &Message::ack(false, "")).await?;
				let _ = stream.shutdown().await;
				return Err(e.into());
			}
		};

		if login.opcode != Opcode::Login || !credentials.verify(&login.path, &login.hash).await {
			info!("Authentication failed for {:?}", login.path);
			write_message(&mut stream, &Message::ack(false, &login.path)).await?;
			let _ = stream.shutdown().await;
			return Err(SyncError::Auth { user: login.path, attempts: 1 });
		}

		let sandbox = server_root.join(&login.path);
		let staging = server_root.join(STAGING_DIR).join(&login.path);
		cleanup_temp_files(&staging);
		for dir in [&sandbox, &staging] {
			if let Err(e) = afs::create_dir_all(dir).await {
				error!("Cannot create {}: {}", dir.display(), e);
				write_message(&mut stream, &Message::ack(false, &login.path)).await?;
				let _ = stream.shutdown().await;
				return Err(SyncError::filesystem(dir, e));
			}
		}

		let mut handler = SessionHandler {
			client_name: login.path,
			sandbox,
			staging,
			stream,
			credentials,
			paths: BTreeMap::new(),
			in_probe: false,
			open: true,
		};
		handler.rebuild_paths();
		info!("Authentication success: Hello, {}!", handler.client_name);
		handler.send_ack(true).await?;
		Ok(handler)
	}

	pub fn client_name(&self) -> &str {
		&self.client_name
	}

	pub fn sandbox(&self) -> &Path {
		&self.sandbox
	}

	pub fn is_open(&self) -> bool {
		self.open
	}

	/// Path table: absolute sandbox path -> presence confirmed
	pub fn paths(&self) -> &BTreeMap<PathBuf, bool> {
		&self.paths
	}

	pub async fn close(&mut self) {
		if self.open {
			self.open = false;
			let _ = self.stream.shutdown().await;
		}
	}

	/// Wait until bytes are readable; false when the peer closed the connection
	pub async fn wait_readable(&mut self) -> io::Result<bool> {
		Ok(!self.stream.fill_buf().await?.is_empty())
	}

	/// Read one message and execute it
	///
	/// A malformed frame is answered with a negative ack. Only transport
	/// failures are returned as errors.
	pub async fn serve_next(&mut self) -> Result<(), SyncError> {
		let msg = match read_message(&mut self.stream).await {
			Ok(m) => m,
			Err(e) if e.is_transport() => return Err(e.into()),
			Err(e) => {
				warn!("Rejected message from {}: {}", self.client_name, e);
				return self.send_ack(false).await;
			}
		};

		let opcode = msg.opcode;
		if self.execute_operation(msg).await? {
			info!("Operation {} completed successfully!", opcode);
		} else {
			warn!("Error in operation {}!", opcode);
		}
		Ok(())
	}

	/// Execute one operation and acknowledge it
	///
	/// `start_probe` is not acknowledged as a whole; its phases ack each
	/// check and operation individually.
	pub async fn execute_operation(&mut self, msg: Message) -> Result<bool, SyncError> {
		if msg.opcode != Opcode::StartProbe {
			return self.apply_operation(msg).await;
		}

		self.in_probe = true;
		let result = self.probe().await;
		self.in_probe = false;
		self.rebuild_paths();
		match result {
			Ok(()) => Ok(true),
			Err(e) if e.is_transport() => Err(e),
			Err(e) => {
				warn!("Probe for {} failed: {}", self.client_name, e);
				Ok(false)
			}
		}
	}

	async fn apply_operation(&mut self, msg: Message) -> Result<bool, SyncError> {
		let opcode = msg.opcode;
		let result = match opcode {
			// A bare eop is a file transfer with zero chunks
			Opcode::CreateFile | Opcode::Eop => self.create_file(msg).await,
			Opcode::CreateDir => self.create_dir(&msg).await,
			Opcode::RenameFile => self.rename(&msg, EntryKind::File).await,
			Opcode::RenameDir => self.rename(&msg, EntryKind::Dir).await,
			Opcode::RemoveEntry => self.remove_entry(&msg).await,
			Opcode::Login => self.relogin(&msg).await,
			Opcode::Ping => Ok(()),
			Opcode::Error => {
				info!("Client {} signalled an error, closing", self.client_name);
				self.close().await;
				Ok(())
			}
			Opcode::Null
			| Opcode::Ok
			| Opcode::CheckFile
			| Opcode::CheckDir
			| Opcode::StartProbe => Err(protocol_violation(format!("unexpected {}", opcode))),
		};

		let success = match result {
			Ok(()) => true,
			Err(e) if e.is_transport() => return Err(e),
			Err(e) => {
				warn!("{} on {:?} failed: {}", opcode, self.client_name, e);
				false
			}
		};

		if !self.in_probe {
			self.rebuild_paths();
		}
		if self.open {
			self.send_ack(success).await?;
		}
		Ok(success)
	}

	async fn send_ack(&mut self, success: bool) -> Result<(), SyncError> {
		write_message(&mut self.stream, &Message::ack(success, &self.client_name)).await?;
		Ok(())
	}

	fn resolve(&self, rel: &str) -> Result<PathBuf, SyncError> {
		if !util::is_path_safe(rel) {
			return Err(SyncError::PathEscape { path: rel.to_string() });
		}
		Ok(self.sandbox.join(rel))
	}

	/// Replace the path table with a fresh scan of the sandbox
	fn rebuild_paths(&mut self) {
		match watcher::scan_tree(&self.sandbox) {
			Ok(entries) => {
				self.paths = entries
					.into_iter()
					.map(|e| (self.sandbox.join(e.path), false))
					.collect();
			}
			Err(e) => warn!("Cannot scan sandbox {}: {}", self.sandbox.display(), e),
		}
	}

	/// Receive a chunked file up to its `eop`
	///
	/// Chunks go to a staging file that replaces the target only when
	/// every chunk matched its declared hash. After any failure the remaining
	/// chunks are still consumed so the stream stays aligned for the single
	/// ack that follows.
	async fn create_file(&mut self, first: Message) -> Result<(), SyncError> {
		let rel = first.path.clone();
		let mut failure: Option<SyncError> = None;
		let mut sink: Option<(PathBuf, PathBuf, afs::File)> = None;

		match self.resolve(&rel) {
			Ok(target) => {
				let tmp = self.staging.join(uuid::Uuid::new_v4().simple().to_string());
				let opened = async {
					if let Some(parent) = target.parent() {
						afs::create_dir_all(parent).await?;
					}
					afs::OpenOptions::new().write(true).create_new(true).open(&tmp).await
				}
				.await;
				match opened {
					Ok(f) => sink = Some((target, tmp, f)),
					Err(e) => failure = Some(SyncError::filesystem(target, e)),
				}
			}
			Err(e) => failure = Some(e),
		}

		let mut msg = first;
		while msg.opcode != Opcode::Eop {
			if failure.is_none() {
				if msg.opcode != Opcode::CreateFile || msg.path != rel {
					failure = Some(protocol_violation(format!(
						"{} for {:?} inside transfer of {:?}",
						msg.opcode, msg.path, rel
					)));
				} else {
					let actual = util::hash(msg.payload());
					if actual != msg.hash {
						failure = Some(SyncError::Integrity {
							path: rel.clone(),
							expected: msg.hash.clone(),
							actual,
						});
					} else if let Some((target, _, file)) = sink.as_mut() {
						if let Err(e) = file.write_all(msg.payload()).await {
							failure = Some(SyncError::filesystem(target.clone(), e));
						}
					}
				}
			}

			msg = match read_message(&mut self.stream).await {
				Ok(m) => m,
				Err(e) if e.is_transport() => {
					if let Some((_, tmp, file)) = sink.take() {
						drop(file);
						let _ = afs::remove_file(&tmp).await;
					}
					return Err(e.into());
				}
				Err(e) => {
					if failure.is_none() {
						failure = Some(e.into());
					}
					Message::new(Opcode::Null, rel.clone())
				}
			};
		}

		let Some((target, tmp, mut file)) = sink else {
			return Err(failure.unwrap_or_else(|| protocol_violation("no transfer target".into())));
		};

		if failure.is_none() {
			if let Err(e) = file.flush().await {
				failure = Some(SyncError::filesystem(&target, e));
			}
		}
		drop(file);

		if let Some(e) = failure {
			let _ = afs::remove_file(&tmp).await;
			return Err(e);
		}
		if let Err(e) = afs::rename(&tmp, &target).await {
			let _ = afs::remove_file(&tmp).await;
			return Err(SyncError::filesystem(target, e));
		}

		debug!("Stored {}", target.display());
		if self.in_probe {
			self.paths.entry(target).or_insert(false);
		}
		Ok(())
	}

	async fn create_dir(&mut self, msg: &Message) -> Result<(), SyncError> {
		let target = self.resolve(&msg.path)?;
		afs::create_dir_all(&target).await.map_err(|e| SyncError::filesystem(&target, e))?;
		if self.in_probe {
			self.paths.entry(target).or_insert(false);
		}
		Ok(())
	}

	/// Rename an entry of the expected kind; the payload names the destination
	async fn rename(&mut self, msg: &Message, kind: EntryKind) -> Result<(), SyncError> {
		let from = self.resolve(&msg.path)?;
		let dest = std::str::from_utf8(msg.payload())
			.map_err(|_| protocol_violation("rename destination is not UTF-8".into()))?;
		let to = self.resolve(&util::normalize_path(dest))?;

		let meta = afs::symlink_metadata(&from).await.map_err(|e| SyncError::filesystem(&from, e))?;
		let matches = match kind {
			EntryKind::File => meta.is_file(),
			EntryKind::Dir => meta.is_dir(),
		};
		if !matches {
			let what = if kind == EntryKind::File { "regular file" } else { "directory" };
			return Err(SyncError::filesystem(
				&from,
				io::Error::new(io::ErrorKind::InvalidInput, format!("not a {}", what)),
			));
		}

		afs::rename(&from, &to).await.map_err(|e| SyncError::filesystem(&from, e))
	}

	async fn remove_entry(&mut self, msg: &Message) -> Result<(), SyncError> {
		let target = self.resolve(&msg.path)?;
		remove_path(&target).await.map_err(|e| SyncError::filesystem(&target, e))?;
		if self.in_probe {
			self.paths.remove(&target);
		}
		Ok(())
	}

	/// Inline login; only the session's own client may re-authenticate
	async fn relogin(&mut self, msg: &Message) -> Result<(), SyncError> {
		if msg.path == self.client_name && self.credentials.verify(&msg.path, &msg.hash).await {
			Ok(())
		} else {
			Err(SyncError::Auth { user: msg.path.clone(), attempts: 1 })
		}
	}

	async fn check_file(&mut self, msg: &Message) -> bool {
		let Ok(target) = self.resolve(&msg.path) else {
			return false;
		};
		if !self.paths.contains_key(&target) || msg.hash.is_empty() {
			return false;
		}
		match util::hash_file(&target).await {
			Ok(digest) if digest == msg.hash => {
				self.paths.insert(target, true);
				true
			}
			Ok(_) => false,
			Err(e) => {
				debug!("Cannot hash {}: {}", target.display(), e);
				false
			}
		}
	}

	async fn check_dir(&mut self, msg: &Message) -> bool {
		let Ok(target) = self.resolve(&msg.path) else {
			return false;
		};
		if !self.paths.contains_key(&target) || !target.is_dir() {
			return false;
		}
		self.paths.insert(target, true);
		true
	}

	/// Server half of the probe
	///
	/// 1. Answer every check: ok and confirmed when the path is present (and
	///    for files its content hash matches), error otherwise. Ends at `eop`.
	/// 2. Execute the operations the client re-sends, confirming each path
	///    that succeeds. Ends at an `eop` with an empty path.
	/// 3. Delete every path still unconfirmed.
	///
	/// An operation arriving from elsewhere while a probe runs can have its
	/// result swept by step 3.
	async fn probe(&mut self) -> Result<(), SyncError> {
		debug!("Probe started for {}", self.client_name);

		loop {
			let msg = match read_message(&mut self.stream).await {
				Ok(m) => m,
				Err(e) if e.is_transport() => return Err(e.into()),
				Err(e) => {
					warn!("Rejected check from {}: {}", self.client_name, e);
					self.send_ack(false).await?;
					continue;
				}
			};
			let confirmed = match msg.opcode {
				Opcode::Eop => break,
				Opcode::CheckFile => self.check_file(&msg).await,
				Opcode::CheckDir => self.check_dir(&msg).await,
				other => {
					warn!("Unexpected {} during probe verification", other);
					false
				}
			};
			debug!("Check {} {:?}: {}", msg.opcode, msg.path, confirmed);
			self.send_ack(confirmed).await?;
		}

		loop {
			let msg = match read_message(&mut self.stream).await {
				Ok(m) => m,
				Err(e) if e.is_transport() => return Err(e.into()),
				Err(e) => {
					warn!("Rejected operation from {}: {}", self.client_name, e);
					self.send_ack(false).await?;
					continue;
				}
			};
			if msg.opcode == Opcode::Eop && msg.path.is_empty() {
				break;
			}

			let target = self.resolve(&msg.path).ok();
			let success = self.apply_operation(msg).await?;
			if let Some(flag) = target.and_then(|t| self.paths.get_mut(&t)) {
				*flag = success;
			}
			if !self.open {
				return Ok(());
			}
		}

		let stale: Vec<PathBuf> =
			self.paths.iter().filter(|(_, confirmed)| !**confirmed).map(|(p, _)| p.clone()).collect();
		for path in stale {
			match remove_path(&path).await {
				Ok(()) => {
					debug!("Swept {}", path.display());
					self.paths.remove(&path);
				}
				Err(e) => warn!("Cannot sweep {}: {}", path.display(), e),
			}
		}
		debug!("Probe finished for {}", self.client_name);
		Ok(())
	}
}


// vim: ts=4
