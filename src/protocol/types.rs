//! Message and opcode types exchanged between client and server

use std::fmt;

use crate::util;

/// Operation tag carried by every message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
	/// Unknown wire value; dispatched as a no-op
	Null,
	CreateFile,
	CreateDir,
	RenameFile,
	RenameDir,
	RemoveEntry,
	Login,
	CheckFile,
	Ping,
	CheckDir,
	StartProbe,
	/// End of a chunked transfer or of a probe phase
	Eop,
	Ok,
	Error,
}

impl Opcode {
	/// Integer value written to the `Opcode` field
	pub fn code(self) -> i64 {
		match self {
			Opcode::Null => 0,
			Opcode::CreateFile => 101,
			Opcode::CreateDir => 102,
			Opcode::RenameFile => 103,
			Opcode::RenameDir => 104,
			Opcode::RemoveEntry => 105,
			Opcode::Login => 106,
			Opcode::CheckFile => 107,
			Opcode::Ping => 108,
			Opcode::CheckDir => 109,
			Opcode::StartProbe => 110,
			Opcode::Eop => 199,
			Opcode::Ok => 200,
			Opcode::Error => 400,
		}
	}

	/// Maps a wire value back to an opcode; unknown values become `Null`
	pub fn from_code(code: i64) -> Self {
		match code {
			101 => Opcode::CreateFile,
			102 => Opcode::CreateDir,
			103 => Opcode::RenameFile,
			104 => Opcode::RenameDir,
			105 => Opcode::RemoveEntry,
			106 => Opcode::Login,
			107 => Opcode::CheckFile,
			108 => Opcode::Ping,
			109 => Opcode::CheckDir,
			110 => Opcode::StartProbe,
			199 => Opcode::Eop,
			200 => Opcode::Ok,
			400 => Opcode::Error,
			_ => Opcode::Null,
		}
	}

	pub fn name(self) -> &'static str {
		match self {
			Opcode::Null => "null",
			Opcode::CreateFile => "create_file",
			Opcode::CreateDir => "create_dir",
			Opcode::RenameFile => "rename_file",
			Opcode::RenameDir => "rename_dir",
			Opcode::RemoveEntry => "remove_entry",
			Opcode::Login => "login",
			Opcode::CheckFile => "check_file",
			Opcode::Ping => "ping",
			Opcode::CheckDir => "check_dir",
			Opcode::StartProbe => "start_probe",
			Opcode::Eop => "eop",
			Opcode::Ok => "ok",
			Opcode::Error => "error",
		}
	}
}

impl fmt::Display for Opcode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.name())
	}
}

/// A single protocol message
///
/// `path` is always forward-slash normalized and relative to the watched
/// (client) or sandbox (server) root. `hash` is a hex digest or empty.
/// A login message never carries a payload: the password is reduced to its
/// hash on construction and the raw bytes are dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
	pub opcode: Opcode,
	pub path: String,
	pub hash: String,
	pub data: Option<Vec<u8>>,
}

impl Message {
	/// Message without payload or hash
	pub fn new(opcode: Opcode, path: impl Into<String>) -> Self {
		Message { opcode, path: util::normalize_path(&path.into()), hash: String::new(), data: None }
	}

	/// Message carrying `data`; the hash is computed from it
	///
	/// An empty buffer is not a payload. For `Login` the payload is discarded
	/// once hashed.
	pub fn with_data(opcode: Opcode, path: impl Into<String>, data: Vec<u8>) -> Self {
		let hash = util::hash(&data);
		let data = if opcode == Opcode::Login || data.is_empty() { None } else { Some(data) };
		Message { opcode, path: util::normalize_path(&path.into()), hash, data }
	}

	/// Message carrying an explicit hash and no payload
	pub fn with_hash(opcode: Opcode, path: impl Into<String>, hash: impl Into<String>) -> Self {
		Message { opcode, path: util::normalize_path(&path.into()), hash: hash.into(), data: None }
	}

	pub fn login(user: &str, password: &str) -> Self {
		Message::with_data(Opcode::Login, user, password.as_bytes().to_vec())
	}

	/// Acknowledgment sent by the server for a finished operation
	pub fn ack(success: bool, client_name: &str) -> Self {
		if success {
			Message::with_data(Opcode::Ok, client_name, b"OK!".to_vec())
		} else {
			Message::with_data(Opcode::Error, client_name, b"ERROR!".to_vec())
		}
	}

	/// Sentinel closing a chunked transfer or a probe phase
	pub fn eop(path: impl Into<String>) -> Self {
		Message::new(Opcode::Eop, path)
	}

	pub fn payload(&self) -> &[u8] {
		self.data.as_deref().unwrap_or(&[])
	}

	pub fn payload_present(&self) -> bool {
		self.data.is_some()
	}

	/// Drops the payload of login messages
	pub(crate) fn scrub(mut self) -> Self {
		if self.opcode == Opcode::Login {
			self.data = None;
		}
		self
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_opcode_table() {
		let all = [
			Opcode::CreateFile,
			Opcode::CreateDir,
			Opcode::RenameFile,
			Opcode::RenameDir,
			Opcode::RemoveEntry,
			Opcode::Login,
			Opcode::CheckFile,
			Opcode::Ping,
			Opcode::CheckDir,
			Opcode::StartProbe,
			Opcode::Eop,
			Opcode::Ok,
			Opcode::Error,
		];
		for op in all {
			assert_eq!(Opcode::from_code(op.code()), op);
		}
		assert_eq!(Opcode::CreateFile.code(), 101);
		assert_eq!(Opcode::Eop.code(), 199);
		assert_eq!(Opcode::Error.code(), 400);
		assert_eq!(Opcode::from_code(111), Opcode::Null);
		assert_eq!(Opcode::from_code(-1), Opcode::Null);
	}

	#[test]
	fn test_login_discards_password() {
		let m = Message::login("alice", "secret");
		assert_eq!(m.opcode, Opcode::Login);
		assert_eq!(m.path, "alice");
		assert_eq!(m.hash, util::hash(b"secret"));
		assert!(!m.payload_present());
	}

	#[test]
	fn test_with_data_hashes_and_normalizes() {
		let m = Message::with_data(Opcode::CreateFile, "d\\a.txt", b"abc".to_vec());
		assert_eq!(m.path, "d/a.txt");
		assert_eq!(m.hash, util::hash(b"abc"));
		assert_eq!(m.payload(), b"abc");

		let empty = Message::with_data(Opcode::CreateFile, "e.txt", Vec::new());
		assert!(!empty.payload_present());
		assert_eq!(empty.hash, util::hash(b""));
	}

	#[test]
	fn test_ack_payloads() {
		let ok = Message::ack(true, "alice");
		assert_eq!(ok.opcode, Opcode::Ok);
		assert_eq!(ok.path, "alice");
		assert_eq!(ok.payload(), b"OK!");
		assert_eq!(Message::ack(false, "alice").opcode, Opcode::Error);
	}
}

// vim: ts=4
