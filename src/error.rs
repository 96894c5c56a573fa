//! Error types for mirroring operations

use std::error::Error;
use std::fmt;
use std::io;
use std::path::PathBuf;

use crate::protocol::ProtocolError;

/// Main error type
#[derive(Debug)]
pub enum SyncError {
	/// Socket read/write failure; the session is degraded but recoverable
	Transport(io::Error),

	/// Malformed frame; only the offending message is rejected
	Protocol(ProtocolError),

	/// Received chunk does not match its declared hash
	Integrity { path: String, expected: String, actual: String },

	/// Login rejected
	Auth { user: String, attempts: u32 },

	/// Filesystem operation failed
	Filesystem { path: PathBuf, source: io::Error },

	/// Message path would leave the sandbox
	PathEscape { path: String },

	/// Invalid configuration
	InvalidConfig { message: String },
}

impl SyncError {
	pub fn filesystem(path: impl Into<PathBuf>, source: io::Error) -> Self {
		SyncError::Filesystem { path: path.into(), source }
	}

	/// True for socket-level failures
	pub fn is_transport(&self) -> bool {
		match self {
			SyncError::Transport(_) => true,
			SyncError::Protocol(e) => e.is_transport(),
			_ => false,
		}
	}
}

impl fmt::Display for SyncError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			SyncError::Transport(e) => write!(f, "Transport error: {}", e),
			SyncError::Protocol(e) => write!(f, "Protocol error: {}", e),
			SyncError::Integrity { path, expected, actual } => {
				write!(f, "Integrity error on {}: expected {}, got {}", path, expected, actual)
			}
			SyncError::Auth { user, attempts } => {
				write!(f, "Login failed for {} after {} attempt(s)", user, attempts)
			}
			SyncError::Filesystem { path, source } => {
				write!(f, "Filesystem error on {}: {}", path.display(), source)
			}
			SyncError::PathEscape { path } => write!(f, "Path escapes sandbox: {}", path),
			SyncError::InvalidConfig { message } => {
				write!(f, "Invalid configuration: {}", message)
			}
		}
	}
}

impl Error for SyncError {
	fn source(&self) -> Option<&(dyn Error + 'static)> {
		match self {
			SyncError::Transport(e) => Some(e),
			SyncError::Protocol(e) => Some(e),
			SyncError::Filesystem { source, .. } => Some(source),
			_ => None,
		}
	}
}

impl From<ProtocolError> for SyncError {
	fn from(e: ProtocolError) -> Self {
		match e {
			ProtocolError::Io(io) => SyncError::Transport(io),
			other => SyncError::Protocol(other),
		}
	}
}

impl From<toml::de::Error> for SyncError {
	fn from(e: toml::de::Error) -> Self {
		SyncError::InvalidConfig { message: e.to_string() }
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_protocol_io_becomes_transport() {
		let e: SyncError = ProtocolError::Io(io::Error::from(io::ErrorKind::BrokenPipe)).into();
		assert!(matches!(e, SyncError::Transport(_)));
		assert!(e.is_transport());

		let e: SyncError = ProtocolError::InvalidLength("ab".into()).into();
		assert!(matches!(e, SyncError::Protocol(_)));
		assert!(!e.is_transport());
	}

	#[test]
	fn test_display() {
		let e = SyncError::Auth { user: "alice".into(), attempts: 5 };
		assert_eq!(e.to_string(), "Login failed for alice after 5 attempt(s)");
	}
}

// vim: ts=4
