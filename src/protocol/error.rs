//! Protocol error types
//!
//! Every failure that can happen while framing or parsing a message ends up
//! here. Socket failures are kept apart from malformed frames because the two
//! are recovered from differently: a bad frame only rejects one message, a
//! socket failure degrades the whole session.

use std::fmt;
use std::io;

/// Protocol error type
#[derive(Debug)]
pub enum ProtocolError {
	/// I/O error while reading or writing the socket
	Io(io::Error),
	/// The fixed-width length prefix is not a decimal integer
	InvalidLength(String),
	/// Encoded body does not fit the fixed-width length prefix
	FrameTooLarge(usize),
	/// JSON body is malformed or lacks a required field
	Json(String),
	/// Base64 decoding of the payload failed
	Base64(String),
	/// Protocol violation (unexpected message in the current state)
	ProtocolViolation(String),
}

impl ProtocolError {
	/// True when the error came from the socket rather than from the frame contents.
	pub fn is_transport(&self) -> bool {
		matches!(self, ProtocolError::Io(_))
	}
}

impl fmt::Display for ProtocolError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ProtocolError::Io(e) => write!(f, "I/O error: {}", e),
			ProtocolError::InvalidLength(field) => {
				write!(f, "Invalid length field: {:?}", field)
			}
			ProtocolError::FrameTooLarge(len) => {
				write!(f, "Message body of {} bytes does not fit the length field", len)
			}
			ProtocolError::Json(msg) => write!(f, "JSON parse error: {}", msg),
			ProtocolError::Base64(msg) => write!(f, "Base64 decode error: {}", msg),
			ProtocolError::ProtocolViolation(msg) => write!(f, "Protocol violation: {}", msg),
		}
	}
}

impl std::error::Error for ProtocolError {
	fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
		match self {
			ProtocolError::Io(e) => Some(e),
			_ => None,
		}
	}
}

impl From<io::Error> for ProtocolError {
	fn from(e: io::Error) -> Self {
		ProtocolError::Io(e)
	}
}

impl From<base64::DecodeError> for ProtocolError {
	fn from(e: base64::DecodeError) -> Self {
		ProtocolError::Base64(e.to_string())
	}
}

impl From<serde_json::Error> for ProtocolError {
	fn from(e: serde_json::Error) -> Self {
		ProtocolError::Json(e.to_string())
	}
}

// vim: ts=4
