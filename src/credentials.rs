//! Credential store: whitespace-separated `<username> <password-hash>` pairs
//!
//! The file is re-read on every lookup so users enrolled while the server
//! runs can log in without a restart. The first matching username wins.
//! Usernames name a directory below the server root, so they must be a
//! single path component that does not start with a dot.

use std::io::Write;
use std::path::PathBuf;
use tokio::fs as afs;

use crate::error::SyncError;
use crate::logging::*;
use crate::util;

#[derive(Debug, Clone)]
pub struct CredentialStore {
	path: PathBuf,
}

/// Password hash stored for `user`, first match wins
pub fn lookup<'a>(text: &'a str, user: &str) -> Option<&'a str> {
	let mut tokens = text.split_whitespace();
	while let Some(name) = tokens.next() {
		let hash = tokens.next()?;
		if name == user {
			return Some(hash);
		}
	}
	None
}

fn is_valid_username(user: &str) -> bool {
	util::is_path_safe(user) && !user.contains('/') && !user.starts_with('.')
}

impl CredentialStore {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		CredentialStore { path: path.into() }
	}

	/// Check a username against the password hash it presented
	pub async fn verify(&self, user: &str, password_hash: &str) -> bool {
		if !is_valid_username(user) {
			return false;
		}
		let text = match afs::read_to_string(&self.path).await {
			Ok(t) => t,
			Err(e) => {
				warn!("Cannot read credential store {}: {}", self.path.display(), e);
				return false;
			}
		};
		lookup(&text, user) == Some(password_hash)
	}

	/// Append a user to the store
	pub fn add_user(&self, user: &str, password: &str) -> Result<(), SyncError> {
		if !is_valid_username(user) || user.chars().any(char::is_whitespace) {
			return Err(SyncError::InvalidConfig {
				message: format!("invalid username: {:?}", user),
			});
		}
		if password.is_empty() || password.chars().any(char::is_whitespace) {
			return Err(SyncError::InvalidConfig {
				message: "password must be non-empty and contain no whitespace".into(),
			});
		}

		let mut f = std::fs::OpenOptions::new()
			.create(true)
			.append(true)
			.open(&self.path)
			.map_err(|e| SyncError::filesystem(&self.path, e))?;
		writeln!(f, "{} {}", user, util::hash(password.as_bytes()))
			.map_err(|e| SyncError::filesystem(&self.path, e))?;
		info!("Enrolled user {} in {}", user, self.path.display());
		Ok(())
	}
}


// vim: ts=4
