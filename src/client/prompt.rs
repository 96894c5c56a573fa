//! Asking the user for new credentials after a rejected login

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

/// Source of replacement credentials
#[async_trait]
pub trait CredentialPrompt: Send {
	/// Returns `(user, password)`, or `None` to retry with the current ones
	async fn prompt(&mut self) -> Option<(String, String)>;
}

/// Reads credentials from the terminal
pub struct StdinPrompt {
	reader: BufReader<tokio::io::Stdin>,
}

impl StdinPrompt {
	pub fn new() -> Self {
		StdinPrompt { reader: BufReader::new(tokio::io::stdin()) }
	}

	async fn ask(&mut self, label: &str) -> Option<String> {
		let mut stderr = tokio::io::stderr();
		stderr.write_all(label.as_bytes()).await.ok()?;
		stderr.flush().await.ok()?;

		let mut line = String::new();
		if self.reader.read_line(&mut line).await.ok()? == 0 {
			return None;
		}
		let value = line.trim();
		if value.is_empty() {
			None
		} else {
			Some(value.to_string())
		}
	}
}

impl Default for StdinPrompt {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl CredentialPrompt for StdinPrompt {
	async fn prompt(&mut self) -> Option<(String, String)> {
		let user = self.ask("Login error! Insert username: ").await?;
		let password = self.ask("Insert password: ").await?;
		Some((user, password))
	}
}

/// Never offers new credentials
pub struct NoPrompt;

#[async_trait]
impl CredentialPrompt for NoPrompt {
	async fn prompt(&mut self) -> Option<(String, String)> {
		None
	}
}

// vim: ts=4
