//! Bounded pool of concurrent server sessions
//!
//! Each accepted connection needs a permit. When none is left the connection
//! is closed immediately and the active count is unchanged.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::credentials::CredentialStore;
use crate::error::SyncError;
use crate::logging::*;
use crate::session::SessionHandler;

/// Shared by every session of one server
#[derive(Debug, Clone)]
pub struct ServerContext {
	pub root: PathBuf,
	pub credentials: CredentialStore,
	/// A session with no incoming traffic for this long is closed
	pub idle_window: Duration,
}

#[derive(Clone)]
pub struct SessionPool {
	permits: Arc<Semaphore>,
	capacity: usize,
}

impl SessionPool {
	pub fn new(capacity: usize) -> Self {
		SessionPool { permits: Arc::new(Semaphore::new(capacity)), capacity }
	}

	/// Sessions currently holding a slot
	pub fn active(&self) -> usize {
		self.capacity - self.permits.available_permits()
	}

	/// Run `fut` on its own task if a slot is free
	///
	/// The slot is released when the task finishes.
	pub fn try_spawn<F>(&self, fut: F) -> Option<JoinHandle<()>>
	where
		F: Future<Output = ()> + Send + 'static,
	{
		let permit = self.permits.clone().try_acquire_owned().ok()?;
		Some(tokio::spawn(async move {
			fut.await;
			drop(permit);
		}))
	}

	/// Start a session worker for an accepted connection
	///
	/// Returns false when the pool is full; the stream is dropped, which
	/// closes the connection.
	pub fn spawn(&self, stream: TcpStream, ctx: Arc<ServerContext>) -> bool {
		let peer = stream.peer_addr().map(|a| a.to_string()).unwrap_or_else(|_| "?".into());
		match self.try_spawn(session_worker(stream, ctx)) {
			Some(_) => {
				debug!("Session for {} started ({}/{})", peer, self.active(), self.capacity);
				true
			}
			None => {
				warn!("Too many connections ({}/{}), rejecting {}", self.active(), self.capacity, peer);
				false
			}
		}
	}
}

/// Handshake then serve one connection until it closes or goes idle
pub async fn session_worker<S>(stream: S, ctx: Arc<ServerContext>)
where
	S: AsyncRead + AsyncWrite + Unpin + Send,
{
	let accepted = tokio::time::timeout(
		ctx.idle_window,
		SessionHandler::accept(stream, &ctx.root, ctx.credentials.clone()),
	)
	.await;

	let mut handler = match accepted {
		Ok(Ok(h)) => h,
		Ok(Err(SyncError::Auth { user, .. })) => {
			info!("Login rejected for {:?}", user);
			return;
		}
		Ok(Err(e)) => {
			warn!("Handshake failed: {}", e);
			return;
		}
		Err(_) => {
			warn!("Handshake timed out");
			return;
		}
	};

	run_session(&mut handler, ctx.idle_window).await;
	handler.close().await;
	info!("Session closed for {}", handler.client_name());
}

/// Serve messages until the peer disconnects, errors or stays silent too long
pub async fn run_session<S>(handler: &mut SessionHandler<S>, idle: Duration)
where
	S: AsyncRead + AsyncWrite + Unpin + Send,
{
	while handler.is_open() {
		match tokio::time::timeout(idle, handler.wait_readable()).await {
			Err(_) => {
				info!("Session for {} idle, closing", handler.client_name());
				break;
			}
			Ok(Ok(false)) => {
				debug!("{} disconnected", handler.client_name());
				break;
			}
			Ok(Err(e)) => {
				warn!("Read error from {}: {}", handler.client_name(), e);
				break;
			}
			Ok(Ok(true)) => {}
		}

		if let Err(e) = handler.serve_next().await {
			warn!("Session for {} ended: {}", handler.client_name(), e);
			break;
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tokio::sync::oneshot;

	#[tokio::test]
	async fn test_capacity_enforced() {
		let pool = SessionPool::new(2);
		let (tx1, rx1) = oneshot::channel::<()>();
		let (tx2, rx2) = oneshot::channel::<()>();

		let h1 = pool.try_spawn(async move {
			let _ = rx1.await;
		});
		let h2 = pool.try_spawn(async move {
			let _ = rx2.await;
		});
		assert!(h1.is_some() && h2.is_some());
		assert_eq!(pool.active(), 2);

		assert!(pool.try_spawn(async {}).is_none());
		assert_eq!(pool.active(), 2);

		tx1.send(()).unwrap();
		h1.unwrap().await.unwrap();
		assert_eq!(pool.active(), 1);
		assert!(pool.try_spawn(async {}).is_some());

		tx2.send(()).unwrap();
		h2.unwrap().await.unwrap();
	}

	#[tokio::test]
	async fn test_idle_session_is_reaped() {
		use crate::protocol::{read_message, write_message, Message, Opcode};
		use tokio::io::BufStream;

		let root = tempfile::TempDir::new().unwrap();
		let store = CredentialStore::new(root.path().join("auth.txt"));
		store.add_user("alice", "pw").unwrap();
		let ctx = Arc::new(ServerContext {
			root: root.path().join("srv"),
			credentials: store,
			idle_window: Duration::from_millis(100),
		});

		let (client, server) = tokio::io::duplex(4096);
		let mut client = BufStream::new(client);
		write_message(&mut client, &Message::login("alice", "pw")).await.unwrap();
		let worker = tokio::spawn(session_worker(server, ctx));

		assert_eq!(read_message(&mut client).await.unwrap().opcode, Opcode::Ok);
		tokio::time::timeout(Duration::from_secs(5), worker).await.unwrap().unwrap();
		assert!(read_message(&mut client).await.is_err());
	}
}

// vim: ts=4
