//! TCP front end of the server

use std::sync::Arc;
use tokio::fs as afs;
use tokio::net::TcpListener;

use crate::config::ServerSettings;
use crate::credentials::CredentialStore;
use crate::error::SyncError;
use crate::logging::*;
use crate::pool::{ServerContext, SessionPool};

/// Bind the configured address and serve forever
pub async fn serve(settings: ServerSettings) -> Result<(), SyncError> {
	let address = settings.network.address();
	let listener = TcpListener::bind(&address).await.map_err(|e| {
		error!("Cannot bind {}: {}", address, e);
		SyncError::Transport(e)
	})?;
	serve_on(listener, settings).await
}

/// Accept loop on an already bound listener
///
/// Every accepted connection gets a session from the pool, or is closed
/// right away when the pool is full.
pub async fn serve_on(listener: TcpListener, settings: ServerSettings) -> Result<(), SyncError> {
	settings.network.validate()?;
	afs::create_dir_all(&settings.root)
		.await
		.map_err(|e| SyncError::filesystem(&settings.root, e))?;

	let ctx = Arc::new(ServerContext {
		root: settings.root.clone(),
		credentials: CredentialStore::new(settings.credentials.clone()),
		idle_window: settings.network.idle_window(),
	});
	let pool = SessionPool::new(settings.network.pool_size);

	match listener.local_addr() {
		Ok(addr) => info!("Listening on {} (root {})", addr, settings.root.display()),
		Err(_) => info!("Listening (root {})", settings.root.display()),
	}

	loop {
		let (stream, peer) = match listener.accept().await {
			Ok(conn) => conn,
			Err(e) => {
				warn!("Accept failed: {}", e);
				continue;
			}
		};
		let _ = stream.set_nodelay(true);
		debug!("Connection from {}", peer);
		pool.spawn(stream, ctx.clone());
	}
}

// vim: ts=4
