//! # mirrord - one-way directory mirroring
//!
//! A client watches a local directory and mirrors every change into a
//! per-user sandbox on a server. Changes travel as length-prefixed JSON
//! frames over a single TCP connection. Each sub-operation is acknowledged,
//! and a periodic probe reconciles whatever the fast path missed.
//!
//! ## Server
//!
//! ```rust,ignore
//! use mirrord::config::{NetworkConfig, ServerSettings};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), mirrord::SyncError> {
//!     mirrord::serve::serve(ServerSettings {
//!         root: "./server_root".into(),
//!         credentials: "./auth.txt".into(),
//!         network: NetworkConfig::default(),
//!     })
//!     .await
//! }
//! ```
//!
//! ## Client
//!
//! ```rust,ignore
//! use mirrord::client::{StdinPrompt, SyncSession};
//! use mirrord::config::{ClientProfile, NetworkConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), mirrord::SyncError> {
//!     let profile = ClientProfile::load("client.conf".as_ref())?;
//!     let mut session =
//!         SyncSession::connect(NetworkConfig::default(), profile, None, Box::new(StdinPrompt::new()))
//!             .await?;
//!     session.run().await
//! }
//! ```

pub mod chunking;
pub mod client;
pub mod config;
pub mod credentials;
pub mod error;
pub mod logging;
pub mod pool;
pub mod protocol;
pub mod serve;
pub mod session;
pub mod util;
pub mod watcher;

// Re-export commonly used types
pub use client::SyncSession;
pub use config::{ClientProfile, NetworkConfig, ServerSettings};
pub use error::SyncError;
pub use pool::SessionPool;
pub use protocol::{Message, Opcode};
pub use session::SessionHandler;
pub use watcher::ChangeDetector;

// vim: ts=4
