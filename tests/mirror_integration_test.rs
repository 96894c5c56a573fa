/// End-to-end mirroring tests against a real server on a loopback port
///
/// Each test starts its own server on 127.0.0.1:0 with a fresh root and
/// credential store, then drives a client session tick by tick and checks
/// the server sandbox on disk.
use async_trait::async_trait;
use filetime::FileTime;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::BufStream;
use tokio::net::{TcpListener, TcpStream};

use mirrord::client::{CredentialPrompt, LastAction, NoPrompt, SyncStatus, SyncSession};
use mirrord::config::{ClientProfile, NetworkConfig, ServerSettings};
use mirrord::credentials::CredentialStore;
use mirrord::protocol::{read_message, write_message, Message, Opcode};
use mirrord::SyncError;

struct Server {
	_dir: TempDir,
	root: PathBuf,
	network: NetworkConfig,
}

impl Server {
	fn sandbox(&self, user: &str) -> PathBuf {
		self.root.join(user)
	}
}

/// Start a server with `alice`/`secret` enrolled
async fn start_server(pool_size: usize, probe_period: u32) -> Server {
	start_server_with_idle(pool_size, probe_period, 3).await
}

/// Same, with the idle window set to 50 ms × `probe_period` × `idle_multiplier`
async fn start_server_with_idle(
	pool_size: usize,
	probe_period: u32,
	idle_multiplier: u32,
) -> Server {
	let dir = TempDir::new().unwrap();
	let root = dir.path().join("server_root");
	let credentials = dir.path().join("auth.txt");
	CredentialStore::new(&credentials).add_user("alice", "secret").unwrap();

	let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
	let port = listener.local_addr().unwrap().port();
	let network = NetworkConfig {
		host: "127.0.0.1".into(),
		port,
		tick_interval_ms: 50,
		probe_period,
		idle_multiplier,
		pool_size,
	};
	let settings = ServerSettings { root: root.clone(), credentials, network: network.clone() };
	tokio::spawn(mirrord::serve::serve_on(listener, settings));

	Server { _dir: dir, root, network }
}

fn profile(watch: &Path, password: &str) -> ClientProfile {
	ClientProfile { user: "alice".into(), password: password.into(), watch_path: watch.to_path_buf() }
}

async fn connect(server: &Server, watch: &Path) -> SyncSession {
	SyncSession::connect(server.network.clone(), profile(watch, "secret"), None, Box::new(NoPrompt))
		.await
		.unwrap()
}

/// Poll until `check` holds, for at most five seconds
async fn eventually<F: Fn() -> bool>(check: F) -> bool {
	for _ in 0..100 {
		if check() {
			return true;
		}
		tokio::time::sleep(Duration::from_millis(50)).await;
	}
	check()
}

fn set_mtime(path: &Path, secs: i64) {
	filetime::set_file_mtime(path, FileTime::from_unix_time(secs, 0)).unwrap();
}

#[tokio::test]
async fn test_initial_sync_mirrors_tree() {
	let server = start_server(5, 1000).await;
	let watch = TempDir::new().unwrap();
	fs::write(watch.path().join("a.txt"), "hello").unwrap();
	fs::create_dir_all(watch.path().join("sub/deeper")).unwrap();
	fs::write(watch.path().join("sub/deeper/b.bin"), vec![7u8; 5000]).unwrap();
	fs::write(watch.path().join("sub/empty.txt"), "").unwrap();

	let session = connect(&server, watch.path()).await;

	let sandbox = server.sandbox("alice");
	assert_eq!(fs::read_to_string(sandbox.join("a.txt")).unwrap(), "hello");
	assert_eq!(fs::read(sandbox.join("sub/deeper/b.bin")).unwrap(), vec![7u8; 5000]);
	assert_eq!(fs::read(sandbox.join("sub/empty.txt")).unwrap(), Vec::<u8>::new());
	for path in ["a.txt", "sub", "sub/deeper", "sub/deeper/b.bin", "sub/empty.txt"] {
		assert_eq!(session.status_of(path), Some(SyncStatus::Valid), "{}", path);
	}
}

#[tokio::test]
async fn test_create_modify_delete_propagate() {
	let server = start_server(5, 1000).await;
	let watch = TempDir::new().unwrap();
	let sandbox = server.sandbox("alice");
	let mut session = connect(&server, watch.path()).await;

	let file = watch.path().join("notes.txt");
	fs::write(&file, "v1").unwrap();
	set_mtime(&file, 1_000_000);
	session.tick().await.unwrap();
	assert_eq!(fs::read_to_string(sandbox.join("notes.txt")).unwrap(), "v1");
	assert_eq!(session.status_of("notes.txt"), Some(SyncStatus::Valid));

	fs::write(&file, "version two").unwrap();
	set_mtime(&file, 2_000_000);
	session.tick().await.unwrap();
	assert_eq!(fs::read_to_string(sandbox.join("notes.txt")).unwrap(), "version two");

	fs::remove_file(&file).unwrap();
	session.tick().await.unwrap();
	assert!(!sandbox.join("notes.txt").exists());
	assert_eq!(session.status_of("notes.txt"), None);
	assert!(!session.is_degraded());
}

#[tokio::test]
async fn test_directory_removal_takes_children() {
	let server = start_server(5, 1000).await;
	let watch = TempDir::new().unwrap();
	fs::create_dir_all(watch.path().join("d/e")).unwrap();
	fs::write(watch.path().join("d/e/f.txt"), "x").unwrap();
	let sandbox = server.sandbox("alice");
	let mut session = connect(&server, watch.path()).await;
	assert!(sandbox.join("d/e/f.txt").is_file());

	fs::remove_dir_all(watch.path().join("d")).unwrap();
	session.tick().await.unwrap();
	assert!(!sandbox.join("d").exists());
	assert!(session.entries().is_empty());
}

#[tokio::test]
async fn test_probe_repairs_corrupted_server_copy() {
	let server = start_server(5, 1).await;
	let watch = TempDir::new().unwrap();
	fs::write(watch.path().join("a.txt"), "the real content").unwrap();
	fs::write(watch.path().join("b.txt"), "untouched").unwrap();
	let sandbox = server.sandbox("alice");
	let mut session = connect(&server, watch.path()).await;

	fs::write(sandbox.join("a.txt"), "garbage").unwrap();
	// probe_period 1: every tick ends in a full probe
	session.tick().await.unwrap();

	assert_eq!(fs::read_to_string(sandbox.join("a.txt")).unwrap(), "the real content");
	assert_eq!(fs::read_to_string(sandbox.join("b.txt")).unwrap(), "untouched");
	assert_eq!(session.status_of("a.txt"), Some(SyncStatus::Valid));
}

#[tokio::test]
async fn test_probe_sweeps_unknown_server_entries() {
	let server = start_server(5, 1000).await;
	let sandbox = server.sandbox("alice");
	fs::create_dir_all(sandbox.join("old_dir")).unwrap();
	fs::write(sandbox.join("old_dir/stale.txt"), "stale").unwrap();
	fs::write(sandbox.join("stale.txt"), "stale").unwrap();

	let watch = TempDir::new().unwrap();
	fs::write(watch.path().join("keep.txt"), "keep").unwrap();
	let _session = connect(&server, watch.path()).await;

	assert!(eventually(|| !sandbox.join("stale.txt").exists() && !sandbox.join("old_dir").exists()).await);
	assert!(sandbox.join("keep.txt").exists());
}

#[tokio::test]
async fn test_repeated_probes_are_idempotent() {
	let server = start_server(5, 1).await;
	let watch = TempDir::new().unwrap();
	fs::create_dir(watch.path().join("dir")).unwrap();
	fs::write(watch.path().join("dir/a.txt"), "a").unwrap();
	let sandbox = server.sandbox("alice");
	let mut session = connect(&server, watch.path()).await;

	for _ in 0..3 {
		session.tick().await.unwrap();
	}
	assert_eq!(fs::read_to_string(sandbox.join("dir/a.txt")).unwrap(), "a");
	assert_eq!(session.entries().len(), 2);
	assert!(session.entries().iter().all(|(_, e)| e.is_valid()));
}

#[tokio::test]
async fn test_wrong_password_exhausts_attempts() {
	let server = start_server(5, 1000).await;
	let watch = TempDir::new().unwrap();

	let res = SyncSession::connect(
		server.network.clone(),
		profile(watch.path(), "wrong"),
		None,
		Box::new(NoPrompt),
	)
	.await;
	assert!(matches!(res, Err(SyncError::Auth { attempts: 5, .. })));
	assert!(!server.sandbox("alice").exists());
}

struct ScriptedPrompt(Option<(String, String)>);

#[async_trait]
impl CredentialPrompt for ScriptedPrompt {
	async fn prompt(&mut self) -> Option<(String, String)> {
		self.0.take()
	}
}

#[tokio::test]
async fn test_corrected_credentials_are_saved() {
	let server = start_server(5, 1000).await;
	let watch = TempDir::new().unwrap();
	let conf_dir = TempDir::new().unwrap();
	let conf = conf_dir.path().join("client.conf");
	let initial = profile(watch.path(), "wrong");
	initial.save(&conf).unwrap();

	let prompt = ScriptedPrompt(Some(("alice".into(), "secret".into())));
	let session =
		SyncSession::connect(server.network.clone(), initial, Some(conf.clone()), Box::new(prompt))
			.await
			.unwrap();

	assert_eq!(session.profile().password, "secret");
	assert_eq!(ClientProfile::load(&conf).unwrap().password, "secret");
}

#[tokio::test]
async fn test_pool_rejects_connection_beyond_capacity() {
	let server = start_server(1, 1000).await;
	let watch = TempDir::new().unwrap();
	let mut session = connect(&server, watch.path()).await;

	let mut extra = BufStream::new(TcpStream::connect(server.network.address()).await.unwrap());
	let _ = write_message(&mut extra, &Message::login("alice", "secret")).await;
	assert!(read_message(&mut extra).await.is_err());

	// the admitted session is unaffected
	fs::write(watch.path().join("after.txt"), "still here").unwrap();
	session.tick().await.unwrap();
	assert_eq!(
		fs::read_to_string(server.sandbox("alice").join("after.txt")).unwrap(),
		"still here"
	);
}

#[tokio::test]
async fn test_raw_protocol_session() {
	let server = start_server(5, 1000).await;
	let mut conn = BufStream::new(TcpStream::connect(server.network.address()).await.unwrap());

	write_message(&mut conn, &Message::login("alice", "secret")).await.unwrap();
	let ack = read_message(&mut conn).await.unwrap();
	assert_eq!(ack.opcode, Opcode::Ok);
	assert_eq!(ack.path, "alice");
	assert_eq!(ack.payload(), b"OK!");

	write_message(&mut conn, &Message::new(Opcode::CreateDir, "x")).await.unwrap();
	assert_eq!(read_message(&mut conn).await.unwrap().opcode, Opcode::Ok);
	write_message(&mut conn, &Message::with_data(Opcode::RenameDir, "x", b"y".to_vec()))
		.await
		.unwrap();
	assert_eq!(read_message(&mut conn).await.unwrap().opcode, Opcode::Ok);
	assert!(server.sandbox("alice").join("y").is_dir());

	write_message(&mut conn, &Message::new(Opcode::Ping, "")).await.unwrap();
	assert_eq!(read_message(&mut conn).await.unwrap().opcode, Opcode::Ok);

	write_message(&mut conn, &Message::new(Opcode::RemoveEntry, "../../escape")).await.unwrap();
	let nack = read_message(&mut conn).await.unwrap();
	assert_eq!(nack.opcode, Opcode::Error);
	assert_eq!(nack.payload(), b"ERROR!");
}

#[tokio::test]
async fn test_unknown_user_is_rejected_and_closed() {
	let server = start_server(5, 1000).await;
	let mut conn = BufStream::new(TcpStream::connect(server.network.address()).await.unwrap());

	write_message(&mut conn, &Message::login("mallory", "secret")).await.unwrap();
	assert_eq!(read_message(&mut conn).await.unwrap().opcode, Opcode::Error);
	assert!(read_message(&mut conn).await.is_err());
}

#[tokio::test]
async fn test_long_file_name_mirrored() {
	let server = start_server(5, 1000).await;
	let watch = TempDir::new().unwrap();
	let name = format!("{}.txt", "n".repeat(236));
	fs::write(watch.path().join(&name), "long name").unwrap();

	let session = connect(&server, watch.path()).await;
	assert_eq!(session.status_of(&name), Some(SyncStatus::Valid));
	assert_eq!(fs::read_to_string(server.sandbox("alice").join(&name)).unwrap(), "long name");
}

#[tokio::test]
async fn test_temp_like_file_name_is_not_resent() {
	let server = start_server(5, 1).await;
	let watch = TempDir::new().unwrap();
	fs::write(watch.path().join("draft.mirrord-tmp"), "draft").unwrap();
	let sandbox = server.sandbox("alice");
	let mut session = connect(&server, watch.path()).await;
	let stored = sandbox.join("draft.mirrord-tmp");
	assert_eq!(fs::read_to_string(&stored).unwrap(), "draft");

	// a re-upload would replace the file; verification by hash leaves it alone
	set_mtime(&stored, 1_000_000);
	session.tick().await.unwrap();
	let mtime = FileTime::from_last_modification_time(&fs::metadata(&stored).unwrap());
	assert_eq!(mtime, FileTime::from_unix_time(1_000_000, 0));
	assert_eq!(session.status_of("draft.mirrord-tmp"), Some(SyncStatus::Valid));
}

#[tokio::test]
async fn test_reconnect_after_idle_reap() {
	// idle window: 50 ms × 4 × 1
	let server = start_server_with_idle(5, 4, 1).await;
	let watch = TempDir::new().unwrap();
	let sandbox = server.sandbox("alice");
	let mut session = connect(&server, watch.path()).await;

	tokio::time::sleep(Duration::from_millis(600)).await;
	fs::write(watch.path().join("late.txt"), "after reap").unwrap();

	for _ in 0..3 {
		session.tick().await.unwrap();
		if sandbox.join("late.txt").exists() && !session.is_degraded() {
			break;
		}
	}
	assert_eq!(fs::read_to_string(sandbox.join("late.txt")).unwrap(), "after reap");
	assert!(!session.is_degraded());
	assert_eq!(session.status_of("late.txt"), Some(SyncStatus::Valid));
}

#[tokio::test]
async fn test_unsendable_frame_drops_connection() {
	let server = start_server(5, 1000).await;
	let watch = TempDir::new().unwrap();
	let mut session = connect(&server, watch.path()).await;

	let huge = "d".repeat(10_000);
	assert!(!session.propagate(&huge, LastAction::DirCreated).await);
	assert!(session.is_degraded());

	fs::write(watch.path().join("next.txt"), "next").unwrap();
	session.tick().await.unwrap();
	assert!(!session.is_degraded());
	assert_eq!(
		fs::read_to_string(server.sandbox("alice").join("next.txt")).unwrap(),
		"next"
	);
}

// vim: ts=4
