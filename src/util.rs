//! Hashing and path helpers shared by client and server

use std::io;
use std::path::{Component, Path};
use tokio::fs as afs;
use tokio::io::AsyncReadExt;

const HASH_BUF_SIZE: usize = 64 * 1024;

/// Hex digest of a byte buffer
pub fn hash(buf: &[u8]) -> String {
	hex::encode(blake3::hash(buf).as_bytes())
}

/// Hex digest of a file's contents, read in bounded blocks
pub async fn hash_file(path: &Path) -> io::Result<String> {
	let mut f = afs::File::open(path).await?;
	let mut hasher = blake3::Hasher::new();
	let mut buf = vec![0u8; HASH_BUF_SIZE];
	loop {
		let n = f.read(&mut buf).await?;
		if n == 0 {
			break;
		}
		hasher.update(&buf[..n]);
	}
	Ok(hex::encode(hasher.finalize().as_bytes()))
}

/// Converts a path to the forward-slash form used on the wire
pub fn normalize_path(path: &str) -> String {
	path.replace('\\', "/")
}

/// Wire form of `path` relative to `root`, or `None` when it is not below `root`
pub fn relative_wire_path(root: &Path, path: &Path) -> Option<String> {
	let rel = path.strip_prefix(root).ok()?;
	let s = rel.to_str()?;
	if s.is_empty() {
		return None;
	}
	Some(normalize_path(s))
}

/// Check that a relative wire path stays inside the directory it is joined to
///
/// Rejects absolute paths, roots, prefixes and `..` components, and paths
/// that name the directory itself.
pub fn is_path_safe(path: &str) -> bool {
	if path.is_empty() || path.contains('\0') {
		return false;
	}
	let p = Path::new(path);
	p.components().all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
		&& p.components().any(|c| matches!(c, Component::Normal(_)))
}


// vim: ts=4
