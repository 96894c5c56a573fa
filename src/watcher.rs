//! Change detection by periodic full rescans
//!
//! Each call to [`ChangeDetector::detect`] walks the watched tree and
//! compares it against the retained `path -> mtime` snapshot. Deletions are
//! found in a first pass over the snapshot, creations and modifications in a
//! second pass over the disk. Renames show up as one deletion plus one
//! creation. Deleted paths stay in the snapshot (and keep being reported)
//! until [`ChangeDetector::forget`] is called once the deletion has been
//! acknowledged by the server.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::error::SyncError;
use crate::logging::*;
use crate::util;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
	File,
	Dir,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
	Created { path: String, kind: EntryKind },
	/// Content change of a regular file
	Modified { path: String },
	Deleted { path: String },
}

impl Change {
	pub fn path(&self) -> &str {
		match self {
			Change::Created { path, .. } | Change::Modified { path } | Change::Deleted { path } => {
				path
			}
		}
	}
}

/// One entry found on disk during a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedEntry {
	pub path: String,
	pub kind: EntryKind,
	pub mtime: SystemTime,
}

#[derive(Debug, Clone, Copy)]
struct Snapshot {
	kind: EntryKind,
	mtime: SystemTime,
}

pub struct ChangeDetector {
	root: PathBuf,
	snapshot: BTreeMap<String, Snapshot>,
}

/// Recursively list regular files and directories below `root`
///
/// Paths are wire-form (relative, forward slashes). Unreadable
/// subdirectories and entries are skipped with a warning; anything that is
/// neither a file nor a directory (symlinks, sockets, ...) is ignored.
pub fn scan_tree(root: &Path) -> Result<Vec<ScannedEntry>, SyncError> {
	fn scan_dir(root: &Path, dir: &Path, out: &mut Vec<ScannedEntry>) {
		let entries = match fs::read_dir(dir) {
			Ok(e) => e,
			Err(e) => {
				warn!("Cannot read directory {}: {}", dir.display(), e);
				return;
			}
		};

		for entry_result in entries {
			let entry = match entry_result {
				Ok(e) => e,
				Err(e) => {
					debug!("Error reading directory entry: {}", e);
					continue;
				}
			};

			let path = entry.path();
			let meta = match fs::symlink_metadata(&path) {
				Ok(m) => m,
				Err(e) => {
					warn!("Cannot access {}: {}", path.display(), e);
					continue;
				}
			};

			let kind = if meta.is_dir() {
				EntryKind::Dir
			} else if meta.is_file() {
				EntryKind::File
			} else {
				debug!("Skipping special entry {}", path.display());
				continue;
			};

			let Some(rel) = util::relative_wire_path(root, &path) else {
				continue;
			};
			let mtime = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
			out.push(ScannedEntry { path: rel, kind, mtime });

			if kind == EntryKind::Dir {
				scan_dir(root, &path, out);
			}
		}
	}

	let meta = fs::metadata(root).map_err(|e| SyncError::filesystem(root, e))?;
	if !meta.is_dir() {
		return Err(SyncError::InvalidConfig {
			message: format!("{} is not a directory", root.display()),
		});
	}

	let mut out = Vec::new();
	scan_dir(root, root, &mut out);
	Ok(out)
}

impl ChangeDetector {
	pub fn new(root: impl Into<PathBuf>) -> Self {
		ChangeDetector { root: root.into(), snapshot: BTreeMap::new() }
	}

	pub fn root(&self) -> &Path {
		&self.root
	}

	/// Take the initial snapshot and return everything found
	pub fn prime(&mut self) -> Result<Vec<ScannedEntry>, SyncError> {
		let entries = scan_tree(&self.root)?;
		self.snapshot = entries
			.iter()
			.map(|e| (e.path.clone(), Snapshot { kind: e.kind, mtime: e.mtime }))
			.collect();
		Ok(entries)
	}

	/// Rescan and classify differences against the snapshot
	///
	/// Created and modified entries update the snapshot immediately; deleted
	/// ones are kept until [`forget`](Self::forget).
	pub fn detect(&mut self) -> Result<Vec<Change>, SyncError> {
		let mut changes = Vec::new();

		for path in self.snapshot.keys() {
			if fs::symlink_metadata(self.root.join(path)).is_err() {
				changes.push(Change::Deleted { path: path.clone() });
			}
		}

		for entry in scan_tree(&self.root)? {
			match self.snapshot.get_mut(&entry.path) {
				None => {
					self.snapshot
						.insert(entry.path.clone(), Snapshot { kind: entry.kind, mtime: entry.mtime });
					changes.push(Change::Created { path: entry.path, kind: entry.kind });
				}
				Some(snap) if snap.kind != entry.kind => {
					*snap = Snapshot { kind: entry.kind, mtime: entry.mtime };
					changes.push(Change::Created { path: entry.path, kind: entry.kind });
				}
				Some(snap) if snap.mtime != entry.mtime => {
					snap.mtime = entry.mtime;
					if entry.kind == EntryKind::File {
						changes.push(Change::Modified { path: entry.path });
					}
				}
				Some(_) => {}
			}
		}

		Ok(changes)
	}

	/// Drop a path once its deletion has been propagated
	pub fn forget(&mut self, path: &str) {
		self.snapshot.remove(path);
	}
}


// vim: ts=4
