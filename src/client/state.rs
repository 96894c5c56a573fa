//! Per-path bookkeeping on the client

use std::collections::BTreeMap;

/// Whether the server is known to hold the current version of an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
	/// Due for network action
	Invalid,
	/// Acknowledged by the server
	Valid,
}

/// Last local change observed for an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LastAction {
	Created,
	Modified,
	/// Deleted locally, not yet acknowledged by the server
	DeletedPending,
	DirCreated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackedEntry {
	pub status: SyncStatus,
	pub action: LastAction,
}

impl TrackedEntry {
	pub fn invalid(action: LastAction) -> Self {
		TrackedEntry { status: SyncStatus::Invalid, action }
	}

	pub fn is_valid(&self) -> bool {
		self.status == SyncStatus::Valid
	}
}

/// Tracked entries keyed by wire path
///
/// Ordered so parents are always visited before their children.
#[derive(Debug, Default)]
pub struct TrackedEntries {
	entries: BTreeMap<String, TrackedEntry>,
}

impl TrackedEntries {
	pub fn new() -> Self {
		Self::default()
	}

	/// Record a new local change; the entry becomes Invalid
	pub fn record(&mut self, path: &str, action: LastAction) {
		self.entries.insert(path.to_string(), TrackedEntry::invalid(action));
	}

	pub fn get(&self, path: &str) -> Option<&TrackedEntry> {
		self.entries.get(path)
	}

	pub fn set_status(&mut self, path: &str, status: SyncStatus) {
		if let Some(entry) = self.entries.get_mut(path) {
			entry.status = status;
		}
	}

	pub fn remove(&mut self, path: &str) -> Option<TrackedEntry> {
		self.entries.remove(path)
	}

	pub fn invalidate_all(&mut self) {
		for entry in self.entries.values_mut() {
			entry.status = SyncStatus::Invalid;
		}
	}

	/// Snapshot of the Invalid entries, in path order
	pub fn invalid(&self) -> Vec<(String, TrackedEntry)> {
		self.entries
			.iter()
			.filter(|(_, e)| !e.is_valid())
			.map(|(p, e)| (p.clone(), *e))
			.collect()
	}

	/// Remove acknowledged deletions, returning their paths
	pub fn collect_garbage(&mut self) -> Vec<String> {
		let done: Vec<String> = self
			.entries
			.iter()
			.filter(|(_, e)| e.action == LastAction::DeletedPending && e.is_valid())
			.map(|(p, _)| p.clone())
			.collect();
		for path in &done {
			self.entries.remove(path);
		}
		done
	}

	pub fn iter(&self) -> impl Iterator<Item = (&String, &TrackedEntry)> {
		self.entries.iter()
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}
}


// vim: ts=4
