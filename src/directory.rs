use std::sync::Arc;

use dashmap::DashMap;
use ulid::Ulid;

use crate::model::MemberSnapshot;

/// In-memory member directory. Snapshots are immutable once stored: a roster
/// sync swaps the whole `Arc`, so a booking that already fetched a snapshot
/// keeps validating against the credentials it started with.
pub struct MemberDirectory {
    members: DashMap<Ulid, Arc<MemberSnapshot>>,
}

impl MemberDirectory {
    pub fn new() -> Self {
        Self {
            members: DashMap::new(),
        }
    }

    /// Insert or replace the snapshot for a member.
    pub fn upsert(&self, snapshot: MemberSnapshot) {
        self.members.insert(snapshot.id, Arc::new(snapshot));
    }

    pub fn get(&self, id: &Ulid) -> Option<Arc<MemberSnapshot>> {
        self.members.get(id).map(|e| e.value().clone())
    }

    pub fn contains(&self, id: &Ulid) -> bool {
        self.members.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// All current snapshots, for WAL compaction. Order is unspecified.
    pub fn snapshots(&self) -> Vec<Arc<MemberSnapshot>> {
        self.members.iter().map(|e| e.value().clone()).collect()
    }
}

impl Default for MemberDirectory {
    fn default() -> Self {
        Self::new()
    }
}
