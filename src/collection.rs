//! Local materialized collection: the ordered, identity-keyed set of records
//! one live query currently knows about.

use crate::optimistic::LocalId;
use crate::types::{Identity, Record};

/// A record in the collection, tagged with how much we trust it.
#[derive(Clone, Debug, PartialEq)]
pub enum Entry {
    /// Matches what the server last told us.
    Confirmed(Record),
    /// Written locally and not yet confirmed by the feed.
    Provisional { record: Record, local_id: LocalId },
}

impl Entry {
    pub fn record(&self) -> &Record {
        match self {
            Entry::Confirmed(record) => record,
            Entry::Provisional { record, .. } => record,
        }
    }

    pub fn record_mut(&mut self) -> &mut Record {
        match self {
            Entry::Confirmed(record) => record,
            Entry::Provisional { record, .. } => record,
        }
    }

    pub fn into_record(self) -> Record {
        match self {
            Entry::Confirmed(record) => record,
            Entry::Provisional { record, .. } => record,
        }
    }

    pub fn id(&self) -> &Identity {
        &self.record().id
    }

    pub fn is_provisional(&self) -> bool {
        matches!(self, Entry::Provisional { .. })
    }

    pub fn local_id(&self) -> Option<LocalId> {
        match self {
            Entry::Confirmed(_) => None,
            Entry::Provisional { local_id, .. } => Some(*local_id),
        }
    }
}

/// Ordered collection with at most one entry per identity.
///
/// Lookups are linear; collection order is vector order.
#[derive(Clone, Debug, Default)]
pub struct Collection {
    entries: Vec<Entry>,
}

impl Collection {
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, id: &Identity) -> Option<usize> {
        self.entries.iter().position(|e| e.id() == id)
    }

    /// Replace the entry with the same identity in place, or append.
    pub fn upsert(&mut self, entry: Entry) {
        match self.position(entry.id()) {
            Some(index) => self.entries[index] = entry,
            None => self.entries.push(entry),
        }
    }

    /// Remove by identity. Returns the removed entry, if any.
    pub fn remove(&mut self, id: &Identity) -> Option<Entry> {
        self.position(id).map(|index| self.entries.remove(index))
    }

    /// Replace all contents with confirmed records, keeping their order.
    ///
    /// If the input repeats an identity, the later record wins and takes the
    /// earlier one's position.
    pub fn replace_all(&mut self, records: Vec<Record>) {
        self.entries.clear();
        self.entries.reserve(records.len());
        for record in records {
            self.upsert(Entry::Confirmed(record));
        }
    }

    /// Current records in collection order.
    pub fn snapshot(&self) -> Vec<Record> {
        self.entries.iter().map(|e| e.record().clone()).collect()
    }

    /// Drop every provisional entry. Returns how many were removed.
    pub fn remove_provisional(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| !e.is_provisional());
        before - self.entries.len()
    }

    pub fn get(&self, id: &Identity) -> Option<&Entry> {
        self.entries.iter().find(|e| e.id() == id)
    }

    pub fn get_mut(&mut self, id: &Identity) -> Option<&mut Entry> {
        self.entries.iter_mut().find(|e| e.id() == id)
    }

    pub fn contains(&self, id: &Identity) -> bool {
        self.position(id).is_some()
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn provisional_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_provisional()).count()
    }
}
