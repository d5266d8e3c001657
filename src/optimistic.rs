//! Bookkeeping for optimistic (provisional) writes.
//!
//! The tracker never talks to a transport. It hands out local ids and
//! temporary identities and flips entries between confirmed and provisional.
//! Unknown identities are ignored rather than reported.

use crate::collection::{Collection, Entry};
use crate::types::{Identity, Record};
use std::fmt;

/// Default prefix for temporary identities.
pub const DEFAULT_TEMP_ID_PREFIX: &str = "tmp-";

/// Correlates a provisional entry with the local write that produced it.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LocalId(pub u64);

impl fmt::Debug for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LocalId({})", self.0)
    }
}

/// Issues local ids and temporary identities for one collection.
#[derive(Debug)]
pub struct MutationTracker {
    prefix: String,
    next: u64,
}

impl MutationTracker {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: 1,
        }
    }

    /// Next local id. Strictly increasing for the tracker's lifetime.
    pub fn next_local_id(&mut self) -> LocalId {
        let id = LocalId(self.next);
        self.next += 1;
        id
    }

    /// A fresh identity that no entry in `collection` currently uses.
    pub fn temporary_identity(&mut self, collection: &Collection) -> (Identity, LocalId) {
        loop {
            let local_id = self.next_local_id();
            let id = Identity::Text(format!("{}{}", self.prefix, local_id.0));
            if !collection.contains(&id) {
                return (id, local_id);
            }
        }
    }

    /// Mark the entry for `id` provisional. Entries that already are keep
    /// their local id. Returns false if `id` is unknown.
    pub fn mark_provisional(&mut self, collection: &mut Collection, id: &Identity) -> bool {
        let Some(entry) = collection.get_mut(id) else {
            return false;
        };
        if entry.is_provisional() {
            return true;
        }

        let local_id = self.next_local_id();
        let placeholder = Entry::Confirmed(Record::new(0));
        let record = std::mem::replace(entry, placeholder).into_record();
        *entry = Entry::Provisional { record, local_id };
        true
    }

    /// Clear the provisional mark, if any.
    pub fn confirm(&self, entry: &mut Entry) {
        if entry.is_provisional() {
            let placeholder = Entry::Confirmed(Record::new(0));
            let record = std::mem::replace(entry, placeholder).into_record();
            *entry = Entry::Confirmed(record);
        }
    }

    /// Number of local ids handed out so far.
    pub fn issued(&self) -> u64 {
        self.next - 1
    }
}

impl Default for MutationTracker {
    fn default() -> Self {
        Self::new(DEFAULT_TEMP_ID_PREFIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temporary_identity_skips_taken_ids() {
        let mut collection = Collection::new();
        collection.upsert(Entry::Confirmed(Record::new("tmp-1")));
        collection.upsert(Entry::Confirmed(Record::new("tmp-2")));

        let mut tracker = MutationTracker::default();
        let (id, local_id) = tracker.temporary_identity(&collection);

        assert_eq!(id, Identity::from("tmp-3"));
        assert_eq!(local_id, LocalId(3));
        assert_eq!(tracker.issued(), 3);
    }

    #[test]
    fn test_mark_provisional_keeps_existing_local_id() {
        let mut collection = Collection::new();
        collection.upsert(Entry::Provisional {
            record: Record::new("tmp-9"),
            local_id: LocalId(9),
        });

        let mut tracker = MutationTracker::default();
        assert!(tracker.mark_provisional(&mut collection, &Identity::from("tmp-9")));
        assert_eq!(
            collection.get(&Identity::from("tmp-9")).unwrap().local_id(),
            Some(LocalId(9))
        );
        assert_eq!(tracker.issued(), 0);
    }

    #[test]
    fn test_mark_and_confirm() {
        let mut collection = Collection::new();
        collection.upsert(Entry::Confirmed(Record::new(5).with("title", "a")));

        let mut tracker = MutationTracker::new("local:");
        assert!(tracker.mark_provisional(&mut collection, &Identity::from(5)));
        assert!(!tracker.mark_provisional(&mut collection, &Identity::from(6)));

        let entry = collection.get_mut(&Identity::from(5)).unwrap();
        assert_eq!(entry.local_id(), Some(LocalId(1)));

        tracker.confirm(entry);
        assert!(!entry.is_provisional());
        assert_eq!(entry.record().get("title"), Some(&serde_json::json!("a")));
    }
}
