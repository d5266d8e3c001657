//! Reconciliation: folds feed events and optimistic writes into a collection.
//!
//! Precedence rules, applied strictly in arrival order:
//!
//! - Insert event: drop every provisional entry, then append the record.
//!   This assumes at most one optimistic write is in flight; concurrent
//!   optimistic inserts are discarded early.
//! - Update event: replace the matching entry and confirm it. Updates for
//!   unknown identities are dropped, never turned into inserts.
//! - Delete event: remove the matching entry whatever its state.
//! - Optimistic insert/update/delete: see the methods below.
//!
//! Feed events are never checked against the snapshot filter.

use crate::collection::{Collection, Entry};
use crate::optimistic::MutationTracker;
use crate::types::{Attributes, ChangeEvent, Identity, Record};
use tracing::trace;

/// What applying one change did to the collection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Applied {
    /// A record was appended (or replaced in place) after clearing
    /// `cleared` provisional entries.
    Inserted { cleared: usize },
    Updated,
    Deleted,
    /// Nothing matched; the collection is unchanged.
    Ignored,
}

/// Applies changes to a collection under the precedence rules.
#[derive(Debug, Default)]
pub struct Reconciler {
    tracker: MutationTracker,
}

impl Reconciler {
    pub fn new(tracker: MutationTracker) -> Self {
        Self { tracker }
    }

    pub fn tracker(&self) -> &MutationTracker {
        &self.tracker
    }

    /// Apply one authoritative event from the change feed.
    pub fn apply_event(&mut self, collection: &mut Collection, event: ChangeEvent) -> Applied {
        let applied = match event {
            ChangeEvent::Insert { record } => {
                let cleared = collection.remove_provisional();
                collection.upsert(Entry::Confirmed(record));
                Applied::Inserted { cleared }
            }
            ChangeEvent::Update { record } => match collection.get_mut(&record.id) {
                Some(entry) => {
                    *entry.record_mut() = record;
                    self.tracker.confirm(entry);
                    Applied::Updated
                }
                None => Applied::Ignored,
            },
            ChangeEvent::Delete { id } => match collection.remove(&id) {
                Some(_) => Applied::Deleted,
                None => Applied::Ignored,
            },
        };
        trace!(?applied, "applied feed event");
        applied
    }

    /// Append a provisional record built from `partial` under a fresh
    /// temporary identity, and return that identity.
    ///
    /// An `id` key in `partial` is ignored.
    pub fn optimistic_insert(&mut self, collection: &mut Collection, partial: Attributes) -> Identity {
        let (id, local_id) = self.tracker.temporary_identity(collection);
        let mut record = Record::new(id.clone());
        for (key, value) in partial {
            record.set(key, value);
        }
        collection.upsert(Entry::Provisional { record, local_id });
        id
    }

    /// Merge `patch` into the entry for `id` and mark it provisional.
    /// Unknown identities are a no-op.
    pub fn optimistic_update(
        &mut self,
        collection: &mut Collection,
        id: &Identity,
        patch: Attributes,
    ) -> Applied {
        if !self.tracker.mark_provisional(collection, id) {
            return Applied::Ignored;
        }
        if let Some(entry) = collection.get_mut(id) {
            let record = entry.record_mut();
            for (key, value) in patch {
                record.set(key, value);
            }
        }
        Applied::Updated
    }

    /// Remove the entry for `id` immediately. There is no undo; callers
    /// recover from a rejected delete by refetching.
    pub fn optimistic_delete(&mut self, collection: &mut Collection, id: &Identity) -> Applied {
        match collection.remove(id) {
            Some(_) => Applied::Deleted,
            None => Applied::Ignored,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attrs(value: serde_json::Value) -> Attributes {
        match value {
            serde_json::Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn seeded() -> Collection {
        let mut collection = Collection::new();
        collection.replace_all(vec![
            Record::new(1).with("title", "one"),
            Record::new(2).with("title", "two"),
        ]);
        collection
    }

    #[test]
    fn test_insert_clears_every_provisional_entry() {
        let mut collection = Collection::new();
        let mut reconciler = Reconciler::default();

        let t1 = reconciler.optimistic_insert(&mut collection, attrs(json!({"title": "A"})));
        let t2 = reconciler.optimistic_insert(&mut collection, attrs(json!({"title": "B"})));
        assert_ne!(t1, t2);
        assert_eq!(collection.provisional_count(), 2);

        let applied = reconciler.apply_event(
            &mut collection,
            ChangeEvent::Insert {
                record: Record::new(100).with("title", "C"),
            },
        );

        assert_eq!(applied, Applied::Inserted { cleared: 2 });
        assert_eq!(collection.snapshot(), vec![Record::new(100).with("title", "C")]);
    }

    #[test]
    fn test_insert_of_known_identity_replaces_in_place() {
        let mut collection = seeded();
        let mut reconciler = Reconciler::default();

        reconciler.apply_event(
            &mut collection,
            ChangeEvent::Insert {
                record: Record::new(1).with("title", "uno"),
            },
        );

        assert_eq!(collection.len(), 2);
        assert_eq!(collection.snapshot()[0].get("title"), Some(&json!("uno")));
    }

    #[test]
    fn test_update_replaces_attributes_and_confirms() {
        let mut collection = seeded();
        let mut reconciler = Reconciler::default();
        reconciler.optimistic_update(
            &mut collection,
            &Identity::from(1),
            attrs(json!({"done": true})),
        );
        assert!(collection.get(&Identity::from(1)).unwrap().is_provisional());

        let applied = reconciler.apply_event(
            &mut collection,
            ChangeEvent::Update {
                record: Record::new(1).with("title", "server"),
            },
        );

        assert_eq!(applied, Applied::Updated);
        let entry = collection.get(&Identity::from(1)).unwrap();
        assert!(!entry.is_provisional());
        assert_eq!(entry.record(), &Record::new(1).with("title", "server"));
    }

    #[test]
    fn test_update_confirms_optimistic_insert_in_place() {
        let mut collection = seeded();
        let mut reconciler = Reconciler::default();
        let temp = reconciler.optimistic_insert(&mut collection, attrs(json!({"title": "draft"})));

        reconciler.apply_event(
            &mut collection,
            ChangeEvent::Update {
                record: Record::new(temp.clone()).with("title", "saved"),
            },
        );

        let entry = &collection.entries()[2];
        assert_eq!(entry.id(), &temp);
        assert!(!entry.is_provisional());
        assert_eq!(entry.record().get("title"), Some(&json!("saved")));
        assert_eq!(reconciler.tracker().issued(), 1);
    }

    #[test]
    fn test_update_for_unknown_identity_is_dropped() {
        let mut collection = seeded();
        let mut reconciler = Reconciler::default();

        let applied = reconciler.apply_event(
            &mut collection,
            ChangeEvent::Update {
                record: Record::new(99),
            },
        );

        assert_eq!(applied, Applied::Ignored);
        assert_eq!(collection.len(), 2);
    }

    #[test]
    fn test_delete_ignores_provisional_state() {
        let mut collection = Collection::new();
        let mut reconciler = Reconciler::default();
        let t1 = reconciler.optimistic_insert(&mut collection, Attributes::new());

        let applied = reconciler.apply_event(&mut collection, ChangeEvent::Delete { id: t1.clone() });

        assert_eq!(applied, Applied::Deleted);
        assert!(!collection.contains(&t1));
    }

    #[test]
    fn test_optimistic_insert_ignores_id_in_partial() {
        let mut collection = Collection::new();
        let mut reconciler = Reconciler::new(MutationTracker::new("draft-"));

        let id = reconciler.optimistic_insert(&mut collection, attrs(json!({"id": 5, "title": "x"})));

        assert_eq!(id, Identity::from("draft-1"));
        let entry = collection.get(&id).unwrap();
        assert!(entry.is_provisional());
        assert_eq!(entry.record().get("title"), Some(&json!("x")));
    }

    #[test]
    fn test_optimistic_update_merges_patch() {
        let mut collection = seeded();
        let mut reconciler = Reconciler::default();

        reconciler.optimistic_update(
            &mut collection,
            &Identity::from(2),
            attrs(json!({"done": true, "id": 77})),
        );

        let entry = collection.get(&Identity::from(2)).unwrap();
        assert!(entry.is_provisional());
        assert_eq!(entry.record().get("title"), Some(&json!("two")));
        assert_eq!(entry.record().get("done"), Some(&json!(true)));
        assert!(!collection.contains(&Identity::from(77)));
    }

    #[test]
    fn test_optimistic_ops_on_unknown_identity_are_noops() {
        let mut collection = seeded();
        let before = collection.snapshot();
        let mut reconciler = Reconciler::default();

        let missing = Identity::from("nope");
        assert_eq!(
            reconciler.optimistic_update(&mut collection, &missing, attrs(json!({"a": 1}))),
            Applied::Ignored
        );
        assert_eq!(
            reconciler.optimistic_delete(&mut collection, &missing),
            Applied::Ignored
        );
        assert_eq!(collection.snapshot(), before);
    }

    #[test]
    fn test_optimistic_delete_removes_confirmed_entry() {
        let mut collection = seeded();
        let mut reconciler = Reconciler::default();

        assert_eq!(
            reconciler.optimistic_delete(&mut collection, &Identity::from(1)),
            Applied::Deleted
        );
        assert_eq!(collection.snapshot(), vec![Record::new(2).with("title", "two")]);
    }
}
