//! The client's mirror of the server key space.
//!
//! Entries are stored once, keyed by name. A secondary index maps server
//! assigned ids to names, so a lookup by id always resolves to the same
//! stored entry as a lookup by name.

use crate::error::ClientError;
use ntsync_protocol::{Entry, EntryFlags, EntryType, EntryUpdate, EntryValue, UNASSIGNED_ID};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// Half of the 16-bit sequence space.
const SEQUENCE_HALF_RANGE: u16 = 0x8000;

/// Returns whether `received` is not older than `current` under 16-bit
/// wrapping comparison. Equal sequence numbers count as not older.
pub fn sequence_is_current(current: u16, received: u16) -> bool {
    received.wrapping_sub(current) < SEQUENCE_HALF_RANGE
}

/// Result of applying an EntryUpdate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Applied,
    /// No entry carries the update's id.
    UnknownId,
    /// The update's type differs from the stored entry's type.
    TypeMismatch {
        expected: EntryType,
        actual: EntryType,
    },
    /// The update is older than the stored value.
    Stale { current: u16, received: u16 },
}

/// A point-in-time copy of one entry for callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntrySnapshot {
    pub name: String,
    pub value: EntryValue,
    pub entry_type: EntryType,
}

#[derive(Debug, Default)]
struct TableInner {
    by_name: BTreeMap<String, Entry>,
    by_id: HashMap<u16, String>,
}

impl TableInner {
    /// Points `entry.id` at `entry.name`.
    ///
    /// An id names exactly one entry, so if the server hands an id that
    /// another name still holds, that older entry is dropped.
    fn index(&mut self, entry: &Entry) {
        if !entry.has_id() {
            return;
        }
        if let Some(previous) = self.by_id.insert(entry.id, entry.name.clone()) {
            if previous != entry.name {
                tracing::debug!(
                    "Id {} moved from {} to {}, dropping {}",
                    entry.id,
                    previous,
                    entry.name,
                    previous
                );
                self.by_name.remove(&previous);
            }
        }
    }

    fn unindex(&mut self, entry: &Entry) {
        if entry.has_id() && self.by_id.get(&entry.id) == Some(&entry.name) {
            self.by_id.remove(&entry.id);
        }
    }

    fn entry_by_id(&mut self, id: u16) -> Option<&mut Entry> {
        let name = self.by_id.get(&id)?;
        self.by_name.get_mut(name)
    }
}

/// Thread-safe entry table.
#[derive(Debug, Default)]
pub struct EntryTable {
    inner: RwLock<TableInner>,
}

impl EntryTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces an entry sent by the server.
    ///
    /// Server assignments are authoritative, so no sequence check is made.
    /// Returns `true` if the name was not present before.
    pub fn upsert_from_assign(&self, entry: Entry) -> bool {
        let mut inner = self.inner.write();

        let existing_id = inner.by_name.get(&entry.name).map(|e| e.id);
        if let Some(old_id) = existing_id {
            if old_id != entry.id && inner.by_id.get(&old_id) == Some(&entry.name) {
                inner.by_id.remove(&old_id);
            }
        }
        inner.index(&entry);

        match inner.by_name.get_mut(&entry.name) {
            Some(slot) => {
                *slot = entry;
                false
            }
            None => {
                inner.by_name.insert(entry.name.clone(), entry);
                true
            }
        }
    }

    /// Applies a value update addressed by id.
    pub fn apply_update(&self, update: EntryUpdate) -> UpdateOutcome {
        let mut inner = self.inner.write();
        let Some(entry) = inner.entry_by_id(update.id) else {
            return UpdateOutcome::UnknownId;
        };

        if entry.entry_type() != update.entry_type() {
            return UpdateOutcome::TypeMismatch {
                expected: entry.entry_type(),
                actual: update.entry_type(),
            };
        }
        if !sequence_is_current(entry.sequence, update.sequence) {
            return UpdateOutcome::Stale {
                current: entry.sequence,
                received: update.sequence,
            };
        }

        entry.apply_update(update);
        UpdateOutcome::Applied
    }

    /// Replaces the flags of the entry with `id`. Returns `false` if unknown.
    pub fn apply_flags(&self, id: u16, flags: EntryFlags) -> bool {
        let mut inner = self.inner.write();
        match inner.entry_by_id(id) {
            Some(entry) => {
                entry.flags = flags;
                true
            }
            None => false,
        }
    }

    /// Removes the entry with `id`, returning its name.
    pub fn apply_delete(&self, id: u16) -> Option<String> {
        let mut inner = self.inner.write();
        let name = inner.by_id.remove(&id)?;
        inner.by_name.remove(&name);
        Some(name)
    }

    /// Removes every entry. Returns how many were removed.
    pub fn clear_all(&self) -> usize {
        let mut inner = self.inner.write();
        let count = inner.by_name.len();
        inner.by_name.clear();
        inner.by_id.clear();
        count
    }

    /// Inserts a client-originated entry. Returns `false`, leaving the table
    /// untouched, if the name already exists.
    pub fn insert_local(&self, entry: Entry) -> bool {
        let mut inner = self.inner.write();
        if inner.by_name.contains_key(&entry.name) {
            return false;
        }
        inner.index(&entry);
        inner.by_name.insert(entry.name.clone(), entry);
        true
    }

    /// Sets a new value on an existing entry and bumps its sequence.
    ///
    /// Returns the updated entry so the caller can announce it.
    pub fn set_local(&self, name: &str, value: EntryValue) -> Result<Entry, ClientError> {
        let mut inner = self.inner.write();
        let entry = inner
            .by_name
            .get_mut(name)
            .ok_or_else(|| ClientError::KeyNotFound(name.to_string()))?;

        if entry.entry_type() != value.entry_type() {
            return Err(ClientError::TypeMismatch {
                key: name.to_string(),
                expected: entry.entry_type(),
                actual: value.entry_type(),
            });
        }

        entry.replace_value(value)?;
        entry.sequence = entry.sequence.wrapping_add(1);
        Ok(entry.clone())
    }

    /// Replaces the flags of an entry by name.
    pub fn set_flags_local(&self, name: &str, flags: EntryFlags) -> Result<Entry, ClientError> {
        let mut inner = self.inner.write();
        let entry = inner
            .by_name
            .get_mut(name)
            .ok_or_else(|| ClientError::KeyNotFound(name.to_string()))?;
        entry.flags = flags;
        Ok(entry.clone())
    }

    /// Removes an entry by name.
    pub fn remove(&self, name: &str) -> Option<Entry> {
        let mut inner = self.inner.write();
        let entry = inner.by_name.remove(name)?;
        inner.unindex(&entry);
        Some(entry)
    }

    pub fn get(&self, name: &str) -> Option<EntryValue> {
        self.inner.read().by_name.get(name).map(|e| e.value().clone())
    }

    pub fn get_entry(&self, name: &str) -> Option<Entry> {
        self.inner.read().by_name.get(name).cloned()
    }

    /// Looks an entry up through the id index.
    pub fn get_by_id(&self, id: u16) -> Option<Entry> {
        let inner = self.inner.read();
        let name = inner.by_id.get(&id)?;
        inner.by_name.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.read().by_name.contains_key(name)
    }

    /// Returns the sorted names starting with `prefix`.
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.inner
            .read()
            .by_name
            .range(prefix.to_string()..)
            .take_while(|(name, _)| name.starts_with(prefix))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Returns sorted snapshots of the entries whose names start with `prefix`.
    pub fn snapshot_with_prefix(&self, prefix: &str) -> Vec<EntrySnapshot> {
        self.inner
            .read()
            .by_name
            .range(prefix.to_string()..)
            .take_while(|(name, _)| name.starts_with(prefix))
            .map(|(name, entry)| EntrySnapshot {
                name: name.clone(),
                value: entry.value().clone(),
                entry_type: entry.entry_type(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().by_name.is_empty()
    }
}
