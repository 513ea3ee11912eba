use anyhow::Result;
use std::collections::BTreeMap;
use stratum_types::{Account, Address, Key, Value};
use thiserror::Error;

#[cfg(any(test, feature = "mocks"))]
use std::collections::HashMap;

/// Backing key-value store.
pub trait State {
    fn get(&self, key: &Key) -> Result<Option<Value>>;
    fn insert(&mut self, key: Key, value: Value) -> Result<()>;
    fn delete(&mut self, key: &Key) -> Result<()>;

    fn apply(&mut self, changes: Vec<(Key, Change)>) -> Result<()> {
        for (key, change) in changes {
            match change {
                Change::Update(value) => self.insert(key, value)?,
                Change::Delete => self.delete(&key)?,
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[allow(clippy::large_enum_variant)]
pub enum Change {
    Update(Value),
    Delete,
}

/// Handle to an open checkpoint, consumed by [StateView::commit] or
/// [StateView::rollback].
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a checkpoint must be committed or rolled back"]
pub struct Checkpoint {
    index: usize,
}

impl Checkpoint {
    pub fn depth(&self) -> usize {
        self.index + 1
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CheckpointError {
    #[error("checkpoint {depth} is not open")]
    NotOpen { depth: usize },
    #[error("checkpoint {depth} is not the innermost open checkpoint ({open} open)")]
    NotInnermost { depth: usize, open: usize },
}

/// State with nested, strictly ordered checkpoints.
pub trait StateView: State {
    fn checkpoint(&mut self) -> Checkpoint;

    /// Fold the writes made since `checkpoint` into the enclosing one.
    fn commit(&mut self, checkpoint: Checkpoint) -> Result<(), CheckpointError>;

    /// Discard the writes made since `checkpoint`, including those of any
    /// inner checkpoint still open.
    fn rollback(&mut self, checkpoint: Checkpoint) -> Result<(), CheckpointError>;
}

#[cfg(any(test, feature = "mocks"))]
#[derive(Default)]
pub struct Memory {
    state: HashMap<Key, Value>,
}

#[cfg(any(test, feature = "mocks"))]
impl State for Memory {
    fn get(&self, key: &Key) -> Result<Option<Value>> {
        Ok(self.state.get(key).cloned())
    }

    fn insert(&mut self, key: Key, value: Value) -> Result<()> {
        self.state.insert(key, value);
        Ok(())
    }

    fn delete(&mut self, key: &Key) -> Result<()> {
        self.state.remove(key);
        Ok(())
    }
}

/// Pending writes over a read-only backing store.
///
/// Writes are journaled while any checkpoint is open so they can be undone.
pub struct Overlay<'a, S: State + ?Sized> {
    state: &'a S,
    pending: BTreeMap<Key, Change>,
    journal: Vec<(Key, Option<Change>)>,
    marks: Vec<usize>,
}

impl<'a, S: State + ?Sized> Overlay<'a, S> {
    pub fn new(state: &'a S) -> Self {
        Self {
            state,
            pending: BTreeMap::new(),
            journal: Vec::new(),
            marks: Vec::new(),
        }
    }

    /// Number of checkpoints currently open.
    pub fn open_checkpoints(&self) -> usize {
        self.marks.len()
    }

    /// Net writes to apply to the backing store.
    pub fn into_changes(self) -> Vec<(Key, Change)> {
        self.pending.into_iter().collect()
    }

    fn record(&mut self, key: Key, change: Change) {
        let previous = self.pending.insert(key.clone(), change);
        if !self.marks.is_empty() {
            self.journal.push((key, previous));
        }
    }
}

impl<'a, S: State + ?Sized> State for Overlay<'a, S> {
    fn get(&self, key: &Key) -> Result<Option<Value>> {
        Ok(match self.pending.get(key) {
            Some(Change::Update(value)) => Some(value.clone()),
            Some(Change::Delete) => None,
            None => self.state.get(key)?,
        })
    }

    fn insert(&mut self, key: Key, value: Value) -> Result<()> {
        self.record(key, Change::Update(value));
        Ok(())
    }

    fn delete(&mut self, key: &Key) -> Result<()> {
        self.record(key.clone(), Change::Delete);
        Ok(())
    }
}

impl<'a, S: State + ?Sized> StateView for Overlay<'a, S> {
    fn checkpoint(&mut self) -> Checkpoint {
        self.marks.push(self.journal.len());
        Checkpoint {
            index: self.marks.len() - 1,
        }
    }

    fn commit(&mut self, checkpoint: Checkpoint) -> Result<(), CheckpointError> {
        let open = self.marks.len();
        if checkpoint.index >= open {
            return Err(CheckpointError::NotOpen {
                depth: checkpoint.depth(),
            });
        }
        if checkpoint.index + 1 != open {
            return Err(CheckpointError::NotInnermost {
                depth: checkpoint.depth(),
                open,
            });
        }
        self.marks.pop();
        if self.marks.is_empty() {
            self.journal.clear();
        }
        Ok(())
    }

    fn rollback(&mut self, checkpoint: Checkpoint) -> Result<(), CheckpointError> {
        let Some(&mark) = self.marks.get(checkpoint.index) else {
            return Err(CheckpointError::NotOpen {
                depth: checkpoint.depth(),
            });
        };
        self.marks.truncate(checkpoint.index);
        for (key, previous) in self.journal.drain(mark..).rev() {
            match previous {
                Some(change) => self.pending.insert(key, change),
                None => self.pending.remove(&key),
            };
        }
        Ok(())
    }
}

pub fn load_account<S: State + ?Sized>(state: &S, address: &Address) -> Result<Account> {
    Ok(match state.get(&Key::Account(*address))? {
        Some(Value::Account(account)) => account,
        _ => Account::default(),
    })
}

pub fn balance<S: State + ?Sized>(state: &S, address: &Address) -> Result<u64> {
    Ok(load_account(state, address)?.balance)
}

pub fn nonce<S: State + ?Sized>(state: &S, address: &Address) -> Result<u64> {
    Ok(load_account(state, address)?.nonce)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(n: u8) -> Key {
        Key::Storage(Address::contract([1; 20]), vec![n])
    }

    fn value(n: u8) -> Value {
        Value::Storage(vec![n])
    }

    #[test]
    fn reads_fall_through_to_backing_store() {
        let mut memory = Memory::default();
        memory.insert(key(1), value(1)).unwrap();
        let mut overlay = Overlay::new(&memory);
        assert_eq!(overlay.get(&key(1)).unwrap(), Some(value(1)));

        overlay.delete(&key(1)).unwrap();
        assert_eq!(overlay.get(&key(1)).unwrap(), None);
        assert_eq!(memory.get(&key(1)).unwrap(), Some(value(1)));
    }

    #[test]
    fn rollback_restores_previous_values() {
        let memory = Memory::default();
        let mut overlay = Overlay::new(&memory);
        overlay.insert(key(1), value(1)).unwrap();

        let checkpoint = overlay.checkpoint();
        overlay.insert(key(1), value(2)).unwrap();
        overlay.insert(key(2), value(2)).unwrap();
        overlay.rollback(checkpoint).unwrap();

        assert_eq!(overlay.get(&key(1)).unwrap(), Some(value(1)));
        assert_eq!(overlay.get(&key(2)).unwrap(), None);
    }

    #[test]
    fn committed_inner_writes_roll_back_with_outer() {
        let memory = Memory::default();
        let mut overlay = Overlay::new(&memory);

        let outer = overlay.checkpoint();
        overlay.insert(key(1), value(1)).unwrap();
        let inner = overlay.checkpoint();
        overlay.insert(key(2), value(2)).unwrap();
        overlay.commit(inner).unwrap();
        assert_eq!(overlay.get(&key(2)).unwrap(), Some(value(2)));

        overlay.rollback(outer).unwrap();
        assert_eq!(overlay.get(&key(1)).unwrap(), None);
        assert_eq!(overlay.get(&key(2)).unwrap(), None);
        assert!(overlay.into_changes().is_empty());
    }

    #[test]
    fn outer_rollback_discards_open_inner_checkpoints() {
        let memory = Memory::default();
        let mut overlay = Overlay::new(&memory);

        let outer = overlay.checkpoint();
        let _inner = overlay.checkpoint();
        overlay.insert(key(3), value(3)).unwrap();
        overlay.rollback(outer).unwrap();

        assert_eq!(overlay.open_checkpoints(), 0);
        assert_eq!(overlay.get(&key(3)).unwrap(), None);
    }

    #[test]
    fn commit_requires_innermost_checkpoint() {
        let memory = Memory::default();
        let mut overlay = Overlay::new(&memory);

        let outer = overlay.checkpoint();
        let inner = overlay.checkpoint();
        assert_eq!(
            overlay.commit(outer),
            Err(CheckpointError::NotInnermost { depth: 1, open: 2 })
        );
        overlay.commit(inner).unwrap();
    }

    #[test]
    fn changes_apply_to_backing_store() {
        let mut memory = Memory::default();
        memory.insert(key(9), value(9)).unwrap();

        let mut overlay = Overlay::new(&memory);
        let checkpoint = overlay.checkpoint();
        overlay.insert(key(1), value(1)).unwrap();
        overlay.delete(&key(9)).unwrap();
        overlay.commit(checkpoint).unwrap();
        let changes = overlay.into_changes();

        memory.apply(changes).unwrap();
        assert_eq!(memory.get(&key(1)).unwrap(), Some(value(1)));
        assert_eq!(memory.get(&key(9)).unwrap(), None);
    }

    #[test]
    fn missing_accounts_default_to_empty() {
        let memory = Memory::default();
        let address = Address::from_public_key(b"nobody");
        assert_eq!(balance(&memory, &address).unwrap(), 0);
        assert_eq!(nonce(&memory, &address).unwrap(), 0);
    }
}
