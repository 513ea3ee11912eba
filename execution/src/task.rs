//! Per-transaction bookkeeping: the reentrancy stack of active frames and the
//! event and debug-log journals.
//!
//! Frames live in an arena indexed by stack position. A frame either owns the
//! in-memory instance of its contract or refers to the frame that does, so a
//! contract re-entered while already active keeps operating on one live
//! instance. Field writes are journaled so a failed call can undo the writes
//! it made to instances owned further down the stack.

use crate::loader::LoadedContract;
use commonware_cryptography::sha256::Digest;
use std::sync::Arc;
use stratum_types::{Address, EventLog, Fields, TypedValue};

#[derive(Clone, Debug, PartialEq, Eq)]
enum Instance {
    Owned { fields: Fields, dirty: bool },
    Shared(usize),
}

/// A contract activation on the reentrancy stack.
#[derive(Debug)]
pub struct ActiveFrame {
    address: Address,
    contract: Arc<LoadedContract>,
    instance: Instance,
    readonly: bool,
    serial: u64,
}

impl ActiveFrame {
    /// A frame holding a fresh in-memory instance built from `fields`.
    pub fn owned(
        address: Address,
        contract: Arc<LoadedContract>,
        fields: Fields,
        readonly: bool,
    ) -> Self {
        Self {
            address,
            contract,
            instance: Instance::Owned {
                fields,
                dirty: false,
            },
            readonly,
            serial: 0,
        }
    }

    /// A re-entrant frame operating on the instance held by frame `owner`.
    pub fn shared(
        address: Address,
        contract: Arc<LoadedContract>,
        owner: usize,
        readonly: bool,
    ) -> Self {
        Self {
            address,
            contract,
            instance: Instance::Shared(owner),
            readonly,
            serial: 0,
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn contract(&self) -> &Arc<LoadedContract> {
        &self.contract
    }

    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    pub fn is_owner(&self) -> bool {
        matches!(self.instance, Instance::Owned { .. })
    }
}

/// Live state shared with a re-entrant call.
#[derive(Clone, Debug)]
pub struct SharedState {
    /// Stack position of the frame owning the instance.
    pub owner: usize,
    pub contract: Arc<LoadedContract>,
}

/// Undo record for one field write. `serial` identifies the owning frame so
/// records are never replayed onto a later frame reusing the same slot.
#[derive(Clone, Debug)]
struct FieldWrite {
    owner: usize,
    serial: u64,
    name: String,
    previous: Option<TypedValue>,
    was_dirty: bool,
}

#[derive(Debug, Default)]
pub struct ReentrantStack {
    frames: Vec<ActiveFrame>,
    journal: Vec<FieldWrite>,
    pushed: u64,
}

impl ReentrantStack {
    /// Find the live instance of `address`, if it is already active.
    ///
    /// Only the top-most frame for the address is considered.
    pub fn try_share_state(&self, address: &Address) -> Option<SharedState> {
        let (index, frame) = self
            .frames
            .iter()
            .enumerate()
            .rev()
            .find(|(_, frame)| frame.address == *address)?;
        let owner = match frame.instance {
            Instance::Owned { .. } => index,
            Instance::Shared(owner) => owner,
        };
        Some(SharedState {
            owner,
            contract: frame.contract.clone(),
        })
    }

    /// Push `frame`, returning its stack position.
    pub fn push(&mut self, mut frame: ActiveFrame) -> usize {
        self.pushed += 1;
        frame.serial = self.pushed;
        self.frames.push(frame);
        self.frames.len() - 1
    }

    pub fn pop(&mut self) -> Option<ActiveFrame> {
        let frame = self.frames.pop();
        if self.frames.is_empty() {
            self.journal.clear();
        }
        frame
    }

    /// Pop frames until `depth` remain, returning how many were removed.
    pub fn unwind_to(&mut self, depth: usize) -> usize {
        let removed = self.frames.len().saturating_sub(depth);
        self.frames.truncate(depth);
        if self.frames.is_empty() {
            self.journal.clear();
        }
        removed
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn frame(&self, index: usize) -> Option<&ActiveFrame> {
        self.frames.get(index)
    }

    fn owner(&self, index: usize) -> Option<usize> {
        match self.frames.get(index)?.instance {
            Instance::Owned { .. } => Some(index),
            Instance::Shared(owner) => Some(owner),
        }
    }

    /// Instance fields visible to frame `index`.
    pub fn fields(&self, index: usize) -> Option<&Fields> {
        let owner = self.owner(index)?;
        match &self.frames.get(owner)?.instance {
            Instance::Owned { fields, .. } => Some(fields),
            Instance::Shared(_) => None,
        }
    }

    /// Write field `name` of the instance visible to frame `index` and mark
    /// it dirty. Returns `None` if there is no such frame.
    pub fn set_field(&mut self, index: usize, name: &str, value: TypedValue) -> Option<()> {
        let owner = self.owner(index)?;
        let frame = self.frames.get_mut(owner)?;
        let Instance::Owned { fields, dirty } = &mut frame.instance else {
            return None;
        };
        let previous = fields.insert(name.to_string(), value);
        self.journal.push(FieldWrite {
            owner,
            serial: frame.serial,
            name: name.to_string(),
            previous,
            was_dirty: *dirty,
        });
        *dirty = true;
        Some(())
    }

    /// Position in the field journal, for a later [ReentrantStack::revert_fields].
    pub fn field_mark(&self) -> usize {
        self.journal.len()
    }

    /// Undo field writes made since `mark` on instances that are still live.
    pub fn revert_fields(&mut self, mark: usize) {
        let mark = mark.min(self.journal.len());
        for write in self.journal.drain(mark..).rev() {
            let Some(frame) = self.frames.get_mut(write.owner) else {
                continue;
            };
            if frame.serial != write.serial {
                continue;
            }
            if let Instance::Owned { fields, dirty } = &mut frame.instance {
                match write.previous {
                    Some(previous) => fields.insert(write.name, previous),
                    None => fields.remove(&write.name),
                };
                *dirty = write.was_dirty;
            }
        }
    }

    /// Fields of frame `index` if it owns a modified instance.
    pub fn dirty_fields(&self, index: usize) -> Option<&Fields> {
        match &self.frames.get(index)?.instance {
            Instance::Owned { fields, dirty: true } => Some(fields),
            _ => None,
        }
    }
}

/// State of one top-level transaction and every call nested under it.
#[derive(Debug)]
pub struct TransactionTask {
    origin: Address,
    digest: Digest,
    stack: ReentrantStack,
    events: Vec<EventLog>,
    logs: Vec<String>,
}

impl TransactionTask {
    pub fn new(origin: Address, digest: Digest) -> Self {
        Self {
            origin,
            digest,
            stack: ReentrantStack::default(),
            events: Vec::new(),
            logs: Vec::new(),
        }
    }

    pub fn origin(&self) -> Address {
        self.origin
    }

    pub fn digest(&self) -> &Digest {
        &self.digest
    }

    pub fn stack(&self) -> &ReentrantStack {
        &self.stack
    }

    pub fn stack_mut(&mut self) -> &mut ReentrantStack {
        &mut self.stack
    }

    pub fn emit(&mut self, event: EventLog) {
        self.events.push(event);
    }

    pub fn events_len(&self) -> usize {
        self.events.len()
    }

    /// Drop events emitted after the first `len`.
    pub fn truncate_events(&mut self, len: usize) {
        self.events.truncate(len);
    }

    pub fn log(&mut self, line: String) {
        self.logs.push(line);
    }

    /// Consume the task, returning its events and debug logs.
    pub fn finish(self) -> (Vec<EventLog>, Vec<String>) {
        (self.events, self.logs)
    }
}
