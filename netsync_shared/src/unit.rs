//! Change-log units: per-object delta replication.
//!
//! The authoritative side records every mutation of an object as a tagged
//! operation and a step number. First contact ships a [`ChangeLog::snapshot`];
//! afterwards only the unflushed range goes out as a delta. Replicas buffer
//! ranges that arrive ahead of their step counter and release them in order,
//! and ask for a fresh snapshot when a gap is too wide to wait out.
//!
//! Wire layouts:
//! - snapshot: `[steps:u32][full state]`
//! - delta: `[marker:u32][count:i32]{[tag:u8][args]}`

use std::{
    any::Any,
    collections::{BTreeMap, VecDeque},
};

use thiserror::Error;
use tracing::{debug, trace};

use crate::{
    identity::ObjectId,
    wire::{Reader, WireError, Writer},
};

/// How far ahead of the step counter a buffered step may sit before the gap
/// counts as lost.
pub const DEFAULT_REORDER_WINDOW: u32 = 4;

/// Buffered steps kept per unit; the oldest go first.
pub const MAX_PENDING: usize = 1024;

/// One kind of state change, with its arguments.
///
/// Implementations are plain enums; `read` is the decode table keyed by tag.
pub trait Operation: Send + Sized + 'static {
    fn tag(&self) -> u8;
    fn write_args(&self, w: &mut Writer);
    fn read(tag: u8, r: &mut Reader<'_>) -> Result<Self, WireError>;
}

/// State that can be replicated through a change log.
pub trait Replicated: Send + 'static {
    type Op: Operation;

    fn write_full(&self, w: &mut Writer);
    fn read_full(&mut self, r: &mut Reader<'_>) -> Result<(), WireError>;
    fn apply(&mut self, op: &Self::Op);
}

/// Misuse of a unit by local code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnitError {
    #[error("object {0} is read-only on a replica")]
    ReadOnly(ObjectId),
}

/// Result of ingesting a delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ingest {
    /// This many steps were applied.
    Applied(u32),
    /// Steps were buffered, nothing applied yet.
    Buffered,
    /// Every step in the range was already applied.
    Stale,
    /// The gap is unrecoverable; a snapshot lookup must be sent.
    ResyncRequested,
}

/// A replicated object together with its change log.
pub struct ChangeLog<T: Replicated> {
    id: ObjectId,
    state: T,
    steps: u32,
    marker: u32,
    reconfiguring: bool,
    authoritative: bool,
    reorder_window: u32,
    changes: VecDeque<T::Op>,
    pending: BTreeMap<u32, T::Op>,
}

impl<T: Replicated> ChangeLog<T> {
    /// Authoritative units start valid; replicas start reconfiguring and stay
    /// there until the first snapshot applies.
    pub fn new(id: ObjectId, state: T, authoritative: bool) -> Self {
        Self {
            id,
            state,
            steps: 0,
            marker: 0,
            reconfiguring: !authoritative,
            authoritative,
            reorder_window: DEFAULT_REORDER_WINDOW,
            changes: VecDeque::new(),
            pending: BTreeMap::new(),
        }
    }

    pub fn with_reorder_window(mut self, window: u32) -> Self {
        self.reorder_window = window;
        self
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn state(&self) -> &T {
        &self.state
    }

    pub fn steps(&self) -> u32 {
        self.steps
    }

    pub fn marker(&self) -> u32 {
        self.marker
    }

    pub fn is_reconfiguring(&self) -> bool {
        self.reconfiguring
    }

    pub fn is_authoritative(&self) -> bool {
        self.authoritative
    }

    /// Whether unflushed changes are queued.
    pub fn is_changed(&self) -> bool {
        !self.changes.is_empty()
    }

    pub fn queued(&self) -> usize {
        self.changes.len()
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Appends a change to the log. Only the authoritative side keeps a log.
    ///
    /// A replacing change (`additive == false`) supersedes everything not yet
    /// flushed: the queue is cleared and the counter rewound to the marker
    /// before the entry is appended.
    pub fn record_change(&mut self, additive: bool, op: T::Op) {
        if !self.authoritative {
            return;
        }
        if !additive {
            self.changes.clear();
            self.steps = self.marker;
        }
        self.changes.push_back(op);
        self.steps += 1;
    }

    /// Applies `op` locally and records it.
    pub fn mutate(&mut self, additive: bool, op: T::Op) -> Result<(), UnitError> {
        if !self.authoritative {
            return Err(UnitError::ReadOnly(self.id));
        }
        self.state.apply(&op);
        self.record_change(additive, op);
        Ok(())
    }

    /// Full state for a peer seeing this object for the first time.
    pub fn snapshot(&self, w: &mut Writer) {
        trace!(object = %self.id, steps = self.steps, "cloning");
        w.write_u32(self.steps);
        self.state.write_full(w);
    }

    /// Replaces local state with a snapshot and leaves reconfiguring.
    ///
    /// A settled unit ignores a snapshot older than its own step counter, e.g.
    /// the answer to a repeated lookup.
    pub fn apply_full(&mut self, r: &mut Reader<'_>) -> Result<(), WireError> {
        let steps = r.read_u32()?;
        if !self.reconfiguring && steps < self.steps {
            trace!(object = %self.id, steps, current = self.steps, "stale snapshot ignored");
            return Ok(());
        }
        self.state.read_full(r)?;
        self.steps = steps;
        trace!(object = %self.id, steps, "applied snapshot");

        // Everything below `steps` is already part of the snapshot.
        self.pending = self.pending.split_off(&steps);
        self.release();
        self.reconfiguring = false;
        Ok(())
    }

    /// Drains the queue into `w`. Returns whether anything was written.
    ///
    /// Without listeners the queue is discarded. Either way the marker moves
    /// up to the step counter; changes are never retried.
    pub fn flush_delta(&mut self, w: &mut Writer, listeners: bool) -> bool {
        let written = if listeners {
            trace!(
                object = %self.id,
                from = self.marker,
                count = self.changes.len(),
                "copying steps"
            );
            w.write_u32(self.marker);
            w.write_i32(self.changes.len() as i32);
            for op in self.changes.drain(..) {
                w.write_u8(op.tag());
                op.write_args(w);
            }
            true
        } else {
            self.changes.clear();
            false
        };
        self.marker = self.steps;
        written
    }

    /// Buffers a delta and releases whatever became contiguous.
    pub fn ingest_delta(&mut self, r: &mut Reader<'_>) -> Result<Ingest, WireError> {
        let marker = r.read_u32()?;
        let count = r.read_i32()?;
        if count < 0 {
            return Err(WireError::NegativeLength(count));
        }
        if count > 0 && marker.checked_add(count as u32 - 1).is_none() {
            return Err(WireError::StepOverflow { marker, count });
        }

        // Decode the whole range first so a malformed payload leaves no trace.
        let mut ops = Vec::with_capacity((count as usize).min(64));
        for _ in 0..count {
            let tag = r.read_u8()?;
            ops.push(T::Op::read(tag, r)?);
        }

        let mut inserted = 0;
        for (offset, op) in ops.into_iter().enumerate() {
            let key = marker + offset as u32;
            if key < self.steps {
                continue;
            }
            trace!(object = %self.id, step = key, "pending");
            self.pending.insert(key, op);
            inserted += 1;
        }

        if inserted == 0 {
            return Ok(Ingest::Stale);
        }
        while self.pending.len() > MAX_PENDING {
            self.pending.pop_first();
        }
        if self.reconfiguring {
            return Ok(Ingest::Buffered);
        }

        // The hole below the buffered steps is lost once a step more than the
        // window past it has arrived.
        let applied = self.release();
        if let Some(&highest) = self.pending.keys().next_back() {
            if highest - self.steps > self.reorder_window {
                debug!(object = %self.id, steps = self.steps, highest, "gap too wide, resyncing");
                self.reconfiguring = true;
                return Ok(Ingest::ResyncRequested);
            }
        }

        Ok(if applied > 0 {
            Ingest::Applied(applied)
        } else {
            Ingest::Buffered
        })
    }

    /// Drops everything received or queued and waits for a new snapshot.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.changes.clear();
        self.marker = self.steps;
        self.reconfiguring = !self.authoritative;
    }

    fn release(&mut self) -> u32 {
        let mut released = 0;
        while let Some(op) = self.pending.remove(&self.steps) {
            trace!(object = %self.id, step = self.steps, "releasing");
            self.state.apply(&op);
            self.steps += 1;
            released += 1;
        }
        released
    }
}

/// Type-erased view of a [`ChangeLog`] held by the registry.
pub trait Unit: Send {
    fn id(&self) -> ObjectId;
    fn is_changed(&self) -> bool;
    fn is_reconfiguring(&self) -> bool;
    fn snapshot(&self, w: &mut Writer);
    fn apply_full(&mut self, r: &mut Reader<'_>) -> Result<(), WireError>;
    fn flush_delta(&mut self, w: &mut Writer, listeners: bool) -> bool;
    fn ingest_delta(&mut self, r: &mut Reader<'_>) -> Result<Ingest, WireError>;
    fn reset(&mut self);
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Replicated> Unit for ChangeLog<T> {
    fn id(&self) -> ObjectId {
        self.id
    }

    fn is_changed(&self) -> bool {
        ChangeLog::is_changed(self)
    }

    fn is_reconfiguring(&self) -> bool {
        self.reconfiguring
    }

    fn snapshot(&self, w: &mut Writer) {
        ChangeLog::snapshot(self, w)
    }

    fn apply_full(&mut self, r: &mut Reader<'_>) -> Result<(), WireError> {
        ChangeLog::apply_full(self, r)
    }

    fn flush_delta(&mut self, w: &mut Writer, listeners: bool) -> bool {
        ChangeLog::flush_delta(self, w, listeners)
    }

    fn ingest_delta(&mut self, r: &mut Reader<'_>) -> Result<Ingest, WireError> {
        ChangeLog::ingest_delta(self, r)
    }

    fn reset(&mut self) {
        ChangeLog::reset(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
