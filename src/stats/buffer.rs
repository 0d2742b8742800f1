//! Shared counter buffers and their snapshot-or-live views.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

/// Fixed-length array of `u64` slots shared with the engine.
///
/// The engine writes, the application reads. Reads of an index past the end
/// return zero.
#[derive(Debug, Clone)]
pub struct SharedBuffer {
    slots: Arc<[AtomicU64]>,
}

impl SharedBuffer {
    /// Zeroed buffer of `len` slots.
    pub fn new(len: usize) -> Self {
        Self {
            slots: (0..len).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the buffer has no slots.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Read slot `index`.
    pub fn get(&self, index: usize) -> u64 {
        self.slots
            .get(index)
            .map_or(0, |slot| slot.load(Ordering::Relaxed))
    }

    /// Overwrite slot `index`.
    pub fn set(&self, index: usize, value: u64) {
        if let Some(slot) = self.slots.get(index) {
            slot.store(value, Ordering::Relaxed);
        }
    }

    /// Add `delta` to slot `index`.
    pub fn add(&self, index: usize, delta: u64) {
        if let Some(slot) = self.slots.get(index) {
            slot.fetch_add(delta, Ordering::Relaxed);
        }
    }

    /// Raise slot `index` to `value` if it is lower.
    pub fn max(&self, index: usize, value: u64) {
        if let Some(slot) = self.slots.get(index) {
            slot.fetch_max(value, Ordering::Relaxed);
        }
    }

    /// Read slot `index` as a flag.
    pub fn flag(&self, index: usize) -> bool {
        self.get(index) != 0
    }

    /// Write slot `index` as a flag.
    pub fn set_flag(&self, index: usize, on: bool) {
        self.set(index, u64::from(on));
    }

    fn copy_out(&self) -> Box<[u64]> {
        self.slots
            .iter()
            .map(|slot| slot.load(Ordering::Relaxed))
            .collect()
    }
}

#[derive(Debug)]
enum Backing {
    Live(SharedBuffer),
    Snapshot(Box<[u64]>),
}

/// View over a [`SharedBuffer`] that can be frozen into a private copy.
///
/// While live, reads observe the engine's current values. After
/// [`snapshot`](Self::snapshot) the view reads its own copy forever and no
/// longer touches the shared buffer.
#[derive(Debug)]
pub struct BufferView {
    backing: RwLock<Backing>,
}

impl BufferView {
    pub(crate) fn live(buffer: SharedBuffer) -> Self {
        Self {
            backing: RwLock::new(Backing::Live(buffer)),
        }
    }

    /// Read slot `index`.
    pub fn get(&self, index: usize) -> u64 {
        match &*self.backing.read() {
            Backing::Live(buffer) => buffer.get(index),
            Backing::Snapshot(values) => values.get(index).copied().unwrap_or(0),
        }
    }

    /// Read slot `index` as a flag.
    pub fn flag(&self, index: usize) -> bool {
        self.get(index) != 0
    }

    /// Write slot `index`. Used for the few application-owned slots
    /// (listener presence, stream wants). A no-op once snapshotted.
    pub(crate) fn set(&self, index: usize, value: u64) {
        if let Backing::Live(buffer) = &*self.backing.read() {
            buffer.set(index, value);
        }
    }

    pub(crate) fn set_flag(&self, index: usize, on: bool) {
        self.set(index, u64::from(on));
    }

    /// Freeze the view. Returns `false` if it was already frozen.
    pub(crate) fn snapshot(&self) -> bool {
        let mut backing = self.backing.write();
        let values = match &*backing {
            Backing::Live(buffer) => buffer.copy_out(),
            Backing::Snapshot(_) => return false,
        };
        *backing = Backing::Snapshot(values);
        true
    }

    /// Whether the view reads a private copy.
    pub fn is_snapshot(&self) -> bool {
        matches!(&*self.backing.read(), Backing::Snapshot(_))
    }

    /// All slots in layout order.
    pub fn values(&self) -> Vec<u64> {
        match &*self.backing.read() {
            Backing::Live(buffer) => buffer.copy_out().into_vec(),
            Backing::Snapshot(values) => values.to_vec(),
        }
    }

    /// Little-endian bytes of all slots.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.values()
            .into_iter()
            .flat_map(u64::to_le_bytes)
            .collect()
    }
}
