//! # Memtable — in-memory write buffer
//!
//! The mutable table at the top of the SiltKV LSM tree. Every put and remove
//! lands here first, is coalesced by key, and is periodically drained in
//! sorted key order into an immutable on-disk table.
//!
//! ## Design
//!
//! Values are kept in a hash set whose hash and equality look only at the key
//! embedded in each value. A put over an existing key overwrites it, a remove
//! replaces it with a tombstone, and a put following a remove replaces the
//! tombstone again, so the buffer holds exactly one value per distinct key.
//! Point updates stay O(1); ordering is paid once per flush, when
//! [`Memtable::sort_into_values_and_clear`] sorts the drained values into a
//! caller-owned scratch buffer. The flush already pays O(n) downstream, so an
//! O(n log n) sort there is cheaper than keeping a tree balanced on every put.
//!
//! The buffer is sized up front to `commit_count_max * BATCH_MULTIPLE` values
//! and never allocates after construction. That ceiling is checked against
//! the block layout of the on-disk table a flush writes into: a buffer that
//! can hold more values than the output table can absorb is rejected when
//! constructed, not discovered mid-flush.
//!
//! ## Example
//!
//! ```rust
//! use std::cmp::Ordering;
//! use memtable::Memtable;
//! use table::Table;
//!
//! #[derive(Clone, Copy, Default)]
//! struct Slot {
//!     key: u64,
//!     live: bool,
//!     value: u64,
//! }
//!
//! struct SlotTable;
//!
//! impl Table for SlotTable {
//!     type Key = u64;
//!     type Value = Slot;
//!
//!     const DATA_BLOCK_VALUE_COUNT_MAX: usize = 512;
//!     const DATA_BLOCK_COUNT_MAX: usize = 64;
//!
//!     fn key_of(value: &Slot) -> u64 {
//!         value.key
//!     }
//!
//!     fn compare(a: &u64, b: &u64) -> Ordering {
//!         a.cmp(b)
//!     }
//!
//!     fn tombstone(key: u64) -> Slot {
//!         Slot { key, live: false, value: 0 }
//!     }
//!
//!     fn is_tombstone(value: &Slot) -> bool {
//!         !value.live
//!     }
//! }
//!
//! let mut mem = Memtable::<SlotTable>::new(8).unwrap();
//! mem.put(Slot { key: 7, live: true, value: 42 });
//! mem.remove(3);
//! assert_eq!(mem.count(), 2);
//!
//! let mut scratch = vec![Slot::default(); mem.value_count_max()];
//! let sorted = mem.sort_into_values_and_clear(&mut scratch);
//! let keys: Vec<u64> = sorted.iter().map(SlotTable::key_of).collect();
//! assert_eq!(keys, vec![3, 7]);
//! assert!(mem.is_empty());
//! ```

use std::collections::{HashSet, TryReserveError};
use std::fmt;
use std::hash::{Hash, Hasher};

use table::Table;
use thiserror::Error;

/// How many commit batches may accumulate in the buffer before the host must
/// flush.
///
/// The buffer holds `commit_count_max * BATCH_MULTIPLE` values, so a flush
/// amortises its sort and block writes over several commits instead of
/// running after every one.
pub const BATCH_MULTIPLE: usize = 4;

/// Errors that can occur while constructing a [`Memtable`].
///
/// Steady-state operation never fails: once the buffer exists, puts and
/// removes within capacity are infallible, and every misuse of the contract
/// is a panic rather than an error.
#[derive(Debug, Error)]
pub enum MemtableError {
    /// The pre-sized hash container could not be allocated.
    #[error("memtable allocation failed: {0}")]
    Alloc(#[from] TryReserveError),
}

/// A stored value, hashed and compared by its embedded key alone.
///
/// This wrapper is what makes one hash set serve as the whole index: a live
/// value and a tombstone for the same key collide, so inserting either
/// replaces the other.
struct KeyedValue<T: Table>(T::Value);

impl<T: Table> PartialEq for KeyedValue<T> {
    fn eq(&self, other: &Self) -> bool {
        T::key_of(&self.0) == T::key_of(&other.0)
    }
}

impl<T: Table> Eq for KeyedValue<T> {}

impl<T: Table> Hash for KeyedValue<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        T::key_of(&self.0).hash(state);
    }
}

/// The in-memory write buffer for one LSM tree.
///
/// Holds at most `value_count_max = commit_count_max * BATCH_MULTIPLE`
/// values, one per distinct key, with deletions stored as tombstones built by
/// [`Table::tombstone`]. The host gates admission with
/// [`cannot_commit_batch`](Self::cannot_commit_batch) and drains the buffer
/// with [`sort_into_values_and_clear`](Self::sort_into_values_and_clear)
/// when a flush is due.
///
/// Single-threaded by construction: all mutators take `&mut self` and no
/// operation blocks or suspends.
pub struct Memtable<T: Table> {
    values: HashSet<KeyedValue<T>>,
    value_count_max: usize,
}

impl<T: Table> Memtable<T> {
    /// Creates an empty buffer sized for `commit_count_max` values per commit.
    ///
    /// The backing container is allocated here, once, with room for
    /// `commit_count_max * BATCH_MULTIPLE` values. No later operation
    /// allocates. The container's true capacity may round up past
    /// `value_count_max`; the population ceiling is enforced explicitly and
    /// the container's own capacity is never consulted.
    ///
    /// # Errors
    ///
    /// Returns [`MemtableError::Alloc`] if the backing container cannot be
    /// allocated. Nothing is retained on the error path.
    ///
    /// # Panics
    ///
    /// Panics if `commit_count_max` is zero, or if a full buffer could not be
    /// drained into the on-disk table described by `T` (that is, if
    /// `value_count_max` spans more than [`Table::DATA_BLOCK_COUNT_MAX`] data
    /// blocks of [`Table::DATA_BLOCK_VALUE_COUNT_MAX`] values each).
    pub fn new(commit_count_max: usize) -> Result<Self, MemtableError> {
        assert!(commit_count_max > 0, "commit_count_max must be > 0");

        let value_count_max = commit_count_max
            .checked_mul(BATCH_MULTIPLE)
            .expect("value_count_max overflows usize");

        // A full buffer must fit in the table a flush writes into.
        let data_block_count = value_count_max.div_ceil(T::DATA_BLOCK_VALUE_COUNT_MAX);
        assert!(
            data_block_count <= T::DATA_BLOCK_COUNT_MAX,
            "{} values span {} data blocks but the output table holds at most {}",
            value_count_max,
            data_block_count,
            T::DATA_BLOCK_COUNT_MAX
        );

        let mut values = HashSet::new();
        values.try_reserve(value_count_max)?;

        Ok(Self {
            values,
            value_count_max,
        })
    }

    /// Returns the hard ceiling on the number of buffered values.
    #[must_use]
    pub fn value_count_max(&self) -> usize {
        self.value_count_max
    }

    /// Returns the number of distinct keys currently buffered.
    ///
    /// Tombstones count like live values.
    #[must_use]
    pub fn count(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if no values are buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns a reference to the stored value for `key`, or `None`.
    ///
    /// The probe is built with [`Table::tombstone`] purely to satisfy the
    /// container's key-only equality; what comes back is the **stored**
    /// value, which may be live or itself a tombstone. Callers tell the two
    /// apart with [`Table::is_tombstone`].
    ///
    /// The reference stays valid until the next mutating call on this table.
    #[must_use]
    pub fn get(&self, key: T::Key) -> Option<&T::Value> {
        let probe = KeyedValue::<T>(T::tombstone(key));
        self.values.get(&probe).map(|stored| &stored.0)
    }

    /// Inserts `value`, replacing any stored value with the same key.
    ///
    /// The host is responsible for admission control: it checks
    /// [`cannot_commit_batch`](Self::cannot_commit_batch) before applying a
    /// commit, so an individual put never fails.
    ///
    /// # Panics
    ///
    /// Panics if the insert pushes the population past `value_count_max`.
    pub fn put(&mut self, value: T::Value) {
        self.values.replace(KeyedValue(value));
        assert!(
            self.values.len() <= self.value_count_max,
            "memtable overflow: the host must flush before committing"
        );
    }

    /// Records the deletion of `key` by storing a tombstone for it.
    ///
    /// Any stored value for `key`, live or tombstone, is replaced. The
    /// tombstone is drained like any other value; honouring it downstream is
    /// the consumer's job.
    ///
    /// # Panics
    ///
    /// Panics if the insert pushes the population past `value_count_max`.
    pub fn remove(&mut self, key: T::Key) {
        self.values.replace(KeyedValue(T::tombstone(key)));
        assert!(
            self.values.len() <= self.value_count_max,
            "memtable overflow: the host must flush before committing"
        );
    }

    /// Returns `true` when `batch_count` more values are not guaranteed to
    /// fit, in which case the host must flush before committing the batch.
    ///
    /// The check is conservative: a batch that coalesces into already-present
    /// keys would fit anyway, but admission assumes every value lands on a
    /// fresh key.
    ///
    /// # Panics
    ///
    /// Panics if `batch_count` exceeds `value_count_max`; such a batch could
    /// never fit, flushed or not.
    #[must_use]
    pub fn cannot_commit_batch(&self, batch_count: usize) -> bool {
        assert!(
            batch_count <= self.value_count_max,
            "batch larger than the buffer itself"
        );
        self.values.len() + batch_count > self.value_count_max
    }

    /// Empties the buffer, retaining its backing storage for reuse.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is already empty.
    pub fn clear(&mut self) {
        assert!(!self.values.is_empty(), "clearing an empty memtable");
        self.values.clear();
    }

    /// Drains every stored value into `values`, sorts the occupied prefix in
    /// ascending key order under [`Table::compare`], clears the buffer, and
    /// returns the sorted prefix.
    ///
    /// `values` is scratch owned by the caller and must be exactly
    /// `value_count_max` long. The returned slice borrows from it: a host
    /// typically shares one scratch across every tree it owns, so each drain
    /// overwrites the previous result. The table keeps no reference to the
    /// scratch after returning.
    ///
    /// No two buffered values share a key, so the sort has no ties and an
    /// unstable sort is exact. Tombstones are emitted in key order,
    /// indistinguishable from live values except through
    /// [`Table::is_tombstone`].
    ///
    /// # Panics
    ///
    /// Panics if the buffer is empty or `values.len() != value_count_max`.
    pub fn sort_into_values_and_clear<'a>(
        &mut self,
        values: &'a mut [T::Value],
    ) -> &'a [T::Value] {
        assert!(!self.values.is_empty(), "draining an empty memtable");
        assert!(
            values.len() == self.value_count_max,
            "scratch must be exactly value_count_max long"
        );

        let count = self.values.len();
        for (slot, value) in values.iter_mut().zip(self.values.drain()) {
            *slot = value.0;
        }

        let sorted = &mut values[..count];
        sorted.sort_unstable_by(|a, b| T::compare(&T::key_of(a), &T::key_of(b)));
        sorted
    }
}

impl<T: Table> fmt::Debug for Memtable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memtable")
            .field("count", &self.values.len())
            .field("value_count_max", &self.value_count_max)
            .finish()
    }
}
