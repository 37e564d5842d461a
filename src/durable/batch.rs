//! Persistable batches of queued notifications.
//!
//! A batch owns a slice of a durable queue's backlog together with a small
//! state machine:
//!
//! ```text
//!            request_batch_persist          write committed
//!   Idle ─────────────────────────▶ Persisting ──────────────▶ Persisted
//!    ▲                                  │                          │
//!    │      cancelled / write failed    │                          │ request_batch_restore
//!    ├──────────────────────────────────┘                          ▼
//!    │                 entries installed                       Restoring
//!    └─────────────────────────────────────────────────────────────┤
//!                                                                  │ read/decode failed
//!                                                                  ▼
//!                                                            RestoreFailed
//! ```
//!
//! Transitions are serialized by a lock owned by the batch; the lock also
//! holds the cancellation token of an in-flight persist. File I/O always
//! happens outside of it.

use std::collections::VecDeque;
use std::sync::atomic::AtomicU8;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use parking_lot::Mutex;
use parking_lot::MutexGuard;
use serde::Deserialize;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::DataChangeEntry;
use crate::EventFieldList;
use crate::Result;
use crate::StorageError;

/// Stable identity of a batch, unique across monitored items
pub type BatchId = Uuid;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    /// Entries are resident in memory
    Idle = 0,
    /// A background task is writing the entries; they are still resident
    Persisting = 1,
    /// Only the file on disk holds the entries
    Persisted = 2,
    /// A background task is loading the entries back
    Restoring = 3,
    /// The file could not be restored; terminal
    RestoreFailed = 4,
}

impl BatchState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => BatchState::Idle,
            1 => BatchState::Persisting,
            2 => BatchState::Persisted,
            3 => BatchState::Restoring,
            _ => BatchState::RestoreFailed,
        }
    }
}

/// Identity and transition state shared by every batch payload type
#[derive(Debug)]
pub struct BatchControl {
    id: BatchId,
    monitored_item_id: u32,
    state: AtomicU8,
    /// Transition lock; holds the token of the persist in flight
    transition: Mutex<Option<CancellationToken>>,
}

impl BatchControl {
    fn new(
        monitored_item_id: u32,
        id: BatchId,
        state: BatchState,
    ) -> Self {
        Self {
            id,
            monitored_item_id,
            state: AtomicU8::new(state as u8),
            transition: Mutex::new(None),
        }
    }

    pub fn id(&self) -> BatchId {
        self.id
    }

    pub fn monitored_item_id(&self) -> u32 {
        self.monitored_item_id
    }

    pub fn state(&self) -> BatchState {
        BatchState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// True if the entries in memory are authoritative and may be mutated.
    ///
    /// A batch whose persist was cancelled counts as resident: the persist
    /// task will not release its entries anymore.
    pub fn is_resident(&self) -> bool {
        let token = self.transition.lock();
        match self.state() {
            BatchState::Idle => true,
            BatchState::Persisting => token.as_ref().is_some_and(|t| t.is_cancelled()),
            _ => false,
        }
    }

    /// Acquires the transition lock
    pub(crate) fn lock(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.transition.lock()
    }

    /// Must be called with the transition lock held
    pub(crate) fn set_state(
        &self,
        state: BatchState,
    ) {
        self.state.store(state as u8, Ordering::Release);
    }
}

/// Serialized entries of one batch, tagged with the notification kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "entries")]
pub enum BatchEntries {
    DataChange(Vec<DataChangeEntry>),
    Event(Vec<EventFieldList>),
}

impl BatchEntries {
    pub fn kind(&self) -> &'static str {
        match self {
            BatchEntries::DataChange(_) => DataChangeEntry::KIND,
            BatchEntries::Event(_) => EventFieldList::KIND,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            BatchEntries::DataChange(entries) => entries.len(),
            BatchEntries::Event(entries) => entries.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// On-disk content of a persisted batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchFile {
    pub monitored_item_id: u32,
    pub batch_id: BatchId,
    pub payload: BatchEntries,
}

/// Notification types a batch can hold
pub trait BatchPayload: Clone + Send + Sync + 'static {
    const KIND: &'static str;

    fn into_entries(items: Vec<Self>) -> BatchEntries;

    /// # Errors
    /// `QueueKindMismatch` if `entries` holds the other notification kind.
    fn from_entries(entries: BatchEntries) -> Result<Vec<Self>>;
}

impl BatchPayload for DataChangeEntry {
    const KIND: &'static str = "data change";

    fn into_entries(items: Vec<Self>) -> BatchEntries {
        BatchEntries::DataChange(items)
    }

    fn from_entries(entries: BatchEntries) -> Result<Vec<Self>> {
        match entries {
            BatchEntries::DataChange(items) => Ok(items),
            other => Err(StorageError::QueueKindMismatch {
                expected: Self::KIND,
                found: other.kind(),
            }
            .into()),
        }
    }
}

impl BatchPayload for EventFieldList {
    const KIND: &'static str = "event";

    fn into_entries(items: Vec<Self>) -> BatchEntries {
        BatchEntries::Event(items)
    }

    fn from_entries(entries: BatchEntries) -> Result<Vec<Self>> {
        match entries {
            BatchEntries::Event(items) => Ok(items),
            other => Err(StorageError::QueueKindMismatch {
                expected: Self::KIND,
                found: other.kind(),
            }
            .into()),
        }
    }
}

/// The view of a batch the persistor works with.
///
/// `release_entries` and `install_entries` are only called with the
/// transition lock held.
pub trait PersistableBatch: Send + Sync + 'static {
    fn control(&self) -> &BatchControl;

    /// Copies the resident entries into their on-disk form
    fn snapshot(&self) -> BatchFile;

    /// Drops the resident entries once a file holds them
    fn release_entries(&self);

    /// Makes restored entries resident again
    ///
    /// # Errors
    /// `QueueKindMismatch` if the payload holds the wrong notification kind.
    fn install_entries(
        &self,
        entries: BatchEntries,
    ) -> Result<()>;
}

/// A run of consecutive queue entries that can be offloaded as a unit
#[derive(Debug)]
pub struct Batch<T: BatchPayload> {
    control: BatchControl,
    entries: Mutex<VecDeque<T>>,
    /// Logical entry count, kept while the entries are offloaded
    len: AtomicUsize,
}

impl<T: BatchPayload> Batch<T> {
    pub fn new(monitored_item_id: u32) -> Self {
        Self::resident(monitored_item_id, Uuid::new_v4(), Vec::new())
    }

    /// Rebuilds a batch whose entries are known
    pub fn resident(
        monitored_item_id: u32,
        id: BatchId,
        entries: Vec<T>,
    ) -> Self {
        Self {
            control: BatchControl::new(monitored_item_id, id, BatchState::Idle),
            len: AtomicUsize::new(entries.len()),
            entries: Mutex::new(entries.into()),
        }
    }

    /// Rebuilds a batch whose `len` entries live in its batch file
    pub fn offloaded(
        monitored_item_id: u32,
        id: BatchId,
        len: usize,
    ) -> Self {
        Self {
            control: BatchControl::new(monitored_item_id, id, BatchState::Persisted),
            entries: Mutex::new(VecDeque::new()),
            len: AtomicUsize::new(len),
        }
    }

    pub fn id(&self) -> BatchId {
        self.control.id()
    }

    pub fn state(&self) -> BatchState {
        self.control.state()
    }

    pub fn is_resident(&self) -> bool {
        self.control.is_resident()
    }

    /// Number of entries, whether resident or offloaded
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies the resident entries
    pub fn entries(&self) -> Vec<T> {
        self.entries.lock().iter().cloned().collect()
    }

    /// Copies the entries if memory still holds them, which includes a batch
    /// whose persist is in flight
    pub fn resident_entries(&self) -> Option<Vec<T>> {
        let _token = self.control.lock();
        match self.control.state() {
            BatchState::Idle | BatchState::Persisting => Some(self.entries()),
            _ => None,
        }
    }

    pub(crate) fn push_back(
        &self,
        item: T,
    ) {
        self.with_entries_mut(|entries| entries.push_back(item));
    }

    pub(crate) fn pop_front(&self) -> Option<T> {
        self.with_entries_mut(|entries| entries.pop_front())
    }

    pub(crate) fn pop_back(&self) -> Option<T> {
        self.with_entries_mut(|entries| entries.pop_back())
    }

    /// Drops up to `count` entries from the front, returns how many were dropped
    pub(crate) fn discard_front(
        &self,
        count: usize,
    ) -> usize {
        self.with_entries_mut(|entries| {
            let discarded = count.min(entries.len());
            entries.drain(..discarded);
            discarded
        })
    }

    pub(crate) fn with_entries<R>(
        &self,
        f: impl FnOnce(&VecDeque<T>) -> R,
    ) -> R {
        f(&self.entries.lock())
    }

    pub(crate) fn with_entries_mut<R>(
        &self,
        f: impl FnOnce(&mut VecDeque<T>) -> R,
    ) -> R {
        let mut entries = self.entries.lock();
        let result = f(&mut entries);
        self.len.store(entries.len(), Ordering::Release);
        result
    }
}

impl<T: BatchPayload> PersistableBatch for Batch<T> {
    fn control(&self) -> &BatchControl {
        &self.control
    }

    fn snapshot(&self) -> BatchFile {
        BatchFile {
            monitored_item_id: self.control.monitored_item_id(),
            batch_id: self.control.id(),
            payload: T::into_entries(self.entries()),
        }
    }

    fn release_entries(&self) {
        let mut entries = self.entries.lock();
        entries.clear();
        entries.shrink_to_fit();
    }

    fn install_entries(
        &self,
        entries: BatchEntries,
    ) -> Result<()> {
        let items = T::from_entries(entries)?;
        let mut entries = self.entries.lock();
        self.len.store(items.len(), Ordering::Release);
        *entries = items.into();
        Ok(())
    }
}
