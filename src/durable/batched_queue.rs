//! Storage core shared by the durable queues.
//!
//! The backlog is a chain of batches: the front batch is drained by dequeue,
//! the back batch is filled by enqueue and everything in between is sealed.
//! Only sealed batches are ever offloaded; the newest sealed batch stays
//! resident so a burst that is drained right away never touches the disk.
//!
//! Nothing here blocks. When the front batch is not resident a restore is
//! requested and the caller gets nothing for this cycle.

use std::collections::VecDeque;
use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::error;
use tracing::trace;

use super::Batch;
use super::BatchPayload;
use super::BatchPersistor;
use super::BatchState;
use crate::BatchId;

/// Queue-file form of one batch. `entries` is absent for batches that are
/// offloaded to their own batch file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub(crate) struct StoredBatch<T> {
    pub(crate) batch_id: BatchId,
    pub(crate) len: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) entries: Option<Vec<T>>,
}

/// Queue-file form of a batched queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct StoredBacklog<T> {
    pub(crate) batches: Vec<StoredBatch<T>>,
    #[serde(default)]
    pub(crate) pending_discards: usize,
}

enum Front<T> {
    Item(T),
    NotResident,
    Empty,
}

pub(crate) struct BatchedQueue<T: BatchPayload> {
    monitored_item_id: u32,
    batch_size: usize,
    persistor: Arc<dyn BatchPersistor>,
    batches: VecDeque<Arc<Batch<T>>>,
    /// Entries in the queue, excluding pending discards
    items: usize,
    /// Entries evicted while the front batch was offloaded; removed from the
    /// front once it is resident again
    pending_discards: usize,
}

impl<T: BatchPayload> std::fmt::Debug for BatchedQueue<T> {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("BatchedQueue")
            .field("monitored_item_id", &self.monitored_item_id)
            .field("batch_size", &self.batch_size)
            .field("batches", &self.batches.len())
            .field("items", &self.items)
            .field("pending_discards", &self.pending_discards)
            .finish_non_exhaustive()
    }
}

impl<T: BatchPayload> BatchedQueue<T> {
    pub(crate) fn new(
        monitored_item_id: u32,
        batch_size: usize,
        persistor: Arc<dyn BatchPersistor>,
    ) -> Self {
        Self {
            monitored_item_id,
            batch_size: batch_size.max(2),
            persistor,
            batches: VecDeque::new(),
            items: 0,
            pending_discards: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.items
    }

    #[cfg(test)]
    pub(crate) fn batch_count(&self) -> usize {
        self.batches.len()
    }

    pub(crate) fn push(
        &mut self,
        item: T,
    ) {
        let tail_full = self.batches.back().map_or(true, |tail| tail.len() >= self.batch_size);
        if tail_full {
            self.batches.push_back(Arc::new(Batch::new(self.monitored_item_id)));
            self.offload_sealed();
        }

        if let Some(tail) = self.batches.back() {
            tail.push_back(item);
            self.items += 1;
        }
    }

    pub(crate) fn pop(&mut self) -> Option<T> {
        match self.take_front() {
            Front::Item(item) => Some(item),
            Front::NotResident => {
                trace!(
                    monitored_item_id = self.monitored_item_id,
                    "Front batch not resident, nothing to dequeue this cycle"
                );
                None
            }
            Front::Empty => None,
        }
    }

    /// Removes the oldest entry, deferring the removal if it is offloaded.
    ///
    /// Returns false if the queue is empty.
    pub(crate) fn discard_oldest(&mut self) -> bool {
        if self.items == 0 {
            return false;
        }
        match self.take_front() {
            Front::Item(_) => true,
            Front::NotResident => {
                self.pending_discards += 1;
                self.items -= 1;
                true
            }
            Front::Empty => false,
        }
    }

    /// Removes the newest entry; false if there is none or it is offloaded
    pub(crate) fn discard_newest(&mut self) -> bool {
        while self.items > 0 {
            let Some(tail) = self.batches.back().cloned() else {
                return false;
            };
            if !tail.is_resident() {
                return false;
            }
            if tail.pop_back().is_some() {
                self.items -= 1;
                if tail.is_empty() && self.batches.len() > 1 {
                    self.batches.pop_back();
                }
                return true;
            }
            if self.batches.len() == 1 {
                return false;
            }
            self.batches.pop_back();
        }
        false
    }

    /// True while a batch is being read back from its file
    pub(crate) fn is_restoring(&self) -> bool {
        self.batches
            .iter()
            .any(|batch| batch.state() == BatchState::Restoring)
    }

    /// Reads the oldest entry if it is resident
    pub(crate) fn front<R>(
        &self,
        f: impl FnOnce(&T) -> R,
    ) -> Option<R> {
        let mut skip = self.pending_discards;
        for batch in &self.batches {
            let len = batch.len();
            if skip >= len {
                skip -= len;
                continue;
            }
            if !batch.is_resident() {
                return None;
            }
            return batch.with_entries(|entries| entries.get(skip).map(f));
        }
        None
    }

    /// Mutates the oldest entry; false if there is none or it is offloaded
    pub(crate) fn update_front(
        &mut self,
        f: impl FnOnce(&mut T),
    ) -> bool {
        if !self.settle_front() {
            return false;
        }
        match self.batches.front() {
            Some(head) => head.with_entries_mut(|entries| entries.front_mut().map(f).is_some()),
            None => false,
        }
    }

    /// Reads the newest entry if it is resident
    pub(crate) fn back<R>(
        &self,
        f: impl FnOnce(&T) -> R,
    ) -> Option<R> {
        if self.items == 0 {
            return None;
        }
        let tail = self.batches.back()?;
        if !tail.is_resident() {
            return None;
        }
        tail.with_entries(|entries| entries.back().map(f))
    }

    /// Mutates the newest entry.
    ///
    /// Returns `None` if the queue is empty and `Some(false)` if the newest
    /// entry is offloaded.
    pub(crate) fn update_back(
        &mut self,
        f: impl FnOnce(&mut T),
    ) -> Option<bool> {
        if self.items == 0 {
            return None;
        }
        let tail = self.batches.back()?;
        if !tail.is_resident() {
            return Some(false);
        }
        Some(tail.with_entries_mut(|entries| entries.back_mut().map(f).is_some()))
    }

    /// Checks the `limit` newest resident entries against `matches`
    pub(crate) fn any_recent(
        &self,
        matches: &dyn Fn(&T) -> bool,
        limit: usize,
    ) -> bool {
        let mut remaining = limit.min(self.items);
        for batch in self.batches.iter().rev() {
            if remaining == 0 || !batch.is_resident() {
                break;
            }
            let found = batch.with_entries(|entries| {
                let scanned = remaining.min(entries.len());
                let found = entries.iter().rev().take(scanned).any(|entry| matches(entry));
                remaining -= scanned;
                found
            });
            if found {
                return true;
            }
        }
        false
    }

    /// Drops all entries and the files of offloaded batches
    pub(crate) fn clear(&mut self) {
        for batch in self.batches.drain(..) {
            match batch.state() {
                BatchState::Idle | BatchState::Restoring => {}
                // the cancelled persist task removes what it wrote
                BatchState::Persisting => self.persistor.request_batch_restore(batch),
                BatchState::Persisted | BatchState::RestoreFailed => {
                    self.persistor.delete_batch(self.monitored_item_id, batch.id())
                }
            }
        }
        self.items = 0;
        self.pending_discards = 0;
    }

    pub(crate) fn to_stored(&self) -> StoredBacklog<T> {
        let batches = self
            .batches
            .iter()
            .map(|batch| StoredBatch {
                batch_id: batch.id(),
                len: batch.len(),
                entries: batch.resident_entries(),
            })
            .collect();
        StoredBacklog {
            batches,
            pending_discards: self.pending_discards,
        }
    }

    /// Rebuilds a queue; offloaded batches are restored on demand
    pub(crate) fn from_stored(
        monitored_item_id: u32,
        batch_size: usize,
        persistor: Arc<dyn BatchPersistor>,
        stored: StoredBacklog<T>,
    ) -> Self {
        let mut queue = Self::new(monitored_item_id, batch_size, persistor);
        let mut total = 0;
        for stored_batch in stored.batches {
            let batch = match stored_batch.entries {
                Some(entries) => Batch::resident(monitored_item_id, stored_batch.batch_id, entries),
                None => Batch::offloaded(monitored_item_id, stored_batch.batch_id, stored_batch.len),
            };
            total += batch.len();
            queue.batches.push_back(Arc::new(batch));
        }
        queue.pending_discards = stored.pending_discards.min(total);
        queue.items = total - queue.pending_discards;
        queue.request_front_restore();
        queue
    }

    fn take_front(&mut self) -> Front<T> {
        if !self.settle_front() {
            return Front::NotResident;
        }
        let Some(head) = self.batches.front().cloned() else {
            return Front::Empty;
        };
        let Some(item) = head.pop_front() else {
            return Front::Empty;
        };
        self.items -= 1;

        if head.is_empty() && self.batches.len() > 1 {
            self.batches.pop_front();
            self.request_front_restore();
        }
        self.prefetch_next();
        Front::Item(item)
    }

    /// Makes the front batch usable: drops failed batches, applies pending
    /// discards and skips exhausted batches. False if the front is offloaded.
    fn settle_front(&mut self) -> bool {
        loop {
            let Some(head) = self.batches.front().cloned() else {
                return true;
            };

            if head.state() == BatchState::RestoreFailed {
                self.drop_failed_front(&head);
                continue;
            }

            if !head.is_resident() {
                self.persistor.request_batch_restore(head.clone());
                if !head.is_resident() {
                    return false;
                }
            }

            if self.pending_discards > 0 {
                self.pending_discards -= head.discard_front(self.pending_discards);
            }

            if head.is_empty() && self.batches.len() > 1 {
                self.batches.pop_front();
                self.request_front_restore();
                continue;
            }
            return true;
        }
    }

    fn drop_failed_front(
        &mut self,
        head: &Arc<Batch<T>>,
    ) {
        let len = head.len();
        let already_discarded = self.pending_discards.min(len);
        self.pending_discards -= already_discarded;
        let lost = len - already_discarded;
        self.items -= lost;
        self.batches.pop_front();
        if self.batches.is_empty() {
            self.pending_discards = 0;
        }

        error!(
            monitored_item_id = self.monitored_item_id,
            batch_id = %head.id(),
            lost,
            "Dropping batch that failed to restore"
        );
        self.request_front_restore();
    }

    /// Asks for the new front batch as soon as it becomes the front
    fn request_front_restore(&self) {
        if let Some(head) = self.batches.front() {
            if matches!(head.state(), BatchState::Persisted | BatchState::Persisting) {
                self.persistor.request_batch_restore(head.clone());
            }
        }
    }

    /// Restores the next sealed batch once the front is half drained
    fn prefetch_next(&self) {
        let (Some(head), Some(next)) = (self.batches.front(), self.batches.get(1)) else {
            return;
        };
        if head.len() <= self.batch_size / 2 && next.state() == BatchState::Persisted {
            trace!(
                monitored_item_id = self.monitored_item_id,
                batch_id = %next.id(),
                "Prefetching next batch"
            );
            self.persistor.request_batch_restore(next.clone());
        }
    }

    /// Offloads the second newest sealed batch once a new batch was started
    fn offload_sealed(&self) {
        // front, sealed..., back: the sealed batch before the newest sealed one
        let count = self.batches.len();
        if count < 4 {
            return;
        }
        let candidate = &self.batches[count - 3];
        debug!(
            monitored_item_id = self.monitored_item_id,
            batch_id = %candidate.id(),
            len = candidate.len(),
            "Offloading sealed batch"
        );
        self.persistor.request_batch_persist(candidate.clone());
    }
}
