use tracing_test::traced_test;

use super::*;
use crate::test_utils::complete_persist;
use crate::test_utils::complete_restore;
use crate::test_utils::event;
use crate::test_utils::event_ids;
use crate::test_utils::fail_restore;
use crate::test_utils::Recorder;
use crate::EventFieldList;

fn filled_queue(
    recorder: &Recorder,
    count: u32,
) -> BatchedQueue<EventFieldList> {
    let mut queue = BatchedQueue::new(7, 2, recorder.persistor());
    for i in 1..=count {
        queue.push(event(i));
    }
    queue
}

fn pop_ids(
    queue: &mut BatchedQueue<EventFieldList>,
    count: usize,
) -> Vec<u32> {
    let popped: Vec<_> = (0..count).map_while(|_| queue.pop()).collect();
    event_ids(&popped)
}

#[test]
fn sealed_batches_are_offloaded_behind_the_newest_sealed_one() {
    let recorder = Recorder::default();

    let queue = filled_queue(&recorder, 6);
    assert_eq!(queue.batch_count(), 3);
    assert!(recorder.persists.lock().is_empty());

    let queue = filled_queue(&recorder, 9);
    assert_eq!(queue.batch_count(), 5);
    assert_eq!(queue.len(), 9);

    let offloaded: Vec<_> = recorder
        .persists
        .lock()
        .iter()
        .map(|batch| batch.snapshot().payload)
        .collect();
    assert_eq!(
        offloaded,
        vec![
            BatchEntries::Event(vec![event(3), event(4)]),
            BatchEntries::Event(vec![event(5), event(6)]),
        ]
    );
}

#[test]
fn batch_size_below_two_is_raised() {
    let recorder = Recorder::default();
    let mut queue = BatchedQueue::new(7, 0, recorder.persistor());

    queue.push(event(1));
    queue.push(event(2));

    assert_eq!(queue.batch_count(), 1);
}

#[test]
fn resident_batches_drain_in_order() {
    let recorder = Recorder::default();
    let mut queue = filled_queue(&recorder, 9);

    assert_eq!(pop_ids(&mut queue, 20), (1..=9).collect::<Vec<_>>());
    assert_eq!(queue.len(), 0);
    assert!(queue.pop().is_none());
    assert!(recorder.restores.lock().is_empty());
}

#[test]
fn offloaded_front_yields_nothing_until_restored() {
    let recorder = Recorder::default();
    let mut queue = filled_queue(&recorder, 9);
    let second = recorder.persist_request(0);
    let third = recorder.persist_request(1);
    let second_file = complete_persist(&second);
    let third_file = complete_persist(&third);

    assert_eq!(pop_ids(&mut queue, 2), vec![1, 2]);
    // prefetched while the first batch was half drained
    assert!(recorder.restore_ids().iter().all(|id| *id == second.control().id()));
    assert!(!recorder.restore_ids().is_empty());

    assert!(queue.pop().is_none());
    assert!(!queue.update_front(|_| {}));
    assert!(queue.front(|e| e.clone()).is_none());
    assert_eq!(queue.len(), 7);

    complete_restore(&second, second_file);
    assert_eq!(queue.front(|e| e.clone()), Some(event(3)));
    assert_eq!(pop_ids(&mut queue, 2), vec![3, 4]);
    assert!(queue.pop().is_none());
    assert!(recorder.restore_ids().contains(&third.control().id()));

    complete_restore(&third, third_file);
    assert_eq!(pop_ids(&mut queue, 10), vec![5, 6, 7, 8, 9]);
}

#[test]
fn discards_against_offloaded_front_apply_after_restore() {
    let recorder = Recorder::default();
    let mut queue = filled_queue(&recorder, 9);
    let second = recorder.persist_request(0);
    let third = recorder.persist_request(1);
    let second_file = complete_persist(&second);
    let third_file = complete_persist(&third);
    assert_eq!(pop_ids(&mut queue, 2), vec![1, 2]);

    queue.discard_oldest();
    queue.discard_oldest();
    queue.discard_oldest();

    assert_eq!(queue.len(), 4);
    assert_eq!(queue.back(|e| e.clone()), Some(event(9)));

    complete_restore(&second, second_file);
    assert!(queue.pop().is_none());
    complete_restore(&third, third_file);

    assert_eq!(pop_ids(&mut queue, 10), vec![6, 7, 8, 9]);
}

#[test]
fn discard_on_resident_front_is_immediate() {
    let recorder = Recorder::default();
    let mut queue = filled_queue(&recorder, 3);

    queue.discard_oldest();

    assert_eq!(queue.len(), 2);
    assert_eq!(queue.front(|e| e.clone()), Some(event(2)));
}

#[test]
#[traced_test]
fn failed_front_batch_is_dropped() {
    let recorder = Recorder::default();
    let mut queue = filled_queue(&recorder, 9);
    let second = recorder.persist_request(0);
    complete_persist(&second);
    assert_eq!(pop_ids(&mut queue, 2), vec![1, 2]);

    fail_restore(&second);

    assert_eq!(pop_ids(&mut queue, 10), vec![5, 6, 7, 8, 9]);
    assert_eq!(queue.len(), 0);
    assert!(logs_contain("Dropping batch that failed to restore"));
}

#[test]
fn clear_deletes_offloaded_batch_files() {
    let recorder = Recorder::default();
    let mut queue = filled_queue(&recorder, 9);
    let second = recorder.persist_request(0);
    complete_persist(&second);

    queue.clear();

    assert_eq!(queue.len(), 0);
    assert_eq!(queue.batch_count(), 0);
    assert_eq!(*recorder.deleted.lock(), vec![(7, second.control().id())]);
    assert!(queue.pop().is_none());
}

#[test]
fn update_back_reports_empty_queue() {
    let recorder = Recorder::default();
    let mut queue = filled_queue(&recorder, 0);

    assert_eq!(queue.update_back(|_| {}), None);

    queue.push(event(1));
    assert_eq!(queue.update_back(|e| *e = event(5)), Some(true));
    assert_eq!(queue.back(|e| e.clone()), Some(event(5)));
}

#[test]
fn duplicate_scan_is_bounded_to_recent_entries() {
    let recorder = Recorder::default();
    let queue = filled_queue(&recorder, 5);

    assert!(queue.any_recent(&|e| *e == event(1), 5));
    assert!(!queue.any_recent(&|e| *e == event(1), 4));
    assert!(!queue.any_recent(&|_| true, 0));
}

#[test]
fn duplicate_scan_stops_at_offloaded_batches() {
    let recorder = Recorder::default();
    let queue = filled_queue(&recorder, 9);
    complete_persist(&recorder.persist_request(1));

    assert!(queue.any_recent(&|e| *e == event(7), 9));
    assert!(!queue.any_recent(&|e| *e == event(5), 9));
}

#[test]
fn stored_form_keeps_offloaded_batches_by_reference() {
    let recorder = Recorder::default();
    let mut queue = filled_queue(&recorder, 9);
    let second = recorder.persist_request(0);
    complete_persist(&second);
    queue.discard_oldest();

    let stored = queue.to_stored();

    assert_eq!(stored.batches.len(), 5);
    assert_eq!(stored.batches[0].entries, Some(vec![event(2)]));
    assert_eq!(stored.batches[1].batch_id, second.control().id());
    assert_eq!(stored.batches[1].len, 2);
    assert_eq!(stored.batches[1].entries, None);
    assert_eq!(stored.pending_discards, 0);

    let restored_recorder = Recorder::default();
    let restored = BatchedQueue::from_stored(7, 2, restored_recorder.persistor(), stored.clone());

    assert_eq!(restored.len(), 8);
    assert_eq!(restored.to_stored(), stored);
    assert!(restored_recorder.restores.lock().is_empty());
}

#[test]
fn restored_queue_requests_offloaded_front() {
    let stored = StoredBacklog {
        batches: vec![
            StoredBatch {
                batch_id: uuid::Uuid::new_v4(),
                len: 2,
                entries: None,
            },
            StoredBatch {
                batch_id: uuid::Uuid::new_v4(),
                len: 1,
                entries: Some(vec![event(3)]),
            },
        ],
        pending_discards: 1,
    };

    let recorder = Recorder::default();
    let queue: BatchedQueue<EventFieldList> = BatchedQueue::from_stored(7, 2, recorder.persistor(), stored.clone());

    assert_eq!(queue.len(), 2);
    assert_eq!(recorder.restore_ids(), vec![stored.batches[0].batch_id]);
}

#[test]
fn stored_form_reads_back_from_json() {
    let recorder = Recorder::default();
    let queue = filled_queue(&recorder, 9);
    complete_persist(&recorder.persist_request(0));
    let stored = queue.to_stored();

    let json = serde_json::to_string(&stored).unwrap();
    let parsed: StoredBacklog<EventFieldList> = serde_json::from_str(&json).unwrap();

    assert_eq!(parsed, stored);
    assert_eq!(parsed.batches[1].entries, None);
}
