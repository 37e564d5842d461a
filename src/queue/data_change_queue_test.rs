use super::*;
use crate::test_utils::data_value;
use crate::Error;
use crate::QueueError;
use crate::ServiceResult;
use crate::StatusCode;
use crate::Variant;

#[test]
fn enqueue_without_queue_size_fails() {
    let mut queue = InMemoryDataChangeQueue::new(1);

    let result = queue.enqueue(data_value(1), None);

    assert!(matches!(
        result,
        Err(Error::Queue(QueueError::QueueSizeNotSet { monitored_item_id: 1 }))
    ));
}

#[test]
fn full_queue_discards_oldest_value() {
    let mut queue = InMemoryDataChangeQueue::new(1);
    queue.reset_queue(3, false);

    for i in 1..=5 {
        queue.enqueue(data_value(i), None).unwrap();
    }

    assert_eq!(queue.items_in_queue(), 3);
    let drained: Vec<_> = std::iter::from_fn(|| queue.dequeue()).map(|e| e.value.value).collect();
    assert_eq!(
        drained,
        vec![Variant::Int32(3), Variant::Int32(4), Variant::Int32(5)]
    );
}

#[test]
fn errors_are_dropped_unless_queue_errors_is_set() {
    let error = ServiceResult::new(StatusCode::BAD_NO_COMMUNICATION);

    let mut queue = InMemoryDataChangeQueue::new(1);
    queue.reset_queue(2, false);
    queue.enqueue(data_value(1), Some(error.clone())).unwrap();
    assert_eq!(queue.dequeue().unwrap().error, None);

    queue.reset_queue(2, true);
    queue.enqueue(data_value(1), Some(error.clone())).unwrap();
    assert_eq!(queue.dequeue().unwrap().error, Some(error));
}

#[test]
fn reset_queue_clears_content() {
    let mut queue = InMemoryDataChangeQueue::new(1);
    queue.reset_queue(4, false);
    queue.enqueue(data_value(1), None).unwrap();

    queue.reset_queue(2, false);

    assert_eq!(queue.items_in_queue(), 0);
    assert_eq!(queue.queue_size(), 2);
    assert!(queue.dequeue().is_none());
}

#[test]
fn peek_and_overwrite_address_both_ends() {
    let mut queue = InMemoryDataChangeQueue::new(1);
    queue.reset_queue(3, false);
    assert!(queue.peek_oldest_value().is_none());
    assert!(queue.overwrite_last_value(data_value(0), None).is_err());

    queue.enqueue(data_value(1), None).unwrap();
    queue.enqueue(data_value(2), None).unwrap();
    queue.overwrite_last_value(data_value(9), None).unwrap();

    assert_eq!(queue.peek_oldest_value(), Some(data_value(1)));
    assert_eq!(queue.peek_last_value(), Some(data_value(9)));
    assert_eq!(queue.items_in_queue(), 2);
}

#[test]
fn update_oldest_value_mutates_in_place() {
    let mut queue = InMemoryDataChangeQueue::new(1);
    queue.reset_queue(2, false);
    assert!(!queue.update_oldest_value(&mut |_| {}));

    queue.enqueue(data_value(1), None).unwrap();
    queue.enqueue(data_value(2), None).unwrap();
    assert!(queue.update_oldest_value(&mut |v| v.status = v.status.with_overflow(true)));

    assert!(queue.dequeue().unwrap().value.status.overflow());
    assert!(!queue.dequeue().unwrap().value.status.overflow());
}

#[test]
fn resize_trims_the_requested_end() {
    let mut queue = InMemoryDataChangeQueue::new(1);
    queue.reset_queue(5, false);
    for i in 1..=5 {
        queue.enqueue(data_value(i), None).unwrap();
    }

    assert!(!queue.resize_queue(8, false, true));
    assert_eq!(queue.items_in_queue(), 5);

    assert!(queue.resize_queue(4, false, true));
    assert_eq!(queue.peek_oldest_value(), Some(data_value(2)));

    assert!(queue.resize_queue(2, false, false));
    assert_eq!(queue.queue_size(), 2);
    let drained: Vec<_> = std::iter::from_fn(|| queue.dequeue()).map(|e| e.value).collect();
    assert_eq!(drained, vec![data_value(2), data_value(3)]);
}

#[test]
fn errors_queued_before_resize_follow_new_retention() {
    let error = ServiceResult::new(StatusCode::BAD_NO_COMMUNICATION);
    let mut queue = InMemoryDataChangeQueue::new(1);
    queue.reset_queue(3, true);
    queue.enqueue(data_value(1), Some(error)).unwrap();

    queue.resize_queue(3, false, true);

    assert_eq!(queue.dequeue().unwrap().error, None);
}

#[test]
fn update_last_value_mutates_newest() {
    let mut queue = InMemoryDataChangeQueue::new(1);
    queue.reset_queue(2, false);
    assert!(!queue.update_last_value(&mut |_| {}));

    queue.enqueue(data_value(1), None).unwrap();
    queue.enqueue(data_value(2), None).unwrap();
    assert!(queue.update_last_value(&mut |v| v.status = StatusCode::BAD));

    assert_eq!(queue.peek_last_value(), Some(data_value(2).with_status(StatusCode::BAD)));
    assert_eq!(queue.peek_oldest_value(), Some(data_value(1)));
}

#[test]
fn in_memory_factory_rejects_durable_queues() {
    let factory = InMemoryQueueFactory;

    assert!(!factory.supports_durable_queues());
    assert!(factory.create_data_change_queue(false, 4).is_ok());
    assert!(matches!(
        factory.create_event_queue(true, 4),
        Err(Error::Queue(QueueError::DurableNotSupported { monitored_item_id: 4 }))
    ));
}
