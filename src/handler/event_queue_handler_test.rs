use std::collections::VecDeque;

use super::*;
use crate::test_utils::event;
use crate::test_utils::event_ids;
use crate::DiagnosticsContext;
use crate::DiagnosticsMask;
use crate::Error;
use crate::EventHandle;
use crate::InMemoryQueueFactory;
use crate::QueueError;
use crate::ServiceResult;
use crate::StatusCode;
use crate::Variant;

fn handler(
    queue_size: u32,
    discard_oldest: bool,
) -> EventQueueHandler {
    let mut handler = EventQueueHandler::new(false, &InMemoryQueueFactory, 7).unwrap();
    handler.set_queue_size(queue_size, discard_oldest);
    handler
}

fn publish_all(
    handler: &mut EventQueueHandler,
    max: u32,
) -> Vec<crate::EventFieldList> {
    let mut notifications = VecDeque::new();
    handler.publish(&DiagnosticsContext::default(), &mut notifications, max);
    notifications.into_iter().collect()
}

#[test]
fn durable_request_on_in_memory_factory_fails() {
    let result = EventQueueHandler::new(true, &InMemoryQueueFactory, 7);

    assert!(matches!(
        result,
        Err(Error::Queue(QueueError::DurableNotSupported { monitored_item_id: 7 }))
    ));
}

#[test]
fn queue_event_before_queue_size_fails() {
    let mut handler = EventQueueHandler::new(false, &InMemoryQueueFactory, 7).unwrap();

    assert!(!handler.set_queue_overflow_if_full());
    assert!(matches!(
        handler.queue_event(event(1)),
        Err(Error::Queue(QueueError::QueueSizeNotSet { monitored_item_id: 7 }))
    ));
    assert!(!handler.overflow());
    assert_eq!(handler.items_in_queue(), 0);
}

#[test]
fn discard_oldest_keeps_last_entries_in_order() {
    let mut handler = handler(3, true);

    for i in 1..=5 {
        handler.queue_event(event(i)).unwrap();
    }

    assert!(!handler.set_queue_overflow_if_full());
    assert!(handler.overflow());
    assert_eq!(event_ids(&publish_all(&mut handler, 10)), vec![3, 4, 5]);
}

#[test]
fn full_queue_without_discard_rejects_event() {
    let mut handler = handler(3, false);
    for i in 1..=3 {
        handler.queue_event(event(i)).unwrap();
    }

    assert!(handler.set_queue_overflow_if_full());
    let result = handler.queue_event(event(4));

    assert!(matches!(
        result,
        Err(Error::Queue(QueueError::QueueFull { monitored_item_id: 7 }))
    ));
    assert_eq!(handler.items_in_queue(), 3);
    assert!(handler.overflow());
    assert_eq!(event_ids(&publish_all(&mut handler, 10)), vec![1, 2, 3]);
}

#[test]
fn set_queue_overflow_if_full_does_not_touch_content() {
    let mut handler = handler(2, false);
    assert!(!handler.set_queue_overflow_if_full());
    assert!(!handler.overflow());

    handler.queue_event(event(1)).unwrap();
    handler.queue_event(event(2)).unwrap();

    assert!(handler.set_queue_overflow_if_full());
    assert_eq!(handler.items_in_queue(), 2);
}

#[test]
fn publish_drains_up_to_max_then_returns_zero() {
    let mut handler = handler(10, true);
    for i in 1..=4 {
        handler.queue_event(event(i)).unwrap();
    }

    let mut notifications = VecDeque::new();
    let context = DiagnosticsContext::default();
    assert_eq!(handler.publish(&context, &mut notifications, 3), 3);
    assert_eq!(handler.publish(&context, &mut notifications, 3), 1);
    assert_eq!(handler.publish(&context, &mut notifications, 3), 0);

    assert_eq!(handler.items_in_queue(), 0);
    assert_eq!(
        event_ids(&notifications.into_iter().collect::<Vec<_>>()),
        vec![1, 2, 3, 4]
    );
}

#[test]
fn overflow_survives_publish_cut_off_by_limit() {
    let mut handler = handler(2, false);
    handler.queue_event(event(1)).unwrap();
    handler.queue_event(event(2)).unwrap();
    assert!(handler.queue_event(event(3)).is_err());

    publish_all(&mut handler, 1);
    assert!(handler.overflow());

    publish_all(&mut handler, 5);
    assert!(!handler.overflow());
}

#[test]
fn overflow_is_cleared_by_publish_under_discard_oldest() {
    let mut handler = handler(2, true);
    for i in 1..=3 {
        handler.queue_event(event(i)).unwrap();
    }
    assert!(handler.overflow());

    publish_all(&mut handler, 1);

    assert!(!handler.overflow());
}

#[test]
fn publish_applies_diagnostic_masks() {
    let mut handler = handler(2, true);
    let result = ServiceResult::new(StatusCode::BAD_NODE_ID_UNKNOWN)
        .with_symbolic_id("BadNodeIdUnknown")
        .with_localized_text("node unknown");
    handler
        .queue_event(crate::EventFieldList::new(1, vec![Variant::StatusResult(result)]))
        .unwrap();

    let mut notifications = VecDeque::new();
    let context = DiagnosticsContext::new(DiagnosticsMask::OPERATION_SYMBOLIC_ID);
    handler.publish(&context, &mut notifications, 1);

    let Variant::StatusResult(published) = &notifications[0].event_fields[0] else {
        panic!("unexpected field {:?}", notifications[0].event_fields[0]);
    };
    assert_eq!(published.symbolic_id.as_deref(), Some("BadNodeIdUnknown"));
    assert_eq!(published.localized_text, None);
}

#[test]
fn duplicate_check_uses_scan_limit() {
    let mut handler = handler(10, true).with_duplicate_scan_limit(2);
    for i in 1..=5 {
        handler.queue_event(event(i).with_handle(EventHandle(i as u64))).unwrap();
    }

    assert!(handler.is_event_contained_in_queue(&|e| e.handle == Some(EventHandle(4))));
    assert!(!handler.is_event_contained_in_queue(&|e| e.handle == Some(EventHandle(3))));
}

#[test]
fn shrinking_queue_is_enforced_on_next_enqueue() {
    let mut handler = handler(5, false);
    for i in 1..=4 {
        handler.queue_event(event(i)).unwrap();
    }

    handler.set_queue_size(2, false);

    assert!(handler.queue_event(event(5)).is_err());
    assert_eq!(handler.items_in_queue(), 4);
}
