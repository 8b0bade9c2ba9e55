//! End-to-end allocation through the controller loop
//!
//! Exercises the interaction between:
//! - Startup repair creating the allocation record
//! - The work queue feeding namespaces to the allocation engine
//! - Repair reproducing the bitmap the engine built

use crate::core::allocator::Bitmap;
use crate::core::audit::{EventType, MemoryRecorder};
use crate::core::controller::{ControllerLoop, ControllerOptions};
use crate::core::engine::{AllocationEngine, CREATED_RANGES_REASON};
use crate::core::mcs::{default_label_allocation, LabelRange};
use crate::core::namespace::{
    InMemoryNamespaceClient, Namespace, NamespaceClient, MCS_ANNOTATION,
    SUPPLEMENTAL_GROUPS_ANNOTATION, UID_RANGE_ANNOTATION,
};
use crate::core::queue::WorkQueue;
use crate::core::repair::RepairEngine;
use crate::core::store::{InMemoryRangeAllocationStore, UID_RANGE_ALLOCATION};
use crate::core::uid::UidRange;
use crossbeam::channel::bounded;
use std::sync::Arc;

struct Cluster {
    store: Arc<InMemoryRangeAllocationStore>,
    namespaces: Arc<InMemoryNamespaceClient>,
    recorder: Arc<MemoryRecorder>,
    controller: ControllerLoop,
    range: UidRange,
}

fn cluster(range: &str, labels: Option<&str>) -> Cluster {
    let range: UidRange = range.parse().unwrap();
    let store = Arc::new(InMemoryRangeAllocationStore::new());
    let namespaces = Arc::new(InMemoryNamespaceClient::new());
    let recorder = Arc::new(MemoryRecorder::new());
    let label_allocation =
        labels.map(|l| default_label_allocation(range, l.parse::<LabelRange>().unwrap(), 1));

    let engine = AllocationEngine::new(
        range,
        label_allocation,
        store.clone(),
        namespaces.clone(),
        recorder.clone(),
    );
    let repair = RepairEngine::new(range, store.clone(), namespaces.clone(), recorder.clone());
    let controller = ControllerLoop::new(
        engine,
        repair,
        namespaces.clone(),
        Arc::new(WorkQueue::default()),
        ControllerOptions::default(),
    );

    Cluster {
        store,
        namespaces,
        recorder,
        controller,
        range,
    }
}

impl Cluster {
    fn bitmap(&self) -> String {
        let record = self.store.snapshot(UID_RANGE_ALLOCATION).unwrap();
        Bitmap::from_bytes(&record.data, self.range.size() as usize).to_string()
    }

    fn start(&self) {
        let (_stop, rx) = bounded::<()>(1);
        assert!(self.controller.wait_for_repair(&rx).unwrap());
    }

    /// Process until nothing is ready or waiting for a retry
    fn drain(&self) {
        let queue = self.controller.queue();
        while !queue.is_empty() || queue.waiting_len() > 0 {
            assert!(self.controller.process_next());
        }
    }
}

#[test]
fn test_three_namespaces_fill_lowest_blocks() {
    let c = cluster("0-3/1", None);
    c.start();
    assert_eq!(c.bitmap(), "0000");

    for name in ["n1", "n2", "n3"] {
        let ns = c.namespaces.create(Namespace::new(name));
        c.controller.on_namespace_added(&ns);
        c.drain();
    }

    assert_eq!(c.bitmap(), "1110");
    for (name, block) in [("n1", "0/1"), ("n2", "1/1"), ("n3", "2/1")] {
        let ns = c.namespaces.get(name).unwrap();
        assert_eq!(ns.annotation(UID_RANGE_ANNOTATION), Some(block));
        assert_eq!(ns.annotation(SUPPLEMENTAL_GROUPS_ANNOTATION), Some(block));
    }

    // Repair over the same annotations is a fixed point
    c.start();
    assert_eq!(c.bitmap(), "1110");
}

#[test]
fn test_events_once_per_namespace() {
    let c = cluster("0-3/1", Some("s0:/2"));
    c.start();

    let ns = c.namespaces.create(Namespace::new("team-a"));
    c.controller.on_namespace_added(&ns);
    c.drain();

    // The patch itself is an update; it must not allocate again
    let updated = c.namespaces.get("team-a").unwrap();
    c.controller.on_namespace_updated(&ns, &updated);
    c.drain();

    let events = c.recorder.with_reason(CREATED_RANGES_REASON);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, EventType::Normal);
    assert_eq!(updated.annotation(MCS_ANNOTATION), Some("s0:c1,c0"));
    assert_eq!(c.bitmap(), "1000");
}

#[test]
fn test_repair_frees_block_of_deleted_namespace() {
    let c = cluster("0-3/1", None);
    c.start();

    for name in ["a", "b"] {
        let ns = c.namespaces.create(Namespace::new(name));
        c.controller.on_namespace_added(&ns);
    }
    c.drain();
    assert_eq!(c.bitmap(), "1100");

    c.namespaces.delete("a");
    c.start();
    assert_eq!(c.bitmap(), "0100");

    // The freed block is reused first
    let ns = c.namespaces.create(Namespace::new("c"));
    c.controller.on_namespace_added(&ns);
    c.drain();
    assert_eq!(c.namespaces.get("c").unwrap().uid_range(), Some("0/1"));
    assert_eq!(c.bitmap(), "1100");
}

#[test]
fn test_exhausted_range_keeps_retrying() {
    let c = cluster("0-0/1", None);
    c.start();

    let first = c.namespaces.create(Namespace::new("first"));
    c.controller.on_namespace_added(&first);
    c.drain();

    let second = c.namespaces.create(Namespace::new("second"));
    c.controller.on_namespace_added(&second);
    assert!(c.controller.process_next());

    assert!(c.namespaces.get("second").unwrap().uid_range().is_none());
    let item = crate::core::queue::WorkItem::Namespace("second".to_string());
    assert_eq!(c.controller.queue().num_requeues(&item), 1);
    assert!(c.controller.queue().is_waiting(&item));
}
