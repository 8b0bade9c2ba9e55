//! Repair rebuilding the allocation record from namespace annotations

use std::sync::Arc;
use uid_allocation_controller::{
    Allocation, AllocationEngine, Bitmap, ControllerError, InMemoryNamespaceClient,
    InMemoryRangeAllocationStore, MemoryRecorder, Namespace, RangeAllocation, RepairEngine,
    UidRange, UID_RANGE_ALLOCATION, UID_RANGE_ANNOTATION,
};

struct Setup {
    range: UidRange,
    store: Arc<InMemoryRangeAllocationStore>,
    namespaces: Arc<InMemoryNamespaceClient>,
    recorder: Arc<MemoryRecorder>,
}

impl Setup {
    fn new(range: &str) -> Self {
        Setup {
            range: range.parse().unwrap(),
            store: Arc::new(InMemoryRangeAllocationStore::new()),
            namespaces: Arc::new(InMemoryNamespaceClient::new()),
            recorder: Arc::new(MemoryRecorder::new()),
        }
    }

    fn annotate(&self, name: &str, block: &str) {
        self.namespaces
            .create(Namespace::new(name).with_annotation(UID_RANGE_ANNOTATION, block));
    }

    fn repair(&self) -> RepairEngine {
        RepairEngine::new(
            self.range,
            self.store.clone(),
            self.namespaces.clone(),
            self.recorder.clone(),
        )
    }

    fn engine(&self) -> AllocationEngine {
        AllocationEngine::new(
            self.range,
            None,
            self.store.clone(),
            self.namespaces.clone(),
            self.recorder.clone(),
        )
    }

    fn bitmap(&self) -> String {
        let record = self.store.snapshot(UID_RANGE_ALLOCATION).unwrap();
        Bitmap::from_bytes(&record.data, self.range.size() as usize).to_string()
    }
}

#[test]
fn test_missing_record_is_rebuilt() {
    let s = Setup::new("0-7/1");
    s.annotate("a", "1/1");
    s.annotate("b", "4/1");

    let report = s.repair().repair().unwrap();
    assert!(report.created);
    assert_eq!(s.bitmap(), "01001000");
}

#[test]
fn test_corrupted_record_is_replaced() {
    let s = Setup::new("0-7/1");
    s.store.force_put(RangeAllocation {
        name: UID_RANGE_ALLOCATION.to_string(),
        range: "0-7/1".to_string(),
        data: vec![0xde, 0xad, 0xbe, 0xef],
        resource_version: 0,
    });
    s.annotate("a", "0/1");

    s.repair().repair().unwrap();
    assert_eq!(s.bitmap(), "10000000");

    // Stable when re-run
    s.repair().repair().unwrap();
    assert_eq!(s.bitmap(), "10000000");
}

#[test]
fn test_record_for_another_range_is_rebound() {
    let s = Setup::new("0-7/1");
    s.store.force_put(RangeAllocation {
        name: UID_RANGE_ALLOCATION.to_string(),
        range: "100-199/10".to_string(),
        data: vec![0x01],
        resource_version: 0,
    });
    s.annotate("a", "2/1");

    s.repair().repair().unwrap();
    let record = s.store.snapshot(UID_RANGE_ALLOCATION).unwrap();
    assert_eq!(record.range, "0-7/1");
    assert_eq!(s.bitmap(), "00100000");
}

#[test]
fn test_conflict_does_not_block_new_allocations() {
    let s = Setup::new("0-3/1");
    s.annotate("a", "0/1");
    s.annotate("b", "0/1");

    let report = s.repair().repair().unwrap();
    assert_eq!(report.conflicts.len(), 1);
    assert_eq!(s.bitmap(), "1000");

    let mut engine = s.engine();
    let ns = s.namespaces.create(Namespace::new("c"));
    assert!(matches!(engine.allocate(&ns).unwrap(), Allocation::Assigned(_)));
    assert_eq!(s.bitmap(), "1100");
}

#[test]
fn test_full_range_with_stale_claims_still_repairs() {
    let s = Setup::new("0-2/1");
    for (name, block) in [
        ("a", "0/1"),
        ("b", "1/1"),
        ("c", "2/1"),
        ("d", "0/1"),
        ("old-config", "10000/10"),
    ] {
        s.annotate(name, block);
    }

    let report = s.repair().repair().unwrap();
    assert_eq!(report.allocated, 3);
    assert_eq!(report.conflicts, vec!["d"]);
    assert_eq!(report.out_of_range, vec!["old-config"]);
    assert_eq!(s.bitmap(), "111");
    assert!(s.recorder.events().is_empty());

    // The range is exhausted for new namespaces, not for repair
    let mut engine = s.engine();
    let ns = s.namespaces.create(Namespace::new("e"));
    let err = engine.allocate(&ns).unwrap_err();
    assert!(matches!(err, ControllerError::RangeExceeded));
    assert!(!err.is_retryable());
}

#[test]
fn test_allocation_needs_a_record() {
    let s = Setup::new("0-3/1");
    let mut engine = s.engine();
    let ns = s.namespaces.create(Namespace::new("early"));
    assert!(engine.allocate(&ns).is_err());

    s.repair().repair().unwrap();
    assert_eq!(
        engine.allocate(&ns).unwrap(),
        Allocation::Assigned("0/1".parse().unwrap())
    );
}
