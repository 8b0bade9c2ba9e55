//! Rebuilds the range allocation record from the namespaces themselves
//!
//! Repair never trusts the stored bitmap: it replays every namespace's UID
//! block annotation into an empty allocator and writes the result back
//! with the version read at the start, so a concurrent allocation makes the
//! write fail and the whole pass is retried.
//!
//! Known gap: if the record read and the namespace list are served from
//! different points of a diverging history (weakly consistent reads, or
//! different leaders), a block reserved after the list but before the read
//! can be dropped, and a double allocation can go unnoticed. The list would
//! have to be at least as new as the record read to rule this out.

use crate::core::allocator::{BlockAllocator, RangeAllocator};
use crate::core::audit::{EventRecorder, EventType, ObjectReference};
use crate::core::error::{AllocatorError, ControllerError, Result, StoreError};
use crate::core::namespace::NamespaceClient;
use crate::core::store::{RangeAllocation, RangeAllocationStore, UID_RANGE_ALLOCATION};
use crate::core::uid::{Block, UidRange};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Reason of the warning emitted when the range cannot hold every namespace
pub const RANGE_FULL_REASON: &str = "UIDRangeFull";

/// Summary of a repair pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepairReport {
    /// Blocks marked in the rebuilt bitmap
    pub allocated: usize,
    /// Namespaces whose block duplicates one already marked
    pub conflicts: Vec<String>,
    /// Namespaces whose block lies outside the configured range
    pub out_of_range: Vec<String>,
    /// Namespaces whose annotation does not parse
    pub malformed: Vec<String>,
    /// Whether the record had to be created
    pub created: bool,
}

/// Full reconciliation of the range allocation record
pub struct RepairEngine {
    required_range: UidRange,
    store: Arc<dyn RangeAllocationStore>,
    namespaces: Arc<dyn NamespaceClient>,
    recorder: Arc<dyn EventRecorder>,
}

impl RepairEngine {
    pub fn new(
        required_range: UidRange,
        store: Arc<dyn RangeAllocationStore>,
        namespaces: Arc<dyn NamespaceClient>,
        recorder: Arc<dyn EventRecorder>,
    ) -> Self {
        RepairEngine {
            required_range,
            store,
            namespaces,
            recorder,
        }
    }

    /// Rebuild and store the allocation bitmap
    pub fn repair(&self) -> Result<RepairReport> {
        // Read first so the write is pinned to this version
        let (mut record, need_create) = match self.store.get(UID_RANGE_ALLOCATION) {
            Ok(record) => (record, false),
            Err(StoreError::NotFound(_)) => (RangeAllocation::empty(UID_RANGE_ALLOCATION), true),
            Err(e) => return Err(e.into()),
        };

        let mut uids = RangeAllocator::new(self.required_range);
        let mut report = RepairReport {
            created: need_create,
            ..Default::default()
        };

        for ns in self.namespaces.list()? {
            let Some(value) = ns.uid_range() else {
                continue;
            };
            let block: Block = match value.parse() {
                Ok(block) => block,
                Err(_) => {
                    report.malformed.push(ns.name().to_string());
                    continue;
                }
            };

            match uids.allocate(block) {
                Ok(()) => {}
                Err(AllocatorError::NotInRange) => {
                    debug!(namespace = %ns.name(), block = %block, "Block outside configured range");
                    report.out_of_range.push(ns.name().to_string());
                }
                Err(AllocatorError::Allocated) => {
                    warn!(namespace = %ns.name(), block = %block, "Block already claimed by another namespace");
                    report.conflicts.push(ns.name().to_string());
                }
                Err(AllocatorError::Full) => {
                    let err = ControllerError::RangeFull(self.required_range.to_string());
                    self.recorder.event(
                        ObjectReference::range_allocation(UID_RANGE_ALLOCATION),
                        EventType::Warning,
                        RANGE_FULL_REASON,
                        &err.to_string(),
                    );
                    return Err(err);
                }
            }
        }

        let (range, data) = uids.snapshot();
        record.range = range;
        record.data = data;
        report.allocated = uids.total_blocks() - uids.free_blocks();

        let stored = if need_create {
            self.store.create(&record)?
        } else {
            self.store.update(&record)?
        };

        info!(
            allocated = report.allocated,
            conflicts = report.conflicts.len(),
            version = stored.resource_version,
            "Repaired UID range allocations"
        );
        Ok(report)
    }
}
