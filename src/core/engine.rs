//! Allocation of a UID block to a single namespace
//!
//! The block is reserved in the range allocation record first, with an
//! optimistic version check, and only then written to the namespace. A
//! block that was reserved but never written to a namespace stays claimed
//! until the next repair frees it.

use crate::core::allocator::{BlockAllocator, RangeAllocator};
use crate::core::audit::{EventRecorder, EventType, ObjectReference};
use crate::core::error::{AllocatorError, ControllerError, NamespaceError, Result};
use crate::core::mcs::LabelAllocationFn;
use crate::core::namespace::{
    Namespace, NamespaceClient, MCS_ANNOTATION, SUPPLEMENTAL_GROUPS_ANNOTATION,
    UID_RANGE_ANNOTATION,
};
use crate::core::patch::{create_merge_patch, is_empty_patch};
use crate::core::store::{RangeAllocation, RangeAllocationStore, UID_RANGE_ALLOCATION};
use crate::core::uid::{Block, UidRange};
use std::sync::Arc;
use tracing::{debug, info};

/// Reason of the event emitted once per allocated namespace
pub const CREATED_RANGES_REASON: &str = "CreatedSCCRanges";

/// Outcome of a successful [`AllocationEngine::allocate`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Allocation {
    /// The namespace already carried a UID block
    AlreadyAllocated,
    /// A block was reserved and written to the namespace
    Assigned(Block),
    /// A block was reserved but the namespace no longer exists
    NamespaceGone(Block),
}

/// Reserves blocks in the range allocation record and annotates namespaces
///
/// Owns the cached copy of the record. Must only be driven from a single
/// thread; the controller loop guarantees one allocation at a time.
pub struct AllocationEngine {
    required_range: UidRange,
    label_allocation: Option<LabelAllocationFn>,
    store: Arc<dyn RangeAllocationStore>,
    namespaces: Arc<dyn NamespaceClient>,
    recorder: Arc<dyn EventRecorder>,
    current: Option<RangeAllocation>,
}

impl AllocationEngine {
    pub fn new(
        required_range: UidRange,
        label_allocation: Option<LabelAllocationFn>,
        store: Arc<dyn RangeAllocationStore>,
        namespaces: Arc<dyn NamespaceClient>,
        recorder: Arc<dyn EventRecorder>,
    ) -> Self {
        AllocationEngine {
            required_range,
            label_allocation,
            store,
            namespaces,
            recorder,
            current: None,
        }
    }

    pub fn required_range(&self) -> &UidRange {
        &self.required_range
    }

    /// Last record read or written, if still trusted
    pub fn cached(&self) -> Option<&RangeAllocation> {
        self.current.as_ref()
    }

    /// Drop the cached record so the next allocation re-reads it
    pub fn invalidate(&mut self) {
        self.current = None;
    }

    /// Assign a UID block (and label) to `namespace`
    ///
    /// On any error the cached record is dropped and the namespace is left
    /// without annotations; the caller retries with backoff.
    pub fn allocate(&mut self, namespace: &Namespace) -> Result<Allocation> {
        if namespace.uid_range().is_some() {
            return Ok(Allocation::AlreadyAllocated);
        }

        let result = self.try_allocate(namespace);
        if result.is_err() {
            self.current = None;
        }
        result
    }

    fn try_allocate(&mut self, namespace: &Namespace) -> Result<Allocation> {
        let current = match self.current.take() {
            Some(record) => record,
            None => self.store.get(UID_RANGE_ALLOCATION)?,
        };

        let range: UidRange = current.range.parse()?;
        if range != self.required_range {
            return Err(ControllerError::RangeMismatch {
                expected: self.required_range.to_string(),
                actual: range.to_string(),
            });
        }

        let mut uids = RangeAllocator::from_bytes(range, &current.data);
        let block = match uids.allocate_next() {
            Ok(block) => block,
            Err(AllocatorError::Full) => return Err(ControllerError::RangeExceeded),
            Err(e) => return Err(e.into()),
        };

        let mut next = current.clone();
        next.data = uids.snapshot().1;

        // Reserve the block before it becomes visible on the namespace
        let stored = self.store.update(&next)?;
        debug!(
            namespace = %namespace.name(),
            block = %block,
            version = stored.resource_version,
            "Reserved UID block"
        );
        self.current = Some(stored);

        if !self.annotate(namespace, &block)? {
            // Nothing to annotate; the reserved block is freed by the next repair
            self.current = None;
            info!(
                namespace = %namespace.name(),
                block = %block,
                "Namespace deleted before it could be annotated"
            );
            return Ok(Allocation::NamespaceGone(block));
        }

        self.recorder.event(
            ObjectReference::namespace(namespace.name()),
            EventType::Normal,
            CREATED_RANGES_REASON,
            "created SCC ranges",
        );
        info!(namespace = %namespace.name(), block = %block, "Allocated UID block");

        Ok(Allocation::Assigned(block))
    }

    /// Patch the allocation annotations onto the namespace
    ///
    /// Returns `false` if the namespace no longer exists.
    fn annotate(&self, namespace: &Namespace, block: &Block) -> Result<bool> {
        let mut desired = namespace.clone();
        let annotations = &mut desired.metadata.annotations;
        annotations.insert(UID_RANGE_ANNOTATION.to_string(), block.to_string());
        annotations.insert(SUPPLEMENTAL_GROUPS_ANNOTATION.to_string(), block.to_string());
        if !annotations.contains_key(MCS_ANNOTATION) {
            if let Some(label) = self.label_allocation.as_ref().and_then(|f| f(block)) {
                annotations.insert(MCS_ANNOTATION.to_string(), label.to_string());
            }
        }

        let patch = create_merge_patch(
            &serde_json::to_value(namespace)?,
            &serde_json::to_value(&desired)?,
        );
        if is_empty_patch(&patch) {
            return Ok(true);
        }

        match self.namespaces.patch(namespace.name(), &patch) {
            Ok(_) => Ok(true),
            Err(NamespaceError::NotFound(_)) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
