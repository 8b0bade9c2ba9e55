//! # UID Allocation Controller
//!
//! Assigns every namespace a unique, non-overlapping block of UIDs from a
//! fixed range, plus a derived MCS security label.
//!
//! - **Bitmap allocation** of the lowest free block
//! - **Optimistic concurrency** on a single versioned allocation record
//! - **Repair** that rebuilds the record from the namespaces themselves
//! - **Single worker loop** with de-duplication and per-item backoff
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use uid_allocation_controller::{
//!     AllocationEngine, ControllerLoop, ControllerOptions, InMemoryNamespaceClient,
//!     InMemoryRangeAllocationStore, LogRecorder, Namespace, RepairEngine, Result, UidRange,
//!     WorkQueue,
//! };
//!
//! # fn main() -> Result<()> {
//! let range: UidRange = "1000000000-1999999999/10000".parse()?;
//! let store = Arc::new(InMemoryRangeAllocationStore::new());
//! let namespaces = Arc::new(InMemoryNamespaceClient::new());
//! let recorder = Arc::new(LogRecorder);
//!
//! let engine = AllocationEngine::new(
//!     range,
//!     None,
//!     store.clone(),
//!     namespaces.clone(),
//!     recorder.clone(),
//! );
//! let repair = RepairEngine::new(range, store, namespaces.clone(), recorder);
//! let controller = ControllerLoop::new(
//!     engine,
//!     repair,
//!     namespaces.clone(),
//!     Arc::new(WorkQueue::default()),
//!     ControllerOptions::default(),
//! );
//!
//! // Create the allocation record, then allocate
//! let (_stop, stop_rx) = crossbeam::channel::bounded::<()>(1);
//! controller.wait_for_repair(&stop_rx)?;
//!
//! let ns = namespaces.create(Namespace::new("team-a"));
//! controller.on_namespace_added(&ns);
//! controller.process_next();
//! # Ok(())
//! # }
//! ```

pub mod core;

pub use crate::core::{
    allocator::{Bitmap, BlockAllocator, RangeAllocator},
    audit::{Event, EventRecorder, EventType, LogRecorder, MemoryRecorder, ObjectReference},
    config::ControllerConfig,
    controller::{ControllerLoop, ControllerOptions},
    engine::{Allocation, AllocationEngine},
    error::{
        AllocatorError, ConfigError, ControllerError, NamespaceError, RangeError, Result,
        StoreError,
    },
    mcs::{default_label_allocation, Label, LabelAllocationFn, LabelRange},
    namespace::{
        InMemoryNamespaceClient, Namespace, NamespaceClient, NamespaceEvent, MCS_ANNOTATION,
        SUPPLEMENTAL_GROUPS_ANNOTATION, UID_RANGE_ANNOTATION,
    },
    queue::{ExponentialBackoff, WorkItem, WorkQueue},
    repair::{RepairEngine, RepairReport},
    store::{InMemoryRangeAllocationStore, RangeAllocation, RangeAllocationStore, UID_RANGE_ALLOCATION},
    uid::{Block, UidRange},
};
