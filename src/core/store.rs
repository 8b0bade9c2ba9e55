//! Versioned range allocation record
//!
//! One well-known record holds the canonical range string and the
//! allocation bitmap. Every read returns a `resource_version`; an update is
//! accepted only when it carries the version currently stored, and the
//! stored version then advances by one.

use crate::core::error::StoreError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Name of the record holding the UID allocations
pub const UID_RANGE_ALLOCATION: &str = "scc-uid";

/// Durable allocation snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeAllocation {
    pub name: String,

    /// Canonical form of the range the bitmap refers to
    pub range: String,

    /// Big-endian bitmap bytes
    #[serde(default)]
    pub data: Vec<u8>,

    /// Version token; 0 for records that were never stored
    #[serde(default)]
    pub resource_version: u64,
}

impl RangeAllocation {
    /// A record that has not been persisted yet
    pub fn empty(name: impl Into<String>) -> Self {
        RangeAllocation {
            name: name.into(),
            range: String::new(),
            data: Vec::new(),
            resource_version: 0,
        }
    }
}

/// Versioned get/create/update access to range allocation records
pub trait RangeAllocationStore: Send + Sync {
    fn get(&self, name: &str) -> Result<RangeAllocation, StoreError>;

    /// Persist a new record; fails with `AlreadyExists` if one is stored
    fn create(&self, record: &RangeAllocation) -> Result<RangeAllocation, StoreError>;

    /// Replace a record, guarded by `record.resource_version`
    fn update(&self, record: &RangeAllocation) -> Result<RangeAllocation, StoreError>;
}

impl<S: RangeAllocationStore + ?Sized> RangeAllocationStore for Arc<S> {
    fn get(&self, name: &str) -> Result<RangeAllocation, StoreError> {
        (**self).get(name)
    }

    fn create(&self, record: &RangeAllocation) -> Result<RangeAllocation, StoreError> {
        (**self).create(record)
    }

    fn update(&self, record: &RangeAllocation) -> Result<RangeAllocation, StoreError> {
        (**self).update(record)
    }
}

/// Process-local store with compare-and-swap updates
///
/// Shared between controller instances (via `Arc`) to model several
/// replicas racing on the same record. Faults can be injected to exercise
/// retry paths.
#[derive(Debug, Default)]
pub struct InMemoryRangeAllocationStore {
    records: Mutex<HashMap<String, RangeAllocation>>,
    fail_next_gets: AtomicUsize,
    fail_next_writes: AtomicUsize,
    writes: AtomicUsize,
}

impl InMemoryRangeAllocationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current stored record, bypassing fault injection
    pub fn snapshot(&self, name: &str) -> Option<RangeAllocation> {
        self.records.lock().get(name).cloned()
    }

    /// Overwrite a record without a version check, as a manual edit would
    pub fn force_put(&self, mut record: RangeAllocation) -> RangeAllocation {
        let mut records = self.records.lock();
        let version = records
            .get(&record.name)
            .map(|r| r.resource_version)
            .unwrap_or(0);
        record.resource_version = version + 1;
        records.insert(record.name.clone(), record.clone());
        record
    }

    /// Make the next `n` reads fail with `Unavailable`
    pub fn fail_next_gets(&self, n: usize) {
        self.fail_next_gets.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` creates/updates fail with `Unavailable`
    pub fn fail_next_writes(&self, n: usize) {
        self.fail_next_writes.store(n, Ordering::SeqCst);
    }

    /// Number of successful creates and updates
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn take_fault(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl RangeAllocationStore for InMemoryRangeAllocationStore {
    fn get(&self, name: &str) -> Result<RangeAllocation, StoreError> {
        if Self::take_fault(&self.fail_next_gets) {
            return Err(StoreError::Unavailable("injected read failure".to_string()));
        }
        self.records
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    fn create(&self, record: &RangeAllocation) -> Result<RangeAllocation, StoreError> {
        if Self::take_fault(&self.fail_next_writes) {
            return Err(StoreError::Unavailable("injected write failure".to_string()));
        }
        let mut records = self.records.lock();
        if records.contains_key(&record.name) {
            return Err(StoreError::AlreadyExists(record.name.clone()));
        }

        let mut stored = record.clone();
        stored.resource_version = 1;
        records.insert(stored.name.clone(), stored.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(stored)
    }

    fn update(&self, record: &RangeAllocation) -> Result<RangeAllocation, StoreError> {
        if Self::take_fault(&self.fail_next_writes) {
            return Err(StoreError::Unavailable("injected write failure".to_string()));
        }
        let mut records = self.records.lock();
        let current = records
            .get(&record.name)
            .ok_or_else(|| StoreError::NotFound(record.name.clone()))?;

        if current.resource_version != record.resource_version {
            return Err(StoreError::Conflict {
                name: record.name.clone(),
                expected: record.resource_version,
                actual: current.resource_version,
            });
        }

        let mut stored = record.clone();
        stored.resource_version = current.resource_version + 1;
        records.insert(stored.name.clone(), stored.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(stored)
    }
}
