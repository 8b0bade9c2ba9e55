//! Single-worker loop driving allocation and periodic repair
//!
//! Namespace names and the periodic repair tick share one [`WorkQueue`].
//! Exactly one worker thread drains it, so the allocation engine and its
//! cached record are never touched concurrently.

use crate::core::engine::{Allocation, AllocationEngine};
use crate::core::error::{ControllerError, NamespaceError, Result};
use crate::core::namespace::{Namespace, NamespaceClient, NamespaceEvent};
use crate::core::queue::{WorkItem, WorkQueue};
use crate::core::repair::RepairEngine;
use chrono::Utc;
use crossbeam::channel::{Receiver, RecvTimeoutError};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Timing knobs of the controller loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerOptions {
    /// Delay between periodic repairs
    pub periodic_repair_interval: Duration,
    /// Delay between startup repair attempts
    pub repair_poll_interval: Duration,
    /// Give up on the startup repair after this long
    pub repair_timeout: Duration,
    /// Delay between full resyncs of every namespace while running
    pub resync_interval: Duration,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        ControllerOptions {
            periodic_repair_interval: Duration::from_secs(8 * 60 * 60),
            repair_poll_interval: Duration::from_secs(10),
            repair_timeout: Duration::from_secs(5 * 60),
            resync_interval: Duration::from_secs(10 * 60),
        }
    }
}

/// Allocates UID blocks to namespaces one at a time
pub struct ControllerLoop {
    engine: Mutex<AllocationEngine>,
    repair: RepairEngine,
    namespaces: Arc<dyn NamespaceClient>,
    queue: Arc<WorkQueue>,
    options: ControllerOptions,
}

impl ControllerLoop {
    pub fn new(
        engine: AllocationEngine,
        repair: RepairEngine,
        namespaces: Arc<dyn NamespaceClient>,
        queue: Arc<WorkQueue>,
        options: ControllerOptions,
    ) -> Self {
        ControllerLoop {
            engine: Mutex::new(engine),
            repair,
            namespaces,
            queue,
            options,
        }
    }

    pub fn queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }

    pub fn options(&self) -> &ControllerOptions {
        &self.options
    }

    /// Repair, then process work until `stop` fires
    ///
    /// Every namespace is re-enqueued each `resync_interval`. Fails only if
    /// the startup repair does not succeed in time.
    pub fn run(self: &Arc<Self>, stop: Receiver<()>) -> Result<()> {
        info!("Repairing SCC UID allocations");
        if !self.wait_for_repair(&stop)? {
            info!("Stopped before the initial repair completed");
            self.queue.shutdown();
            return Ok(());
        }
        info!("Repair complete");

        self.add_next_periodic_repair();

        let worker = {
            let this = Arc::clone(self);
            thread::Builder::new()
                .name("uid-allocation-worker".to_string())
                .spawn(move || this.worker())?
        };

        // A dropped sender counts as a stop signal
        while let Err(RecvTimeoutError::Timeout) =
            stop.recv_timeout(self.options.resync_interval)
        {
            if let Err(e) = self.resync() {
                warn!(error = %e, "Periodic resync failed");
            }
        }

        info!("Shutting down");
        self.queue.shutdown();
        if worker.join().is_err() {
            error!("UID allocation worker panicked");
        }
        Ok(())
    }

    /// Poll `repair` until it succeeds, the timeout expires, or `stop` fires
    ///
    /// Returns `false` if stopped before a repair succeeded.
    pub fn wait_for_repair(&self, stop: &Receiver<()>) -> Result<bool> {
        let deadline = Instant::now() + self.options.repair_timeout;
        loop {
            match self.repair.repair() {
                Ok(report) => {
                    debug!(allocated = report.allocated, "Initial repair succeeded");
                    return Ok(true);
                }
                Err(e) => warn!(error = %e, "Initial repair failed, retrying"),
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(ControllerError::RepairTimeout);
            }

            let wait = self.options.repair_poll_interval.min(deadline - now);
            match stop.recv_timeout(wait) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => return Ok(false),
                Err(RecvTimeoutError::Timeout) => {}
            }
        }
    }

    /// Schedule the next repair tick
    pub fn add_next_periodic_repair(&self) {
        let interval = self.options.periodic_repair_interval;
        let next = chrono::Duration::from_std(interval)
            .ok()
            .and_then(|d| Utc::now().checked_add_signed(d));
        match next {
            Some(at) => info!(at = %at.to_rfc3339(), "Next periodic repair scheduled"),
            None => info!(?interval, "Next periodic repair scheduled"),
        }
        self.queue.add_after(WorkItem::RepairTick, interval);
    }

    fn worker(&self) {
        while self.process_next() {}
        debug!("UID allocation worker exiting");
    }

    /// Process one work item; `false` once the queue is shut down
    pub fn process_next(&self) -> bool {
        let Some(item) = self.queue.get() else {
            return false;
        };

        match &item {
            WorkItem::RepairTick => {
                if let Err(e) = self.repair.repair() {
                    error!(error = %e, "Error during periodic repair");
                }
                self.queue.done(&item);
                self.add_next_periodic_repair();
            }
            WorkItem::Namespace(name) => {
                match self.sync_namespace(name) {
                    Ok(()) => self.queue.forget(&item),
                    Err(e) => {
                        if e.is_retryable() {
                            warn!(namespace = %name, error = %e, "Error syncing namespace, it will be retried");
                        } else {
                            error!(namespace = %name, error = %e, "Error syncing namespace, it will be retried");
                        }
                        self.queue.add_rate_limited(item.clone());
                    }
                }
                self.queue.done(&item);
            }
        }
        true
    }

    /// Make sure the named namespace carries a UID block
    pub fn sync_namespace(&self, name: &str) -> Result<()> {
        let namespace = match self.namespaces.get(name) {
            Ok(ns) => ns,
            Err(NamespaceError::NotFound(_)) => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        if namespace.uid_range().is_some() {
            return Ok(());
        }

        match self.engine.lock().allocate(&namespace)? {
            Allocation::NamespaceGone(block) => {
                debug!(namespace = %name, block = %block, "Reserved block left for repair");
            }
            Allocation::Assigned(_) | Allocation::AlreadyAllocated => {}
        }
        Ok(())
    }

    pub fn on_namespace_added(&self, namespace: &Namespace) {
        self.queue.add(WorkItem::Namespace(namespace.name().to_string()));
    }

    pub fn on_namespace_updated(&self, _old: &Namespace, new: &Namespace) {
        self.queue.add(WorkItem::Namespace(new.name().to_string()));
    }

    /// Route a change notification; deletions need no work
    pub fn handle_event(&self, event: &NamespaceEvent) {
        match event {
            NamespaceEvent::Added(ns) => self.on_namespace_added(ns),
            NamespaceEvent::Updated { old, new } => self.on_namespace_updated(old, new),
            NamespaceEvent::Deleted(_) => {}
        }
    }

    /// Enqueue every known namespace
    pub fn resync(&self) -> Result<usize> {
        let namespaces = self.namespaces.list()?;
        for ns in &namespaces {
            self.on_namespace_added(ns);
        }
        debug!(count = namespaces.len(), "Resynced namespaces");
        Ok(namespaces.len())
    }

    /// Forward change notifications until the feed closes or the queue shuts down
    pub fn spawn_event_pump(
        self: &Arc<Self>,
        events: Receiver<NamespaceEvent>,
    ) -> Result<JoinHandle<()>> {
        let this = Arc::clone(self);
        let handle = thread::Builder::new()
            .name("namespace-events".to_string())
            .spawn(move || loop {
                if this.queue.is_shutting_down() {
                    break;
                }
                match events.recv_timeout(Duration::from_millis(100)) {
                    Ok(event) => this.handle_event(&event),
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;
        Ok(handle)
    }
}
