//! Namespace objects, their allocation annotations, and the API used to
//! read and patch them

use crate::core::error::NamespaceError;
use crate::core::patch::apply_merge_patch;
use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// UID block assigned to the namespace
pub const UID_RANGE_ANNOTATION: &str = "openshift.io/sa.scc.uid-range";

/// Supplemental group block; same value as the UID block
pub const SUPPLEMENTAL_GROUPS_ANNOTATION: &str = "openshift.io/sa.scc.supplemental-groups";

/// MCS label derived from the UID block
pub const MCS_ANNOTATION: &str = "openshift.io/sa.scc.mcs";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default)]
    pub resource_version: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Namespace {
    pub metadata: ObjectMeta,
}

impl Namespace {
    pub fn new(name: impl Into<String>) -> Self {
        Namespace {
            metadata: ObjectMeta {
                name: name.into(),
                ..Default::default()
            },
        }
    }

    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.annotations.insert(key.into(), value.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn resource_version(&self) -> u64 {
        self.metadata.resource_version
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.metadata.annotations.get(key).map(String::as_str)
    }

    /// UID block annotation, present once the namespace has been allocated
    pub fn uid_range(&self) -> Option<&str> {
        self.annotation(UID_RANGE_ANNOTATION)
    }
}

/// Change notification for a namespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NamespaceEvent {
    Added(Namespace),
    Updated { old: Namespace, new: Namespace },
    Deleted(Namespace),
}

/// Access to namespace objects
pub trait NamespaceClient: Send + Sync {
    fn get(&self, name: &str) -> Result<Namespace, NamespaceError>;

    fn list(&self) -> Result<Vec<Namespace>, NamespaceError>;

    /// Apply a JSON merge patch and return the updated object
    fn patch(&self, name: &str, patch: &serde_json::Value) -> Result<Namespace, NamespaceError>;
}

impl<C: NamespaceClient + ?Sized> NamespaceClient for Arc<C> {
    fn get(&self, name: &str) -> Result<Namespace, NamespaceError> {
        (**self).get(name)
    }

    fn list(&self) -> Result<Vec<Namespace>, NamespaceError> {
        (**self).list()
    }

    fn patch(&self, name: &str, patch: &serde_json::Value) -> Result<Namespace, NamespaceError> {
        (**self).patch(name, patch)
    }
}

/// Process-local namespace API that publishes change notifications
#[derive(Default)]
pub struct InMemoryNamespaceClient {
    namespaces: Mutex<HashMap<String, Namespace>>,
    watchers: Mutex<Vec<Sender<NamespaceEvent>>>,
    fail_next_patches: AtomicUsize,
    patches: AtomicUsize,
}

impl InMemoryNamespaceClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to create/update/delete notifications
    pub fn watch(&self) -> Receiver<NamespaceEvent> {
        let (tx, rx) = unbounded();
        self.watchers.lock().push(tx);
        rx
    }

    fn notify(&self, event: NamespaceEvent) {
        self.watchers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Store a namespace, replacing any existing one with the same name
    pub fn create(&self, mut namespace: Namespace) -> Namespace {
        namespace.metadata.resource_version = 1;
        self.namespaces
            .lock()
            .insert(namespace.name().to_string(), namespace.clone());
        self.notify(NamespaceEvent::Added(namespace.clone()));
        namespace
    }

    pub fn delete(&self, name: &str) -> Option<Namespace> {
        let removed = self.namespaces.lock().remove(name);
        if let Some(ns) = &removed {
            self.notify(NamespaceEvent::Deleted(ns.clone()));
        }
        removed
    }

    /// Make the next `n` patches fail with `Unavailable`
    pub fn fail_next_patches(&self, n: usize) {
        self.fail_next_patches.store(n, Ordering::SeqCst);
    }

    /// Number of successful patches
    pub fn patch_count(&self) -> usize {
        self.patches.load(Ordering::SeqCst)
    }
}

impl NamespaceClient for InMemoryNamespaceClient {
    fn get(&self, name: &str) -> Result<Namespace, NamespaceError> {
        self.namespaces
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| NamespaceError::NotFound(name.to_string()))
    }

    fn list(&self) -> Result<Vec<Namespace>, NamespaceError> {
        let mut all: Vec<_> = self.namespaces.lock().values().cloned().collect();
        all.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(all)
    }

    fn patch(&self, name: &str, patch: &serde_json::Value) -> Result<Namespace, NamespaceError> {
        if self
            .fail_next_patches
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(NamespaceError::Unavailable("injected patch failure".to_string()));
        }

        let invalid = |reason: String| NamespaceError::InvalidPatch {
            name: name.to_string(),
            reason,
        };

        let (old, new) = {
            let mut namespaces = self.namespaces.lock();
            let current = namespaces
                .get(name)
                .ok_or_else(|| NamespaceError::NotFound(name.to_string()))?;

            let mut value = serde_json::to_value(current).map_err(|e| invalid(e.to_string()))?;
            apply_merge_patch(&mut value, patch);
            let mut updated: Namespace =
                serde_json::from_value(value).map_err(|e| invalid(e.to_string()))?;

            if updated.name() != name {
                return Err(invalid("metadata.name is immutable".to_string()));
            }
            updated.metadata.resource_version = current.resource_version() + 1;

            let old = current.clone();
            namespaces.insert(name.to_string(), updated.clone());
            (old, updated)
        };

        self.patches.fetch_add(1, Ordering::SeqCst);
        self.notify(NamespaceEvent::Updated {
            old,
            new: new.clone(),
        });
        Ok(new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_namespace_json_shape() {
        let ns = Namespace::new("team-a").with_annotation(UID_RANGE_ANNOTATION, "0/1");
        let value = serde_json::to_value(&ns).unwrap();
        assert_eq!(
            value,
            json!({
                "metadata": {
                    "name": "team-a",
                    "annotations": {"openshift.io/sa.scc.uid-range": "0/1"},
                    "resourceVersion": 0
                }
            })
        );
    }

    #[test]
    fn test_get_and_list() {
        let client = InMemoryNamespaceClient::new();
        client.create(Namespace::new("b"));
        client.create(Namespace::new("a"));

        assert_eq!(client.get("a").unwrap().name(), "a");
        assert!(matches!(client.get("zzz"), Err(NamespaceError::NotFound(_))));

        let names: Vec<_> = client
            .list()
            .unwrap()
            .iter()
            .map(|ns| ns.name().to_string())
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_patch_merges_annotations() {
        let client = InMemoryNamespaceClient::new();
        client.create(Namespace::new("a").with_annotation("owner", "team-a"));

        let patched = client
            .patch(
                "a",
                &json!({"metadata": {"annotations": {UID_RANGE_ANNOTATION: "0/1"}}}),
            )
            .unwrap();

        assert_eq!(patched.annotation("owner"), Some("team-a"));
        assert_eq!(patched.uid_range(), Some("0/1"));
        assert_eq!(patched.resource_version(), 2);
        assert_eq!(client.patch_count(), 1);
    }

    #[test]
    fn test_patch_missing_namespace() {
        let client = InMemoryNamespaceClient::new();
        assert!(matches!(
            client.patch("gone", &json!({})),
            Err(NamespaceError::NotFound(_))
        ));
    }

    #[test]
    fn test_patch_cannot_rename() {
        let client = InMemoryNamespaceClient::new();
        client.create(Namespace::new("a"));
        assert!(matches!(
            client.patch("a", &json!({"metadata": {"name": "b"}})),
            Err(NamespaceError::InvalidPatch { .. })
        ));
    }

    #[test]
    fn test_watch_receives_events() {
        let client = InMemoryNamespaceClient::new();
        let events = client.watch();

        client.create(Namespace::new("a"));
        client
            .patch("a", &json!({"metadata": {"labels": {"env": "prod"}}}))
            .unwrap();
        client.delete("a");

        assert!(matches!(events.try_recv().unwrap(), NamespaceEvent::Added(_)));
        assert!(matches!(
            events.try_recv().unwrap(),
            NamespaceEvent::Updated { .. }
        ));
        assert!(matches!(events.try_recv().unwrap(), NamespaceEvent::Deleted(_)));
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_injected_patch_failure() {
        let client = InMemoryNamespaceClient::new();
        client.create(Namespace::new("a"));
        client.fail_next_patches(1);
        assert!(matches!(
            client.patch("a", &json!({})),
            Err(NamespaceError::Unavailable(_))
        ));
        assert!(client.patch("a", &json!({})).is_ok());
    }
}
