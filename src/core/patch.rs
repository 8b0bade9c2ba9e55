//! JSON merge patches (RFC 7386)
//!
//! Namespace writes go out as the minimal patch between the observed and
//! the desired object, so fields other actors changed in the meantime are
//! left alone.

use serde_json::{Map, Value};

/// Two-way merge patch turning `original` into `modified`
///
/// Only changed keys are included. Keys missing from `modified` become
/// `null`. Returns an empty object when nothing changed.
pub fn create_merge_patch(original: &Value, modified: &Value) -> Value {
    match (original, modified) {
        (Value::Object(orig), Value::Object(modi)) => Value::Object(diff_objects(orig, modi)),
        _ if original == modified => Value::Object(Map::new()),
        _ => modified.clone(),
    }
}

fn diff_objects(orig: &Map<String, Value>, modi: &Map<String, Value>) -> Map<String, Value> {
    let mut patch = Map::new();

    for (key, new_value) in modi {
        match orig.get(key) {
            Some(old_value) if old_value == new_value => {}
            Some(Value::Object(old_obj)) => {
                if let Value::Object(new_obj) = new_value {
                    let nested = diff_objects(old_obj, new_obj);
                    if !nested.is_empty() {
                        patch.insert(key.clone(), Value::Object(nested));
                    }
                } else {
                    patch.insert(key.clone(), new_value.clone());
                }
            }
            _ => {
                patch.insert(key.clone(), new_value.clone());
            }
        }
    }

    for key in orig.keys() {
        if !modi.contains_key(key) {
            patch.insert(key.clone(), Value::Null);
        }
    }

    patch
}

/// Apply a merge patch to `target` in place
pub fn apply_merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch_obj) = patch else {
        *target = patch.clone();
        return;
    };

    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    let Value::Object(target_obj) = target else {
        return;
    };

    for (key, value) in patch_obj {
        if value.is_null() {
            target_obj.remove(key);
        } else {
            let entry = target_obj.entry(key.clone()).or_insert(Value::Null);
            apply_merge_patch(entry, value);
        }
    }
}

/// Whether a patch carries no changes
pub fn is_empty_patch(patch: &Value) -> bool {
    matches!(patch, Value::Object(map) if map.is_empty())
}
