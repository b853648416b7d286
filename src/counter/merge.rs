//! Recursive key-wise merge of JSON values.

use serde_json::Value;

/// Merge `overlay` into `base`.
///
/// For every key in the overlay: when both sides hold objects the merge
/// recurses, otherwise the overlay value replaces the existing one. Keys only
/// present in `base` are kept. A non-object overlay replaces `base` outright.
pub fn deep_merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) if existing.is_object() && value.is_object() => {
                        deep_merge(existing, value)
                    }
                    _ => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Merge into a copy of `base`.
pub fn merged(base: &Value, overlay: Value) -> Value {
    let mut out = base.clone();
    deep_merge(&mut out, overlay);
    out
}
