//! Key/value maps carried by souls.
//!
//! Metadata and payload data are both plain string-keyed maps, kept
//! independent of each other: metadata is engine-facing (timestamps,
//! caller-set markers), data is the application payload.

use std::collections::HashMap;

use super::Value;

/// Application payload attached to a soul.
pub type DataMap = HashMap<String, Value>;

/// Engine-facing metadata of a soul. Always contains [`CDATE`] and [`MDATE`]
/// once the soul has been created in storage.
pub type MetaMap = HashMap<String, Value>;

/// Metadata key holding the creation timestamp (epoch milliseconds).
pub const CDATE: &str = "cdate";

/// Metadata key holding the last-modification timestamp (epoch milliseconds).
pub const MDATE: &str = "mdate";

/// Shallow merge of `patch` into `target`; patch values win.
pub fn merge(target: &mut HashMap<String, Value>, patch: &HashMap<String, Value>) {
    for (k, v) in patch {
        target.insert(k.clone(), v.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_patch_wins() {
        let mut target = DataMap::from([
            ("a".to_string(), Value::from(1)),
            ("b".to_string(), Value::from(2)),
        ]);
        let patch = DataMap::from([
            ("b".to_string(), Value::from(20)),
            ("c".to_string(), Value::from(3)),
        ]);
        merge(&mut target, &patch);
        assert_eq!(target.get("a"), Some(&Value::Int(1)));
        assert_eq!(target.get("b"), Some(&Value::Int(20)));
        assert_eq!(target.get("c"), Some(&Value::Int(3)));
    }
}
