use std::{collections::BTreeMap, fmt::Write};

use serde_json::Value;

use super::ClientId;

/// Digest of the element-level content of every client's presence record.
///
/// Clients are visited in id order; within a record, only top-level keys without the
/// reserved prefix count, in key order, and each `(client, key, element id, payload)`
/// tuple contributes one line. Two equal fingerprints mean no element-relevant
/// presence changed in between, whatever happened to reserved keys such as cursors or
/// identity.
///
/// ```
/// # use std::collections::BTreeMap;
/// # use elemsync::awareness::element_awareness_fingerprint;
/// # use serde_json::json;
/// let before = BTreeMap::from([(1, json!({ "can-move": { "box": { "x": 0 } } }))]);
/// let after = BTreeMap::from([(1, json!({ "can-move": { "box": { "x": 0 } }, "__cursor": [4, 2] }))]);
/// assert_eq!(
///     element_awareness_fingerprint(&before, "__"),
///     element_awareness_fingerprint(&after, "__"),
/// );
/// ```
pub fn element_awareness_fingerprint(
    states: &BTreeMap<ClientId, Value>,
    reserved_prefix: &str,
) -> String {
    let mut fingerprint = String::new();
    for (client, state) in states {
        let Value::Object(fields) = state else {
            continue;
        };
        let mut keys: Vec<&String> = fields
            .keys()
            .filter(|key| !key.starts_with(reserved_prefix))
            .collect();
        keys.sort();

        for key in keys {
            match &fields[key.as_str()] {
                Value::Object(elements) => {
                    let mut ids: Vec<&String> = elements.keys().collect();
                    ids.sort();
                    for id in ids {
                        let payload = &elements[id.as_str()];
                        let _ = writeln!(fingerprint, "{client}\t{key}\t{id}\t{payload}");
                    }
                }
                other => {
                    let _ = writeln!(fingerprint, "{client}\t{key}\t\t{other}");
                }
            }
        }
    }
    fingerprint
}
