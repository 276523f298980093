use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use crate::values::Document;

/// Key used to identify the same logical item in two lists of maps.
const LIST_ITEM_IDENTITY_KEY: &str = "name";

/// Deep merges `overlay` into `base` and returns the merged document.
///
/// `base` is consumed and returned mutated. Callers that still need the
/// original base document have to clone it before merging.
///
/// For every key of `overlay`:
///
/// - keys missing in `base` are inserted as-is,
/// - if both sides are maps they are merged recursively,
/// - if both sides are lists they are reconciled by [`merge_lists`],
/// - otherwise the overlay value replaces the base value, even if the types
///   differ (a map can be replaced by a scalar and vice versa).
///
/// Merging never fails.
///
/// ```
/// use serde_json::json;
/// use stackable_helm::values::{merge, parse_document};
///
/// let base = parse_document("image: {repository: nginx, tag: '1.25'}").unwrap();
/// let overlay = parse_document("image: {tag: '1.27'}").unwrap();
///
/// let merged = merge(base, overlay);
/// assert_eq!(merged["image"], json!({"repository": "nginx", "tag": "1.27"}));
/// ```
pub fn merge(mut base: Document, overlay: Document) -> Document {
    for (key, overlay_value) in overlay {
        let merged = match base.remove(&key) {
            Some(base_value) => merge_values(base_value, overlay_value),
            None => overlay_value,
        };
        base.insert(key, merged);
    }

    base
}

fn merge_values(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => Value::Object(merge(base, overlay)),
        (Value::Array(base), Value::Array(overlay)) => Value::Array(merge_lists(base, overlay)),
        (_, overlay) => overlay,
    }
}

/// Reconciles two lists, matching maps by their string `name` field.
///
/// The result contains the overlay items in order, where every named overlay
/// map with a counterpart in `base` is replaced by the recursive merge of
/// both. Named base maps that were not matched by any overlay item are
/// appended afterwards, in their original base order. Base items which are
/// not named maps never survive the reconciliation.
pub fn merge_lists(base: Vec<Value>, overlay: Vec<Value>) -> Vec<Value> {
    let mut indexed = BTreeMap::new();
    for (index, item) in base.into_iter().enumerate() {
        let Value::Object(document) = item else {
            continue;
        };
        if let Some(name) = item_name(&document).map(ToOwned::to_owned) {
            indexed.insert(name, (index, document));
        }
    }

    let mut used = BTreeSet::new();
    let mut merged = Vec::with_capacity(overlay.len() + indexed.len());

    for item in overlay {
        let matched = match &item {
            Value::Object(document) => item_name(document).and_then(|name| {
                indexed
                    .get(name)
                    .map(|(_, base_item)| (name.to_owned(), base_item.clone()))
            }),
            _ => None,
        };

        match (matched, item) {
            (Some((name, base_item)), Value::Object(overlay_item)) => {
                merged.push(Value::Object(merge(base_item, overlay_item)));
                used.insert(name);
            }
            (_, item) => merged.push(item),
        }
    }

    let mut leftovers = indexed
        .into_iter()
        .filter(|(name, _)| !used.contains(name))
        .map(|(_, leftover)| leftover)
        .collect::<Vec<_>>();
    leftovers.sort_by_key(|(index, _)| *index);
    merged.extend(
        leftovers
            .into_iter()
            .map(|(_, document)| Value::Object(document)),
    );

    merged
}

fn item_name(document: &Document) -> Option<&str> {
    document.get(LIST_ITEM_IDENTITY_KEY)?.as_str()
}
