use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use snafu::{ResultExt, Snafu, ensure};

use crate::values::{Document, DocumentError, merge, parse_document, strvals::MAX_NESTING};

static LIST_SELECTOR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<key>[^\[\]]+)\[(?P<match_key>[^=\[\]]+)=(?P<match_value>[^\[\]]*)\]$")
        .expect("failed to compile list selector regex")
});

#[derive(Debug, Snafu)]
pub enum PathError {
    #[snafu(display("cannot set value {value:?} at an empty path"))]
    InvalidPath { value: String },

    #[snafu(display(
        "path {path:?} has {depth} segments, more than the maximum of {MAX_NESTING}"
    ))]
    NestingTooDeep { path: String, depth: usize },

    #[snafu(display("path {path:?} must end with a plain key, not a list selector"))]
    SelectorAsLeaf { path: String },

    #[snafu(display("failed to serialize document built from path {path:?}"))]
    SerializeDocument {
        source: serde_yaml::Error,
        path: String,
    },

    #[snafu(display("failed to parse document built from path {path:?}"))]
    ParseDocument {
        source: DocumentError,
        path: String,
    },
}

/// One dot-separated component of a value path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PathSegment {
    /// A plain map key.
    Key(String),

    /// `key[match_key=match_value]`, the item of the list at `key` whose
    /// `match_key` field equals `match_value`.
    Select {
        key: String,
        match_key: String,
        match_value: String,
    },
}

impl PathSegment {
    pub fn parse(segment: &str) -> Self {
        match LIST_SELECTOR_REGEX.captures(segment) {
            Some(captures) => Self::Select {
                key: captures["key"].to_owned(),
                match_key: captures["match_key"].to_owned(),
                match_value: captures["match_value"].to_owned(),
            },
            None => Self::Key(segment.to_owned()),
        }
    }
}

/// A single value taken from resource metadata, addressed by a dotted path.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueMapping {
    pub path: String,
    pub value: String,
}

impl ValueMapping {
    pub fn new(path: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            value: value.into(),
        }
    }
}

/// Builds the smallest document which holds `value` at `path`.
///
/// The path is split on `.`. Segments of the form `key[match_key=match_value]`
/// select (or create) the item of the list at `key` whose `match_key` equals
/// `match_value`. New list items only contain the `match_key` field before
/// the rest of the path is applied to them.
///
/// ```
/// use serde_json::json;
/// use stackable_helm::values::build_document;
///
/// let document = build_document("containers[name=auth].image", "nginx").unwrap();
/// assert_eq!(document["containers"], json!([{"name": "auth", "image": "nginx"}]));
/// ```
///
/// The value always ends up as a string leaf. The constructed tree is
/// serialized and parsed again with [`parse_document`], so the result is
/// typed exactly like any other values document.
pub fn build_document(path: &str, value: &str) -> Result<Document, PathError> {
    if path.is_empty() {
        ensure!(value.is_empty(), InvalidPathSnafu { value });
        return Ok(Document::new());
    }

    let depth = path.split('.').count();
    ensure!(depth <= MAX_NESTING, NestingTooDeepSnafu { path, depth });

    let segments = path.split('.').map(PathSegment::parse).collect::<Vec<_>>();
    ensure!(
        matches!(segments.last(), Some(PathSegment::Key(_))),
        SelectorAsLeafSnafu { path }
    );

    let mut root = Document::new();
    insert(&mut root, &segments, value);

    let yaml = serde_yaml::to_string(&root).context(SerializeDocumentSnafu { path })?;
    parse_document(&yaml).context(ParseDocumentSnafu { path })
}

/// Folds all `mappings` into a single document, later mappings win.
pub fn build_mapped_values(mappings: &[ValueMapping]) -> Result<Document, PathError> {
    mappings.iter().try_fold(Document::new(), |mapped, mapping| {
        tracing::trace!(path = %mapping.path, "mapping value");
        Ok(merge(mapped, build_document(&mapping.path, &mapping.value)?))
    })
}

fn insert(target: &mut Document, segments: &[PathSegment], value: &str) {
    let Some((segment, rest)) = segments.split_first() else {
        return;
    };

    match segment {
        PathSegment::Key(key) if rest.is_empty() => {
            target.insert(key.clone(), Value::String(value.to_owned()));
        }
        PathSegment::Key(key) => {
            let child = target.entry(key.clone()).or_insert(Value::Null);
            if !child.is_object() {
                *child = Value::Object(Document::new());
            }
            if let Value::Object(child) = child {
                insert(child, rest, value);
            }
        }
        PathSegment::Select {
            key,
            match_key,
            match_value,
        } => {
            let list = target.entry(key.clone()).or_insert(Value::Null);
            if !list.is_array() {
                *list = Value::Array(Vec::new());
            }
            let Value::Array(items) = list else {
                return;
            };

            let position = items.iter().position(|item| {
                item.get(match_key).and_then(Value::as_str) == Some(match_value.as_str())
            });
            let index = position.unwrap_or_else(|| {
                let mut item = Document::new();
                item.insert(match_key.clone(), Value::String(match_value.clone()));
                items.push(Value::Object(item));
                items.len() - 1
            });

            if let Some(Value::Object(item)) = items.get_mut(index) {
                insert(item, rest, value);
            }
        }
    }
}
