//! Layered Helm values.
//!
//! Values reach a chart from several sources which are folded into a single
//! [`Document`] with a well-defined precedence, lowest to highest:
//!
//! 1. values mapped from resource metadata (see [`build_mapped_values`]),
//! 2. the inline `values.yaml` document,
//! 3. the override flags (`--values`, `--set-json`, `--set`, `--set-string`
//!    and `--set-file`, see [`ValueOverrides`]),
//! 4. a final mapped values document which always wins.
//!
//! The folding itself is done by [`merge`], which reconciles lists of named
//! items (such as containers) instead of replacing them wholesale.
use serde_json::{Map, Value};
use snafu::{ResultExt, Snafu};

mod getter;
mod merge;
mod overrides;
mod path;
mod resolver;
mod strvals;

pub use getter::*;
pub use merge::{merge, merge_lists};
pub use overrides::*;
pub use path::*;
pub use resolver::*;
pub use strvals::{ParseError as StrvalsError, ValueMode};

/// A generic, string-keyed values document.
///
/// Nested documents are [`Value::Object`]s, lists are [`Value::Array`]s.
pub type Document = Map<String, Value>;

#[derive(Debug, Snafu)]
pub enum DocumentError {
    #[snafu(display("failed to parse values document"))]
    ParseYaml { source: serde_yaml::Error },

    #[snafu(display("values document must be a map, got {found}"))]
    NotAMap { found: &'static str },

    #[snafu(display("failed to serialize values document"))]
    SerializeYaml { source: serde_yaml::Error },
}

/// Parses YAML (or JSON, which is a subset) into a [`Document`].
///
/// Empty input and documents only containing comments produce an empty
/// document.
pub fn parse_document(input: &str) -> Result<Document, DocumentError> {
    if input.trim().is_empty() {
        return Ok(Document::new());
    }

    let value: Value = serde_yaml::from_str(input).context(ParseYamlSnafu)?;
    match value {
        Value::Null => Ok(Document::new()),
        Value::Object(document) => Ok(document),
        other => NotAMapSnafu {
            found: value_kind(&other),
        }
        .fail(),
    }
}

/// Serializes a [`Document`] as YAML without a leading document separator.
pub fn to_yaml_string(document: &Document) -> Result<String, DocumentError> {
    serde_yaml::to_string(document).context(SerializeYamlSnafu)
}

/// Looks up a nested value by walking `keys` through nested maps.
pub fn lookup<'a>(document: &'a Document, keys: &[&str]) -> Option<&'a Value> {
    let (first, rest) = keys.split_first()?;
    rest.iter()
        .try_fold(document.get(*first)?, |value, key| value.get(*key))
}

pub(crate) fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "map",
    }
}
