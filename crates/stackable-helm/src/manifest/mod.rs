//! Post-processing of rendered manifests.
//!
//! Rendered charts are a stream of YAML (or JSON) documents. The
//! [`ManifestRelabeler`] splits this stream with a [`DocumentSplitter`] and
//! injects [`OwnershipLabels`](crate::kvp::OwnershipLabels) into every object
//! and, for known workloads, into their pod template as well.
use std::collections::BTreeMap;

mod relabel;
mod splitter;
mod workload;

pub use relabel::*;
pub use splitter::*;
pub use workload::*;

use crate::BoxError;

/// Rewrites the manifests rendered by a chart engine before they are applied.
pub trait PostRenderer: Send + Sync {
    fn post_render(&self, manifests: &[u8]) -> Result<Vec<u8>, BoxError>;
}

/// Returns the union of `existing` and `new` labels, `new` wins on conflicts.
pub fn add_labels(
    existing: Option<&BTreeMap<String, String>>,
    new: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut labels = existing.cloned().unwrap_or_default();
    labels.extend(new.iter().map(|(key, value)| (key.clone(), value.clone())));
    labels
}
