use std::{collections::BTreeMap, io::Read};

use kube::core::DynamicObject;
use snafu::{ResultExt, Snafu};

use crate::{
    BoxError,
    kvp::OwnershipLabels,
    manifest::{
        DecodeError, DocumentSplitter, PostRenderer, WorkloadError, WorkloadKind, add_labels,
    },
};

const DOCUMENT_TERMINATOR: &[u8] = b"---\n";

#[derive(Debug, Snafu)]
pub enum RelabelError {
    #[snafu(display("failed to decode manifest #{index}"))]
    DecodeManifest {
        source: serde_yaml::Error,
        index: usize,
    },

    #[snafu(display("failed to convert manifest #{index} into a Kubernetes object"))]
    ConvertManifest {
        source: serde_json::Error,
        index: usize,
    },

    #[snafu(display("failed to add labels to {kind} (manifest #{index})"))]
    AddLabels {
        source: WorkloadError,
        kind: WorkloadKind,
        index: usize,
    },

    #[snafu(display("failed to serialize manifest #{index}"))]
    SerializeManifest {
        source: serde_yaml::Error,
        index: usize,
    },

    #[snafu(display("failed to split manifest stream"))]
    SplitStream { source: DecodeError },
}

/// Injects [`OwnershipLabels`] into a stream of rendered manifests.
///
/// Every object receives the labels in its own `metadata.labels`. Deployments,
/// StatefulSets, DaemonSets, Jobs and CronJobs additionally receive them in
/// their pod template, so that the pods they create carry the labels too.
#[derive(Clone, Debug)]
pub struct ManifestRelabeler {
    labels: BTreeMap<String, String>,
}

impl ManifestRelabeler {
    pub fn new(labels: &OwnershipLabels) -> Self {
        Self {
            labels: labels.into(),
        }
    }

    /// Relabels all manifests in `manifests` and returns the rewritten stream.
    ///
    /// Empty documents are dropped. Each output document is terminated by a
    /// `---` line. Nothing is returned if any document fails.
    pub fn run(&self, manifests: impl Read) -> Result<Vec<u8>, RelabelError> {
        let mut output = Vec::new();

        for (index, document) in DocumentSplitter::new(manifests).enumerate() {
            let document = document.context(SplitStreamSnafu)?;
            let Some(relabeled) = self.relabel_document(index, &document)? else {
                tracing::trace!(index, "skipping empty manifest");
                continue;
            };

            output.extend_from_slice(relabeled.as_bytes());
            output.extend_from_slice(DOCUMENT_TERMINATOR);
        }

        Ok(output)
    }

    fn relabel_document(
        &self,
        index: usize,
        document: &[u8],
    ) -> Result<Option<String>, RelabelError> {
        if document.trim_ascii().is_empty() {
            return Ok(None);
        }

        let value: serde_json::Value =
            serde_yaml::from_slice(document).context(DecodeManifestSnafu { index })?;
        if value.is_null() {
            return Ok(None);
        }

        let object: DynamicObject =
            serde_json::from_value(value).context(ConvertManifestSnafu { index })?;
        let kind = WorkloadKind::of(object.types.as_ref());

        let mut object = kind
            .label_pod_template(object, &self.labels)
            .context(AddLabelsSnafu { kind, index })?;
        object.metadata.labels = Some(add_labels(object.metadata.labels.as_ref(), &self.labels));

        tracing::debug!(
            index,
            %kind,
            name = object.metadata.name.as_deref(),
            "relabeled manifest"
        );

        serde_yaml::to_string(&object)
            .map(Some)
            .context(SerializeManifestSnafu { index })
    }
}

impl PostRenderer for ManifestRelabeler {
    fn post_render(&self, manifests: &[u8]) -> Result<Vec<u8>, BoxError> {
        Ok(self.run(manifests)?)
    }
}
