use std::collections::BTreeMap;

use k8s_openapi::api::{
    apps::v1::{DaemonSet, Deployment, StatefulSet},
    batch::v1::{CronJob, Job},
    core::v1::PodTemplateSpec,
};
use kube::core::{DynamicObject, TypeMeta};
use serde::{Serialize, de::DeserializeOwned};
use snafu::{ResultExt, Snafu};

use crate::manifest::add_labels;

#[derive(Debug, Snafu)]
pub enum WorkloadError {
    #[snafu(display("failed to parse dynamic object as {kind}"))]
    ParseWorkload {
        source: kube::core::dynamic::ParseDynamicObjectError,
        kind: WorkloadKind,
    },

    #[snafu(display("failed to serialize {kind}"))]
    SerializeWorkload {
        source: serde_json::Error,
        kind: WorkloadKind,
    },

    #[snafu(display("failed to convert {kind} back into a dynamic object"))]
    ConvertWorkload {
        source: serde_json::Error,
        kind: WorkloadKind,
    },
}

/// The workload kinds whose pod template receives labels, everything else is
/// [`WorkloadKind::Other`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
pub enum WorkloadKind {
    Deployment,
    StatefulSet,
    DaemonSet,
    Job,
    CronJob,
    Other,
}

impl WorkloadKind {
    /// Classifies an object by its `apiVersion` and `kind`.
    pub fn of(types: Option<&TypeMeta>) -> Self {
        types
            .and_then(|types| {
                WORKLOADS.iter().find(|workload| {
                    workload.api_version == types.api_version && workload.kind == types.kind
                })
            })
            .map_or(Self::Other, |workload| workload.workload)
    }

    /// Merges `labels` into the pod template of the workload.
    ///
    /// The object is parsed into its typed representation and converted back
    /// afterwards. [`WorkloadKind::Other`] objects are returned unchanged.
    pub fn label_pod_template(
        self,
        object: DynamicObject,
        labels: &BTreeMap<String, String>,
    ) -> Result<DynamicObject, WorkloadError> {
        match WORKLOADS.iter().find(|workload| workload.workload == self) {
            Some(workload) => (workload.label_pod_template)(object, labels),
            None => Ok(object),
        }
    }
}

struct WorkloadHandler {
    api_version: &'static str,
    kind: &'static str,
    workload: WorkloadKind,
    label_pod_template:
        fn(DynamicObject, &BTreeMap<String, String>) -> Result<DynamicObject, WorkloadError>,
}

const WORKLOADS: &[WorkloadHandler] = &[
    WorkloadHandler {
        api_version: "apps/v1",
        kind: "Deployment",
        workload: WorkloadKind::Deployment,
        label_pod_template: label_pod_template::<Deployment>,
    },
    WorkloadHandler {
        api_version: "apps/v1",
        kind: "StatefulSet",
        workload: WorkloadKind::StatefulSet,
        label_pod_template: label_pod_template::<StatefulSet>,
    },
    WorkloadHandler {
        api_version: "apps/v1",
        kind: "DaemonSet",
        workload: WorkloadKind::DaemonSet,
        label_pod_template: label_pod_template::<DaemonSet>,
    },
    WorkloadHandler {
        api_version: "batch/v1",
        kind: "Job",
        workload: WorkloadKind::Job,
        label_pod_template: label_pod_template::<Job>,
    },
    WorkloadHandler {
        api_version: "batch/v1",
        kind: "CronJob",
        workload: WorkloadKind::CronJob,
        label_pod_template: label_pod_template::<CronJob>,
    },
];

/// A typed workload which embeds exactly one pod template.
trait PodTemplateWorkload:
    kube::Resource<DynamicType = ()> + DeserializeOwned + Serialize
{
    const WORKLOAD: WorkloadKind;

    fn pod_template_mut(&mut self) -> Option<&mut PodTemplateSpec>;
}

impl PodTemplateWorkload for Deployment {
    const WORKLOAD: WorkloadKind = WorkloadKind::Deployment;

    fn pod_template_mut(&mut self) -> Option<&mut PodTemplateSpec> {
        self.spec.as_mut().map(|spec| &mut spec.template)
    }
}

impl PodTemplateWorkload for StatefulSet {
    const WORKLOAD: WorkloadKind = WorkloadKind::StatefulSet;

    fn pod_template_mut(&mut self) -> Option<&mut PodTemplateSpec> {
        self.spec.as_mut().map(|spec| &mut spec.template)
    }
}

impl PodTemplateWorkload for DaemonSet {
    const WORKLOAD: WorkloadKind = WorkloadKind::DaemonSet;

    fn pod_template_mut(&mut self) -> Option<&mut PodTemplateSpec> {
        self.spec.as_mut().map(|spec| &mut spec.template)
    }
}

impl PodTemplateWorkload for Job {
    const WORKLOAD: WorkloadKind = WorkloadKind::Job;

    fn pod_template_mut(&mut self) -> Option<&mut PodTemplateSpec> {
        self.spec.as_mut().map(|spec| &mut spec.template)
    }
}

impl PodTemplateWorkload for CronJob {
    const WORKLOAD: WorkloadKind = WorkloadKind::CronJob;

    fn pod_template_mut(&mut self) -> Option<&mut PodTemplateSpec> {
        self.spec
            .as_mut()
            .and_then(|spec| spec.job_template.spec.as_mut())
            .map(|spec| &mut spec.template)
    }
}

fn label_pod_template<K: PodTemplateWorkload>(
    object: DynamicObject,
    labels: &BTreeMap<String, String>,
) -> Result<DynamicObject, WorkloadError> {
    let kind = K::WORKLOAD;
    let mut workload: K = object.try_parse().context(ParseWorkloadSnafu { kind })?;

    // Workloads without a spec have no pod template to label
    if let Some(template) = workload.pod_template_mut() {
        let metadata = template.metadata.get_or_insert_with(Default::default);
        metadata.labels = Some(add_labels(metadata.labels.as_ref(), labels));
    }

    let value = serde_json::to_value(&workload).context(SerializeWorkloadSnafu { kind })?;
    serde_json::from_value(value).context(ConvertWorkloadSnafu { kind })
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    fn dynamic_object(yaml: &str) -> DynamicObject {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn labels() -> BTreeMap<String, String> {
        BTreeMap::from([("k".to_owned(), "v".to_owned())])
    }

    #[rstest]
    #[case("apps/v1", "Deployment", WorkloadKind::Deployment)]
    #[case("apps/v1", "StatefulSet", WorkloadKind::StatefulSet)]
    #[case("apps/v1", "DaemonSet", WorkloadKind::DaemonSet)]
    #[case("batch/v1", "Job", WorkloadKind::Job)]
    #[case("batch/v1", "CronJob", WorkloadKind::CronJob)]
    #[case("extensions/v1beta1", "Deployment", WorkloadKind::Other)]
    #[case("v1", "ConfigMap", WorkloadKind::Other)]
    fn classification(#[case] api_version: &str, #[case] kind: &str, #[case] expected: WorkloadKind) {
        let types = TypeMeta {
            api_version: api_version.to_owned(),
            kind: kind.to_owned(),
        };
        assert_eq!(WorkloadKind::of(Some(&types)), expected);
    }

    #[test]
    fn missing_types_are_other() {
        assert_eq!(WorkloadKind::of(None), WorkloadKind::Other);
    }

    #[test]
    fn deployment_pod_template() {
        let object = dynamic_object(indoc! {"
            apiVersion: apps/v1
            kind: Deployment
            metadata:
              name: web
            spec:
              selector:
                matchLabels:
                  app: web
              template:
                metadata:
                  labels:
                    app: web
                    k: old
                spec:
                  containers:
                    - name: web
                      image: nginx
        "});

        let labeled = WorkloadKind::Deployment
            .label_pod_template(object, &labels())
            .unwrap();

        assert_eq!(
            labeled.data["spec"]["template"]["metadata"]["labels"],
            json!({"app": "web", "k": "v"})
        );
        // Only the pod template is touched
        assert_eq!(labeled.metadata.labels, None);
    }

    #[test]
    fn cron_job_pod_template() {
        let object = dynamic_object(indoc! {"
            apiVersion: batch/v1
            kind: CronJob
            metadata:
              name: cleanup
            spec:
              schedule: '*/5 * * * *'
              jobTemplate:
                spec:
                  template:
                    spec:
                      restartPolicy: Never
                      containers:
                        - name: cleanup
                          image: busybox
        "});

        let labeled = WorkloadKind::CronJob
            .label_pod_template(object, &labels())
            .unwrap();

        assert_eq!(
            labeled.data["spec"]["jobTemplate"]["spec"]["template"]["metadata"]["labels"],
            json!({"k": "v"})
        );
    }

    #[test]
    fn workload_without_spec() {
        let object = dynamic_object(indoc! {"
            apiVersion: batch/v1
            kind: Job
            metadata:
              name: empty
        "});

        let labeled = WorkloadKind::Job
            .label_pod_template(object, &labels())
            .unwrap();
        assert!(labeled.data.get("spec").is_none());
    }

    #[test]
    fn malformed_workload() {
        let object = dynamic_object(indoc! {"
            apiVersion: apps/v1
            kind: StatefulSet
            metadata:
              name: broken
            spec:
              replicas: many
        "});

        let err = WorkloadKind::StatefulSet
            .label_pod_template(object, &labels())
            .unwrap_err();
        assert!(matches!(
            err,
            WorkloadError::ParseWorkload {
                kind: WorkloadKind::StatefulSet,
                ..
            }
        ));
    }

    #[test]
    fn other_objects_are_unchanged() {
        let object = dynamic_object(indoc! {"
            apiVersion: v1
            kind: ConfigMap
            metadata:
              name: config
            data:
              key: value
        "});

        let labeled = WorkloadKind::Other
            .label_pod_template(object.clone(), &labels())
            .unwrap();
        assert_eq!(labeled, object);
    }
}
