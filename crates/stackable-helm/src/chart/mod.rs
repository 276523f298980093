//! Chart references and the chart metadata needed to reason about releases.
use std::{ffi::OsStr, fmt::Display, path::PathBuf, str::FromStr};

use semver::VersionReq;
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu, ensure};
use url::Url;

use crate::values::Document;

mod dependencies;

pub use dependencies::*;

const OCI_SCHEME_PREFIX: &str = "oci://";
const PACKAGED_CHART_EXTENSION: &str = ".tgz";

#[derive(Debug, Snafu)]
pub enum ChartReferenceError {
    #[snafu(display("chart reference cannot be empty"))]
    Empty,

    #[snafu(display("failed to parse OCI chart reference {input:?}"))]
    InvalidOciReference {
        source: url::ParseError,
        input: String,
    },

    #[snafu(display("OCI chart reference {input:?} must include a repository path"))]
    MissingOciPath { input: String },

    #[snafu(display(
        "invalid chart reference {input:?}, expected NAME, REPOSITORY/NAME, a local path or an OCI reference"
    ))]
    InvalidName { input: String },

    #[snafu(display("failed to parse chart version constraint {input:?}"))]
    InvalidVersionConstraint {
        source: semver::Error,
        input: String,
    },
}

/// Where a chart is loaded from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChartSource {
    /// A chart directory or packaged (`.tgz`) chart on the local filesystem.
    Local(PathBuf),

    /// A chart from a chart repository, either qualified (`stable/nginx`) or
    /// looked up in all configured repositories (`nginx`).
    Repository {
        repository: Option<String>,
        name: String,
    },

    /// A chart stored in an OCI registry, e.g. `oci://registry.example.com/charts/nginx:1.2.3`.
    Oci { url: Url, tag: Option<String> },
}

/// A chart specification as given by a user, plus an optional version constraint.
///
/// ```
/// use std::str::FromStr;
/// use stackable_helm::chart::{ChartReference, ChartSource};
///
/// let reference = ChartReference::from_str("stackable/trino-operator")
///     .unwrap()
///     .with_version("^25.3")
///     .unwrap();
///
/// assert_eq!(reference.source, ChartSource::Repository {
///     repository: Some("stackable".to_owned()),
///     name: "trino-operator".to_owned(),
/// });
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChartReference {
    pub source: ChartSource,
    pub version: Option<VersionReq>,
}

impl ChartReference {
    /// Constrains the chart version. An empty constraint removes the constraint.
    pub fn with_version(mut self, constraint: &str) -> Result<Self, ChartReferenceError> {
        let constraint = constraint.trim();
        self.version = if constraint.is_empty() {
            None
        } else {
            Some(
                VersionReq::parse(constraint)
                    .context(InvalidVersionConstraintSnafu { input: constraint })?,
            )
        };
        Ok(self)
    }

    /// The name of the chart, as far as it can be derived from the reference.
    pub fn name(&self) -> Option<&str> {
        match &self.source {
            ChartSource::Local(path) => path
                .file_name()
                .and_then(OsStr::to_str)
                .map(|name| name.trim_end_matches(PACKAGED_CHART_EXTENSION)),
            ChartSource::Repository { name, .. } => Some(name),
            ChartSource::Oci { url, .. } => url.path_segments()?.next_back(),
        }
    }
}

impl FromStr for ChartReference {
    type Err = ChartReferenceError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let input = input.trim();
        ensure!(!input.is_empty(), EmptySnafu);

        let source = if let Some(rest) = input.strip_prefix(OCI_SCHEME_PREFIX) {
            parse_oci_reference(input, rest)?
        } else if is_local_path(input) {
            ChartSource::Local(PathBuf::from(input))
        } else {
            match input.split('/').collect::<Vec<_>>()[..] {
                [name] => ChartSource::Repository {
                    repository: None,
                    name: name.to_owned(),
                },
                [repository, name] if !repository.is_empty() && !name.is_empty() => {
                    ChartSource::Repository {
                        repository: Some(repository.to_owned()),
                        name: name.to_owned(),
                    }
                }
                _ => return InvalidNameSnafu { input }.fail(),
            }
        };

        Ok(Self {
            source,
            version: None,
        })
    }
}

impl Display for ChartReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.source {
            ChartSource::Local(path) => write!(f, "{}", path.display())?,
            ChartSource::Repository {
                repository: Some(repository),
                name,
            } => write!(f, "{repository}/{name}")?,
            ChartSource::Repository {
                repository: None,
                name,
            } => write!(f, "{name}")?,
            ChartSource::Oci { url, tag: Some(tag) } => write!(f, "{url}:{tag}")?,
            ChartSource::Oci { url, tag: None } => write!(f, "{url}")?,
        }

        if let Some(version) = &self.version {
            write!(f, " ({version})")?;
        }
        Ok(())
    }
}

fn is_local_path(input: &str) -> bool {
    input.starts_with('/')
        || input.starts_with("./")
        || input.starts_with("../")
        || input == "."
        || input.ends_with(PACKAGED_CHART_EXTENSION)
}

fn parse_oci_reference(input: &str, rest: &str) -> Result<ChartSource, ChartReferenceError> {
    // The tag can only be part of the last path segment, registries may use ports
    let (path, tag) = match rest.rsplit_once('/') {
        Some((registry_path, last)) => match last.split_once(':') {
            Some((name, tag)) => (format!("{registry_path}/{name}"), Some(tag.to_owned())),
            None => (rest.to_owned(), None),
        },
        None => return MissingOciPathSnafu { input }.fail(),
    };

    let url = Url::parse(&format!("{OCI_SCHEME_PREFIX}{path}"))
        .context(InvalidOciReferenceSnafu { input })?;
    ensure!(
        url.path_segments()
            .is_some_and(|mut segments| segments.all(|segment| !segment.is_empty())),
        MissingOciPathSnafu { input }
    );

    Ok(ChartSource::Oci { url, tag })
}

/// The subset of `Chart.yaml` relevant for installing charts.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartMetadata {
    pub name: String,
    pub version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<Dependency>,
}

/// A dependency declared in `Chart.yaml`.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Dependency {
    pub name: String,

    /// A semver range, e.g. `~1.2.3` or `>=1.0.0 <2.0.0`.
    #[serde(default)]
    pub version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

/// A loaded chart.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Chart {
    pub metadata: ChartMetadata,

    /// The default values shipped with the chart (`values.yaml`).
    pub values: Document,

    /// The sub-charts shipped in the `charts/` directory.
    pub dependencies: Vec<Chart>,
}
