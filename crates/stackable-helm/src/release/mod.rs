//! Installing, upgrading and rolling back chart releases.
//!
//! The heavy lifting (rendering templates and talking to the Kubernetes API)
//! is done by a [`ChartEngine`]. The [`ReleaseManager`] decides which engine
//! operations to run and feeds them resolved values and the manifest
//! post-renderer.
use async_trait::async_trait;
use strum::{Display, EnumString};

use crate::{
    chart::{Chart, ChartReference},
    manifest::PostRenderer,
    values::Document,
};

mod manager;

pub use manager::*;

/// The status of a release revision.
#[derive(Clone, Copy, Debug, Default, Display, EnumString, PartialEq, Eq)]
#[strum(serialize_all = "kebab-case")]
pub enum ReleaseStatus {
    #[default]
    Unknown,
    Deployed,
    Uninstalled,
    Superseded,
    Failed,
    Uninstalling,
    PendingInstall,
    PendingUpgrade,
    PendingRollback,
}

impl ReleaseStatus {
    /// Returns `true` while another operation is working on the release.
    pub fn is_pending(self) -> bool {
        matches!(
            self,
            Self::PendingInstall | Self::PendingUpgrade | Self::PendingRollback
        )
    }
}

/// A single revision of a release.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Release {
    pub name: String,
    pub namespace: String,
    pub revision: u32,
    pub status: ReleaseStatus,
    pub chart_name: String,
    pub chart_version: String,
    pub app_version: Option<String>,
}

/// Options shared by all release operations.
#[cfg_attr(feature = "clap", derive(clap::Args))]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReleaseOptions {
    /// The namespace of the release.
    #[cfg_attr(
        feature = "clap",
        arg(long, short = 'n', env = "HELM_NAMESPACE", default_value = "default")
    )]
    pub namespace: String,

    /// Time in seconds to wait for any individual Kubernetes operation.
    #[cfg_attr(
        feature = "clap",
        arg(long = "timeout", value_name = "SECONDS", env, default_value_t = DEFAULT_TIMEOUT_SECONDS)
    )]
    pub timeout_seconds: u64,

    /// Roll back to the previous revision if an upgrade fails.
    #[cfg_attr(feature = "clap", arg(long, env))]
    pub atomic: bool,

    /// Wait until all resources of the release are ready.
    #[cfg_attr(feature = "clap", arg(long, env))]
    pub wait: bool,

    /// Create the release namespace if it does not exist yet.
    #[cfg_attr(feature = "clap", arg(long, env))]
    pub create_namespace: bool,
}

/// The default timeout, matching the one of `helm install`.
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 300;

impl Default for ReleaseOptions {
    fn default() -> Self {
        Self {
            namespace: "default".to_owned(),
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            atomic: false,
            wait: false,
            create_namespace: false,
        }
    }
}

/// Everything the engine needs to render and apply a chart.
#[derive(Clone, Copy)]
pub struct ChartDeployment<'a> {
    pub release_name: &'a str,
    pub chart: &'a Chart,
    pub values: &'a Document,
    pub options: &'a ReleaseOptions,

    /// Applied to the rendered manifests before they are sent to the cluster.
    pub post_renderer: &'a dyn PostRenderer,
}

/// The chart rendering and release storage backend, e.g. a Helm library binding.
//
// We still need to use the async-trait crate, as dynamic dispatch is not
// supported in combination with async functions.
#[async_trait]
pub trait ChartEngine: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn load_chart(&self, reference: &ChartReference) -> Result<Chart, Self::Error>;

    /// Returns the latest revision of the release, `None` if it never existed.
    async fn get_release(&self, name: &str, namespace: &str)
    -> Result<Option<Release>, Self::Error>;

    async fn list_releases(&self, namespace: &str) -> Result<Vec<Release>, Self::Error>;

    /// Returns all revisions of the release, oldest first.
    async fn history(&self, name: &str, namespace: &str) -> Result<Vec<Release>, Self::Error>;

    async fn install(&self, deployment: ChartDeployment<'_>) -> Result<Release, Self::Error>;

    async fn upgrade(&self, deployment: ChartDeployment<'_>) -> Result<Release, Self::Error>;

    async fn rollback(
        &self,
        name: &str,
        revision: u32,
        options: &ReleaseOptions,
    ) -> Result<Release, Self::Error>;

    async fn uninstall(&self, name: &str, options: &ReleaseOptions)
    -> Result<Release, Self::Error>;
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("deployed", ReleaseStatus::Deployed, false)]
    #[case("pending-install", ReleaseStatus::PendingInstall, true)]
    #[case("pending-upgrade", ReleaseStatus::PendingUpgrade, true)]
    #[case("pending-rollback", ReleaseStatus::PendingRollback, true)]
    #[case("uninstalling", ReleaseStatus::Uninstalling, false)]
    fn release_status(#[case] input: &str, #[case] status: ReleaseStatus, #[case] pending: bool) {
        assert_eq!(ReleaseStatus::from_str(input).unwrap(), status);
        assert_eq!(status.to_string(), input);
        assert_eq!(status.is_pending(), pending);
    }
}
