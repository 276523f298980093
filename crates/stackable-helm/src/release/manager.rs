use snafu::{ResultExt, Snafu};

use crate::{
    chart::{ChartReference, DependencyError, check_dependencies},
    kvp::OwnershipLabels,
    manifest::ManifestRelabeler,
    release::{ChartDeployment, ChartEngine, Release, ReleaseOptions, ReleaseStatus},
    values::{Getters, ResolveError, ValueSources},
};

#[derive(Debug, Snafu)]
pub enum ReleaseError<E>
where
    E: std::error::Error + 'static,
{
    #[snafu(display("failed to load chart {chart}"))]
    LoadChart { source: E, chart: String },

    #[snafu(display("failed to check dependencies of chart {chart}"))]
    CheckDependencies {
        source: DependencyError,
        chart: String,
    },

    #[snafu(display("failed to resolve values for release {release:?}"))]
    ResolveValues {
        source: ResolveError,
        release: String,
    },

    #[snafu(display("failed to get release {release:?} in namespace {namespace:?}"))]
    GetRelease {
        source: E,
        release: String,
        namespace: String,
    },

    #[snafu(display("failed to list releases in namespace {namespace:?}"))]
    ListReleases { source: E, namespace: String },

    #[snafu(display("failed to get history of release {release:?}"))]
    History { source: E, release: String },

    #[snafu(display(
        "another operation (install/upgrade/rollback) is in progress for release {release:?} ({status})"
    ))]
    OperationInProgress {
        release: String,
        status: ReleaseStatus,
    },

    #[snafu(display("failed to install release {release:?}"))]
    Install { source: E, release: String },

    #[snafu(display("failed to upgrade release {release:?}"))]
    Upgrade { source: E, release: String },

    #[snafu(display(
        "failed to upgrade release {release:?} ({upgrade_error}) and failed to roll back to revision {revision}"
    ))]
    RollbackFailedUpgrade {
        source: E,
        upgrade_error: E,
        release: String,
        revision: u32,
    },

    #[snafu(display("failed to roll back release {release:?} to revision {revision}"))]
    Rollback {
        source: E,
        release: String,
        revision: u32,
    },

    #[snafu(display("failed to uninstall release {release:?}"))]
    Uninstall { source: E, release: String },
}

/// A request to install a chart, or upgrade the release if it exists already.
#[derive(Clone, Debug)]
pub struct ReleaseRequest {
    pub release_name: String,
    pub chart: ChartReference,
    pub values: ValueSources,
    pub labels: OwnershipLabels,
    pub options: ReleaseOptions,
}

/// Drives release operations through a [`ChartEngine`].
pub struct ReleaseManager<E> {
    engine: E,
    getters: Getters,
}

impl<E: ChartEngine> ReleaseManager<E> {
    pub fn new(engine: E) -> Self {
        Self::with_getters(engine, Getters::default())
    }

    /// Uses `getters` to read values files and `--set-file` overrides.
    pub fn with_getters(engine: E, getters: Getters) -> Self {
        Self { engine, getters }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Installs the chart, or upgrades the release if it is already deployed.
    ///
    /// Releases which never existed or were uninstalled are installed. If
    /// another operation is still pending on the release, nothing is done.
    /// If an upgrade fails and [`ReleaseOptions::atomic`] is set, the release
    /// is rolled back to the previously deployed revision and the upgrade
    /// error is returned.
    pub async fn install_or_upgrade(
        &self,
        request: &ReleaseRequest,
    ) -> Result<Release, ReleaseError<E::Error>> {
        let release_name = request.release_name.as_str();
        let namespace = request.options.namespace.as_str();

        let chart = self
            .engine
            .load_chart(&request.chart)
            .await
            .with_context(|_| LoadChartSnafu {
                chart: request.chart.to_string(),
            })?;
        check_dependencies(&chart).with_context(|_| CheckDependenciesSnafu {
            chart: request.chart.to_string(),
        })?;

        let values = request
            .values
            .resolve(&self.getters)
            .context(ResolveValuesSnafu {
                release: release_name,
            })?;

        let existing = self
            .engine
            .get_release(release_name, namespace)
            .await
            .context(GetReleaseSnafu {
                release: release_name,
                namespace,
            })?;

        let relabeler = ManifestRelabeler::new(&request.labels);
        let deployment = ChartDeployment {
            release_name,
            chart: &chart,
            values: &values,
            options: &request.options,
            post_renderer: &relabeler,
        };

        let current = match existing {
            Some(current) if current.status.is_pending() => {
                return OperationInProgressSnafu {
                    release: release_name,
                    status: current.status,
                }
                .fail();
            }
            Some(current) if current.status != ReleaseStatus::Uninstalled => current,
            _ => {
                tracing::info!(
                    release = release_name,
                    namespace,
                    chart = %request.chart,
                    "installing release"
                );
                return self
                    .engine
                    .install(deployment)
                    .await
                    .context(InstallSnafu {
                        release: release_name,
                    });
            }
        };

        tracing::info!(
            release = release_name,
            namespace,
            chart = %request.chart,
            revision = current.revision,
            "upgrading release"
        );
        self.upgrade(deployment, &current).await
    }

    /// Upgrades the `current` release, rolling back to it on failure if the
    /// upgrade is atomic.
    async fn upgrade(
        &self,
        deployment: ChartDeployment<'_>,
        current: &Release,
    ) -> Result<Release, ReleaseError<E::Error>> {
        let release_name = deployment.release_name;
        let upgrade_error = match self.engine.upgrade(deployment).await {
            Ok(release) => return Ok(release),
            Err(err) if deployment.options.atomic => err,
            Err(err) => {
                return Err(err).context(UpgradeSnafu {
                    release: release_name,
                });
            }
        };

        tracing::warn!(
            release = release_name,
            revision = current.revision,
            error = &upgrade_error as &dyn std::error::Error,
            "upgrade failed, rolling back"
        );
        match self
            .engine
            .rollback(release_name, current.revision, deployment.options)
            .await
        {
            Ok(_) => Err(upgrade_error).context(UpgradeSnafu {
                release: release_name,
            }),
            Err(err) => Err(err).context(RollbackFailedUpgradeSnafu {
                upgrade_error,
                release: release_name,
                revision: current.revision,
            }),
        }
    }

    pub async fn rollback(
        &self,
        release_name: &str,
        revision: u32,
        options: &ReleaseOptions,
    ) -> Result<Release, ReleaseError<E::Error>> {
        tracing::info!(
            release = release_name,
            namespace = %options.namespace,
            revision,
            "rolling back release"
        );
        self.engine
            .rollback(release_name, revision, options)
            .await
            .context(RollbackSnafu {
                release: release_name,
                revision,
            })
    }

    pub async fn get(
        &self,
        release_name: &str,
        namespace: &str,
    ) -> Result<Option<Release>, ReleaseError<E::Error>> {
        self.engine
            .get_release(release_name, namespace)
            .await
            .context(GetReleaseSnafu {
                release: release_name,
                namespace,
            })
    }

    pub async fn list(&self, namespace: &str) -> Result<Vec<Release>, ReleaseError<E::Error>> {
        let releases = self
            .engine
            .list_releases(namespace)
            .await
            .context(ListReleasesSnafu { namespace })?;

        tracing::debug!(namespace, releases = releases.len(), "listed releases");
        Ok(releases)
    }

    pub async fn history(
        &self,
        release_name: &str,
        namespace: &str,
    ) -> Result<Vec<Release>, ReleaseError<E::Error>> {
        self.engine
            .history(release_name, namespace)
            .await
            .context(HistorySnafu {
                release: release_name,
            })
    }

    pub async fn uninstall(
        &self,
        release_name: &str,
        options: &ReleaseOptions,
    ) -> Result<Release, ReleaseError<E::Error>> {
        tracing::info!(
            release = release_name,
            namespace = %options.namespace,
            "uninstalling release"
        );
        self.engine
            .uninstall(release_name, options)
            .await
            .context(UninstallSnafu {
                release: release_name,
            })
    }
}
