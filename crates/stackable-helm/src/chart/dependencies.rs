use semver::{Version, VersionReq};
use snafu::{OptionExt, ResultExt, Snafu};

use crate::chart::{Chart, Dependency};

#[derive(Debug, Snafu)]
pub enum DependencyProblem {
    #[snafu(display("dependency {name:?} is missing from the charts directory"))]
    Missing { name: String },

    #[snafu(display("dependency {name:?} has an invalid version constraint {constraint:?}"))]
    InvalidConstraint {
        source: semver::Error,
        name: String,
        constraint: String,
    },

    #[snafu(display("sub-chart {name:?} has an invalid version {version:?}"))]
    InvalidVersion {
        source: semver::Error,
        name: String,
        version: String,
    },

    #[snafu(display("sub-chart {name:?} version {version} does not satisfy {constraint:?}"))]
    VersionMismatch {
        name: String,
        version: Version,
        constraint: String,
    },
}

#[derive(Debug, Snafu)]
#[snafu(display(
    "chart {chart:?} has unsatisfied dependencies: {}",
    problems.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
))]
pub struct DependencyError {
    pub chart: String,
    pub problems: Vec<DependencyProblem>,
}

/// Checks that every dependency declared by `chart` is shipped as a sub-chart
/// in a version satisfying the declared range.
///
/// All problems are collected, so that users can fix them in one go.
pub fn check_dependencies(chart: &Chart) -> Result<(), DependencyError> {
    let problems = chart
        .metadata
        .dependencies
        .iter()
        .filter_map(|dependency| check_dependency(chart, dependency).err())
        .collect::<Vec<_>>();

    if problems.is_empty() {
        return Ok(());
    }

    tracing::debug!(
        chart = %chart.metadata.name,
        problems = problems.len(),
        "chart dependencies are not satisfied"
    );
    DependencySnafu {
        chart: chart.metadata.name.clone(),
        problems,
    }
    .fail()
}

fn check_dependency(chart: &Chart, dependency: &Dependency) -> Result<(), DependencyProblem> {
    let name = &dependency.name;
    let sub_chart = chart
        .dependencies
        .iter()
        .find(|sub_chart| &sub_chart.metadata.name == name)
        .context(MissingSnafu { name })?;

    let version = Version::parse(&sub_chart.metadata.version).context(InvalidVersionSnafu {
        name,
        version: &sub_chart.metadata.version,
    })?;

    let constraint = &dependency.version;
    let satisfied = parse_constraint(constraint)
        .context(InvalidConstraintSnafu { name, constraint })?
        .iter()
        .any(|alternative| alternative.matches(&version));

    if satisfied {
        Ok(())
    } else {
        VersionMismatchSnafu {
            name,
            version,
            constraint,
        }
        .fail()
    }
}

/// Parses a chart dependency range.
///
/// Chart ranges separate comparators by whitespace and alternatives by `||`,
/// allow a space between an operator and its version and support hyphen ranges
/// (`1.2.3 - 1.4.0`), while [`VersionReq`] expects comma separated comparators.
fn parse_constraint(constraint: &str) -> Result<Vec<VersionReq>, semver::Error> {
    let constraint = constraint.trim();
    if constraint.is_empty() {
        return Ok(vec![VersionReq::STAR]);
    }

    constraint
        .split("||")
        .map(|alternative| VersionReq::parse(&normalize_comparators(alternative)))
        .collect()
}

fn normalize_comparators(alternative: &str) -> String {
    let mut tokens = alternative
        .split([' ', ','])
        .filter(|token| !token.is_empty())
        .peekable();
    let mut comparators = Vec::new();

    while let Some(token) = tokens.next() {
        if is_operator(token) {
            // `>= 1.0.0`
            let version = tokens.next().unwrap_or_default();
            comparators.push(format!("{token}{version}"));
        } else if tokens.next_if_eq(&"-").is_some() {
            // `1.2.3 - 1.4.0`, a missing upper bound is left for VersionReq to reject
            comparators.push(format!(">={token}"));
            let upper = tokens
                .next()
                .map_or_else(|| "-".to_owned(), |upper| format!("<={upper}"));
            comparators.push(upper);
        } else {
            comparators.push(token.to_owned());
        }
    }

    comparators.join(", ")
}

fn is_operator(token: &str) -> bool {
    token
        .chars()
        .all(|character| matches!(character, '=' | '<' | '>' | '~' | '^'))
}
