//! Validated Kubernetes labels which identify the component owning a manifest.
use std::{collections::BTreeMap, fmt::Display, ops::Deref, str::FromStr, sync::LazyLock};

use const_format::concatcp;
use regex::Regex;
use snafu::{OptionExt, ResultExt, Snafu, ensure};

/// The well-known Kubernetes app key prefix.
const K8S_APP_KEY_PREFIX: &str = "app.kubernetes.io/";

/// The well-known Kubernetes app component key `app.kubernetes.io/component`.
pub const K8S_APP_COMPONENT_KEY: &str = concatcp!(K8S_APP_KEY_PREFIX, "component");

/// The well-known Kubernetes app version key `app.kubernetes.io/version`.
pub const K8S_APP_VERSION_KEY: &str = concatcp!(K8S_APP_KEY_PREFIX, "version");

/// The well-known Kubernetes app managed-by key `app.kubernetes.io/managed-by`.
pub const K8S_APP_MANAGED_BY_KEY: &str = concatcp!(K8S_APP_KEY_PREFIX, "managed-by");

const KEY_PREFIX_MAX_LEN: usize = 253;
const LABEL_NAME_MAX_LEN: usize = 63;

// Lazily initialized regular expressions
static KEY_PREFIX_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z](\.?[a-zA-Z0-9-])*\.[a-zA-Z]{2,}\.?$")
        .expect("failed to compile key prefix regex")
});

// Key names and values share the same format, values may additionally be empty.
static LABEL_NAME_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9A-Z]([a-z0-9A-Z-_.]*[a-z0-9A-Z]+)?$")
        .expect("failed to compile label name regex")
});

#[derive(Debug, PartialEq, Snafu)]
pub enum LabelError {
    #[snafu(display("label key cannot be empty"))]
    EmptyKey,

    #[snafu(display("label key prefixes cannot be nested, only use a single slash"))]
    NestedPrefix,

    #[snafu(display(
        "label key prefix exceeds the maximum length - expected {KEY_PREFIX_MAX_LEN} characters or less, got {length}"
    ))]
    PrefixTooLong { length: usize },

    #[snafu(display("label key prefix {prefix:?} is not a valid DNS subdomain"))]
    PrefixInvalid { prefix: String },

    #[snafu(display(
        "{input:?} exceeds the maximum length - expected {LABEL_NAME_MAX_LEN} characters or less, got {length}"
    ))]
    TooLong { input: String, length: usize },

    #[snafu(display("{input:?} contains non-ascii characters"))]
    NotAscii { input: String },

    #[snafu(display("{input:?} violates the kubernetes label format"))]
    Invalid { input: String },

    #[snafu(display("invalid label key {key:?}"))]
    InvalidKey {
        #[snafu(source(from(LabelError, Box::new)))]
        source: Box<LabelError>,
        key: String,
    },

    #[snafu(display("invalid value for label {key:?}"))]
    InvalidValue {
        #[snafu(source(from(LabelError, Box::new)))]
        source: Box<LabelError>,
        key: String,
    },

    #[snafu(display("failed to parse label {input:?}, expected KEY=VALUE"))]
    MissingSeparator { input: String },
}

/// A validated label key of the form `(<PREFIX>/)<NAME>`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct LabelKey(String);

impl FromStr for LabelKey {
    type Err = LabelError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let input = input.trim();
        ensure!(!input.is_empty(), EmptyKeySnafu);

        let (prefix, name) = match input.split('/').collect::<Vec<_>>()[..] {
            [name] => (None, name),
            [prefix, name] => (Some(prefix), name),
            _ => return NestedPrefixSnafu.fail(),
        };

        if let Some(prefix) = prefix {
            ensure!(
                prefix.len() <= KEY_PREFIX_MAX_LEN,
                PrefixTooLongSnafu {
                    length: prefix.len()
                }
            );
            ensure!(
                KEY_PREFIX_REGEX.is_match(prefix),
                PrefixInvalidSnafu { prefix }
            );
        }

        ensure!(!name.is_empty(), EmptyKeySnafu);
        validate_name(name)?;

        Ok(Self(input.to_owned()))
    }
}

impl Deref for LabelKey {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Display for LabelKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A validated label value. Values can be empty.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct LabelValue(String);

impl FromStr for LabelValue {
    type Err = LabelError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        if !input.is_empty() {
            validate_name(input)?;
        }

        Ok(Self(input.to_owned()))
    }
}

impl Deref for LabelValue {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Display for LabelValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn validate_name(input: &str) -> Result<(), LabelError> {
    ensure!(
        input.len() <= LABEL_NAME_MAX_LEN,
        TooLongSnafu {
            input,
            length: input.len()
        }
    );
    ensure!(input.is_ascii(), NotAsciiSnafu { input });
    ensure!(LABEL_NAME_REGEX.is_match(input), InvalidSnafu { input });

    Ok(())
}

/// The labels injected into every rendered manifest.
///
/// All keys and values are validated on insertion, so converting the labels
/// into a plain map always yields labels the API server accepts.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OwnershipLabels(BTreeMap<LabelKey, LabelValue>);

impl OwnershipLabels {
    /// Creates the `app.kubernetes.io/component` and `app.kubernetes.io/version`
    /// labels for the given component.
    pub fn new(component_name: &str, component_version: &str) -> Result<Self, LabelError> {
        let mut labels = Self::default();
        labels.try_insert(K8S_APP_COMPONENT_KEY, component_name)?;
        labels.try_insert(K8S_APP_VERSION_KEY, component_version)?;
        Ok(labels)
    }

    /// Validates and inserts a label, replacing any previous value of `key`.
    pub fn try_insert(&mut self, key: &str, value: &str) -> Result<&mut Self, LabelError> {
        let parsed_key = LabelKey::from_str(key).context(InvalidKeySnafu { key })?;
        let value = LabelValue::from_str(value).context(InvalidValueSnafu { key })?;

        self.0.insert(parsed_key, value);
        Ok(self)
    }

    /// Like [`Self::try_insert`], for labels given as `KEY=VALUE`.
    pub fn try_insert_pair(&mut self, input: &str) -> Result<&mut Self, LabelError> {
        let (key, value) = input
            .split_once('=')
            .context(MissingSeparatorSnafu { input })?;
        self.try_insert(key, value)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(key, value)| (key.deref(), value.deref()))
    }
}

impl TryFrom<BTreeMap<String, String>> for OwnershipLabels {
    type Error = LabelError;

    fn try_from(value: BTreeMap<String, String>) -> Result<Self, Self::Error> {
        let mut labels = Self::default();
        for (key, value) in &value {
            labels.try_insert(key, value)?;
        }
        Ok(labels)
    }
}

impl From<&OwnershipLabels> for BTreeMap<String, String> {
    fn from(value: &OwnershipLabels) -> Self {
        value
            .iter()
            .map(|(key, value)| (key.to_owned(), value.to_owned()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn component_labels() {
        let labels = OwnershipLabels::new("trino", "455.0.0").unwrap();

        assert_eq!(
            BTreeMap::from(&labels),
            BTreeMap::from([
                (K8S_APP_COMPONENT_KEY.to_owned(), "trino".to_owned()),
                (K8S_APP_VERSION_KEY.to_owned(), "455.0.0".to_owned()),
            ])
        );
    }

    #[test]
    fn extra_labels_replace_existing_ones() {
        let mut labels = OwnershipLabels::new("trino", "1.0.0").unwrap();
        labels
            .try_insert_pair("app.kubernetes.io/version=2.0.0")
            .unwrap()
            .try_insert("k", "v")
            .unwrap();

        assert_eq!(labels.len(), 3);
        assert!(labels.iter().any(|entry| entry == (K8S_APP_VERSION_KEY, "2.0.0")));
        assert!(labels.iter().any(|entry| entry == ("k", "v")));
    }

    #[rstest]
    #[case("k")]
    #[case("app.kubernetes.io/name")]
    #[case("stackable.tech/vendor")]
    #[case("a-b_c.d")]
    fn valid_keys(#[case] input: &str) {
        assert_eq!(&*LabelKey::from_str(input).unwrap(), input);
    }

    #[rstest]
    #[case("", LabelError::EmptyKey)]
    #[case("app.kubernetes.io/", LabelError::EmptyKey)]
    #[case("a/b/c", LabelError::NestedPrefix)]
    #[case("not_a_domain/name", LabelError::PrefixInvalid { prefix: "not_a_domain".to_owned() })]
    #[case("name-", LabelError::Invalid { input: "name-".to_owned() })]
    fn invalid_keys(#[case] input: &str, #[case] expected: LabelError) {
        assert_eq!(LabelKey::from_str(input).unwrap_err(), expected);
    }

    #[rstest]
    #[case("a".repeat(64), LabelError::TooLong { input: "a".repeat(64), length: 64 })]
    #[case("foo-".to_owned(), LabelError::Invalid { input: "foo-".to_owned() })]
    #[case("ä".to_owned(), LabelError::NotAscii { input: "ä".to_owned() })]
    fn invalid_values(#[case] input: String, #[case] expected: LabelError) {
        assert_eq!(LabelValue::from_str(&input).unwrap_err(), expected);
    }

    #[test]
    fn empty_values_are_allowed() {
        let mut labels = OwnershipLabels::default();
        labels.try_insert("empty", "").unwrap();
        assert_eq!(labels.iter().collect::<Vec<_>>(), [("empty", "")]);
    }

    #[test]
    fn invalid_component_version() {
        let err = OwnershipLabels::new("trino", "1.0.0+build/1").unwrap_err();
        assert!(
            matches!(err, LabelError::InvalidValue { ref key, .. } if key == K8S_APP_VERSION_KEY)
        );
    }

    #[test]
    fn pair_without_separator() {
        let err = OwnershipLabels::default()
            .try_insert_pair("novalue")
            .unwrap_err();
        assert_eq!(
            err,
            LabelError::MissingSeparator {
                input: "novalue".to_owned()
            }
        );
    }
}
