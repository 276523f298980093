use snafu::{ResultExt, Snafu};

use crate::values::{
    Document, DocumentError, Getters, ReadError, StrvalsError, ValueMode, merge, parse_document,
    strvals,
};

#[derive(Debug, Snafu)]
pub enum OverrideError {
    #[snafu(display("failed to read values file {location:?}"))]
    ReadValuesFile { source: ReadError, location: String },

    #[snafu(display("values file {location:?} is not valid UTF-8"))]
    ValuesFileEncoding {
        source: std::string::FromUtf8Error,
        location: String,
    },

    #[snafu(display("failed to parse values file {location:?}"))]
    ParseValuesFile {
        source: DocumentError,
        location: String,
    },

    #[snafu(display("failed to parse --set-json data {input:?}"))]
    ParseSetJson { source: StrvalsError, input: String },

    #[snafu(display("failed to parse --set data {input:?}"))]
    ParseSet { source: StrvalsError, input: String },

    #[snafu(display("failed to parse --set-string data {input:?}"))]
    ParseSetString { source: StrvalsError, input: String },

    #[snafu(display("failed to parse --set-file data {input:?}"))]
    ParseSetFile { source: StrvalsError, input: String },
}

impl OverrideError {
    /// Returns `true` if the error was caused by reading a file, as opposed
    /// to parsing its (or an inline) content.
    pub fn is_io_error(&self) -> bool {
        match self {
            Self::ReadValuesFile { .. } => true,
            Self::ParseSetFile { source, .. } => matches!(source, StrvalsError::ReadFile { .. }),
            _ => false,
        }
    }
}

/// Values overrides as accepted by `helm install` and `helm upgrade`.
///
/// Sources are applied in the following order, later sources override
/// earlier ones:
///
/// 1. `--values` files, in the order they are listed,
/// 2. `--set-json`,
/// 3. `--set`,
/// 4. `--set-string`,
/// 5. `--set-file`.
#[cfg_attr(feature = "clap", derive(clap::Args))]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValueOverrides {
    /// Specify values in a YAML file or a URL (can specify multiple)
    #[cfg_attr(feature = "clap", arg(long = "values", short = 'f', value_name = "FILE"))]
    pub value_files: Vec<String>,

    /// Set JSON values on the command line (can specify multiple or separate values with commas: key1=jsonval1,key2=jsonval2)
    #[cfg_attr(feature = "clap", arg(long = "set-json", value_name = "KEY=JSON"))]
    pub json_values: Vec<String>,

    /// Set values on the command line (can specify multiple or separate values with commas: key1=val1,key2=val2)
    #[cfg_attr(feature = "clap", arg(long = "set", value_name = "KEY=VALUE"))]
    pub values: Vec<String>,

    /// Set STRING values on the command line (can specify multiple or separate values with commas: key1=val1,key2=val2)
    #[cfg_attr(feature = "clap", arg(long = "set-string", value_name = "KEY=VALUE"))]
    pub string_values: Vec<String>,

    /// Set values from respective files specified via the command line (can specify multiple or separate values with commas: key1=path1,key2=path2)
    #[cfg_attr(feature = "clap", arg(long = "set-file", value_name = "KEY=PATH"))]
    pub file_values: Vec<String>,
}

impl ValueOverrides {
    pub fn is_empty(&self) -> bool {
        self.value_files.is_empty()
            && self.json_values.is_empty()
            && self.values.is_empty()
            && self.string_values.is_empty()
            && self.file_values.is_empty()
    }

    /// Resolves all overrides into a single [`Document`].
    pub fn resolve(&self, getters: &Getters) -> Result<Document, OverrideError> {
        let mut resolved = Document::new();

        for location in &self.value_files {
            let content = getters
                .read(location)
                .context(ReadValuesFileSnafu { location })?;
            let content =
                String::from_utf8(content).context(ValuesFileEncodingSnafu { location })?;
            let document = parse_document(&content).context(ParseValuesFileSnafu { location })?;

            tracing::debug!(location, "merging values file");
            resolved = merge(resolved, document);
        }

        for input in &self.json_values {
            strvals::parse_into(input, &mut resolved, ValueMode::Json)
                .context(ParseSetJsonSnafu { input })?;
        }

        for input in &self.values {
            strvals::parse_into(input, &mut resolved, ValueMode::Typed)
                .context(ParseSetSnafu { input })?;
        }

        for input in &self.string_values {
            strvals::parse_into(input, &mut resolved, ValueMode::String)
                .context(ParseSetStringSnafu { input })?;
        }

        for input in &self.file_values {
            strvals::parse_into(input, &mut resolved, ValueMode::File(getters))
                .context(ParseSetFileSnafu { input })?;
        }

        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use indoc::indoc;
    use serde_json::{Value, json};
    use tempfile::NamedTempFile;

    use super::*;

    fn values_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn location(file: &NamedTempFile) -> String {
        file.path().display().to_string()
    }

    #[test]
    fn empty_overrides() {
        let overrides = ValueOverrides::default();

        assert!(overrides.is_empty());
        assert_eq!(
            overrides.resolve(&Getters::default()).unwrap(),
            Document::new()
        );
    }

    #[test]
    fn precedence() {
        let first = values_file(indoc! {"
            image:
              repository: nginx
              tag: '1.25'
            replicas: 1
            fromFile: first
        "});
        let second = values_file("replicas: 2\nfromFile: second\n");
        let script = values_file("#!/bin/sh\necho hello\n");

        let overrides = ValueOverrides {
            value_files: vec![location(&first), location(&second)],
            json_values: vec![r#"image.pullPolicy="Always",fromJson={"enabled": true}"#.to_owned()],
            values: vec!["image.tag=1.27,replicas=3".to_owned()],
            string_values: vec!["replicas=4".to_owned()],
            file_values: vec![format!("script={}", location(&script))],
        };

        let resolved = overrides.resolve(&Getters::default()).unwrap();
        assert_eq!(
            Value::Object(resolved),
            json!({
                "image": {"repository": "nginx", "tag": "1.27", "pullPolicy": "Always"},
                "replicas": "4",
                "fromFile": "second",
                "fromJson": {"enabled": true},
                "script": "#!/bin/sh\necho hello\n",
            })
        );
    }

    #[test]
    fn missing_values_file_is_an_io_error() {
        let overrides = ValueOverrides {
            value_files: vec!["/does/not/exist.yaml".to_owned()],
            ..Default::default()
        };

        let err = overrides.resolve(&Getters::default()).unwrap_err();
        assert!(err.is_io_error());
        assert!(matches!(err, OverrideError::ReadValuesFile { .. }));
    }

    #[test]
    fn malformed_values_file() {
        let file = values_file("foo: [bar");
        let overrides = ValueOverrides {
            value_files: vec![location(&file)],
            ..Default::default()
        };

        let err = overrides.resolve(&Getters::default()).unwrap_err();
        assert!(!err.is_io_error());
        assert!(matches!(err, OverrideError::ParseValuesFile { .. }));
    }

    #[test]
    fn parse_errors_name_the_override_kind() {
        let overrides = ValueOverrides {
            string_values: vec!["novalue".to_owned()],
            ..Default::default()
        };

        let err = overrides.resolve(&Getters::default()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "failed to parse --set-string data \"novalue\""
        );
    }

    #[test]
    fn missing_set_file_is_an_io_error() {
        let overrides = ValueOverrides {
            file_values: vec!["script=/does/not/exist.sh".to_owned()],
            ..Default::default()
        };

        let err = overrides.resolve(&Getters::default()).unwrap_err();
        assert!(err.is_io_error());
    }
}
