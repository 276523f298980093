use snafu::{ResultExt, Snafu};

use crate::values::{
    Document, DocumentError, Getters, OverrideError, ValueOverrides, merge, parse_document,
};

#[derive(Debug, Snafu)]
pub enum ResolveError {
    #[snafu(display("failed to parse inline values"))]
    ParseInlineValues { source: DocumentError },

    #[snafu(display("failed to resolve values overrides"))]
    ResolveOverrides { source: OverrideError },

    #[snafu(display("failed to parse mapped values"))]
    ParseMappedValues { source: DocumentError },

    #[snafu(display("failed to parse final mapped values"))]
    ParseFinalMappedValues { source: DocumentError },
}

/// All sources which contribute to the values of a release.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValueSources {
    /// The inline values document.
    pub inline: String,

    /// Overrides given as (command line) flags.
    pub overrides: ValueOverrides,

    /// Values mapped from resource metadata. This is the lowest layer.
    pub mapped: String,

    /// Mapped values which are applied last and override everything else.
    pub final_mapped: String,
}

impl ValueSources {
    /// Folds all sources into the values passed to the chart.
    ///
    /// The inline values are merged with the overrides first (overrides win).
    /// The result is then merged on top of the mapped values, so mapped values
    /// only survive where neither inline values nor overrides set anything,
    /// or as untouched named list items. Finally, the final mapped values are
    /// merged on top of everything.
    pub fn resolve(&self, getters: &Getters) -> Result<Document, ResolveError> {
        let inline = parse_document(&self.inline).context(ParseInlineValuesSnafu)?;
        let overrides = self
            .overrides
            .resolve(getters)
            .context(ResolveOverridesSnafu)?;
        let user_supplied = merge(inline, overrides);

        let mapped = parse_document(&self.mapped).context(ParseMappedValuesSnafu)?;
        let values = merge(mapped, user_supplied);

        let final_mapped =
            parse_document(&self.final_mapped).context(ParseFinalMappedValuesSnafu)?;
        tracing::debug!(
            final_mapped_keys = final_mapped.len(),
            "applying final mapped values"
        );

        Ok(merge(values, final_mapped))
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use serde_json::{Value, json};

    use super::*;

    fn resolve(sources: ValueSources) -> Result<Value, ResolveError> {
        sources.resolve(&Getters::default()).map(Value::Object)
    }

    #[test]
    fn empty_sources() {
        assert_eq!(
            ValueSources::default().resolve(&Getters::default()).unwrap(),
            Document::new()
        );
    }

    #[test]
    fn inline_wins_over_mapped() {
        let resolved = resolve(ValueSources {
            inline: "foo: bar".to_owned(),
            mapped: "foo: baz".to_owned(),
            ..Default::default()
        })
        .unwrap();

        assert_eq!(resolved, json!({"foo": "bar"}));
    }

    #[test]
    fn overrides_win_over_inline() {
        let resolved = resolve(ValueSources {
            inline: "foo: bar\nkeep: me".to_owned(),
            overrides: ValueOverrides {
                values: vec!["foo=override".to_owned()],
                ..Default::default()
            },
            ..Default::default()
        })
        .unwrap();

        assert_eq!(resolved, json!({"foo": "override", "keep": "me"}));
    }

    #[test]
    fn final_mapped_wins_over_everything() {
        let resolved = resolve(ValueSources {
            inline: "foo: inline".to_owned(),
            overrides: ValueOverrides {
                values: vec!["foo=override".to_owned()],
                ..Default::default()
            },
            mapped: "foo: mapped".to_owned(),
            final_mapped: "foo: final".to_owned(),
        })
        .unwrap();

        assert_eq!(resolved, json!({"foo": "final"}));
    }

    #[test]
    fn mapped_named_list_items_survive() {
        let resolved = resolve(ValueSources {
            inline: indoc! {"
                containers:
                  - name: main
                    image: nginx:1.27
            "}
            .to_owned(),
            mapped: indoc! {"
                containers:
                  - name: main
                    image: nginx:1.25
                    imagePullPolicy: Always
                  - name: sidecar
                    image: busybox
            "}
            .to_owned(),
            ..Default::default()
        })
        .unwrap();

        assert_eq!(
            resolved,
            json!({
                "containers": [
                    {"name": "main", "image": "nginx:1.27", "imagePullPolicy": "Always"},
                    {"name": "sidecar", "image": "busybox"},
                ],
            })
        );
    }

    #[test]
    fn malformed_layers_are_reported() {
        let err = resolve(ValueSources {
            inline: "foo: [bar".to_owned(),
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, ResolveError::ParseInlineValues { .. }));

        let err = resolve(ValueSources {
            mapped: "- not\n- a map".to_owned(),
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, ResolveError::ParseMappedValues { .. }));

        let err = resolve(ValueSources {
            final_mapped: "foo: [bar".to_owned(),
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, ResolveError::ParseFinalMappedValues { .. }));
    }

    #[test]
    fn override_failures_are_reported() {
        let err = resolve(ValueSources {
            overrides: ValueOverrides {
                value_files: vec!["/does/not/exist.yaml".to_owned()],
                ..Default::default()
            },
            ..Default::default()
        })
        .unwrap_err();

        match err {
            ResolveError::ResolveOverrides { source } => assert!(source.is_io_error()),
            other => panic!("expected an override error, got {other}"),
        }
    }
}
