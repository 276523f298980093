use std::io::{Read, Write};

use clap::{Args, Parser, ValueEnum};
use snafu::{ResultExt, Snafu};
use stackable_helm::{
    kvp::{K8S_APP_MANAGED_BY_KEY, LabelError, OwnershipLabels},
    logging,
    manifest::{ManifestRelabeler, RelabelError},
    values::{
        DocumentError, Getters, PathError, ReadError, ResolveError, ValueMapping, ValueOverrides,
        ValueSources, build_mapped_values, to_yaml_string,
    },
};

const APP_NAME: &str = "stackable-helm";
const LOG_ENV: &str = "STACKABLE_HELM_LOG";

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("failed to read {location:?}"))]
    ReadSource { source: ReadError, location: String },

    #[snafu(display("{location:?} is not valid UTF-8"))]
    SourceEncoding {
        source: std::string::FromUtf8Error,
        location: String,
    },

    #[snafu(display("invalid value mapping {input:?}, expected PATH=VALUE"))]
    InvalidMapping { input: String },

    #[snafu(display("failed to build mapped values"))]
    BuildMappedValues { source: PathError },

    #[snafu(display("failed to serialize mapped values"))]
    SerializeMappedValues { source: DocumentError },

    #[snafu(display("failed to resolve values"))]
    ResolveValues { source: ResolveError },

    #[snafu(display("failed to serialize values as YAML"))]
    SerializeYaml { source: DocumentError },

    #[snafu(display("failed to serialize values as JSON"))]
    SerializeJson { source: serde_json::Error },

    #[snafu(display("invalid ownership labels"))]
    InvalidLabels { source: LabelError },

    #[snafu(display("failed to read manifests from stdin"))]
    ReadStdin { source: std::io::Error },

    #[snafu(display("failed to relabel manifests"))]
    Relabel { source: RelabelError },

    #[snafu(display("failed to write to stdout"))]
    WriteStdout { source: std::io::Error },
}

#[derive(Debug, Parser)]
#[command(author, version, about)]
enum Command {
    /// Resolve the values passed to a chart and print them
    Values(ValuesArguments),

    /// Inject ownership labels into the manifests read from stdin, for use as
    /// a Helm post-renderer
    PostRender(PostRenderArguments),
}

#[derive(Debug, Args)]
struct ValuesArguments {
    /// A YAML file (or `-` for stdin) containing the inline values
    #[arg(long, value_name = "FILE")]
    inline: Option<String>,

    /// Values mapped from resource metadata, these have the lowest precedence
    #[arg(long = "map", value_name = "PATH=VALUE")]
    mappings: Vec<String>,

    /// A YAML file with values which override everything else
    #[arg(long, value_name = "FILE")]
    final_values: Option<String>,

    /// The output format
    #[arg(long, short = 'o', value_enum, default_value_t = OutputFormat::Yaml)]
    output: OutputFormat,

    // IMPORTANT: All (flattened) sub structs should be placed at the end to ensure the help
    // headings are correct.
    #[command(flatten)]
    overrides: ValueOverrides,
}

#[derive(Debug, Args)]
struct PostRenderArguments {
    /// Used as the `app.kubernetes.io/component` label
    #[arg(long, env)]
    component_name: String,

    /// Used as the `app.kubernetes.io/version` label
    #[arg(long, env)]
    component_version: String,

    /// Used as the `app.kubernetes.io/managed-by` label
    #[arg(long, env, default_value = APP_NAME)]
    managed_by: String,

    /// Additional labels (can specify multiple)
    #[arg(long = "label", short = 'l', value_name = "KEY=VALUE")]
    labels: Vec<String>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    Yaml,
    Json,
}

#[snafu::report]
fn main() -> Result<(), Error> {
    let command = Command::parse();
    logging::initialize_logging(LOG_ENV, APP_NAME);

    let output = match command {
        Command::Values(arguments) => resolve_values(&arguments)?,
        Command::PostRender(arguments) => post_render(&arguments)?,
    };

    std::io::stdout()
        .lock()
        .write_all(&output)
        .context(WriteStdoutSnafu)
}

fn resolve_values(arguments: &ValuesArguments) -> Result<Vec<u8>, Error> {
    let getters = Getters::default();

    let mappings = arguments
        .mappings
        .iter()
        .map(|input| {
            input
                .split_once('=')
                .map(|(path, value)| ValueMapping::new(path, value))
                .ok_or_else(|| InvalidMappingSnafu { input }.build())
        })
        .collect::<Result<Vec<_>, _>>()?;
    let mapped = build_mapped_values(&mappings).context(BuildMappedValuesSnafu)?;

    let sources = ValueSources {
        inline: read_optional(&getters, arguments.inline.as_deref())?,
        overrides: arguments.overrides.clone(),
        mapped: to_yaml_string(&mapped).context(SerializeMappedValuesSnafu)?,
        final_mapped: read_optional(&getters, arguments.final_values.as_deref())?,
    };
    let values = sources.resolve(&getters).context(ResolveValuesSnafu)?;
    tracing::debug!(keys = values.len(), "resolved values");

    match arguments.output {
        OutputFormat::Yaml => to_yaml_string(&values)
            .map(String::into_bytes)
            .context(SerializeYamlSnafu),
        OutputFormat::Json => {
            let mut json = serde_json::to_vec_pretty(&values).context(SerializeJsonSnafu)?;
            json.push(b'\n');
            Ok(json)
        }
    }
}

fn read_optional(getters: &Getters, location: Option<&str>) -> Result<String, Error> {
    let Some(location) = location else {
        return Ok(String::new());
    };

    let content = getters
        .read(location)
        .context(ReadSourceSnafu { location })?;
    String::from_utf8(content).context(SourceEncodingSnafu { location })
}

fn post_render(arguments: &PostRenderArguments) -> Result<Vec<u8>, Error> {
    let mut labels = OwnershipLabels::new(&arguments.component_name, &arguments.component_version)
        .context(InvalidLabelsSnafu)?;
    labels
        .try_insert(K8S_APP_MANAGED_BY_KEY, &arguments.managed_by)
        .context(InvalidLabelsSnafu)?;
    for label in &arguments.labels {
        labels.try_insert_pair(label).context(InvalidLabelsSnafu)?;
    }

    let mut manifests = Vec::new();
    std::io::stdin()
        .read_to_end(&mut manifests)
        .context(ReadStdinSnafu)?;

    ManifestRelabeler::new(&labels)
        .run(manifests.as_slice())
        .context(RelabelSnafu)
}
