use std::io::Read;

use serde::{Deserialize, de::IgnoredAny};
use snafu::{ResultExt, Snafu};

/// The number of bytes inspected to decide between JSON and YAML input.
const SNIFF_LEN: u64 = 100;

#[derive(Debug, Snafu)]
pub enum DecodeError {
    #[snafu(display("failed to read manifest stream"))]
    ReadStream { source: std::io::Error },

    #[snafu(display("failed to decode YAML document #{index}"))]
    DecodeYaml {
        source: serde_yaml::Error,
        index: usize,
    },

    #[snafu(display("failed to encode YAML document #{index}"))]
    EncodeYaml {
        source: serde_yaml::Error,
        index: usize,
    },

    #[snafu(display("failed to decode JSON document"))]
    DecodeJson { source: serde_json::Error },
}

enum State<R> {
    Unsniffed(R),
    Yaml {
        documents: std::vec::IntoIter<Vec<u8>>,
        error: Option<DecodeError>,
    },
    Json {
        data: Vec<u8>,
        offset: usize,
    },
    Done,
}

/// Splits a stream of concatenated manifests into individual documents.
///
/// The first [`SNIFF_LEN`] bytes decide how the stream is read: if the first
/// non-whitespace character is `{`, the stream is treated as a sequence of
/// JSON values, which are yielded verbatim. Otherwise it is a multi-document
/// YAML stream. Every YAML document is decoded and yielded re-encoded on its
/// own, documents without content (e.g. only comments) are skipped.
///
/// Besides [`Iterator`], the splitter offers a cursor style interface via
/// [`DocumentSplitter::advance`], [`DocumentSplitter::current_bytes`] and
/// [`DocumentSplitter::err`]. Both stop at the first error.
pub struct DocumentSplitter<R> {
    state: State<R>,
    current: Option<Vec<u8>>,
    error: Option<DecodeError>,
}

impl<R: Read> DocumentSplitter<R> {
    pub fn new(reader: R) -> Self {
        Self {
            state: State::Unsniffed(reader),
            current: None,
            error: None,
        }
    }

    /// Moves to the next document.
    ///
    /// Returns `false` at the end of the stream or on error, in which case
    /// [`Self::err`] tells the two apart.
    pub fn advance(&mut self) -> bool {
        match self.next_document() {
            Ok(Some(document)) => {
                self.current = Some(document);
                true
            }
            Ok(None) => {
                self.current = None;
                false
            }
            Err(err) => {
                self.current = None;
                self.error = Some(err);
                false
            }
        }
    }

    /// The document the last successful [`Self::advance`] moved to.
    pub fn current_bytes(&self) -> Option<&[u8]> {
        self.current.as_deref()
    }

    /// The error which stopped the splitter, `None` if it reached the end of
    /// the stream (or is not done yet).
    pub fn err(&self) -> Option<&DecodeError> {
        self.error.as_ref()
    }

    fn next_document(&mut self) -> Result<Option<Vec<u8>>, DecodeError> {
        if matches!(self.state, State::Unsniffed(_)) {
            self.sniff()?;
        }

        let result = match &mut self.state {
            State::Yaml { documents, error } => match documents.next() {
                Some(document) => Ok(Some(document)),
                None => error.take().map_or(Ok(None), Err),
            },
            State::Json { data, offset } => next_json_document(data, offset),
            State::Unsniffed(_) | State::Done => Ok(None),
        };

        if !matches!(result, Ok(Some(_))) {
            self.state = State::Done;
        }
        result
    }

    fn sniff(&mut self) -> Result<(), DecodeError> {
        let State::Unsniffed(mut reader) = std::mem::replace(&mut self.state, State::Done) else {
            return Ok(());
        };

        let mut data = Vec::new();
        reader
            .by_ref()
            .take(SNIFF_LEN)
            .read_to_end(&mut data)
            .context(ReadStreamSnafu)?;

        let is_json = data.trim_ascii_start().first() == Some(&b'{');
        tracing::trace!(is_json, "sniffed manifest stream format");

        reader.read_to_end(&mut data).context(ReadStreamSnafu)?;
        self.state = if is_json {
            State::Json { data, offset: 0 }
        } else {
            let (documents, error) = split_yaml_documents(&data);
            State::Yaml {
                documents: documents.into_iter(),
                error,
            }
        };

        Ok(())
    }
}

impl<R: Read> Iterator for DocumentSplitter<R> {
    type Item = Result<Vec<u8>, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_document().transpose()
    }
}

/// Returns all documents up to the first one which fails to decode, together
/// with that failure.
fn split_yaml_documents(data: &[u8]) -> (Vec<Vec<u8>>, Option<DecodeError>) {
    let mut documents = Vec::new();

    for (index, document) in serde_yaml::Deserializer::from_slice(data).enumerate() {
        let encoded = serde_yaml::Value::deserialize(document)
            .context(DecodeYamlSnafu { index })
            .and_then(|value| match value {
                serde_yaml::Value::Null => Ok(None),
                value => serde_yaml::to_string(&value)
                    .map(Some)
                    .context(EncodeYamlSnafu { index }),
            });

        match encoded {
            Ok(Some(encoded)) => documents.push(encoded.into_bytes()),
            Ok(None) => tracing::trace!(index, "skipping YAML document without content"),
            Err(err) => return (documents, Some(err)),
        }
    }

    (documents, None)
}

fn next_json_document(data: &[u8], offset: &mut usize) -> Result<Option<Vec<u8>>, DecodeError> {
    let remaining = &data[*offset..];
    let mut stream = serde_json::Deserializer::from_slice(remaining).into_iter::<IgnoredAny>();

    match stream.next() {
        None => Ok(None),
        Some(Err(err)) => Err(err).context(DecodeJsonSnafu),
        Some(Ok(_)) => {
            let end = stream.byte_offset();
            *offset += end;
            Ok(Some(remaining[..end].trim_ascii_start().to_vec()))
        }
    }
}
