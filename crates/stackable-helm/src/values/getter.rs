use std::{
    collections::BTreeMap,
    fmt::Debug,
    io::Read,
    path::{Path, PathBuf},
    sync::Arc,
};

use snafu::{OptionExt, ResultExt, Snafu};
use url::Url;

use crate::BoxError;

/// The location which reads from stdin instead of a file.
const STDIN_LOCATION: &str = "-";

#[derive(Debug, Snafu)]
pub enum ReadError {
    #[snafu(display("failed to read file {path:?}"))]
    ReadLocalFile {
        source: std::io::Error,
        path: PathBuf,
    },

    #[snafu(display("failed to read from stdin"))]
    ReadStdin { source: std::io::Error },

    #[snafu(display("failed to fetch {url} using the {scheme:?} getter"))]
    Fetch {
        source: BoxError,
        url: Url,
        scheme: String,
    },

    #[snafu(display("{url} does not point to a local file"))]
    NotAFileUrl { url: Url },
}

/// Fetches the content of a remote location, selected by URL scheme.
///
/// Implementations are registered in [`Getters`], which takes care of
/// dispatching to the correct implementation.
pub trait Getter: Debug + Send + Sync {
    fn get(&self, url: &Url) -> Result<Vec<u8>, BoxError>;
}

/// Reads `file://` URLs from the local filesystem.
#[derive(Debug, Default)]
pub struct FileGetter;

impl Getter for FileGetter {
    fn get(&self, url: &Url) -> Result<Vec<u8>, BoxError> {
        let path = url
            .to_file_path()
            .ok()
            .context(NotAFileUrlSnafu { url: url.clone() })?;
        Ok(std::fs::read(path)?)
    }
}

/// A set of [`Getter`]s, keyed by the URL scheme they handle.
///
/// The default set only knows `file://`. Locations that are not URLs or use
/// an unknown scheme are read from the local filesystem.
#[derive(Clone, Debug)]
pub struct Getters {
    getters: BTreeMap<String, Arc<dyn Getter>>,
}

impl Default for Getters {
    fn default() -> Self {
        Self::empty().with_getter("file", FileGetter)
    }
}

impl Getters {
    /// A set without any getters, every location is read from the local filesystem.
    pub fn empty() -> Self {
        Self {
            getters: BTreeMap::new(),
        }
    }

    /// Registers (or replaces) the getter responsible for `scheme`.
    pub fn with_getter(mut self, scheme: impl Into<String>, getter: impl Getter + 'static) -> Self {
        self.getters.insert(scheme.into(), Arc::new(getter));
        self
    }

    /// Reads the content at `location`.
    ///
    /// `-` reads stdin. If `location` parses as a URL with a registered scheme,
    /// the matching getter is used. Everything else is treated as a local path.
    pub fn read(&self, location: &str) -> Result<Vec<u8>, ReadError> {
        self.read_with_stdin(location, std::io::stdin())
    }

    /// Like [`Self::read`], but `-` reads from `stdin` instead of the process' stdin.
    pub fn read_with_stdin(
        &self,
        location: &str,
        mut stdin: impl Read,
    ) -> Result<Vec<u8>, ReadError> {
        if location == STDIN_LOCATION {
            let mut content = Vec::new();
            stdin.read_to_end(&mut content).context(ReadStdinSnafu)?;
            return Ok(content);
        }

        if let Ok(url) = Url::parse(location) {
            if let Some(getter) = self.getters.get(url.scheme()) {
                tracing::debug!(%url, scheme = url.scheme(), "fetching values with getter");
                return getter.get(&url).context(FetchSnafu {
                    scheme: url.scheme(),
                    url: url.clone(),
                });
            }
        }

        read_local_file(Path::new(location))
    }
}

fn read_local_file(path: &Path) -> Result<Vec<u8>, ReadError> {
    std::fs::read(path).context(ReadLocalFileSnafu { path })
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[derive(Debug)]
    struct StaticGetter(&'static str);

    impl Getter for StaticGetter {
        fn get(&self, url: &Url) -> Result<Vec<u8>, BoxError> {
            Ok(format!("{}: {}", self.0, url.path()).into_bytes())
        }
    }

    #[derive(Debug)]
    struct FailingGetter;

    impl Getter for FailingGetter {
        fn get(&self, _url: &Url) -> Result<Vec<u8>, BoxError> {
            Err("connection refused".into())
        }
    }

    struct BrokenPipe;

    impl Read for BrokenPipe {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::ErrorKind::BrokenPipe.into())
        }
    }

    #[test]
    fn stdin() {
        let content = Getters::default()
            .read_with_stdin("-", "replicas: 1".as_bytes())
            .unwrap();
        assert_eq!(content, b"replicas: 1");
    }

    #[test]
    fn stdin_failures_are_reported() {
        let err = Getters::default().read_with_stdin("-", BrokenPipe).unwrap_err();
        assert!(matches!(err, ReadError::ReadStdin { .. }));
    }

    #[test]
    fn stdin_is_only_read_for_dash() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "from: file").unwrap();

        let content = Getters::default()
            .read_with_stdin(file.path().to_str().unwrap(), BrokenPipe)
            .unwrap();
        assert_eq!(content, b"from: file");
    }

    #[test]
    fn local_files() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "replicas: 3").unwrap();

        let content = Getters::default()
            .read(file.path().to_str().unwrap())
            .unwrap();
        assert_eq!(content, b"replicas: 3");
    }

    #[test]
    fn file_urls() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "replicas: 5").unwrap();
        let url = Url::from_file_path(file.path()).unwrap();

        let content = Getters::default().read(url.as_str()).unwrap();
        assert_eq!(content, b"replicas: 5");
    }

    #[test]
    fn scheme_dispatch() {
        let getters = Getters::default().with_getter("https", StaticGetter("remote"));

        let content = getters.read("https://charts.example.com/values.yaml").unwrap();
        assert_eq!(content, b"remote: /values.yaml");
    }

    #[test]
    fn unknown_scheme_falls_back_to_local_file() {
        let getters = Getters::empty();
        let err = getters.read("s3://bucket/values.yaml").unwrap_err();
        assert!(matches!(err, ReadError::ReadLocalFile { .. }));
    }

    #[test]
    fn getter_failures_are_reported() {
        let getters = Getters::empty().with_getter("https", FailingGetter);
        let err = getters.read("https://example.com/values.yaml").unwrap_err();

        assert!(matches!(err, ReadError::Fetch { ref scheme, .. } if scheme == "https"));
    }
}
