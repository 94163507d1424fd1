// Local crates
use crate::submitter::models::Changeset;

// External crates
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tracing::instrument;

/// Namespace and payload of the changeset submitted when no source is configured.
pub const SAMPLE_NAMESPACE: &str = "foo";
pub const SAMPLE_PAYLOAD: &str = r#"{"bar": "baz"}"#;

/// Where the driver gets changesets from.
///
/// Change detection proper lives outside the reporter; anything that can hand
/// over namespaced JSON plugs in here.
pub trait ChangeSource {
    /// Next changeset, or `None` once the source is exhausted.
    async fn next_change(&mut self) -> Option<Changeset>;
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("could not open change source {path}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Yields the single sample changeset once.
#[derive(Debug, Default)]
pub struct SampleChangeSource {
    sent: bool,
}

impl ChangeSource for SampleChangeSource {
    async fn next_change(&mut self) -> Option<Changeset> {
        if self.sent {
            return None;
        }
        self.sent = true;
        Some(Changeset::new(SAMPLE_NAMESPACE, SAMPLE_PAYLOAD))
    }
}

/// One line of a JSON-lines change feed.
#[derive(Debug, Deserialize)]
struct ChangeLine {
    namespace: String,
    payload: serde_json::Value,
}

/// Reads `{"namespace": "...", "payload": {...}}` records, one per line.
///
/// Blank lines are skipped. Malformed lines are logged and skipped, a read
/// error ends the feed.
pub struct JsonLinesSource<R> {
    lines: Lines<R>,
    line_no: usize,
}

impl<R> fmt::Debug for JsonLinesSource<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonLinesSource")
            .field("line_no", &self.line_no)
            .finish_non_exhaustive()
    }
}

pub type BoxedReader = Box<dyn AsyncBufRead + Send + Unpin>;

impl<R: AsyncBufRead + Unpin> JsonLinesSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line_no: 0,
        }
    }
}

impl JsonLinesSource<BoxedReader> {
    /// Open `path`, or stdin when `path` is `-`.
    #[instrument(name = "change_source::open", level = "debug")]
    pub async fn open(path: &Path) -> Result<Self, SourceError> {
        if path.as_os_str() == "-" {
            tracing::debug!("Reading changesets from stdin");
            let reader: BoxedReader = Box::new(BufReader::new(tokio::io::stdin()));
            return Ok(Self::new(reader));
        }

        let file = tokio::fs::File::open(path)
            .await
            .map_err(|source| SourceError::Open {
                path: path.display().to_string(),
                source,
            })?;
        tracing::debug!("Reading changesets from {}", path.display());
        let reader: BoxedReader = Box::new(BufReader::new(file));
        Ok(Self::new(reader))
    }
}

impl<R: AsyncBufRead + Unpin> ChangeSource for JsonLinesSource<R> {
    async fn next_change(&mut self) -> Option<Changeset> {
        loop {
            let line = match self.lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => return None,
                Err(e) => {
                    tracing::error!(error = %e, line = self.line_no + 1, "Could not read change feed");
                    return None;
                }
            };
            self.line_no += 1;

            if line.trim().is_empty() {
                continue;
            }

            let parsed = serde_json::from_str::<ChangeLine>(&line).and_then(|entry| {
                serde_json::to_vec(&entry.payload).map(|payload| (entry.namespace, payload))
            });
            match parsed {
                Ok((namespace, payload)) => return Some(Changeset::new(namespace, payload)),
                Err(e) => {
                    tracing::error!(error = %e, line = self.line_no, "Skipping malformed changeset");
                }
            }
        }
    }
}
