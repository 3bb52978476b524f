use crate::input::TestCase;
use crate::protocol::ProtocolKind;
use serde_json::Value as JsonValue;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Defines errors that can arise while loading seeds or persisting failures.
#[derive(Error, Debug)]
pub enum CorpusError {
    /// The seed file is missing, unreadable or not the expected JSON shape.
    #[error("malformed seed file {path:?}: {reason}")]
    MalformedSeed { path: PathBuf, reason: String },

    /// An I/O error occurred while writing the failure file.
    #[error("corpus I/O error: {0}")]
    Io(String),

    /// The failure corpus could not be encoded as JSON.
    #[error("corpus serialization error: {0}")]
    Serialization(String),
}

impl From<std::io::Error> for CorpusError {
    fn from(err: std::io::Error) -> Self {
        CorpusError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for CorpusError {
    fn from(err: serde_json::Error) -> Self {
        CorpusError::Serialization(err.to_string())
    }
}

/// Reads a JSON array of test cases for `kind`, preserving file order.
///
/// Any problem (missing file, invalid JSON, a non-array top level, or an element that does
/// not match the protocol) is reported as [`CorpusError::MalformedSeed`].
pub fn load_seed_file(path: &Path, kind: ProtocolKind) -> Result<Vec<TestCase>, CorpusError> {
    let malformed = |reason: String| CorpusError::MalformedSeed {
        path: path.to_path_buf(),
        reason,
    };
    let text = fs::read_to_string(path).map_err(|e| malformed(e.to_string()))?;
    let value: JsonValue =
        serde_json::from_str(&text).map_err(|e| malformed(format!("invalid JSON: {e}")))?;
    let JsonValue::Array(items) = value else {
        return Err(malformed("expected a JSON array of test cases".to_string()));
    };
    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            TestCase::from_json(item, kind)
                .map_err(|reason| malformed(format!("entry {index}: {reason}")))
        })
        .collect()
}

/// FIFO queue of seeds awaiting mutation.
///
/// Seeds are popped from the head; interesting mutants are pushed to the tail, which is
/// what keeps exploration going past the initial generation.
#[derive(Debug, Clone, Default)]
pub struct SeedQueue {
    queue: VecDeque<TestCase>,
}

impl SeedQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, test_case: TestCase) {
        self.queue.push_back(test_case);
    }

    pub fn pop(&mut self) -> Option<TestCase> {
        self.queue.pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TestCase> {
        self.queue.iter()
    }
}

impl FromIterator<TestCase> for SeedQueue {
    fn from_iter<T: IntoIterator<Item = TestCase>>(iter: T) -> Self {
        Self {
            queue: iter.into_iter().collect(),
        }
    }
}

/// Append-only, ordered record of every interesting mutant.
///
/// Duplicates are kept: rediscovering the same mutant appends it again.
#[derive(Debug, Clone, Default)]
pub struct FailureCorpus {
    failures: Vec<TestCase>,
}

impl FailureCorpus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, test_case: TestCase) {
        self.failures.push(test_case);
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failures(&self) -> &[TestCase] {
        &self.failures
    }

    /// Rewrites `path` with every failure so far as a pretty-printed JSON array.
    ///
    /// The file is replaced atomically through a temporary sibling. An empty corpus
    /// writes nothing and returns `Ok(false)`.
    pub fn persist(&self, path: &Path) -> Result<bool, CorpusError> {
        if self.failures.is_empty() {
            return Ok(false);
        }
        let entries: Vec<JsonValue> = self.failures.iter().map(TestCase::to_json).collect();
        let bytes = serde_json::to_vec_pretty(&entries)?;

        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        let file_name = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("failures.json");
        let tmp_path = parent.join(format!(".{file_name}.{}.tmp", std::process::id()));
        fs::write(&tmp_path, bytes).map_err(|e| {
            CorpusError::Io(format!("failed to write {:?}: {}", tmp_path, e))
        })?;
        fs::rename(&tmp_path, path).map_err(|e| {
            CorpusError::Io(format!("failed to move failures into {:?}: {}", path, e))
        })?;
        tracing::debug!(path = %path.display(), count = self.failures.len(), "persisted failures");
        Ok(true)
    }
}
