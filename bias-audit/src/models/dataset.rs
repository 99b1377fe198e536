//! Uploaded dataset and grading script artifacts
//!
//! Only the CSV header is inspected locally. Row contents are opaque bytes
//! forwarded to the scoring backend.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Column every dataset must carry (matched case-insensitively)
pub const TEXT_COLUMN: &str = "text";

/// Column whose presence marks the dataset as exposing ground truth
pub const GROUND_TRUTH_COLUMN: &str = "true_grade";

/// Extension a custom grading script must carry
pub const SCRIPT_EXTENSION: &str = "py";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DatasetError {
    #[error("Failed to read {path}: {message}")]
    Io { path: String, message: String },

    #[error("Dataset is not valid CSV: {0}")]
    Csv(String),

    #[error("Dataset is empty")]
    Empty,

    #[error("CSV must contain a 'text' column")]
    MissingTextColumn,

    #[error("Grading script '{0}' must be a .py file")]
    NotAPythonScript(String),
}

/// CSV dataset uploaded for auditing
#[derive(Clone, PartialEq)]
pub struct Dataset {
    pub file_name: String,
    headers: Vec<String>,
    contents: Arc<[u8]>,
}

impl Dataset {
    /// Parse the header row and keep the raw bytes for upload
    pub fn from_csv_bytes(file_name: impl Into<String>, contents: Vec<u8>) -> Result<Self, DatasetError> {
        if contents.iter().all(|b| b.is_ascii_whitespace()) {
            return Err(DatasetError::Empty);
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(contents.as_slice());

        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| DatasetError::Csv(e.to_string()))?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        if !headers.iter().any(|h| h.eq_ignore_ascii_case(TEXT_COLUMN)) {
            return Err(DatasetError::MissingTextColumn);
        }

        Ok(Self {
            file_name: file_name.into(),
            headers,
            contents: Arc::from(contents),
        })
    }

    pub fn from_path(path: &Path) -> Result<Self, DatasetError> {
        let contents = std::fs::read(path).map_err(|e| DatasetError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_csv_bytes(file_name_of(path), contents)
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn contents(&self) -> &[u8] {
        &self.contents
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.headers.iter().any(|h| h == name)
    }

    /// Whether the dataset carries a ground-truth grade column
    pub fn has_ground_truth(&self) -> bool {
        self.headers
            .iter()
            .any(|h| h.eq_ignore_ascii_case(GROUND_TRUTH_COLUMN))
    }
}

impl fmt::Debug for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dataset")
            .field("file_name", &self.file_name)
            .field("headers", &self.headers)
            .field("bytes", &self.contents.len())
            .finish()
    }
}

/// Custom Python grading script
#[derive(Clone, PartialEq)]
pub struct ScriptArtifact {
    pub file_name: String,
    contents: Arc<[u8]>,
}

impl ScriptArtifact {
    pub fn new(file_name: impl Into<String>, contents: Vec<u8>) -> Result<Self, DatasetError> {
        let file_name = file_name.into();
        let is_python = Path::new(&file_name)
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case(SCRIPT_EXTENSION))
            .unwrap_or(false);
        if !is_python {
            return Err(DatasetError::NotAPythonScript(file_name));
        }
        Ok(Self {
            file_name,
            contents: Arc::from(contents),
        })
    }

    pub fn from_path(path: &Path) -> Result<Self, DatasetError> {
        let contents = std::fs::read(path).map_err(|e| DatasetError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::new(file_name_of(path), contents)
    }

    pub fn contents(&self) -> &[u8] {
        &self.contents
    }
}

impl fmt::Debug for ScriptArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptArtifact")
            .field("file_name", &self.file_name)
            .field("bytes", &self.contents.len())
            .finish()
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
