//! Error types for provisioning operations.

use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while resolving the manifest. Always fatal, and always
/// raised before any network or filesystem work starts.
#[derive(Error, Debug)]
pub enum ManifestError {
    /// The analytic engine version could not be determined.
    #[error("failed to determine analytic engine version: {0}")]
    VersionUnavailable(String),

    /// A path template references a placeholder nobody knows how to fill.
    #[error("unknown placeholder '{{{placeholder}}}' in template '{template}'")]
    UnknownPlaceholder { template: String, placeholder: String },

    /// Two artifacts resolve to the same local file.
    #[error("artifacts '{first}' and '{second}' both resolve to local path {path}")]
    DuplicateLocalPath {
        first: String,
        second: String,
        path: PathBuf,
    },

    /// Two artifacts share a logical name.
    #[error("duplicate artifact name '{0}'")]
    DuplicateName(String),

    /// A table names a source artifact that is not in the manifest.
    #[error("table '{table}' references unknown artifact '{artifact}'")]
    UnknownSource { table: String, artifact: String },

    /// A template or table definition is malformed.
    #[error("invalid manifest entry: {0}")]
    Invalid(String),

    /// The manifest file could not be read.
    #[error("failed to read manifest {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The manifest file is not valid JSON for the expected shape.
    #[error(transparent)]
    SerdeJsonError(#[from] serde_json::Error),
}

/// Why a single artifact could not be fetched.
///
/// Only `Transient` failures are retried; the other variants are recorded on
/// the first occurrence.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Timeouts, connection resets, 5xx/429 responses, truncated bodies.
    #[error("transient network error for {url}: {message}")]
    Transient { url: String, message: String },

    /// Not-found, auth failures and other 4xx responses, or offline mode.
    #[error("permanent network error for {url}: {message}")]
    Permanent { url: String, message: String },

    /// Writing or renaming the local file failed.
    #[error("storage error for {path}: {message}")]
    Storage { path: PathBuf, message: String },
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient { .. })
    }
}

/// Reason a table did not pass post-load validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationFailureKind {
    /// The table does not exist in the row store.
    Missing,
    /// The table exists but holds zero rows.
    Empty,
    /// The load was skipped because its source artifact was not fetched.
    Skipped,
}

/// One table that failed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationFailure {
    pub table: String,
    pub kind: ValidationFailureKind,
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ValidationFailureKind::Missing => write!(f, "{} is missing", self.table),
            ValidationFailureKind::Empty => write!(f, "{} has zero rows", self.table),
            ValidationFailureKind::Skipped => {
                write!(f, "{} was not loaded (source artifact unavailable)", self.table)
            }
        }
    }
}

/// Top-level errors that terminate a provisioning run.
#[derive(Error, Debug)]
pub enum ProvisionError {
    /// Manifest resolution failed.
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// A destination directory could not be created.
    #[error("failed to create directory {path}: {source}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The row store or the analytic engine could not be reached.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The artifact and the declared table schema disagree.
    #[error("schema mismatch in table '{table}', column '{column}': {detail}")]
    Schema {
        table: String,
        column: String,
        detail: String,
    },

    /// DDL or the bridge load failed for a reason not tied to a column.
    #[error("load of table '{table}' failed: {message}")]
    Load { table: String, message: String },

    /// One or more tables failed post-load validation.
    #[error("validation failed: {}", join_failures(.0))]
    Validation(Vec<ValidationFailure>),

    /// The fetch-only stage finished with failed artifacts.
    #[error("{0} artifact(s) could not be fetched")]
    FetchIncomplete(usize),
}

fn join_failures(failures: &[ValidationFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_lists_every_table() {
        let err = ProvisionError::Validation(vec![
            ValidationFailure {
                table: "imdb_title_basics".to_string(),
                kind: ValidationFailureKind::Empty,
            },
            ValidationFailure {
                table: "imdb_title_ratings".to_string(),
                kind: ValidationFailureKind::Missing,
            },
        ]);
        assert_eq!(
            err.to_string(),
            "validation failed: imdb_title_basics has zero rows; imdb_title_ratings is missing"
        );
    }

    #[test]
    fn schema_error_names_table_and_column() {
        let err = ProvisionError::Schema {
            table: "ratings".to_string(),
            column: "numVotes".to_string(),
            detail: "source type VARCHAR cannot load into bigint".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("'ratings'"));
        assert!(msg.contains("'numVotes'"));
    }

    #[test]
    fn unknown_placeholder_message_keeps_braces() {
        let err = ManifestError::UnknownPlaceholder {
            template: "a/{nope}/b".to_string(),
            placeholder: "nope".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "unknown placeholder '{nope}' in template 'a/{nope}/b'"
        );
    }
}
