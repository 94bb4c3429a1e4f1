//! Manifest templates and their resolution into concrete artifact and table specs.

use crate::error::ManifestError;
use crate::types::{ArtifactSpec, ColumnDef, ColumnType, Manifest, TableLoadSpec};
use semver::Version;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Public bucket hosting the tutorial datasets.
pub const DEFAULT_BASE_URL: &str = "https://storage.googleapis.com/ibis-tutorial-data";

/// Placeholder replaced with the `<major>.<minor>` release tag of the engine.
pub const ENGINE_TAG: &str = "engine_tag";

/// Supplies the version of the embedded analytic engine.
pub trait VersionProvider {
    fn engine_version(&self) -> Result<Version, ManifestError>;
}

impl<T: VersionProvider + ?Sized> VersionProvider for Box<T> {
    fn engine_version(&self) -> Result<Version, ManifestError> {
        (**self).engine_version()
    }
}

/// Reads the version from a transient in-memory DuckDB connection.
#[derive(Debug, Default, Clone, Copy)]
pub struct DuckdbVersion;

impl VersionProvider for DuckdbVersion {
    fn engine_version(&self) -> Result<Version, ManifestError> {
        let conn = duckdb::Connection::open_in_memory()
            .map_err(|e| ManifestError::VersionUnavailable(e.to_string()))?;
        let raw: String = conn
            .query_row("SELECT library_version FROM pragma_version()", [], |row| {
                row.get(0)
            })
            .map_err(|e| ManifestError::VersionUnavailable(e.to_string()))?;
        parse_engine_version(&raw)
    }
}

/// A version fixed up front, e.g. pinned from the command line.
#[derive(Debug, Clone)]
pub struct FixedVersion(pub Version);

impl VersionProvider for FixedVersion {
    fn engine_version(&self) -> Result<Version, ManifestError> {
        Ok(self.0.clone())
    }
}

/// Parses `v1.1.3`, `1.1.3` or `1.1` into a semantic version.
pub fn parse_engine_version(raw: &str) -> Result<Version, ManifestError> {
    let trimmed = raw.trim().trim_start_matches('v');
    let core = trimmed
        .split(|c: char| c == '-' || c == '+' || c.is_whitespace())
        .next()
        .unwrap_or_default();
    let padded = match core.matches('.').count() {
        0 => format!("{}.0.0", core),
        1 => format!("{}.0", core),
        _ => core.to_string(),
    };
    Version::parse(&padded)
        .map_err(|e| ManifestError::VersionUnavailable(format!("unparseable version '{raw}': {e}")))
}

/// Remote artifact before placeholder resolution.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ArtifactTemplate {
    pub name: String,
    /// Remote path relative to the base URL, may contain `{engine_tag}`.
    pub path: String,
    /// Defaults to the first segment of `path`.
    #[serde(default)]
    pub category: Option<String>,
}

impl ArtifactTemplate {
    pub fn new(name: &str, path: &str) -> Self {
        Self {
            name: name.to_string(),
            path: path.to_string(),
            category: None,
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TableTemplate {
    pub source: String,
    pub table: String,
    pub columns: Vec<ColumnDef>,
}

/// Unresolved manifest, either built in or read from a JSON file.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ManifestTemplate {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    pub artifacts: Vec<ArtifactTemplate>,
    #[serde(default)]
    pub tables: Vec<TableTemplate>,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

impl ManifestTemplate {
    pub fn from_file(path: &Path) -> Result<Self, ManifestError> {
        let content = std::fs::read_to_string(path).map_err(|source| ManifestError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    /// The tutorial datasets: penguins, PyPI maintainers and IMDb.
    pub fn builtin() -> Self {
        let mut artifacts = vec![ArtifactTemplate::new(
            "palmer_penguins",
            "penguins/{engine_tag}/palmer_penguins.ddb",
        )];
        for name in [
            "deps",
            "maintainers",
            "package_urls",
            "packages",
            "scorecard_checks",
            "wheels",
        ] {
            artifacts.push(ArtifactTemplate::new(
                name,
                &format!("pypi/2024-04-24/{name}.parquet"),
            ));
        }
        for name in [
            "imdb_title_basics_sample_5",
            "imdb_title_basics",
            "imdb_title_ratings",
        ] {
            artifacts.push(ArtifactTemplate::new(
                name,
                &format!("imdb/2024-03-22/{name}.parquet"),
            ));
        }

        let tables = vec![
            TableTemplate {
                source: "imdb_title_basics".to_string(),
                table: "imdb_title_basics".to_string(),
                columns: vec![
                    ColumnDef::new("tconst", ColumnType::Text),
                    ColumnDef::new("titleType", ColumnType::Text),
                    ColumnDef::new("primaryTitle", ColumnType::Text),
                    ColumnDef::new("originalTitle", ColumnType::Text),
                    ColumnDef::new("isAdult", ColumnType::Bigint),
                    ColumnDef::new("startYear", ColumnType::Bigint),
                    ColumnDef::new("endYear", ColumnType::Bigint),
                    ColumnDef::new("runtimeMinutes", ColumnType::Bigint),
                    ColumnDef::new("genres", ColumnType::Text),
                ],
            },
            TableTemplate {
                source: "imdb_title_ratings".to_string(),
                table: "imdb_title_ratings".to_string(),
                columns: vec![
                    ColumnDef::new("tconst", ColumnType::Text),
                    ColumnDef::new("averageRating", ColumnType::Double),
                    ColumnDef::new("numVotes", ColumnType::Bigint),
                ],
            },
        ];

        Self {
            base_url: default_base_url(),
            artifacts,
            tables,
        }
    }
}

/// Turns a [`ManifestTemplate`] into a concrete [`Manifest`].
///
/// Resolution performs no I/O apart from asking the version provider, and
/// only does that when some template actually contains `{engine_tag}`.
pub struct ManifestResolver<V> {
    versions: V,
}

impl<V: VersionProvider> ManifestResolver<V> {
    pub fn new(versions: V) -> Self {
        Self { versions }
    }

    pub fn resolve(&self, template: &ManifestTemplate) -> Result<Manifest, ManifestError> {
        let needs_tag = template
            .artifacts
            .iter()
            .any(|a| a.path.contains(&format!("{{{ENGINE_TAG}}}")));

        let mut vars = HashMap::new();
        if needs_tag {
            let version = self.versions.engine_version()?;
            let tag = format!("{}.{}", version.major, version.minor);
            debug!("Resolved engine version {} to release tag {}", version, tag);
            vars.insert(ENGINE_TAG, tag);
        }

        let mut artifacts: Vec<ArtifactSpec> = Vec::with_capacity(template.artifacts.len());
        for entry in &template.artifacts {
            let spec = resolve_artifact(entry, &vars)?;

            if artifacts.iter().any(|a| a.logical_name == spec.logical_name) {
                return Err(ManifestError::DuplicateName(spec.logical_name));
            }
            if let Some(other) = artifacts
                .iter()
                .find(|a| a.local_relative_path == spec.local_relative_path)
            {
                return Err(ManifestError::DuplicateLocalPath {
                    first: other.logical_name.clone(),
                    second: spec.logical_name,
                    path: spec.local_relative_path,
                });
            }
            artifacts.push(spec);
        }

        let mut tables: Vec<TableLoadSpec> = Vec::with_capacity(template.tables.len());
        for entry in &template.tables {
            if !artifacts.iter().any(|a| a.logical_name == entry.source) {
                return Err(ManifestError::UnknownSource {
                    table: entry.table.clone(),
                    artifact: entry.source.clone(),
                });
            }
            if entry.table.is_empty() || entry.columns.is_empty() {
                return Err(ManifestError::Invalid(format!(
                    "table '{}' needs a name and at least one column",
                    entry.table
                )));
            }
            if tables.iter().any(|t| t.target_table_name == entry.table) {
                return Err(ManifestError::Invalid(format!(
                    "table '{}' is defined twice",
                    entry.table
                )));
            }
            for (i, column) in entry.columns.iter().enumerate() {
                if entry.columns[..i].iter().any(|c| c.name == column.name) {
                    return Err(ManifestError::Invalid(format!(
                        "table '{}' declares column '{}' twice",
                        entry.table, column.name
                    )));
                }
            }
            tables.push(TableLoadSpec {
                source_artifact: entry.source.clone(),
                target_table_name: entry.table.clone(),
                column_schema: entry.columns.clone(),
            });
        }

        Ok(Manifest {
            base_url: template.base_url.clone(),
            artifacts,
            tables,
        })
    }
}

fn resolve_artifact(
    entry: &ArtifactTemplate,
    vars: &HashMap<&str, String>,
) -> Result<ArtifactSpec, ManifestError> {
    let remote_path = substitute(&entry.path, vars)?;

    let file_name = remote_path
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ManifestError::Invalid(format!("path '{}' has no file name", entry.path)))?;

    let category = match &entry.category {
        Some(category) => category.clone(),
        None => match remote_path.split_once('/') {
            Some((first, _)) => first.to_string(),
            None => String::new(),
        },
    };
    if category.contains(['/', '\\']) || category == ".." {
        return Err(ManifestError::Invalid(format!(
            "category '{}' must be a single folder name",
            category
        )));
    }
    if file_name == ".." {
        return Err(ManifestError::Invalid(format!(
            "path '{}' escapes the data directory",
            entry.path
        )));
    }

    let local_relative_path = if category.is_empty() {
        PathBuf::from(file_name)
    } else {
        PathBuf::from(&category).join(file_name)
    };

    Ok(ArtifactSpec {
        logical_name: entry.name.clone(),
        remote_path_template: entry.path.clone(),
        remote_path,
        local_relative_path,
        category,
    })
}

/// Replaces every `{name}` in `template` with its value from `vars`.
fn substitute(template: &str, vars: &HashMap<&str, String>) -> Result<String, ManifestError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let end = after.find('}').ok_or_else(|| {
            ManifestError::Invalid(format!("unterminated placeholder in '{}'", template))
        })?;
        let name = &after[..end];
        let value = vars
            .get(name)
            .ok_or_else(|| ManifestError::UnknownPlaceholder {
                template: template.to_string(),
                placeholder: name.to_string(),
            })?;
        out.push_str(value);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}
