//! Post-load reconciliation of row counts.

use crate::error::{ProvisionError, ValidationFailure, ValidationFailureKind};
use crate::rowstore::RowStore;
use crate::types::{RowStoreConfig, ValidationRecord};
use std::collections::HashMap;
use tracing::{error, info};

/// Records for every loaded table plus the tables that failed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub records: Vec<ValidationRecord>,
    pub failures: Vec<ValidationFailure>,
}

impl ValidationReport {
    pub fn into_result(self) -> Result<Vec<ValidationRecord>, ProvisionError> {
        if self.failures.is_empty() {
            Ok(self.records)
        } else {
            Err(ProvisionError::Validation(self.failures))
        }
    }
}

/// Compares row counts against "present and non-zero".
///
/// `loaded` are the tables the load phase reported as done, `skipped` the
/// tables whose source artifact never arrived. Skipped tables always fail,
/// even if a copy from an earlier run is still around.
pub fn reconcile(
    loaded: &[String],
    skipped: &[String],
    counts: &HashMap<String, i64>,
) -> ValidationReport {
    let mut report = ValidationReport::default();

    for table in loaded {
        let row_count = counts.get(table).copied();
        report.records.push(ValidationRecord {
            table_name: table.clone(),
            row_count: row_count.unwrap_or(0),
        });
        let kind = match row_count {
            None => Some(ValidationFailureKind::Missing),
            Some(0) => Some(ValidationFailureKind::Empty),
            Some(_) => None,
        };
        if let Some(kind) = kind {
            report.failures.push(ValidationFailure {
                table: table.clone(),
                kind,
            });
        }
    }

    for table in skipped {
        report.failures.push(ValidationFailure {
            table: table.clone(),
            kind: ValidationFailureKind::Skipped,
        });
    }

    report
}

/// Runs the reconciliation query on a fresh row-store connection, logs one
/// line per table and fails if any table did not pass.
pub async fn validate_tables(
    config: &RowStoreConfig,
    loaded: &[String],
    skipped: &[String],
) -> Result<Vec<ValidationRecord>, ProvisionError> {
    let counts = if loaded.is_empty() {
        HashMap::new()
    } else {
        let row_store = RowStore::connect(config).await?;
        row_store.count_rows(loaded).await?
    };

    let report = reconcile(loaded, skipped, &counts);
    for record in report.records.iter().filter(|r| r.row_count > 0) {
        info!("✅ {}: {} rows", record.table_name, record.row_count);
    }
    for failure in &report.failures {
        error!("❌ {}", failure);
    }
    report.into_result()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn non_empty_tables_pass() {
        let counts = HashMap::from([
            ("imdb_title_basics".to_string(), 10_i64),
            ("imdb_title_ratings".to_string(), 3),
        ]);
        let report = reconcile(
            &names(&["imdb_title_basics", "imdb_title_ratings"]),
            &[],
            &counts,
        );
        assert!(report.failures.is_empty());
        assert_eq!(report.records.len(), 2);
        assert_eq!(report.records[1].row_count, 3);
    }

    #[test]
    fn zero_rows_is_a_failure_even_after_a_successful_load() {
        let counts = HashMap::from([("imdb_title_ratings".to_string(), 0_i64)]);
        let report = reconcile(&names(&["imdb_title_ratings"]), &[], &counts);
        assert_eq!(
            report.failures,
            vec![ValidationFailure {
                table: "imdb_title_ratings".to_string(),
                kind: ValidationFailureKind::Empty,
            }]
        );
        assert!(matches!(
            report.into_result(),
            Err(ProvisionError::Validation(_))
        ));
    }

    #[test]
    fn missing_and_skipped_tables_fail() {
        let counts = HashMap::from([("stale".to_string(), 99_i64)]);
        let report = reconcile(&names(&["gone"]), &names(&["stale"]), &counts);
        let kinds: Vec<_> = report.failures.iter().map(|f| f.kind).collect();
        assert_eq!(
            kinds,
            vec![ValidationFailureKind::Missing, ValidationFailureKind::Skipped]
        );
        assert_eq!(report.records.len(), 1);
    }
}
