//! Main orchestration logic for a provisioning run.

use crate::bridge::{DatabaseBridge, LoadJob};
use crate::cache::FetchCache;
use crate::error::ProvisionError;
use crate::layout::provision_directories;
use crate::manifest::{ManifestResolver, ManifestTemplate, VersionProvider};
use crate::types::{ExecutionStage, FetchStatus, Manifest, ProvisionConfig, RunReport};
use crate::validate::validate_tables;
use tracing::{info, warn};

/// Resolves the manifest without touching the network or the filesystem.
pub fn plan<V: VersionProvider>(
    template: &ManifestTemplate,
    versions: V,
) -> Result<Manifest, ProvisionError> {
    Ok(ManifestResolver::new(versions).resolve(template)?)
}

/// Provisions the local data environment.
///
/// This is the main entry point. It performs the following steps:
///
/// 1. Resolves the manifest (fatal on failure, before any I/O)
/// 2. Creates the category directories under the data directory
/// 3. Fetches artifacts, skipping ones already cached (failures are recorded)
/// 4. Loads tables whose source artifact is available (fail-fast)
/// 5. Validates row counts of every table
///
/// `stage` limits the run to fetching, or to loading from the cache only.
///
/// # Example
///
/// ```no_run
/// use dataprov::{provision, DuckdbVersion, ExecutionStage, ManifestTemplate, ProvisionConfig};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = ProvisionConfig::default();
/// let report = provision(&config, &ManifestTemplate::builtin(), DuckdbVersion, ExecutionStage::All).await?;
/// println!("{} tables loaded", report.loaded_tables.len());
/// # Ok(())
/// # }
/// ```
pub async fn provision<V: VersionProvider>(
    config: &ProvisionConfig,
    template: &ManifestTemplate,
    versions: V,
    stage: ExecutionStage,
) -> Result<RunReport, ProvisionError> {
    let manifest = plan(template, versions)?;
    info!(
        "Manifest: {} artifact(s), {} table(s) from {}",
        manifest.artifacts.len(),
        manifest.tables.len(),
        manifest.base_url
    );

    let mut config = config.clone();
    if stage == ExecutionStage::LoadOnly {
        config.offline = true;
    }

    provision_directories(&config.data_dir, &manifest.artifacts)?;

    let fetch = FetchCache::new(&config, &manifest.base_url)?
        .fetch_all(&manifest)
        .await;

    let mut report = RunReport {
        fetch,
        ..RunReport::default()
    };

    if stage == ExecutionStage::FetchOnly {
        let failed = report.fetch.count(FetchStatus::Failed);
        if failed > 0 {
            return Err(ProvisionError::FetchIncomplete(failed));
        }
        return Ok(report);
    }

    let mut jobs = Vec::new();
    let mut skipped = Vec::new();
    for table in &manifest.tables {
        match manifest.artifact(&table.source_artifact) {
            Some(artifact) if report.fetch.is_available(&table.source_artifact) => {
                jobs.push(LoadJob {
                    spec: table.clone(),
                    artifact: artifact.local_path(&config.data_dir),
                });
            }
            _ => {
                warn!(
                    "Skipping load of {}: artifact '{}' is unavailable",
                    table.target_table_name, table.source_artifact
                );
                skipped.push(table.target_table_name.clone());
            }
        }
    }

    if !jobs.is_empty() {
        info!("Loading {} table(s) into the row store", jobs.len());
        let bridge = DatabaseBridge::open(&config.row_store).await?;
        report.loaded_tables = bridge.load_all(&jobs).await?;
    }

    if !manifest.tables.is_empty() {
        report.validation =
            validate_tables(&config.row_store, &report.loaded_tables, &skipped).await?;
    }

    Ok(report)
}
