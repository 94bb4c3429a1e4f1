//! Local directory layout for cached artifacts.

use crate::error::ProvisionError;
use crate::types::ArtifactSpec;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Ensures `<data_dir>/<category>` exists for every distinct category.
///
/// Existing directories and their contents are left untouched. Returns the
/// category directories in sorted order.
pub fn provision_directories(
    data_dir: &Path,
    artifacts: &[ArtifactSpec],
) -> Result<Vec<PathBuf>, ProvisionError> {
    let categories: BTreeSet<&str> = artifacts.iter().map(|a| a.category.as_str()).collect();

    create_dir(data_dir)?;

    let mut created = Vec::with_capacity(categories.len());
    for category in categories {
        let dir = data_dir.join(category);
        create_dir(&dir)?;
        created.push(dir);
    }
    Ok(created)
}

fn create_dir(dir: &Path) -> Result<(), ProvisionError> {
    std::fs::create_dir_all(dir).map_err(|source| ProvisionError::Filesystem {
        path: dir.to_path_buf(),
        source,
    })?;
    debug!("Directory ready: {}", dir.display());
    Ok(())
}
