//! Dataset collection documents.
//!
//! Either a YAML index pointing at one JSON document per dataset:
//!
//! ```yaml
//! datasets:
//!   - name: obs1
//!     filename: obs1.json
//! ```
//!
//! or one JSON document `{"datasets": [...]}` holding every dataset inline.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::data::{Dataset, Datasets};
use crate::error::AppError;
use crate::io::maps::write_json_atomic;
use crate::models::config_dir;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetsIndex {
    pub datasets: Vec<DatasetEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetEntry {
    pub name: String,
    pub filename: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct InlineDatasets {
    datasets: Vec<Dataset>,
}

fn is_index(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase).as_deref(),
        Some("yaml" | "yml")
    )
}

/// Read a dataset collection, ready for fitting.
///
/// Integer PSF kernels are converted to floating point and fit masks are
/// cleared. The files on disk are left untouched.
pub fn read_datasets(path: &Path) -> Result<Datasets, AppError> {
    let text = fs::read_to_string(path)
        .map_err(|e| AppError::load(format!("Failed to read datasets '{}': {e}", path.display())))?;

    let raw = if is_index(path) {
        let index: DatasetsIndex = serde_yml::from_str(&text)
            .map_err(|e| AppError::load(format!("Invalid dataset index '{}': {e}", path.display())))?;
        let base = config_dir(path);
        index
            .datasets
            .iter()
            .map(|entry| read_entry(&base, entry))
            .collect::<Result<Vec<_>, _>>()?
    } else {
        let inline: InlineDatasets = serde_json::from_str(&text)
            .map_err(|e| AppError::load(format!("Invalid datasets '{}': {e}", path.display())))?;
        inline.datasets
    };

    if raw.is_empty() {
        return Err(AppError::load(format!("'{}' contains no datasets", path.display())));
    }

    let mut datasets = Datasets::new();
    for mut d in raw {
        d.psf.coerce_to_float();
        d.mask_fit = None;
        d.validate()
            .map_err(|e| AppError::load(format!("dataset '{}': {e}", d.name)))?;
        datasets.push(d)?;
    }

    if let Some(first) = datasets.first() {
        let geom = first.geom();
        if let Some(other) = datasets.iter().find(|d| !d.geom().same_footprint(geom)) {
            return Err(AppError::load(format!(
                "dataset '{}' does not share the sky geometry of '{}'",
                other.name, first.name
            )));
        }
    }

    log::info!("Loaded {} datasets from {}", datasets.len(), path.display());
    Ok(datasets)
}

fn read_entry(base: &Path, entry: &DatasetEntry) -> Result<Dataset, AppError> {
    let path = base.join(&entry.filename);
    let text = fs::read_to_string(&path)
        .map_err(|e| AppError::load(format!("Failed to read dataset '{}': {e}", path.display())))?;
    let mut dataset: Dataset = serde_json::from_str(&text)
        .map_err(|e| AppError::load(format!("Invalid dataset '{}': {e}", path.display())))?;
    // The index name wins over whatever the file carries.
    dataset.name = entry.name.clone();
    Ok(dataset)
}

/// Write each dataset to `<dir>/<name>.json` plus a YAML index at `index_path`.
pub fn write_datasets(datasets: &Datasets, dir: &Path, index_path: &Path) -> Result<(), AppError> {
    let mut index = DatasetsIndex { datasets: Vec::new() };
    for d in datasets.iter() {
        let filename = PathBuf::from(format!("{}.json", d.name));
        write_json_atomic(&dir.join(&filename), d, false)?;
        index.datasets.push(DatasetEntry {
            name: d.name.clone(),
            filename,
        });
    }
    let yaml = serde_yml::to_string(&index)
        .map_err(|e| AppError::write(format!("Failed to encode dataset index: {e}")))?;
    fs::write(index_path, yaml)
        .map_err(|e| AppError::write(format!("Failed to write '{}': {e}", index_path.display())))
}
