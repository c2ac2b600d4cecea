//! Source catalogs.
//!
//! The pipeline consults two catalogs: one for the bright source whose
//! surroundings are excluded from the background fit, one for the extra
//! source appended to the model. Both are injected as trait objects so a run
//! owns its catalogs for exactly its own lifetime.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::{SkyModel, SpatialModel, SpectralModel};
use crate::sky::SkyCoord;

/// Lookup of sources by catalog identifier.
pub trait SourceCatalog: Send + Sync {
    fn name(&self) -> &str;

    fn lookup(&self, id: &str) -> Result<SourceRecord, AppError>;
}

/// One catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub name: String,
    /// Association or common names also accepted by `lookup`.
    #[serde(default)]
    pub aliases: Vec<String>,
    pub position: SkyCoord,
    pub spectral: SpectralModel,
    /// Defaults to a point source at `position`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spatial: Option<SpatialModel>,
}

impl SourceRecord {
    pub fn matches(&self, id: &str) -> bool {
        let id = normalize_id(id);
        normalize_id(&self.name) == id || self.aliases.iter().any(|a| normalize_id(a) == id)
    }

    /// Model component representing this source.
    pub fn sky_model(&self) -> Result<SkyModel, AppError> {
        let spectral = self
            .spectral
            .clone()
            .with_defaults()
            .map_err(|e| AppError::catalog(format!("source '{}': {e}", self.name)))?;
        let spatial = match &self.spatial {
            Some(s) => s
                .clone()
                .with_defaults()
                .map_err(|e| AppError::catalog(format!("source '{}': {e}", self.name)))?,
            None => SpatialModel::point(self.position),
        };
        Ok(SkyModel::new(self.name.clone(), spectral, spatial))
    }
}

fn normalize_id(id: &str) -> String {
    id.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// Catalog document as stored on disk (YAML or JSON).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogFile {
    pub name: String,
    pub sources: Vec<SourceRecord>,
}

/// In-memory catalog, usually read from a [`CatalogFile`].
#[derive(Debug, Clone)]
pub struct FileCatalog {
    name: String,
    sources: Vec<SourceRecord>,
}

impl FileCatalog {
    pub fn new(name: impl Into<String>, sources: Vec<SourceRecord>) -> Self {
        Self {
            name: name.into(),
            sources,
        }
    }

    pub fn read(path: &Path) -> Result<Self, AppError> {
        let text = fs::read_to_string(path)
            .map_err(|e| AppError::catalog(format!("Failed to read catalog '{}': {e}", path.display())))?;
        let file: CatalogFile = serde_yml::from_str(&text)
            .map_err(|e| AppError::catalog(format!("Invalid catalog '{}': {e}", path.display())))?;
        log::debug!("catalog {}: {} sources from {}", file.name, file.sources.len(), path.display());
        Ok(Self::new(file.name, file.sources))
    }

    pub fn sources(&self) -> &[SourceRecord] {
        &self.sources
    }
}

impl SourceCatalog for FileCatalog {
    fn name(&self) -> &str {
        &self.name
    }

    fn lookup(&self, id: &str) -> Result<SourceRecord, AppError> {
        self.sources
            .iter()
            .find(|s| s.matches(id))
            .cloned()
            .ok_or_else(|| AppError::catalog(format!("source '{id}' not found in catalog {}", self.name)))
    }
}
