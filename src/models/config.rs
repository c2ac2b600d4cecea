//! YAML model configuration.
//!
//! ```yaml
//! components:
//!   - name: diffuse-iem
//!     type: SkyModel
//!     spectral:
//!       type: PowerLawNormSpectralModel
//!       parameters:
//!         - {name: norm, value: 1.0}
//!     spatial:
//!       type: TemplateSpatialModel
//!       filename: gll_iem_v07_cutout.json
//!       normalize: false
//! ```
//!
//! Template file names are resolved against the directory holding the
//! configuration, not the working directory of the process.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::io::maps::read_map;
use crate::models::sky_model::{Models, SkyModel};
use crate::models::spatial::SpatialKind;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelsConfig {
    pub components: Vec<SkyModel>,
}

impl ModelsConfig {
    pub fn from_yaml(text: &str) -> Result<Self, AppError> {
        serde_yml::from_str(text).map_err(|e| AppError::config(format!("Invalid model configuration: {e}")))
    }

    pub fn to_yaml(&self) -> Result<String, AppError> {
        serde_yml::to_string(self).map_err(|e| AppError::config(format!("Failed to serialize models: {e}")))
    }
}

/// Read a model configuration file without resolving anything.
pub fn read_models_config(path: &Path) -> Result<ModelsConfig, AppError> {
    let text = fs::read_to_string(path).map_err(|e| {
        AppError::config(format!("Failed to read model configuration '{}': {e}", path.display()))
    })?;
    ModelsConfig::from_yaml(&text)
}

/// Point every template `filename` at `<base_dir>/<file name>`.
///
/// Only the file name of the configured path is kept, so applying this twice
/// with the same `base_dir` gives the same result.
pub fn resolve_template_paths(config: &mut ModelsConfig, base_dir: &Path) {
    for component in &mut config.components {
        if let Some(filename) = component.spatial.filename.as_mut() {
            if let Some(name) = filename.file_name() {
                *filename = base_dir.join(name);
            }
        }
    }
}

/// Fill parameter defaults and load template maps, producing a model set.
pub fn build_models(config: ModelsConfig) -> Result<Models, AppError> {
    let mut components = Vec::with_capacity(config.components.len());
    for mut c in config.components {
        c.spectral = c
            .spectral
            .with_defaults()
            .map_err(|e| AppError::config(format!("component '{}': {e}", c.name)))?;
        c.spatial = c
            .spatial
            .with_defaults()
            .map_err(|e| AppError::config(format!("component '{}': {e}", c.name)))?;

        if c.spatial.kind == SpatialKind::Template {
            let path = c.spatial.filename.clone().unwrap_or_default();
            let map = read_map(&path).map_err(|e| {
                AppError::config(format!("component '{}': template '{}': {}", c.name, path.display(), e.message()))
            })?;
            c.spatial.frame = map.geom.frame();
            c.spatial.template = Some(map);
        }
        components.push(c);
    }
    Models::new(components)
}

/// Directory that relative template paths are resolved against.
pub fn config_dir(path: &Path) -> PathBuf {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
components:
  - name: diffuse-iem
    type: SkyModel
    spectral:
      type: PowerLawNormSpectralModel
      parameters:
        - name: norm
          value: 1.0
    spatial:
      type: TemplateSpatialModel
      filename: /somewhere/else/diffuse.json
      normalize: false
  - name: src
    spectral:
      type: PowerLawSpectralModel
    spatial:
      type: PointSpatialModel
      frame: icrs
      parameters:
        - {name: lon_0, value: 133.0}
        - {name: lat_0, value: -46.3}
"#;

    #[test]
    fn parses_components() {
        let cfg = ModelsConfig::from_yaml(YAML).unwrap();
        assert_eq!(cfg.components.len(), 2);
        assert_eq!(cfg.components[0].spatial.kind, SpatialKind::Template);
        assert!(!cfg.components[0].spatial.normalize);
        assert!(cfg.components[1].spatial.normalize);
    }

    #[test]
    fn template_paths_are_rewritten_idempotently() {
        let mut cfg = ModelsConfig::from_yaml(YAML).unwrap();
        let base = Path::new("/data/models");
        resolve_template_paths(&mut cfg, base);
        let first = cfg.components[0].spatial.filename.clone();
        resolve_template_paths(&mut cfg, base);
        assert_eq!(first, cfg.components[0].spatial.filename);
        assert_eq!(first, Some(PathBuf::from("/data/models/diffuse.json")));
        assert_eq!(cfg.components[1].spatial.filename, None);
    }

    #[test]
    fn malformed_yaml_is_a_config_error() {
        let err = ModelsConfig::from_yaml("components: [{name: x}]").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Config);
    }

    #[test]
    fn config_dir_of_bare_file_name_is_cwd() {
        assert_eq!(config_dir(Path::new("models.yaml")), PathBuf::from("."));
        assert_eq!(config_dir(Path::new("a/b/models.yaml")), PathBuf::from("a/b"));
    }
}
