//! Map JSON codec.
//!
//! Two documents share the same `Map` encoding (`{geom, data}`, with `data`
//! in ndarray's serde layout):
//! - a bare `Map` (template files)
//! - a `MapBundleFile` (the per-dataset pipeline output)

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::sky::{Map, Maps};

pub const TOOL_NAME: &str = "skyreduce";

/// On-disk map bundle for one dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapBundleFile {
    pub tool: String,
    pub version: String,
    pub created: DateTime<Utc>,
    pub dataset: String,
    pub maps: Maps,
}

impl MapBundleFile {
    pub fn new(dataset: &str, maps: Maps) -> Self {
        Self {
            tool: TOOL_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            created: Utc::now(),
            dataset: dataset.to_string(),
            maps,
        }
    }
}

/// Persists one dataset's map bundle.
pub trait MapWriter: Send + Sync {
    fn write(&self, dataset: &str, maps: &Maps, path: &Path, overwrite: bool) -> Result<(), AppError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonMapWriter {
    pub pretty: bool,
}

impl MapWriter for JsonMapWriter {
    fn write(&self, dataset: &str, maps: &Maps, path: &Path, overwrite: bool) -> Result<(), AppError> {
        if !overwrite && path.exists() {
            return Err(AppError::write(format!("Refusing to overwrite '{}'", path.display())));
        }
        let file = MapBundleFile::new(dataset, maps.clone());
        write_json_atomic(path, &file, self.pretty)
    }
}

/// Read a bundle written by [`JsonMapWriter`].
pub fn read_maps(path: &Path) -> Result<MapBundleFile, AppError> {
    let text = fs::read_to_string(path)
        .map_err(|e| AppError::load(format!("Failed to read map bundle '{}': {e}", path.display())))?;
    let bundle: MapBundleFile = serde_json::from_str(&text)
        .map_err(|e| AppError::load(format!("Invalid map bundle '{}': {e}", path.display())))?;
    for (name, map) in bundle.maps.iter() {
        map.geom
            .check_shape(map.data.dim())
            .map_err(|e| AppError::load(format!("map '{name}' in '{}': {e}", path.display())))?;
    }
    Ok(bundle)
}

/// Read a single map document.
pub fn read_map(path: &Path) -> Result<Map, AppError> {
    let text = fs::read_to_string(path)
        .map_err(|e| AppError::load(format!("Failed to read map '{}': {e}", path.display())))?;
    let map: Map = serde_json::from_str(&text)
        .map_err(|e| AppError::load(format!("Invalid map '{}': {e}", path.display())))?;
    map.geom
        .check_shape(map.data.dim())
        .map_err(|e| AppError::load(format!("map '{}': {e}", path.display())))?;
    Ok(map)
}

pub fn write_map(path: &Path, map: &Map) -> Result<(), AppError> {
    write_json_atomic(path, map, false)
}

/// Serialize `value` next to `path` and rename it into place.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T, pretty: bool) -> Result<(), AppError> {
    let tmp = temp_path(path);
    let result = (|| {
        let file = File::create(&tmp)
            .map_err(|e| AppError::write(format!("Failed to create '{}': {e}", tmp.display())))?;
        let mut out = BufWriter::new(file);
        let encoded = if pretty {
            serde_json::to_writer_pretty(&mut out, value)
        } else {
            serde_json::to_writer(&mut out, value)
        };
        encoded.map_err(|e| AppError::write(format!("Failed to encode '{}': {e}", path.display())))?;
        out.flush()
            .map_err(|e| AppError::write(format!("Failed to write '{}': {e}", tmp.display())))?;
        fs::rename(&tmp, path)
            .map_err(|e| AppError::write(format!("Failed to move output into '{}': {e}", path.display())))
    })();
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    path.with_file_name(format!(".{name}.tmp"))
}
