//! Run configuration shared by the CLI and the pipeline.
//!
//! The defaults reproduce the Vela Junior reduction: the Galactic diffuse
//! component is refit outside a circle around RX J0852.0-4622, the 3FHL
//! extended-source entry is swapped for a fixed 4FGL point source, and the
//! bundles are cut to 3 degrees around the target.

use std::path::{Path, PathBuf};

use crate::error::AppError;
use crate::estimate::ReduceOptions;
use crate::models::AssemblyPlan;
use crate::sky::{CircleSkyRegion, SkyCoord};

pub const DEFAULT_BACKGROUND_COMPONENT: &str = "diffuse-iem";
pub const DEFAULT_REMOVED_COMPONENT: &str = "3FHL J0851.9-4620e";
pub const DEFAULT_APPENDED_SOURCE: &str = "4FGL J0854.8-4504";
pub const DEFAULT_EXCLUSION_SOURCE: &str = "RX J0852.0-4622";
pub const DEFAULT_TARGET: &str = "Vela Junior";
/// Degrees.
pub const DEFAULT_EXCLUSION_RADIUS: f64 = 1.05;
/// Degrees.
pub const DEFAULT_CUTOUT_WIDTH: f64 = 3.0;

/// Assembly plan with the default component names.
pub fn default_assembly_plan() -> AssemblyPlan {
    AssemblyPlan {
        background: DEFAULT_BACKGROUND_COMPONENT.to_string(),
        remove: DEFAULT_REMOVED_COMPONENT.to_string(),
        append_source: DEFAULT_APPENDED_SOURCE.to_string(),
    }
}

/// How the target name becomes a sky position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolverChoice {
    /// Look the name up in the exclusion catalog (names and aliases).
    Catalog,
    /// YAML table of `name -> position`.
    Table(PathBuf),
    /// CDS Sesame over HTTP.
    Sesame,
}

/// Where the per-dataset bundles go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputSpec {
    /// `<datasets dir>/<name>-maps.json`.
    Default,
    /// `<dir>/<name>-maps.json`.
    Dir(PathBuf),
    /// One explicit path per dataset, in dataset order.
    Paths(Vec<PathBuf>),
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub datasets_path: PathBuf,
    pub models_path: PathBuf,
    pub catalog_3fhl: PathBuf,
    pub catalog_4fgl: PathBuf,
    pub resolver: ResolverChoice,
    pub outputs: OutputSpec,

    pub background_component: String,
    pub removed_component: String,
    pub appended_source: String,
    pub exclusion_source: String,
    pub target: String,

    pub exclusion_radius: f64,
    pub cutout_width: f64,
    /// Add `ts`, `sqrt_ts` and `flux` to the bundles.
    pub include_ts: bool,
}

impl PipelineConfig {
    /// Configuration with the default component names and geometry.
    pub fn new(
        datasets_path: impl Into<PathBuf>,
        models_path: impl Into<PathBuf>,
        catalog_3fhl: impl Into<PathBuf>,
        catalog_4fgl: impl Into<PathBuf>,
    ) -> Self {
        Self {
            datasets_path: datasets_path.into(),
            models_path: models_path.into(),
            catalog_3fhl: catalog_3fhl.into(),
            catalog_4fgl: catalog_4fgl.into(),
            resolver: ResolverChoice::Catalog,
            outputs: OutputSpec::Default,
            background_component: DEFAULT_BACKGROUND_COMPONENT.to_string(),
            removed_component: DEFAULT_REMOVED_COMPONENT.to_string(),
            appended_source: DEFAULT_APPENDED_SOURCE.to_string(),
            exclusion_source: DEFAULT_EXCLUSION_SOURCE.to_string(),
            target: DEFAULT_TARGET.to_string(),
            exclusion_radius: DEFAULT_EXCLUSION_RADIUS,
            cutout_width: DEFAULT_CUTOUT_WIDTH,
            include_ts: false,
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if !(self.exclusion_radius.is_finite() && self.exclusion_radius > 0.0) {
            return Err(AppError::config(format!(
                "exclusion radius must be > 0 deg, got {}",
                self.exclusion_radius
            )));
        }
        if !(self.cutout_width.is_finite() && self.cutout_width > 0.0) {
            return Err(AppError::config(format!(
                "cutout width must be > 0 deg, got {}",
                self.cutout_width
            )));
        }
        if let OutputSpec::Paths(paths) = &self.outputs {
            if paths.is_empty() {
                return Err(AppError::config("explicit output list is empty"));
            }
        }
        Ok(())
    }

    pub fn assembly_plan(&self) -> AssemblyPlan {
        AssemblyPlan {
            background: self.background_component.clone(),
            remove: self.removed_component.clone(),
            append_source: self.appended_source.clone(),
        }
    }

    pub fn exclusion_region(&self, center: SkyCoord) -> CircleSkyRegion {
        CircleSkyRegion::new(center, self.exclusion_radius)
    }

    pub fn reduce_options(&self, target: SkyCoord) -> ReduceOptions {
        ReduceOptions {
            target,
            width: self.cutout_width,
            include_ts: self.include_ts,
        }
    }

    /// Directory used for default output paths.
    pub fn datasets_dir(&self) -> &Path {
        match self.datasets_path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        }
    }

    /// Concrete destinations for `names`, in order.
    pub fn destinations(&self, names: &[String]) -> Vec<PathBuf> {
        match &self.outputs {
            OutputSpec::Default => crate::io::default_destinations(self.datasets_dir(), names),
            OutputSpec::Dir(dir) => crate::io::default_destinations(dir, names),
            OutputSpec::Paths(paths) => paths.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn config() -> PipelineConfig {
        PipelineConfig::new("data/in/datasets.yaml", "models.yaml", "3fhl.yaml", "4fgl.yaml")
    }

    #[test]
    fn defaults_describe_the_vela_junior_run() {
        let c = config();
        assert_eq!(c.exclusion_radius, 1.05);
        assert_eq!(c.cutout_width, 3.0);
        assert!(!c.include_ts);
        let plan = c.assembly_plan();
        assert_eq!(plan.background, "diffuse-iem");
        assert_eq!(plan.remove, "3FHL J0851.9-4620e");
        assert_eq!(plan.append_source, "4FGL J0854.8-4504");
        assert_eq!(c.resolver, ResolverChoice::Catalog);
    }

    #[test]
    fn default_destinations_sit_next_to_the_datasets() {
        let c = config();
        let out = c.destinations(&["obs1".to_string(), "obs2".to_string()]);
        assert_eq!(
            out,
            vec![
                PathBuf::from("data/in/obs1-maps.json"),
                PathBuf::from("data/in/obs2-maps.json")
            ]
        );
    }

    #[test]
    fn bare_file_name_uses_current_directory() {
        let c = PipelineConfig::new("datasets.yaml", "m.yaml", "a", "b");
        assert_eq!(c.datasets_dir(), Path::new("."));
    }

    #[test]
    fn explicit_paths_are_passed_through() {
        let mut c = config();
        c.outputs = OutputSpec::Paths(vec![PathBuf::from("x.json")]);
        assert_eq!(c.destinations(&["a".into(), "b".into()]), vec![PathBuf::from("x.json")]);
    }

    #[test]
    fn rejects_non_positive_geometry() {
        let mut c = config();
        c.cutout_width = 0.0;
        assert_eq!(c.validate().unwrap_err().kind(), ErrorKind::Config);
        let mut c = config();
        c.exclusion_radius = f64::NAN;
        assert_eq!(c.validate().unwrap_err().kind(), ErrorKind::Config);
    }
}
