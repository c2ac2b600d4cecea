use std::path::{Path, PathBuf};
use std::sync::Mutex;

use skyreduce::app::pipeline::{PipelineContext, RunOutput, run_pipeline};
use skyreduce::data::{FileCatalog, SimulationConfig, SimulationOutput, SourceCatalog, TableResolver, simulate};
use skyreduce::domain::{OutputSpec, PipelineConfig, ResolverChoice};
use skyreduce::error::{AppError, ErrorKind};
use skyreduce::fit::{PoissonFit, prepare_background_model};
use skyreduce::io::{JsonMapWriter, MapWriter, read_datasets, read_maps, write_datasets};
use skyreduce::models::read_and_prepare_models;
use skyreduce::sky::Maps;

struct Inputs {
    _dir: tempfile::TempDir,
    sim: SimulationOutput,
    exclusion: FileCatalog,
    source: FileCatalog,
    names: TableResolver,
}

fn inputs() -> Inputs {
    let dir = tempfile::tempdir().unwrap();
    let sim = simulate(dir.path(), &SimulationConfig::default()).unwrap();
    Inputs {
        exclusion: FileCatalog::read(&sim.catalog_3fhl).unwrap(),
        source: FileCatalog::read(&sim.catalog_4fgl).unwrap(),
        names: TableResolver::read(&sim.names).unwrap(),
        sim,
        _dir: dir,
    }
}

fn config(sim: &SimulationOutput) -> PipelineConfig {
    let mut c = PipelineConfig::new(&sim.datasets, &sim.models, &sim.catalog_3fhl, &sim.catalog_4fgl);
    c.resolver = ResolverChoice::Table(sim.names.clone());
    c
}

fn run_with(inputs: &Inputs, config: &PipelineConfig, writer: &dyn MapWriter) -> Result<RunOutput, AppError> {
    let fitter = PoissonFit::default();
    let ctx = PipelineContext {
        exclusion_catalog: &inputs.exclusion,
        source_catalog: &inputs.source,
        resolver: &inputs.names,
        fitter: &fitter,
        writer,
    };
    run_pipeline(config, &ctx)
}

fn dir_of(path: &Path) -> PathBuf {
    path.parent().unwrap().to_path_buf()
}

#[test]
fn two_datasets_reduce_to_psf_bundles() {
    let inputs = inputs();
    let config = config(&inputs.sim);
    let out = run_with(&inputs, &config, &JsonMapWriter::default()).unwrap();

    let base = dir_of(&inputs.sim.datasets);
    let expected = vec![base.join("obs1-maps.json"), base.join("obs2-maps.json")];
    assert_eq!(out.written, expected);

    for (path, name) in expected.iter().zip(["obs1", "obs2"]) {
        let bundle = read_maps(path).unwrap();
        assert_eq!(bundle.dataset, name);
        assert_eq!(bundle.tool, "skyreduce");
        let psf = bundle.maps.get("psf").unwrap();
        assert!(psf.sum() > 0.0);
        assert!(!bundle.maps.contains_key("norm"));
        assert!(!bundle.maps.contains_key("mask"));
        assert!(!bundle.maps.contains_key("kernel"));
        for key in ["counts", "background", "exposure"] {
            let map = bundle.maps.get(key).unwrap();
            assert_eq!(map.data.dim().0, 1, "{key} is an image");
            // 3 deg at 0.05 deg/pixel.
            assert_eq!(map.geom.npix, (60, 60), "{key} cutout size");
        }
    }
}

#[test]
fn only_the_background_norm_moves() {
    let inputs = inputs();
    let out = run_with(&inputs, &config(&inputs.sim), &JsonMapWriter::default()).unwrap();

    assert!(out.fit.success);
    assert!(out.fit.total_stat <= out.fit.initial_stat);
    assert_eq!(out.fit.parameters.len(), 1);
    assert_eq!(out.fit.parameters[0].label, "diffuse-iem.norm");

    let norm = out.models.get("diffuse-iem").unwrap().spectral.parameters.value("norm");
    assert!((norm - 1.0).abs() > 1e-3, "norm stayed at {norm}");
    // Simulated with 1.3.
    assert!((norm - 1.3).abs() < 0.2, "norm = {norm}");

    let fixed = out.models.get("4FGL J0854.8-4504").unwrap();
    let catalog = inputs.source.lookup("4FGL J0854.8-4504").unwrap().sky_model().unwrap();
    let values = |m: &skyreduce::models::SkyModel| m.parameters().map(|p| (p.name.clone(), p.value)).collect::<Vec<_>>();
    assert_eq!(values(fixed), values(&catalog));
    assert_eq!(fixed.free_parameter_count(), 0);

    assert!(out.models.get("3FHL J0851.9-4620e").is_none());
    let free: Vec<&str> = out
        .models
        .iter()
        .filter(|m| m.free_parameter_count() > 0)
        .map(|m| m.name.as_str())
        .collect();
    assert_eq!(free, vec!["diffuse-iem"]);
}

#[test]
fn fit_mask_is_the_complement_of_the_exclusion_circle() {
    let inputs = inputs();
    let config = config(&inputs.sim);
    let mut datasets = read_datasets(&config.datasets_path).unwrap();
    assert!(datasets.iter().all(|d| d.mask_fit.is_none()));
    let mut models =
        read_and_prepare_models(&config.models_path, &config.assembly_plan(), &inputs.source).unwrap();
    let center = inputs.exclusion.lookup(&config.exclusion_source).unwrap().position;
    let region = config.exclusion_region(center);

    prepare_background_model(&mut datasets, &mut models, &region, &PoissonFit::default()).unwrap();

    for d in datasets.iter() {
        let inside = d.geom().region_mask(&region);
        let fit = &d.mask_fit.as_ref().unwrap().data;
        assert_eq!(fit.dim(), inside.dim());
        assert!(fit.iter().zip(inside.iter()).all(|(f, i)| *f == !*i));
        assert!(inside.iter().any(|v| *v));
    }
}

#[test]
fn explicit_outputs_follow_dataset_order() {
    let inputs = inputs();
    let mut config = config(&inputs.sim);
    let base = dir_of(&inputs.sim.datasets);
    let outputs = vec![base.join("z-first.json"), base.join("a-second.json")];
    config.outputs = OutputSpec::Paths(outputs.clone());
    run_with(&inputs, &config, &JsonMapWriter::default()).unwrap();

    assert_eq!(read_maps(&outputs[0]).unwrap().dataset, "obs1");
    assert_eq!(read_maps(&outputs[1]).unwrap().dataset, "obs2");
}

#[test]
fn output_count_mismatch_writes_nothing() {
    let inputs = inputs();
    let mut config = config(&inputs.sim);
    let only = dir_of(&inputs.sim.datasets).join("only.json");
    config.outputs = OutputSpec::Paths(vec![only.clone()]);
    let err = run_with(&inputs, &config, &JsonMapWriter::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
    assert!(!only.exists());
}

/// Fails for one dataset, records the others.
struct FlakyWriter {
    fail_for: &'static str,
    seen: Mutex<Vec<String>>,
}

impl MapWriter for FlakyWriter {
    fn write(&self, dataset: &str, maps: &Maps, path: &Path, overwrite: bool) -> Result<(), AppError> {
        self.seen.lock().unwrap().push(dataset.to_string());
        if dataset == self.fail_for {
            return Err(AppError::write(format!("disk full at {}", path.display())));
        }
        JsonMapWriter::default().write(dataset, maps, path, overwrite)
    }
}

#[test]
fn a_failed_write_does_not_stop_the_rest() {
    let inputs = inputs();
    let config = config(&inputs.sim);
    let writer = FlakyWriter {
        fail_for: "obs1",
        seen: Mutex::new(Vec::new()),
    };
    let err = run_with(&inputs, &config, &writer).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Write);
    assert_eq!(*writer.seen.lock().unwrap(), vec!["obs1", "obs2"]);

    let base = dir_of(&inputs.sim.datasets);
    assert!(!base.join("obs1-maps.json").exists());
    assert!(read_maps(&base.join("obs2-maps.json")).is_ok());
}

#[test]
fn target_is_found_through_the_exclusion_catalog() {
    let inputs = inputs();
    let mut config = config(&inputs.sim);
    config.resolver = ResolverChoice::Catalog;
    let fitter = PoissonFit::default();
    let resolver = skyreduce::data::CatalogResolver::new(&inputs.exclusion);
    let ctx = PipelineContext {
        exclusion_catalog: &inputs.exclusion,
        source_catalog: &inputs.source,
        resolver: &resolver,
        fitter: &fitter,
        writer: &JsonMapWriter::default(),
    };
    let out = run_pipeline(&config, &ctx).unwrap();
    assert!(out.target.separation(&skyreduce::data::vela_junior()) < 1e-9);
}

#[test]
fn include_ts_adds_significance_maps() {
    let inputs = inputs();
    let mut config = config(&inputs.sim);
    config.include_ts = true;
    config.cutout_width = 1.0;
    let out = run_with(&inputs, &config, &JsonMapWriter::default()).unwrap();
    let bundle = read_maps(&out.written[0]).unwrap();
    let ts = bundle.maps.get("ts").unwrap();
    assert!(ts.data.iter().all(|v| *v >= 0.0));
    assert!(bundle.maps.contains_key("sqrt_ts"));
    assert!(bundle.maps.contains_key("flux"));
    assert!(!bundle.maps.contains_key("norm"));
}

/// Copy of the simulated datasets where `name` observed nothing.
fn with_empty_dataset(inputs: &Inputs, name: &str) -> PathBuf {
    let mut datasets = read_datasets(&inputs.sim.datasets).unwrap();
    for d in datasets.iter_mut().filter(|d| d.name == name) {
        d.exposure.data.fill(0.0);
        d.counts.data.fill(0.0);
    }
    let dir = dir_of(&inputs.sim.datasets).join("degraded");
    std::fs::create_dir_all(&dir).unwrap();
    let index = dir.join("datasets.yaml");
    write_datasets(&datasets, &dir, &index).unwrap();
    index
}

#[test]
fn a_failed_reduction_still_writes_the_other_bundle() {
    let inputs = inputs();
    let mut config = config(&inputs.sim);
    config.datasets_path = with_empty_dataset(&inputs, "obs2");

    let err = run_with(&inputs, &config, &JsonMapWriter::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Estimation);
    assert!(err.message().contains("obs2"), "{}", err.message());

    let base = dir_of(&config.datasets_path);
    assert_eq!(read_maps(&base.join("obs1-maps.json")).unwrap().dataset, "obs1");
    assert!(!base.join("obs2-maps.json").exists());
}

#[test]
fn estimation_failure_wins_over_a_write_failure() {
    let inputs = inputs();
    let mut config = config(&inputs.sim);
    config.datasets_path = with_empty_dataset(&inputs, "obs2");
    let writer = FlakyWriter {
        fail_for: "obs1",
        seen: Mutex::new(Vec::new()),
    };

    let err = run_with(&inputs, &config, &writer).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Estimation);
    assert_eq!(*writer.seen.lock().unwrap(), vec!["obs1"]);
    assert!(!dir_of(&config.datasets_path).join("obs1-maps.json").exists());
}

#[test]
fn target_far_from_the_dataset_center_keeps_its_psf() {
    let inputs = inputs();
    let mut config = config(&inputs.sim);
    let geom = read_datasets(&inputs.sim.datasets).unwrap().first().unwrap().geom().clone();
    // Inside the footprint, 1.4 deg from the center on both axes.
    let target = geom.pixel_to_coord(4.0, 4.0);
    config.target = "offset".to_string();
    let resolver = Fixed(target);
    let fitter = PoissonFit::default();
    let ctx = PipelineContext {
        exclusion_catalog: &inputs.exclusion,
        source_catalog: &inputs.source,
        resolver: &resolver,
        fitter: &fitter,
        writer: &JsonMapWriter::default(),
    };
    let out = run_pipeline(&config, &ctx).unwrap();
    let bundle = read_maps(&out.written[0]).unwrap();
    let psf = bundle.maps.get("psf").unwrap();
    assert!(psf.geom.center.separation(&target) < 1e-9);
    assert!(bundle.maps.get("counts").unwrap().geom.npix.0 < 60);
}

struct Fixed(skyreduce::sky::SkyCoord);

impl skyreduce::data::NameResolver for Fixed {
    fn resolve(&self, _name: &str) -> Result<skyreduce::sky::SkyCoord, AppError> {
        Ok(self.0)
    }
}
