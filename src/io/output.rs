//! Writing the reduced bundles to their destinations.

use std::path::{Path, PathBuf};

use crate::error::AppError;
use crate::estimate::ReducedDataset;
use crate::io::maps::MapWriter;

/// `<dir>/<dataset>-maps.json` for every dataset, in order.
pub fn default_destinations(dir: &Path, names: &[String]) -> Vec<PathBuf> {
    names.iter().map(|n| dir.join(format!("{n}-maps.json"))).collect()
}

/// Write bundle `i` to `destinations[i]`, overwriting.
///
/// Every destination is attempted; datasets whose reduction failed are
/// skipped. Returns the paths written, or a `Write` error naming every
/// destination that failed.
pub fn write_outputs(
    reduced: &[ReducedDataset],
    destinations: &[PathBuf],
    writer: &dyn MapWriter,
) -> Result<Vec<PathBuf>, AppError> {
    if reduced.len() != destinations.len() {
        return Err(AppError::config(format!(
            "{} datasets but {} output destinations",
            reduced.len(),
            destinations.len()
        )));
    }

    let mut written = Vec::new();
    let mut failures = Vec::new();
    for (item, path) in reduced.iter().zip(destinations) {
        let Ok(maps) = &item.maps else {
            log::warn!("Skipping {} for dataset '{}' (reduction failed)", path.display(), item.name);
            continue;
        };
        log::info!("Writing {}", path.display());
        match writer.write(&item.name, maps, path, true) {
            Ok(()) => written.push(path.clone()),
            Err(e) => {
                log::error!("{e}");
                failures.push(e.message().to_string());
            }
        }
    }

    if failures.is_empty() {
        Ok(written)
    } else {
        Err(AppError::write(format!(
            "{} of {} outputs failed: {}",
            failures.len(),
            destinations.len(),
            failures.join("; ")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::sky::Maps;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingWriter {
        calls: Mutex<Vec<(String, PathBuf)>>,
        fail_on: Option<PathBuf>,
    }

    impl MapWriter for RecordingWriter {
        fn write(&self, dataset: &str, _maps: &Maps, path: &Path, _overwrite: bool) -> Result<(), AppError> {
            self.calls.lock().unwrap().push((dataset.to_string(), path.to_path_buf()));
            if self.fail_on.as_deref() == Some(path) {
                return Err(AppError::write("disk full"));
            }
            Ok(())
        }
    }

    fn reduced(names: &[&str]) -> Vec<ReducedDataset> {
        names
            .iter()
            .map(|n| ReducedDataset {
                name: n.to_string(),
                maps: Ok(Maps::new()),
            })
            .collect()
    }

    #[test]
    fn bundles_go_to_destinations_in_order() {
        let w = RecordingWriter::default();
        let dest = vec![PathBuf::from("b.json"), PathBuf::from("a.json")];
        let written = write_outputs(&reduced(&["obs1", "obs2"]), &dest, &w).unwrap();
        assert_eq!(written, dest);
        let calls = w.calls.lock().unwrap();
        assert_eq!(calls[0], ("obs1".to_string(), PathBuf::from("b.json")));
        assert_eq!(calls[1], ("obs2".to_string(), PathBuf::from("a.json")));
    }

    #[test]
    fn length_mismatch_writes_nothing() {
        let w = RecordingWriter::default();
        let err = write_outputs(&reduced(&["obs1", "obs2"]), &[PathBuf::from("a.json")], &w).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert!(w.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn one_failure_does_not_stop_the_rest() {
        let w = RecordingWriter {
            fail_on: Some(PathBuf::from("a.json")),
            ..Default::default()
        };
        let dest = vec![PathBuf::from("a.json"), PathBuf::from("b.json")];
        let err = write_outputs(&reduced(&["obs1", "obs2"]), &dest, &w).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Write);
        assert_eq!(w.calls.lock().unwrap().len(), 2);
    }

    #[test]
    fn default_destinations_use_dataset_names() {
        let d = default_destinations(Path::new("out"), &["obs1".to_string()]);
        assert_eq!(d, vec![PathBuf::from("out/obs1-maps.json")]);
    }
}
