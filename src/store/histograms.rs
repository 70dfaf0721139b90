use std::collections::BTreeMap;
use std::path::Path;

use fnv::FnvHashMap;

use crate::error::CalibError;
use crate::histoer::any::AnyHistogram;

/// Accumulated histograms, summed over runs on request.
pub trait HistogramSource {
    /// The named histogram summed over `runs`. `None` when no run contributed it.
    fn histogram(&self, name: &str, runs: &[u32]) -> Option<AnyHistogram>;
}

/// One file of named histograms. Run numbers are ignored, which suits a Monte-Carlo reference.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct HistogramFile {
    pub histograms: FnvHashMap<String, AnyHistogram>,
}

impl HistogramFile {
    pub fn load(path: &Path) -> Result<Self, CalibError> {
        let text = std::fs::read_to_string(path)?;
        let file: Self = serde_json::from_str(&text)?;
        log::info!(
            "Loaded {} histogram(s) from {}",
            file.histograms.len(),
            path.display()
        );
        Ok(file)
    }

    pub fn insert(&mut self, histogram: AnyHistogram) {
        self.histograms
            .insert(histogram.name().to_owned(), histogram);
    }
}

impl HistogramSource for HistogramFile {
    fn histogram(&self, name: &str, _runs: &[u32]) -> Option<AnyHistogram> {
        self.histograms.get(name).cloned()
    }
}

/// Per-run histogram files.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct HistogramArchive {
    pub runs: BTreeMap<u32, HistogramFile>,
}

impl HistogramArchive {
    pub fn load(path: &Path) -> Result<Self, CalibError> {
        let text = std::fs::read_to_string(path)?;
        let archive: Self = serde_json::from_str(&text)?;
        log::info!(
            "Loaded histograms of {} run(s) from {}",
            archive.runs.len(),
            path.display()
        );
        Ok(archive)
    }

    pub fn insert(&mut self, run: u32, histogram: AnyHistogram) {
        self.runs.entry(run).or_default().insert(histogram);
    }
}

impl HistogramSource for HistogramArchive {
    fn histogram(&self, name: &str, runs: &[u32]) -> Option<AnyHistogram> {
        let mut sum: Option<AnyHistogram> = None;
        for run in runs {
            let Some(histogram) = self.runs.get(run).and_then(|f| f.histograms.get(name)) else {
                continue;
            };
            match &mut sum {
                None => sum = Some(histogram.clone()),
                Some(total) => {
                    if !total.add(histogram) {
                        log::warn!("Skipping '{name}' of run {run}");
                    }
                }
            }
        }
        sum
    }
}

/// A histogram source bound to the runs of the active calibration sets.
#[derive(Clone, Copy)]
pub struct SetHistograms<'a> {
    pub source: &'a dyn HistogramSource,
    pub runs: &'a [u32],
}

impl<'a> SetHistograms<'a> {
    pub fn new(source: &'a dyn HistogramSource, runs: &'a [u32]) -> Self {
        Self { source, runs }
    }

    pub fn get(&self, name: &str) -> Option<AnyHistogram> {
        self.source.histogram(name, self.runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::histoer::histo1d::histogram1d::Histogram;

    fn spectrum(counts: Vec<f64>) -> AnyHistogram {
        AnyHistogram::One(Histogram::from_counts("energy", (0.0, 3.0), counts))
    }

    #[test]
    fn test_archive_sums_selected_runs() {
        let mut archive = HistogramArchive::default();
        archive.insert(1, spectrum(vec![1.0, 0.0, 0.0]));
        archive.insert(2, spectrum(vec![0.0, 2.0, 0.0]));
        archive.insert(3, spectrum(vec![0.0, 0.0, 4.0]));

        let sum = archive.histogram("energy", &[1, 3, 7]).unwrap();
        assert_eq!(sum.as_1d().unwrap().bins, vec![1.0, 0.0, 4.0]);
        assert!(archive.histogram("energy", &[7]).is_none());
        assert!(archive.histogram("other", &[1, 2]).is_none());

        let view = SetHistograms::new(&archive, &[2]);
        assert_eq!(view.get("energy").unwrap().entries(), 2.0);
    }

    #[test]
    fn test_archive_json_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("histos.json");
        let mut archive = HistogramArchive::default();
        archive.insert(12, spectrum(vec![1.0, 2.0, 3.0]));
        std::fs::write(&path, serde_json::to_string(&archive).unwrap()).unwrap();
        assert_eq!(HistogramArchive::load(&path).unwrap(), archive);
    }
}
