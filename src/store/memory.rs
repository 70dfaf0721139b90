use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use fnv::FnvHashMap;

use super::{ParameterStore, StoreError};

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct RunRecord {
    #[serde(default = "unset_count")]
    pub scaler_reads: i64,
    /// Bad scaler-read indices per data type.
    #[serde(default)]
    pub bad_scaler_reads: FnvHashMap<String, Vec<usize>>,
}

fn unset_count() -> i64 {
    -1
}

impl Default for RunRecord {
    fn default() -> Self {
        Self {
            scaler_reads: unset_count(),
            bad_scaler_reads: FnvHashMap::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct SetRecord {
    pub data_type: String,
    pub calibration: String,
    pub index: usize,
    pub first_run: u32,
    pub last_run: u32,
    #[serde(default)]
    pub parameters: Vec<f64>,
}

impl SetRecord {
    fn is(&self, data_type: &str, calibration: &str, set: usize) -> bool {
        self.data_type == data_type && self.calibration == calibration && self.index == set
    }
}

/// The whole store in memory. Serialises to the JSON layout `JsonStore` reads.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct MemoryStore {
    #[serde(default)]
    pub runs: BTreeMap<u32, RunRecord>,
    #[serde(default)]
    pub sets: Vec<SetRecord>,
}

impl MemoryStore {
    pub fn add_run(&mut self, run: u32, scaler_reads: i64) {
        self.runs.entry(run).or_default().scaler_reads = scaler_reads;
    }

    /// Registers a set and returns its index within its data type and calibration.
    pub fn add_set(
        &mut self,
        data_type: &str,
        calibration: &str,
        first_run: u32,
        last_run: u32,
        parameters: Vec<f64>,
    ) -> usize {
        let index = self.number_of_sets(data_type, calibration);
        self.sets.push(SetRecord {
            data_type: data_type.to_owned(),
            calibration: calibration.to_owned(),
            index,
            first_run,
            last_run,
            parameters,
        });
        index
    }

    fn set(&self, data_type: &str, calibration: &str, set: usize) -> Result<&SetRecord, StoreError> {
        self.sets
            .iter()
            .find(|s| s.is(data_type, calibration, set))
            .ok_or_else(|| missing_set(data_type, calibration, set))
    }
}

fn missing_set(data_type: &str, calibration: &str, set: usize) -> StoreError {
    StoreError::MissingSet {
        data_type: data_type.to_owned(),
        calibration: calibration.to_owned(),
        set,
    }
}

impl ParameterStore for MemoryStore {
    fn read_parameters(
        &self,
        data_type: &str,
        calibration: &str,
        set: usize,
        out: &mut [f64],
    ) -> Result<(), StoreError> {
        let record = self.set(data_type, calibration, set)?;
        if record.parameters.len() < out.len() {
            return Err(StoreError::MissingParameters {
                data_type: data_type.to_owned(),
                calibration: calibration.to_owned(),
                set,
            });
        }
        out.copy_from_slice(&record.parameters[..out.len()]);
        Ok(())
    }

    fn write_parameters(
        &mut self,
        data_type: &str,
        calibration: &str,
        set: usize,
        values: &[f64],
    ) -> Result<(), StoreError> {
        let record = self
            .sets
            .iter_mut()
            .find(|s| s.is(data_type, calibration, set))
            .ok_or_else(|| missing_set(data_type, calibration, set))?;
        record.parameters = values.to_vec();
        Ok(())
    }

    fn runs_of_set(
        &self,
        data_type: &str,
        calibration: &str,
        set: usize,
    ) -> Result<Vec<u32>, StoreError> {
        let record = self.set(data_type, calibration, set)?;
        Ok(self
            .runs
            .range(record.first_run..=record.last_run)
            .map(|(&run, _)| run)
            .collect())
    }

    fn number_of_sets(&self, data_type: &str, calibration: &str) -> usize {
        self.sets
            .iter()
            .filter(|s| s.data_type == data_type && s.calibration == calibration)
            .count()
    }

    fn first_run_of_set(
        &self,
        data_type: &str,
        calibration: &str,
        set: usize,
    ) -> Result<u32, StoreError> {
        Ok(self.set(data_type, calibration, set)?.first_run)
    }

    fn run_bad_scaler_reads(&self, run: u32, data_type: &str) -> Result<Vec<usize>, StoreError> {
        let record = self.runs.get(&run).ok_or(StoreError::MissingRun(run))?;
        Ok(record
            .bad_scaler_reads
            .get(data_type)
            .cloned()
            .unwrap_or_default())
    }

    fn change_run_bad_scaler_reads(
        &mut self,
        run: u32,
        bad: &[usize],
        data_type: &str,
    ) -> Result<(), StoreError> {
        let record = self.runs.get_mut(&run).ok_or(StoreError::MissingRun(run))?;
        record
            .bad_scaler_reads
            .insert(data_type.to_owned(), bad.to_vec());
        Ok(())
    }

    fn run_scaler_read_count(&self, run: u32) -> Result<i64, StoreError> {
        self.runs
            .get(&run)
            .map(|r| r.scaler_reads)
            .ok_or(StoreError::MissingRun(run))
    }
}

/// A `MemoryStore` backed by a JSON file, saved after every write.
#[derive(Debug, Clone)]
pub struct JsonStore {
    pub path: PathBuf,
    pub inner: MemoryStore,
}

impl JsonStore {
    /// Opens the store at `path`, starting empty when the file does not exist yet.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let inner = if path.exists() {
            let text = std::fs::read_to_string(path)?;
            serde_json::from_str(&text)?
        } else {
            log::warn!(
                "Parameter store {} does not exist, starting empty",
                path.display()
            );
            MemoryStore::default()
        };
        Ok(Self {
            path: path.to_path_buf(),
            inner,
        })
    }

    pub fn save(&self) -> Result<(), StoreError> {
        let text = serde_json::to_string_pretty(&self.inner)?;
        std::fs::write(&self.path, text)?;
        Ok(())
    }
}

impl ParameterStore for JsonStore {
    fn read_parameters(
        &self,
        data_type: &str,
        calibration: &str,
        set: usize,
        out: &mut [f64],
    ) -> Result<(), StoreError> {
        self.inner.read_parameters(data_type, calibration, set, out)
    }

    fn write_parameters(
        &mut self,
        data_type: &str,
        calibration: &str,
        set: usize,
        values: &[f64],
    ) -> Result<(), StoreError> {
        self.inner
            .write_parameters(data_type, calibration, set, values)?;
        self.save()
    }

    fn runs_of_set(
        &self,
        data_type: &str,
        calibration: &str,
        set: usize,
    ) -> Result<Vec<u32>, StoreError> {
        self.inner.runs_of_set(data_type, calibration, set)
    }

    fn number_of_sets(&self, data_type: &str, calibration: &str) -> usize {
        self.inner.number_of_sets(data_type, calibration)
    }

    fn first_run_of_set(
        &self,
        data_type: &str,
        calibration: &str,
        set: usize,
    ) -> Result<u32, StoreError> {
        self.inner.first_run_of_set(data_type, calibration, set)
    }

    fn run_bad_scaler_reads(&self, run: u32, data_type: &str) -> Result<Vec<usize>, StoreError> {
        self.inner.run_bad_scaler_reads(run, data_type)
    }

    fn change_run_bad_scaler_reads(
        &mut self,
        run: u32,
        bad: &[usize],
        data_type: &str,
    ) -> Result<(), StoreError> {
        self.inner.change_run_bad_scaler_reads(run, bad, data_type)?;
        self.save()
    }

    fn run_scaler_read_count(&self, run: u32) -> Result<i64, StoreError> {
        self.inner.run_scaler_read_count(run)
    }
}
