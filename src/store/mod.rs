pub mod histograms;
pub mod memory;

use std::fmt::Display;

#[derive(Debug)]
pub enum StoreError {
    MissingParameters {
        data_type: String,
        calibration: String,
        set: usize,
    },
    MissingRun(u32),
    MissingSet {
        data_type: String,
        calibration: String,
        set: usize,
    },
    Io(std::io::Error),
    Json(serde_json::Error),
}

impl From<std::io::Error> for StoreError {
    fn from(value: std::io::Error) -> Self {
        StoreError::Io(value)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(value: serde_json::Error) -> Self {
        StoreError::Json(value)
    }
}

impl Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::MissingParameters {
                data_type,
                calibration,
                set,
            } => write!(
                f,
                "No parameters of '{data_type}' stored for calibration '{calibration}' set {set}"
            ),
            StoreError::MissingRun(run) => write!(f, "Run {run} is not in the store"),
            StoreError::MissingSet {
                data_type,
                calibration,
                set,
            } => write!(
                f,
                "Set {set} of '{data_type}' does not exist for calibration '{calibration}'"
            ),
            StoreError::Io(x) => write!(f, "Parameter store had an IO error: {x}"),
            StoreError::Json(x) => write!(f, "Parameter store could not parse JSON: {x}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Calibration parameters keyed by data type, calibration name and set index,
/// plus the per-run bookkeeping of scaler reads.
pub trait ParameterStore {
    /// Fills `out` with the stored values. Fails if fewer values are stored.
    fn read_parameters(
        &self,
        data_type: &str,
        calibration: &str,
        set: usize,
        out: &mut [f64],
    ) -> Result<(), StoreError>;

    fn write_parameters(
        &mut self,
        data_type: &str,
        calibration: &str,
        set: usize,
        values: &[f64],
    ) -> Result<(), StoreError>;

    fn runs_of_set(&self, data_type: &str, calibration: &str, set: usize)
    -> Result<Vec<u32>, StoreError>;

    fn number_of_sets(&self, data_type: &str, calibration: &str) -> usize;

    fn first_run_of_set(&self, data_type: &str, calibration: &str, set: usize)
    -> Result<u32, StoreError>;

    /// The set whose runs include `run`.
    fn set_of_run(&self, data_type: &str, calibration: &str, run: u32) -> Option<usize> {
        (0..self.number_of_sets(data_type, calibration)).find(|&set| {
            self.runs_of_set(data_type, calibration, set)
                .is_ok_and(|runs| runs.contains(&run))
        })
    }

    fn run_bad_scaler_reads(&self, run: u32, data_type: &str) -> Result<Vec<usize>, StoreError>;

    fn change_run_bad_scaler_reads(
        &mut self,
        run: u32,
        bad: &[usize],
        data_type: &str,
    ) -> Result<(), StoreError>;

    /// Number of scaler reads recorded for the run, -1 when not yet set.
    fn run_scaler_read_count(&self, run: u32) -> Result<i64, StoreError>;
}
