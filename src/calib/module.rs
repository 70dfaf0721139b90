use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

use super::strategy::{InitContext, Strategy};
use super::values::{Marker, ValueColumn};
use crate::config::ConfigStore;
use crate::error::CalibError;
use crate::store::ParameterStore;
use crate::store::histograms::{HistogramSource, SetHistograms};

/// Identity of one calibration module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleInfo {
    /// Prefix of the module's configuration keys, e.g. `PID.Energy`.
    pub name: String,
    pub data_type: String,
    pub calibration: String,
    pub n_elements: usize,
}

impl ModuleInfo {
    pub fn new(name: &str, data_type: &str, calibration: &str, n_elements: usize) -> Self {
        Self {
            name: name.to_owned(),
            data_type: data_type.to_owned(),
            calibration: calibration.to_owned(),
            n_elements,
        }
    }
}

/// The collaborators a module works against.
pub struct Environment<'a> {
    pub config: &'a dyn ConfigStore,
    pub store: &'a mut dyn ParameterStore,
    pub histograms: &'a dyn HistogramSource,
    pub reference: Option<&'a dyn HistogramSource>,
    pub output_dir: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleState {
    Uninitialized,
    Initialized,
    Processing(usize),
    /// A marker of the element was moved by hand and awaits a re-fit.
    ManualReview(usize),
    Finished,
    Written,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteReport {
    pub columns_written: usize,
    /// Sets whose every column was written.
    pub sets_written: usize,
    pub errors: usize,
    pub files: Vec<PathBuf>,
}

impl WriteReport {
    pub fn is_success(&self) -> bool {
        self.errors == 0
    }
}

/// Drives one strategy through Init, Fit and Calculate per element, and Write.
pub struct CalibModule<'a> {
    pub info: ModuleInfo,
    strategy: Strategy,
    env: Environment<'a>,
    state: ModuleState,
    sets: Vec<usize>,
    columns: Vec<ValueColumn>,
    ignored: BTreeSet<usize>,
    stop: Arc<AtomicBool>,
}

impl<'a> CalibModule<'a> {
    pub fn new(info: ModuleInfo, strategy: Strategy, env: Environment<'a>) -> Self {
        Self {
            info,
            strategy,
            env,
            state: ModuleState::Uninitialized,
            sets: Vec::new(),
            columns: Vec::new(),
            ignored: BTreeSet::new(),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn state(&self) -> ModuleState {
        self.state
    }

    pub fn strategy(&self) -> &Strategy {
        &self.strategy
    }

    pub fn columns(&self) -> &[ValueColumn] {
        &self.columns
    }

    pub fn markers(&self) -> &[Marker] {
        self.strategy.markers()
    }

    pub fn is_ignored(&self, elem: usize) -> bool {
        self.ignored.contains(&elem)
    }

    /// Binds the module to `sets` and initialises it. Old values come from the first set.
    pub fn start(&mut self, sets: &[usize]) -> Result<(), CalibError> {
        self.state = ModuleState::Uninitialized;
        let Some(&first_set) = sets.first() else {
            return Err(CalibError::NoSets);
        };

        let mut runs = Vec::new();
        for &set in sets {
            runs.extend(
                self.env
                    .store
                    .runs_of_set(&self.info.data_type, &self.info.calibration, set)?,
            );
        }
        runs.sort_unstable();
        runs.dedup();
        log::info!(
            "{}: starting {} calibration of '{}' over {} set(s), {} run(s)",
            self.info.name,
            self.strategy.label(),
            self.info.calibration,
            sets.len(),
            runs.len()
        );

        let ctx = InitContext {
            info: &self.info,
            config: self.env.config,
            histograms: SetHistograms::new(self.env.histograms, &runs),
            reference: self.env.reference,
        };
        self.strategy.init(&ctx)?;

        let mut columns = Vec::new();
        for data_type in self.strategy.data_types(&self.info) {
            let mut column = ValueColumn::new(&data_type, self.info.n_elements);
            if self.strategy.uses_store() {
                self.env.store.read_parameters(
                    &data_type,
                    &self.info.calibration,
                    first_set,
                    &mut column.old,
                )?;
            }
            column.new = column.old.clone();
            columns.push(column);
        }

        let ignore_key = format!("{}.Ignore.Elements", self.info.name);
        self.ignored = self
            .env
            .config
            .int_list(&ignore_key)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|i| usize::try_from(i).ok())
            .filter(|&i| i < self.info.n_elements)
            .collect();
        if !self.ignored.is_empty() {
            log::info!("{}: ignoring element(s) {:?}", self.info.name, self.ignored);
        }

        self.columns = columns;
        self.sets = sets.to_vec();
        self.stop.store(false, Ordering::Relaxed);
        self.state = ModuleState::Initialized;
        Ok(())
    }

    fn current(&self) -> Result<Option<usize>, CalibError> {
        match self.state {
            ModuleState::Uninitialized => Err(CalibError::NotStarted),
            ModuleState::Processing(i) | ModuleState::ManualReview(i) => Ok(Some(i)),
            ModuleState::Initialized | ModuleState::Finished | ModuleState::Written => Ok(None),
        }
    }

    fn process(&mut self, elem: usize, refit: bool) {
        self.state = ModuleState::Processing(elem);
        let ignored = self.ignored.contains(&elem);
        if !ignored {
            self.strategy.fit(elem, refit);
        }
        for column in &mut self.columns {
            column.keep_old(elem);
        }
        self.strategy.calculate(elem, &mut self.columns, ignored);
        if elem + 1 == self.info.n_elements {
            self.strategy.finish_pass();
        }
    }

    /// Fits and calculates `elem`, clamped to the last element.
    pub fn process_element(&mut self, elem: usize) -> Result<(), CalibError> {
        self.current()?;
        if self.info.n_elements == 0 {
            return Ok(());
        }
        self.process(elem.min(self.info.n_elements - 1), false);
        Ok(())
    }

    /// Moves on to the next element. Past the last one the module finishes and writes.
    pub fn next(&mut self) -> Result<Option<WriteReport>, CalibError> {
        let next = match (self.current()?, self.state) {
            (Some(i), _) => i + 1,
            (None, ModuleState::Initialized) => 0,
            _ => return Ok(None),
        };
        if next >= self.info.n_elements {
            self.state = ModuleState::Finished;
            return self.write().map(Some);
        }
        self.process(next, false);
        Ok(None)
    }

    pub fn previous(&mut self) -> Result<(), CalibError> {
        let previous = match (self.current()?, self.state) {
            (Some(i), _) => i.saturating_sub(1),
            (None, ModuleState::Initialized) => 0,
            _ => self.info.n_elements.saturating_sub(1),
        };
        if self.info.n_elements > 0 {
            self.process(previous, false);
        }
        Ok(())
    }

    /// Moves marker `index` of the current element and waits for a re-fit.
    pub fn set_marker(&mut self, index: usize, position: f64) -> Result<bool, CalibError> {
        let Some(elem) = self.current()? else {
            return Ok(false);
        };
        if !self.strategy.set_marker(index, position) {
            log::warn!("{} has no marker {index}", self.strategy.label());
            return Ok(false);
        }
        self.state = ModuleState::ManualReview(elem);
        Ok(true)
    }

    /// Re-fits the current element, seeded from the markers when they were moved.
    pub fn reprocess_current(&mut self) -> Result<(), CalibError> {
        if let Some(elem) = self.current()? {
            self.process(elem, true);
        }
        Ok(())
    }

    /// A handle a front end can use to interrupt `process_all`.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Aborts the iteration. Nothing is written.
    pub fn stop_processing(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if matches!(
            self.state,
            ModuleState::Processing(_) | ModuleState::ManualReview(_)
        ) {
            self.state = ModuleState::Initialized;
        }
    }

    /// Processes every element in order, pausing `delay` between them, then writes.
    /// Returns `None` when stopped early.
    pub fn process_all(&mut self, delay: Duration) -> Result<Option<WriteReport>, CalibError> {
        self.current()?;
        self.stop.store(false, Ordering::Relaxed);

        let progress = ProgressBar::new(self.info.n_elements as u64);
        if let Ok(style) =
            ProgressStyle::with_template("[{elapsed_precise}] {bar} {pos:>7}/{len:7} {msg}")
        {
            progress.set_style(style);
        }
        progress.set_message(self.info.name.clone());

        for elem in 0..self.info.n_elements {
            if self.stop.load(Ordering::Relaxed) {
                progress.abandon_with_message("stopped");
                log::info!("{}: processing stopped before element {elem:03}", self.info.name);
                self.state = ModuleState::Initialized;
                return Ok(None);
            }
            self.process(elem, false);
            progress.inc(1);
            if !delay.is_zero() && elem + 1 < self.info.n_elements {
                std::thread::sleep(delay);
            }
        }
        progress.finish_and_clear();

        self.state = ModuleState::Finished;
        self.write().map(Some)
    }

    /// Persists the new values of every set, or the strategy's output file. Safe to repeat.
    pub fn write(&mut self) -> Result<WriteReport, CalibError> {
        self.current()?;
        let mut report = WriteReport::default();

        if self.strategy.uses_store() {
            for &set in &self.sets {
                let mut set_ok = true;
                for column in &self.columns {
                    match self.env.store.write_parameters(
                        &column.data_type,
                        &self.info.calibration,
                        set,
                        &column.new,
                    ) {
                        Ok(()) => {
                            report.columns_written += 1;
                            log::info!(
                                "'{}' written to set {set} of calibration '{}'",
                                column.data_type,
                                self.info.calibration
                            );
                        }
                        Err(e) => {
                            set_ok = false;
                            report.errors += 1;
                            log::error!(
                                "Could not write '{}' to set {set} of calibration '{}': {e}",
                                column.data_type,
                                self.info.calibration
                            );
                        }
                    }
                }
                if set_ok {
                    report.sets_written += 1;
                }
            }
        }

        match self
            .strategy
            .write_output(&self.info, &self.columns, &self.env.output_dir)
        {
            Ok(files) => report.files = files,
            Err(e) => {
                report.errors += 1;
                log::error!("{}: could not write output file: {e}", self.info.name);
            }
        }

        self.state = ModuleState::Written;
        Ok(report)
    }

    /// Logs old and new values of every element.
    pub fn print_values(&self) -> Result<(), CalibError> {
        self.current()?;
        if !self.strategy.prints_values() {
            log::info!("Not implemented in this module");
            return Ok(());
        }
        for elem in 0..self.info.n_elements {
            let values: Vec<String> = self
                .columns
                .iter()
                .map(|c| format!("{}: {:12.8} -> {:12.8}", c.data_type, c.old(elem), c.new_value(elem)))
                .collect();
            log::info!("Element: {elem:03}    {}", values.join("    "));
        }
        Ok(())
    }
}
