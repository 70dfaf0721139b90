use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

use super::interval::{IntervalCommand, IntervalView};
use super::method::CalibMethod;
use super::scaler_reads::{BadScalerReads, Overview, ScalerChannels, normalise};
use crate::calib::detector::{BadScalerReadKind, SCALER_READS_EVENT_INFO_BIN};
use crate::config::{ConfigError, ConfigStore};
use crate::error::CalibError;
use crate::histoer::histo1d::histogram1d::Histogram;
use crate::histoer::histo2d::histogram2d::Histogram2D;
use crate::store::ParameterStore;
use crate::store::histograms::HistogramSource;

const DEFAULT_USER_INTERVAL: usize = 20;
const EVENT_INFO_HISTOGRAM: &str = "EventInfo";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BadScalerReadSettings {
    pub main_histogram: String,
    pub scaler_histogram: Option<String>,
    pub channels: ScalerChannels,
    /// Width of the zoomed window, in scaler reads.
    pub user_interval: usize,
    pub method: CalibMethod,
    pub load_in_advance: bool,
}

fn scaler_channel(config: &dyn ConfigStore, key: &str, label: &str) -> Option<usize> {
    let channel = config.int(key).and_then(|c| usize::try_from(c).ok());
    if channel.is_none() {
        log::warn!("{label} scaler was not found in configuration!");
    }
    channel
}

impl BadScalerReadSettings {
    pub fn from_config(name: &str, config: &dyn ConfigStore) -> Result<Self, ConfigError> {
        let main_histogram = config.require_string(&format!("{name}.Histo.Main.Name"))?;

        let scaler_histogram = config.string("BadScR.Histo.Scaler.Name");
        if scaler_histogram.is_none() {
            log::warn!("Scaler histo was not found in configuration!");
        }
        let channels = ScalerChannels {
            p2: scaler_channel(config, "BadScR.Scaler.P2", "P2"),
            free: scaler_channel(config, "BadScR.Scaler.Free", "Free"),
            live: scaler_channel(config, "BadScR.Scaler.Live", "Live"),
        };

        let method = match config.string("BadScR.CalibMethod") {
            None => {
                log::info!("No calibration method found.");
                CalibMethod::Manual
            }
            Some(value) => {
                let method = value.parse().map_err(|_| ConfigError::Malformed {
                    key: "BadScR.CalibMethod".to_owned(),
                    value: value.clone(),
                })?;
                log::info!("Using calibration method '{value}'.");
                method
            }
        };

        Ok(Self {
            main_histogram,
            scaler_histogram,
            channels,
            user_interval: config
                .int("BadScR.Histo.Main.UserRange")
                .and_then(|i| usize::try_from(i).ok())
                .filter(|&i| i > 0)
                .unwrap_or(DEFAULT_USER_INTERVAL),
            method,
            load_in_advance: config.bool("BadScR.LoadHistosInAdvance").unwrap_or(false),
        })
    }

    fn normalises(&self) -> bool {
        self.scaler_histogram.is_some() && !self.channels.is_empty()
    }
}

/// Checks the stored scaler-read count of `run` against its `EventInfo` histogram.
/// The histogram wins when the two disagree.
pub fn check_scaler_read_count(run: u32, stored: i64, event_info: Option<&Histogram>) -> i64 {
    let Some(derived) = event_info
        .and_then(|h| h.bins.get(SCALER_READS_EVENT_INFO_BIN))
        .map(|&count| count.round() as i64)
    else {
        return stored;
    };
    if derived != stored {
        if stored == -1 {
            log::info!("Number of scaler reads for run '{run}' is not set in the store yet!");
        } else {
            log::warn!(
                "Number of scaler reads mismatch for run '{run}' (store: '{stored}' vs. EventInfo histogram: '{derived}')!"
            );
        }
    }
    derived
}

/// One run under review.
#[derive(Debug, Clone)]
pub struct RunReads {
    pub run: u32,
    /// As read from the store.
    pub old: BadScalerReads,
    pub new: BadScalerReads,
    pub overview: Overview,
    main: Option<Histogram2D>,
    raw: Option<Histogram>,
    normalised: Option<Histogram>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BadScalerReadReport {
    pub runs_written: usize,
    pub errors: usize,
}

impl BadScalerReadReport {
    pub fn is_success(&self) -> bool {
        self.errors == 0
    }
}

/// Review of the bad scaler reads of a list of runs, one run at a time.
pub struct BadScalerReadDetector<'a> {
    pub kind: BadScalerReadKind,
    config: &'a dyn ConfigStore,
    store: &'a mut dyn ParameterStore,
    histograms: &'a dyn HistogramSource,
    settings: Option<BadScalerReadSettings>,
    runs: Vec<RunReads>,
    index: Option<usize>,
    /// Working copy of the current run's bad reads.
    current: Option<BadScalerReads>,
    view: IntervalView,
    stop: Arc<AtomicBool>,
}

impl<'a> BadScalerReadDetector<'a> {
    pub fn new(
        kind: BadScalerReadKind,
        config: &'a dyn ConfigStore,
        store: &'a mut dyn ParameterStore,
        histograms: &'a dyn HistogramSource,
    ) -> Self {
        Self {
            kind,
            config,
            store,
            histograms,
            settings: None,
            runs: Vec::new(),
            index: None,
            current: None,
            view: IntervalView::new(DEFAULT_USER_INTERVAL, 2),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn runs(&self) -> &[RunReads] {
        &self.runs
    }

    pub fn index(&self) -> Option<usize> {
        self.index
    }

    pub fn current(&self) -> Option<&BadScalerReads> {
        self.current.as_ref()
    }

    pub fn view(&self) -> &IntervalView {
        &self.view
    }

    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    fn settings(&self) -> Result<&BadScalerReadSettings, CalibError> {
        self.settings.as_ref().ok_or(CalibError::NotStarted)
    }

    fn main_histogram(&self, run: u32, name: &str) -> Option<Histogram2D> {
        let histogram = self.histograms.histogram(name, &[run])?;
        let main = histogram.as_2d().cloned();
        if main.is_none() {
            log::warn!("Histogram '{name}' of run {run} is not two dimensional");
        }
        main
    }

    fn normalised(&self, settings: &BadScalerReadSettings, run: u32, raw: &Histogram) -> Histogram {
        let scalers = settings
            .scaler_histogram
            .as_deref()
            .filter(|_| settings.normalises())
            .and_then(|name| self.histograms.histogram(name, &[run]));
        match scalers.as_ref().and_then(|h| h.as_2d()) {
            Some(scalers) => normalise(raw, scalers, settings.channels),
            None => {
                if settings.normalises() {
                    log::warn!("No scaler histogram for run '{run}'. Will not be normalized.");
                }
                raw.clone()
            }
        }
    }

    /// Loads the runs, their stored bad reads and scaler-read counts, and the overview.
    pub fn start(&mut self, runs: &[u32]) -> Result<(), CalibError> {
        self.settings = None;
        let settings = BadScalerReadSettings::from_config(&self.kind.name(), self.config)?;
        let data_type = self.kind.data_type();
        if !settings.normalises() {
            log::warn!("Histograms will not be P2 or livetime corrected.");
        }

        let mut entries = Vec::with_capacity(runs.len());
        for &run in runs {
            let main = self.main_histogram(run, &settings.main_histogram);
            let raw = main
                .as_ref()
                .map(|h| h.projection_x_bins(&format!("{}_{run}_px", settings.main_histogram), 0, h.bins.y - 1));

            let stored = self.store.run_scaler_read_count(run).unwrap_or_else(|e| {
                log::error!("Could not read the number of scaler reads of run '{run}': {e}");
                -1
            });
            let event_info = self.histograms.histogram(EVENT_INFO_HISTOGRAM, &[run]);
            let count =
                check_scaler_read_count(run, stored, event_info.as_ref().and_then(|h| h.as_1d()));
            let n_reads = usize::try_from(count).unwrap_or_else(|_| {
                log::warn!("Run '{run}' has no scaler-read count, no read can be marked");
                0
            });

            let bad = self
                .store
                .run_bad_scaler_reads(run, &data_type)
                .unwrap_or_else(|e| {
                    log::error!("Could not read bad scaler reads from the store for run '{run}': {e}");
                    Vec::new()
                });
            let old = BadScalerReads::new(run, n_reads, &bad);
            if old.has_stale() {
                log::warn!(
                    "Run '{run}' has stored bad scaler reads past its {n_reads} read(s), they are kept as stored"
                );
            }

            let normalised = match &raw {
                Some(raw) if settings.load_in_advance => Some(self.normalised(&settings, run, raw)),
                _ => None,
            };

            let mut entry = RunReads {
                run,
                new: old.clone(),
                old,
                overview: Overview::default(),
                main: main.filter(|_| settings.load_in_advance),
                raw,
                normalised,
            };
            entry.overview = Overview::compute(&entry.new, entry.raw.as_ref(), entry.normalised.as_ref());
            entries.push(entry);
        }

        if entries.iter().all(|e| e.raw.is_none()) {
            return Err(CalibError::MissingHistogram(settings.main_histogram));
        }

        let range_max = entries.iter().map(|e| e.new.n_reads).max().unwrap_or(0) + 2;
        self.view = IntervalView::new(settings.user_interval, range_max);
        log::info!(
            "{}: reviewing {} run(s), at most {} scaler reads",
            self.kind.name(),
            entries.len(),
            range_max - 2
        );

        self.runs = entries;
        self.index = None;
        self.current = None;
        self.settings = Some(settings);
        self.stop.store(false, Ordering::Relaxed);
        Ok(())
    }

    fn update_overview(&mut self, i: usize) {
        let current = self.current.as_ref().filter(|_| self.index == Some(i));
        if let Some(entry) = self.runs.get(i) {
            let reads = current.unwrap_or(&entry.new);
            let overview = Overview::compute(reads, entry.raw.as_ref(), entry.normalised.as_ref());
            self.runs[i].overview = overview;
        }
    }

    fn prepare(&mut self, i: usize) -> Result<(), CalibError> {
        let settings = self.settings()?.clone();
        let run = self.runs[i].run;

        if self.runs[i].main.is_none() {
            self.runs[i].main = self.main_histogram(run, &settings.main_histogram);
        }
        if self.runs[i].normalised.is_none()
            && let Some(raw) = self.runs[i].raw.as_ref()
        {
            let normalised = self.normalised(&settings, run, raw);
            self.runs[i].normalised = Some(normalised);
        }

        self.index = Some(i);
        if self.runs[i].main.is_none() {
            log::warn!("Processing run {run:05}: empty histograms!");
            self.current = None;
            return Ok(());
        }
        log::info!("Processing run {run:05}:");
        self.current = Some(self.runs[i].new.clone());
        self.view.reset();
        self.update_overview(i);
        Ok(())
    }

    /// Commits the working set of the current run.
    pub fn save_current(&mut self) {
        let (Some(i), Some(current)) = (self.index, self.current.as_ref()) else {
            return;
        };
        log::info!("New: {}", current.describe());
        self.runs[i].new = current.clone();
    }

    fn leave_current(&mut self) -> Result<(), CalibError> {
        let Some(i) = self.index else {
            return Ok(());
        };
        self.save_current();
        self.current = None;
        self.update_overview(i);
        if !self.settings()?.load_in_advance {
            self.runs[i].main = None;
        }
        Ok(())
    }

    /// Runs the configured method on the current run.
    pub fn process_current(&mut self) -> Result<(), CalibError> {
        let method = self.settings()?.method;
        let Some(i) = self.index else {
            return Ok(());
        };
        if let (Some(current), Some(raw)) = (self.current.as_mut(), self.runs[i].raw.as_ref()) {
            method.apply(current, raw);
        }
        self.update_overview(i);
        Ok(())
    }

    /// Leaves the current run and opens run `i`, clamped to the last run.
    pub fn goto(&mut self, i: usize) -> Result<(), CalibError> {
        self.settings()?;
        if self.runs.is_empty() {
            return Ok(());
        }
        self.leave_current()?;
        self.prepare(i.min(self.runs.len() - 1))?;
        self.process_current()
    }

    /// Returns false at the last run, which stays open.
    pub fn next(&mut self) -> Result<bool, CalibError> {
        self.settings()?;
        match self.index {
            None => self.goto(0).map(|()| !self.runs.is_empty()),
            Some(i) if i + 1 >= self.runs.len() => {
                self.save_current();
                log::info!("Last run reached");
                Ok(false)
            }
            Some(i) => self.goto(i + 1).map(|()| true),
        }
    }

    /// Returns false at the first run, which stays open.
    pub fn previous(&mut self) -> Result<bool, CalibError> {
        self.settings()?;
        match self.index {
            None | Some(0) => {
                self.save_current();
                Ok(false)
            }
            Some(i) => self.goto(i - 1).map(|()| true),
        }
    }

    /// Flips one read of the current run. Returns false when no run is open.
    pub fn toggle(&mut self, read: usize) -> bool {
        self.toggle_range(read, read)
    }

    pub fn toggle_range(&mut self, first: usize, last: usize) -> bool {
        let (Some(i), Some(current)) = (self.index, self.current.as_mut()) else {
            return false;
        };
        current.toggle_range(first, last);
        self.update_overview(i);
        true
    }

    pub fn change_interval(&mut self, command: IntervalCommand) {
        if let Some(current) = &self.current {
            self.view.apply(command, current.n_reads);
        }
    }

    /// Opens every run in turn, pausing `delay` between them. Stops early when the
    /// stop handle is set.
    pub fn process_all(&mut self, delay: Duration) -> Result<(), CalibError> {
        self.settings()?;
        self.stop.store(false, Ordering::Relaxed);

        let progress = ProgressBar::new(self.runs.len() as u64);
        if let Ok(style) =
            ProgressStyle::with_template("[{elapsed_precise}] {bar} {pos:>7}/{len:7} {msg}")
        {
            progress.set_style(style);
        }
        progress.set_message(self.kind.name());

        for i in 0..self.runs.len() {
            if self.stop.load(Ordering::Relaxed) {
                progress.abandon_with_message("stopped");
                log::info!("Processing stopped before run {}", self.runs[i].run);
                return Ok(());
            }
            self.goto(i)?;
            progress.inc(1);
            if !delay.is_zero() && i + 1 < self.runs.len() {
                std::thread::sleep(delay);
            }
        }
        self.save_current();
        progress.finish_and_clear();
        Ok(())
    }

    /// Commits the open run and writes the new bad reads of every run. A failed run
    /// does not stop the others.
    pub fn write(&mut self) -> Result<BadScalerReadReport, CalibError> {
        self.settings()?;
        self.save_current();
        let data_type = self.kind.data_type();
        let mut report = BadScalerReadReport::default();

        for entry in &mut self.runs {
            report.runs_written += 1;
            match self
                .store
                .change_run_bad_scaler_reads(entry.run, &entry.new.indices(), &data_type)
            {
                Ok(()) => entry.old = entry.new.clone(),
                Err(e) => {
                    report.errors += 1;
                    log::error!(
                        "Could not write bad scaler reads for run '{}' to the store: {e}",
                        entry.run
                    );
                }
            }
        }

        if report.is_success() {
            log::info!(
                "Successfully written bad scaler reads of {} runs.",
                report.runs_written
            );
        } else {
            log::error!(
                "{} error(s) while writing to the store occurred",
                report.errors
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::YamlConfig;
    use crate::histoer::any::AnyHistogram;
    use crate::store::histograms::HistogramArchive;
    use crate::store::memory::MemoryStore;

    const MAIN: &str = "CaLib_NaI_ScR";

    fn main_histogram(counts: &[f64]) -> AnyHistogram {
        let n = counts.len();
        let mut h = Histogram2D::new(MAIN, (n + 2, 2), ((0.0, (n + 2) as f64), (0.0, 2.0)));
        for (read, &count) in counts.iter().enumerate() {
            h.set_bin_content(read, 0, count * 0.5);
            h.set_bin_content(read, 1, count * 0.5);
        }
        AnyHistogram::Two(h)
    }

    fn event_info(n_reads: f64) -> AnyHistogram {
        let mut bins = vec![0.0; 20];
        bins[SCALER_READS_EVENT_INFO_BIN] = n_reads;
        AnyHistogram::One(Histogram::from_counts(EVENT_INFO_HISTOGRAM, (0.0, 20.0), bins))
    }

    fn config(method: &str) -> YamlConfig {
        let mut config = YamlConfig::default();
        config.insert("BadScR.NaI.Histo.Main.Name", MAIN);
        config.insert("BadScR.CalibMethod", method);
        config
    }

    #[test]
    fn test_default_method_rejects_low_read() {
        let config = config("default");
        let mut store = MemoryStore::default();
        store.add_run(100, 6);
        let mut archive = HistogramArchive::default();
        archive.insert(100, main_histogram(&[10.0, 10.0, 10.0, 1.0, 10.0, 10.0]));

        {
            let mut detector =
                BadScalerReadDetector::new(BadScalerReadKind::NaI, &config, &mut store, &archive);
            detector.start(&[100]).unwrap();
            assert!((detector.runs()[0].overview.raw - 8.5).abs() < 1e-12);

            assert!(detector.next().unwrap());
            assert_eq!(detector.current().unwrap().indices(), vec![3]);
            assert!((detector.runs()[0].overview.raw - 10.0).abs() < 1e-12);
            // no scaler histogram, so the normalised projection is the raw one
            assert!((detector.runs()[0].overview.normalised - 10.0).abs() < 1e-12);

            let report = detector.write().unwrap();
            assert_eq!(report, BadScalerReadReport { runs_written: 1, errors: 0 });
            assert_eq!(detector.runs()[0].old.indices(), vec![3]);
        }
        assert_eq!(
            store.run_bad_scaler_reads(100, "Data.Run.BadScR.NaI").unwrap(),
            vec![3]
        );
    }

    #[test]
    fn test_toggles_are_saved_when_leaving_a_run() {
        let config = config("none");
        let mut store = MemoryStore::default();
        store.add_run(1, 4);
        store.add_run(2, 4);
        store
            .change_run_bad_scaler_reads(2, &[0], "Data.Run.BadScR.NaI")
            .unwrap();
        let mut archive = HistogramArchive::default();
        archive.insert(1, main_histogram(&[4.0, 4.0, 8.0, 4.0]));
        archive.insert(2, main_histogram(&[4.0, 4.0, 4.0, 4.0]));

        let mut detector =
            BadScalerReadDetector::new(BadScalerReadKind::NaI, &config, &mut store, &archive);
        detector.start(&[1, 2]).unwrap();
        assert!(!detector.toggle(0));

        detector.goto(0).unwrap();
        let before = detector.runs()[0].overview;
        assert!(detector.toggle(2));
        assert!((detector.runs()[0].overview.raw - 4.0).abs() < 1e-12);
        detector.toggle(2);
        assert_eq!(detector.runs()[0].overview, before);

        detector.toggle_range(3, 2);
        assert!(detector.next().unwrap());
        assert_eq!(detector.runs()[0].new.indices(), vec![2, 3]);
        assert_eq!(detector.current().unwrap().indices(), vec![0]);

        assert!(!detector.next().unwrap());
        assert!(detector.previous().unwrap());
        assert_eq!(detector.current().unwrap().indices(), vec![2, 3]);
        assert!(detector.runs()[0].old.indices().is_empty());
    }

    #[test]
    fn test_event_info_count_wins() {
        assert_eq!(check_scaler_read_count(5, 6, None), 6);
        let info = event_info(8.0);
        assert_eq!(check_scaler_read_count(5, 6, info.as_1d()), 8);
        assert_eq!(check_scaler_read_count(5, -1, info.as_1d()), 8);

        let config = config("default");
        let mut store = MemoryStore::default();
        let mut archive = HistogramArchive::default();
        // run 7 is unknown to the store
        archive.insert(7, main_histogram(&[3.0; 8]));
        archive.insert(7, event_info(8.0));

        let mut detector =
            BadScalerReadDetector::new(BadScalerReadKind::NaI, &config, &mut store, &archive);
        detector.start(&[7]).unwrap();
        assert_eq!(detector.runs()[0].new.n_reads, 8);
        assert_eq!(detector.runs()[0].new.n_bad(), 0);

        let report = detector.write().unwrap();
        assert_eq!(report.errors, 1);
        assert!(!report.is_success());
    }

    #[test]
    fn test_write_keeps_reads_of_run_without_count() {
        let config = config("default");
        let mut store = MemoryStore::default();
        store.add_run(7, -1);
        store
            .change_run_bad_scaler_reads(7, &[2, 5], "Data.Run.BadScR.NaI")
            .unwrap();
        store.add_run(8, 6);
        let mut archive = HistogramArchive::default();
        // run 7 has neither a stored count nor EventInfo
        archive.insert(7, main_histogram(&[3.0; 6]));
        archive.insert(8, main_histogram(&[3.0; 6]));

        {
            let mut detector =
                BadScalerReadDetector::new(BadScalerReadKind::NaI, &config, &mut store, &archive);
            detector.start(&[7, 8]).unwrap();
            assert_eq!(detector.runs()[0].old.n_reads, 0);
            assert_eq!(detector.runs()[0].old.indices(), vec![2, 5]);

            detector.process_all(Duration::ZERO).unwrap();
            let report = detector.write().unwrap();
            assert_eq!(report, BadScalerReadReport { runs_written: 2, errors: 0 });
        }
        assert_eq!(
            store.run_bad_scaler_reads(7, "Data.Run.BadScR.NaI").unwrap(),
            vec![2, 5]
        );
        assert!(store.run_bad_scaler_reads(8, "Data.Run.BadScR.NaI").unwrap().is_empty());
    }

    #[test]
    fn test_normalised_overview_in_advance() {
        let mut config = config("none");
        config.insert("BadScR.Histo.Scaler.Name", "Scalers");
        config.insert("BadScR.Scaler.P2", 0);
        config.insert("BadScR.LoadHistosInAdvance", true);

        let mut scalers = Histogram2D::new("Scalers", (4, 2), ((0.0, 4.0), (0.0, 2.0)));
        for read in 0..4 {
            scalers.set_bin_content(read, 0, 2.0);
        }
        let mut store = MemoryStore::default();
        store.add_run(3, 4);
        let mut archive = HistogramArchive::default();
        archive.insert(3, main_histogram(&[6.0, 6.0, 6.0, 6.0]));
        archive.insert(3, AnyHistogram::Two(scalers));

        let mut detector =
            BadScalerReadDetector::new(BadScalerReadKind::NaI, &config, &mut store, &archive);
        detector.start(&[3]).unwrap();
        let overview = detector.runs()[0].overview;
        assert!((overview.raw - 6.0).abs() < 1e-12);
        assert!((overview.normalised - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_start_needs_a_main_histogram() {
        let config = config("default");
        let mut store = MemoryStore::default();
        store.add_run(1, 4);
        let archive = HistogramArchive::default();
        {
            let mut detector =
                BadScalerReadDetector::new(BadScalerReadKind::NaI, &config, &mut store, &archive);
            assert!(matches!(detector.start(&[1]), Err(CalibError::MissingHistogram(_))));
            assert!(matches!(detector.next(), Err(CalibError::NotStarted)));
        }

        let empty = YamlConfig::default();
        let mut detector =
            BadScalerReadDetector::new(BadScalerReadKind::NaI, &empty, &mut store, &archive);
        assert!(matches!(detector.start(&[1]), Err(CalibError::Config(_))));
    }
}
