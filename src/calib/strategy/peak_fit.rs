use std::path::{Path, PathBuf};

use super::{InitContext, clamp_to_axis};
use crate::calib::values::{Marker, ValueColumn, diff_percent};
use crate::error::CalibError;
use crate::fitter::fitter::Fitter;
use crate::fitter::models::FitModel;
use crate::histoer::any::AnyHistogram;
use crate::histoer::histo2d::histogram2d::Histogram2D;

pub const POSITION_FILE: &str = "peak_pos.dat";

/// Half width of the fit window around a hand-placed marker.
const REFIT_HALF_WIDTH: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeakFitOutput {
    /// New value is the fitted position, dumped to `peak_pos.dat`.
    Position,
    /// New value is `old + peak / gain`, written to the parameter store.
    TimeOffset,
}

/// Gaussian on a quadratic background, fitted to each row of one 2D histogram
/// (x = spectrum, y = element).
#[derive(Debug, Clone)]
pub struct PeakFitState {
    pub output: PeakFitOutput,
    pub marker: Marker,
    name: String,
    gain: f64,
    main: Option<Histogram2D>,
    range: Option<(f64, f64)>,
    current: Option<usize>,
    peaks: Vec<Option<f64>>,
    calculated: Vec<Option<f64>>,
}

impl PeakFitState {
    pub fn new(output: PeakFitOutput) -> Self {
        Self {
            output,
            marker: Marker::default(),
            name: String::new(),
            gain: 1.0,
            main: None,
            range: None,
            current: None,
            peaks: Vec::new(),
            calculated: Vec::new(),
        }
    }

    pub fn init(&mut self, ctx: &InitContext<'_>) -> Result<(), CalibError> {
        let histogram_name = ctx.config.require_string(&ctx.key("Histo.Fit.Name"))?;
        let main = match ctx.histograms.get(&histogram_name) {
            Some(AnyHistogram::Two(h)) => h,
            Some(_) => return Err(CalibError::InvalidHistogram(histogram_name)),
            None => return Err(CalibError::MissingHistogram(histogram_name)),
        };

        self.range = ctx.config.range(&ctx.key("Histo.Fit.Range"));
        if self.output == PeakFitOutput::TimeOffset {
            self.gain = ctx.config.float(&ctx.key("Time.Gain")).unwrap_or(1.0);
            if self.gain == 0.0 {
                log::warn!("{}: time gain of 0 is unusable, using 1", ctx.info.name);
                self.gain = 1.0;
            }
        }
        if main.bins.y < ctx.info.n_elements {
            log::warn!(
                "'{histogram_name}' has {} rows for {} elements",
                main.bins.y,
                ctx.info.n_elements
            );
        }

        self.name = ctx.info.name.clone();
        self.main = Some(main);
        self.current = None;
        self.peaks = vec![None; ctx.info.n_elements];
        self.calculated = vec![None; ctx.info.n_elements];
        Ok(())
    }

    /// Fitted position of `elem`, after any clamping.
    pub fn peak(&self, elem: usize) -> Option<f64> {
        self.peaks.get(elem).copied().flatten()
    }

    pub fn fit(&mut self, elem: usize, refit: bool) -> bool {
        let Some(main) = &self.main else {
            return false;
        };
        let spectrum = main.row(elem);
        if spectrum.is_empty() {
            log::warn!("Element: {elem:03}    no entries, fit skipped");
            self.set_peak(elem, None);
            self.current = Some(elem);
            return false;
        }

        if refit && self.current == Some(elem) && !self.marker.moved() {
            return self.peak(elem).is_some();
        }

        let (low, high, seed) = if refit && self.current == Some(elem) {
            let pos = self.marker.position;
            (pos - REFIT_HALF_WIDTH, pos + REFIT_HALF_WIDTH, pos)
        } else {
            let (low, high) = self.range.unwrap_or(spectrum.range);
            let seed = spectrum
                .maximum_bin()
                .map_or(spectrum.axis_midpoint(), |bin| spectrum.bin_center(bin));
            (low, high, seed)
        };

        let mut fitter = Fitter::new(&format!("{}_{elem:03}", self.name), FitModel::GaussPol2);
        fitter.set_parameters(&[spectrum.maximum(), seed, 3.0, 1.0, 0.1, 0.1]);
        fitter.set_range(low, high);
        let status = fitter.fit(&spectrum);

        self.current = Some(elem);
        if !status.has_result() {
            self.set_peak(elem, None);
            return false;
        }

        let mean = clamp_to_axis(&spectrum, fitter.value(1));
        self.set_peak(elem, Some(mean));
        self.marker = Marker::fitted(mean);
        true
    }

    fn set_peak(&mut self, elem: usize, peak: Option<f64>) {
        if let Some(slot) = self.peaks.get_mut(elem) {
            *slot = peak;
        }
    }

    pub fn calculate(&mut self, elem: usize, columns: &mut [ValueColumn], ignored: bool) {
        let Some(column) = columns.first_mut() else {
            return;
        };

        // a hand-placed marker supersedes the fit
        let peak = match self.peak(elem) {
            Some(_) if self.current == Some(elem) => Some(self.marker.position),
            other => other,
        };

        let Some(peak) = peak.filter(|_| !ignored) else {
            if let Some(slot) = self.calculated.get_mut(elem) {
                *slot = None;
            }
            log::info!(
                "Element: {elem:03}    Peak: {:12.8}    -> unchanged",
                column.new_value(elem)
            );
            return;
        };

        if let Some(slot) = self.calculated.get_mut(elem) {
            *slot = Some(peak);
        }
        match self.output {
            PeakFitOutput::Position => {
                column.set(elem, peak);
                log::info!("Element: {elem:03}    Peak: {peak:12.8}");
            }
            PeakFitOutput::TimeOffset => {
                let old = column.old(elem);
                let new = old + peak / self.gain;
                column.set(elem, new);
                log::info!(
                    "Element: {elem:03}    Peak: {peak:12.8}    old offset: {old:12.8}    new offset: {new:12.8}    diff: {:6.2} %",
                    diff_percent(old, new)
                );
            }
        }
    }

    /// Logs the mean peak position and the mean distance from zero over the calculated elements.
    pub fn report_average(&self) {
        let peaks: Vec<f64> = self.calculated.iter().flatten().copied().collect();
        if peaks.is_empty() {
            log::info!("{}: no element was fitted", self.name);
            return;
        }
        let n = peaks.len() as f64;
        let average = peaks.iter().sum::<f64>() / n;
        let average_abs = peaks.iter().map(|p| p.abs()).sum::<f64>() / n;
        log::info!("Average center: {average:.3} ns");
        log::info!("Average difference to 0 : {average_abs:.3} ns");
    }
}

/// Dumps the new values, one per line.
pub fn write_positions(columns: &[ValueColumn], output_dir: &Path) -> Result<PathBuf, CalibError> {
    let text: String = columns
        .first()
        .map(|column| column.new.iter().map(|v| format!("{v:.6}\n")).collect())
        .unwrap_or_default();
    let path = output_dir.join(POSITION_FILE);
    std::fs::write(&path, text)?;
    log::info!("Peak positions written to '{}'", path.display());
    Ok(path)
}
