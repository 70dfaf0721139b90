use std::path::{Path, PathBuf};

use super::{InitContext, element_histogram_name};
use crate::calib::module::ModuleInfo;
use crate::error::CalibError;
use crate::fitter::fitter::{FitStatus, Fitter};
use crate::fitter::models::FitModel;
use crate::histoer::any::AnyHistogram;
use crate::histoer::histo1d::histogram1d::Histogram;
use crate::histoer::histo3d::Histogram3D;
use crate::histoer::peak_finder::PeakFindingSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub enum DroopKind {
    /// Slices are normalised to the peak of the total slice.
    Pid,
    /// Raw slice peaks, normalised to the first slice.
    Pizza,
}

impl DroopKind {
    fn peak_limits(self) -> (f64, f64) {
        match self {
            Self::Pid => (2.0, 5.0),
            Self::Pizza => (5.0, 9.0),
        }
    }
}

/// Position to correction factor of one element.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct DroopCurve {
    pub name: String,
    pub element: usize,
    pub points: Vec<(f64, f64)>,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct DroopFile {
    pub module: String,
    pub calibration: String,
    pub curves: Vec<DroopCurve>,
}

#[derive(Debug, Clone)]
struct DroopWindows {
    position: (f64, f64),
    energy: (f64, f64),
    interval: f64,
    normalisation: (f64, f64),
}

/// Position-dependent correction curves from slice-wise dE peak fits.
#[derive(Debug, Clone)]
pub struct DroopState {
    pub kind: DroopKind,
    windows: Option<DroopWindows>,
    histograms: Vec<Option<Histogram3D>>,
    curves: Vec<Option<Vec<(f64, f64)>>>,
}

impl DroopState {
    pub fn new(kind: DroopKind) -> Self {
        Self {
            kind,
            windows: None,
            histograms: Vec::new(),
            curves: Vec::new(),
        }
    }

    pub fn init(&mut self, ctx: &InitContext<'_>) -> Result<(), CalibError> {
        let histogram_name = ctx.config.require_string(&ctx.key("Histo.Fit.Name"))?;
        let windows = DroopWindows {
            position: ctx.config.require_range(&ctx.key("Fit.Range"))?,
            energy: ctx.config.require_range(&ctx.key("Fit.Energy.Range"))?,
            interval: ctx.config.require_float(&ctx.key("Fit.Interval"))?,
            normalisation: ctx.config.require_range(&ctx.key("Fit.Range.DetPos.Norm"))?,
        };
        if windows.interval <= 0.0 {
            return Err(crate::config::ConfigError::Malformed {
                key: ctx.key("Fit.Interval"),
                value: windows.interval.to_string(),
            }
            .into());
        }
        let slices = (windows.position.1 - windows.position.0) / windows.interval;
        log::info!("{}: {slices:.0} position slice(s) per element", ctx.info.name);

        self.histograms = (0..ctx.info.n_elements)
            .map(|elem| {
                let name = element_histogram_name(&histogram_name, elem);
                match ctx.histograms.get(&name) {
                    Some(AnyHistogram::Three(h)) => Some(h),
                    Some(_) => {
                        log::error!("Histogram '{name}' is not a 3D histogram");
                        None
                    }
                    None => None,
                }
            })
            .collect();
        self.curves = vec![None; ctx.info.n_elements];
        self.windows = Some(windows);
        Ok(())
    }

    pub fn curve(&self, elem: usize) -> Option<&[(f64, f64)]> {
        self.curves.get(elem).and_then(Option::as_deref)
    }

    pub fn fit(&mut self, elem: usize) -> bool {
        let curve = self.fit_slices(elem);
        let fitted = curve.is_some();
        if let Some(slot) = self.curves.get_mut(elem) {
            *slot = curve;
        }
        fitted
    }

    fn fit_slices(&self, elem: usize) -> Option<Vec<(f64, f64)>> {
        let windows = self.windows.as_ref()?;
        let Some(histogram) = self.histograms.get(elem).and_then(Option::as_ref) else {
            log::warn!("Element: {elem:03}    histogram missing, fit skipped");
            return None;
        };
        if histogram.is_empty() {
            log::warn!("Element: {elem:03}    no entries, fit skipped");
            return None;
        }

        log::info!(
            "Position interval for normalization: [{:.1},{:.1}]",
            windows.normalisation.0,
            windows.normalisation.1
        );
        let total = histogram.project_y(
            &format!("{elem:02} total"),
            windows.energy,
            windows.normalisation,
        );
        let total = fit_slice(&total, self.kind);
        if total.is_some_and(|fit| !fit.accepted) {
            log::warn!("Element: {elem:03}    total slice fit rejected, its peak is used anyway");
        }

        let mut slices = Vec::new();
        let mut start = windows.position.0;
        while start < windows.position.1 {
            let slice = histogram.project_y(
                &format!("Proj_{}", start as i64),
                windows.energy,
                (start, start + windows.interval),
            );
            slices.push((start + windows.interval / 2.0, fit_slice(&slice, self.kind)));
            start += windows.interval;
        }

        let points = droop_points(self.kind, total, &slices);
        match &points {
            Some(points) => log::info!("Element: {elem:03}    {} droop point(s)", points.len()),
            None => log::warn!("Element: {elem:03}    no droop point"),
        }
        points
    }

    /// Writes `<module>_Droop_Corr_<calibration>.json` with one curve per fitted element.
    pub fn write_curves(&self, info: &ModuleInfo, output_dir: &Path) -> Result<PathBuf, CalibError> {
        let file = DroopFile {
            module: info.name.clone(),
            calibration: info.calibration.clone(),
            curves: self
                .curves
                .iter()
                .enumerate()
                .filter_map(|(element, points)| {
                    Some(DroopCurve {
                        name: format!("Droop_Corr_{element:02}"),
                        element,
                        points: points.clone()?,
                    })
                })
                .collect(),
        };
        let path = output_dir.join(droop_file_name(&info.name, &info.calibration));
        std::fs::write(&path, serde_json::to_string_pretty(&file)?)?;
        log::info!("Droop corrections written to '{}'", path.display());
        Ok(path)
    }
}

pub fn droop_file_name(module: &str, calibration: &str) -> String {
    format!(
        "{}_Droop_Corr_{calibration}.json",
        module.replace(".Droop", "")
    )
}

/// Proton position of one slice and whether the fit passed the quality cuts.
#[derive(Debug, Clone, Copy, PartialEq)]
struct SliceFit {
    peak: f64,
    accepted: bool,
}

/// Turns the slice fits, keyed by slice centre, into the droop curve.
///
/// The total peak is used even when its fit was rejected. Only accepted slices
/// become points. PID needs a total peak, Pizza is normalised to its first point.
fn droop_points(
    kind: DroopKind,
    total: Option<SliceFit>,
    slices: &[(f64, Option<SliceFit>)],
) -> Option<Vec<(f64, f64)>> {
    let peak_total = match (kind, total) {
        (DroopKind::Pid, None) => return None,
        (DroopKind::Pid, Some(total)) if total.peak == 0.0 => return None,
        (_, total) => total.map(|fit| fit.peak),
    };

    let mut points: Vec<(f64, f64)> = slices
        .iter()
        .filter_map(|&(centre, fit)| {
            let fit = fit.filter(|fit| fit.accepted)?;
            let value = match (kind, peak_total) {
                (DroopKind::Pid, Some(total)) => fit.peak / total,
                _ => fit.peak,
            };
            Some((centre, value))
        })
        .collect();

    if kind == DroopKind::Pizza
        && let Some(&(_, first)) = points.first().filter(|(_, first)| *first != 0.0)
    {
        for point in &mut points {
            point.1 /= first;
        }
    }

    (!points.is_empty()).then_some(points)
}

/// Exponential plus Landau pion plus Gaussian proton.
fn fit_slice(histogram: &Histogram, kind: DroopKind) -> Option<SliceFit> {
    if histogram.is_empty() {
        return None;
    }
    let peaks = PeakFindingSettings::new(10.0, 0.01).search(histogram);
    let pion = peaks.lowest_x()?;
    let (peak, high) = match kind {
        DroopKind::Pid => {
            let peak = peaks.closest_to(3.0)?;
            (peak, peak + 4.0)
        }
        DroopKind::Pizza => (7.0, 10.0),
    };

    let mut fitter =
        Fitter::new(&histogram.name, FitModel::ExpoLandauGauss).with_max_attempts(20);
    fitter.set_parameters(&[9.25568, -0.37605, 5e3, pion, 0.262472, 6e3, peak, 0.4]);
    fitter.set_limits(2, 0.0, 1e6);
    fitter.set_limits(3, 0.9 * pion, 1.1 * pion);
    let (peak_low, peak_high) = kind.peak_limits();
    fitter.set_limits(6, peak_low, peak_high);
    fitter.set_limits(5, 0.0, 1e5);
    fitter.set_limits(4, 0.1, 1.0);
    fitter.set_limits(7, 0.3, 5.0);
    fitter.set_range(0.1 * pion, high);

    let status = fitter.fit(histogram);
    if !status.has_result() {
        return None;
    }
    // a Gaussian wider than it is high is not a proton peak
    let too_wide = fitter.value(5) == 0.0 || fitter.value(7) / fitter.value(5) > 1.0;
    Some(SliceFit {
        peak: fitter.value(6),
        accepted: status == FitStatus::Converged && !too_wide,
    })
}
