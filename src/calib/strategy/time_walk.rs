use super::{InitContext, element_histogram_name};
use crate::calib::values::ValueColumn;
use crate::error::CalibError;
use crate::fitter::fitter::Fitter;
use crate::fitter::models::FitModel;
use crate::fitter::solver::Point;
use crate::histoer::any::AnyHistogram;
use crate::histoer::histo2d::histogram2d::Histogram2D;

pub const N_PARAMETERS: usize = 4;

/// Slices with fewer entries are not fitted.
const MIN_SLICE_ENTRIES: f64 = 10.0;

pub fn data_types(data_type: &str) -> Vec<String> {
    (0..N_PARAMETERS)
        .map(|i| format!("{data_type}.Par{i}"))
        .collect()
}

/// Time-walk curve per element, from the time peaks of energy slices.
#[derive(Debug, Clone, Default)]
pub struct TimeWalkState {
    name: String,
    energy_range: (f64, f64),
    interval: f64,
    time_range: Option<(f64, f64)>,
    histograms: Vec<Option<Histogram2D>>,
    results: Vec<Option<[f64; N_PARAMETERS]>>,
    calculated: Vec<Option<f64>>,
}

impl TimeWalkState {
    pub fn init(&mut self, ctx: &InitContext<'_>) -> Result<(), CalibError> {
        let histogram_name = ctx.config.require_string(&ctx.key("Histo.Fit.Name"))?;
        self.energy_range = ctx.config.require_range(&ctx.key("Fit.Energy.Range"))?;
        self.interval = ctx.config.require_float(&ctx.key("Fit.Interval"))?;
        if self.interval <= 0.0 {
            return Err(crate::config::ConfigError::Malformed {
                key: ctx.key("Fit.Interval"),
                value: self.interval.to_string(),
            }
            .into());
        }
        self.time_range = ctx.config.range(&ctx.key("Fit.Time.Range"));

        self.histograms = (0..ctx.info.n_elements)
            .map(|elem| {
                let name = element_histogram_name(&histogram_name, elem);
                match ctx.histograms.get(&name) {
                    Some(AnyHistogram::Two(h)) => Some(h),
                    Some(_) => {
                        log::error!("Histogram '{name}' is not a 2D histogram");
                        None
                    }
                    None => None,
                }
            })
            .collect();
        self.name = ctx.info.name.clone();
        self.results = vec![None; ctx.info.n_elements];
        self.calculated = vec![None; ctx.info.n_elements];
        Ok(())
    }

    pub fn result(&self, elem: usize) -> Option<[f64; N_PARAMETERS]> {
        self.results.get(elem).copied().flatten()
    }

    pub fn fit(&mut self, elem: usize) -> bool {
        let result = match self.histograms.get(elem).and_then(Option::as_ref) {
            Some(h) if !h.is_empty() => {
                let points = self.slice_points(h);
                if points.len() < N_PARAMETERS {
                    log::warn!(
                        "Element: {elem:03}    only {} energy slice(s) fitted, keeping old walk",
                        points.len()
                    );
                    None
                } else {
                    fit_walk(&format!("{}_{elem:03}", self.name), &points)
                }
            }
            _ => {
                log::warn!("Element: {elem:03}    no entries, fit skipped");
                None
            }
        };
        if let Some(slot) = self.results.get_mut(elem) {
            *slot = result;
        }
        result.is_some()
    }

    /// `(energy, time, error)` of every energy slice whose time peak could be fitted.
    fn slice_points(&self, histogram: &Histogram2D) -> Vec<Point> {
        let mut points = Vec::new();
        let mut start = self.energy_range.0;
        while start < self.energy_range.1 {
            let first = histogram.find_bin_x(start);
            // the bin starting at the slice end belongs to the next slice
            let last = histogram
                .find_bin_x(start + self.interval)
                .saturating_sub(1)
                .max(first);
            let slice = histogram.projection_y_bins(&format!("{}_{first}", histogram.name), first, last);
            let center = start + self.interval / 2.0;
            start += self.interval;

            if slice.entries < MIN_SLICE_ENTRIES {
                continue;
            }
            let Some(max_bin) = slice.maximum_bin() else {
                continue;
            };
            let mut fitter = Fitter::new(&slice.name, FitModel::GaussPol2);
            fitter.set_parameters(&[
                slice.maximum(),
                slice.bin_center(max_bin),
                3.0 * slice.bin_width,
                0.0,
                0.0,
                0.0,
            ]);
            fitter.set_limits(2, 0.5 * slice.bin_width, slice.range.1 - slice.range.0);
            let (low, high) = self.time_range.unwrap_or(slice.range);
            fitter.set_range(low, high);
            if !fitter.fit(&slice).has_result() {
                continue;
            }
            let time = fitter.value(1);
            if !slice.contains(time) {
                continue;
            }
            let error = (fitter.value(2).abs() / slice.entries.sqrt()).max(1e-3);
            points.push((center, time, error));
        }
        points
    }

    pub fn calculate(&mut self, elem: usize, columns: &mut [ValueColumn], ignored: bool) {
        let Some(parameters) = self.result(elem).filter(|_| !ignored) else {
            if let Some(slot) = self.calculated.get_mut(elem) {
                *slot = None;
            }
            log::info!("Element: {elem:03}    -> unchanged");
            return;
        };
        for (column, &value) in columns.iter_mut().zip(&parameters) {
            column.set(elem, value);
        }
        if let Some(slot) = self.calculated.get_mut(elem) {
            *slot = Some(parameters[0]);
        }
        log::info!(
            "Element: {elem:03}    Par0: {:12.8}    Par1: {:12.8}    Par2: {:12.8}    Par3: {:12.8}",
            parameters[0],
            parameters[1],
            parameters[2],
            parameters[3]
        );
    }

    pub fn report_average(&self) {
        let offsets: Vec<f64> = self.calculated.iter().flatten().copied().collect();
        if offsets.is_empty() {
            return;
        }
        let n = offsets.len() as f64;
        log::info!(
            "Average offset: {:.3} ns",
            offsets.iter().sum::<f64>() / n
        );
        log::info!(
            "Average difference to 0 : {:.3} ns",
            offsets.iter().map(|t| t.abs()).sum::<f64>() / n
        );
    }
}

/// Fits `t(E) = p0 + p1 / (E + p2)^p3` through the slice points, sorted by energy.
pub fn fit_walk(name: &str, points: &[Point]) -> Option<[f64; N_PARAMETERS]> {
    let (low, high) = (points.first()?, points.last()?);
    let offset = high.1;
    let strength = (low.1 - high.1) * low.0.abs().max(1.0).sqrt();

    let mut fitter = Fitter::new(name, FitModel::TimeWalk);
    fitter.set_parameters(&[offset, strength, 0.0, 0.5]);
    fitter.set_limits(2, -0.9 * low.0.abs(), 1e3);
    fitter.set_limits(3, 0.01, 3.0);
    fitter.set_range(low.0, high.0);
    if !fitter.fit_points(points).has_result() {
        return None;
    }
    let values = fitter.values();
    Some([values[0], values[1], values[2], values[3]])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fitter::models::time_walk::time_walk;

    const TRUE_WALK: [f64; 4] = [5.0, 40.0, 1.0, 0.5];

    #[test]
    fn test_walk_fit_reproduces_points() {
        let points: Vec<Point> = (1..=10)
            .map(|i| {
                let e = 20.0 * i as f64;
                (e, time_walk(e, &TRUE_WALK), 0.05)
            })
            .collect();
        let walk = fit_walk("walk", &points).unwrap();
        for &(e, t, _) in &points {
            assert!((time_walk(e, &walk) - t).abs() < 0.05);
        }
    }

    #[test]
    fn test_slices_follow_the_walk() {
        // x = energy in 2 MeV bins, y = time in 0.25 ns bins
        let mut h = Histogram2D::new("walk_000", (100, 160), ((0.0, 200.0), (-10.0, 30.0)));
        for x_bin in 0..100 {
            let e = 2.0 * x_bin as f64 + 1.0;
            let t = time_walk(e, &TRUE_WALK);
            for y_bin in 0..160 {
                let y = -10.0 + 0.25 * (y_bin as f64 + 0.5);
                let count = (50.0 * (-0.5 * ((y - t) / 0.75_f64).powi(2)).exp()).round();
                if count > 0.0 {
                    h.set_bin_content(x_bin, y_bin, count);
                }
            }
        }
        let state = TimeWalkState {
            energy_range: (20.0, 200.0),
            interval: 20.0,
            ..Default::default()
        };
        let points = state.slice_points(&h);
        assert_eq!(points.len(), 9);
        for &(e, t, _) in &points {
            assert!((t - time_walk(e, &TRUE_WALK)).abs() < 0.3);
        }
    }

    #[test]
    fn test_too_few_slices_keep_old_values() {
        let mut state = TimeWalkState {
            histograms: vec![None],
            results: vec![None],
            calculated: vec![None],
            ..Default::default()
        };
        let mut columns: Vec<ValueColumn> = data_types("Data.CB.Walk")
            .iter()
            .map(|dt| ValueColumn::new(dt, 1))
            .collect();
        for column in &mut columns {
            column.old = vec![2.0];
            column.new = vec![2.0];
        }
        assert!(!state.fit(0));
        state.calculate(0, &mut columns, false);
        assert!(columns.iter().all(|c| c.new == vec![2.0]));
        assert_eq!(columns[3].data_type, "Data.CB.Walk.Par3");
    }
}
