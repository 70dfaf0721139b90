use super::common::Parameter;
use super::models::FitModel;
use super::solver::{Bound, Point, SolverSettings, least_squares};
use crate::histoer::histo1d::histogram1d::Histogram;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub enum FitStatus {
    Converged,
    NotConverged,
    InsufficientData,
}

impl FitStatus {
    pub fn has_result(&self) -> bool {
        matches!(self, Self::Converged | Self::NotConverged)
    }
}

/// A model with bounded parameters, a fit window and a retry budget.
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct Fitter {
    pub name: String,
    pub model: FitModel,
    pub parameters: Vec<Parameter>,
    pub range: (f64, f64),
    pub max_attempts: usize,
    pub settings: SolverSettings,
    pub chi2: Option<f64>,
    pub status: Option<FitStatus>,
}

impl Fitter {
    pub fn new(name: &str, model: FitModel) -> Self {
        let parameters = model
            .parameter_names()
            .iter()
            .map(|name| Parameter::named(name))
            .collect();
        Self {
            name: name.to_owned(),
            model,
            parameters,
            range: (f64::NEG_INFINITY, f64::INFINITY),
            max_attempts: 10,
            settings: SolverSettings::default(),
            chi2: None,
            status: None,
        }
    }

    /// Sets the initial guesses and forgets any earlier result.
    pub fn set_parameters(&mut self, guesses: &[f64]) {
        for (parameter, &guess) in self.parameters.iter_mut().zip(guesses) {
            parameter.initial_guess = parameter.clamp(guess);
            parameter.value = None;
            parameter.uncertainty = None;
        }
    }

    pub fn set_limits(&mut self, index: usize, min: f64, max: f64) {
        if let Some(parameter) = self.parameters.get_mut(index) {
            parameter.set_limits(min, max);
        }
    }

    pub fn set_range(&mut self, low: f64, high: f64) {
        self.range = if low <= high { (low, high) } else { (high, low) };
    }

    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Fitted value of parameter `index`, or its starting value before any fit.
    pub fn value(&self, index: usize) -> f64 {
        self.parameters.get(index).map_or(0.0, Parameter::start)
    }

    pub fn values(&self) -> Vec<f64> {
        self.parameters.iter().map(Parameter::start).collect()
    }

    pub fn evaluate(&self, x: f64) -> f64 {
        self.model.evaluate(x, self.values().as_slice())
    }

    /// Fits the histogram inside the range, skipping empty bins, with `sigma = sqrt(count)`.
    pub fn fit(&mut self, histogram: &Histogram) -> FitStatus {
        let data = histogram.fit_data(self.range.0, self.range.1);
        let points: Vec<Point> = data.points().map(|(x, y)| (x, y, y.abs().sqrt())).collect();
        self.fit_points(&points)
    }

    /// Fits weighted `(x, y, sigma)` points inside the range.
    ///
    /// Every attempt starts from the same parameters; the first that converges is kept,
    /// otherwise the last one.
    pub fn fit_points(&mut self, points: &[Point]) -> FitStatus {
        let points: Vec<Point> = points
            .iter()
            .copied()
            .filter(|&(x, _, sigma)| x >= self.range.0 && x <= self.range.1 && sigma > 0.0)
            .collect();

        let start = self.values();
        let bounds: Vec<Bound> = self
            .parameters
            .iter()
            .map(|p| Bound {
                lower: p.min,
                upper: p.max,
                vary: p.vary,
            })
            .collect();

        let mut last = None;
        for attempt in 0..self.max_attempts {
            let Some(solution) = least_squares(
                self.model,
                &points,
                &start,
                &bounds,
                &self.settings,
            ) else {
                break;
            };
            let converged = solution.converged;
            last = Some(solution);
            if converged {
                log::debug!("'{}' converged on attempt {}", self.name, attempt + 1);
                break;
            }
        }

        let status = match last {
            None => {
                log::warn!(
                    "'{}': {} point(s) in [{}, {}] is not enough to fit",
                    self.name,
                    points.len(),
                    self.range.0,
                    self.range.1
                );
                FitStatus::InsufficientData
            }
            Some(solution) => {
                for (i, parameter) in self.parameters.iter_mut().enumerate() {
                    parameter.value = solution.params.get(i).copied();
                    parameter.uncertainty = solution.uncertainties.get(i).copied();
                }
                self.chi2 = Some(solution.chi2);
                if solution.converged {
                    FitStatus::Converged
                } else {
                    log::warn!(
                        "'{}' did not converge after {} attempt(s)",
                        self.name,
                        self.max_attempts
                    );
                    FitStatus::NotConverged
                }
            }
        };

        self.status = Some(status);
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peak_on_background() -> Histogram {
        let counts = (0..100)
            .map(|i| {
                let x = i as f64 + 0.5;
                (200.0 * (-0.5 * ((x - 42.0) / 3.0_f64).powi(2)).exp() + 10.0).round()
            })
            .collect();
        Histogram::from_counts("peak", (0.0, 100.0), counts)
    }

    #[test]
    fn test_gauss_pol2_finds_peak() {
        let hist = peak_on_background();
        let mut fitter = Fitter::new("peak", FitModel::GaussPol2);
        fitter.set_parameters(&[hist.maximum(), 42.5, 3.0, 1.0, 0.1, 0.1]);
        fitter.set_range(25.0, 60.0);
        let status = fitter.fit(&hist);
        assert!(status.has_result());
        assert!((fitter.value(1) - 42.0).abs() < 0.1);
        assert!((fitter.value(2) - 3.0).abs() < 0.2);
    }

    #[test]
    fn test_limits_hold_during_fit() {
        let hist = peak_on_background();
        let mut fitter = Fitter::new("peak", FitModel::GaussPol2);
        fitter.set_parameters(&[hist.maximum(), 40.0, 3.0, 1.0, 0.1, 0.1]);
        fitter.set_limits(1, 39.0, 41.0);
        fitter.set_range(25.0, 60.0);
        fitter.fit(&hist);
        assert!(fitter.value(1) <= 41.0);
    }

    #[test]
    fn test_empty_histogram_is_insufficient() {
        let hist = Histogram::new("empty", 100, (0.0, 100.0));
        let mut fitter = Fitter::new("empty", FitModel::GaussPol2);
        assert_eq!(fitter.fit(&hist), FitStatus::InsufficientData);
        assert!(fitter.parameters.iter().all(|p| p.value.is_none()));
    }

    #[test]
    fn test_refit_starts_from_result() {
        let hist = peak_on_background();
        let mut fitter = Fitter::new("peak", FitModel::GaussPol2);
        fitter.set_parameters(&[hist.maximum(), 42.5, 3.0, 1.0, 0.1, 0.1]);
        fitter.set_range(25.0, 60.0);
        fitter.fit(&hist);
        let first = fitter.value(1);
        fitter.fit(&hist);
        assert!((fitter.value(1) - first).abs() < 1e-3);
    }
}
