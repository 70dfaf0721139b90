use std::collections::HashMap;

use nalgebra::DMatrix;
use tiny_solver::Optimizer;
use tiny_solver::factors::na as ts_na;

use super::models::{FitModel, RealField, constant};

const PARAMETERS: &str = "p";

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct SolverSettings {
    pub max_iterations: usize,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            max_iterations: 100,
        }
    }
}

/// One weighted point, `(x, y, sigma)`.
pub type Point = (f64, f64, f64);

/// Box constraint and fixed/free flag of one parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bound {
    pub lower: f64,
    pub upper: f64,
    pub vary: bool,
}

impl Bound {
    fn clamp(&self, x: f64) -> f64 {
        if self.lower <= self.upper {
            x.clamp(self.lower, self.upper)
        } else {
            x
        }
    }

    fn is_free(&self) -> bool {
        self.vary && self.lower != self.upper
    }

    fn is_limited(&self) -> bool {
        self.lower < self.upper && (self.lower.is_finite() || self.upper.is_finite())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Solution {
    pub params: Vec<f64>,
    pub uncertainties: Vec<f64>,
    pub chi2: f64,
    pub ndf: usize,
    pub converged: bool,
}

/// Neyman residuals `(y - f(x)) / sigma` of every point, as one residual block.
#[derive(Debug, Clone)]
struct WeightedResiduals {
    model: FitModel,
    points: Vec<Point>,
}

impl<T: RealField> tiny_solver::factors::Factor<T> for WeightedResiduals {
    fn residual_func(&self, params: &[ts_na::DVector<T>]) -> ts_na::DVector<T> {
        let Some(p) = params.first() else {
            return ts_na::DVector::<T>::zeros(self.points.len());
        };
        let p = p.as_slice();
        ts_na::DVector::<T>::from_iterator(
            self.points.len(),
            self.points.iter().map(|&(x, y, sigma)| {
                let predicted = self.model.evaluate(constant::<T>(x), p);
                (constant::<T>(y) - predicted) / constant::<T>(sigma)
            }),
        )
    }
}

/// Bounded Levenberg-Marquardt fit of `model` to `points`.
///
/// Fixed parameters are frozen in the problem and limits become variable bounds.
/// Returns `None` when there are fewer points than free parameters. When the optimizer
/// gives up the solution carries the start values and `converged == false`.
pub fn least_squares(
    model: FitModel,
    points: &[Point],
    start: &[f64],
    bounds: &[Bound],
    settings: &SolverSettings,
) -> Option<Solution> {
    let free: Vec<usize> = (0..start.len())
        .filter(|&i| bounds.get(i).is_some_and(Bound::is_free))
        .collect();
    if points.is_empty() || points.len() < free.len() {
        return None;
    }

    let start: Vec<f64> = start
        .iter()
        .enumerate()
        .map(|(i, &p)| bounds.get(i).map_or(p, |b| b.clamp(p)))
        .collect();

    let mut problem = tiny_solver::Problem::new();
    problem.add_residual_block(
        points.len(),
        &[PARAMETERS],
        Box::new(WeightedResiduals {
            model,
            points: points.to_vec(),
        }),
        None,
    );
    for (i, bound) in bounds.iter().enumerate().take(start.len()) {
        if !bound.is_free() {
            problem.fix_variable(PARAMETERS, i);
        } else if bound.is_limited() {
            problem.set_variable_bounds(PARAMETERS, i, bound.lower, bound.upper);
        }
    }

    let mut initial_values = HashMap::<String, ts_na::DVector<f64>>::new();
    initial_values.insert(
        PARAMETERS.to_owned(),
        ts_na::DVector::<f64>::from_vec(start.clone()),
    );

    let optimizer = tiny_solver::LevenbergMarquardtOptimizer::default();
    let options = tiny_solver::OptimizerOptions {
        max_iteration: settings.max_iterations.max(1),
        verbosity_level: 0,
        ..Default::default()
    };

    let fitted = if free.is_empty() {
        Some(start.clone())
    } else {
        optimizer
            .optimize(&problem, &initial_values, Some(options))
            .and_then(|result| {
                result
                    .get(PARAMETERS)
                    .map(|p| p.iter().copied().collect::<Vec<f64>>())
            })
            .filter(|p| p.len() == start.len() && p.iter().all(|v| v.is_finite()))
    };

    let converged = fitted.is_some();
    let params: Vec<f64> = fitted
        .unwrap_or_else(|| start.clone())
        .iter()
        .enumerate()
        .map(|(i, &p)| bounds.get(i).map_or(p, |b| b.clamp(p)))
        .collect();
    let chi2 = chi_square(model, points, &params);

    Some(Solution {
        uncertainties: uncertainties(model, points, &params, &free),
        params,
        chi2,
        ndf: points.len().saturating_sub(free.len()),
        converged: converged && chi2.is_finite(),
    })
}

pub fn chi_square(model: FitModel, points: &[Point], params: &[f64]) -> f64 {
    points
        .iter()
        .map(|&(x, y, sigma)| ((y - model.evaluate(x, params)) / sigma).powi(2))
        .sum()
}

// Parameter errors from the inverse of J^T J at the solution, J by forward differences
fn uncertainties(model: FitModel, points: &[Point], params: &[f64], free: &[usize]) -> Vec<f64> {
    let mut errors = vec![0.0; params.len()];
    if free.is_empty() {
        return errors;
    }

    let mut jacobian = DMatrix::<f64>::zeros(points.len(), free.len());
    let base: Vec<f64> = points.iter().map(|&(x, _, _)| model.evaluate(x, params)).collect();
    let mut shifted = params.to_vec();
    for (col, &i) in free.iter().enumerate() {
        let h = f64::EPSILON.sqrt() * params[i].abs().max(1.0);
        shifted[i] = params[i] + h;
        for (row, &(x, _, sigma)) in points.iter().enumerate() {
            let derivative = (model.evaluate(x, shifted.as_slice()) - base[row]) / h;
            jacobian[(row, col)] = if derivative.is_finite() {
                derivative / sigma
            } else {
                0.0
            };
        }
        shifted[i] = params[i];
    }

    if let Some(covariance) = (jacobian.transpose() * &jacobian).try_inverse() {
        for (k, &i) in free.iter().enumerate() {
            errors[i] = covariance[(k, k)].abs().sqrt();
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    fn free(n: usize) -> Vec<Bound> {
        vec![
            Bound {
                lower: f64::NEG_INFINITY,
                upper: f64::INFINITY,
                vary: true,
            };
            n
        ]
    }

    // GaussPol2 with the Gaussian switched off leaves a quadratic in p3..p5
    fn polynomial_bounds(varying: &[usize]) -> Vec<Bound> {
        let mut bounds = free(6);
        for (i, bound) in bounds.iter_mut().enumerate() {
            bound.vary = varying.contains(&i);
        }
        bounds
    }

    #[test]
    fn test_recovers_line() {
        let points: Vec<Point> = (0..20)
            .map(|i| {
                let x = i as f64;
                (x, 3.0 + 2.0 * x, 1.0)
            })
            .collect();
        let solution = least_squares(
            FitModel::GaussPol2,
            &points,
            &[0.0, 0.0, 1.0, 0.0, 0.0, 0.0],
            &polynomial_bounds(&[3, 4]),
            &SolverSettings::default(),
        )
        .unwrap();
        assert!(solution.converged);
        assert!((solution.params[3] - 3.0).abs() < 1e-5);
        assert!((solution.params[4] - 2.0).abs() < 1e-5);
        assert_eq!(solution.ndf, 18);
        assert!(solution.chi2 < 1e-8);
    }

    #[test]
    fn test_respects_bounds() {
        let points: Vec<Point> = (0..10).map(|i| (i as f64, 5.0, 1.0)).collect();
        let mut bounds = polynomial_bounds(&[3]);
        bounds[3].lower = 0.0;
        bounds[3].upper = 2.0;
        let solution = least_squares(
            FitModel::GaussPol2,
            &points,
            &[0.0, 0.0, 1.0, 1.0, 0.0, 0.0],
            &bounds,
            &SolverSettings::default(),
        )
        .unwrap();
        assert!(solution.params[3] <= 2.0 + 1e-12);
        assert!(solution.params[3] >= 0.0);
    }

    #[test]
    fn test_fixed_parameter_stays() {
        let points: Vec<Point> = (0..10).map(|i| (i as f64, 1.0 + i as f64, 1.0)).collect();
        let solution = least_squares(
            FitModel::GaussPol2,
            &points,
            &[0.0, 0.0, 1.0, 0.0, 0.5, 0.0],
            &polynomial_bounds(&[4]),
            &SolverSettings::default(),
        )
        .unwrap();
        assert_eq!(solution.params[3], 0.0);
        assert_eq!(solution.uncertainties[3], 0.0);
        assert!(solution.uncertainties[4] > 0.0);
    }

    #[test]
    fn test_too_few_points() {
        let result = least_squares(
            FitModel::GaussPol2,
            &[(1.0, 1.0, 1.0)],
            &[0.0, 0.0, 1.0, 0.0, 0.0, 0.0],
            &polynomial_bounds(&[3, 4]),
            &SolverSettings::default(),
        );
        assert!(result.is_none());
    }

    #[test]
    fn test_recovers_time_walk() {
        let truth = [5.0, 40.0, 1.0, 0.5];
        let points: Vec<Point> = (1..=15)
            .map(|i| {
                let e = 2.0 * i as f64;
                (e, FitModel::TimeWalk.evaluate(e, &truth), 0.05)
            })
            .collect();
        let mut bounds = free(4);
        bounds[3].lower = 0.1;
        bounds[3].upper = 2.0;
        let solution = least_squares(
            FitModel::TimeWalk,
            &points,
            &[4.0, 30.0, 1.0, 0.6],
            &bounds,
            &SolverSettings::default(),
        )
        .unwrap();
        assert!(solution.converged);
        for &(e, t, _) in &points {
            assert!((FitModel::TimeWalk.evaluate(e, solution.params.as_slice()) - t).abs() < 0.05);
        }
    }
}
