pub mod exponential;
pub mod gaussian;
pub mod landau;
pub mod time_walk;

pub use tiny_solver::factors::na::RealField;

/// Lifts a constant into the scalar type the solver differentiates with.
pub fn constant<T: RealField>(value: f64) -> T {
    tiny_solver::factors::na::convert(value)
}

/// The closed set of shapes the calibration strategies fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub enum FitModel {
    /// `gaus(0)+pol2(3)`
    GaussPol2,
    /// `expo(0)+gaus(2)`
    ExpoGauss,
    /// Exponential, Landau folded with a Gaussian, and a Gaussian.
    ExpoLandauGaussConvGauss { steps: usize },
    /// `expo(0)+landau(2)+gaus(5)`
    ExpoLandauGauss,
    TimeWalk,
}

impl FitModel {
    pub fn evaluate<T: RealField>(&self, x: T, params: &[T]) -> T {
        match self {
            Self::GaussPol2 => gaussian::gauss_pol2(x, params),
            Self::ExpoGauss => exponential::expo_gauss(x, params),
            Self::ExpoLandauGaussConvGauss { steps } => {
                landau::expo_landau_gauss_conv_gauss(x, params, *steps)
            }
            Self::ExpoLandauGauss => landau::expo_landau_gauss(x, params),
            Self::TimeWalk => time_walk::time_walk(x, params),
        }
    }

    pub fn parameter_names(&self) -> &'static [&'static str] {
        match self {
            Self::GaussPol2 => &["amplitude", "mean", "sigma", "c0", "c1", "c2"],
            Self::ExpoGauss => &["exp_const", "exp_slope", "amplitude", "mean", "sigma"],
            Self::ExpoLandauGaussConvGauss { .. } => &[
                "exp_const",
                "exp_slope",
                "landau_width",
                "landau_mpv",
                "landau_area",
                "conv_sigma",
                "gaus_const",
                "gaus_mean",
                "gaus_sigma",
            ],
            Self::ExpoLandauGauss => &[
                "exp_const",
                "exp_slope",
                "landau_const",
                "landau_mpv",
                "landau_sigma",
                "gaus_const",
                "gaus_mean",
                "gaus_sigma",
            ],
            Self::TimeWalk => &["offset", "strength", "energy_shift", "exponent"],
        }
    }

    pub fn n_params(&self) -> usize {
        self.parameter_names().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameter_counts() {
        assert_eq!(FitModel::GaussPol2.n_params(), 6);
        assert_eq!(FitModel::ExpoGauss.n_params(), 5);
        assert_eq!(FitModel::ExpoLandauGaussConvGauss { steps: 10 }.n_params(), 9);
        assert_eq!(FitModel::ExpoLandauGauss.n_params(), 8);
        assert_eq!(FitModel::TimeWalk.n_params(), 4);
    }
}
