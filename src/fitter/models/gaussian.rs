use super::{RealField, constant};

/// Unnormalised Gaussian, `exp(-0.5 * ((x - mean) / sigma)^2)`. Zero for a non-positive width.
pub fn gaus<T: RealField>(x: T, mean: T, sigma: T) -> T {
    if sigma <= constant::<T>(0.0) {
        return constant(0.0);
    }
    let z = (x - mean) / sigma;
    (constant::<T>(-0.5) * z.clone() * z).exp()
}

/// `gaus(0)+pol2(3)`: amplitude, mean, sigma, then a quadratic background.
pub fn gauss_pol2<T: RealField>(x: T, p: &[T]) -> T {
    p[0].clone() * gaus(x.clone(), p[1].clone(), p[2].clone())
        + p[3].clone()
        + p[4].clone() * x.clone()
        + p[5].clone() * x.clone() * x
}

pub fn fwhm(sigma: f64) -> f64 {
    2.0 * (2.0 * f64::ln(2.0)).sqrt() * sigma
}
