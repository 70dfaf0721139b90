use super::gaussian::gaus;
use super::{RealField, constant};
use crate::fitter::landau::{MP_SHIFT, landau};

const INV_SQRT_2PI: f64 = 0.3989422804014;
// convolution reaches this many Gaussian sigmas either side
const CONV_SIGMAS: f64 = 4.0;

/// Exponential background, a Landau folded with a Gaussian, and a second Gaussian hump.
///
/// Parameters: exp constant, exp slope, Landau width, most probable value, area,
/// convolution sigma, Gaussian constant, Gaussian mean, Gaussian sigma.
/// The folding is a midpoint sum over `steps` points, half taken from each end of
/// `[x - 4 sigma_c, x + 4 sigma_c]`.
pub fn expo_landau_gauss_conv_gauss<T: RealField>(x: T, p: &[T], steps: usize) -> T {
    let mpc = p[3].clone() - constant::<T>(MP_SHIFT) * p[2].clone();
    let reach = constant::<T>(CONV_SIGMAS) * p[5].clone();
    let low = x.clone() - reach.clone();
    let high = x.clone() + reach;
    let step = (high.clone() - low.clone()) / constant::<T>(steps.max(1) as f64);

    let fold = |xx: T| {
        landau(xx.clone(), mpc.clone(), p[2].clone()) * gaus(x.clone(), xx, p[5].clone())
    };
    let mut sum = constant::<T>(0.0);
    for i in 1..=steps / 2 {
        let offset = constant::<T>(i as f64 - 0.5) * step.clone();
        sum += fold(low.clone() + offset.clone());
        sum += fold(high.clone() - offset);
    }

    let mut out = (p[0].clone() + p[1].clone() * x.clone()).exp()
        + p[6].clone() * gaus(x, p[7].clone(), p[8].clone());
    if p[3] != constant::<T>(0.0) {
        out += p[4].clone() * step * sum * constant::<T>(INV_SQRT_2PI) / p[3].clone();
    }
    out
}

/// `expo(0)+landau(2)+gaus(5)`, with the Landau given as constant, location and scale.
pub fn expo_landau_gauss<T: RealField>(x: T, p: &[T]) -> T {
    (p[0].clone() + p[1].clone() * x.clone()).exp()
        + p[2].clone() * landau(x.clone(), p[3].clone(), p[4].clone())
        + p[5].clone() * gaus(x, p[6].clone(), p[7].clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convolution_peaks_near_mpv() {
        // no background, no Gaussian hump
        let p = [-100.0, 0.0, 0.5, 2.0, 100.0, 0.2, 0.0, 5.0, 0.4];
        let at = |x: f64| expo_landau_gauss_conv_gauss(x, &p, 100);
        assert!(at(2.0) > at(1.0));
        assert!(at(2.0) > at(3.5));
        assert!(at(2.0) > 0.0);
    }

    #[test]
    fn test_more_steps_converge() {
        let p: [f64; 9] = [1.0, -0.4, 0.5, 2.0, 100.0, 0.3, 10.0, 5.0, 0.4];
        let coarse = expo_landau_gauss_conv_gauss(2.3, &p, 10);
        let fine = expo_landau_gauss_conv_gauss(2.3, &p, 100);
        assert!((coarse - fine).abs() / fine < 0.05);
    }

    #[test]
    fn test_expo_landau_gauss_terms() {
        let p: [f64; 8] = [0.0, 0.0, 2.0, 0.0, 1.0, 3.0, 10.0, 1.0];
        let expected = 1.0 + 2.0 * 0.1788541609 + 3.0 * gaus(0.0, 10.0, 1.0);
        assert!((expo_landau_gauss(0.0, &p) - expected).abs() < 1e-8);
    }
}
