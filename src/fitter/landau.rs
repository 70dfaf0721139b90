//! Landau density from the CERNLIB DENLAN rational approximation.

use super::models::{RealField, constant};

const P1: [f64; 5] = [
    0.4259894875,
    -0.1249762550,
    0.03984243700,
    -0.006298287635,
    0.001511162253,
];
const Q1: [f64; 5] = [
    1.0,
    -0.3388260629,
    0.09594393323,
    -0.01608042283,
    0.003778942063,
];
const P2: [f64; 5] = [
    0.1788541609,
    0.1173957403,
    0.01488850518,
    -0.001394989411,
    0.0001283617211,
];
const Q2: [f64; 5] = [
    1.0,
    0.7428795082,
    0.3153932961,
    0.06694219548,
    0.008790609714,
];
const P3: [f64; 5] = [
    0.1788544503,
    0.09359161662,
    0.006325387654,
    0.00006611667319,
    -0.000002031049101,
];
const Q3: [f64; 5] = [
    1.0,
    0.6097809921,
    0.2560616665,
    0.04746722384,
    0.006957301675,
];
const P4: [f64; 5] = [
    0.9874054407,
    118.6723273,
    849.2794360,
    -743.7792444,
    427.0262186,
];
const Q4: [f64; 5] = [1.0, 106.8615961, 337.6496214, 2016.712389, 1597.063511];
const P5: [f64; 5] = [
    1.003675074,
    167.5702434,
    4789.711289,
    21217.86767,
    -22324.94910,
];
const Q5: [f64; 5] = [1.0, 156.9424537, 3745.310488, 9834.698876, 66924.28357];
const P6: [f64; 5] = [
    1.000827619,
    664.9143136,
    62972.92665,
    475554.6998,
    -5743609.109,
];
const Q6: [f64; 5] = [
    1.0,
    651.4101098,
    56974.73333,
    165917.4725,
    -2815759.939,
];
const A1: [f64; 3] = [0.04166666667, -0.01996527778, 0.02709538966];
const A2: [f64; 2] = [-1.845568670, -4.284640743];

/// Location of the maximum of the standard density.
pub const MP_SHIFT: f64 = -0.22278298;

fn horner<T: RealField>(c: &[f64; 5], v: T) -> T {
    c[..4]
        .iter()
        .rev()
        .fold(constant::<T>(c[4]), |acc, &k| acc * v.clone() + constant::<T>(k))
}

fn ratio<T: RealField>(p: &[f64; 5], q: &[f64; 5], v: T) -> T {
    horner(p, v.clone()) / horner(q, v)
}

/// Unnormalised Landau density at `x` with location `mpv` and scale `sigma`.
///
/// The maximum sits near `mpv + MP_SHIFT * sigma`, not at `mpv`. Returns 0 for a non-positive scale.
pub fn landau<T: RealField>(x: T, mpv: T, sigma: T) -> T {
    if sigma <= constant::<T>(0.0) {
        return constant(0.0);
    }
    let v = (x - mpv) / sigma;
    let one = constant::<T>(1.0);

    if v < constant::<T>(-5.5) {
        let u = (v + one.clone()).exp();
        if u < constant::<T>(1e-10) {
            return constant(0.0);
        }
        let ue = (-one.clone() / u.clone()).exp();
        let us = u.clone().sqrt();
        let series = constant::<T>(A1[0])
            + (constant::<T>(A1[1]) + constant::<T>(A1[2]) * u.clone()) * u.clone();
        constant::<T>(0.3989422803) * (ue / us) * (one + series * u)
    } else if v < constant::<T>(-1.0) {
        let u = (-v.clone() - one).exp();
        (-u.clone()).exp() * u.sqrt() * ratio(&P1, &Q1, v)
    } else if v < one {
        ratio(&P2, &Q2, v)
    } else if v < constant::<T>(5.0) {
        ratio(&P3, &Q3, v)
    } else if v < constant::<T>(12.0) {
        let u = one / v;
        u.clone() * u.clone() * ratio(&P4, &Q4, u)
    } else if v < constant::<T>(50.0) {
        let u = one / v;
        u.clone() * u.clone() * ratio(&P5, &Q5, u)
    } else if v < constant::<T>(300.0) {
        let u = one / v;
        u.clone() * u.clone() * ratio(&P6, &Q6, u)
    } else {
        let u = one.clone() / (v.clone() - v.clone() * v.clone().ln() / (v + one.clone()));
        u.clone()
            * u.clone()
            * (one + (constant::<T>(A2[0]) + constant::<T>(A2[1]) * u.clone()) * u)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_values() {
        assert!((landau(0.0_f64, 0.0, 1.0) - 0.1788541609).abs() < 1e-9);
        assert!((landau(MP_SHIFT, 0.0, 1.0) - 0.1805).abs() < 1e-3);
        assert_eq!(landau(1.0, 0.0, 0.0), 0.0);
    }

    #[test]
    fn test_maximum_near_shift() {
        let at_max = landau(MP_SHIFT, 0.0, 1.0);
        assert!(at_max > landau(MP_SHIFT - 0.3, 0.0, 1.0));
        assert!(at_max > landau(MP_SHIFT + 0.3, 0.0, 1.0));
    }

    #[test]
    fn test_branches_join_smoothly() {
        for v in [-1.0_f64, 1.0, 5.0, 12.0] {
            let below = landau(v - 1e-9, 0.0, 1.0);
            let above = landau(v + 1e-9, 0.0, 1.0);
            assert!((below - above).abs() < 2e-3 * below, "v = {v}");
        }
    }

    #[test]
    fn test_scale_and_location() {
        let a: f64 = landau(12.0, 10.0, 2.0);
        let b = landau(1.0, 0.0, 1.0);
        assert!((a - b).abs() < 1e-12);
    }
}
