use super::gaussian::gaus;
use super::RealField;

/// `expo(0)+gaus(2)`: `exp(p0 + p1 x) + p2 * gaus(x; p3, p4)`.
pub fn expo_gauss<T: RealField>(x: T, p: &[T]) -> T {
    (p[0].clone() + p[1].clone() * x.clone()).exp()
        + p[2].clone() * gaus(x, p[3].clone(), p[4].clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expo_gauss_at_peak() {
        let p: [f64; 5] = [0.0, 0.0, 4.0, 2.0, 0.5];
        assert!((expo_gauss(2.0, &p) - 5.0).abs() < 1e-12);
        assert!((expo_gauss(100.0, &p) - 1.0).abs() < 1e-12);
    }
}
