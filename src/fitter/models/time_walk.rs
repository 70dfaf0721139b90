use super::{RealField, constant};

/// Time-walk curve `t(E) = p0 + p1 / (E + p2)^p3`.
pub fn time_walk<T: RealField>(energy: T, p: &[T]) -> T {
    let base = energy + p[2].clone();
    if base <= constant::<T>(0.0) {
        return p[0].clone();
    }
    p[0].clone() + p[1].clone() / base.powf(p[3].clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_walk_vanishes_at_high_energy() {
        let p: [f64; 4] = [5.0, 40.0, 1.0, 0.5];
        assert!((time_walk(3.0, &p) - 25.0).abs() < 1e-12);
        assert!((time_walk(1e8, &p) - 5.0).abs() < 1e-2);
        assert_eq!(time_walk(-2.0, &p), 5.0);
    }
}
