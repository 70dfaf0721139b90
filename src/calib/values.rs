/// Old and new calibration values of one data type, indexed by element.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ValueColumn {
    pub data_type: String,
    pub old: Vec<f64>,
    pub new: Vec<f64>,
}

impl ValueColumn {
    pub fn new(data_type: &str, n_elements: usize) -> Self {
        Self {
            data_type: data_type.to_owned(),
            old: vec![0.0; n_elements],
            new: vec![0.0; n_elements],
        }
    }

    pub fn keep_old(&mut self, elem: usize) {
        if let (Some(new), Some(&old)) = (self.new.get_mut(elem), self.old.get(elem)) {
            *new = old;
        }
    }

    pub fn set(&mut self, elem: usize, value: f64) {
        if let Some(new) = self.new.get_mut(elem) {
            *new = value;
        }
    }

    pub fn old(&self, elem: usize) -> f64 {
        self.old.get(elem).copied().unwrap_or(0.0)
    }

    pub fn new_value(&self, elem: usize) -> f64 {
        self.new.get(elem).copied().unwrap_or(0.0)
    }
}

/// Relative change in percent, 0 when the old value is 0.
pub fn diff_percent(old: f64, new: f64) -> f64 {
    if old == 0.0 {
        0.0
    } else {
        100.0 * (new - old) / old
    }
}

/// A position the operator can drag, next to the position the last fit produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize)]
pub struct Marker {
    pub position: f64,
    pub fitted: f64,
}

impl Marker {
    pub fn fitted(position: f64) -> Self {
        Self {
            position,
            fitted: position,
        }
    }

    pub fn moved(&self) -> bool {
        self.position.to_bits() != self.fitted.to_bits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keep_old_and_diff() {
        let mut column = ValueColumn::new("Data.PID.T0", 3);
        column.old = vec![1.0, 2.0, 3.0];
        column.set(1, 5.0);
        column.keep_old(2);
        assert_eq!(column.new, vec![0.0, 5.0, 3.0]);
        assert!((diff_percent(2.0, 3.0) - 50.0).abs() < 1e-12);
        assert_eq!(diff_percent(0.0, 3.0), 0.0);
    }

    #[test]
    fn test_marker_moves() {
        let mut marker = Marker::fitted(3.5);
        assert!(!marker.moved());
        marker.position = 3.6;
        assert!(marker.moved());
    }
}
