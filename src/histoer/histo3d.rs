use fnv::FnvHashMap;

use super::histo1d::histogram1d::Histogram;
use super::histo2d::histogram2d::Histogram2D;

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Axis {
    pub bins: usize,
    pub min: f64,
    pub max: f64,
}

impl Axis {
    pub fn new(bins: usize, min: f64, max: f64) -> Self {
        Self {
            bins: bins.max(1),
            min,
            max,
        }
    }

    pub fn width(&self) -> f64 {
        (self.max - self.min) / self.bins as f64
    }

    pub fn index(&self, value: f64) -> Option<usize> {
        if value < self.min || value >= self.max {
            return None;
        }
        Some((((value - self.min) / self.width()) as usize).min(self.bins - 1))
    }

    // Bin holding value, clamped onto the axis
    pub fn find_bin(&self, value: f64) -> usize {
        if value < self.min {
            0
        } else if value >= self.max {
            self.bins - 1
        } else {
            self.index(value).unwrap_or(self.bins - 1)
        }
    }
}

/// Energy x response x position spectra, e.g. E vs dE vs hit position for one element.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Histogram3D {
    pub name: String,
    pub x: Axis,
    pub y: Axis,
    pub z: Axis,
    #[serde(with = "sparse_counts")]
    pub counts: FnvHashMap<(usize, usize, usize), f64>,
    pub entries: f64,
}

impl Histogram3D {
    pub fn new(name: &str, x: Axis, y: Axis, z: Axis) -> Self {
        Self {
            name: name.to_owned(),
            x,
            y,
            z,
            counts: FnvHashMap::default(),
            entries: 0.0,
        }
    }

    pub fn fill(&mut self, x: f64, y: f64, z: f64) {
        self.entries += 1.0;
        if let (Some(i), Some(j), Some(k)) = (self.x.index(x), self.y.index(y), self.z.index(z)) {
            *self.counts.entry((i, j, k)).or_insert(0.0) += 1.0;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0.0
    }

    /// Collapses the z bins holding `z_min..=z_max` into a y vs x histogram.
    pub fn project_xy(&self, z_min: f64, z_max: f64) -> Histogram2D {
        let (first, last) = (self.z.find_bin(z_min), self.z.find_bin(z_max));
        let mut projected = Histogram2D::new(
            &format!("{}_yx", self.name),
            (self.x.bins, self.y.bins),
            ((self.x.min, self.x.max), (self.y.min, self.y.max)),
        );
        for (&(i, j, k), &count) in &self.counts {
            if k >= first && k <= last {
                *projected.bins.counts.entry((i, j)).or_insert(0.0) += count;
                projected.entries += count;
            }
        }
        projected
    }

    /// The y spectrum inside an x window and a z window.
    pub fn project_y(&self, name: &str, x_window: (f64, f64), z_window: (f64, f64)) -> Histogram {
        let (x_first, x_last) = (self.x.find_bin(x_window.0), self.x.find_bin(x_window.1));
        let (z_first, z_last) = (self.z.find_bin(z_window.0), self.z.find_bin(z_window.1));
        let mut y_bins = vec![0.0; self.y.bins];
        for (&(i, j, k), &count) in &self.counts {
            if i >= x_first && i <= x_last && k >= z_first && k <= z_last {
                y_bins[j] += count;
            }
        }
        Histogram::from_counts(name, (self.y.min, self.y.max), y_bins)
    }

    pub fn add(&mut self, other: &Histogram3D) -> bool {
        if self.x != other.x || self.y != other.y || self.z != other.z {
            log::error!(
                "Cannot add histogram '{}' to '{}': binning differs",
                other.name,
                self.name
            );
            return false;
        }
        for (&key, &count) in &other.counts {
            *self.counts.entry(key).or_insert(0.0) += count;
        }
        self.entries += other.entries;
        true
    }
}

mod sparse_counts {
    use fnv::FnvHashMap;
    use serde::{Deserialize as _, Deserializer, Serialize as _, Serializer};

    type Key = (usize, usize, usize);

    pub fn serialize<S: Serializer>(
        counts: &FnvHashMap<Key, f64>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let mut entries: Vec<(usize, usize, usize, f64)> = counts
            .iter()
            .map(|(&(i, j, k), &c)| (i, j, k, c))
            .collect();
        entries.sort_by_key(|&(i, j, k, _)| (i, j, k));
        entries.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<FnvHashMap<Key, f64>, D::Error> {
        let entries = Vec::<(usize, usize, usize, f64)>::deserialize(deserializer)?;
        Ok(entries
            .into_iter()
            .map(|(i, j, k, c)| ((i, j, k), c))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_projections_respect_windows() {
        let mut hist = Histogram3D::new(
            "h",
            Axis::new(10, 0.0, 10.0),
            Axis::new(5, 0.0, 5.0),
            Axis::new(4, 0.0, 40.0),
        );
        hist.fill(2.5, 1.5, 5.0);
        hist.fill(2.5, 3.5, 15.0);
        hist.fill(8.5, 3.5, 15.0);

        let slice = hist.project_y("s", (0.0, 5.0), (10.0, 19.0));
        assert_eq!(slice.bins, vec![0.0, 0.0, 0.0, 1.0, 0.0]);

        let flat = hist.project_xy(0.0, 39.0);
        assert_eq!(flat.entries, 3.0);
        assert_eq!(flat.bin_content(2, 1), 1.0);
    }
}
