use fnv::FnvHashMap;

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Histogram2D {
    pub name: String,
    pub bins: Bins,
    pub range: Range,
    pub overflow: f64,
    pub underflow: f64,
    pub entries: f64,
}

impl Histogram2D {
    // Create a new 2D Histogram with specified ranges and number of bins for each axis
    pub fn new(name: &str, bins: (usize, usize), range: ((f64, f64), (f64, f64))) -> Self {
        let bins = (bins.0.max(1), bins.1.max(1));
        Self {
            name: name.to_owned(),
            bins: Bins {
                x: bins.0,
                x_width: (range.0.1 - range.0.0) / bins.0 as f64,
                y: bins.1,
                y_width: (range.1.1 - range.1.0) / bins.1 as f64,
                counts: FnvHashMap::default(),
            },
            range: Range {
                x: Value {
                    min: range.0.0,
                    max: range.0.1,
                },
                y: Value {
                    min: range.1.0,
                    max: range.1.1,
                },
            },
            overflow: 0.0,
            underflow: 0.0,
            entries: 0.0,
        }
    }

    pub fn reset(&mut self) {
        self.bins.counts.clear();
        self.overflow = 0.0;
        self.underflow = 0.0;
        self.entries = 0.0;
    }

    pub fn fill(&mut self, x_value: f64, y_value: f64) {
        self.fill_weighted(x_value, y_value, 1.0);
    }

    pub fn fill_weighted(&mut self, x_value: f64, y_value: f64, weight: f64) {
        self.entries += 1.0;
        if x_value < self.range.x.min || y_value < self.range.y.min {
            self.underflow += weight;
        } else if x_value >= self.range.x.max || y_value >= self.range.y.max {
            self.overflow += weight;
        } else {
            let x_index = ((x_value - self.range.x.min) / self.bins.x_width) as usize;
            let y_index = ((y_value - self.range.y.min) / self.bins.y_width) as usize;
            if x_index < self.bins.x && y_index < self.bins.y {
                *self.bins.counts.entry((x_index, y_index)).or_insert(0.0) += weight;
            }
        }
    }

    /// Sets one bin directly. Counts towards the entries like a weighted fill.
    pub fn set_bin_content(&mut self, x_index: usize, y_index: usize, content: f64) {
        if x_index >= self.bins.x || y_index >= self.bins.y {
            return;
        }
        let previous = self
            .bins
            .counts
            .insert((x_index, y_index), content)
            .unwrap_or(0.0);
        self.entries += content - previous;
    }

    pub fn bin_content(&self, x_index: usize, y_index: usize) -> f64 {
        self.bins
            .counts
            .get(&(x_index, y_index))
            .copied()
            .unwrap_or(0.0)
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0.0
    }

    // get the bin index for a given x value
    pub fn get_bin_index_x(&self, x: f64) -> Option<usize> {
        if x < self.range.x.min || x > self.range.x.max {
            return None;
        }

        let bin_index: usize = ((x - self.range.x.min) / self.bins.x_width).floor() as usize;

        Some(bin_index.min(self.bins.x - 1))
    }

    // get the bin index for a given y value
    pub fn get_bin_index_y(&self, y: f64) -> Option<usize> {
        if y < self.range.y.min || y > self.range.y.max {
            return None;
        }

        let bin_index: usize = ((y - self.range.y.min) / self.bins.y_width).floor() as usize;

        Some(bin_index.min(self.bins.y - 1))
    }

    pub fn find_bin_x(&self, x: f64) -> usize {
        if x < self.range.x.min {
            0
        } else {
            self.get_bin_index_x(x).unwrap_or(self.bins.x - 1)
        }
    }

    pub fn find_bin_y(&self, y: f64) -> usize {
        if y < self.range.y.min {
            0
        } else {
            self.get_bin_index_y(y).unwrap_or(self.bins.y - 1)
        }
    }

    pub fn same_binning(&self, other: &Histogram2D) -> bool {
        self.bins.x == other.bins.x && self.bins.y == other.bins.y && self.range == other.range
    }

    pub fn add(&mut self, other: &Histogram2D) -> bool {
        if !self.same_binning(other) {
            log::error!(
                "Cannot add histogram '{}' to '{}': binning differs",
                other.name,
                self.name
            );
            return false;
        }
        for (&key, &count) in &other.bins.counts {
            *self.bins.counts.entry(key).or_insert(0.0) += count;
        }
        self.overflow += other.overflow;
        self.underflow += other.underflow;
        self.entries += other.entries;
        true
    }
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Bins {
    pub x: usize,
    pub x_width: f64,
    pub y: usize,
    pub y_width: f64,
    #[serde(with = "sparse_counts")]
    pub counts: FnvHashMap<(usize, usize), f64>, // only filled bins are stored
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Value {
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Range {
    pub x: Value,
    pub y: Value,
}

// JSON maps need string keys, so the sparse bins travel as (x, y, count) triples
mod sparse_counts {
    use fnv::FnvHashMap;
    use serde::{Deserialize as _, Deserializer, Serialize as _, Serializer};

    pub fn serialize<S: Serializer>(
        counts: &FnvHashMap<(usize, usize), f64>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let mut entries: Vec<(usize, usize, f64)> =
            counts.iter().map(|(&(x, y), &c)| (x, y, c)).collect();
        entries.sort_by_key(|&(x, y, _)| (x, y));
        entries.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<FnvHashMap<(usize, usize), f64>, D::Error> {
        let entries = Vec::<(usize, usize, f64)>::deserialize(deserializer)?;
        Ok(entries.into_iter().map(|(x, y, c)| ((x, y), c)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_and_lookup() {
        let mut hist = Histogram2D::new("h", (4, 2), ((0.0, 4.0), (0.0, 2.0)));
        hist.fill(1.5, 0.5);
        hist.fill(1.5, 0.5);
        hist.fill(5.0, 0.5);
        assert_eq!(hist.bin_content(1, 0), 2.0);
        assert_eq!(hist.overflow, 1.0);
        assert_eq!(hist.entries, 3.0);
        assert_eq!(hist.find_bin_x(4.0), 3);
    }

    #[test]
    fn test_json_round_trip_keeps_sparse_bins() {
        let mut hist = Histogram2D::new("h", (3, 3), ((0.0, 3.0), (0.0, 3.0)));
        hist.set_bin_content(2, 1, 7.0);
        let json = serde_json::to_string(&hist).unwrap();
        let back: Histogram2D = serde_json::from_str(&json).unwrap();
        assert_eq!(back, hist);
    }
}
