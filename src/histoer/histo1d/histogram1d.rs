use crate::fitter::common::Data;

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Histogram {
    pub name: String,
    pub bins: Vec<f64>,
    pub range: (f64, f64),
    pub overflow: f64,
    pub underflow: f64,
    pub bin_width: f64,
    pub entries: f64,
}

impl Histogram {
    // Create a new Histogram with specified min, max, and number of bins
    pub fn new(name: &str, number_of_bins: usize, range: (f64, f64)) -> Self {
        let number_of_bins = number_of_bins.max(1);
        Histogram {
            name: name.to_owned(),
            bins: vec![0.0; number_of_bins],
            range,
            overflow: 0.0,
            underflow: 0.0,
            bin_width: (range.1 - range.0) / number_of_bins as f64,
            entries: 0.0,
        }
    }

    /// Builds a histogram from already accumulated contents. The entry count is the sum of the contents.
    pub fn from_counts(name: &str, range: (f64, f64), counts: Vec<f64>) -> Self {
        let mut histogram = Self::new(name, counts.len(), range);
        histogram.set_counts(counts);
        histogram
    }

    pub fn reset(&mut self) {
        self.bins = vec![0.0; self.bins.len()];
        self.overflow = 0.0;
        self.underflow = 0.0;
        self.entries = 0.0;
    }

    // Add a value to the histogram
    pub fn fill(&mut self, value: f64) {
        self.fill_weighted(value, 1.0);
    }

    pub fn fill_weighted(&mut self, value: f64, weight: f64) {
        if value >= self.range.0 && value < self.range.1 {
            let index = ((value - self.range.0) / self.bin_width) as usize;
            if index < self.bins.len() {
                self.bins[index] += weight;
            }
        } else if value >= self.range.1 {
            self.overflow += weight;
        } else {
            self.underflow += weight;
        }
        self.entries += 1.0;
    }

    pub fn set_counts(&mut self, counts: Vec<f64>) {
        self.entries = counts.iter().sum();
        if counts.len() != self.bins.len() && !counts.is_empty() {
            self.bin_width = (self.range.1 - self.range.0) / counts.len() as f64;
        }
        self.bins = counts;
    }

    /// An element with no entries is skipped by every fit.
    pub fn is_empty(&self) -> bool {
        self.entries == 0.0
    }

    pub fn bin_center(&self, bin: usize) -> f64 {
        self.range.0 + (bin as f64 + 0.5) * self.bin_width
    }

    pub fn axis_midpoint(&self) -> f64 {
        0.5 * (self.range.0 + self.range.1)
    }

    pub fn contains(&self, x: f64) -> bool {
        x >= self.range.0 && x <= self.range.1
    }

    // First bin holding the largest content
    pub fn maximum_bin(&self) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;
        for (index, &count) in self.bins.iter().enumerate() {
            match best {
                Some((_, max)) if count <= max => {}
                _ => best = Some((index, count)),
            }
        }
        best.map(|(index, _)| index)
    }

    pub fn maximum(&self) -> f64 {
        self.maximum_bin().map(|bin| self.bins[bin]).unwrap_or(0.0)
    }

    /// Non-empty bins whose centers lie inside `[low, high]`, ready for a least-squares fit.
    pub fn fit_data(&self, low: f64, high: f64) -> Data {
        let (x, y): (Vec<f64>, Vec<f64>) = self
            .bins
            .iter()
            .enumerate()
            .map(|(bin, &count)| (self.bin_center(bin), count))
            .filter(|&(center, count)| center >= low && center <= high && count != 0.0)
            .unzip();
        Data { x, y }
    }

    pub fn add(&mut self, other: &Histogram) -> bool {
        if other.bins.len() != self.bins.len() || other.range != self.range {
            log::error!(
                "Cannot add histogram '{}' to '{}': binning differs",
                other.name,
                self.name
            );
            return false;
        }
        for (bin, count) in self.bins.iter_mut().zip(&other.bins) {
            *bin += count;
        }
        self.overflow += other.overflow;
        self.underflow += other.underflow;
        self.entries += other.entries;
        true
    }
}
