use super::histogram1d::Histogram;

impl Histogram {
    // Merge groups of `factor` neighbouring bins; leftover bins at the top go to the overflow
    pub fn rebin(&mut self, factor: usize) {
        if factor <= 1 || factor > self.bins.len() {
            return;
        }

        let new_bin_count = self.bins.len() / factor;
        let mut new_bins = vec![0.0; new_bin_count];

        for (i, &count) in self.bins.iter().enumerate() {
            let new_index = i / factor;
            if new_index < new_bin_count {
                new_bins[new_index] += count;
            } else {
                self.overflow += count;
            }
        }

        self.bin_width *= factor as f64;
        self.range.1 = self.range.0 + self.bin_width * new_bin_count as f64;
        self.bins = new_bins;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rebin_with_leftover() {
        let mut hist = Histogram::from_counts("h", (0.0, 5.0), vec![1.0, 2.0, 3.0, 4.0, 5.0]);
        hist.rebin(2);
        assert_eq!(hist.bins, vec![3.0, 7.0]);
        assert_eq!(hist.overflow, 5.0);
        assert!((hist.bin_width - 2.0).abs() < 1e-12);
        assert!((hist.range.1 - 4.0).abs() < 1e-12);
    }
}
