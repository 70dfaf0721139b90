use super::histogram1d::Histogram;

impl Histogram {
    // Bin holding x; the upper edge belongs to the last bin
    pub fn get_bin_index(&self, x: f64) -> Option<usize> {
        if x < self.range.0 || x > self.range.1 {
            return None;
        }

        let bin_index: usize = ((x - self.range.0) / self.bin_width).floor() as usize;

        Some(bin_index.min(self.bins.len() - 1))
    }

    /// Bin holding x, clamped to the first or last bin when x is off the axis.
    pub fn find_bin(&self, x: f64) -> usize {
        if x < self.range.0 {
            0
        } else {
            self.get_bin_index(x).unwrap_or(self.bins.len() - 1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bin_index_edges() {
        let hist = Histogram::new("h", 4, (0.0, 4.0));
        assert_eq!(hist.get_bin_index(0.0), Some(0));
        assert_eq!(hist.get_bin_index(4.0), Some(3));
        assert_eq!(hist.get_bin_index(4.5), None);
        assert_eq!(hist.find_bin(-3.0), 0);
        assert_eq!(hist.find_bin(7.0), 3);
    }
}
