use crate::histoer::histo1d::histogram1d::Histogram;

use super::histogram2d::Histogram2D;

impl Histogram2D {
    /// Sums the x bins `first..=last` of every y row into a histogram over the y axis.
    pub fn projection_y_bins(&self, name: &str, first: usize, last: usize) -> Histogram {
        let mut y_bins = vec![0.0; self.bins.y];

        for (&(x_index, y_index), &count) in &self.bins.counts {
            if x_index >= first && x_index <= last && y_index < y_bins.len() {
                y_bins[y_index] += count;
            }
        }

        Histogram::from_counts(name, (self.range.y.min, self.range.y.max), y_bins)
    }

    /// Sums the y bins `first..=last` of every x column into a histogram over the x axis.
    pub fn projection_x_bins(&self, name: &str, first: usize, last: usize) -> Histogram {
        let mut x_bins = vec![0.0; self.bins.x];

        for (&(x_index, y_index), &count) in &self.bins.counts {
            if y_index >= first && y_index <= last && x_index < x_bins.len() {
                x_bins[x_index] += count;
            }
        }

        Histogram::from_counts(name, (self.range.x.min, self.range.x.max), x_bins)
    }

    // The bins holding x_min and x_max are both included
    pub fn y_projection(&self, x_min: f64, x_max: f64) -> Histogram {
        let (first, last) = (self.find_bin_x(x_min), self.find_bin_x(x_max));
        self.projection_y_bins(&format!("{}_py", self.name), first, last)
    }

    pub fn x_projection(&self, y_min: f64, y_max: f64) -> Histogram {
        let (first, last) = (self.find_bin_y(y_min), self.find_bin_y(y_max));
        self.projection_x_bins(&format!("{}_px", self.name), first, last)
    }

    pub fn x_projection_all(&self) -> Histogram {
        self.projection_x_bins(&format!("{}_px", self.name), 0, self.bins.y - 1)
    }

    /// The x spectrum of a single y row, e.g. one detector element.
    pub fn row(&self, y_index: usize) -> Histogram {
        self.projection_x_bins(&format!("{}_row_{y_index}", self.name), y_index, y_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Histogram2D {
        let mut hist = Histogram2D::new("h", (4, 3), ((0.0, 4.0), (0.0, 3.0)));
        hist.set_bin_content(0, 0, 1.0);
        hist.set_bin_content(1, 0, 2.0);
        hist.set_bin_content(1, 2, 4.0);
        hist.set_bin_content(3, 1, 8.0);
        hist
    }

    #[test]
    fn test_y_projection_inclusive_window() {
        let proj = sample().y_projection(1.2, 3.5);
        assert_eq!(proj.bins, vec![2.0, 8.0, 4.0]);
        assert_eq!(proj.entries, 14.0);
    }

    #[test]
    fn test_row_projection() {
        let hist = sample();
        assert_eq!(hist.row(0).bins, vec![1.0, 2.0, 0.0, 0.0]);
        assert!(hist.row(5).is_empty());
        assert_eq!(hist.x_projection_all().bins, vec![1.0, 6.0, 0.0, 8.0]);
    }
}
