use find_peaks::PeakFinder;

use super::histo1d::histogram1d::Histogram;

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PeakFindingSettings {
    /// Expected peak width in bins. Drives the smoothing kernel, the background window and the minimum peak spacing.
    pub sigma: f64,
    /// Minimum height relative to the highest remaining peak, in (0, 1).
    pub threshold: f64,
    pub background_subtraction: bool,
}

impl Default for PeakFindingSettings {
    fn default() -> Self {
        PeakFindingSettings {
            sigma: 2.0,
            threshold: 0.05,
            background_subtraction: true,
        }
    }
}

impl PeakFindingSettings {
    pub fn new(sigma: f64, threshold: f64) -> Self {
        Self {
            sigma,
            threshold,
            ..Default::default()
        }
    }

    pub fn search(&self, histogram: &Histogram) -> Peaks {
        if histogram.is_empty() {
            return Peaks::default();
        }

        let mut y = histogram.bins.clone();
        if self.background_subtraction {
            let background = snip_background(&y, self.background_window());
            for (value, bg) in y.iter_mut().zip(&background) {
                *value = (*value - bg).max(0.0);
            }
        }
        let y = gaussian_smooth(&y, self.sigma);

        let max = y.iter().copied().fold(0.0_f64, f64::max);
        if max <= 0.0 {
            return Peaks::default();
        }

        let mut peak_finder = PeakFinder::new(&y);
        peak_finder.with_min_height(self.threshold * max);
        peak_finder.with_min_distance((self.sigma.round() as usize).max(1));

        let positions = peak_finder
            .find_peaks()
            .iter()
            .map(|peak| histogram.bin_center(peak.middle_position()))
            .collect::<Vec<f64>>();

        log::debug!(
            "Found {} peak(s) in '{}': {:?}",
            positions.len(),
            histogram.name,
            positions
        );

        Peaks(positions)
    }

    fn background_window(&self) -> usize {
        ((3.0 * self.sigma).ceil() as usize).max(1)
    }
}

/// Peak x positions, in the order the search reported them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Peaks(pub Vec<f64>);

impl Peaks {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn highest_x(&self) -> Option<f64> {
        self.0.iter().copied().reduce(f64::max)
    }

    pub fn lowest_x(&self) -> Option<f64> {
        self.0.iter().copied().reduce(f64::min)
    }

    pub fn closest_to(&self, expected: f64) -> Option<f64> {
        let mut best: Option<f64> = None;
        for &x in &self.0 {
            match best {
                Some(b) if (b - expected).abs() <= (x - expected).abs() => {}
                _ => best = Some(x),
            }
        }
        best
    }
}

// SNIP clipping with an increasing window, iterations = 1..=window
fn snip_background(y: &[f64], window: usize) -> Vec<f64> {
    let n = y.len();
    let mut background = y.to_vec();
    let mut working = background.clone();
    for p in 1..=window {
        if 2 * p >= n {
            break;
        }
        for i in p..n - p {
            let mean = 0.5 * (background[i - p] + background[i + p]);
            working[i] = background[i].min(mean);
        }
        background[p..n - p].copy_from_slice(&working[p..n - p]);
    }
    background
}

fn gaussian_smooth(y: &[f64], sigma: f64) -> Vec<f64> {
    if sigma <= 0.0 {
        return y.to_vec();
    }
    let half = (3.0 * sigma).ceil() as usize;
    let kernel: Vec<f64> = (0..=2 * half)
        .map(|k| {
            let d = k as f64 - half as f64;
            (-0.5 * (d / sigma).powi(2)).exp()
        })
        .collect();

    (0..y.len())
        .map(|i| {
            let mut sum = 0.0;
            let mut norm = 0.0;
            for (k, w) in kernel.iter().enumerate() {
                let j = i as isize + k as isize - half as isize;
                if j >= 0 && (j as usize) < y.len() {
                    sum += w * y[j as usize];
                    norm += w;
                }
            }
            if norm > 0.0 { sum / norm } else { 0.0 }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_peaks() -> Histogram {
        let counts = (0..200)
            .map(|i| {
                let x = i as f64 + 0.5;
                5.0 + 100.0 * (-0.5 * ((x - 50.5) / 4.0).powi(2)).exp()
                    + 60.0 * (-0.5 * ((x - 140.5) / 4.0).powi(2)).exp()
            })
            .collect();
        Histogram::from_counts("two", (0.0, 200.0), counts)
    }

    #[test]
    fn test_finds_both_peaks() {
        let peaks = PeakFindingSettings::new(4.0, 0.05).search(&two_peaks());
        assert_eq!(peaks.len(), 2);
        assert!((peaks.lowest_x().unwrap() - 50.5).abs() < 2.0);
        assert!((peaks.highest_x().unwrap() - 140.5).abs() < 2.0);
        assert!((peaks.closest_to(130.0).unwrap() - 140.5).abs() < 2.0);
    }

    #[test]
    fn test_empty_histogram_has_no_peaks() {
        let hist = Histogram::new("empty", 50, (0.0, 50.0));
        let peaks = PeakFindingSettings::default().search(&hist);
        assert!(peaks.is_empty());
        assert_eq!(peaks.highest_x(), None);
    }

    #[test]
    fn test_snip_flattens_constant_background() {
        let background = snip_background(&[3.0; 20], 4);
        assert!(background.iter().all(|&b| (b - 3.0).abs() < 1e-12));
    }
}
