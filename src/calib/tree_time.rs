//! Time offsets of a whole detector from coincident hit pairs.
//!
//! Every pair of hits should arrive at the same time once calibrated, so the
//! offsets minimise `sum |t1 - t2| + |t2 - t1|` with `t = gain * (raw - offset)`.

use std::path::{Path, PathBuf};

use crate::error::CalibError;
use crate::histoer::histo2d::histogram2d::Histogram2D;

/// Two hits of one event.
#[derive(Debug, Clone, Copy, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct CoincidencePair {
    pub elem_1: usize,
    pub elem_2: usize,
    pub raw_1: f64,
    pub raw_2: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MinimizerSettings {
    pub max_iterations: usize,
    /// Relative cost decrease below which a sweep counts as converged.
    pub tolerance: f64,
}

impl Default for MinimizerSettings {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            tolerance: 1e-9,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TreeTimeContext {
    pub gains: Vec<f64>,
    pub pairs: Vec<CoincidencePair>,
}

impl TreeTimeContext {
    /// Drops pairs touching an unknown element or one for which `skip` holds.
    pub fn new(
        gains: Vec<f64>,
        pairs: impl IntoIterator<Item = CoincidencePair>,
        skip: impl Fn(usize) -> bool,
    ) -> Self {
        let n = gains.len();
        let pairs: Vec<CoincidencePair> = pairs
            .into_iter()
            .filter(|p| p.elem_1 < n && p.elem_2 < n && !skip(p.elem_1) && !skip(p.elem_2))
            .collect();
        log::info!("{} coincidence pair(s) over {n} element(s)", pairs.len());
        Self { gains, pairs }
    }

    pub fn n_elements(&self) -> usize {
        self.gains.len()
    }

    pub fn time(&self, elem: usize, raw: f64, offsets: &[f64]) -> f64 {
        self.gains[elem] * (raw - offsets[elem])
    }

    pub fn cost(&self, offsets: &[f64]) -> f64 {
        self.pairs
            .iter()
            .map(|p| {
                let t1 = self.time(p.elem_1, p.raw_1, offsets);
                let t2 = self.time(p.elem_2, p.raw_2, offsets);
                (t1 - t2).abs() + (t2 - t1).abs()
            })
            .sum()
    }

    /// Cyclic coordinate descent. With the other offsets fixed, the cost of one
    /// offset is a sum of absolute values and is minimised by their median.
    pub fn minimize(&self, initial: &[f64], settings: &MinimizerSettings) -> Vec<f64> {
        let mut offsets = initial.to_vec();
        offsets.resize(self.n_elements(), 0.0);

        let mut by_element: Vec<Vec<usize>> = vec![Vec::new(); self.n_elements()];
        for (i, p) in self.pairs.iter().enumerate() {
            if p.elem_1 != p.elem_2 {
                by_element[p.elem_1].push(i);
                by_element[p.elem_2].push(i);
            }
        }

        let mut cost = self.cost(&offsets);
        log::info!("Initial cost: {cost:.6}");
        for iteration in 0..settings.max_iterations {
            for (elem, pair_indices) in by_element.iter().enumerate() {
                let gain = self.gains[elem];
                if gain == 0.0 || pair_indices.is_empty() {
                    continue;
                }
                // the offset that puts this hit on top of its partner
                let mut targets: Vec<f64> = pair_indices
                    .iter()
                    .map(|&i| {
                        let p = &self.pairs[i];
                        let (raw, other) = if p.elem_1 == elem {
                            (p.raw_1, self.time(p.elem_2, p.raw_2, &offsets))
                        } else {
                            (p.raw_2, self.time(p.elem_1, p.raw_1, &offsets))
                        };
                        raw - other / gain
                    })
                    .collect();
                if let Some(median) = median(&mut targets) {
                    offsets[elem] = median;
                }
            }

            let new_cost = self.cost(&offsets);
            log::debug!("Sweep {}: cost {new_cost:.6}", iteration + 1);
            let converged = cost - new_cost <= settings.tolerance * cost.abs().max(f64::MIN_POSITIVE);
            cost = new_cost;
            if converged {
                break;
            }
        }
        log::info!("Final cost: {cost:.6}");
        offsets
    }

    /// Time differences per element, `(t1 - t2, elem_1)` and `(t2 - t1, elem_2)`.
    pub fn difference_histogram(&self, name: &str, offsets: &[f64]) -> Histogram2D {
        let n = self.n_elements();
        let mut histogram = Histogram2D::new(name, (2000, n.max(1)), ((-100.0, 100.0), (0.0, n.max(1) as f64)));
        for p in &self.pairs {
            let t1 = self.time(p.elem_1, p.raw_1, offsets);
            let t2 = self.time(p.elem_2, p.raw_2, offsets);
            histogram.fill(t1 - t2, p.elem_1 as f64);
            histogram.fill(t2 - t1, p.elem_2 as f64);
        }
        histogram
    }
}

/// Lower median, `None` for no values.
fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    Some(values[(values.len() - 1) / 2])
}

/// Writes `tree_calib_<run>.dat`, one offset per line.
pub fn write_offsets(run: u32, offsets: &[f64], output_dir: &Path) -> Result<PathBuf, CalibError> {
    let text: String = offsets.iter().map(|o| format!("{o:.6}\n")).collect();
    let path = output_dir.join(format!("tree_calib_{run}.dat"));
    std::fs::write(&path, text)?;
    log::info!("Offsets written to '{}'", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Hits of a common event time seen through known offsets and gains,
    /// mostly paired with element 0 and sometimes with a neighbour.
    fn pairs(offsets: &[f64], gains: &[f64]) -> Vec<CoincidencePair> {
        let n = offsets.len();
        let mut pairs = Vec::new();
        for event in 0..300 {
            let t = (event % 17) as f64 - 8.0;
            let (elem_1, elem_2) = if event % 8 == 7 {
                let k = 1 + (event / 8) % (n - 1);
                (k, 1 + k % (n - 1))
            } else {
                (0, 1 + event % (n - 1))
            };
            if elem_1 == elem_2 {
                continue;
            }
            pairs.push(CoincidencePair {
                elem_1,
                elem_2,
                raw_1: t / gains[elem_1] + offsets[elem_1],
                raw_2: t / gains[elem_2] + offsets[elem_2],
            });
        }
        pairs
    }

    #[test]
    fn test_minimizer_aligns_elements() {
        let truth = [0.0, 12.0, -4.0, 30.0, 7.5];
        let gains = [1.0, 0.9, 1.1, 1.0, 1.2];
        let context = TreeTimeContext::new(gains.to_vec(), pairs(&truth, &gains), |_| false);
        assert!(context.cost(&[0.0; 5]) > 1.0);

        let offsets = context.minimize(&[0.0; 5], &MinimizerSettings::default());
        assert!(context.cost(&offsets) < 1e-6);
        // calibrated times agree up to one common shift
        let shift = gains[0] * (truth[0] - offsets[0]);
        for k in 1..5 {
            assert!((gains[k] * (truth[k] - offsets[k]) - shift).abs() < 1e-6);
        }
    }

    #[test]
    fn test_skipped_and_dead_elements() {
        let truth = [0.0, 5.0, 9.0];
        let gains = [0.5, 0.5, 0.5];
        let context = TreeTimeContext::new(gains.to_vec(), pairs(&truth, &gains), |e| e == 2);
        assert!(context.pairs.iter().all(|p| p.elem_1 != 2 && p.elem_2 != 2));

        let mut dead = context.clone();
        dead.gains[1] = 0.0;
        let offsets = dead.minimize(&[0.0, 1.0, 2.0], &MinimizerSettings::default());
        assert_eq!(offsets[1], 1.0);
    }

    #[test]
    fn test_difference_histogram_and_dump() {
        let context = TreeTimeContext::new(
            vec![1.0, 1.0],
            [CoincidencePair {
                elem_1: 0,
                elem_2: 1,
                raw_1: 3.0,
                raw_2: 1.0,
            }],
            |_| false,
        );
        let h = context.difference_histogram("after", &[0.0, 0.0]);
        assert_eq!(h.entries, 2.0);
        assert_eq!(h.bin_content(h.find_bin_x(2.0), 0), 1.0);
        assert_eq!(h.bin_content(h.find_bin_x(-2.0), 1), 1.0);

        let dir = tempfile::tempdir().unwrap();
        let path = write_offsets(1234, &[1.0, -0.5], dir.path()).unwrap();
        assert!(path.ends_with("tree_calib_1234.dat"));
        assert_eq!(std::fs::read_to_string(path).unwrap(), "1.000000\n-0.500000\n");
    }
}
