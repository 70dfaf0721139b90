use std::str::FromStr;

use super::scaler_reads::BadScalerReads;
use crate::histoer::histo1d::histogram1d::Histogram;

/// Fraction of the mean below which a read counts as empty.
const LOW_FRACTION: f64 = 0.01;
/// Largest tolerated deviation from the mean, as a fraction of it.
const MAX_DEVIATION: f64 = 0.1;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CalibMethod {
    /// Bad reads are only set by hand.
    #[default]
    Manual,
    Default,
}

impl FromStr for CalibMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "default" => Ok(Self::Default),
            "" | "none" | "manual" => Ok(Self::Manual),
            other => Err(format!("unknown calibration method '{other}'")),
        }
    }
}

impl CalibMethod {
    pub fn apply(&self, reads: &mut BadScalerReads, projection: &Histogram) {
        match self {
            Self::Manual => {}
            Self::Default => reject_outliers(reads, projection),
        }
    }
}

/// Marks empty reads, reads below 1% of the mean and then, one at a time, the read
/// deviating most from the mean until every remaining read is within 10% of it.
/// Ties go to the lowest index.
pub fn reject_outliers(reads: &mut BadScalerReads, projection: &Histogram) {
    let count = |read: usize| projection.bins.get(read).copied().unwrap_or(0.0);

    let mut sum = 0.0;
    for read in 0..reads.n_reads {
        if reads.is_bad(read) {
            continue;
        }
        if count(read) == 0.0 {
            reads.toggle(read);
            continue;
        }
        sum += count(read);
    }

    let mut n_good = reads.n_good();
    if n_good == 0 {
        return;
    }
    let mut mean = sum / n_good as f64;

    // drops one read from the running mean
    let remove = |mean: f64, n_good: usize, value: f64| {
        if n_good > 1 {
            (mean * n_good as f64 - value) / (n_good - 1) as f64
        } else {
            0.0
        }
    };

    for read in 0..reads.n_reads {
        if reads.is_bad(read) || count(read) >= mean * LOW_FRACTION {
            continue;
        }
        reads.toggle(read);
        mean = remove(mean, n_good, count(read));
        n_good -= 1;
    }

    while n_good > 0 {
        let mut worst = None;
        let mut max_diff = 0.0;
        for read in (0..reads.n_reads).filter(|&r| !reads.is_bad(r)) {
            let diff = (mean - count(read)).abs();
            if diff > max_diff {
                worst = Some(read);
                max_diff = diff;
            }
        }

        let Some(read) = worst else {
            break;
        };
        if max_diff < mean * MAX_DEVIATION {
            break;
        }
        reads.toggle(read);
        mean = remove(mean, n_good, count(read));
        n_good -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::badscr::scaler_reads::Overview;

    fn run(counts: &[f64], bad: &[usize]) -> (BadScalerReads, Histogram) {
        let projection = Histogram::from_counts("proj", (0.0, counts.len() as f64), counts.to_vec());
        let mut reads = BadScalerReads::new(1, counts.len(), bad);
        reject_outliers(&mut reads, &projection);
        (reads, projection)
    }

    #[test]
    fn test_single_low_read_is_rejected() {
        let (reads, projection) = run(&[10.0, 10.0, 10.0, 1.0, 10.0, 10.0], &[]);
        assert_eq!(reads.indices(), vec![3]);
        let overview = Overview::compute(&reads, Some(&projection), None);
        assert!((overview.raw - 10.0).abs() < 1e-12);
    }

    #[test]
    fn test_empty_and_tiny_reads() {
        let (reads, _) = run(&[0.0, 1000.0, 1000.0, 5.0, 1000.0], &[]);
        assert_eq!(reads.indices(), vec![0, 3]);
    }

    #[test]
    fn test_ties_resolve_to_lowest_index() {
        // 8 and 12 deviate equally from the mean of 10
        let (reads, _) = run(&[8.0, 12.0, 10.0, 10.0], &[]);
        assert_eq!(reads.indices()[0], 0);

        let again = run(&[8.0, 12.0, 10.0, 10.0], &[]).0;
        assert_eq!(again, reads);
    }

    #[test]
    fn test_existing_bad_reads_are_kept_out() {
        let (reads, _) = run(&[500.0, 10.0, 10.0, 10.0], &[0]);
        assert_eq!(reads.indices(), vec![0]);
        assert!("default".parse::<CalibMethod>().is_ok());
        assert!("fancy".parse::<CalibMethod>().is_err());
    }

    #[test]
    fn test_all_empty_reads() {
        let (reads, _) = run(&[0.0, 0.0], &[]);
        assert_eq!(reads.n_good(), 0);
    }
}
