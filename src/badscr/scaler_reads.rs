use std::collections::BTreeSet;

use crate::histoer::histo1d::histogram1d::Histogram;
use crate::histoer::histo2d::histogram2d::Histogram2D;

/// The bad scaler reads of one run. Bin `i` of a projection holds read `i`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BadScalerReads {
    pub run: u32,
    pub n_reads: usize,
    bad: BTreeSet<usize>,
}

impl BadScalerReads {
    /// Stored indices are kept as given, also those at or past `n_reads`. They are
    /// written back unchanged but never counted.
    pub fn new(run: u32, n_reads: usize, bad: &[usize]) -> Self {
        Self {
            run,
            n_reads,
            bad: bad.iter().copied().collect(),
        }
    }

    pub fn is_bad(&self, read: usize) -> bool {
        self.bad.contains(&read)
    }

    /// Bad reads inside `[0, n_reads)`.
    pub fn n_bad(&self) -> usize {
        self.bad.range(..self.n_reads).count()
    }

    pub fn n_good(&self) -> usize {
        self.n_reads - self.n_bad()
    }

    /// Whether some stored index lies past the known number of reads.
    pub fn has_stale(&self) -> bool {
        self.bad.range(self.n_reads..).next().is_some()
    }

    pub fn indices(&self) -> Vec<usize> {
        self.bad.iter().copied().collect()
    }

    pub fn clear(&mut self) {
        self.bad.clear();
    }

    /// Flips read `read` between good and bad. Reads out of range are ignored.
    pub fn toggle(&mut self, read: usize) {
        if read >= self.n_reads {
            return;
        }
        if !self.bad.remove(&read) {
            self.bad.insert(read);
        }
    }

    /// Flips every read of the inclusive range, given in either order.
    pub fn toggle_range(&mut self, first: usize, last: usize) {
        let (low, high) = if first <= last {
            (first, last)
        } else {
            (last, first)
        };
        for read in low..=high.min(self.n_reads.saturating_sub(1)) {
            self.toggle(read);
        }
    }

    pub fn describe(&self) -> String {
        let mut text = format!(
            "Run number: {} Number of bad scaler reads: {}",
            self.run,
            self.bad.len()
        );
        if !self.bad.is_empty() {
            let list: Vec<String> = self.bad.iter().map(usize::to_string).collect();
            text.push_str(&format!("\n     Bad scaler reads: {}", list.join(", ")));
        }
        text
    }
}

/// Mean counts per good read of one run.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Overview {
    pub raw: f64,
    pub normalised: f64,
}

fn good_mean(reads: &BadScalerReads, projection: Option<&Histogram>) -> f64 {
    let (Some(projection), n_good) = (projection, reads.n_good()) else {
        return 0.0;
    };
    if n_good == 0 {
        return 0.0;
    }
    // read 0 counts too, so the mean matches n_good
    let sum: f64 = (0..reads.n_reads)
        .filter(|&i| !reads.is_bad(i))
        .filter_map(|i| projection.bins.get(i))
        .sum();
    sum / n_good as f64
}

impl Overview {
    pub fn compute(
        reads: &BadScalerReads,
        raw: Option<&Histogram>,
        normalised: Option<&Histogram>,
    ) -> Self {
        Self {
            raw: good_mean(reads, raw),
            normalised: good_mean(reads, normalised),
        }
    }
}

/// Scaler channels used to normalise a projection. Missing channels count as 1.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScalerChannels {
    pub p2: Option<usize>,
    pub free: Option<usize>,
    pub live: Option<usize>,
}

impl ScalerChannels {
    pub fn is_empty(&self) -> bool {
        self.p2.is_none() && (self.free.is_none() || self.live.is_none())
    }
}

/// `count / (p2 * live / free)` per read, read from the scaler histogram
/// (x = scaler read, y = scaler channel). A read with `free == 0` gets a livetime
/// of 0, and a read whose divisor is not positive is set to 0.
pub fn normalise(raw: &Histogram, scalers: &Histogram2D, channels: ScalerChannels) -> Histogram {
    let channel = |ch: usize| scalers.row(ch);
    let p2 = channels.p2.map(channel);
    let livetime = match (channels.live, channels.free) {
        (Some(live), Some(free)) => Some((channel(live), channel(free))),
        _ => None,
    };

    let counts = raw
        .bins
        .iter()
        .enumerate()
        .map(|(read, &count)| {
            let p2 = p2
                .as_ref()
                .map_or(1.0, |h| h.bins.get(read).copied().unwrap_or(0.0));
            let lt = livetime.as_ref().map_or(1.0, |(live, free)| {
                let free = free.bins.get(read).copied().unwrap_or(0.0);
                if free > 0.0 {
                    live.bins.get(read).copied().unwrap_or(0.0) / free
                } else {
                    0.0
                }
            });
            let norm = p2 * lt;
            if norm > 0.0 { count / norm } else { 0.0 }
        })
        .collect();

    Histogram::from_counts(&format!("{}_norm", raw.name), raw.range, counts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn projection(counts: &[f64]) -> Histogram {
        Histogram::from_counts("proj", (0.0, counts.len() as f64), counts.to_vec())
    }

    #[test]
    fn test_toggle_twice_restores_set_and_overview() {
        let raw = projection(&[10.0, 12.0, 8.0, 10.0]);
        let mut reads = BadScalerReads::new(50, 4, &[2, 9]);
        assert_eq!(reads.indices(), vec![2, 9]);
        assert_eq!(reads.n_bad(), 1);
        assert!(reads.has_stale());
        let before = Overview::compute(&reads, Some(&raw), None);

        reads.toggle(1);
        assert!(reads.is_bad(1));
        assert!((Overview::compute(&reads, Some(&raw), None).raw - 10.0).abs() < 1e-12);
        reads.toggle(1);
        reads.toggle(9);

        assert_eq!(reads.indices(), vec![2, 9]);
        assert_eq!(Overview::compute(&reads, Some(&raw), None), before);
        assert!((before.raw - 32.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_unknown_read_count_keeps_stored_reads() {
        let mut reads = BadScalerReads::new(7, 0, &[5, 2]);
        reads.toggle(2);
        reads.toggle_range(0, 4);
        assert_eq!(reads.indices(), vec![2, 5]);
        assert_eq!(reads.n_bad(), 0);
        assert_eq!(reads.n_good(), 0);
        assert!(reads.describe().ends_with("Bad scaler reads: 2, 5"));
    }

    #[test]
    fn test_toggle_range_either_order() {
        let mut reads = BadScalerReads::new(1, 6, &[3]);
        reads.toggle_range(4, 2);
        assert_eq!(reads.indices(), vec![2, 4]);
        reads.toggle_range(5, 10);
        assert_eq!(reads.indices(), vec![2, 4, 5]);
        reads.toggle(6);
        assert_eq!(reads.n_good(), 3);
    }

    #[test]
    fn test_overview_without_good_reads_is_zero() {
        let reads = BadScalerReads::new(1, 2, &[0, 1]);
        let overview = Overview::compute(&reads, Some(&projection(&[1.0, 2.0])), None);
        assert_eq!(overview, Overview::default());
    }

    #[test]
    fn test_normalise_guards_zero_divisors() {
        let raw = projection(&[100.0, 100.0, 100.0]);
        let mut scalers = Histogram2D::new("scalers", (3, 4), ((0.0, 3.0), (0.0, 4.0)));
        for read in 0..3 {
            scalers.set_bin_content(read, 0, 2.0); // p2
            scalers.set_bin_content(read, 2, 5.0); // live
        }
        scalers.set_bin_content(0, 1, 10.0); // free
        scalers.set_bin_content(1, 1, 5.0);

        let channels = ScalerChannels {
            p2: Some(0),
            free: Some(1),
            live: Some(2),
        };
        let norm = normalise(&raw, &scalers, channels);
        assert!((norm.bins[0] - 100.0).abs() < 1e-12);
        assert!((norm.bins[1] - 50.0).abs() < 1e-12);
        assert_eq!(norm.bins[2], 0.0);

        let p2_only = normalise(&raw, &scalers, ScalerChannels { p2: Some(0), ..Default::default() });
        assert!((p2_only.bins[2] - 50.0).abs() < 1e-12);
    }
}
