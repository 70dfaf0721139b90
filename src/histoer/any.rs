use super::histo1d::histogram1d::Histogram;
use super::histo2d::histogram2d::Histogram2D;
use super::histo3d::Histogram3D;

/// A histogram of any dimension, as stored in a histogram file.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(tag = "kind", content = "histogram")]
pub enum AnyHistogram {
    One(Histogram),
    Two(Histogram2D),
    Three(Histogram3D),
}

impl AnyHistogram {
    pub fn name(&self) -> &str {
        match self {
            Self::One(h) => &h.name,
            Self::Two(h) => &h.name,
            Self::Three(h) => &h.name,
        }
    }

    pub fn entries(&self) -> f64 {
        match self {
            Self::One(h) => h.entries,
            Self::Two(h) => h.entries,
            Self::Three(h) => h.entries,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries() == 0.0
    }

    /// Sums `other` into this histogram. Fails when the dimensions or the binning differ.
    pub fn add(&mut self, other: &AnyHistogram) -> bool {
        match (self, other) {
            (Self::One(a), Self::One(b)) => a.add(b),
            (Self::Two(a), Self::Two(b)) => a.add(b),
            (Self::Three(a), Self::Three(b)) => a.add(b),
            (a, b) => {
                log::error!(
                    "Cannot add histogram '{}' to '{}': dimensions differ",
                    b.name(),
                    a.name()
                );
                false
            }
        }
    }

    pub fn as_1d(&self) -> Option<&Histogram> {
        match self {
            Self::One(h) => Some(h),
            _ => None,
        }
    }

    pub fn as_2d(&self) -> Option<&Histogram2D> {
        match self {
            Self::Two(h) => Some(h),
            _ => None,
        }
    }

    pub fn as_3d(&self) -> Option<&Histogram3D> {
        match self {
            Self::Three(h) => Some(h),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_rejects_mixed_dimensions() {
        let mut one = AnyHistogram::One(Histogram::from_counts("a", (0.0, 2.0), vec![1.0, 1.0]));
        let two = AnyHistogram::Two(Histogram2D::new("b", (2, 2), ((0.0, 2.0), (0.0, 2.0))));
        assert!(!one.add(&two));
        assert!(one.add(&one.clone()));
        assert_eq!(one.entries(), 4.0);
    }
}
