pub mod delta_e;
pub mod droop;
pub mod energy_ratio;
pub mod peak_fit;
pub mod time_walk;

use std::path::{Path, PathBuf};

use delta_e::DeltaETradState;
use droop::{DroopKind, DroopState};
use energy_ratio::EnergyRatioState;
use peak_fit::{PeakFitOutput, PeakFitState};
use time_walk::TimeWalkState;

use super::module::ModuleInfo;
use super::values::{Marker, ValueColumn};
use crate::config::ConfigStore;
use crate::error::CalibError;
use crate::histoer::any::AnyHistogram;
use crate::histoer::histo1d::histogram1d::Histogram;
use crate::store::histograms::{HistogramSource, SetHistograms};

/// What a strategy may read while it initialises.
pub struct InitContext<'a> {
    pub info: &'a ModuleInfo,
    pub config: &'a dyn ConfigStore,
    pub histograms: SetHistograms<'a>,
    /// Monte-Carlo reference histograms, needed by the strategies that compare to simulation.
    pub reference: Option<&'a dyn HistogramSource>,
}

impl InitContext<'_> {
    pub fn key(&self, setting: &str) -> String {
        format!("{}.{setting}", self.info.name)
    }
}

/// Name of the per-element copy of a histogram, e.g. `CaLib_Veto_dE_E_007`.
pub fn element_histogram_name(base: &str, elem: usize) -> String {
    format!("{base}_{elem:03}")
}

/// Pulls the y projection of one element's 2D or 3D histogram over an x window
/// (and a z window for 3D). Missing histograms and wrong dimensions yield `None`.
pub fn element_projection(
    histogram: Option<AnyHistogram>,
    name: &str,
    x_window: (f64, f64),
    z_window: Option<(f64, f64)>,
) -> Option<Histogram> {
    match histogram? {
        AnyHistogram::Two(h) => Some(h.y_projection(x_window.0, x_window.1)),
        AnyHistogram::Three(h) => {
            let z_window = z_window.unwrap_or((h.z.min, h.z.max));
            Some(h.project_y(&format!("{name}_py"), x_window, z_window))
        }
        AnyHistogram::One(_) => {
            log::error!("Histogram '{name}' is 1D, expected a 2D or 3D histogram");
            None
        }
    }
}

/// A fitted position that escaped the axis falls back to the axis midpoint.
pub fn clamp_to_axis(histogram: &Histogram, x: f64) -> f64 {
    if histogram.contains(x) {
        x
    } else {
        histogram.axis_midpoint()
    }
}

/// The closed set of per-element calibration algorithms.
#[derive(Debug, Clone)]
pub enum Strategy {
    PeakFit(PeakFitState),
    EnergyRatio(EnergyRatioState),
    DeltaETrad(DeltaETradState),
    Droop(DroopState),
    TimeWalk(TimeWalkState),
}

impl Strategy {
    pub fn peak_position() -> Self {
        Self::PeakFit(PeakFitState::new(PeakFitOutput::Position))
    }

    pub fn time_offset() -> Self {
        Self::PeakFit(PeakFitState::new(PeakFitOutput::TimeOffset))
    }

    pub fn energy_ratio() -> Self {
        Self::EnergyRatio(EnergyRatioState::default())
    }

    pub fn delta_e_trad() -> Self {
        Self::DeltaETrad(DeltaETradState::default())
    }

    pub fn droop(kind: DroopKind) -> Self {
        Self::Droop(DroopState::new(kind))
    }

    pub fn time_walk() -> Self {
        Self::TimeWalk(TimeWalkState::default())
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::PeakFit(_) => "peak fit",
            Self::EnergyRatio(_) => "energy ratio",
            Self::DeltaETrad(_) => "traditional dE/E",
            Self::Droop(_) => "droop",
            Self::TimeWalk(_) => "time walk",
        }
    }

    pub fn init(&mut self, ctx: &InitContext<'_>) -> Result<(), CalibError> {
        match self {
            Self::PeakFit(s) => s.init(ctx),
            Self::EnergyRatio(s) => s.init(ctx),
            Self::DeltaETrad(s) => s.init(ctx),
            Self::Droop(s) => s.init(ctx),
            Self::TimeWalk(s) => s.init(ctx),
        }
    }

    /// Data types of the value columns, in column order.
    pub fn data_types(&self, info: &ModuleInfo) -> Vec<String> {
        match self {
            Self::PeakFit(_) | Self::EnergyRatio(_) => vec![info.data_type.clone()],
            Self::DeltaETrad(_) => delta_e::data_types(&info.data_type),
            Self::Droop(_) => Vec::new(),
            Self::TimeWalk(_) => time_walk::data_types(&info.data_type),
        }
    }

    /// Whether the columns are read from and written to the parameter store.
    pub fn uses_store(&self) -> bool {
        match self {
            Self::PeakFit(s) => s.output == PeakFitOutput::TimeOffset,
            Self::Droop(_) => false,
            Self::EnergyRatio(_) | Self::DeltaETrad(_) | Self::TimeWalk(_) => true,
        }
    }

    /// Fits one element. Returns `true` when a fit result is available afterwards.
    pub fn fit(&mut self, elem: usize, refit: bool) -> bool {
        match self {
            Self::PeakFit(s) => s.fit(elem, refit),
            Self::EnergyRatio(s) => s.fit(elem, refit),
            Self::DeltaETrad(s) => s.fit(elem, refit),
            Self::Droop(s) => s.fit(elem),
            Self::TimeWalk(s) => s.fit(elem),
        }
    }

    /// Turns the fit result of `elem` into new values. The columns already hold
    /// the old value of `elem`, so a strategy without a result leaves them alone.
    pub fn calculate(&mut self, elem: usize, columns: &mut [ValueColumn], ignored: bool) {
        match self {
            Self::PeakFit(s) => s.calculate(elem, columns, ignored),
            Self::EnergyRatio(s) => s.calculate(elem, columns, ignored),
            Self::DeltaETrad(s) => s.calculate(elem, columns, ignored),
            Self::Droop(_) => {}
            Self::TimeWalk(s) => s.calculate(elem, columns, ignored),
        }
    }

    /// Called once the last element of a pass has been calculated.
    pub fn finish_pass(&mut self) {
        match self {
            Self::PeakFit(s) => s.report_average(),
            Self::TimeWalk(s) => s.report_average(),
            Self::EnergyRatio(_) | Self::DeltaETrad(_) | Self::Droop(_) => {}
        }
    }

    pub fn markers(&self) -> &[Marker] {
        match self {
            Self::PeakFit(s) => std::slice::from_ref(&s.marker),
            Self::EnergyRatio(s) => &s.markers,
            Self::DeltaETrad(s) => &s.markers,
            Self::Droop(_) | Self::TimeWalk(_) => &[],
        }
    }

    /// Moves marker `index` of the current element. Returns `false` for an unknown marker.
    pub fn set_marker(&mut self, index: usize, position: f64) -> bool {
        let marker = match self {
            Self::PeakFit(s) if index == 0 => Some(&mut s.marker),
            Self::EnergyRatio(s) => s.markers.get_mut(index),
            Self::DeltaETrad(s) => s.markers.get_mut(index),
            _ => None,
        };
        match marker {
            Some(marker) => {
                marker.position = position;
                true
            }
            None => false,
        }
    }

    pub fn prints_values(&self) -> bool {
        !matches!(self, Self::Droop(_))
    }

    /// Writes the file output of file-based strategies, returning the files written.
    pub fn write_output(
        &self,
        info: &ModuleInfo,
        columns: &[ValueColumn],
        output_dir: &Path,
    ) -> Result<Vec<PathBuf>, CalibError> {
        match self {
            Self::PeakFit(s) if s.output == PeakFitOutput::Position => {
                Ok(vec![peak_fit::write_positions(columns, output_dir)?])
            }
            Self::Droop(s) => Ok(vec![s.write_curves(info, output_dir)?]),
            _ => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::histoer::histo2d::histogram2d::Histogram2D;

    #[test]
    fn test_element_projection_dimensions() {
        let mut h = Histogram2D::new("dE_E_000", (4, 4), ((0.0, 4.0), (0.0, 4.0)));
        h.set_bin_content(1, 2, 3.0);
        let proj = element_projection(Some(AnyHistogram::Two(h)), "dE_E_000", (1.0, 1.5), None);
        assert_eq!(proj.unwrap().bins, vec![0.0, 0.0, 3.0, 0.0]);

        let one = AnyHistogram::One(Histogram::new("dE_E_000", 4, (0.0, 4.0)));
        assert!(element_projection(Some(one), "dE_E_000", (0.0, 4.0), None).is_none());
        assert!(element_projection(None, "dE_E_000", (0.0, 4.0), None).is_none());
        assert_eq!(element_histogram_name("dE_E", 7), "dE_E_007");
    }

    #[test]
    fn test_markers_by_strategy() {
        let mut strategy = Strategy::delta_e_trad();
        assert_eq!(strategy.markers().len(), 4);
        assert!(strategy.set_marker(3, 1.5));
        assert!(!strategy.set_marker(4, 1.5));
        assert!(strategy.markers()[3].moved());

        let mut droop = Strategy::droop(DroopKind::Pid);
        assert!(droop.markers().is_empty());
        assert!(!droop.set_marker(0, 1.0));
        assert!(!droop.prints_values());
    }
}
