use super::{InitContext, clamp_to_axis, element_histogram_name, element_projection};
use crate::calib::values::{Marker, ValueColumn, diff_percent};
use crate::error::CalibError;
use crate::fitter::fitter::Fitter;
use crate::fitter::models::FitModel;
use crate::histoer::histo1d::histogram1d::Histogram;
use crate::histoer::peak_finder::PeakFindingSettings;

const DATA_PION: usize = 0;
const DATA_PROTON: usize = 1;
const MC_PION: usize = 2;
const MC_PROTON: usize = 3;

const PEDESTAL: usize = 0;
const GAIN: usize = 1;

/// Landau convolution steps of an automatic fit and of a hand-seeded re-fit.
const STEPS: usize = 10;
const REFIT_STEPS: usize = 100;

/// Pedestal and gain data types. The pedestal lives under `E0` next to the `E1` gain.
pub fn data_types(gain_data_type: &str) -> Vec<String> {
    vec![gain_data_type.replace("E1", "E0"), gain_data_type.to_owned()]
}

/// Pion and proton positions of one spectrum.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeciesPeaks {
    pub pion: f64,
    pub proton: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TwoSpeciesResult {
    pub data: SpeciesPeaks,
    pub mc: SpeciesPeaks,
}

/// Solves for the pedestal and gain that map the measured pion and proton
/// positions onto their simulated energies.
///
/// The positions are first converted back to ADC channels with the old calibration.
/// Returns `None` for a degenerate system.
pub fn pedestal_and_gain(
    data: SpeciesPeaks,
    mc: SpeciesPeaks,
    old_pedestal: f64,
    old_gain: f64,
) -> Option<(f64, f64)> {
    if old_gain == 0.0 || mc.proton == 0.0 {
        return None;
    }
    let adc_pion = data.pion / old_gain + old_pedestal;
    let adc_proton = data.proton / old_gain + old_pedestal;
    let ratio = mc.pion / mc.proton;
    if ratio == 1.0 {
        return None;
    }
    let pedestal = (adc_pion - ratio * adc_proton) / (1.0 - ratio);
    let gain = mc.proton / (adc_proton - pedestal);
    (pedestal.is_finite() && gain.is_finite()).then_some((pedestal, gain))
}

/// Joint pion/proton fit of the dE spectra of data and simulation.
///
/// Markers: data pion, data proton, MC pion, MC proton.
#[derive(Debug, Clone)]
pub struct DeltaETradState {
    pub markers: Vec<Marker>,
    data: Vec<Option<Histogram>>,
    mc: Vec<Option<Histogram>>,
    results: Vec<Option<TwoSpeciesResult>>,
    current: Option<usize>,
}

impl Default for DeltaETradState {
    fn default() -> Self {
        Self {
            markers: vec![Marker::default(); 4],
            data: Vec::new(),
            mc: Vec::new(),
            results: Vec::new(),
            current: None,
        }
    }
}

impl DeltaETradState {
    pub fn init(&mut self, ctx: &InitContext<'_>) -> Result<(), CalibError> {
        let histogram_name = ctx.config.require_string(&ctx.key("Histo.Fit.Name"))?;
        let energy_window = ctx.config.require_range(&ctx.key("Fit.Range.ClEnergy"))?;
        let position_window = ctx.config.range(&ctx.key("Fit.Range.DetPos"));
        let rebin = ctx
            .config
            .int(&ctx.key("Histo.Fit.Rebin"))
            .and_then(|r| usize::try_from(r).ok())
            .unwrap_or(0);
        let reference = ctx.reference.ok_or(CalibError::MissingReference)?;

        let project = |histogram, name: &str| {
            let mut projection = element_projection(histogram, name, energy_window, position_window)?;
            if rebin > 1 {
                projection.rebin(rebin);
            }
            Some(projection)
        };

        self.data.clear();
        self.mc.clear();
        for elem in 0..ctx.info.n_elements {
            let name = element_histogram_name(&histogram_name, elem);
            self.data.push(project(ctx.histograms.get(&name), &name));
            self.mc.push(project(reference.histogram(&name, &[]), &name));
        }
        self.results = vec![None; ctx.info.n_elements];
        self.current = None;
        Ok(())
    }

    pub fn result(&self, elem: usize) -> Option<TwoSpeciesResult> {
        self.results.get(elem).copied().flatten()
    }

    fn markers_moved(&self, pion: usize, proton: usize) -> bool {
        self.markers[pion].moved() || self.markers[proton].moved()
    }

    pub fn fit(&mut self, elem: usize, refit: bool) -> bool {
        let same_element = self.current == Some(elem);
        self.current = Some(elem);
        let refit = refit && same_element;
        let previous = self.result(elem);

        let data = self.data.get(elem).and_then(Option::as_ref).filter(|h| !h.is_empty());
        let mc = self.mc.get(elem).and_then(Option::as_ref).filter(|h| !h.is_empty());
        let (Some(data), Some(mc)) = (data, mc) else {
            log::warn!("Element: {elem:03}    no data or Monte-Carlo entries, fit skipped");
            self.set_result(elem, None);
            return false;
        };

        // each source is only re-fitted when one of its markers moved
        let mc_peaks = match previous {
            Some(prev) if refit && !self.markers_moved(MC_PION, MC_PROTON) => Some(prev.mc),
            _ => {
                let seeds = refit.then(|| self.seeds(MC_PION, MC_PROTON));
                fit_two_species(mc, true, seeds, if refit { REFIT_STEPS } else { STEPS })
            }
        };
        let data_peaks = match previous {
            Some(prev) if refit && !self.markers_moved(DATA_PION, DATA_PROTON) => Some(prev.data),
            _ => {
                let seeds = refit.then(|| self.seeds(DATA_PION, DATA_PROTON));
                fit_two_species(data, false, seeds, if refit { REFIT_STEPS } else { STEPS })
            }
        };

        let (Some(data), Some(mc)) = (data_peaks, mc_peaks) else {
            log::warn!("Element: {elem:03}    pion or proton peak not found");
            self.set_result(elem, None);
            return false;
        };
        self.markers = vec![
            Marker::fitted(data.pion),
            Marker::fitted(data.proton),
            Marker::fitted(mc.pion),
            Marker::fitted(mc.proton),
        ];
        self.set_result(elem, Some(TwoSpeciesResult { data, mc }));
        true
    }

    fn seeds(&self, pion: usize, proton: usize) -> SpeciesPeaks {
        SpeciesPeaks {
            pion: self.markers[pion].position,
            proton: self.markers[proton].position,
        }
    }

    fn set_result(&mut self, elem: usize, result: Option<TwoSpeciesResult>) {
        if let Some(slot) = self.results.get_mut(elem) {
            *slot = result;
        }
    }

    pub fn calculate(&mut self, elem: usize, columns: &mut [ValueColumn], ignored: bool) {
        if columns.len() < 2 {
            return;
        }
        let old_pedestal = columns[PEDESTAL].old(elem);
        let old_gain = columns[GAIN].old(elem);

        let result = if self.current == Some(elem) {
            self.result(elem).map(|_| TwoSpeciesResult {
                data: self.seeds(DATA_PION, DATA_PROTON),
                mc: self.seeds(MC_PION, MC_PROTON),
            })
        } else {
            self.result(elem)
        };

        let solved = result
            .filter(|_| !ignored)
            .and_then(|r| pedestal_and_gain(r.data, r.mc, old_pedestal, old_gain));
        let Some((result, (pedestal, gain))) = result.zip(solved) else {
            log::info!(
                "Element: {elem:03}    Pedestal: {old_pedestal:12.8}    Gain: {old_gain:12.8}    -> no fit"
            );
            return;
        };

        columns[PEDESTAL].set(elem, pedestal);
        columns[GAIN].set(elem, gain);
        log::info!(
            "Element: {elem:03}    Pion: {:.2} (MC: {:.2})   Proton: {:.2} (MC: {:.2})   Pedestal: {pedestal:12.8} ({:2.1}%)  Gain: {gain:12.8} ({:2.1}%)",
            result.data.pion,
            result.mc.pion,
            result.data.proton,
            result.mc.proton,
            diff_percent(old_pedestal, pedestal),
            diff_percent(old_gain, gain)
        );
    }
}

/// Exponential background plus a Landau-folded pion and a Gaussian proton, in two passes.
fn fit_two_species(
    histogram: &Histogram,
    is_mc: bool,
    seeds: Option<SpeciesPeaks>,
    steps: usize,
) -> Option<SpeciesPeaks> {
    let SpeciesPeaks { pion, proton } = match seeds {
        Some(seeds) => seeds,
        None => {
            let peaks = PeakFindingSettings::new(10.0, 0.05).search(histogram);
            SpeciesPeaks {
                pion: peaks.lowest_x()?,
                proton: peaks.highest_x()?,
            }
        }
    };

    let mut fitter = Fitter::new(
        &format!("{}_{}", histogram.name, if is_mc { "MC" } else { "data" }),
        FitModel::ExpoLandauGaussConvGauss { steps },
    )
    .with_max_attempts(10);
    fitter.set_parameters(&[9.0, -0.37605, 10.0, pion, 100.0, 0.3, 10.0, proton, 0.4]);
    fitter.set_limits(2, 0.0, 1e6);
    fitter.set_limits(3, 0.85 * pion, 1.15 * pion);
    fitter.set_limits(4, 10.0, 1e6);
    fitter.set_limits(5, 0.1, 2.0);
    fitter.set_limits(6, 0.0, 1e5);
    fitter.set_limits(7, 0.85 * proton, 1.15 * proton);
    fitter.set_limits(8, 0.1, 2.0);
    if is_mc {
        fitter.set_range(0.4, proton + 5.0);
    } else {
        fitter.set_range(0.2 * pion, proton + 5.0);
    }
    if !fitter.fit(histogram).has_result() {
        return None;
    }

    let width_factor = if is_mc { 2.5 } else { 3.0 };
    fitter.set_range(
        fitter.value(3) - width_factor * fitter.value(5),
        fitter.value(7) + 4.0 * fitter.value(8),
    );
    fitter.fit(histogram);

    Some(SpeciesPeaks {
        pion: clamp_to_axis(histogram, fitter.value(3)),
        proton: clamp_to_axis(histogram, fitter.value(7)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fitter::models::landau::expo_landau_gauss_conv_gauss;

    // falling background, Landau pion at 1.2 and Gaussian proton at 4.0
    fn two_species_spectrum(name: &str) -> Histogram {
        let p = [9.0, -0.37605, 0.2, 1.2, 1e5, 0.15, 3e3, 4.0, 0.4];
        let counts = (0..200)
            .map(|i| {
                let de = (i as f64 + 0.5) * 0.05;
                expo_landau_gauss_conv_gauss(de, &p, 100).round()
            })
            .collect();
        Histogram::from_counts(name, (0.0, 10.0), counts)
    }

    #[test]
    fn test_pedestal_and_gain_recover_true_calibration() {
        // true pedestal 100 and gain 0.05; MC pion at 1, proton at 4
        let mc = SpeciesPeaks {
            pion: 1.0,
            proton: 4.0,
        };
        let data = SpeciesPeaks {
            pion: 120.0,
            proton: 180.0,
        };
        let (pedestal, gain) = pedestal_and_gain(data, mc, 0.0, 1.0).unwrap();
        assert!((pedestal - 100.0).abs() < 1e-9);
        assert!((gain - 0.05).abs() < 1e-12);

        // a correct old calibration maps onto itself
        let calibrated = SpeciesPeaks {
            pion: (120.0 - 100.0) * 0.05,
            proton: (180.0 - 100.0) * 0.05,
        };
        let (pedestal, gain) = pedestal_and_gain(calibrated, mc, 100.0, 0.05).unwrap();
        assert!((pedestal - 100.0).abs() < 1e-9);
        assert!((gain - 0.05).abs() < 1e-12);
    }

    #[test]
    fn test_degenerate_systems() {
        let same = SpeciesPeaks {
            pion: 2.0,
            proton: 2.0,
        };
        assert!(pedestal_and_gain(same, same, 0.0, 1.0).is_none());
        let mc = SpeciesPeaks {
            pion: 1.0,
            proton: 4.0,
        };
        assert!(pedestal_and_gain(same, mc, 0.0, 0.0).is_none());
    }

    #[test]
    fn test_data_types() {
        assert_eq!(
            data_types("Data.PID.E1"),
            vec!["Data.PID.E0".to_owned(), "Data.PID.E1".to_owned()]
        );
    }

    #[test]
    fn test_two_species_fit_finds_both_peaks() {
        let histogram = two_species_spectrum("dE_00");
        let peaks = fit_two_species(&histogram, false, None, STEPS).unwrap();
        assert!((peaks.pion - 1.2).abs() < 0.05, "pion at {}", peaks.pion);
        assert!((peaks.proton - 4.0).abs() < 0.03, "proton at {}", peaks.proton);

        let seeded = SpeciesPeaks {
            pion: 1.3,
            proton: 3.8,
        };
        let peaks = fit_two_species(&histogram, true, Some(seeded), REFIT_STEPS).unwrap();
        assert!((peaks.pion - 1.2).abs() < 0.05, "pion at {}", peaks.pion);
        assert!((peaks.proton - 4.0).abs() < 0.03, "proton at {}", peaks.proton);
    }

    #[test]
    fn test_refit_only_source_with_moved_marker() {
        let mut state = DeltaETradState::default();
        state.data = vec![Some(two_species_spectrum("dE_00"))];
        state.mc = vec![Some(two_species_spectrum("dE_00"))];
        state.results = vec![None];

        assert!(state.fit(0, false));
        let first = state.result(0).unwrap();
        assert!((first.data.proton - 4.0).abs() < 0.03);
        assert!(state.markers.iter().all(|m| !m.moved()));

        state.markers[DATA_PION].position = 1.3;
        state.markers[DATA_PROTON].position = 3.8;
        assert!(state.fit(0, true));
        let second = state.result(0).unwrap();
        assert_eq!(second.mc, first.mc);
        assert!((second.data.pion - 1.2).abs() < 0.05, "pion at {}", second.data.pion);
        assert!((second.data.proton - 4.0).abs() < 0.03, "proton at {}", second.data.proton);
        assert_eq!(state.markers[DATA_PROTON].fitted, second.data.proton);
        assert!(!state.markers[DATA_PROTON].moved());
    }

    #[test]
    fn test_no_result_keeps_old_values() {
        let mut state = DeltaETradState::default();
        state.results = vec![None; 2];
        let mut columns = vec![ValueColumn::new("Data.PID.E0", 2), ValueColumn::new("Data.PID.E1", 2)];
        columns[PEDESTAL].old = vec![1.0, 2.0];
        columns[PEDESTAL].new = vec![1.0, 2.0];
        columns[GAIN].old = vec![0.1, 0.2];
        columns[GAIN].new = vec![0.1, 0.2];
        assert!(!state.fit(1, false));
        state.calculate(1, &mut columns, false);
        assert_eq!(columns[PEDESTAL].new, vec![1.0, 2.0]);
        assert_eq!(columns[GAIN].new, vec![0.1, 0.2]);
    }
}
