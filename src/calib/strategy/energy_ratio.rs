use super::{InitContext, element_histogram_name, element_projection};
use crate::calib::values::{Marker, ValueColumn, diff_percent};
use crate::config::ConfigError;
use crate::error::CalibError;
use crate::fitter::fitter::Fitter;
use crate::fitter::models::FitModel;
use crate::histoer::histo1d::histogram1d::Histogram;
use crate::histoer::peak_finder::PeakFindingSettings;

const DATA: usize = 0;
const MC: usize = 1;

/// Allowed drift of the fitted peak from its seed.
const PEAK_RANGE: f64 = 0.2;

/// Data and Monte-Carlo peak of one element.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeakPair {
    pub data: f64,
    pub mc: f64,
}

/// Gain from the ratio of a simulated to a measured energy peak.
///
/// Markers: 0 is the data peak, 1 the Monte-Carlo peak.
#[derive(Debug, Clone)]
pub struct EnergyRatioState {
    pub markers: Vec<Marker>,
    name: String,
    energy_range: (f64, f64),
    data: Vec<Option<Histogram>>,
    mc: Vec<Option<Histogram>>,
    results: Vec<Option<PeakPair>>,
    current: Option<usize>,
}

impl Default for EnergyRatioState {
    fn default() -> Self {
        Self {
            markers: vec![Marker::default(); 2],
            name: String::new(),
            energy_range: (0.0, 0.0),
            data: Vec::new(),
            mc: Vec::new(),
            results: Vec::new(),
            current: None,
        }
    }
}

/// `old * mc / data`, or `None` when the ratio would give a negative or undefined gain.
pub fn gain_from_ratio(old: f64, mc_peak: f64, data_peak: f64) -> Option<f64> {
    if data_peak == 0.0 {
        return None;
    }
    let gain = old * (mc_peak / data_peak);
    (gain.is_finite() && gain >= 0.0).then_some(gain)
}

impl EnergyRatioState {
    pub fn init(&mut self, ctx: &InitContext<'_>) -> Result<(), CalibError> {
        let histogram_name = ctx.config.require_string(&ctx.key("Histo.Fit.Name"))?;
        let range_key = ctx.key("Fit.Range");
        let energy_range = ctx.config.require_range(&range_key)?;
        if energy_range.0 <= 0.0 {
            return Err(ConfigError::Malformed {
                key: range_key,
                value: format!("{} {}", energy_range.0, energy_range.1),
            }
            .into());
        }
        let reference = ctx.reference.ok_or(CalibError::MissingReference)?;

        self.data.clear();
        self.mc.clear();
        for elem in 0..ctx.info.n_elements {
            let name = element_histogram_name(&histogram_name, elem);
            self.data.push(element_projection(
                ctx.histograms.get(&name),
                &name,
                energy_range,
                None,
            ));
            self.mc.push(element_projection(
                reference.histogram(&name, &[]),
                &name,
                energy_range,
                None,
            ));
        }

        self.name = ctx.info.name.clone();
        self.energy_range = energy_range;
        self.results = vec![None; ctx.info.n_elements];
        self.current = None;
        Ok(())
    }

    pub fn result(&self, elem: usize) -> Option<PeakPair> {
        self.results.get(elem).copied().flatten()
    }

    pub fn fit(&mut self, elem: usize, refit: bool) -> bool {
        let same_element = self.current == Some(elem);
        self.current = Some(elem);

        let data = self.data.get(elem).and_then(Option::as_ref).filter(|h| !h.is_empty());
        let Some(data) = data else {
            log::warn!("Element: {elem:03}    no data entries, fit skipped");
            self.set_result(elem, None);
            return false;
        };
        let mc = self.mc.get(elem).and_then(Option::as_ref).filter(|h| !h.is_empty());
        let Some(mc) = mc else {
            log::warn!("Element: {elem:03}    no Monte-Carlo entries, fit skipped");
            self.set_result(elem, None);
            return false;
        };

        let refit = refit && same_element;
        if refit && !self.markers.iter().any(Marker::moved) {
            return self.result(elem).is_some();
        }

        let seed = |marker: usize| refit.then(|| self.markers[marker].position);
        let mc_peak = self.fit_slice(mc, 0.03, seed(MC), "MC");
        let data_peak = self.fit_slice(data, 0.05, seed(DATA), "data");

        match (data_peak, mc_peak) {
            (Some(data), Some(mc)) => {
                self.markers[DATA] = Marker::fitted(data);
                self.markers[MC] = Marker::fitted(mc);
                self.set_result(elem, Some(PeakPair { data, mc }));
                true
            }
            _ => {
                log::warn!("Element: {elem:03}    no peak found");
                self.set_result(elem, None);
                false
            }
        }
    }

    fn set_result(&mut self, elem: usize, result: Option<PeakPair>) {
        if let Some(slot) = self.results.get_mut(elem) {
            *slot = result;
        }
    }

    /// Two-pass exponential plus Gaussian fit around the highest peak, or around `seed`.
    fn fit_slice(
        &self,
        histogram: &Histogram,
        threshold: f64,
        seed: Option<f64>,
        label: &str,
    ) -> Option<f64> {
        let peak = match seed {
            Some(peak) => peak,
            None => PeakFindingSettings::new(5.0, threshold)
                .search(histogram)
                .highest_x()?,
        };

        let range = 30.0 / self.energy_range.0 + 0.3;
        let start_count = histogram.bins[histogram.find_bin(peak - range)].max(1.0);

        let mut fitter = Fitter::new(&format!("{}_{label}", histogram.name), FitModel::ExpoGauss);
        fitter.set_parameters(&[
            start_count.ln(),
            0.0,
            (histogram.find_bin(peak) + 1) as f64,
            peak,
            1.0,
        ]);
        fitter.set_limits(2, 0.0, 1e5);
        fitter.set_limits(3, peak - PEAK_RANGE, peak + PEAK_RANGE);
        fitter.set_limits(4, 0.1, 10.0);
        fitter.set_range(peak - range, peak + 2.0 * range);
        if !fitter.fit(histogram).has_result() {
            return None;
        }

        let sigma = fitter.value(4);
        fitter.set_range(peak - 3.0 * sigma, peak + range + 3.0 * sigma);
        fitter.fit(histogram);
        Some(fitter.value(3))
    }

    pub fn calculate(&mut self, elem: usize, columns: &mut [ValueColumn], ignored: bool) {
        let Some(column) = columns.first_mut() else {
            return;
        };
        let old = column.old(elem);

        let peaks = if self.current == Some(elem) {
            self.result(elem).map(|_| PeakPair {
                data: self.markers[DATA].position,
                mc: self.markers[MC].position,
            })
        } else {
            self.result(elem)
        };
        let (data, mc) = peaks.map_or((0.0, 0.0), |p| (p.data, p.mc));

        let new = peaks
            .filter(|_| !ignored)
            .and_then(|p| gain_from_ratio(old, p.mc, p.data));
        if let Some(new) = new {
            column.set(elem, new);
        }

        let unchanged = if new.is_none() { "    -> unchanged" } else { "" };
        log::info!(
            "Element: {elem:03}    peak: {data:.3}    peak MC: {mc:.3}    old gain: {old:12.8}    new gain: {:12.8}    diff: {:6.2} %{unchanged}",
            column.new_value(elem),
            diff_percent(old, column.new_value(elem))
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calib::module::ModuleInfo;
    use crate::config::YamlConfig;
    use crate::histoer::any::AnyHistogram;
    use crate::histoer::histo2d::histogram2d::Histogram2D;
    use crate::store::histograms::{HistogramFile, SetHistograms};

    #[test]
    fn test_equal_peaks_keep_gain() {
        let gain = gain_from_ratio(0.0123, 4.2, 4.2).unwrap();
        assert!((gain - 0.0123).abs() < 1e-15);
        assert!((gain_from_ratio(1.0, 3.0, 2.0).unwrap() - 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_negative_gain_is_rejected() {
        assert_eq!(gain_from_ratio(1.0, 3.0, -2.0), None);
        assert_eq!(gain_from_ratio(1.0, 3.0, 0.0), None);
    }

    fn energy_histogram(peak: f64) -> Histogram2D {
        // x = E, y = dE
        let mut h = Histogram2D::new("dE_E_000", (10, 100), ((0.0, 100.0), (0.0, 10.0)));
        for y_bin in 0..100 {
            let y = (y_bin as f64 + 0.5) * 0.1;
            let count = (500.0 * (-0.5 * ((y - peak) / 0.4_f64).powi(2)).exp()
                + 50.0 * (-0.3 * y).exp())
            .round();
            h.set_bin_content(5, y_bin, count);
        }
        h
    }

    fn context_files(data_peak: f64, mc_peak: f64) -> (YamlConfig, HistogramFile, HistogramFile) {
        let mut config = YamlConfig::default();
        config.insert("Veto.Energy.Histo.Fit.Name", "dE_E");
        config.insert("Veto.Energy.Fit.Range", "40 70");
        let mut data = HistogramFile::default();
        data.insert(AnyHistogram::Two(energy_histogram(data_peak)));
        let mut mc = HistogramFile::default();
        mc.insert(AnyHistogram::Two(energy_histogram(mc_peak)));
        (config, data, mc)
    }

    #[test]
    fn test_ratio_of_fitted_peaks() {
        let (config, data, mc) = context_files(4.0, 4.0);
        let info = ModuleInfo::new("Veto.Energy", "Data.Veto.E1", "LD2", 2);
        let ctx = InitContext {
            info: &info,
            config: &config,
            histograms: SetHistograms::new(&data, &[]),
            reference: Some(&mc),
        };
        let mut state = EnergyRatioState::default();
        state.init(&ctx).unwrap();

        assert!(state.fit(0, false));
        let result = state.result(0).unwrap();
        assert!((result.data - 4.0).abs() < 0.1);
        assert!((result.data - result.mc).abs() < 1e-6);

        let mut columns = vec![ValueColumn::new("Data.Veto.E1", 2)];
        columns[0].old = vec![0.05, 0.05];
        columns[0].new = columns[0].old.clone();
        state.calculate(0, &mut columns, false);
        assert!((columns[0].new[0] - 0.05).abs() < 1e-6);

        assert!(!state.fit(1, false));
        state.calculate(1, &mut columns, false);
        assert_eq!(columns[0].new[1], 0.05);
    }

    #[test]
    fn test_init_needs_reference() {
        let (config, data, _) = context_files(4.0, 4.0);
        let info = ModuleInfo::new("Veto.Energy", "Data.Veto.E1", "LD2", 1);
        let ctx = InitContext {
            info: &info,
            config: &config,
            histograms: SetHistograms::new(&data, &[]),
            reference: None,
        };
        assert!(matches!(
            EnergyRatioState::default().init(&ctx),
            Err(CalibError::MissingReference)
        ));
    }
}
