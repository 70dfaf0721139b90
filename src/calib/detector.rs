use std::str::FromStr;

use crate::config::ConfigStore;

pub const MAX_CB: usize = 720;
pub const MAX_TAPS: usize = 510;
pub const MAX_PID: usize = 24;
pub const MAX_VETO: usize = 510;
pub const MAX_TAGGER: usize = 408;
pub const MAX_PIZZA: usize = 24;

/// Bin of the per-run `EventInfo` histogram holding the number of scaler reads.
pub const SCALER_READS_EVENT_INFO_BIN: usize = 13;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub enum Detector {
    CB,
    TAPS,
    PID,
    Veto,
    Tagger,
    Pizza,
}

impl Detector {
    /// Number of elements. TAPS and its vetos follow `TAPS.Elements` when set.
    pub fn elements(&self, config: &dyn ConfigStore) -> usize {
        match self {
            Detector::CB => MAX_CB,
            Detector::TAPS => configured_taps(config).unwrap_or(MAX_TAPS),
            Detector::Veto => configured_taps(config).unwrap_or(MAX_VETO),
            Detector::PID => MAX_PID,
            Detector::Tagger => MAX_TAGGER,
            Detector::Pizza => MAX_PIZZA,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Detector::CB => "CB",
            Detector::TAPS => "TAPS",
            Detector::PID => "PID",
            Detector::Veto => "Veto",
            Detector::Tagger => "Tagger",
            Detector::Pizza => "Pizza",
        }
    }
}

fn configured_taps(config: &dyn ConfigStore) -> Option<usize> {
    config
        .int("TAPS.Elements")
        .and_then(|n| usize::try_from(n).ok())
        .filter(|&n| n > 0)
}

/// Elements per TAPS block in the 438 element setup.
const TAPS_BLOCK_438: usize = 73;
/// PWO crystals at the start of each block, replacing the three innermost BaF2.
const TAPS_PWO_PER_BLOCK: usize = 12;

/// Whether `elem` is a PWO crystal. Only the 438 element TAPS has them.
pub fn is_taps_pwo(elem: usize, n_taps: usize) -> bool {
    n_taps == 438 && elem % TAPS_BLOCK_438 < TAPS_PWO_PER_BLOCK
}

impl FromStr for Detector {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cb" => Ok(Detector::CB),
            "taps" => Ok(Detector::TAPS),
            "pid" => Ok(Detector::PID),
            "veto" => Ok(Detector::Veto),
            "tagger" => Ok(Detector::Tagger),
            "pizza" => Ok(Detector::Pizza),
            other => Err(format!("unknown detector '{other}'")),
        }
    }
}

/// The scaler-read review modules, one per detector readout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub enum BadScalerReadKind {
    NaI,
    PID,
    MWPC,
    BaF2PWO,
    BaF2,
    PWO,
    Veto,
    Pizza,
    Ladder,
    LadderScalers,
}

impl BadScalerReadKind {
    pub const ALL: [BadScalerReadKind; 10] = [
        BadScalerReadKind::NaI,
        BadScalerReadKind::PID,
        BadScalerReadKind::MWPC,
        BadScalerReadKind::BaF2PWO,
        BadScalerReadKind::BaF2,
        BadScalerReadKind::PWO,
        BadScalerReadKind::Veto,
        BadScalerReadKind::Pizza,
        BadScalerReadKind::Ladder,
        BadScalerReadKind::LadderScalers,
    ];

    fn suffix(&self) -> &'static str {
        match self {
            BadScalerReadKind::NaI => "NaI",
            BadScalerReadKind::PID => "PID",
            BadScalerReadKind::MWPC => "MWPC",
            BadScalerReadKind::BaF2PWO => "BaF2PWO",
            BadScalerReadKind::BaF2 => "BaF2",
            BadScalerReadKind::PWO => "PWO",
            BadScalerReadKind::Veto => "Veto",
            BadScalerReadKind::Pizza => "Pizza",
            BadScalerReadKind::Ladder => "Ladder",
            BadScalerReadKind::LadderScalers => "LadderScalers",
        }
    }

    /// Module name, the prefix of its configuration keys.
    pub fn name(&self) -> String {
        format!("BadScR.{}", self.suffix())
    }

    pub fn data_type(&self) -> String {
        format!("Data.Run.BadScR.{}", self.suffix())
    }
}

impl FromStr for BadScalerReadKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim_start_matches("BadScR.");
        BadScalerReadKind::ALL
            .iter()
            .find(|kind| kind.suffix().eq_ignore_ascii_case(wanted))
            .copied()
            .ok_or_else(|| format!("unknown scaler-read module '{s}'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::YamlConfig;

    #[test]
    fn test_element_counts() {
        let mut config = YamlConfig::default();
        assert_eq!(Detector::TAPS.elements(&config), 510);
        config.insert("TAPS.Elements", 438);
        assert_eq!(Detector::TAPS.elements(&config), 438);
        assert_eq!(Detector::CB.elements(&config), 720);
        assert_eq!("pid".parse::<Detector>(), Ok(Detector::PID));
        assert!(is_taps_pwo(11, 438));
        assert!(!is_taps_pwo(12, 438));
        assert!(is_taps_pwo(73 + 3, 438));
        assert!(!is_taps_pwo(3, 384));
    }

    #[test]
    fn test_scaler_read_names() {
        let kind: BadScalerReadKind = "BadScR.BaF2PWO".parse().unwrap();
        assert_eq!(kind, BadScalerReadKind::BaF2PWO);
        assert_eq!(kind.name(), "BadScR.BaF2PWO");
        assert_eq!(kind.data_type(), "Data.Run.BadScR.BaF2PWO");
    }
}
