use super::config::ConfigError;
use super::store::StoreError;
use std::error::Error;
use std::fmt::Display;

#[derive(Debug)]
pub enum CalibError {
    Config(ConfigError),
    Store(StoreError),
    MissingHistogram(String),
    InvalidHistogram(String),
    MissingReference,
    NotStarted,
    NoSets,
    File(std::io::Error),
    Json(serde_json::Error),
    Yaml(serde_yaml::Error),
}

impl From<ConfigError> for CalibError {
    fn from(err: ConfigError) -> CalibError {
        CalibError::Config(err)
    }
}

impl From<StoreError> for CalibError {
    fn from(err: StoreError) -> CalibError {
        CalibError::Store(err)
    }
}

impl From<std::io::Error> for CalibError {
    fn from(err: std::io::Error) -> CalibError {
        CalibError::File(err)
    }
}

impl From<serde_json::Error> for CalibError {
    fn from(err: serde_json::Error) -> CalibError {
        CalibError::Json(err)
    }
}

impl From<serde_yaml::Error> for CalibError {
    fn from(err: serde_yaml::Error) -> CalibError {
        CalibError::Yaml(err)
    }
}

impl Display for CalibError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CalibError::Config(x) => write!(f, "Calibration has a configuration error: {x}"),
            CalibError::Store(x) => write!(f, "Calibration had a parameter store error: {x}"),
            CalibError::MissingHistogram(name) => {
                write!(f, "Calibration could not find histogram '{name}'")
            }
            CalibError::InvalidHistogram(name) => {
                write!(f, "Histogram '{name}' does not have the expected dimension")
            }
            CalibError::MissingReference => {
                write!(f, "Calibration needs a Monte-Carlo reference histogram file")
            }
            CalibError::NotStarted => write!(f, "Calibration has not been started"),
            CalibError::NoSets => write!(f, "Calibration was started without any set"),
            CalibError::File(x) => write!(f, "Calibration had a file I/O error: {x}"),
            CalibError::Json(x) => write!(f, "Calibration could not read or write JSON: {x}"),
            CalibError::Yaml(x) => write!(f, "Calibration could not parse YAML: {x}"),
        }
    }
}

impl Error for CalibError {}
