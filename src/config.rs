use std::collections::BTreeMap;
use std::fmt::Display;
use std::path::Path;

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    Missing(String),
    Malformed { key: String, value: String },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Missing(key) => write!(f, "Configuration key '{key}' is not set"),
            ConfigError::Malformed { key, value } => {
                write!(f, "Configuration key '{key}' has a malformed value '{value}'")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Flat `"<Module>.<Setting>"` lookup with typed readers.
pub trait ConfigStore {
    fn get(&self, key: &str) -> Option<String>;

    fn string(&self, key: &str) -> Option<String> {
        self.get(key)
    }

    fn int(&self, key: &str) -> Option<i64> {
        let value = self.get(key)?;
        match value.trim().parse::<i64>() {
            Ok(v) => Some(v),
            Err(_) => value.trim().parse::<f64>().ok().map(|v| v as i64),
        }
    }

    fn float(&self, key: &str) -> Option<f64> {
        self.get(key)?.trim().parse().ok()
    }

    /// A pair of doubles written as `"low high"`.
    fn range(&self, key: &str) -> Option<(f64, f64)> {
        let values = parse_floats(&self.get(key)?)?;
        match values.as_slice() {
            [low, high] => Some((*low, *high)),
            _ => None,
        }
    }

    fn bool(&self, key: &str) -> Option<bool> {
        let value = self.get(key)?;
        match value.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        }
    }

    fn int_list(&self, key: &str) -> Option<Vec<i64>> {
        self.get(key)?
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|s| !s.is_empty())
            .map(|s| s.parse::<i64>().ok())
            .collect()
    }

    fn require_string(&self, key: &str) -> Result<String, ConfigError> {
        self.string(key)
            .ok_or_else(|| ConfigError::Missing(key.to_owned()))
    }

    fn require_int(&self, key: &str) -> Result<i64, ConfigError> {
        let value = self.require_string(key)?;
        self.int(key).ok_or_else(|| malformed(key, value))
    }

    fn require_float(&self, key: &str) -> Result<f64, ConfigError> {
        let value = self.require_string(key)?;
        self.float(key).ok_or_else(|| malformed(key, value))
    }

    fn require_range(&self, key: &str) -> Result<(f64, f64), ConfigError> {
        let value = self.require_string(key)?;
        self.range(key).ok_or_else(|| malformed(key, value))
    }
}

fn malformed(key: &str, value: String) -> ConfigError {
    ConfigError::Malformed {
        key: key.to_owned(),
        value,
    }
}

fn parse_floats(value: &str) -> Option<Vec<f64>> {
    value
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<f64>().ok())
        .collect()
}

/// A flat YAML map of settings. Sequences are read back as space separated values.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(transparent)]
pub struct YamlConfig {
    pub values: BTreeMap<String, serde_yaml::Value>,
}

impl YamlConfig {
    pub fn load(path: &Path) -> Result<Self, crate::error::CalibError> {
        let text = std::fs::read_to_string(path)?;
        let config = Self::parse(&text)?;
        log::info!(
            "Loaded {} setting(s) from {}",
            config.values.len(),
            path.display()
        );
        Ok(config)
    }

    pub fn parse(text: &str) -> Result<Self, serde_yaml::Error> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text)
    }

    pub fn insert(&mut self, key: &str, value: impl Into<serde_yaml::Value>) {
        self.values.insert(key.to_owned(), value.into());
    }
}

fn render(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::Null => None,
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Sequence(items) => Some(
            items
                .iter()
                .filter_map(render)
                .collect::<Vec<String>>()
                .join(" "),
        ),
        serde_yaml::Value::Mapping(_) | serde_yaml::Value::Tagged(_) => None,
    }
}

impl ConfigStore for YamlConfig {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).and_then(render)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
PID.Histo.Fit.Name: CaLib_PID_Time
PID.Histo.Fit.Range: [-50, 50]
PID.Time.Gain: "0.117"
PID.Ignore.Elements: [3, 17]
TAPS.Elements: 438
BadScR.LoadHistosInAdvance: yes
BadScR.Other.Range: "1.5 2.5"
"#;

    #[test]
    fn test_typed_readers() {
        let config = YamlConfig::parse(SAMPLE).unwrap();
        assert_eq!(
            config.string("PID.Histo.Fit.Name").as_deref(),
            Some("CaLib_PID_Time")
        );
        assert_eq!(config.range("PID.Histo.Fit.Range"), Some((-50.0, 50.0)));
        assert_eq!(config.range("BadScR.Other.Range"), Some((1.5, 2.5)));
        assert!((config.float("PID.Time.Gain").unwrap() - 0.117).abs() < 1e-12);
        assert_eq!(config.int("TAPS.Elements"), Some(438));
        assert_eq!(config.int_list("PID.Ignore.Elements"), Some(vec![3, 17]));
        assert_eq!(config.bool("BadScR.LoadHistosInAdvance"), Some(true));
    }

    #[test]
    fn test_required_keys() {
        let config = YamlConfig::parse(SAMPLE).unwrap();
        assert_eq!(
            config.require_float("PID.Missing"),
            Err(ConfigError::Missing("PID.Missing".to_owned()))
        );
        assert!(matches!(
            config.require_range("PID.Histo.Fit.Name"),
            Err(ConfigError::Malformed { .. })
        ));
    }
}
