#[derive(PartialEq, Default, Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct Data {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
}

impl Data {
    pub fn len(&self) -> usize {
        self.x.len().min(self.y.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn points(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.x.iter().copied().zip(self.y.iter().copied())
    }
}

#[derive(PartialEq, Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct Parameter {
    pub name: String,
    pub min: f64,
    pub max: f64,
    pub initial_guess: f64,
    pub vary: bool,
    pub value: Option<f64>,
    pub uncertainty: Option<f64>,
}

impl Default for Parameter {
    fn default() -> Self {
        Self {
            name: String::new(),
            min: f64::NEG_INFINITY,
            max: f64::INFINITY,
            initial_guess: 0.0,
            vary: true,
            value: None,
            uncertainty: None,
        }
    }
}

impl Parameter {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            ..Default::default()
        }
    }

    /// Where the next fit starts: the last fitted value if any, else the guess, inside the limits.
    pub fn start(&self) -> f64 {
        self.clamp(self.value.unwrap_or(self.initial_guess))
    }

    pub fn clamp(&self, x: f64) -> f64 {
        if self.min <= self.max {
            x.clamp(self.min, self.max)
        } else {
            x
        }
    }

    pub fn set_limits(&mut self, min: f64, max: f64) {
        let (min, max) = if min <= max { (min, max) } else { (max, min) };
        self.min = min;
        self.max = max;
        self.initial_guess = self.clamp(self.initial_guess);
        if let Some(value) = self.value {
            self.value = Some(self.clamp(value));
        }
    }

    pub fn fix(&mut self, value: f64) {
        self.initial_guess = value;
        self.value = None;
        self.vary = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limits_clamp_the_guess() {
        let mut p = Parameter::named("mean");
        p.initial_guess = 12.0;
        p.set_limits(10.0, 0.0);
        assert_eq!((p.min, p.max), (0.0, 10.0));
        assert_eq!(p.initial_guess, 10.0);
        p.value = Some(4.0);
        assert_eq!(p.start(), 4.0);
    }
}
