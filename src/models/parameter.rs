//! Model parameters.

use serde::{Deserialize, Serialize};

/// A named model parameter.
///
/// `frozen` parameters keep their value during a fit; the optimizer only sees
/// the others.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub value: f64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub unit: String,
    #[serde(default)]
    pub frozen: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

impl Parameter {
    pub fn new(name: &str, value: f64, unit: &str) -> Self {
        Self {
            name: name.to_string(),
            value,
            unit: unit.to_string(),
            frozen: false,
            min: None,
            max: None,
        }
    }

    pub fn frozen(mut self) -> Self {
        self.frozen = true;
        self
    }

    pub fn with_bounds(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    /// Clamp `value` into `[min, max]`.
    pub fn clamp(&self, value: f64) -> f64 {
        let lo = self.min.unwrap_or(f64::NEG_INFINITY);
        let hi = self.max.unwrap_or(f64::INFINITY);
        value.max(lo).min(hi)
    }
}

/// Ordered parameter list of one spectral or spatial model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Parameters(Vec<Parameter>);

impl Parameters {
    pub fn new(params: Vec<Parameter>) -> Self {
        Self(params)
    }

    /// Merge user-supplied parameters into a model's defaults.
    ///
    /// Unknown names are rejected; parameters not given keep their default.
    /// The result is in the order of `defaults`.
    pub fn merged(defaults: Vec<Parameter>, given: &Parameters, model: &str) -> Result<Self, String> {
        if let Some(unknown) = given
            .iter()
            .find(|p| !defaults.iter().any(|d| d.name == p.name))
        {
            return Err(format!("unknown parameter '{}' for {model}", unknown.name));
        }
        let merged = defaults
            .into_iter()
            .map(|d| match given.get(&d.name) {
                Some(g) => Parameter {
                    unit: if g.unit.is_empty() { d.unit.clone() } else { g.unit.clone() },
                    min: g.min.or(d.min),
                    max: g.max.or(d.max),
                    ..g.clone()
                },
                None => d,
            })
            .collect();
        Ok(Self(merged))
    }

    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.0.iter().find(|p| p.name == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Parameter> {
        self.0.iter_mut().find(|p| p.name == name)
    }

    /// Value of `name`, NaN when absent.
    pub fn value(&self, name: &str) -> f64 {
        self.get(name).map(|p| p.value).unwrap_or(f64::NAN)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Parameter> {
        self.0.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Parameter> {
        self.0.iter_mut()
    }

    pub fn by_index(&self, idx: usize) -> Option<&Parameter> {
        self.0.get(idx)
    }

    pub fn by_index_mut(&mut self, idx: usize) -> Option<&mut Parameter> {
        self.0.get_mut(idx)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn set_frozen(&mut self, frozen: bool) {
        for p in &mut self.0 {
            p.frozen = frozen;
        }
    }

    pub fn free_count(&self) -> usize {
        self.0.iter().filter(|p| !p.frozen).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merged_keeps_defaults_and_overrides() {
        let defaults = vec![
            Parameter::new("norm", 1.0, ""),
            Parameter::new("tilt", 0.0, "").frozen(),
        ];
        let given = Parameters::new(vec![Parameter::new("norm", 2.5, "")]);
        let merged = Parameters::merged(defaults, &given, "PowerLawNorm").unwrap();
        assert_eq!(merged.value("norm"), 2.5);
        assert_eq!(merged.value("tilt"), 0.0);
        assert!(merged.get("tilt").unwrap().frozen);
    }

    #[test]
    fn merged_rejects_unknown_names() {
        let given = Parameters::new(vec![Parameter::new("amplitude", 1.0, "")]);
        let err = Parameters::merged(vec![Parameter::new("norm", 1.0, "")], &given, "X").unwrap_err();
        assert!(err.contains("amplitude"));
    }

    #[test]
    fn clamp_respects_bounds() {
        let p = Parameter::new("norm", 1.0, "").with_bounds(Some(0.0), Some(10.0));
        assert_eq!(p.clamp(-1.0), 0.0);
        assert_eq!(p.clamp(11.0), 10.0);
        assert_eq!(p.clamp(3.0), 3.0);
    }
}
