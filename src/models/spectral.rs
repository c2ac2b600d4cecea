//! Spectral models.
//!
//! Energies are in TeV and differential fluxes in `cm⁻² s⁻¹ TeV⁻¹`. The
//! `PowerLawNorm` form is dimensionless and is meant to multiply a template
//! that already carries intensity units.

use serde::{Deserialize, Serialize};

use crate::math::integrate_log_simpson;
use crate::models::parameter::{Parameter, Parameters};

/// Sub-intervals used when a spectrum has no closed-form integral.
const INTEGRAL_INTERVALS: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpectralKind {
    #[serde(rename = "PowerLawSpectralModel", alias = "pl")]
    PowerLaw,
    #[serde(rename = "PowerLawNormSpectralModel", alias = "pl-norm")]
    PowerLawNorm,
    #[serde(rename = "LogParabolaSpectralModel", alias = "lp")]
    LogParabola,
    #[serde(rename = "ConstantSpectralModel", alias = "const")]
    Constant,
}

impl SpectralKind {
    pub fn type_name(self) -> &'static str {
        match self {
            SpectralKind::PowerLaw => "PowerLawSpectralModel",
            SpectralKind::PowerLawNorm => "PowerLawNormSpectralModel",
            SpectralKind::LogParabola => "LogParabolaSpectralModel",
            SpectralKind::Constant => "ConstantSpectralModel",
        }
    }

    fn default_parameters(self) -> Vec<Parameter> {
        match self {
            SpectralKind::PowerLaw => vec![
                Parameter::new("index", 2.0, ""),
                Parameter::new("amplitude", 1e-12, "cm-2 s-1 TeV-1").with_bounds(Some(0.0), None),
                Parameter::new("reference", 1.0, "TeV").frozen(),
            ],
            SpectralKind::PowerLawNorm => vec![
                Parameter::new("norm", 1.0, "").with_bounds(Some(0.0), None),
                Parameter::new("tilt", 0.0, "").frozen(),
                Parameter::new("reference", 1.0, "TeV").frozen(),
            ],
            SpectralKind::LogParabola => vec![
                Parameter::new("amplitude", 1e-12, "cm-2 s-1 TeV-1").with_bounds(Some(0.0), None),
                Parameter::new("reference", 1.0, "TeV").frozen(),
                Parameter::new("alpha", 2.0, ""),
                Parameter::new("beta", 0.0, ""),
            ],
            SpectralKind::Constant => vec![Parameter::new("const", 1e-12, "cm-2 s-1 TeV-1")],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectralModel {
    #[serde(rename = "type")]
    pub kind: SpectralKind,
    #[serde(default)]
    pub parameters: Parameters,
}

impl SpectralModel {
    /// Complete the parameter list with this kind's defaults.
    pub fn with_defaults(self) -> Result<Self, String> {
        let parameters =
            Parameters::merged(self.kind.default_parameters(), &self.parameters, self.kind.type_name())?;
        Ok(Self {
            kind: self.kind,
            parameters,
        })
    }

    pub fn power_law(amplitude: f64, index: f64, reference: f64) -> Self {
        Self {
            kind: SpectralKind::PowerLaw,
            parameters: Parameters::new(vec![
                Parameter::new("index", index, ""),
                Parameter::new("amplitude", amplitude, "cm-2 s-1 TeV-1").with_bounds(Some(0.0), None),
                Parameter::new("reference", reference, "TeV").frozen(),
            ]),
        }
    }

    pub fn power_law_norm(norm: f64, tilt: f64, reference: f64) -> Self {
        Self {
            kind: SpectralKind::PowerLawNorm,
            parameters: Parameters::new(vec![
                Parameter::new("norm", norm, "").with_bounds(Some(0.0), None),
                Parameter::new("tilt", tilt, "").frozen(),
                Parameter::new("reference", reference, "TeV").frozen(),
            ]),
        }
    }

    pub fn log_parabola(amplitude: f64, reference: f64, alpha: f64, beta: f64) -> Self {
        Self {
            kind: SpectralKind::LogParabola,
            parameters: Parameters::new(vec![
                Parameter::new("amplitude", amplitude, "cm-2 s-1 TeV-1").with_bounds(Some(0.0), None),
                Parameter::new("reference", reference, "TeV").frozen(),
                Parameter::new("alpha", alpha, ""),
                Parameter::new("beta", beta, ""),
            ]),
        }
    }

    pub fn unfreeze(&mut self) {
        let defaults = self.kind.default_parameters();
        for p in self.parameters.iter_mut() {
            p.frozen = defaults.iter().any(|d| d.name == p.name && d.frozen);
        }
    }

    /// Differential flux at `energy` (TeV).
    pub fn evaluate(&self, energy: f64) -> f64 {
        let p = &self.parameters;
        match self.kind {
            SpectralKind::PowerLaw => {
                p.value("amplitude") * (energy / p.value("reference")).powf(-p.value("index"))
            }
            SpectralKind::PowerLawNorm => {
                p.value("norm") * (energy / p.value("reference")).powf(-p.value("tilt"))
            }
            SpectralKind::LogParabola => {
                let x = energy / p.value("reference");
                p.value("amplitude") * x.powf(-p.value("alpha") - p.value("beta") * x.ln())
            }
            SpectralKind::Constant => p.value("const"),
        }
    }

    /// Integral of the differential flux over `[emin, emax]` (TeV).
    pub fn integral(&self, emin: f64, emax: f64) -> f64 {
        let p = &self.parameters;
        match self.kind {
            SpectralKind::PowerLaw => {
                power_law_integral(p.value("amplitude"), p.value("index"), p.value("reference"), emin, emax)
            }
            SpectralKind::PowerLawNorm => {
                power_law_integral(p.value("norm"), p.value("tilt"), p.value("reference"), emin, emax)
            }
            SpectralKind::Constant => p.value("const") * (emax - emin),
            SpectralKind::LogParabola => {
                integrate_log_simpson(|e| self.evaluate(e), emin, emax, INTEGRAL_INTERVALS)
            }
        }
    }
}

fn power_law_integral(amplitude: f64, index: f64, reference: f64, emin: f64, emax: f64) -> f64 {
    if (index - 1.0).abs() < 1e-9 {
        return amplitude * reference * (emax / emin).ln();
    }
    let k = 1.0 - index;
    amplitude * reference / k * ((emax / reference).powf(k) - (emin / reference).powf(k))
}
