//! Sky model components and the combined model collection.

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::parameter::Parameter;
use crate::models::spatial::SpatialModel;
use crate::models::spectral::SpectralModel;

/// One emission component: a spectrum times a spatial morphology.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkyModel {
    pub name: String,
    pub spectral: SpectralModel,
    pub spatial: SpatialModel,
}

impl SkyModel {
    pub fn new(name: impl Into<String>, spectral: SpectralModel, spatial: SpatialModel) -> Self {
        Self {
            name: name.into(),
            spectral,
            spatial,
        }
    }

    pub fn freeze(&mut self) {
        self.spectral.parameters.set_frozen(true);
        self.spatial.parameters.set_frozen(true);
    }

    /// Make the component fittable: every parameter returns to its default
    /// frozen state (reference energies and similar stay fixed).
    pub fn unfreeze(&mut self) {
        self.spectral.unfreeze();
        self.spatial.unfreeze();
    }

    pub fn free_parameter_count(&self) -> usize {
        self.spectral.parameters.free_count() + self.spatial.parameters.free_count()
    }

    pub fn parameters(&self) -> impl Iterator<Item = &Parameter> {
        self.spectral.parameters.iter().chain(self.spatial.parameters.iter())
    }
}

/// Which parameter list of a component a [`ParameterRef`] points into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterSlot {
    Spectral,
    Spatial,
}

/// Stable handle to one parameter inside a [`Models`] collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParameterRef {
    pub component: usize,
    pub slot: ParameterSlot,
    pub index: usize,
}

/// Ordered collection of uniquely named components.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Models {
    components: Vec<SkyModel>,
}

impl Models {
    pub fn new(components: Vec<SkyModel>) -> Result<Self, AppError> {
        let mut models = Self::default();
        for c in components {
            models.append(c)?;
        }
        Ok(models)
    }

    pub fn append(&mut self, model: SkyModel) -> Result<(), AppError> {
        if self.get(&model.name).is_some() {
            return Err(AppError::config(format!("duplicate model component '{}'", model.name)));
        }
        self.components.push(model);
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Result<SkyModel, AppError> {
        let idx = self
            .components
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| AppError::config(format!("model component '{name}' not found")))?;
        Ok(self.components.remove(idx))
    }

    pub fn get(&self, name: &str) -> Option<&SkyModel> {
        self.components.iter().find(|c| c.name == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut SkyModel> {
        self.components.iter_mut().find(|c| c.name == name)
    }

    pub fn freeze(&mut self) {
        for c in &mut self.components {
            c.freeze();
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &SkyModel> {
        self.components.iter()
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.components.iter().map(|c| c.name.as_str()).collect()
    }

    /// Handles to every parameter that is not frozen, in component order.
    pub fn free_parameters(&self) -> Vec<ParameterRef> {
        let mut out = Vec::new();
        for (ci, c) in self.components.iter().enumerate() {
            let slots = [
                (ParameterSlot::Spectral, &c.spectral.parameters),
                (ParameterSlot::Spatial, &c.spatial.parameters),
            ];
            for (slot, params) in slots {
                for (pi, p) in params.iter().enumerate() {
                    if !p.frozen {
                        out.push(ParameterRef {
                            component: ci,
                            slot,
                            index: pi,
                        });
                    }
                }
            }
        }
        out
    }

    pub fn parameter(&self, r: ParameterRef) -> Option<&Parameter> {
        let c = self.components.get(r.component)?;
        match r.slot {
            ParameterSlot::Spectral => c.spectral.parameters.by_index(r.index),
            ParameterSlot::Spatial => c.spatial.parameters.by_index(r.index),
        }
    }

    /// Set a parameter value, clamped to its bounds. Returns the stored value.
    pub fn set_value(&mut self, r: ParameterRef, value: f64) -> Option<f64> {
        let c = self.components.get_mut(r.component)?;
        let p = match r.slot {
            ParameterSlot::Spectral => c.spectral.parameters.by_index_mut(r.index)?,
            ParameterSlot::Spatial => c.spatial.parameters.by_index_mut(r.index)?,
        };
        p.value = p.clamp(value);
        Some(p.value)
    }

    /// `component.parameter` label for logs and reports.
    pub fn label(&self, r: ParameterRef) -> String {
        match (self.components.get(r.component), self.parameter(r)) {
            (Some(c), Some(p)) => format!("{}.{}", c.name, p.name),
            _ => "?".to_string(),
        }
    }
}
