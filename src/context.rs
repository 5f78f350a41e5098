use crate::value::Value;
use glam::{Mat4, Vec3};
use std::collections::HashMap;

/// Host-provided texture access. Lookups return `None` when the map is
/// unavailable; the machine substitutes a default and reports the failure.
pub trait TextureSampler {
    fn float_texture(&self, name: &str, s: f32, t: f32) -> Option<f32>;
    fn vec3_texture(&self, name: &str, s: f32, t: f32) -> Option<Vec3>;
    fn float_environment(&self, name: &str, direction: Vec3) -> Option<f32>;
    fn vec3_environment(&self, name: &str, direction: Vec3) -> Option<Vec3>;
    fn shadow(&self, name: &str, position: Vec3) -> Option<f32>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightKind {
    Ambient,
    Solar,
    Illuminate,
}

/// One light's contribution to a grid, captured while running a light
/// shader and consumed by the surface side's integration loop. `color` and
/// `opacity` are per-sample when the light shader computed them varying.
#[derive(Debug, Clone)]
pub struct Light {
    pub kind: LightKind,
    pub color: Value,
    pub opacity: Value,
    /// Direction of light flow for solar lights.
    pub direction: Option<Vec3>,
    /// Emitting position for illuminate lights.
    pub position: Option<Vec3>,
    /// Cone restriction declared by the light itself, if any.
    pub axis: Option<Vec3>,
    pub angle: Option<f32>,
}

impl Light {
    pub fn ambient(color: Value, opacity: Value) -> Self {
        Light {
            kind: LightKind::Ambient,
            color,
            opacity,
            direction: None,
            position: None,
            axis: None,
            angle: None,
        }
    }

    pub fn solar(color: Value, opacity: Value, direction: Vec3) -> Self {
        Light {
            kind: LightKind::Solar,
            color,
            opacity,
            direction: Some(direction),
            position: None,
            axis: None,
            angle: None,
        }
    }

    pub fn illuminate(color: Value, opacity: Value, position: Vec3) -> Self {
        Light {
            kind: LightKind::Illuminate,
            color,
            opacity,
            position: Some(position),
            direction: None,
            axis: None,
            angle: None,
        }
    }
}

/// Everything the virtual machine consults outside the grid: the named
/// coordinate systems, the scene's lights, and the texture sampler. Matrices
/// map the named space into "current" (camera) space; `transform`-style
/// lookups use the inverse.
pub struct ShadingContext {
    coordinate_systems: HashMap<String, Mat4>,
    lights: Vec<Light>,
    texture_sampler: Option<Box<dyn TextureSampler>>,
}

impl Default for ShadingContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ShadingContext {
    pub fn new() -> Self {
        let mut coordinate_systems = HashMap::new();
        coordinate_systems.insert("current".to_string(), Mat4::IDENTITY);
        coordinate_systems.insert("camera".to_string(), Mat4::IDENTITY);
        ShadingContext {
            coordinate_systems,
            lights: Vec::new(),
            texture_sampler: None,
        }
    }

    /// Register `name` with the matrix taking that space's coordinates into
    /// the current space.
    pub fn add_coordinate_system(&mut self, name: &str, current_from_space: Mat4) {
        self.coordinate_systems
            .insert(name.to_string(), current_from_space);
    }

    pub fn current_from_space(&self, name: &str) -> Option<Mat4> {
        self.coordinate_systems.get(name).copied()
    }

    pub fn space_from_current(&self, name: &str) -> Option<Mat4> {
        self.coordinate_systems
            .get(name)
            .map(|matrix| matrix.inverse())
    }

    pub fn add_light(&mut self, light: Light) {
        self.lights.push(light);
    }

    pub fn add_lights(&mut self, lights: impl IntoIterator<Item = Light>) {
        self.lights.extend(lights);
    }

    pub fn lights(&self) -> &[Light] {
        &self.lights
    }

    pub fn set_texture_sampler(&mut self, sampler: Box<dyn TextureSampler>) {
        self.texture_sampler = Some(sampler);
    }

    pub fn texture_sampler(&self) -> Option<&dyn TextureSampler> {
        self.texture_sampler.as_deref()
    }
}
