use std::sync::Arc;

use glam::Vec3;

use crate::error::{TracerError, TracerResult};

/// Surface description shared by reference between primitives.
///
/// Two primitives use "the same material" only when they hold the same `Arc`;
/// equal field values in different allocations stay distinct materials.
#[derive(Clone, Debug, PartialEq)]
pub enum Material {
    Diffuse { albedo: f32, color: Vec3 },
    Reflective { albedo: f32, color: Vec3, roughness: f32 },
    /// Glass. Only the host-side scene model knows this kind.
    Dielectric { ior: f32 },
}

impl Material {
    pub fn diffuse(albedo: f32, color: Vec3) -> Arc<Self> {
        Arc::new(Self::Diffuse { albedo, color })
    }

    pub fn reflective(albedo: f32, color: Vec3, roughness: f32) -> Arc<Self> {
        Arc::new(Self::Reflective {
            albedo,
            color,
            roughness: roughness.clamp(0.0, 1.0),
        })
    }

    pub fn dielectric(ior: f32) -> Arc<Self> {
        Arc::new(Self::Dielectric { ior })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Diffuse { .. } => "diffuse",
            Self::Reflective { .. } => "reflective",
            Self::Dielectric { .. } => "dielectric",
        }
    }
}

#[derive(Clone, Debug)]
pub struct Sphere {
    pub center: Vec3,
    pub radius: f32,
    pub material: Arc<Material>,
}

#[derive(Clone, Debug)]
pub struct Triangle {
    pub vertices: [Vec3; 3],
    pub material: Arc<Material>,
}

#[derive(Clone, Debug)]
pub enum Primitive {
    Sphere(Sphere),
    Triangle(Triangle),
}

impl Primitive {
    pub fn material(&self) -> &Arc<Material> {
        match self {
            Self::Sphere(sphere) => &sphere.material,
            Self::Triangle(triangle) => &triangle.material,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PointLight {
    pub position: Vec3,
    pub color: Vec3,
    pub intensity: f32,
}

/// Host-side scene: primitives in insertion order plus point lights
#[derive(Clone, Debug, Default)]
pub struct Scene {
    primitives: Vec<Primitive>,
    lights: Vec<PointLight>,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_sphere(&mut self, center: Vec3, radius: f32, material: &Arc<Material>) -> TracerResult<&mut Self> {
        if !(radius > 0.0) || !radius.is_finite() {
            return Err(TracerError::InvalidGeometry(format!(
                "sphere at {center} has non-positive radius {radius}"
            )));
        }
        self.primitives.push(Primitive::Sphere(Sphere {
            center,
            radius,
            material: Arc::clone(material),
        }));
        Ok(self)
    }

    pub fn add_triangle(&mut self, v0: Vec3, v1: Vec3, v2: Vec3, material: &Arc<Material>) -> TracerResult<&mut Self> {
        let area = (v1 - v0).cross(v2 - v0).length();
        if !(area > f32::EPSILON) {
            return Err(TracerError::InvalidGeometry(format!(
                "triangle ({v0}, {v1}, {v2}) is degenerate"
            )));
        }
        self.primitives.push(Primitive::Triangle(Triangle {
            vertices: [v0, v1, v2],
            material: Arc::clone(material),
        }));
        Ok(self)
    }

    pub fn add_light(&mut self, position: Vec3, color: Vec3, intensity: f32) -> &mut Self {
        self.lights.push(PointLight {
            position,
            color,
            intensity: intensity.max(0.0),
        });
        self
    }

    pub fn primitives(&self) -> &[Primitive] {
        &self.primitives
    }

    pub fn lights(&self) -> &[PointLight] {
        &self.lights
    }

    /// Ground, three spheres, a mirror panel and one light, in front of a camera
    /// at the origin looking down +Z.
    pub fn demo() -> TracerResult<Self> {
        let ground = Material::diffuse(0.5, Vec3::new(0.8, 0.8, 0.0));
        let centre = Material::diffuse(0.5, Vec3::new(0.1, 0.2, 0.5));
        let mirror = Material::reflective(0.9, Vec3::new(0.8, 0.8, 0.8), 0.0);
        let brushed = Material::reflective(1.0, Vec3::new(0.8, 0.6, 0.2), 0.3);

        let mut scene = Self::new();
        scene
            .add_sphere(Vec3::new(0.0, -100.5, 1.0), 100.0, &ground)?
            .add_sphere(Vec3::new(0.0, 0.0, 1.2), 0.5, &centre)?
            .add_sphere(Vec3::new(-1.0, 0.0, 1.0), 0.5, &brushed)?
            .add_sphere(Vec3::new(1.0, 0.0, 1.0), 0.5, &brushed)?
            .add_triangle(
                Vec3::new(-2.0, -0.5, 3.0),
                Vec3::new(2.0, -0.5, 3.0),
                Vec3::new(0.0, 2.0, 3.0),
                &mirror,
            )?;
        scene.add_light(Vec3::new(0.0, 3.0, 0.0), Vec3::ONE, 6.0);
        Ok(scene)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_invalid_geometry() {
        let material = Material::diffuse(0.5, Vec3::ONE);
        let mut scene = Scene::new();
        assert!(matches!(
            scene.add_sphere(Vec3::ZERO, 0.0, &material),
            Err(TracerError::InvalidGeometry(_))
        ));
        assert!(matches!(
            scene.add_triangle(Vec3::ZERO, Vec3::X, Vec3::X * 2.0, &material),
            Err(TracerError::InvalidGeometry(_))
        ));
        assert!(scene.primitives().is_empty());
    }

    #[test]
    fn primitives_share_material_by_reference() {
        let material = Material::diffuse(0.5, Vec3::ONE);
        let mut scene = Scene::new();
        scene
            .add_sphere(Vec3::ZERO, 1.0, &material)
            .unwrap()
            .add_sphere(Vec3::X * 3.0, 1.0, &material)
            .unwrap();
        let [a, b] = scene.primitives() else { panic!("expected two primitives") };
        assert!(Arc::ptr_eq(a.material(), b.material()));
    }

    #[test]
    fn demo_scene_builds() {
        let scene = Scene::demo().unwrap();
        assert_eq!(scene.primitives().len(), 5);
        assert_eq!(scene.lights().len(), 1);
    }
}
