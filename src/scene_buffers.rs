use std::collections::HashMap;
use std::sync::Arc;

use log::debug;
use tracer_shared as gpu;

use crate::camera::Camera;
use crate::error::{TracerError, TracerResult};
use crate::scene::{Material, Primitive, Scene};

/// Flat, device-ready copy of a scene and camera.
///
/// Immutable once built; the pipeline uploads each array into its own buffer.
#[derive(Clone, Debug, PartialEq)]
pub struct SceneBuffers {
    pub info: gpu::SceneInfo,
    pub spheres: Vec<gpu::Sphere>,
    pub triangles: Vec<gpu::Triangle>,
    pub materials: Vec<gpu::Material>,
    pub lights: Vec<gpu::Light>,
}

/// Assigns table indices to material objects in first-seen order.
#[derive(Default)]
struct MaterialTable {
    indices: HashMap<*const Material, u32>,
    entries: Vec<gpu::Material>,
}

impl MaterialTable {
    fn index_of(&mut self, material: &Arc<Material>) -> TracerResult<u32> {
        let key = Arc::as_ptr(material);
        if let Some(&index) = self.indices.get(&key) {
            return Ok(index);
        }
        let entry = match material.as_ref() {
            Material::Diffuse { albedo, color } => gpu::Material::diffuse(color.to_array(), *albedo),
            Material::Reflective {
                albedo,
                color,
                roughness,
            } => gpu::Material::reflective(color.to_array(), *albedo, *roughness),
            unsupported @ Material::Dielectric { .. } => {
                return Err(TracerError::UnsupportedMaterial(unsupported.name()))
            }
        };
        let index = self.entries.len() as u32;
        self.entries.push(entry);
        self.indices.insert(key, index);
        Ok(index)
    }
}

impl SceneBuffers {
    pub fn build(scene: &Scene, camera: &Camera) -> TracerResult<Self> {
        let mut materials = MaterialTable::default();
        let mut spheres = Vec::new();
        let mut triangles = Vec::new();

        for primitive in scene.primitives() {
            let material_id = materials.index_of(primitive.material())?;
            match primitive {
                Primitive::Sphere(sphere) => {
                    spheres.push(gpu::Sphere::new(sphere.center.to_array(), sphere.radius, material_id));
                }
                Primitive::Triangle(triangle) => {
                    let [v0, v1, v2] = triangle.vertices;
                    triangles.push(gpu::Triangle::new(
                        v0.to_array(),
                        v1.to_array(),
                        v2.to_array(),
                        material_id,
                    ));
                }
            }
        }

        let lights: Vec<gpu::Light> = scene
            .lights()
            .iter()
            .map(|light| gpu::Light::new(light.position.to_array(), light.color.to_array(), light.intensity))
            .collect();

        let materials = materials.entries;
        let info = Self::scene_info(camera, spheres.len(), triangles.len(), lights.len(), materials.len());

        debug!(
            "Scene buffers: {} spheres, {} triangles, {} materials, {} lights",
            spheres.len(),
            triangles.len(),
            materials.len(),
            lights.len()
        );

        Ok(Self {
            info,
            spheres,
            triangles,
            materials,
            lights,
        })
    }

    fn scene_info(
        camera: &Camera,
        num_spheres: usize,
        num_triangles: usize,
        num_lights: usize,
        num_materials: usize,
    ) -> gpu::SceneInfo {
        let frustum = camera.frustum();
        gpu::SceneInfo {
            camera_position: camera.position.to_array(),
            num_spheres: num_spheres as u32,
            frustum_top_left: frustum.top_left.to_array(),
            num_triangles: num_triangles as u32,
            frustum_horizontal: frustum.horizontal.to_array(),
            num_lights: num_lights as u32,
            frustum_vertical: frustum.vertical.to_array(),
            max_depth: camera.max_depth,
            image_width: camera.width,
            image_height: camera.height,
            num_materials: num_materials as u32,
            scan_offset: 0,
        }
    }

    /// Same geometry seen through another camera.
    pub fn with_camera(&self, camera: &Camera) -> Self {
        let mut rebuilt = self.clone();
        rebuilt.info = Self::scene_info(
            camera,
            self.spheres.len(),
            self.triangles.len(),
            self.lights.len(),
            self.materials.len(),
        );
        rebuilt
    }
}

/// Bytes of `items` for upload, padded to one zeroed element when empty.
///
/// Storage bindings cannot be zero-sized; counts in `SceneInfo` stay authoritative.
pub fn device_bytes<T: bytemuck::Pod>(items: &[T]) -> Vec<u8> {
    if items.is_empty() {
        vec![0; std::mem::size_of::<T>()]
    } else {
        bytemuck::cast_slice(items).to_vec()
    }
}
