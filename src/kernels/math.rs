use glam::Vec3;
use tracer_shared::{self as gpu, PathState, SceneInfo, SimpleRng, TracerConfig};

pub(crate) const EPSILON: f32 = TracerConfig::RAY_EPSILON;

#[inline]
pub(crate) fn v3(a: [f32; 3]) -> Vec3 {
    Vec3::from_array(a)
}

/// Closest intersection found by [`closest_hit`].
#[derive(Copy, Clone, Debug, PartialEq)]
pub(crate) struct Hit {
    pub t: f32,
    pub object_id: u32,
    pub material_id: u32,
    pub normal: Vec3,
}

pub(crate) fn intersect_sphere(sphere: &gpu::Sphere, origin: Vec3, direction: Vec3, t_min: f32, t_max: f32) -> Option<f32> {
    let oc = v3(sphere.center) - origin;
    let a = direction.length_squared();
    let h = direction.dot(oc);
    let c = oc.length_squared() - sphere.radius * sphere.radius;
    let discriminant = h * h - a * c;
    if discriminant < 0.0 || a == 0.0 {
        return None;
    }
    let root = discriminant.sqrt();
    [(h - root) / a, (h + root) / a]
        .into_iter()
        .find(|&t| t > t_min && t < t_max)
}

/// Moller-Trumbore.
pub(crate) fn intersect_triangle(
    triangle: &gpu::Triangle,
    origin: Vec3,
    direction: Vec3,
    t_min: f32,
    t_max: f32,
) -> Option<f32> {
    let v0 = v3(triangle.v0);
    let edge1 = v3(triangle.v1) - v0;
    let edge2 = v3(triangle.v2) - v0;
    let p = direction.cross(edge2);
    let det = edge1.dot(p);
    if det.abs() < 1e-8 {
        return None;
    }
    let inv_det = 1.0 / det;
    let s = origin - v0;
    let u = s.dot(p) * inv_det;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }
    let q = s.cross(edge1);
    let v = direction.dot(q) * inv_det;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }
    let t = edge2.dot(q) * inv_det;
    (t > t_min && t < t_max).then_some(t)
}

pub(crate) fn triangle_normal(triangle: &gpu::Triangle) -> Vec3 {
    let v0 = v3(triangle.v0);
    (v3(triangle.v1) - v0).cross(v3(triangle.v2) - v0).normalize_or_zero()
}

/// Brute-force closest hit. Spheres take object ids `0..num_spheres`,
/// triangles follow.
pub(crate) fn closest_hit(
    info: &SceneInfo,
    spheres: &[gpu::Sphere],
    triangles: &[gpu::Triangle],
    origin: Vec3,
    direction: Vec3,
) -> Option<Hit> {
    let mut best: Option<Hit> = None;
    let mut t_max = f32::INFINITY;

    for (i, sphere) in spheres.iter().take(info.num_spheres as usize).enumerate() {
        if let Some(t) = intersect_sphere(sphere, origin, direction, EPSILON, t_max) {
            t_max = t;
            let point = origin + direction * t;
            best = Some(Hit {
                t,
                object_id: i as u32,
                material_id: sphere.material_id,
                normal: (point - v3(sphere.center)) / sphere.radius,
            });
        }
    }
    for (j, triangle) in triangles.iter().take(info.num_triangles as usize).enumerate() {
        if let Some(t) = intersect_triangle(triangle, origin, direction, EPSILON, t_max) {
            t_max = t;
            best = Some(Hit {
                t,
                object_id: info.num_spheres + j as u32,
                material_id: triangle.material_id,
                normal: triangle_normal(triangle),
            });
        }
    }

    best.map(|mut hit| {
        if hit.normal.dot(direction) > 0.0 {
            hit.normal = -hit.normal;
        }
        hit
    })
}

/// Whether anything blocks the open segment `(EPSILON, max_t)` along the ray.
pub(crate) fn occluded(
    info: &SceneInfo,
    spheres: &[gpu::Sphere],
    triangles: &[gpu::Triangle],
    origin: Vec3,
    direction: Vec3,
    max_t: f32,
) -> bool {
    spheres
        .iter()
        .take(info.num_spheres as usize)
        .any(|s| intersect_sphere(s, origin, direction, EPSILON, max_t).is_some())
        || triangles
            .iter()
            .take(info.num_triangles as usize)
            .any(|t| intersect_triangle(t, origin, direction, EPSILON, max_t).is_some())
}

pub(crate) fn random_unit_vector(rng: &mut SimpleRng) -> Vec3 {
    let z = rng.next_f32() * 2.0 - 1.0;
    let phi = rng.next_f32() * std::f32::consts::TAU;
    let r = (1.0 - z * z).max(0.0).sqrt();
    Vec3::new(r * phi.cos(), r * phi.sin(), z)
}

pub(crate) fn reflect(direction: Vec3, normal: Vec3) -> Vec3 {
    direction - 2.0 * direction.dot(normal) * normal
}

/// White-to-blue gradient seen by escaping rays.
pub(crate) fn sky(direction: Vec3) -> Vec3 {
    let a = 0.5 * (direction.normalize_or_zero().y + 1.0);
    (1.0 - a) * Vec3::ONE + a * Vec3::new(0.5, 0.7, 1.0)
}

/// Running average after adding one more sample.
pub(crate) fn expand_average(average: Vec3, samples: u32, sample: Vec3) -> Vec3 {
    let n = samples as f32;
    average * (n / (n + 1.0)) + sample / (n + 1.0)
}

/// Move the staged light estimate into the sample radiance.
pub(crate) fn fold_staged(path: &mut PathState) {
    let staged = v3(path.latest_radiance_sample);
    path.accumulated_radiance = (v3(path.accumulated_radiance) + staged).to_array();
    path.latest_radiance_sample = [0.0; 3];
}
