use std::f32::consts::PI;

use glam::Vec3;
use tracer_shared::{
    self as gpu, flags, queue_index, status, PathState, QueueState, SceneInfo, SimpleRng, TracerConfig, MISS_DISTANCE,
};

use super::math::{fold_staged, random_unit_vector, reflect, v3, EPSILON};
use super::queue::{begin_consume, pop, push};
use super::{path_mut, scene_info};
use crate::device::host::KernelContext;
use crate::error::{TracerError, TracerResult};

/// Buffers shared by both shade kernels, in binding order after the scene info.
struct ShadeTargets<'a> {
    states: &'a mut [QueueState],
    extend_slots: &'a mut [u32],
    shadow_slots: &'a mut [u32],
}

/// Light sample toward one randomly chosen point light.
struct LightSample {
    direction: Vec3,
    distance: f32,
    radiance: Vec3,
}

fn sample_light(info: &SceneInfo, lights: &[gpu::Light], point: Vec3, rng: &mut SimpleRng) -> Option<LightSample> {
    let count = (info.num_lights as usize).min(lights.len());
    if count == 0 {
        return None;
    }
    let pick = ((rng.next_f32() * count as f32) as usize).min(count - 1);
    let light = &lights[pick];
    let to_light = v3(light.position) - point;
    let distance_squared = to_light.length_squared();
    if distance_squared <= EPSILON * EPSILON {
        return None;
    }
    let distance = distance_squared.sqrt();
    Some(LightSample {
        direction: to_light / distance,
        distance,
        // Uniform pick: scale by the light count to keep the estimate unbiased.
        radiance: v3(light.color) * light.intensity / distance_squared * count as f32,
    })
}

/// Stage a light estimate and queue the visibility test that confirms it.
fn stage_shadow_ray(
    path: &mut PathState,
    targets: &mut ShadeTargets<'_>,
    index: u32,
    origin: Vec3,
    sample: &LightSample,
    contribution: Vec3,
) {
    path.latest_radiance_sample = contribution.to_array();
    path.shadow_origin = origin.to_array();
    path.shadow_direction = sample.direction.to_array();
    path.shadow_distance = sample.distance;
    if push(targets.states, targets.shadow_slots, queue_index::SHADOW_RAY, index) {
        path.flags |= flags::SHADOW_PENDING;
    } else {
        path.latest_radiance_sample = [0.0; 3];
    }
}

/// Bounce bookkeeping shared by both shade kernels: depth limit, Russian
/// roulette, then queue the continuation ray for Extend.
fn continue_path(
    path: &mut PathState,
    targets: &mut ShadeTargets<'_>,
    index: u32,
    origin: Vec3,
    direction: Vec3,
    max_depth: u32,
    rng: &mut SimpleRng,
) {
    path.depth += 1;
    if path.depth >= max_depth {
        path.status = status::DONE;
        return;
    }
    if path.depth >= TracerConfig::RUSSIAN_ROULETTE_DEPTH {
        let survival = v3(path.throughput)
            .max_element()
            .clamp(TracerConfig::MIN_SURVIVAL_PROBABILITY, 1.0);
        if rng.next_f32() >= survival {
            path.status = status::DONE;
            return;
        }
        path.throughput = (v3(path.throughput) / survival).to_array();
    }
    path.origin = origin.to_array();
    path.direction = direction.to_array();
    path.t = MISS_DISTANCE;
    path.status = if push(targets.states, targets.extend_slots, queue_index::EXTEND_RAY, index) {
        status::EXTENDING
    } else {
        status::DONE
    };
}

fn material_of<'m>(materials: &'m [gpu::Material], path: &PathState) -> TracerResult<&'m gpu::Material> {
    materials
        .get(path.material_id as usize)
        .ok_or_else(|| TracerError::dispatch("shade", format!("material {} out of range", path.material_id)))
}

type Shader = fn(&SceneInfo, &[gpu::Light], &gpu::Material, &mut PathState, &mut ShadeTargets<'_>, u32, &mut SimpleRng);

/// Common driver: consume `queue`, run `shader` on every popped path.
///
/// Arguments: scene info, materials, lights, queue states, the consumed shade
/// queue, ExtendRay queue, ShadowRay queue, path states.
fn shade_queue(ctx: &mut KernelContext<'_>, queue: usize, shader: Shader) -> TracerResult<()> {
    let work_items = ctx.work_items();
    let [scene, materials, lights, queue_states, consumed, extend_queue, shadow_queue, paths] = ctx.bind::<8>()?;
    let info = scene_info(scene)?;
    let materials = materials.view::<gpu::Material>()?;
    let lights = lights.view::<gpu::Light>()?;
    let shade_slots = consumed.view::<u32>()?;
    let paths = paths.view_mut::<PathState>()?;
    let mut targets = ShadeTargets {
        states: queue_states.view_mut::<QueueState>()?,
        extend_slots: extend_queue.view_mut::<u32>()?,
        shadow_slots: shadow_queue.view_mut::<u32>()?,
    };

    begin_consume(targets.states, queue, work_items);

    for item in 0..work_items {
        let index = pop(targets.states, shade_slots, queue, item)?;
        let path = path_mut(paths, index)?;
        let material = material_of(materials, path)?;
        let mut rng = SimpleRng::new(path.rng_state);
        if !path.has_flag(flags::SHADOW_PENDING) {
            fold_staged(path);
        }
        shader(&info, lights, material, path, &mut targets, index, &mut rng);
        path.rng_state = rng.state();
    }
    Ok(())
}

fn diffuse_bounce(
    info: &SceneInfo,
    lights: &[gpu::Light],
    material: &gpu::Material,
    path: &mut PathState,
    targets: &mut ShadeTargets<'_>,
    index: u32,
    rng: &mut SimpleRng,
) {
    let normal = v3(path.normal);
    let point = v3(path.origin) + v3(path.direction) * path.t;
    let offset_origin = point + normal * EPSILON;
    let reflectance = v3(material.reflectance());
    let throughput = v3(path.throughput);

    if !path.has_flag(flags::SHADOW_PENDING) {
        if let Some(sample) = sample_light(info, lights, offset_origin, rng) {
            let cosine = normal.dot(sample.direction);
            if cosine > 0.0 {
                let contribution = throughput * reflectance / PI * sample.radiance * cosine;
                stage_shadow_ray(path, targets, index, offset_origin, &sample, contribution);
            }
        }
    }

    let scattered = normal + random_unit_vector(rng);
    let direction = if scattered.length_squared() < 1e-8 { normal } else { scattered.normalize() };
    path.throughput = (throughput * reflectance).to_array();
    continue_path(path, targets, index, offset_origin, direction, info.max_depth, rng);
}

fn reflective_bounce(
    info: &SceneInfo,
    lights: &[gpu::Light],
    material: &gpu::Material,
    path: &mut PathState,
    targets: &mut ShadeTargets<'_>,
    index: u32,
    rng: &mut SimpleRng,
) {
    let normal = v3(path.normal);
    let point = v3(path.origin) + v3(path.direction) * path.t;
    let offset_origin = point + normal * EPSILON;
    let reflectance = v3(material.reflectance());
    let throughput = v3(path.throughput);

    let mirrored = reflect(v3(path.direction).normalize_or_zero(), normal);
    let scattered = mirrored + material.roughness * random_unit_vector(rng);
    if scattered.dot(normal) <= 0.0 {
        // Perturbed below the surface: absorbed.
        path.status = status::DONE;
        return;
    }

    if material.roughness > 0.0 && !path.has_flag(flags::SHADOW_PENDING) {
        if let Some(sample) = sample_light(info, lights, offset_origin, rng) {
            let cosine = normal.dot(sample.direction);
            let exponent = (2.0 / (material.roughness * material.roughness)).max(1.0);
            let lobe = mirrored.dot(sample.direction).max(0.0).powf(exponent);
            if cosine > 0.0 && lobe > 0.0 {
                let contribution = throughput * reflectance * sample.radiance * lobe * cosine;
                stage_shadow_ray(path, targets, index, offset_origin, &sample, contribution);
            }
        }
    }

    path.throughput = (throughput * reflectance).to_array();
    continue_path(path, targets, index, offset_origin, scattered.normalize(), info.max_depth, rng);
}

/// Consume ShadeDiffuse: Lambertian bounce with a point-light estimate.
pub fn shade_diffuse(ctx: &mut KernelContext<'_>) -> TracerResult<()> {
    shade_queue(ctx, queue_index::SHADE_DIFFUSE, diffuse_bounce)
}

/// Consume ShadeReflective: rough mirror bounce with a glossy light estimate.
pub fn shade_reflective(ctx: &mut KernelContext<'_>) -> TracerResult<()> {
    shade_queue(ctx, queue_index::SHADE_REFLECTIVE, reflective_bounce)
}
