use tracer_shared::{self as gpu, queue_index, status, MaterialKind, PathState, QueueState, MISS_DISTANCE, NO_HIT};

use super::math::{closest_hit, v3};
use super::queue::{begin_consume, pop, push};
use super::{path_mut, scene_info};
use crate::device::host::KernelContext;
use crate::error::{TracerError, TracerResult};

/// Consume ExtendRay: closest hit, then route the path to the shade queue of
/// the hit material or mark it as escaped.
///
/// Arguments: scene info, materials, spheres, triangles, queue states,
/// ExtendRay, ShadeDiffuse and ShadeReflective queues, path states.
pub fn extend(ctx: &mut KernelContext<'_>) -> TracerResult<()> {
    let work_items = ctx.work_items();
    let [scene, materials, spheres, triangles, queue_states, extend_queue, diffuse_queue, reflective_queue, paths] =
        ctx.bind::<9>()?;
    let info = scene_info(scene)?;
    let materials = materials.view::<gpu::Material>()?;
    let spheres = spheres.view::<gpu::Sphere>()?;
    let triangles = triangles.view::<gpu::Triangle>()?;
    let states = queue_states.view_mut::<QueueState>()?;
    let extend_slots = extend_queue.view::<u32>()?;
    let diffuse_slots = diffuse_queue.view_mut::<u32>()?;
    let reflective_slots = reflective_queue.view_mut::<u32>()?;
    let paths = paths.view_mut::<PathState>()?;

    begin_consume(states, queue_index::EXTEND_RAY, work_items);

    for item in 0..work_items {
        let index = pop(states, extend_slots, queue_index::EXTEND_RAY, item)?;
        let path = path_mut(paths, index)?;

        let Some(hit) = closest_hit(&info, spheres, triangles, v3(path.origin), v3(path.direction)) else {
            path.t = MISS_DISTANCE;
            path.object_id = NO_HIT;
            path.material_id = NO_HIT;
            path.status = status::MISSED;
            continue;
        };

        path.t = hit.t;
        path.object_id = hit.object_id;
        path.material_id = hit.material_id;
        path.normal = hit.normal.to_array();

        let kind = materials
            .get(hit.material_id as usize)
            .and_then(gpu::Material::material_kind)
            .ok_or_else(|| {
                TracerError::dispatch("extend", format!("object {} has invalid material {}", hit.object_id, hit.material_id))
            })?;
        let queued = match kind {
            MaterialKind::Diffuse => push(states, diffuse_slots, queue_index::SHADE_DIFFUSE, index),
            MaterialKind::Reflective => push(states, reflective_slots, queue_index::SHADE_REFLECTIVE, index),
        };
        path.status = if queued { status::SHADING } else { status::DONE };
    }
    Ok(())
}
