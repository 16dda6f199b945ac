use glam::Vec3;
use tracer_shared::{queue_index, status, PathState, QueueState, SimpleRng, MISS_DISTANCE, NO_HIT};

use super::math::v3;
use super::queue::{begin_consume, pop, push};
use super::{path_mut, scene_info};
use crate::device::host::KernelContext;
use crate::error::TracerResult;

/// Consume NewRay: jittered primary ray through the pixel, then queue it for Extend.
///
/// Arguments: scene info, queue states, NewRay queue, ExtendRay queue, path states.
pub fn generate(ctx: &mut KernelContext<'_>) -> TracerResult<()> {
    let work_items = ctx.work_items();
    let [scene, queue_states, new_ray_queue, extend_queue, paths] = ctx.bind::<5>()?;
    let info = scene_info(scene)?;
    let states = queue_states.view_mut::<QueueState>()?;
    let new_rays = new_ray_queue.view::<u32>()?;
    let extend_slots = extend_queue.view_mut::<u32>()?;
    let paths = paths.view_mut::<PathState>()?;

    let width = info.image_width.max(1);
    let height = info.image_height.max(1);
    begin_consume(states, queue_index::NEW_RAY, work_items);

    for item in 0..work_items {
        let index = pop(states, new_rays, queue_index::NEW_RAY, item)?;
        let path = path_mut(paths, index)?;
        let mut rng = SimpleRng::new(path.rng_state);

        let x = (index % width) as f32 + 0.5 + (rng.next_f32() - 0.5);
        let y = (index / width) as f32 + 0.5 + (rng.next_f32() - 0.5);
        let direction = v3(info.frustum_top_left) + v3(info.frustum_horizontal) * (x / width as f32)
            - v3(info.frustum_vertical) * (y / height as f32);

        path.origin = info.camera_position;
        path.direction = direction.normalize_or_zero().to_array();
        path.throughput = Vec3::ONE.to_array();
        path.accumulated_radiance = [0.0; 3];
        path.latest_radiance_sample = [0.0; 3];
        path.depth = 0;
        path.t = MISS_DISTANCE;
        path.object_id = NO_HIT;
        path.material_id = NO_HIT;
        path.flags = 0;
        path.rng_state = rng.state();

        path.status = if push(states, extend_slots, queue_index::EXTEND_RAY, index) {
            status::EXTENDING
        } else {
            status::IDLE
        };
    }
    Ok(())
}
