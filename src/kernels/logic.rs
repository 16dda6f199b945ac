use glam::Vec3;
use tracer_shared::{flags, pack_color, queue_index, status, PathState, QueueState, SimpleRng};

use super::math::{expand_average, fold_staged, sky, v3};
use super::queue::push;
use super::scene_info;
use crate::device::host::KernelContext;
use crate::error::TracerResult;

/// Per pixel: fold finished samples into the image and request new primary rays.
///
/// Arguments: scene info, queue states, NewRay queue, path states, image.
pub fn logic(ctx: &mut KernelContext<'_>) -> TracerResult<()> {
    let work_items = ctx.work_items() as usize;
    let [scene, queue_states, new_ray_queue, paths, image] = ctx.bind::<5>()?;
    let info = scene_info(scene)?;
    let states = queue_states.view_mut::<QueueState>()?;
    let slots = new_ray_queue.view_mut::<u32>()?;
    let paths = paths.view_mut::<PathState>()?;
    let image = image.view_mut::<u32>()?;

    let pixels = work_items
        .min(info.pixel_count() as usize)
        .min(paths.len())
        .min(image.len());
    // Admission to NewRay starts at the scan offset, so pixels turned away by a
    // full queue are visited first next time.
    let offset = info.scan_offset as usize;
    for item in 0..pixels {
        let pixel = (item + offset) % pixels;
        let path = &mut paths[pixel];
        if path.rng_state == 0 {
            path.rng_state = SimpleRng::seed_for_pixel(pixel as u32);
        }
        if path.has_flag(flags::SHADOW_PENDING) {
            continue;
        }
        fold_staged(path);

        match path.status {
            status::MISSED => {
                let escaped = v3(path.throughput) * sky(v3(path.direction));
                path.accumulated_radiance = (v3(path.accumulated_radiance) + escaped).to_array();
                image[pixel] = complete_sample(path);
            }
            status::DONE => image[pixel] = complete_sample(path),
            _ => {}
        }

        if path.status == status::IDLE && push(states, slots, queue_index::NEW_RAY, pixel as u32) {
            path.status = status::GENERATING;
        }
    }
    Ok(())
}

/// Fold the sample into the pixel average, free the slot and return the packed pixel.
fn complete_sample(path: &mut PathState) -> u32 {
    let average = expand_average(
        v3(path.averaged_samples),
        path.sample_count,
        v3(path.accumulated_radiance),
    );
    path.averaged_samples = average.to_array();
    path.sample_count += 1;
    path.accumulated_radiance = Vec3::ZERO.to_array();
    path.status = status::IDLE;
    pack_color(path.averaged_samples)
}
