use tracer_shared::{self as gpu, flags, queue_index, PathState, QueueState};

use super::math::{occluded, v3, EPSILON};
use super::queue::{begin_consume, pop};
use super::{path_mut, scene_info};
use crate::device::host::KernelContext;
use crate::error::TracerResult;

/// Consume ShadowRay: drop the staged light estimate when the segment to the
/// light is blocked, then release the path for Logic and the shade phases.
///
/// Arguments: scene info, spheres, triangles, queue states, ShadowRay queue,
/// path states.
pub fn shadow(ctx: &mut KernelContext<'_>) -> TracerResult<()> {
    let work_items = ctx.work_items();
    let [scene, spheres, triangles, queue_states, shadow_queue, paths] = ctx.bind::<6>()?;
    let info = scene_info(scene)?;
    let spheres = spheres.view::<gpu::Sphere>()?;
    let triangles = triangles.view::<gpu::Triangle>()?;
    let states = queue_states.view_mut::<QueueState>()?;
    let slots = shadow_queue.view::<u32>()?;
    let paths = paths.view_mut::<PathState>()?;

    begin_consume(states, queue_index::SHADOW_RAY, work_items);

    for item in 0..work_items {
        let index = pop(states, slots, queue_index::SHADOW_RAY, item)?;
        let path = path_mut(paths, index)?;
        let blocked = occluded(
            &info,
            spheres,
            triangles,
            v3(path.shadow_origin),
            v3(path.shadow_direction),
            path.shadow_distance - EPSILON,
        );
        if blocked {
            path.latest_radiance_sample = [0.0; 3];
        }
        path.flags &= !flags::SHADOW_PENDING;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use tracer_shared::status;

    use super::*;
    use crate::kernels::bench::Bench;
    use crate::wavefront::PhaseKind;

    /// One diffuse hit facing a light at distance six, optionally behind a sphere.
    /// Max depth 1, so shading finishes the path.
    fn lit_surface(occluder: bool) -> Bench {
        let mut bench = Bench::new(1, 4);
        bench.info.max_depth = 1;
        bench.materials.push(gpu::Material::diffuse([1.0; 3], 0.8));
        bench.lights.push(gpu::Light::new([0.0, 0.0, -5.0], [1.0; 3], 10.0));
        if occluder {
            bench.spheres.push(gpu::Sphere::new([0.0, 0.0, -2.5], 0.5, 0));
        }
        bench.place_hit(0, [0.0; 3], [0.0, 0.0, 1.0], 1.0, [0.0, 0.0, -1.0], 0);
        bench.enqueue(queue_index::SHADE_DIFFUSE, &[0]);
        bench
    }

    /// Shade, let Logic see the pending test, resolve it, then let Logic fold.
    fn shade_then_resolve(bench: &mut Bench) {
        bench.run(PhaseKind::ShadeDiffuse, 1).unwrap();
        let path = bench.paths[0];
        assert!(path.has_flag(flags::SHADOW_PENDING));
        assert!(path.latest_radiance_sample.iter().all(|&c| c > 0.0));
        assert_eq!(path.status, status::DONE);
        assert_eq!(bench.length(queue_index::SHADOW_RAY), 1);

        // A pending visibility test keeps Logic away from the path.
        bench.run(PhaseKind::Logic, 1).unwrap();
        assert_eq!(bench.paths[0], path);
        assert_eq!(bench.image[0], 0);
        assert_eq!(bench.length(queue_index::NEW_RAY), 0);

        bench.run(PhaseKind::Shadow, 1).unwrap();
        assert!(!bench.paths[0].has_flag(flags::SHADOW_PENDING));
        assert_eq!(bench.length(queue_index::SHADOW_RAY), 0);

        bench.run(PhaseKind::Logic, 1).unwrap();
        assert_eq!(bench.paths[0].sample_count, 1);
        assert_eq!(bench.paths[0].status, status::GENERATING);
    }

    #[test]
    fn occluded_light_folds_nothing() {
        let mut bench = lit_surface(true);
        shade_then_resolve(&mut bench);
        assert_eq!(bench.paths[0].averaged_samples, [0.0; 3]);
        assert_eq!(bench.image[0], 0);
    }

    #[test]
    fn visible_light_folds_the_staged_estimate() {
        let mut bench = lit_surface(false);
        shade_then_resolve(&mut bench);
        assert!(bench.paths[0].averaged_samples.iter().all(|&c| c > 0.05));
        assert_ne!(bench.image[0], 0);
    }
}
