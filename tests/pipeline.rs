use std::fs;
use std::path::Path;

use glam::Vec3;

use wavefront_tracer::config::DEFAULT_PROGRAM_DIR;
use wavefront_tracer::device::LaunchGeometry;
use wavefront_tracer::shared::{queue_index, status};
use wavefront_tracer::{Camera, HostBackend, Material, PhaseKind, PipelineConfig, Scene, TracerError, WavefrontPipeline};

/// Three spheres and one triangle sharing two materials, lit by one light.
fn small_scene() -> Scene {
    let matte = Material::diffuse(0.7, Vec3::new(0.8, 0.3, 0.3));
    let mirror = Material::reflective(0.9, Vec3::ONE, 0.2);
    let mut scene = Scene::new();
    scene
        .add_sphere(Vec3::new(0.0, -100.5, 2.0), 100.0, &matte)
        .unwrap()
        .add_sphere(Vec3::new(0.0, 0.0, 2.0), 0.5, &mirror)
        .unwrap()
        .add_sphere(Vec3::new(1.0, 0.0, 2.5), 0.5, &matte)
        .unwrap()
        .add_triangle(
            Vec3::new(-2.0, -0.5, 4.0),
            Vec3::new(-0.5, -0.5, 4.0),
            Vec3::new(-1.2, 1.0, 4.0),
            &mirror,
        )
        .unwrap();
    scene.add_light(Vec3::new(0.0, 3.0, 1.0), Vec3::ONE, 8.0);
    scene
}

fn camera(max_depth: u32) -> Camera {
    Camera::looking_forward(Vec3::ZERO, 4, 4).unwrap().with_max_depth(max_depth)
}

fn pipeline(config: PipelineConfig) -> WavefrontPipeline<HostBackend> {
    WavefrontPipeline::new(HostBackend::with_wavefront_kernels(), &small_scene(), camera(4), config).unwrap()
}

/// Copy of the shipped programs with `file` replaced by `text`.
fn patched_programs(file: &str, text: &str) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    for entry in fs::read_dir(DEFAULT_PROGRAM_DIR).unwrap() {
        let path = entry.unwrap().path();
        fs::copy(&path, dir.path().join(path.file_name().unwrap())).unwrap();
    }
    fs::write(dir.path().join(file), text).unwrap();
    dir
}

fn construct_with_programs(dir: &Path) -> (Result<WavefrontPipeline<HostBackend>, TracerError>, u64) {
    let backend = HostBackend::with_wavefront_kernels();
    let stats = backend.stats();
    let result = WavefrontPipeline::new(
        backend,
        &small_scene(),
        camera(4),
        PipelineConfig::default().with_program_dir(dir),
    );
    (result, stats.releases())
}

#[test]
fn scene_upload_and_buffer_sizes() {
    let mut pipeline = pipeline(PipelineConfig::default());
    let info = pipeline.scene_buffers().info;
    assert_eq!(info.num_spheres, 3);
    assert_eq!(info.num_triangles, 1);
    assert_eq!(info.num_materials, 2);
    assert_eq!(info.num_lights, 1);
    assert_eq!(pipeline.scene_buffers().materials.len(), 2);

    assert_eq!(pipeline.path_states().unwrap().len(), 16);
    assert_eq!(pipeline.execute().unwrap().len(), 16);
}

#[test]
fn logic_covers_every_pixel_and_generate_follows_the_queue() {
    let mut pipeline = pipeline(PipelineConfig::default().with_warp_size(1));
    pipeline.execute().unwrap();
    let report = pipeline.last_report().unwrap();

    let logic = report.phase(PhaseKind::Logic).unwrap();
    assert_eq!(logic.queue_length, None);
    assert_eq!(logic.launch, Some(LaunchGeometry { work_items: 16, local_size: 1 }));

    let generate = report.phase(PhaseKind::Generate).unwrap();
    assert_eq!(generate.queue_length, Some(16));
    assert_eq!(generate.launch, Some(LaunchGeometry { work_items: 16, local_size: 1 }));
    assert_eq!(generate.remaining, Some(0));

    // Shading only sees hits from the previous Extend, so the first iteration skips it.
    for kind in [PhaseKind::ShadeDiffuse, PhaseKind::ShadeReflective, PhaseKind::Shadow] {
        let record = report.phase(kind).unwrap();
        assert_eq!(record.queue_length, Some(0), "{kind}");
        assert_eq!(record.launch, None, "{kind}");
    }
    assert_eq!(report.phase(PhaseKind::Extend).unwrap().queue_length, Some(16));
}

#[test]
fn consumed_entries_leave_the_queue() {
    let mut pipeline = pipeline(PipelineConfig::default().with_warp_size(3));
    for _ in 0..6 {
        pipeline.execute().unwrap();
        let report = pipeline.last_report().unwrap();
        for record in &report.phases {
            let (Some(before), Some(launch)) = (record.queue_length, record.launch) else {
                continue;
            };
            assert!(launch.work_items <= before, "{}", record.phase);
            assert!(before - launch.work_items < 3, "{}", record.phase);
            // No phase pushes onto the queue it consumes.
            assert_eq!(record.remaining, Some(before - launch.work_items), "{}", record.phase);
        }
    }
}

#[test]
fn rounding_residue_is_served_first() {
    let mut pipeline = pipeline(PipelineConfig::default().with_warp_size(3));
    pipeline.execute().unwrap();
    let generate = pipeline.last_report().unwrap().phase(PhaseKind::Generate).unwrap().clone();
    assert_eq!(generate.launch, Some(LaunchGeometry { work_items: 15, local_size: 3 }));
    assert_eq!(generate.remaining, Some(1));

    // Pixel 15 was left behind by the rounded launch; it is still waiting for Generate.
    let paths = pipeline.path_states().unwrap();
    assert_eq!(paths[15].status, status::GENERATING);
    assert!(paths[..15].iter().all(|p| p.status != status::GENERATING));

    for _ in 0..40 {
        pipeline.execute().unwrap();
    }
    let paths = pipeline.path_states().unwrap();
    for (pixel, path) in paths.iter().enumerate() {
        assert!(path.sample_count > 0, "pixel {pixel} never completed a sample");
    }
}

#[test]
fn image_accumulates_samples() {
    let mut pipeline = pipeline(PipelineConfig::default().with_warp_size(4));
    let mut image = Vec::new();
    for _ in 0..20 {
        image = pipeline.execute().unwrap();
    }
    assert!(image.iter().any(|&p| p != 0));
    assert!(image.iter().all(|&p| p >> 24 == 0));
    let stats = pipeline.stats();
    assert_eq!(stats.iterations, 20);
    assert_eq!(stats.launches + stats.skipped_launches, 20 * 6);
    assert_eq!(stats.total_dropped(), 0);
}

#[test]
fn host_execution_is_deterministic() {
    let mut a = pipeline(PipelineConfig::default().with_warp_size(2));
    let mut b = pipeline(PipelineConfig::default().with_warp_size(2));
    for _ in 0..8 {
        assert_eq!(a.execute().unwrap(), b.execute().unwrap());
    }
}

#[test]
fn full_queue_counts_drops_and_retries() {
    let mut pipeline = pipeline(PipelineConfig::default().with_queue_capacity(4));
    pipeline.execute().unwrap();
    let report = pipeline.last_report().unwrap().clone();
    assert_eq!(report.dropped[queue_index::NEW_RAY], 12);
    assert_eq!(pipeline.stats().dropped[queue_index::NEW_RAY], 12);

    let paths = pipeline.path_states().unwrap();
    let idle = paths.iter().filter(|p| p.status == status::IDLE).count();
    assert_eq!(idle, 12, "rejected paths wait for the next iteration");

    let generate = report.phase(PhaseKind::Generate).unwrap();
    assert_eq!(generate.launch, Some(LaunchGeometry { work_items: 4, local_size: 4 }));
}

#[test]
fn undersized_queues_still_reach_every_pixel() {
    let mut pipeline = pipeline(PipelineConfig::default().with_queue_capacity(4).with_warp_size(1));
    for _ in 0..200 {
        pipeline.execute().unwrap();
    }
    assert!(pipeline.stats().dropped[queue_index::NEW_RAY] > 0);
    let paths = pipeline.path_states().unwrap();
    for (pixel, path) in paths.iter().enumerate() {
        assert!(path.sample_count > 0, "pixel {pixel} was never admitted");
    }
}

#[test]
fn admission_resumes_after_the_last_accepted_pixel() {
    let mut pipeline = pipeline(PipelineConfig::default().with_queue_capacity(4).with_warp_size(1));
    pipeline.execute().unwrap();
    assert_eq!(pipeline.scene_buffers().info.scan_offset, 4);

    pipeline.execute().unwrap();
    let paths = pipeline.path_states().unwrap();
    // Pixels 4..8 were scanned first and took the four free NewRay slots.
    assert!(paths[4..8].iter().all(|p| p.status != status::IDLE));
    assert!(paths[8..].iter().all(|p| p.status == status::IDLE));
    assert_eq!(pipeline.scene_buffers().info.scan_offset, 8);
}

#[test]
fn oversized_image_is_rejected_before_allocation() {
    let mut camera = camera(4);
    camera.width = 70_000;
    camera.height = 70_000;
    let backend = HostBackend::with_wavefront_kernels();
    let stats = backend.stats();
    let result = WavefrontPipeline::new(backend, &small_scene(), camera, PipelineConfig::default());
    assert!(matches!(result, Err(TracerError::Config(_))));
    assert_eq!(stats.releases(), 1);
}

#[test]
fn reset_restarts_accumulation() {
    let mut pipeline = pipeline(PipelineConfig::default());
    for _ in 0..5 {
        pipeline.execute().unwrap();
    }
    let mut moved = camera(4);
    moved.move_forward(0.5);
    pipeline.reset(moved).unwrap();

    assert_eq!(pipeline.scene_buffers().info.camera_position, [0.0, 0.0, 0.5]);
    assert!(pipeline.path_states().unwrap().iter().all(|p| p.sample_count == 0));
    assert_eq!(pipeline.queue_states().unwrap().total_length(), 0);
    assert!(pipeline.last_report().is_none());

    let wider = Camera::looking_forward(Vec3::ZERO, 8, 4).unwrap();
    assert!(matches!(pipeline.reset(wider), Err(TracerError::Config(_))));
}

#[test]
fn unsupported_material_fails_construction_and_releases_once() {
    let mut scene = small_scene();
    scene.add_sphere(Vec3::new(0.0, 1.0, 3.0), 0.3, &Material::dielectric(1.5)).unwrap();
    let backend = HostBackend::with_wavefront_kernels();
    let stats = backend.stats();
    let result = WavefrontPipeline::new(backend, &scene, camera(4), PipelineConfig::default());
    assert!(matches!(result, Err(TracerError::UnsupportedMaterial("dielectric"))));
    assert_eq!(stats.releases(), 1);
}

#[test]
fn compile_errors_carry_the_log() {
    let dir = patched_programs("shadow.wgsl", "@compute @workgroup_size(64)\nfn shadow() {\n");
    let (result, releases) = construct_with_programs(dir.path());
    match result {
        Err(TracerError::Compile { program, log }) => {
            assert_eq!(program, "shadow.wgsl");
            assert!(log.contains("shadow.wgsl:2"), "{log}");
        }
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("broken program compiled"),
    }
    assert_eq!(releases, 1);
}

#[test]
fn missing_entry_point_releases_partial_construction_once() {
    let dir = patched_programs("extend.wgsl", "fn not_an_entry_point() {}\n");
    let (result, releases) = construct_with_programs(dir.path());
    assert!(matches!(
        result,
        Err(TracerError::KernelCreation { ref entry_point, .. }) if entry_point == "extend"
    ));
    assert_eq!(releases, 1);
}

#[test]
fn explicit_release_is_not_repeated_on_drop() {
    let backend = HostBackend::with_wavefront_kernels();
    let stats = backend.stats();
    let mut pipeline =
        WavefrontPipeline::new(backend, &small_scene(), camera(4), PipelineConfig::default()).unwrap();
    pipeline.execute().unwrap();
    pipeline.release();
    pipeline.release();
    assert!(pipeline.execute().is_err());
    drop(pipeline);
    assert_eq!(stats.releases(), 1);
}
