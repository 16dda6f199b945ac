#![no_std]

//! Device-visible records of the wavefront tracer.
//!
//! Every struct here is uploaded verbatim into a compute buffer, so field order
//! mirrors `programs/structs.wgsl`. Three-component vectors are always followed
//! by a 4-byte scalar so the WGSL `vec3<f32>` alignment rules produce the same
//! layout as `#[repr(C)]`.

use bytemuck::{Pod, Zeroable};

/// Configuration constants for the tracer
pub struct TracerConfig;

impl TracerConfig {
    /// Invocations per workgroup baked into every WGSL kernel.
    pub const KERNEL_WORKGROUP_SIZE: u32 = 64;
    /// Largest dispatch along one axis before the launch is folded into 2D.
    pub const MAX_WORKGROUPS_PER_DIMENSION: u32 = 65_535;
    pub const DEFAULT_WARP_SIZE: u32 = 32;
    pub const DEFAULT_MAX_DEPTH: u32 = 8;
    pub const DEFAULT_FOV: f32 = 60.0;
    pub const DEFAULT_WIDTH: u32 = 640;
    pub const DEFAULT_HEIGHT: u32 = 480;
    /// Bounce after which paths are subject to Russian roulette.
    pub const RUSSIAN_ROULETTE_DEPTH: u32 = 3;
    pub const MIN_SURVIVAL_PROBABILITY: f32 = 0.05;
    pub const RAY_EPSILON: f32 = 0.001;
    pub const FOCAL_LENGTH_SCALE: f32 = 45.0;
    pub const MAX_PUSH_CONSTANT_SIZE: u32 = 128;
}

/// Sentinel for "no object / no material".
pub const NO_HIT: u32 = u32::MAX;
/// Hit distance written when a ray escapes the scene.
pub const MISS_DISTANCE: f32 = -1.0;

/// Lifecycle stage of a path slot.
pub mod status {
    pub const IDLE: u32 = 0;
    pub const GENERATING: u32 = 1;
    pub const EXTENDING: u32 = 2;
    pub const SHADING: u32 = 3;
    pub const MISSED: u32 = 4;
    pub const DONE: u32 = 5;
}

/// Bits of [`PathState::flags`].
pub mod flags {
    /// A visibility test for `latest_radiance_sample` is still queued.
    pub const SHADOW_PENDING: u32 = 1;
}

/// Slot of each queue inside [`QueueStates`].
pub mod queue_index {
    pub const NEW_RAY: usize = 0;
    pub const EXTEND_RAY: usize = 1;
    pub const SHADE_DIFFUSE: usize = 2;
    pub const SHADE_REFLECTIVE: usize = 3;
    pub const SHADOW_RAY: usize = 4;
    pub const COUNT: usize = 5;
}

/// Material kind tag stored in the device material table.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MaterialKind {
    Diffuse = 1,
    Reflective = 2,
}

impl MaterialKind {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(Self::Diffuse),
            2 => Some(Self::Reflective),
            _ => None,
        }
    }
}

/// Per-pixel in-flight path record
#[derive(Copy, Clone, Debug, Default, Pod, Zeroable, PartialEq)]
#[repr(C)]
pub struct PathState {
    pub origin: [f32; 3],                 // 12 bytes
    pub t: f32,                           // 4 bytes, MISS_DISTANCE when nothing was hit
    pub direction: [f32; 3],              // 12 bytes
    pub object_id: u32,                   // 4 bytes
    pub throughput: [f32; 3],             // 12 bytes
    pub material_id: u32,                 // 4 bytes
    pub accumulated_radiance: [f32; 3],   // 12 bytes, radiance of the sample in flight
    pub sample_count: u32,                // 4 bytes
    pub latest_radiance_sample: [f32; 3], // 12 bytes, staged light estimate
    pub depth: u32,                       // 4 bytes
    pub averaged_samples: [f32; 3],       // 12 bytes, progressive pixel average
    pub status: u32,                      // 4 bytes
    pub shadow_origin: [f32; 3],          // 12 bytes
    pub shadow_distance: f32,             // 4 bytes
    pub shadow_direction: [f32; 3],       // 12 bytes
    pub flags: u32,                       // 4 bytes
    pub normal: [f32; 3],                 // 12 bytes
    pub rng_state: u32,                   // 4 bytes
    // Total: 144 bytes
}

impl PathState {
    pub fn has_flag(&self, flag: u32) -> bool {
        self.flags & flag != 0
    }
}

/// Scene-wide constants shared by all kernels
#[derive(Copy, Clone, Debug, Default, Pod, Zeroable, PartialEq)]
#[repr(C)]
pub struct SceneInfo {
    pub camera_position: [f32; 3],    // 12 bytes
    pub num_spheres: u32,             // 4 bytes
    pub frustum_top_left: [f32; 3],   // 12 bytes
    pub num_triangles: u32,           // 4 bytes
    pub frustum_horizontal: [f32; 3], // 12 bytes
    pub num_lights: u32,              // 4 bytes
    pub frustum_vertical: [f32; 3],   // 12 bytes
    pub max_depth: u32,               // 4 bytes
    pub image_width: u32,             // 4 bytes
    pub image_height: u32,            // 4 bytes
    pub num_materials: u32,           // 4 bytes
    pub scan_offset: u32,             // 4 bytes, first pixel visited by Logic
    // Total: 80 bytes
}

impl SceneInfo {
    pub fn pixel_count(&self) -> u32 {
        self.image_width.saturating_mul(self.image_height)
    }
}

/// Sphere primitive
#[derive(Copy, Clone, Debug, Default, Pod, Zeroable, PartialEq)]
#[repr(C)]
pub struct Sphere {
    pub center: [f32; 3],   // 12 bytes
    pub radius: f32,        // 4 bytes
    pub material_id: u32,   // 4 bytes
    pub _padding: [u32; 3], // 12 bytes
    // Total: 32 bytes
}

impl Sphere {
    pub fn new(center: [f32; 3], radius: f32, material_id: u32) -> Self {
        Self {
            center,
            radius,
            material_id,
            _padding: [0; 3],
        }
    }
}

/// Triangle primitive
#[derive(Copy, Clone, Debug, Default, Pod, Zeroable, PartialEq)]
#[repr(C)]
pub struct Triangle {
    pub v0: [f32; 3],     // 12 bytes
    pub material_id: u32, // 4 bytes
    pub v1: [f32; 3],     // 12 bytes
    pub _padding0: u32,   // 4 bytes
    pub v2: [f32; 3],     // 12 bytes
    pub _padding1: u32,   // 4 bytes
    // Total: 48 bytes
}

impl Triangle {
    pub fn new(v0: [f32; 3], v1: [f32; 3], v2: [f32; 3], material_id: u32) -> Self {
        Self {
            v0,
            material_id,
            v1,
            _padding0: 0,
            v2,
            _padding1: 0,
        }
    }
}

/// Entry of the deduplicated material table
#[derive(Copy, Clone, Debug, Default, Pod, Zeroable, PartialEq)]
#[repr(C)]
pub struct Material {
    pub color: [f32; 3],    // 12 bytes
    pub albedo: f32,        // 4 bytes
    pub kind: u32,          // 4 bytes, MaterialKind as u32
    pub roughness: f32,     // 4 bytes, reflective only
    pub _padding: [u32; 2], // 8 bytes
    // Total: 32 bytes
}

impl Material {
    /// Create a diffuse material
    pub fn diffuse(color: [f32; 3], albedo: f32) -> Self {
        Self {
            color,
            albedo,
            kind: MaterialKind::Diffuse as u32,
            roughness: 0.0,
            _padding: [0; 2],
        }
    }

    /// Create a reflective material
    pub fn reflective(color: [f32; 3], albedo: f32, roughness: f32) -> Self {
        Self {
            color,
            albedo,
            kind: MaterialKind::Reflective as u32,
            roughness,
            _padding: [0; 2],
        }
    }

    pub fn material_kind(&self) -> Option<MaterialKind> {
        MaterialKind::from_raw(self.kind)
    }

    /// Colour scaled by albedo.
    pub fn reflectance(&self) -> [f32; 3] {
        [
            self.color[0] * self.albedo,
            self.color[1] * self.albedo,
            self.color[2] * self.albedo,
        ]
    }
}

/// Point light
#[derive(Copy, Clone, Debug, Default, Pod, Zeroable, PartialEq)]
#[repr(C)]
pub struct Light {
    pub position: [f32; 3], // 12 bytes
    pub _padding: u32,      // 4 bytes
    pub color: [f32; 3],    // 12 bytes
    pub intensity: f32,     // 4 bytes
    // Total: 32 bytes
}

impl Light {
    pub fn new(position: [f32; 3], color: [f32; 3], intensity: f32) -> Self {
        Self {
            position,
            _padding: 0,
            color,
            intensity,
        }
    }
}

/// Bookkeeping of one bounded index ring.
///
/// `length` and `dropped` are atomics on the device; `retiring` holds the
/// number of entries the last consumer launch took from the head and is folded
/// into `head`/`length` by the `retire` kernel.
#[derive(Copy, Clone, Debug, Default, Pod, Zeroable, PartialEq, Eq)]
#[repr(C)]
pub struct QueueState {
    pub head: u32,          // 4 bytes
    pub length: u32,        // 4 bytes
    pub retiring: u32,      // 4 bytes
    pub dropped: u32,       // 4 bytes
    pub capacity: u32,      // 4 bytes
    pub _padding: [u32; 3], // 12 bytes
    // Total: 32 bytes
}

impl QueueState {
    pub fn empty(capacity: u32) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    /// Ring slot of the `offset`-th entry counted from the head.
    pub fn slot(&self, offset: u32) -> usize {
        ((self.head as u64 + offset as u64) % self.capacity.max(1) as u64) as usize
    }
}

/// Lengths and counters of all five queues, read back before every phase
#[derive(Copy, Clone, Debug, Default, Pod, Zeroable, PartialEq, Eq)]
#[repr(C)]
pub struct QueueStates {
    pub queues: [QueueState; queue_index::COUNT], // 160 bytes
}

impl QueueStates {
    pub fn with_capacity(capacity: u32) -> Self {
        Self {
            queues: [QueueState::empty(capacity); queue_index::COUNT],
        }
    }

    pub fn length(&self, queue: usize) -> u32 {
        self.queues[queue].length
    }

    pub fn dropped(&self, queue: usize) -> u32 {
        self.queues[queue].dropped
    }

    pub fn total_length(&self) -> u32 {
        self.queues.iter().map(|q| q.length).sum()
    }
}

/// Push constants written by the wgpu backend for every launch.
/// Kernels guard on `global_size`; `local_size` is informational because the
/// WGSL workgroup size is fixed.
#[derive(Copy, Clone, Debug, Default, Pod, Zeroable, PartialEq, Eq)]
#[repr(C)]
pub struct LaunchParams {
    pub global_size: u32,
    pub local_size: u32,
}

/// Linear congruential generator shared by host and device kernels
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SimpleRng {
    seed: u32,
}

impl SimpleRng {
    pub fn new(seed: u32) -> Self {
        Self { seed }
    }

    /// Non-zero seed for a pixel, decorrelated with a Wang hash.
    pub fn seed_for_pixel(pixel: u32) -> u32 {
        let mut x = pixel.wrapping_add(1);
        x = (x ^ 61) ^ (x >> 16);
        x = x.wrapping_mul(9);
        x ^= x >> 4;
        x = x.wrapping_mul(0x27d4_eb2d);
        x ^= x >> 15;
        x | 1
    }

    pub fn state(&self) -> u32 {
        self.seed
    }

    /// Generate next random u32
    pub fn next_u32(&mut self) -> u32 {
        self.seed = self.seed.wrapping_mul(1664525).wrapping_add(1013904223);
        self.seed
    }

    /// Generate random f32 in [0, 1)
    pub fn next_f32(&mut self) -> f32 {
        (self.next_u32() >> 8) as f32 / 16777216.0
    }
}

/// Pack a linear colour into `0x00BBGGRR`, clamping each channel to [0, 1].
pub fn pack_color(color: [f32; 3]) -> u32 {
    let channel = |v: f32| -> u32 {
        let v = if v.is_nan() { 0.0 } else { v.clamp(0.0, 1.0) };
        (v * 255.0) as u32
    };
    (channel(color[2]) << 16) | (channel(color[1]) << 8) | channel(color[0])
}

/// Inverse of [`pack_color`], returning 8-bit `[r, g, b]`.
pub fn unpack_color(packed: u32) -> [u8; 3] {
    [
        (packed & 0xff) as u8,
        ((packed >> 8) & 0xff) as u8,
        ((packed >> 16) & 0xff) as u8,
    ]
}

#[cfg(test)]
mod test {
    use super::*;
    use core::mem::size_of;

    #[test]
    fn device_record_sizes_match_wgsl_layout() {
        assert_eq!(size_of::<PathState>(), 144);
        assert_eq!(size_of::<SceneInfo>(), 80);
        assert_eq!(size_of::<Sphere>(), 32);
        assert_eq!(size_of::<Triangle>(), 48);
        assert_eq!(size_of::<Material>(), 32);
        assert_eq!(size_of::<Light>(), 32);
        assert_eq!(size_of::<QueueState>(), 32);
        assert_eq!(size_of::<QueueStates>(), 160);
        assert_eq!(size_of::<LaunchParams>(), 8);
    }

    #[test]
    fn material_kind_tags() {
        assert_eq!(MaterialKind::Diffuse as u32, 1);
        assert_eq!(MaterialKind::Reflective as u32, 2);
        assert_eq!(MaterialKind::from_raw(2), Some(MaterialKind::Reflective));
        assert_eq!(MaterialKind::from_raw(0), None);
        assert_eq!(Material::reflective([1.0; 3], 0.5, 0.1).material_kind(), Some(MaterialKind::Reflective));
    }

    #[test]
    fn pack_color_clamps_and_orders_channels() {
        assert_eq!(pack_color([1.0, 0.0, 0.0]), 0x0000_00ff);
        assert_eq!(pack_color([0.0, 1.0, 0.0]), 0x0000_ff00);
        assert_eq!(pack_color([0.0, 0.0, 2.0]), 0x00ff_0000);
        assert_eq!(pack_color([-1.0, f32::NAN, 0.5]), 0x007f_0000);
        assert_eq!(unpack_color(pack_color([1.0, 0.0, 1.0])), [255, 0, 255]);
    }

    #[test]
    fn queue_slot_wraps_around_capacity() {
        let mut state = QueueState::empty(4);
        state.head = 3;
        assert_eq!(state.slot(0), 3);
        assert_eq!(state.slot(1), 0);
        assert_eq!(state.slot(2), 1);
    }

    #[test]
    fn rng_is_deterministic_and_in_range() {
        let seed = SimpleRng::seed_for_pixel(0);
        assert_ne!(seed, 0);
        let mut a = SimpleRng::new(seed);
        let mut b = SimpleRng::new(seed);
        for _ in 0..100 {
            let x = a.next_f32();
            assert_eq!(x, b.next_f32());
            assert!((0.0..1.0).contains(&x));
        }
    }
}
