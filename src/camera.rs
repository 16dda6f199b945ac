use glam::Vec3;
use tracer_shared::TracerConfig;

use crate::error::{TracerError, TracerResult};

/// Pinhole camera and the frustum vectors it hands to the Generate kernel.
///
/// The image plane is one unit high at `focal_length` along `front`;
/// `top_left + horizontal * x - vertical * y` points through image coordinate
/// `(x, y)` given as fractions of the image size.
#[derive(Clone, Debug, PartialEq)]
pub struct Camera {
    pub position: Vec3,
    up: Vec3,
    front: Vec3,
    right: Vec3,
    pub width: u32,
    pub height: u32,
    pub focal_length: f32,
    pub max_depth: u32,
}

fn checked_pixel_count(width: u32, height: u32) -> TracerResult<u32> {
    if width == 0 || height == 0 {
        return Err(TracerError::config(format!("image size {width}x{height} is empty")));
    }
    width
        .checked_mul(height)
        .ok_or_else(|| TracerError::config(format!("image size {width}x{height} overflows the pixel index")))
}

/// Frustum vectors consumed by the device
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Frustum {
    pub top_left: Vec3,
    pub horizontal: Vec3,
    pub vertical: Vec3,
}

impl Camera {
    pub fn new(
        position: Vec3,
        up: Vec3,
        front: Vec3,
        width: u32,
        height: u32,
        fov: f32,
        max_depth: u32,
    ) -> TracerResult<Self> {
        checked_pixel_count(width, height)?;
        if !(fov > 0.0) {
            return Err(TracerError::config(format!("field of view must be positive, got {fov}")));
        }
        if max_depth == 0 {
            return Err(TracerError::config("max depth must be at least one bounce"));
        }
        let up = up.normalize_or_zero();
        let front = front.normalize_or_zero();
        let right = up.cross(front).normalize_or_zero();
        if right == Vec3::ZERO {
            return Err(TracerError::config("camera up and front must be non-zero and not parallel"));
        }

        Ok(Self {
            position,
            up,
            front,
            right,
            width,
            height,
            focal_length: TracerConfig::FOCAL_LENGTH_SCALE / fov,
            max_depth,
        })
    }

    /// Camera at `position` looking down +Z with +Y up.
    pub fn looking_forward(position: Vec3, width: u32, height: u32) -> TracerResult<Self> {
        Self::new(
            position,
            Vec3::Y,
            Vec3::Z,
            width,
            height,
            TracerConfig::DEFAULT_FOV,
            TracerConfig::DEFAULT_MAX_DEPTH,
        )
    }

    pub fn with_max_depth(mut self, max_depth: u32) -> Self {
        self.max_depth = max_depth.max(1);
        self
    }

    pub fn up(&self) -> Vec3 {
        self.up
    }

    pub fn front(&self) -> Vec3 {
        self.front
    }

    pub fn right(&self) -> Vec3 {
        self.right
    }

    pub fn aspect_ratio(&self) -> f32 {
        self.width as f32 / self.height as f32
    }

    /// Saturates for sizes [`Camera::new`] would have rejected.
    pub fn pixel_count(&self) -> u32 {
        self.width.saturating_mul(self.height)
    }

    /// Pixel count, failing when the image is empty or does not fit in `u32`.
    pub fn checked_pixel_count(&self) -> TracerResult<u32> {
        checked_pixel_count(self.width, self.height)
    }

    pub fn frustum(&self) -> Frustum {
        let horizontal = self.right * self.aspect_ratio();
        let vertical = self.up;
        Frustum {
            top_left: self.front * self.focal_length - horizontal / 2.0 + vertical / 2.0,
            horizontal,
            vertical,
        }
    }

    /// Unnormalised direction through image fractions `(x, y)`.
    pub fn direction_towards(&self, x: f32, y: f32) -> Vec3 {
        let frustum = self.frustum();
        frustum.top_left + frustum.horizontal * x - frustum.vertical * y
    }

    pub fn move_forward(&mut self, amount: f32) {
        self.position += self.front * amount;
    }

    pub fn move_horizontally(&mut self, amount: f32) {
        self.position += self.right * amount;
    }

    pub fn move_vertically(&mut self, amount: f32) {
        self.position += self.up * amount;
    }

    /// Scale the focal length; values above one zoom in.
    pub fn zoom(&mut self, scale: f32) {
        if scale > 0.0 {
            self.focal_length *= scale;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frustum_centre_points_along_front() {
        let camera = Camera::new(Vec3::ZERO, Vec3::Y, Vec3::Z, 4, 4, 45.0, 4).unwrap();
        assert_eq!(camera.focal_length, 1.0);
        assert_eq!(camera.right(), Vec3::X);

        let centre = camera.direction_towards(0.5, 0.5);
        assert!((centre - Vec3::Z).length() < 1e-6);

        let top_left = camera.frustum().top_left;
        assert!((top_left - Vec3::new(-0.5, 0.5, 1.0)).length() < 1e-6);
    }

    #[test]
    fn horizontal_span_follows_aspect_ratio() {
        let camera = Camera::new(Vec3::ZERO, Vec3::Y, Vec3::Z, 8, 4, 45.0, 4).unwrap();
        assert!((camera.frustum().horizontal.length() - 2.0).abs() < 1e-6);
        assert!((camera.frustum().vertical.length() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn rejects_degenerate_setup() {
        assert!(Camera::new(Vec3::ZERO, Vec3::Z, Vec3::Z, 4, 4, 45.0, 4).is_err());
        assert!(Camera::new(Vec3::ZERO, Vec3::Y, Vec3::Z, 0, 4, 45.0, 4).is_err());
        assert!(Camera::new(Vec3::ZERO, Vec3::Y, Vec3::Z, 4, 4, 0.0, 4).is_err());
    }

    #[test]
    fn rejects_image_sizes_past_the_pixel_index() {
        assert!(matches!(
            Camera::new(Vec3::ZERO, Vec3::Y, Vec3::Z, 70_000, 70_000, 60.0, 4),
            Err(TracerError::Config(_))
        ));
        assert!(Camera::new(Vec3::ZERO, Vec3::Y, Vec3::Z, 65_536, 65_535, 60.0, 4).is_ok());

        let mut camera = Camera::looking_forward(Vec3::ZERO, 4, 4).unwrap();
        camera.width = 70_000;
        camera.height = 70_000;
        assert_eq!(camera.pixel_count(), u32::MAX);
        assert!(camera.checked_pixel_count().is_err());
    }

    #[test]
    fn movement_follows_camera_axes() {
        let mut camera = Camera::looking_forward(Vec3::ZERO, 4, 4).unwrap();
        camera.move_forward(2.0);
        camera.move_horizontally(1.0);
        camera.move_vertically(-1.0);
        assert!((camera.position - Vec3::new(1.0, -1.0, 2.0)).length() < 1e-6);
    }
}
