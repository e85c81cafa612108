// Camera and per-object matrices
//
// Right-handed, Z up. The projection maps depth to [0, 1] and has its Y
// axis flipped so clip space matches Vulkan's downward Y.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

use crate::config::ObjectKind;

/// Rotation speed of static meshes about +Z
pub const SPIN_DEGREES_PER_SECOND: f32 = 10.0;

#[derive(Debug, Clone, Copy)]
pub struct Camera {
    pub eye: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    pub fov_y_degrees: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            eye: Vec3::new(10.0, 0.01, 10.0),
            target: Vec3::ZERO,
            up: Vec3::Z,
            fov_y_degrees: 45.0,
            near: 0.1,
            far: 100.0,
        }
    }
}

impl Camera {
    pub fn view(&self) -> Mat4 {
        Mat4::look_at_rh(self.eye, self.target, self.up)
    }

    /// Perspective for `extent`, Y flipped
    pub fn projection(&self, extent: vk::Extent2D) -> Mat4 {
        let aspect = extent.width as f32 / extent.height.max(1) as f32;
        let mut proj = Mat4::perspective_rh(
            self.fov_y_degrees.to_radians(),
            aspect,
            self.near,
            self.far,
        );
        proj.y_axis.y *= -1.0;
        proj
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub translate: Vec3,
    pub scale: f32,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            translate: Vec3::ZERO,
            scale: 1.0,
        }
    }
}

impl Transform {
    /// translate * scale * rotate(angle about +Z)
    pub fn model(&self, angle_degrees: f32) -> Mat4 {
        Mat4::from_translation(self.translate)
            * Mat4::from_scale(Vec3::splat(self.scale))
            * Mat4::from_rotation_z(angle_degrees.to_radians())
    }
}

pub fn spin_angle(elapsed_seconds: f32) -> f32 {
    elapsed_seconds * SPIN_DEGREES_PER_SECOND
}

/// Model matrix of a scene object at `elapsed_seconds`. Every kind spins at
/// the same rate; kinds differ only in how they are textured.
pub fn model_for(kind: ObjectKind, transform: &Transform, elapsed_seconds: f32) -> Mat4 {
    match kind {
        ObjectKind::Static | ObjectKind::Lit => transform.model(spin_angle(elapsed_seconds)),
    }
}

/// Uniform block consumed by `scene.vert` (std140, three column-major mat4)
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct Mvp {
    pub model: Mat4,
    pub view: Mat4,
    pub proj: Mat4,
}

impl Mvp {
    pub fn new(model: Mat4, camera: &Camera, extent: vk::Extent2D) -> Self {
        Self {
            model,
            view: camera.view(),
            proj: camera.projection(extent),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: Vec3, b: Vec3) -> bool {
        (a - b).length() < 1e-4
    }

    fn clip(mvp: &Mvp, position: Vec3) -> glam::Vec4 {
        mvp.proj * mvp.view * mvp.model * position.extend(1.0)
    }

    #[test]
    fn test_mvp_size() {
        assert_eq!(std::mem::size_of::<Mvp>(), 192);
    }

    #[test]
    fn test_model_applies_rotation_then_scale_then_translation() {
        let transform = Transform {
            translate: Vec3::new(0.0, 3.0, 0.0),
            scale: 2.0,
        };
        let p = transform.model(90.0).transform_point3(Vec3::X);
        assert!(approx(p, Vec3::new(0.0, 5.0, 0.0)), "{:?}", p);
    }

    #[test]
    fn test_spin_angle() {
        assert_eq!(spin_angle(0.0), 0.0);
        assert!((spin_angle(9.0) - 90.0).abs() < 1e-5);
        assert!((spin_angle(36.0) - 360.0).abs() < 1e-4);
    }

    #[test]
    fn test_every_kind_spins_with_time() {
        let transform = Transform {
            translate: Vec3::new(1.0, 1.0, 1.0),
            scale: 0.25,
        };

        for kind in [ObjectKind::Static, ObjectKind::Lit] {
            let at_rest = model_for(kind, &transform, 0.0);
            let later = model_for(kind, &transform, 9.0);
            assert_ne!(at_rest, later, "{:?} did not rotate", kind);

            // 9 s at 10 deg/s is a quarter turn: +X maps to +Y
            let p = later.transform_point3(Vec3::X);
            assert!(approx(p, Vec3::new(1.0, 1.25, 1.0)), "{:?}: {:?}", kind, p);
        }
    }

    #[test]
    fn test_lit_and_static_share_rotation() {
        let transform = Transform::default();
        assert_eq!(
            model_for(ObjectKind::Lit, &transform, 4.5),
            model_for(ObjectKind::Static, &transform, 4.5)
        );
    }

    #[test]
    fn test_target_projects_to_screen_centre() {
        let camera = Camera::default();
        let mvp = Mvp::new(Mat4::IDENTITY, &camera, vk::Extent2D { width: 800, height: 600 });

        let projected = clip(&mvp, Vec3::ZERO);
        let ndc = projected.truncate() / projected.w;
        assert!(ndc.x.abs() < 1e-4 && ndc.y.abs() < 1e-4);
        assert!(ndc.z > 0.0 && ndc.z < 1.0);
    }

    #[test]
    fn test_up_is_negative_y_in_clip_space() {
        let camera = Camera::default();
        let mvp = Mvp::new(Mat4::IDENTITY, &camera, vk::Extent2D { width: 800, height: 600 });

        let projected = clip(&mvp, Vec3::new(0.0, 0.0, 1.0));
        assert!(projected.y / projected.w < 0.0);
    }

    #[test]
    fn test_projection_tracks_aspect() {
        let camera = Camera::default();
        let wide = camera.projection(vk::Extent2D { width: 1600, height: 800 });
        let square = camera.projection(vk::Extent2D { width: 800, height: 800 });

        assert!((square.x_axis.x / wide.x_axis.x - 2.0).abs() < 1e-5);
        assert_eq!(square.y_axis.y, wide.y_axis.y);
        assert!(wide.y_axis.y < 0.0);
    }

    #[test]
    fn test_zero_height_extent_does_not_divide_by_zero() {
        let proj = Camera::default().projection(vk::Extent2D { width: 800, height: 0 });
        assert!(proj.x_axis.x.is_finite());
    }
}
