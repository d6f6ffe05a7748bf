/// Camera uniform data
///
/// One `CameraData` record lives in the uniform pool. It is written once per
/// view right before that view's commands are recorded.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};

/// Camera uniform block (std140, 208 bytes)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct CameraData {
    pub view: Mat4,
    pub proj: Mat4,
    pub view_proj: Mat4,
    /// World-space eye position (w = 1)
    pub position: Vec4,
}

impl CameraData {
    /// Build the block from view and projection matrices
    pub fn new(view: Mat4, proj: Mat4) -> Self {
        let eye = view.inverse().w_axis;
        Self {
            view,
            proj,
            view_proj: proj * view,
            position: Vec4::new(eye.x, eye.y, eye.z, 1.0),
        }
    }

    /// Same projection, different view matrix
    pub fn with_view(&self, view: Mat4) -> Self {
        Self::new(view, self.proj)
    }

    /// Right-handed look-at camera with a Vulkan clip-space perspective
    /// (depth 0..1, Y pointing down)
    pub fn look_at(eye: Vec3, target: Vec3, up: Vec3, fov_y: f32, aspect: f32, near: f32, far: f32) -> Self {
        let view = Mat4::look_at_rh(eye, target, up);
        Self::new(view, vulkan_perspective(fov_y, aspect, near, far))
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}

impl Default for CameraData {
    fn default() -> Self {
        Self::new(Mat4::IDENTITY, Mat4::IDENTITY)
    }
}

/// Perspective projection with the Y axis flipped for Vulkan clip space
pub fn vulkan_perspective(fov_y: f32, aspect: f32, near: f32, far: f32) -> Mat4 {
    let mut proj = Mat4::perspective_rh(fov_y, aspect, near, far);
    proj.y_axis.y *= -1.0;
    proj
}

#[cfg(test)]
#[path = "camera_tests.rs"]
mod tests;
