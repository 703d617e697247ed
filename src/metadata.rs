use bytemuck::{Pod, Zeroable};

use crate::image::Plane;

#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub struct Vertex {
    /// Clip-space position.
    pub pos: [f32; 3],
    /// Luma-plane pixel coordinates.
    pub tex: [i32; 2],
}

impl Vertex {
    /// Triangle strip covering the viewport, with `t` growing downwards.
    pub fn quad(width: u32, height: u32) -> [Vertex; 4] {
        let (s, t) = (width as i32, height as i32);
        [
            Vertex { pos: [1.0, 1.0, 0.0], tex: [s, 0] },
            Vertex { pos: [1.0, -1.0, 0.0], tex: [s, t] },
            Vertex { pos: [-1.0, 1.0, 0.0], tex: [0, 0] },
            Vertex { pos: [-1.0, -1.0, 0.0], tex: [0, t] },
        ]
    }
}

/// Chroma plane decimation exponents, matching the `Decimation` uniform in the shader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct Decimation {
    pub u: [u32; 2],
    pub v: [u32; 2],
}

impl Decimation {
    pub fn new(u: &Plane, v: &Plane) -> Self {
        Self {
            u: [u.x_dec, u.y_dec],
            v: [v.x_dec, v.y_dec],
        }
    }
}
