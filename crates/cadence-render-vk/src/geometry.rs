// SPDX-License-Identifier: CEPL-1.0
use bytemuck::{Pod, Zeroable};

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct Vertex3d {
    pub position: [f32; 3],
}

/// Capacity of the shared object vertex and index buffers, in elements.
pub const MAX_VERTICES: usize = 1024;
pub const MAX_INDICES: usize = 1024;

const QUAD_SCALE: f32 = 10.0;

pub const QUAD_VERTICES: [Vertex3d; 4] = [
    Vertex3d {
        position: [-0.5 * QUAD_SCALE, -0.5 * QUAD_SCALE, 0.0],
    },
    Vertex3d {
        position: [0.5 * QUAD_SCALE, 0.5 * QUAD_SCALE, 0.0],
    },
    Vertex3d {
        position: [-0.5 * QUAD_SCALE, 0.5 * QUAD_SCALE, 0.0],
    },
    Vertex3d {
        position: [0.5 * QUAD_SCALE, -0.5 * QUAD_SCALE, 0.0],
    },
];

pub const QUAD_INDICES: [u32; 6] = [0, 1, 2, 0, 3, 1];
