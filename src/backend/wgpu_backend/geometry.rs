//! Static capture geometry: the unit cube and the full-screen quad.

use wgpu::util::DeviceExt;

use crate::backend::types::CubeFace;

/// Unit cube as a triangle list of positions in [-1, 1]^3.
pub fn unit_cube_vertices() -> Vec<[f32; 3]> {
    let mut vertices = Vec::with_capacity(36);
    for face in CubeFace::ALL {
        let corner = |u: f32, v: f32| face.texel_direction(u, v).to_array();
        let (tl, tr, bl, br) = (
            corner(-1.0, -1.0),
            corner(1.0, -1.0),
            corner(-1.0, 1.0),
            corner(1.0, 1.0),
        );
        vertices.extend_from_slice(&[tl, bl, tr, tr, bl, br]);
    }
    vertices
}

/// Full-screen quad as `[x, y, u, v]`, with `uv = (0, 0)` at the top-left.
pub const QUAD_VERTICES: [[f32; 4]; 6] = [
    [-1.0, 1.0, 0.0, 0.0],
    [-1.0, -1.0, 0.0, 1.0],
    [1.0, 1.0, 1.0, 0.0],
    [1.0, 1.0, 1.0, 0.0],
    [-1.0, -1.0, 0.0, 1.0],
    [1.0, -1.0, 1.0, 1.0],
];

pub const CUBE_VERTEX_LAYOUT: wgpu::VertexBufferLayout<'static> = wgpu::VertexBufferLayout {
    array_stride: 12,
    step_mode: wgpu::VertexStepMode::Vertex,
    attributes: &[wgpu::VertexAttribute {
        format: wgpu::VertexFormat::Float32x3,
        offset: 0,
        shader_location: 0,
    }],
};

pub const QUAD_VERTEX_LAYOUT: wgpu::VertexBufferLayout<'static> = wgpu::VertexBufferLayout {
    array_stride: 16,
    step_mode: wgpu::VertexStepMode::Vertex,
    attributes: &[
        wgpu::VertexAttribute {
            format: wgpu::VertexFormat::Float32x2,
            offset: 0,
            shader_location: 0,
        },
        wgpu::VertexAttribute {
            format: wgpu::VertexFormat::Float32x2,
            offset: 8,
            shader_location: 1,
        },
    ],
};

/// Vertex buffers created once per context
pub struct UnitGeometry {
    pub cube: wgpu::Buffer,
    pub cube_vertex_count: u32,
    pub quad: wgpu::Buffer,
    pub quad_vertex_count: u32,
}

impl UnitGeometry {
    pub fn new(device: &wgpu::Device) -> Self {
        let cube_vertices = unit_cube_vertices();
        let cube = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Unit Cube Vertices"),
            contents: bytemuck::cast_slice(&cube_vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let quad = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Unit Quad Vertices"),
            contents: bytemuck::cast_slice(&QUAD_VERTICES),
            usage: wgpu::BufferUsages::VERTEX,
        });
        Self {
            cube,
            cube_vertex_count: cube_vertices.len() as u32,
            quad,
            quad_vertex_count: QUAD_VERTICES.len() as u32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_cube_vertices_on_surface() {
        let vertices = unit_cube_vertices();
        assert_eq!(vertices.len(), 36);
        for v in vertices {
            assert!(v.iter().all(|c| c.abs() == 1.0), "{v:?}");
        }
    }

    #[test]
    fn test_quad_uv_matches_position() {
        for [x, y, u, v] in QUAD_VERTICES {
            assert_eq!(u, (x + 1.0) * 0.5);
            assert_eq!(v, (1.0 - y) * 0.5);
        }
    }
}
