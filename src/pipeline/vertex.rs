//! GPU vertex format produced by the mesh generator.

use wgpu::{VertexAttribute, VertexBufferLayout, VertexFormat, VertexStepMode};

use crate::pipeline::properties::PropertyHandle;

/// One vertex as written into device buffer regions.
///
/// Positions are baked in the owning transform slot's space; the vertex
/// shader composes them with the referenced transform page. The `pages`
/// channel carries property-table handles (a spare integer channel, the
/// equivalent of packing into unused vertex-color bits):
/// `[transform, clip_rect, opacity, color | text_effect << 16]`.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuVertex {
    /// Position in the owning transform slot's space.
    pub position: [f32; 2],
    /// Texture coordinate, or a displacement vector for entries that encode
    /// offsets in the UV channel.
    pub uv: [f32; 2],
    /// Vertex color RGBA (baked colors; white for dynamic-color content).
    pub color: [f32; 4],
    /// Property-table handles.
    pub pages: [u32; 4],
}

impl GpuVertex {
    /// A degenerate vertex used to complete under-written declarations.
    pub const DEGENERATE: GpuVertex = GpuVertex {
        position: [0.0, 0.0],
        uv: [0.0, 0.0],
        color: [0.0, 0.0, 0.0, 0.0],
        pages: [0, 0, 0, 0],
    };

    /// Pack the color and text-effect handles into the shared page channel.
    pub fn pack_color_pages(color: PropertyHandle, effect: PropertyHandle) -> u32 {
        debug_assert!(color.index() < 0x1_0000);
        debug_assert!(effect.index() < 0x1_0000);
        color.index() | (effect.index() << 16)
    }

    /// Vertex buffer layout for the pipeline's mesh regions.
    pub fn desc() -> VertexBufferLayout<'static> {
        VertexBufferLayout {
            array_stride: std::mem::size_of::<GpuVertex>() as u64,
            step_mode: VertexStepMode::Vertex,
            attributes: &[
                // position
                VertexAttribute {
                    offset: 0,
                    shader_location: 0,
                    format: VertexFormat::Float32x2,
                },
                // uv
                VertexAttribute {
                    offset: 8,
                    shader_location: 1,
                    format: VertexFormat::Float32x2,
                },
                // color
                VertexAttribute {
                    offset: 16,
                    shader_location: 2,
                    format: VertexFormat::Float32x4,
                },
                // pages
                VertexAttribute {
                    offset: 32,
                    shader_location: 3,
                    format: VertexFormat::Uint32x4,
                },
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_size() {
        // position (8) + uv (8) + color (16) + pages (16)
        assert_eq!(std::mem::size_of::<GpuVertex>(), 48);
    }

    #[test]
    fn test_pack_color_pages() {
        let packed = GpuVertex::pack_color_pages(PropertyHandle::DEFAULT, PropertyHandle::DEFAULT);
        assert_eq!(packed, 0);
    }
}
