use bytemuck::{Pod, Zeroable};

/// GPU-uploadable vertex layout for batched and standalone block meshes.
/// The render collaborator owns the actual buffer upload.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub color: [f32; 3],
    pub uv: [f32; 2],
}
