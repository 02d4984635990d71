// Scene content - geometry and per-frame uniforms
//
// Meshes come from OBJ files (or the built-in cube); material diffuse
// colors are baked into vertex colors since the pipeline has no
// textures. Uniform math produces the spinning-model MVP set.

use anyhow::{Context, Result};
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};
use std::path::Path;

const DEFAULT_COLOR: [f32; 3] = [0.8, 0.8, 0.8];
const FALLBACK_NORMAL: [f32; 3] = [0.0, 1.0, 0.0];

/// Interleaved vertex: position + normal + color
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub color: [f32; 3],
}

impl Vertex {
    pub const STRIDE: u32 = std::mem::size_of::<Vertex>() as u32;

    pub fn binding_descriptions() -> Vec<ash::vk::VertexInputBindingDescription> {
        vec![ash::vk::VertexInputBindingDescription::builder()
            .binding(0)
            .stride(Self::STRIDE)
            .input_rate(ash::vk::VertexInputRate::VERTEX)
            .build()]
    }

    pub fn attribute_descriptions() -> Vec<ash::vk::VertexInputAttributeDescription> {
        vec![
            // Position (location 0)
            ash::vk::VertexInputAttributeDescription::builder()
                .binding(0)
                .location(0)
                .format(ash::vk::Format::R32G32B32_SFLOAT)
                .offset(0)
                .build(),
            // Normal (location 1)
            ash::vk::VertexInputAttributeDescription::builder()
                .binding(0)
                .location(1)
                .format(ash::vk::Format::R32G32B32_SFLOAT)
                .offset(12)
                .build(),
            // Color (location 2)
            ash::vk::VertexInputAttributeDescription::builder()
                .binding(0)
                .location(2)
                .format(ash::vk::Format::R32G32B32_SFLOAT)
                .offset(24)
                .build(),
        ]
    }
}

/// CPU-side indexed triangle mesh
pub struct Mesh {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl Mesh {
    /// Load an OBJ file, baking material diffuse colors into vertices
    pub fn load_obj<P: AsRef<Path> + std::fmt::Debug>(path: P) -> Result<Self> {
        let (models, materials) = tobj::load_obj(&path, &tobj::GPU_LOAD_OPTIONS)
            .with_context(|| format!("Failed to load OBJ model {:?}", path))?;

        let materials = materials.unwrap_or_else(|e| {
            log::warn!("Failed to load materials for {:?}: {}", path, e);
            Vec::new()
        });

        let mesh = Self::from_models(&models, &materials);
        if mesh.vertices.is_empty() {
            anyhow::bail!("OBJ model {:?} contains no geometry", path);
        }

        log::info!(
            "Loaded {:?}: {} vertices, {} triangles",
            path,
            mesh.vertices.len(),
            mesh.indices.len() / 3
        );

        Ok(mesh)
    }

    /// Flatten tobj models into one interleaved mesh
    pub fn from_models(models: &[tobj::Model], materials: &[tobj::Material]) -> Self {
        let mut vertices = Vec::new();
        let mut indices = Vec::new();

        for model in models {
            let mesh = &model.mesh;
            let color = mesh
                .material_id
                .and_then(|id| materials.get(id))
                .map(|m| m.diffuse)
                .unwrap_or(DEFAULT_COLOR);

            let base = vertices.len() as u32;
            let vertex_count = mesh.positions.len() / 3;

            for i in 0..vertex_count {
                let position = [
                    mesh.positions[3 * i],
                    mesh.positions[3 * i + 1],
                    mesh.positions[3 * i + 2],
                ];
                let normal = if mesh.normals.len() >= 3 * (i + 1) {
                    [
                        mesh.normals[3 * i],
                        mesh.normals[3 * i + 1],
                        mesh.normals[3 * i + 2],
                    ]
                } else {
                    FALLBACK_NORMAL
                };

                vertices.push(Vertex {
                    position,
                    normal,
                    color,
                });
            }

            indices.extend(mesh.indices.iter().map(|&i| base + i));
        }

        Self { vertices, indices }
    }

    /// Built-in unit cube, used when no model is configured (and in tests)
    pub fn cube() -> Self {
        // 4 vertices per face so each face gets a flat normal
        let faces: [([f32; 3], [[f32; 3]; 4], [f32; 3]); 6] = [
            // +Z
            (
                [0.0, 0.0, 1.0],
                [
                    [-0.5, -0.5, 0.5],
                    [0.5, -0.5, 0.5],
                    [0.5, 0.5, 0.5],
                    [-0.5, 0.5, 0.5],
                ],
                [0.9, 0.2, 0.2],
            ),
            // -Z
            (
                [0.0, 0.0, -1.0],
                [
                    [0.5, -0.5, -0.5],
                    [-0.5, -0.5, -0.5],
                    [-0.5, 0.5, -0.5],
                    [0.5, 0.5, -0.5],
                ],
                [0.2, 0.9, 0.2],
            ),
            // +X
            (
                [1.0, 0.0, 0.0],
                [
                    [0.5, -0.5, 0.5],
                    [0.5, -0.5, -0.5],
                    [0.5, 0.5, -0.5],
                    [0.5, 0.5, 0.5],
                ],
                [0.2, 0.2, 0.9],
            ),
            // -X
            (
                [-1.0, 0.0, 0.0],
                [
                    [-0.5, -0.5, -0.5],
                    [-0.5, -0.5, 0.5],
                    [-0.5, 0.5, 0.5],
                    [-0.5, 0.5, -0.5],
                ],
                [0.9, 0.9, 0.2],
            ),
            // +Y
            (
                [0.0, 1.0, 0.0],
                [
                    [-0.5, 0.5, 0.5],
                    [0.5, 0.5, 0.5],
                    [0.5, 0.5, -0.5],
                    [-0.5, 0.5, -0.5],
                ],
                [0.2, 0.9, 0.9],
            ),
            // -Y
            (
                [0.0, -1.0, 0.0],
                [
                    [-0.5, -0.5, -0.5],
                    [0.5, -0.5, -0.5],
                    [0.5, -0.5, 0.5],
                    [-0.5, -0.5, 0.5],
                ],
                [0.9, 0.2, 0.9],
            ),
        ];

        let mut vertices = Vec::with_capacity(24);
        let mut indices = Vec::with_capacity(36);

        for (normal, corners, color) in faces {
            let base = vertices.len() as u32;
            for position in corners {
                vertices.push(Vertex {
                    position,
                    normal,
                    color,
                });
            }
            indices.extend([base, base + 1, base + 2, base + 2, base + 3, base]);
        }

        Self { vertices, indices }
    }
}

/// Per-frame shader uniforms
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct FrameUniforms {
    pub model: Mat4,
    pub view: Mat4,
    pub proj: Mat4,
}

impl FrameUniforms {
    pub const EYE: Vec3 = Vec3::new(2.0, 2.0, 2.0);
    const FOV_Y_DEGREES: f32 = 45.0;
    const Z_NEAR: f32 = 0.1;
    const Z_FAR: f32 = 10.0;

    /// Uniforms for the given elapsed time, spin speed (deg/sec) and
    /// viewport aspect ratio
    pub fn new(elapsed_secs: f32, rotation_speed: f32, aspect: f32) -> Self {
        let model = Mat4::from_rotation_z((elapsed_secs * rotation_speed).to_radians());
        let view = Mat4::look_at_rh(Self::EYE, Vec3::ZERO, Vec3::Z);

        let mut proj = Mat4::perspective_rh(
            Self::FOV_Y_DEGREES.to_radians(),
            aspect,
            Self::Z_NEAR,
            Self::Z_FAR,
        );
        // Vulkan clip space points Y down
        proj.y_axis.y *= -1.0;

        Self { model, view, proj }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_layout_matches_pipeline_expectations() {
        assert_eq!(Vertex::STRIDE, 36);

        let bindings = Vertex::binding_descriptions();
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].stride, 36);

        let attrs = Vertex::attribute_descriptions();
        assert_eq!(attrs.len(), 3);
        assert_eq!(attrs[0].offset, 0);
        assert_eq!(attrs[1].offset, 12);
        assert_eq!(attrs[2].offset, 24);
    }

    #[test]
    fn cube_is_a_closed_indexed_mesh() {
        let cube = Mesh::cube();
        assert_eq!(cube.vertices.len(), 24);
        assert_eq!(cube.indices.len(), 36);

        for &index in &cube.indices {
            assert!((index as usize) < cube.vertices.len());
        }

        // Face normals are unit length
        for vertex in &cube.vertices {
            let n = Vec3::from(vertex.normal);
            assert!((n.length() - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn obj_buffer_round_trips_through_tobj() {
        let obj = b"
v 0.0 0.0 0.0
v 1.0 0.0 0.0
v 0.0 1.0 0.0
vn 0.0 0.0 1.0
f 1//1 2//1 3//1
";
        let (models, _) = tobj::load_obj_buf(
            &mut &obj[..],
            &tobj::GPU_LOAD_OPTIONS,
            |_| Err(tobj::LoadError::OpenFileFailed),
        )
        .unwrap();

        let mesh = Mesh::from_models(&models, &[]);
        assert_eq!(mesh.vertices.len(), 3);
        assert_eq!(mesh.indices, vec![0, 1, 2]);
        assert_eq!(mesh.vertices[0].normal, [0.0, 0.0, 1.0]);
        // No materials: default color applies
        assert_eq!(mesh.vertices[0].color, [0.8, 0.8, 0.8]);
    }

    #[test]
    fn missing_normals_fall_back() {
        let obj = b"
v 0.0 0.0 0.0
v 1.0 0.0 0.0
v 0.0 1.0 0.0
f 1 2 3
";
        let (models, _) = tobj::load_obj_buf(
            &mut &obj[..],
            &tobj::GPU_LOAD_OPTIONS,
            |_| Err(tobj::LoadError::OpenFileFailed),
        )
        .unwrap();

        let mesh = Mesh::from_models(&models, &[]);
        assert_eq!(mesh.vertices[0].normal, [0.0, 1.0, 0.0]);
    }

    #[test]
    fn uniforms_start_unrotated() {
        let uniforms = FrameUniforms::new(0.0, 90.0, 16.0 / 9.0);
        assert!(uniforms
            .model
            .abs_diff_eq(Mat4::IDENTITY, 1e-6));
    }

    #[test]
    fn model_spins_at_configured_speed() {
        // 90 deg/sec for one second rotates +X onto +Y
        let uniforms = FrameUniforms::new(1.0, 90.0, 1.0);
        let rotated = uniforms.model.transform_point3(Vec3::X);
        assert!(rotated.abs_diff_eq(Vec3::Y, 1e-5), "got {:?}", rotated);
    }

    #[test]
    fn projection_flips_y_for_vulkan() {
        let uniforms = FrameUniforms::new(0.0, 90.0, 16.0 / 9.0);
        assert!(uniforms.proj.y_axis.y < 0.0);

        // Wider aspect squeezes X
        let wide = FrameUniforms::new(0.0, 90.0, 2.0);
        let narrow = FrameUniforms::new(0.0, 90.0, 1.0);
        assert!(wide.proj.x_axis.x < narrow.proj.x_axis.x);
    }
}
