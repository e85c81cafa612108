// Mesh data on the CPU side
//
// Vertex layout (binding 0, stride 32):
//   location 0 - position  vec3
//   location 1 - normal    vec3
//   location 2 - uv        vec2

use anyhow::{Context, Result};
use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::Vec3;
use std::io::BufRead;
use std::path::Path;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

impl Vertex {
    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: std::mem::size_of::<Self>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 3] {
        [
            vk::VertexInputAttributeDescription {
                location: 0,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: std::mem::offset_of!(Vertex, position) as u32,
            },
            vk::VertexInputAttributeDescription {
                location: 1,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: std::mem::offset_of!(Vertex, normal) as u32,
            },
            vk::VertexInputAttributeDescription {
                location: 2,
                binding: 0,
                format: vk::Format::R32G32_SFLOAT,
                offset: std::mem::offset_of!(Vertex, uv) as u32,
            },
        ]
    }
}

/// Indexed triangle list
#[derive(Debug, Clone, Default)]
pub struct Mesh {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl Mesh {
    /// `"cube"` for the built-in cube, anything else is an OBJ path
    pub fn from_source(source: &str) -> Result<Self> {
        match source {
            "cube" => Ok(Self::cube()),
            path => Self::load_obj(Path::new(path)),
        }
    }

    /// Unit cube centred on the origin, counter-clockwise faces seen from outside
    pub fn cube() -> Self {
        // (normal, u axis, v axis) with u x v == normal
        let faces = [
            (Vec3::X, Vec3::Y, Vec3::Z),
            (Vec3::NEG_X, Vec3::Z, Vec3::Y),
            (Vec3::Y, Vec3::Z, Vec3::X),
            (Vec3::NEG_Y, Vec3::X, Vec3::Z),
            (Vec3::Z, Vec3::X, Vec3::Y),
            (Vec3::NEG_Z, Vec3::Y, Vec3::X),
        ];
        let corners = [
            (-1.0, -1.0, [0.0, 1.0]),
            (1.0, -1.0, [1.0, 1.0]),
            (1.0, 1.0, [1.0, 0.0]),
            (-1.0, 1.0, [0.0, 0.0]),
        ];

        let mut mesh = Self::default();
        for (normal, u, v) in faces {
            let base = mesh.vertices.len() as u32;
            for (su, sv, uv) in corners {
                let position = (normal + u * su + v * sv) * 0.5;
                mesh.vertices.push(Vertex {
                    position: position.to_array(),
                    normal: normal.to_array(),
                    uv,
                });
            }
            mesh.indices
                .extend_from_slice(&[base, base + 1, base + 2, base + 2, base + 3, base]);
        }
        mesh
    }

    pub fn load_obj(path: &Path) -> Result<Self> {
        let (models, _materials) = tobj::load_obj(path, &Self::obj_load_options())
            .with_context(|| format!("Failed to load OBJ {:?}", path))?;

        let mesh = Self::from_models(&models);
        log::debug!(
            "Loaded {:?}: {} vertices, {} indices",
            path,
            mesh.vertices.len(),
            mesh.indices.len()
        );
        Ok(mesh)
    }

    /// Parse OBJ text; material libraries are ignored
    pub fn from_obj_reader<R: BufRead>(reader: &mut R) -> Result<Self> {
        let (models, _materials) =
            tobj::load_obj_buf(reader, &Self::obj_load_options(), |_| Ok(Default::default()))
                .context("Failed to parse OBJ data")?;
        Ok(Self::from_models(&models))
    }

    fn obj_load_options() -> tobj::LoadOptions {
        tobj::LoadOptions {
            single_index: true,
            triangulate: true,
            ..Default::default()
        }
    }

    /// Merge every model into one vertex/index list. V is flipped because OBJ
    /// puts the texture origin at the bottom left.
    fn from_models(models: &[tobj::Model]) -> Self {
        let mut mesh = Self::default();

        for model in models {
            let m = &model.mesh;
            let base = mesh.vertices.len() as u32;
            let count = m.positions.len() / 3;

            for i in 0..count {
                let normal = if m.normals.len() >= (i + 1) * 3 {
                    [m.normals[i * 3], m.normals[i * 3 + 1], m.normals[i * 3 + 2]]
                } else {
                    [0.0, 0.0, 0.0]
                };
                let uv = if m.texcoords.len() >= (i + 1) * 2 {
                    [m.texcoords[i * 2], 1.0 - m.texcoords[i * 2 + 1]]
                } else {
                    [0.0, 0.0]
                };

                mesh.vertices.push(Vertex {
                    position: [m.positions[i * 3], m.positions[i * 3 + 1], m.positions[i * 3 + 2]],
                    normal,
                    uv,
                });
            }

            mesh.indices.extend(m.indices.iter().map(|&index| base + index));
        }

        mesh
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_layout() {
        assert_eq!(std::mem::size_of::<Vertex>(), 32);
        assert_eq!(Vertex::binding_description().stride, 32);

        let offsets: Vec<u32> = Vertex::attribute_descriptions().iter().map(|a| a.offset).collect();
        assert_eq!(offsets, vec![0, 12, 24]);
    }

    #[test]
    fn test_cube_faces_wind_outward() {
        let cube = Mesh::cube();
        assert_eq!(cube.vertices.len(), 24);
        assert_eq!(cube.indices.len(), 36);

        for tri in cube.indices.chunks(3) {
            let [a, b, c] = [tri[0], tri[1], tri[2]].map(|i| Vec3::from(cube.vertices[i as usize].position));
            let face_normal = (b - a).cross(c - a);
            let stored = Vec3::from(cube.vertices[tri[0] as usize].normal);
            assert!(face_normal.dot(stored) > 0.0, "triangle {:?} winds inward", tri);
        }
    }

    #[test]
    fn test_cube_is_unit_sized() {
        let cube = Mesh::cube();
        for vertex in &cube.vertices {
            for coord in vertex.position {
                assert!((coord.abs() - 0.5).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_obj_quad_is_triangulated_and_v_flipped() {
        let obj = "\
v 0 0 0
v 1 0 0
v 1 1 0
v 0 1 0
vt 0 0
vt 1 0
vt 1 1
vt 0 1
vn 0 0 1
f 1/1/1 2/2/1 3/3/1 4/4/1
";
        let mesh = Mesh::from_obj_reader(&mut obj.as_bytes()).unwrap();

        assert_eq!(mesh.indices.len(), 6);
        assert_eq!(mesh.vertices.len(), 4);
        assert!(mesh.indices.iter().all(|&i| (i as usize) < mesh.vertices.len()));

        let origin = mesh
            .vertices
            .iter()
            .find(|v| v.position == [0.0, 0.0, 0.0])
            .unwrap();
        assert_eq!(origin.uv, [0.0, 1.0]);
        assert_eq!(origin.normal, [0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_obj_without_normals_or_uvs() {
        let obj = "v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n";
        let mesh = Mesh::from_obj_reader(&mut obj.as_bytes()).unwrap();

        assert_eq!(mesh.vertices.len(), 3);
        assert!(mesh.vertices.iter().all(|v| v.uv == [0.0, 0.0]));
    }

    #[test]
    fn test_from_source_reports_missing_file() {
        assert!(Mesh::from_source("models/missing.obj").is_err());
        assert_eq!(Mesh::from_source("cube").unwrap().indices.len(), 36);
    }
}
