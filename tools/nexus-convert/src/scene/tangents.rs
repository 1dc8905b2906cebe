//! Per-loop tangents via MikkTSpace over the first UV layer

use glam::{DVec2, DVec3, Vec3};
use mikktspace::{Geometry, generate_tangents};
use nexus_common::tangent::TangentSpace;

use super::MeshObject;

struct LoopGeometry<'a> {
    mesh: &'a MeshObject,
    tangents: Vec<[f32; 4]>,
}

impl LoopGeometry<'_> {
    fn loop_index(&self, face: usize, vert: usize) -> usize {
        self.mesh.polygons[face].loop_start + vert
    }
}

impl Geometry for LoopGeometry<'_> {
    fn num_faces(&self) -> usize {
        self.mesh.polygons.len()
    }

    fn num_vertices_of_face(&self, _face: usize) -> usize {
        3
    }

    fn position(&self, face: usize, vert: usize) -> [f32; 3] {
        let l = &self.mesh.loops[self.loop_index(face, vert)];
        self.mesh.vertices[l.vertex].co.as_vec3().to_array()
    }

    fn normal(&self, face: usize, vert: usize) -> [f32; 3] {
        self.mesh.loops[self.loop_index(face, vert)]
            .normal
            .as_vec3()
            .to_array()
    }

    fn tex_coord(&self, face: usize, vert: usize) -> [f32; 2] {
        let l = &self.mesh.loops[self.loop_index(face, vert)];
        l.uvs.first().copied().unwrap_or(DVec2::ZERO).as_vec2().to_array()
    }

    fn set_tangent_encoded(&mut self, tangent: [f32; 4], face: usize, vert: usize) {
        let index = self.loop_index(face, vert);
        if let Some(slot) = self.tangents.get_mut(index) {
            *slot = tangent;
        }
    }
}

/// Whether any face spans a non-zero area at the precision MikkTSpace sees
fn has_area(mesh: &MeshObject) -> bool {
    mesh.polygons.iter().any(|p| {
        let [a, b, c] =
            [0, 1, 2].map(|i| mesh.vertices[mesh.loops[p.loop_start + i].vertex].co.as_vec3());
        (b - a).cross(c - a).length_squared() > 0.0
    })
}

/// Normal, tangent and bitangent of every loop
///
/// The bitangent is `sign * normal x tangent`. Meshes MikkTSpace rejects,
/// or whose faces all have zero area, get zero tangents.
pub fn loop_tangents(mesh: &MeshObject) -> Vec<TangentSpace> {
    let valid = mesh.polygons.iter().all(|p| {
        p.loop_start + 3 <= mesh.loops.len()
            && mesh.corners(p).iter().all(|l| l.vertex < mesh.vertices.len())
    }) && has_area(mesh);

    let mut geometry = LoopGeometry {
        mesh,
        tangents: vec![[0.0; 4]; mesh.loops.len()],
    };
    if !valid || !generate_tangents(&mut geometry) {
        tracing::warn!("Could not generate tangents for mesh `{}`", mesh.name);
        geometry.tangents.fill([0.0; 4]);
    }

    mesh.loops
        .iter()
        .zip(&geometry.tangents)
        .map(|(l, t)| {
            let tangent = Vec3::new(t[0], t[1], t[2]).as_dvec3();
            let bitangent = l.normal.cross(tangent) * f64::from(t[3]);
            TangentSpace::new(l.normal, tangent, bitangent)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::HostVertex;
    use smallvec::smallvec;

    fn flat_quad() -> MeshObject {
        let mut mesh = MeshObject::new("Quad");
        for (x, y) in [(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)] {
            mesh.vertices.push(HostVertex {
                co: DVec3::new(x, y, 0.0),
                normal: DVec3::Z,
                groups: Vec::new(),
            });
        }
        let uv = |x: f64, y: f64| smallvec![DVec2::new(x, y)];
        mesh.add_triangle([0, 1, 2], [uv(0.0, 0.0), uv(1.0, 0.0), uv(1.0, 1.0)], 0);
        mesh.add_triangle([0, 2, 3], [uv(0.0, 0.0), uv(1.0, 1.0), uv(0.0, 1.0)], 0);
        mesh
    }

    #[test]
    fn test_planar_uvs_give_axis_tangents() {
        let spaces = loop_tangents(&flat_quad());
        assert_eq!(spaces.len(), 6);
        for space in spaces {
            assert!(space.normal.abs_diff_eq(DVec3::Z, 1e-6));
            assert!(space.tangent.abs_diff_eq(DVec3::X, 1e-5));
            assert!(space.binormal.abs_diff_eq(DVec3::Y, 1e-5));
        }
    }

    #[test]
    fn test_broken_topology_yields_zero_tangents() {
        let mut mesh = flat_quad();
        mesh.loops[0].vertex = 99;
        let spaces = loop_tangents(&mesh);
        assert!(spaces.iter().all(|s| s.tangent == DVec3::ZERO));
    }

    #[test]
    fn test_zero_area_mesh_yields_zero_tangents() {
        let mut mesh = MeshObject::new("Placeholder");
        for _ in 0..3 {
            mesh.vertices.push(HostVertex {
                co: DVec3::new(0.0, 0.0, 1.0),
                normal: DVec3::Z,
                groups: Vec::new(),
            });
        }
        let uv = |x: f64, y: f64| smallvec![DVec2::new(x, y)];
        mesh.add_triangle([0, 1, 2], [uv(0.0, 0.0), uv(1.0, 0.0), uv(1.0, 1.0)], 0);

        let spaces = loop_tangents(&mesh);
        assert_eq!(spaces.len(), 3);
        assert!(spaces.iter().all(|s| s.tangent == DVec3::ZERO));
        assert!(spaces.iter().all(|s| s.normal == DVec3::Z));
    }
}
