//! Host scene -> file
//!
//! One model per armature. Bones are ordered by depth then name; the skin,
//! tangent and UV data of every mesh is resolved per emitted vertex slot.

use anyhow::{Context, Result, bail};
use glam::DVec2;
use hashbrown::HashMap;
use nexus_common::basis::{inverse_world_matrix, local_transform};
use nexus_common::dedup::{Corner, dedup_triangles};
use nexus_common::formats::{self, skeletal::SkeletalWriter};
use nexus_common::model::{NO_PARENT, WORLD_BONE_ID};
use nexus_common::skinning::{SkinWeights, resolve};
use nexus_common::tangent::{TangentSpace, average_per_vertex, select};
use nexus_common::{
    Bone, FormatKind, FormatSpec, InvariantViolation, Mesh, Model, NameKind, Skeleton,
    TangentConvention, Triangle, UnweightedPolicy, Vertex,
};
use std::io::Write;
use std::path::Path;

use crate::config::ExportSection;
use crate::scene::{Armature, MeshObject, SceneReader};

/// Counts reported after an export
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportSummary {
    pub armatures: usize,
    pub bones: usize,
    pub meshes: usize,
    pub vertices: usize,
    pub triangles: usize,
    /// Vertices whose tangent space came from an earlier import
    pub preserved_tangents: usize,
    /// Vertices whose tangent space was recomputed
    pub computed_tangents: usize,
}

impl ExportSummary {
    fn add(&mut self, other: ExportSummary) {
        self.armatures += other.armatures;
        self.bones += other.bones;
        self.meshes += other.meshes;
        self.vertices += other.vertices;
        self.triangles += other.triangles;
        self.preserved_tangents += other.preserved_tangents;
        self.computed_tangents += other.computed_tangents;
    }
}

/// Export the whole scene to `path`
///
/// On failure the partial output is still written, followed by an
/// `aborted!` line.
pub fn export_file<S: SceneReader>(
    scene: &S,
    path: &Path,
    kind: FormatKind,
    options: &ExportSection,
) -> Result<ExportSummary> {
    let spec = options.format_spec(kind)?;
    tracing::info!("Exporting {:?}", path);

    let mut buffer = Vec::new();
    match write_scene(scene, &spec, &mut buffer) {
        Ok(summary) => {
            std::fs::write(path, &buffer).with_context(|| format!("Failed to write {:?}", path))?;
            tracing::info!(
                "Exported {} bones, {} meshes ({} vertices, {} triangles)",
                summary.bones,
                summary.meshes,
                summary.vertices,
                summary.triangles
            );
            Ok(summary)
        }
        Err(err) => {
            buffer.extend_from_slice(b"aborted!\n");
            if let Err(write_err) = std::fs::write(path, &buffer) {
                tracing::warn!("Could not write partial output {:?}: {}", path, write_err);
            }
            Err(err.context(format!("Failed to export {:?}", path)))
        }
    }
}

/// Encode every armature of the scene into `out`
pub fn write_scene<S: SceneReader, W: Write>(
    scene: &S,
    spec: &FormatSpec,
    out: W,
) -> Result<ExportSummary> {
    if scene.armatures().is_empty() {
        bail!("Nothing to export: the scene has no armature");
    }

    let mut summary = ExportSummary::default();
    match spec.kind {
        FormatKind::Nb2 => {
            let mut models = Vec::new();
            for index in 0..scene.armatures().len() {
                let (model, counts) = build_model(scene, index, spec)?;
                summary.add(counts);
                models.push(model);
            }
            formats::encode(spec, &models, out)?;
        }
        FormatKind::Cn6 | FormatKind::Br2 => {
            let mut writer = SkeletalWriter::new(spec, out)?;
            for index in 0..scene.armatures().len() {
                let (model, counts) = build_model(scene, index, spec)?;
                summary.add(counts);
                writer.write_model(&model)?;
            }
            writer.finish()?;
        }
    }
    Ok(summary)
}

/// Build the file model of one armature and its meshes
pub fn build_model<S: SceneReader>(
    scene: &S,
    armature_index: usize,
    spec: &FormatSpec,
) -> Result<(Model, ExportSummary)> {
    let Some(armature) = scene.armatures().get(armature_index) else {
        bail!("No armature at index {}", armature_index);
    };

    let (skeleton, bone_ids) = build_skeleton(armature, spec);
    let mut summary = ExportSummary {
        armatures: 1,
        bones: skeleton.len(),
        ..Default::default()
    };

    let mut meshes = Vec::new();
    for object in scene.meshes_of(armature_index) {
        let tangents = scene.loop_tangents(object);
        let (mesh, counts) = build_mesh(armature, object, &tangents, &bone_ids, spec)?;
        tracing::info!(
            "Mesh `{}`: {} vertices, {} triangles ({} tangent spaces preserved, {} calculated)",
            mesh.name,
            mesh.vertices.len(),
            mesh.triangles.len(),
            counts.preserved_tangents,
            counts.computed_tangents
        );
        summary.add(counts);
        meshes.push(mesh);
    }

    Ok((
        Model {
            skeleton,
            meshes,
            ..Default::default()
        },
        summary,
    ))
}

/// Bones in file order plus the id of every host bone name
///
/// Formats with inverse world matrices get the armature itself as bone 0.
fn build_skeleton<'a>(
    armature: &'a Armature,
    spec: &FormatSpec,
) -> (Skeleton, HashMap<&'a str, i32>) {
    let with_world = spec.has_inverse_world_matrix;
    let offset = i32::from(with_world);
    let mut ids: HashMap<&str, i32> = HashMap::new();
    let mut bones = Vec::with_capacity(armature.bones.len() + 1);

    if with_world {
        let name = armature.name_map.original(NameKind::Bone, &armature.name);
        bones.push(Bone::world(name));
        ids.insert(armature.name.as_str(), WORLD_BONE_ID);

        // a lone bone named like the armature is the world bone itself
        if armature.bones.len() == 1 && armature.bones[0].name == armature.name {
            return (Skeleton { bones }, ids);
        }
    }

    let mut order: Vec<usize> = (0..armature.bones.len()).collect();
    order.sort_by(|&a, &b| {
        armature
            .depth(a)
            .cmp(&armature.depth(b))
            .then_with(|| armature.bones[a].name.cmp(&armature.bones[b].name))
    });
    let mut rank = vec![0usize; armature.bones.len()];
    for (r, &index) in order.iter().enumerate() {
        rank[index] = r;
    }

    for (r, &index) in order.iter().enumerate() {
        let bone = &armature.bones[index];
        let parent = bone.parent.and_then(|p| armature.bones.get(p).map(|b| (p, b)));
        let (local_position, local_rotation) =
            local_transform(&bone.matrix, parent.map(|(_, b)| &b.matrix));

        let id = r as i32 + offset;
        let parent_id = match parent {
            Some((p, _)) => rank[p] as i32 + offset,
            None if with_world => WORLD_BONE_ID,
            None => NO_PARENT,
        };

        let mut exported = Bone::world(armature.name_map.original(NameKind::Bone, &bone.name));
        exported.id = id;
        exported.parent_id = parent_id;
        exported.local_position = local_position;
        exported.local_rotation = local_rotation;
        if with_world {
            exported.inverse_world_matrix = inverse_world_matrix(&bone.matrix);
        }
        bones.push(exported);
        ids.insert(bone.name.as_str(), id);
    }

    (Skeleton { bones }, ids)
}

fn build_mesh(
    armature: &Armature,
    object: &MeshObject,
    loop_tangents: &[TangentSpace],
    bone_ids: &HashMap<&str, i32>,
    spec: &FormatSpec,
) -> Result<(Mesh, ExportSummary)> {
    let name = armature
        .name_map
        .original(NameKind::Mesh, &object.name)
        .to_string();

    let averaged = average_per_vertex(
        object.vertices.len(),
        object
            .loops
            .iter()
            .zip(loop_tangents)
            .map(|(l, space)| (l.vertex, *space)),
    );
    let (spaces, preserved) = match spec.tangent_convention {
        TangentConvention::Averaged => select(averaged, object.preserved_tangents.as_ref()),
        TangentConvention::HostNormalNegatedBitangent => {
            let spaces = averaged
                .into_iter()
                .zip(&object.vertices)
                .map(|(space, v)| TangentSpace::new(v.normal, space.tangent, -space.binormal))
                .collect();
            (spaces, 0)
        }
    };

    let mut corners = Vec::with_capacity(object.polygons.len());
    let mut materials = Vec::with_capacity(object.polygons.len());
    for polygon in &object.polygons {
        let loops = object.corners(polygon);
        if loops.len() != 3 || loops.iter().any(|l| l.vertex >= object.vertices.len()) {
            tracing::warn!("Skipping broken polygon in mesh `{}`", object.name);
            continue;
        }
        corners.push([0, 1, 2].map(|i| Corner {
            vertex: loops[i].vertex,
            uvs: (0..spec.uv_channel_count)
                .map(|c| {
                    loops[i]
                        .uvs
                        .get(c)
                        .map_or(DVec2::ZERO, |uv| DVec2::new(uv.x, 1.0 - uv.y))
                })
                .collect(),
        }));
        materials.push(polygon.material_index);
    }

    let (slots, remapped) = dedup_triangles(&corners);

    // only vertices a triangle uses are skinned
    let mut skins: HashMap<usize, SkinWeights> = HashMap::new();
    let mut vertices: Vec<Vertex> = Vec::with_capacity(slots.len());
    for slot in slots {
        let skin = match skins.get(&slot.vertex) {
            Some(skin) => skin.clone(),
            None => {
                let skin = vertex_skin(object, slot.vertex, bone_ids, spec, &name)?;
                skins.insert(slot.vertex, skin.clone());
                skin
            }
        };
        let host = &object.vertices[slot.vertex];
        let space = spaces.get(slot.vertex).copied().unwrap_or_default();
        vertices.push(Vertex {
            position: host.co + object.location,
            normal: space.normal,
            tangent: space.tangent,
            binormal: space.binormal,
            uvs: slot.uvs,
            bone_ids: skin.bone_ids,
            bone_weights: skin.weights,
        });
    }
    let triangles: Vec<Triangle> = remapped
        .into_iter()
        .zip(materials)
        .map(|(vertices, material_index)| Triangle {
            vertices,
            material_index,
        })
        .collect();

    let summary = ExportSummary {
        meshes: 1,
        vertices: vertices.len(),
        triangles: triangles.len(),
        preserved_tangents: preserved,
        computed_tangents: object.vertices.len() - preserved,
        ..Default::default()
    };
    Ok((
        Mesh {
            name,
            materials: object.materials.clone(),
            vertices,
            triangles,
        },
        summary,
    ))
}

/// Influence slots of one host vertex
///
/// Weights are normalized over every group of the vertex; groups that name
/// no bone only dilute the total. Influences are ranked in bone id order
/// with the world bone last.
fn vertex_skin(
    object: &MeshObject,
    vertex: usize,
    bone_ids: &HashMap<&str, i32>,
    spec: &FormatSpec,
    mesh_name: &str,
) -> Result<SkinWeights, InvariantViolation> {
    let total: f64 = object.group_weights(vertex).map(|(_, w)| w.max(0.0)).sum();
    let mut influences: Vec<(i32, f64)> = Vec::new();
    if total > 0.0 {
        for (group, weight) in object.group_weights(vertex) {
            if let Some(&id) = bone_ids.get(group) {
                influences.push((id, weight / total));
            }
        }
    }
    influences.sort_by_key(|&(id, _)| (id == WORLD_BONE_ID, id));

    match resolve(vertex, &influences, spec.influence_count, spec.weight_rounding)? {
        Some(skin) => Ok(skin),
        None => match spec.unweighted {
            UnweightedPolicy::Sentinel => Ok(SkinWeights::sentinel(spec.influence_count)),
            UnweightedPolicy::Reject => Err(InvariantViolation::UnweightedVertex {
                mesh: mesh_name.to_string(),
                vertex,
            }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{EditBone, HostScene, HostVertex, SceneWriter};
    use glam::{DMat4, DVec3};
    use nexus_common::{BR2, CN6, NB2};
    use smallvec::smallvec;

    fn edit_bone(name: &str, parent: Option<usize>, head: DVec3) -> EditBone {
        EditBone {
            name: name.into(),
            parent,
            matrix: DMat4::from_translation(head),
            length: 3.0,
        }
    }

    fn scene() -> HostScene {
        let mut scene = HostScene::new();
        let mut armature = Armature::new("Leader");
        armature.bones = vec![
            edit_bone("Spine", None, DVec3::ZERO),
            edit_bone("Head", Some(0), DVec3::new(0.0, 0.0, 2.0)),
            edit_bone("Arm", Some(0), DVec3::new(1.0, 0.0, 1.0)),
        ];
        let index = scene.add_armature(armature);

        let mut mesh = MeshObject::new("Body");
        mesh.armature = Some(index);
        mesh.location = DVec3::new(0.0, 0.0, 10.0);
        mesh.materials = vec!["Skin".into()];
        mesh.uv_layers = vec!["UVMap".into()];
        for x in [0.0, 1.0, 1.0, 0.0] {
            mesh.vertices.push(HostVertex {
                co: DVec3::new(x, 0.0, 0.0),
                normal: DVec3::Z,
                groups: Vec::new(),
            });
        }
        let uv = |u: f64, v: f64| smallvec![DVec2::new(u, v)];
        mesh.add_triangle([0, 1, 2], [uv(0.0, 1.0), uv(1.0, 1.0), uv(1.0, 0.0)], 0);
        mesh.add_triangle([0, 2, 3], [uv(0.5, 1.0), uv(1.0, 0.0), uv(0.0, 0.0)], 0);
        let head = mesh.vertex_group("Head");
        let arm = mesh.vertex_group("Arm");
        let extra = mesh.vertex_group("Cloth");
        for v in 0..4 {
            mesh.add_weight(v, head, 0.5);
            mesh.add_weight(v, arm, 0.5);
        }
        mesh.add_weight(3, extra, 1.0);
        scene.add_mesh(mesh);
        scene
    }

    #[test]
    fn test_bone_order_and_ids() {
        let scene = scene();
        let (model, summary) = build_model(&scene, 0, &BR2).unwrap();
        let names: Vec<&str> = model.skeleton.bones.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["Leader", "Spine", "Arm", "Head"]);
        let parents: Vec<i32> = model.skeleton.bones.iter().map(|b| b.parent_id).collect();
        assert_eq!(parents, vec![-1, 0, 1, 1]);
        assert_eq!(model.skeleton.bones[3].id, 3);
        assert_eq!(summary.bones, 4);
    }

    #[test]
    fn test_nb2_has_no_world_bone() {
        let scene = scene();
        let (model, _) = build_model(&scene, 0, &NB2).unwrap();
        let parents: Vec<i32> = model.skeleton.bones.iter().map(|b| b.parent_id).collect();
        assert_eq!(parents, vec![-1, 0, 0]);
        assert_eq!(model.meshes[0].vertices[0].bone_ids[0], 1);
    }

    #[test]
    fn test_seam_splits_vertex_and_offsets_location() {
        let scene = scene();
        let (model, summary) = build_model(&scene, 0, &BR2).unwrap();
        let mesh = &model.meshes[0];
        // vertex 0 appears with two different UVs
        assert_eq!(mesh.vertices.len(), 5);
        assert_eq!(summary.vertices, 5);
        assert_eq!(mesh.vertices[0].position, DVec3::new(0.0, 0.0, 10.0));
        // host V is flipped back
        assert_eq!(mesh.vertices[0].uvs[0], DVec2::new(0.0, 0.0));
        assert_eq!(mesh.triangles[1].vertices, [3, 2, 4]);
    }

    #[test]
    fn test_equal_weights_keep_id_order() {
        let scene = scene();
        let (model, _) = build_model(&scene, 0, &BR2).unwrap();
        let vertex = &model.meshes[0].vertices[0];
        // Arm (2) before Head (3); ties keep id order
        assert_eq!(vertex.bone_ids.as_slice(), &[2, 3, 2, 2]);
        assert_eq!(vertex.bone_weights.as_slice(), &[128, 127, 0, 0]);
    }

    #[test]
    fn test_non_bone_group_dilutes_total() {
        let scene = scene();
        let (model, _) = build_model(&scene, 0, &CN6).unwrap();
        let mesh = &model.meshes[0];
        let last = mesh.vertices.last().unwrap();
        assert_eq!(last.bone_ids[..2], [2, 3]);
        assert_eq!(last.weight_sum(), 255);
    }

    #[test]
    fn test_unweighted_vertex_policy() {
        let mut scene = scene();
        scene.meshes[0].vertices[1].groups.clear();

        let err = build_model(&scene, 0, &BR2).unwrap_err();
        assert!(err.to_string().contains("Body"));

        let (model, _) = build_model(&scene, 0, &CN6).unwrap();
        assert!(model.meshes[0].vertices[1].is_unweighted());
    }

    #[test]
    fn test_loose_unweighted_vertex_is_not_exported() {
        let mut scene = scene();
        scene.meshes[0].vertices.push(HostVertex {
            co: DVec3::new(5.0, 5.0, 5.0),
            normal: DVec3::Z,
            groups: Vec::new(),
        });

        let (model, summary) = build_model(&scene, 0, &BR2).unwrap();
        assert_eq!(model.meshes[0].vertices.len(), 5);
        assert_eq!(summary.vertices, 5);
        assert!(model.meshes[0].vertices.iter().all(|v| v.weight_sum() == 255));
    }

    #[test]
    fn test_lone_bone_named_like_armature() {
        let mut scene = HostScene::new();
        let mut armature = Armature::new("Prop");
        armature.bones = vec![edit_bone("Prop", None, DVec3::ZERO)];
        scene.add_armature(armature);
        let mut mesh = MeshObject::new("Crate");
        mesh.armature = Some(0);
        mesh.vertices = vec![HostVertex::default(); 3];
        mesh.add_triangle([0, 1, 2], [smallvec![], smallvec![], smallvec![]], 0);
        let group = mesh.vertex_group("Prop");
        for v in 0..3 {
            mesh.add_weight(v, group, 1.0);
        }
        scene.add_mesh(mesh);

        let (model, _) = build_model(&scene, 0, &BR2).unwrap();
        assert_eq!(model.skeleton.len(), 1);
        let vertex = &model.meshes[0].vertices[0];
        assert_eq!(vertex.bone_ids.as_slice(), &[0, 0, 0, 0]);
        assert_eq!(vertex.bone_weights.as_slice(), &[255, 0, 0, 0]);
    }

    #[test]
    fn test_failed_export_marks_file_aborted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.br2");
        let mut scene = scene();
        scene.meshes[0].vertices[2].groups.clear();

        assert!(export_file(&scene, &path, FormatKind::Br2, &ExportSection::default()).is_err());
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.ends_with("aborted!\n"));
        assert!(text.starts_with("// Nexus Buddy BR2"));
    }

    #[test]
    fn test_zero_area_mesh_exports() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("placeholder.cn6");
        let mut scene = scene();
        for v in &mut scene.meshes[0].vertices {
            v.co = DVec3::new(0.0, 0.0, 1.0);
        }

        let summary =
            export_file(&scene, &path, FormatKind::Cn6, &ExportSection::default()).unwrap();
        assert_eq!(summary.triangles, 2);
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.ends_with("end\n"));
    }

    #[test]
    fn test_empty_scene() {
        let scene = HostScene::new();
        assert!(write_scene(&scene, &CN6, Vec::new()).is_err());
    }
}
