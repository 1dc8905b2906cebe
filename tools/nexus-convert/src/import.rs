//! File -> host scene
//!
//! Builds edit bones with the forward basis conversion, mesh objects with
//! per-corner UVs and vertex groups, and optionally shortens names and drops
//! the top bone.

use anyhow::{Context, Result};
use glam::DVec2;
use nexus_common::basis::BoneFrame;
use nexus_common::formats;
use nexus_common::model::WEIGHT_TOTAL;
use nexus_common::tangent::{PreservedTangents, TangentSpace, has_authored_tangents};
use nexus_common::{FormatKind, Model, NameKind, NameMap, NameShortener};
use smallvec::SmallVec;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::config::ImportSection;
use crate::format_of;
use crate::scene::{Armature, EditBone, HostVertex, MeshObject, SceneWriter};

/// Counts reported after an import
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub armatures: usize,
    pub bones: usize,
    pub meshes: usize,
    pub vertices: usize,
    pub triangles: usize,
}

impl ImportSummary {
    fn add(&mut self, other: ImportSummary) {
        self.armatures += other.armatures;
        self.bones += other.bones;
        self.meshes += other.meshes;
        self.vertices += other.vertices;
        self.triangles += other.triangles;
    }
}

/// Imports files into a scene; name counters persist across files
pub struct Importer<'a> {
    options: &'a ImportSection,
    shortener: NameShortener,
}

impl<'a> Importer<'a> {
    pub fn new(options: &'a ImportSection) -> Self {
        Self {
            options,
            shortener: NameShortener::new(),
        }
    }

    /// Import every model in `path`; armatures are named after the file stem
    pub fn import_file<S: SceneWriter>(&mut self, scene: &mut S, path: &Path) -> Result<ImportSummary> {
        let kind = format_of(path)?;
        tracing::info!("Importing {:?}", path);

        let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
        let models = formats::decode_models(kind.spec(), BufReader::new(file))
            .with_context(|| format!("Failed to load {:?}", path))?;

        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("Armature");

        let mut summary = ImportSummary::default();
        for (i, model) in models.iter().enumerate() {
            let name = if i == 0 {
                stem.to_string()
            } else {
                format!("{}.{:03}", stem, i)
            };
            let imported = self
                .import_model(scene, model, kind, &name)
                .with_context(|| format!("Failed to import {:?}", path))?;
            summary.add(imported);
        }

        tracing::info!(
            "Imported {} bones, {} meshes ({} vertices, {} triangles)",
            summary.bones,
            summary.meshes,
            summary.vertices,
            summary.triangles
        );
        Ok(summary)
    }

    /// Add one decoded model to the scene as an armature plus its meshes
    pub fn import_model<S: SceneWriter>(
        &mut self,
        scene: &mut S,
        model: &Model,
        kind: FormatKind,
        name: &str,
    ) -> Result<ImportSummary> {
        let mut armature = Armature::new(name);

        // Bones, in file order
        let mut frames: Vec<BoneFrame> = Vec::with_capacity(model.skeleton.len());
        for (index, bone) in model.skeleton.bones.iter().enumerate() {
            let parent = bone.parent_index().filter(|&p| p < index);
            let frame = BoneFrame::from_local(
                bone.local_position,
                bone.local_rotation,
                parent.map(|p| &frames[p]),
            );
            frames.push(frame);

            let bone_name = self.rename(NameKind::Bone, &bone.name, &mut armature.name_map)?;
            armature.bones.push(EditBone {
                name: bone_name,
                parent,
                matrix: frame.edit_matrix(),
                length: self.options.bone_length,
            });
        }

        // Meshes reference bones by file index, so build them before any
        // bone is removed
        let mut meshes = Vec::with_capacity(model.meshes.len());
        let mut summary = ImportSummary {
            armatures: 1,
            bones: armature.bones.len(),
            meshes: model.meshes.len(),
            ..Default::default()
        };
        for mesh in &model.meshes {
            let name = self.rename(NameKind::Mesh, &mesh.name, &mut armature.name_map)?;
            let object = build_mesh(name, mesh, &armature, kind);
            summary.vertices += object.vertices.len();
            summary.triangles += object.polygons.len();
            for material in &object.materials {
                scene.ensure_material(material);
            }
            meshes.push(object);
        }
        for material in &model.materials {
            scene.ensure_material(&material.host_name());
        }

        if self.options.delete_top_bone {
            delete_top_bone(&mut armature);
        }

        let index = scene.add_armature(armature);
        for mut mesh in meshes {
            mesh.armature = Some(index);
            scene.add_mesh(mesh);
        }
        Ok(summary)
    }

    fn rename(&mut self, kind: NameKind, name: &str, map: &mut NameMap) -> Result<String> {
        if !self.options.shorten_names {
            return Ok(name.to_string());
        }
        Ok(self.shortener.shorten(kind, name, map)?)
    }
}

fn build_mesh(
    name: String,
    mesh: &nexus_common::Mesh,
    armature: &Armature,
    kind: FormatKind,
) -> MeshObject {
    let mut object = MeshObject::new(name);
    object.materials = mesh.materials.clone();

    let channels = mesh.vertices.iter().map(|v| v.uvs.len()).max().unwrap_or(0);
    object.uv_layers = (0..channels)
        .map(|c| {
            if c == 0 {
                "UVMap".to_string()
            } else {
                format!("UVMap.{:03}", c)
            }
        })
        .collect();

    object.vertices = mesh
        .vertices
        .iter()
        .map(|v| HostVertex {
            co: v.position,
            normal: v.normal,
            groups: Vec::new(),
        })
        .collect();

    for triangle in &mesh.triangles {
        let uvs = triangle.vertices.map(|v| {
            let file_uvs = mesh.vertices.get(v).map_or(&[][..], |vertex| &vertex.uvs[..]);
            host_uvs(file_uvs, channels)
        });
        object.add_triangle(triangle.vertices, uvs, triangle.material_index);
    }

    // Vertex groups from the file's bone ids
    for (index, vertex) in mesh.vertices.iter().enumerate() {
        for (id, weight) in vertex.influences() {
            let Some(bone) = usize::try_from(id).ok().and_then(|b| armature.bones.get(b)) else {
                continue;
            };
            let group = object.vertex_group(&bone.name);
            object.add_weight(index, group, f64::from(weight) / f64::from(WEIGHT_TOTAL));
        }
    }

    if kind == FormatKind::Cn6 {
        let spaces: Vec<TangentSpace> = mesh
            .vertices
            .iter()
            .map(|v| TangentSpace::new(v.normal, v.tangent, v.binormal))
            .collect();
        if has_authored_tangents(&spaces) {
            let preserved: PreservedTangents = spaces.into_iter().enumerate().collect();
            tracing::debug!(
                "Mesh `{}`: preserving {} tangent spaces",
                object.name,
                preserved.len()
            );
            object.preserved_tangents = Some(preserved);
        }
    }

    object
}

/// File UVs (V down) to host UVs (V up)
fn host_uvs(uvs: &[DVec2], channels: usize) -> SmallVec<[DVec2; 3]> {
    (0..channels)
        .map(|c| {
            let uv = uvs.get(c).copied().unwrap_or(DVec2::ZERO);
            DVec2::new(uv.x, 1.0 - uv.y)
        })
        .collect()
}

/// Rename the armature after the root of the first bone and remove that
/// root unless it is the only bone
pub fn delete_top_bone(armature: &mut Armature) {
    if armature.bones.is_empty() {
        return;
    }
    let root = armature.root_of(0);
    let name = armature.bones[root].name.clone();
    tracing::info!("Found world bone: {}", name);

    armature.name = name;
    if armature.bones.len() > 1 {
        armature.remove_bone(root);
    }
}
