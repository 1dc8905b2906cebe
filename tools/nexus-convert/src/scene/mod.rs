//! In-memory host scene
//!
//! Stands in for the 3D editor the formats were designed around: armatures
//! made of edit bones, mesh objects with shared vertices, per-corner loops
//! and named vertex groups. Import writes through [`SceneWriter`], export
//! reads through [`SceneReader`]; nothing else touches scene state.

pub mod tangents;

use glam::{DMat4, DVec2, DVec3};
use nexus_common::NameMap;
use nexus_common::tangent::{PreservedTangents, TangentSpace};
use smallvec::SmallVec;

// ============================================================================
// Armatures
// ============================================================================

/// Bone in armature space; the matrix's Y axis runs from head to tail
#[derive(Debug, Clone, PartialEq)]
pub struct EditBone {
    pub name: String,
    pub parent: Option<usize>,
    pub matrix: DMat4,
    pub length: f64,
}

impl EditBone {
    pub fn head(&self) -> DVec3 {
        self.matrix.w_axis.truncate()
    }

    pub fn tail(&self) -> DVec3 {
        self.head() + self.matrix.y_axis.truncate() * self.length
    }
}

/// One keyed pose matrix (armature space)
#[derive(Debug, Clone, PartialEq)]
pub struct PoseKey {
    pub bone: String,
    pub frame: i64,
    pub matrix: DMat4,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Action {
    pub name: String,
    pub keys: Vec<PoseKey>,
}

impl Action {
    pub fn keys_for<'a>(&'a self, bone: &'a str) -> impl Iterator<Item = &'a PoseKey> + 'a {
        self.keys.iter().filter(move |k| k.bone == bone)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Armature {
    pub name: String,
    /// Parents always precede their children
    pub bones: Vec<EditBone>,
    /// Short -> original names assigned on import
    pub name_map: NameMap,
    pub action: Option<Action>,
}

impl Armature {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn find_bone(&self, name: &str) -> Option<usize> {
        self.bones.iter().position(|b| b.name == name)
    }

    /// Number of ancestors of a bone
    pub fn depth(&self, index: usize) -> usize {
        let mut depth = 0;
        let mut current = self.bones.get(index).and_then(|b| b.parent);
        while let Some(parent) = current {
            depth += 1;
            current = self.bones.get(parent).and_then(|b| b.parent);
        }
        depth
    }

    /// Topmost ancestor of a bone
    pub fn root_of(&self, index: usize) -> usize {
        let mut current = index;
        while let Some(parent) = self.bones.get(current).and_then(|b| b.parent) {
            current = parent;
        }
        current
    }

    /// Remove a bone; its children become roots
    pub fn remove_bone(&mut self, index: usize) -> Option<EditBone> {
        if index >= self.bones.len() {
            return None;
        }
        let removed = self.bones.remove(index);
        for bone in &mut self.bones {
            bone.parent = match bone.parent {
                Some(p) if p == index => None,
                Some(p) if p > index => Some(p - 1),
                other => other,
            };
        }
        Some(removed)
    }
}

// ============================================================================
// Meshes
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostVertex {
    pub co: DVec3,
    pub normal: DVec3,
    /// (vertex group index, weight)
    pub groups: Vec<(usize, f64)>,
}

/// One triangle corner
#[derive(Debug, Clone, PartialEq)]
pub struct Loop {
    pub vertex: usize,
    pub normal: DVec3,
    /// Host convention (V up), one entry per UV layer
    pub uvs: SmallVec<[DVec2; 3]>,
}

/// Triangle made of three consecutive loops
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Polygon {
    pub loop_start: usize,
    pub material_index: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshObject {
    pub name: String,
    /// Index of the deforming armature in the scene
    pub armature: Option<usize>,
    pub location: DVec3,
    pub vertices: Vec<HostVertex>,
    pub loops: Vec<Loop>,
    pub polygons: Vec<Polygon>,
    pub uv_layers: Vec<String>,
    pub vertex_groups: Vec<String>,
    pub materials: Vec<String>,
    /// Tangent spaces carried over from an imported file, keyed by vertex
    pub preserved_tangents: Option<PreservedTangents>,
}

/// Host vertex group weights are clamped to this
const MAX_GROUP_WEIGHT: f64 = 1.0;

impl MeshObject {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Index of a vertex group, creating it on first use
    pub fn vertex_group(&mut self, name: &str) -> usize {
        match self.vertex_groups.iter().position(|g| g == name) {
            Some(index) => index,
            None => {
                self.vertex_groups.push(name.to_string());
                self.vertex_groups.len() - 1
            }
        }
    }

    /// Add to a vertex's weight in a group
    pub fn add_weight(&mut self, vertex: usize, group: usize, weight: f64) {
        let Some(v) = self.vertices.get_mut(vertex) else {
            return;
        };
        match v.groups.iter_mut().find(|(g, _)| *g == group) {
            Some((_, w)) => *w = (*w + weight).min(MAX_GROUP_WEIGHT),
            None => v.groups.push((group, weight.min(MAX_GROUP_WEIGHT))),
        }
    }

    /// (group name, weight) pairs of a vertex
    pub fn group_weights(&self, vertex: usize) -> impl Iterator<Item = (&str, f64)> + '_ {
        self.vertices
            .get(vertex)
            .into_iter()
            .flat_map(|v| v.groups.iter())
            .filter_map(|&(g, w)| self.vertex_groups.get(g).map(|name| (name.as_str(), w)))
    }

    /// Append a triangle; `uvs` are per corner, host convention
    pub fn add_triangle(
        &mut self,
        vertices: [usize; 3],
        uvs: [SmallVec<[DVec2; 3]>; 3],
        material_index: usize,
    ) {
        let loop_start = self.loops.len();
        for (vertex, uvs) in vertices.into_iter().zip(uvs) {
            let normal = self
                .vertices
                .get(vertex)
                .map_or(DVec3::ZERO, |v| v.normal);
            self.loops.push(Loop {
                vertex,
                normal,
                uvs,
            });
        }
        self.polygons.push(Polygon {
            loop_start,
            material_index,
        });
    }

    /// The three loops of a polygon
    pub fn corners(&self, polygon: &Polygon) -> &[Loop] {
        let end = (polygon.loop_start + 3).min(self.loops.len());
        &self.loops[polygon.loop_start.min(end)..end]
    }
}

// ============================================================================
// Scene
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderSettings {
    pub fps: i64,
    pub frame_start: i64,
    pub frame_end: i64,
    pub frame_current: i64,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            fps: 24,
            frame_start: 1,
            frame_end: 250,
            frame_current: 1,
        }
    }
}

/// Read side of the host scene, used by export
pub trait SceneReader {
    fn armatures(&self) -> &[Armature];

    /// Mesh objects deformed by the armature at `armature`
    fn meshes_of(&self, armature: usize) -> Vec<&MeshObject>;

    /// Per-loop normal, tangent and bitangent of a mesh
    fn loop_tangents(&self, mesh: &MeshObject) -> Vec<TangentSpace>;
}

/// Write side of the host scene, used by import and animation
pub trait SceneWriter {
    /// Add an armature and return its index
    fn add_armature(&mut self, armature: Armature) -> usize;

    fn add_mesh(&mut self, mesh: MeshObject);

    /// Register a material by name; existing materials are shared
    fn ensure_material(&mut self, name: &str);

    fn armature_mut(&mut self, index: usize) -> Option<&mut Armature>;

    fn render_mut(&mut self) -> &mut RenderSettings;

    /// Remove every armature and mesh; materials stay
    fn clear_objects(&mut self);
}

#[derive(Debug, Clone, Default)]
pub struct HostScene {
    pub armatures: Vec<Armature>,
    pub meshes: Vec<MeshObject>,
    pub materials: Vec<String>,
    pub render: RenderSettings,
}

impl HostScene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find_armature(&self, name: &str) -> Option<usize> {
        self.armatures.iter().position(|a| a.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.armatures.is_empty() && self.meshes.is_empty()
    }
}

impl SceneReader for HostScene {
    fn armatures(&self) -> &[Armature] {
        &self.armatures
    }

    fn meshes_of(&self, armature: usize) -> Vec<&MeshObject> {
        self.meshes
            .iter()
            .filter(|m| m.armature == Some(armature))
            .collect()
    }

    fn loop_tangents(&self, mesh: &MeshObject) -> Vec<TangentSpace> {
        tangents::loop_tangents(mesh)
    }
}

impl SceneWriter for HostScene {
    fn add_armature(&mut self, armature: Armature) -> usize {
        self.armatures.push(armature);
        self.armatures.len() - 1
    }

    fn add_mesh(&mut self, mesh: MeshObject) {
        self.meshes.push(mesh);
    }

    fn ensure_material(&mut self, name: &str) {
        if !self.materials.iter().any(|m| m == name) {
            self.materials.push(name.to_string());
        }
    }

    fn armature_mut(&mut self, index: usize) -> Option<&mut Armature> {
        self.armatures.get_mut(index)
    }

    fn render_mut(&mut self) -> &mut RenderSettings {
        &mut self.render
    }

    fn clear_objects(&mut self) {
        self.armatures.clear();
        self.meshes.clear();
    }
}
