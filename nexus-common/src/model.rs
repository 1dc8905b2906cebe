//! In-memory model shared by every codec
//!
//! A [`Model`] is built in one parse pass and then either written out or
//! handed to the host scene. Bone references from vertices are positional ids,
//! valid only within the owning [`Skeleton`].

use glam::{DMat4, DQuat, DVec2, DVec3};
use smallvec::SmallVec;

/// Id and parent id of the synthetic root bone written first in CN6/BR2 files
pub const WORLD_BONE_ID: i32 = 0;
pub const NO_PARENT: i32 = -1;

/// Bone id and weight written for vertices without any influence
pub const UNWEIGHTED_SENTINEL: i32 = -1;

/// Exact total of the quantized weights of a weighted vertex
pub const WEIGHT_TOTAL: i32 = 255;

// ============================================================================
// Skeleton
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Bone {
    pub id: i32,
    pub name: String,
    pub parent_id: i32,
    pub local_position: DVec3,
    pub local_rotation: DQuat,
    /// Stored in file row order
    pub inverse_world_matrix: DMat4,
    /// NB2 keyframes, parsed but never applied
    pub legacy_keys: LegacyKeys,
}

impl Bone {
    /// Identity bone named after the armature
    pub fn world(name: &str) -> Self {
        Self {
            id: WORLD_BONE_ID,
            name: name.to_string(),
            parent_id: NO_PARENT,
            local_position: DVec3::ZERO,
            local_rotation: DQuat::IDENTITY,
            inverse_world_matrix: DMat4::IDENTITY,
            legacy_keys: LegacyKeys::default(),
        }
    }

    pub fn parent_index(&self) -> Option<usize> {
        usize::try_from(self.parent_id).ok()
    }
}

/// `time x y z` position and rotation keys from an NB2 bone block
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LegacyKeys {
    pub positions: Vec<[f64; 4]>,
    pub rotations: Vec<[f64; 4]>,
}

impl LegacyKeys {
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty() && self.rotations.is_empty()
    }
}

/// Bones in id order; a parent always precedes its children
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Skeleton {
    pub bones: Vec<Bone>,
}

impl Skeleton {
    pub fn find(&self, name: &str) -> Option<&Bone> {
        self.bones.iter().find(|b| b.name == name)
    }

    pub fn len(&self) -> usize {
        self.bones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bones.is_empty()
    }

    /// Name of the bone with `id`, if any
    pub fn bone_name(&self, id: i32) -> Option<&str> {
        let index = usize::try_from(id).ok()?;
        self.bones.get(index).map(|b| b.name.as_str())
    }
}

// ============================================================================
// Meshes
// ============================================================================

/// One emitted vertex: a unique position/UV combination with its skin
#[derive(Debug, Clone, PartialEq)]
pub struct Vertex {
    pub position: DVec3,
    pub normal: DVec3,
    pub tangent: DVec3,
    pub binormal: DVec3,
    /// File convention (V already flipped)
    pub uvs: SmallVec<[DVec2; 3]>,
    pub bone_ids: SmallVec<[i32; 8]>,
    /// Quantized to 0..=255
    pub bone_weights: SmallVec<[i32; 8]>,
}

impl Default for Vertex {
    fn default() -> Self {
        Self {
            position: DVec3::ZERO,
            normal: DVec3::ZERO,
            tangent: DVec3::ZERO,
            binormal: DVec3::ZERO,
            uvs: SmallVec::new(),
            bone_ids: SmallVec::new(),
            bone_weights: SmallVec::new(),
        }
    }
}

impl Vertex {
    pub fn weight_sum(&self) -> i32 {
        self.bone_weights.iter().sum()
    }

    /// Written with the `-1` id/weight sentinel
    pub fn is_unweighted(&self) -> bool {
        !self.bone_weights.is_empty()
            && self.bone_weights.iter().all(|&w| w == UNWEIGHTED_SENTINEL)
    }

    /// (bone id, weight) pairs with a positive weight
    pub fn influences(&self) -> impl Iterator<Item = (i32, i32)> + '_ {
        self.bone_ids
            .iter()
            .copied()
            .zip(self.bone_weights.iter().copied())
            .filter(|&(_, w)| w > 0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Triangle {
    pub vertices: [usize; 3],
    pub material_index: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mesh {
    pub name: String,
    /// Material names referenced by `Triangle::material_index`
    pub materials: Vec<String>,
    pub vertices: Vec<Vertex>,
    pub triangles: Vec<Triangle>,
}

/// Full NB2 material block
#[derive(Debug, Clone, PartialEq)]
pub struct MaterialDef {
    pub name: String,
    pub ambient: [f64; 4],
    pub diffuse: [f64; 4],
    pub specular: [f64; 4],
    pub emissive: [f64; 4],
    pub shininess: f64,
    pub transparency: f64,
    pub texture: String,
    pub alpha_map: String,
}

impl MaterialDef {
    /// Block with neutral colours referencing `name.dds`
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ambient: [0.2, 0.2, 0.2, 1.0],
            diffuse: [0.8, 0.8, 0.8, 1.0],
            specular: [0.0, 0.0, 0.0, 1.0],
            emissive: [0.0, 0.0, 0.0, 1.0],
            shininess: 0.0,
            transparency: 1.0,
            texture: format!("{name}.dds"),
            alpha_map: String::new(),
        }
    }

    /// Host material name: the texture map without `.dds`, else the block name
    pub fn host_name(&self) -> String {
        if self.texture.is_empty() {
            self.name.clone()
        } else {
            self.texture.replace(".dds", "")
        }
    }
}

/// `Frames:`/`Frame:` header of an NB2 file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    pub frame_count: i64,
    pub current_frame: i64,
}

impl Default for FrameInfo {
    fn default() -> Self {
        Self {
            frame_count: 0,
            current_frame: 1,
        }
    }
}

/// One skeleton with its meshes
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Model {
    pub skeleton: Skeleton,
    pub meshes: Vec<Mesh>,
    /// NB2 material blocks; empty for formats that only carry names
    pub materials: Vec<MaterialDef>,
    pub frame_info: FrameInfo,
}

// ============================================================================
// Animation
// ============================================================================

/// One bone's matrices, one per frame, in file row order
#[derive(Debug, Clone, PartialEq)]
pub struct BoneTrack {
    pub name: String,
    pub frames: Vec<DMat4>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrameSet {
    pub frame_count: usize,
    pub first_frame: i64,
    pub last_frame: i64,
    pub fps: i64,
    /// In file order; the first track belongs to the world bone
    pub bone_tracks: Vec<BoneTrack>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Animation {
    pub frame_sets: Vec<FrameSet>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    #[test]
    fn test_world_bone_is_identity_root() {
        let bone = Bone::world("Leader");
        assert_eq!(bone.id, WORLD_BONE_ID);
        assert_eq!(bone.parent_index(), None);
        assert_eq!(bone.inverse_world_matrix, DMat4::IDENTITY);
    }

    #[test]
    fn test_vertex_influences_skip_zero_weights() {
        let vertex = Vertex {
            bone_ids: smallvec![3, 1, 3, 3],
            bone_weights: smallvec![200, 55, 0, 0],
            ..Default::default()
        };
        assert_eq!(vertex.weight_sum(), 255);
        assert_eq!(vertex.influences().collect::<Vec<_>>(), vec![(3, 200), (1, 55)]);
        assert!(!vertex.is_unweighted());
    }

    #[test]
    fn test_material_host_name() {
        let mut material = MaterialDef::named("Skin");
        material.texture = "Leader_Skin.dds".into();
        assert_eq!(material.host_name(), "Leader_Skin");
        material.texture.clear();
        assert_eq!(material.host_name(), "Skin");
    }
}
