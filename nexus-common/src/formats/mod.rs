//! Text format codecs
//!
//! NB2, CN6 and BR2 share one bone/mesh/vertex grammar at different arities,
//! described by a [`FormatSpec`]. NA2 carries animation only.
//!
//! | Format | Influences | UV channels | Bone record |
//! |--------|------------|-------------|-------------|
//! | NB2    | 4          | 1           | name, parent name, pos + quat |
//! | CN6    | 8          | 3           | id, name, parent id, pos + quat + inverse world |
//! | BR2    | 4          | 1           | id, name, parent id, pos + quat + inverse world |

pub mod na2;
pub mod nb2;
pub mod skeletal;

use std::io::{BufRead, Write};

use glam::DVec2;

use crate::error::{Error, FormatError, InvariantViolation};
use crate::model::{Mesh, Model, Vertex, WEIGHT_TOTAL};
use crate::skinning::WeightRounding;

pub use skeletal::SkeletalWriter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatKind {
    Nb2,
    Cn6,
    Br2,
}

impl FormatKind {
    pub fn spec(self) -> &'static FormatSpec {
        match self {
            FormatKind::Nb2 => &NB2,
            FormatKind::Cn6 => &CN6,
            FormatKind::Br2 => &BR2,
        }
    }

    /// Case-insensitive lookup by file extension (without the dot)
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "nb2" => Some(FormatKind::Nb2),
            "cn6" => Some(FormatKind::Cn6),
            "br2" => Some(FormatKind::Br2),
            _ => None,
        }
    }
}

/// What to write for a vertex with no skin weight
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnweightedPolicy {
    /// Fail the export
    Reject,
    /// Write `-1` for every id and weight
    Sentinel,
}

/// Which normal/tangent/binormal triple an exported vertex carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TangentConvention {
    /// Per-vertex mean of the loop triples, or the preserved original
    Averaged,
    /// Host vertex normal, mean tangent, negated mean bitangent
    HostNormalNegatedBitangent,
}

/// Field layout and export policy of one model format
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatSpec {
    pub kind: FormatKind,
    pub extension: &'static str,
    pub influence_count: usize,
    pub uv_channel_count: usize,
    pub has_inverse_world_matrix: bool,
    /// Vertex rows carry a tangent and binormal
    pub has_tangents: bool,
    pub bone_record_has_id: bool,
    /// Mesh blocks list their material names (CN6)
    pub has_material_names: bool,
    /// Tangent and binormal follow the skin fields in a vertex row (BR2)
    pub tangents_after_skin: bool,
    /// Triangle rows carry a material index
    pub triangle_has_material: bool,
    /// Triangles are written grouped by material (stable)
    pub sort_triangles_by_material: bool,
    pub weight_rounding: WeightRounding,
    pub unweighted: UnweightedPolicy,
    pub tangent_convention: TangentConvention,
    /// First line of an exported file
    pub header: Option<&'static str>,
}

impl FormatSpec {
    /// Fields in one vertex row
    pub fn vertex_field_count(&self) -> usize {
        match self.kind {
            // flags, position, one UV, four id/weight pairs
            FormatKind::Nb2 => 1 + 3 + 2 + 2 * self.influence_count,
            FormatKind::Cn6 | FormatKind::Br2 => {
                let tangent_fields = if self.has_tangents { 6 } else { 0 };
                3 + 3 + tangent_fields + 2 * self.uv_channel_count + 2 * self.influence_count
            }
        }
    }

    /// Fields in one bone record of a skeleton section
    pub fn bone_field_count(&self) -> usize {
        let id_fields = if self.bone_record_has_id { 3 } else { 1 };
        let matrix_fields = if self.has_inverse_world_matrix { 16 } else { 0 };
        id_fields + 3 + 4 + matrix_fields
    }

    pub fn triangle_field_count(&self) -> usize {
        if self.triangle_has_material { 4 } else { 3 }
    }
}

pub const NB2: FormatSpec = FormatSpec {
    kind: FormatKind::Nb2,
    extension: "nb2",
    influence_count: 4,
    uv_channel_count: 1,
    has_inverse_world_matrix: false,
    has_tangents: false,
    bone_record_has_id: false,
    has_material_names: false,
    tangents_after_skin: false,
    triangle_has_material: false,
    sort_triangles_by_material: false,
    weight_rounding: WeightRounding::ClampOverflow,
    unweighted: UnweightedPolicy::Reject,
    tangent_convention: TangentConvention::HostNormalNegatedBitangent,
    header: None,
};

pub const CN6: FormatSpec = FormatSpec {
    kind: FormatKind::Cn6,
    extension: "cn6",
    influence_count: 8,
    uv_channel_count: 3,
    has_inverse_world_matrix: true,
    has_tangents: true,
    bone_record_has_id: true,
    has_material_names: true,
    tangents_after_skin: false,
    triangle_has_material: true,
    sort_triangles_by_material: true,
    weight_rounding: WeightRounding::DumpRemainder,
    unweighted: UnweightedPolicy::Sentinel,
    tangent_convention: TangentConvention::Averaged,
    header: Some("// CivNexus6 CN6 - Exported by nexus-convert for import to CivNexus6"),
};

pub const BR2: FormatSpec = FormatSpec {
    kind: FormatKind::Br2,
    extension: "br2",
    influence_count: 4,
    uv_channel_count: 1,
    has_inverse_world_matrix: true,
    has_tangents: true,
    bone_record_has_id: true,
    has_material_names: false,
    tangents_after_skin: true,
    triangle_has_material: false,
    sort_triangles_by_material: false,
    weight_rounding: WeightRounding::ClampOverflow,
    unweighted: UnweightedPolicy::Reject,
    tangent_convention: TangentConvention::HostNormalNegatedBitangent,
    header: Some("// Nexus Buddy BR2 - Exported by nexus-convert for import to Nexus Buddy 2"),
};

/// Validate the skin of a vertex about to be written
pub(crate) fn check_skin(
    spec: &FormatSpec,
    mesh: &Mesh,
    index: usize,
    vertex: &Vertex,
) -> Result<(), Error> {
    if vertex.bone_ids.len() != spec.influence_count
        || vertex.bone_weights.len() != spec.influence_count
    {
        return Err(FormatError::Unsupported(format!(
            "vertex {} of mesh `{}` with {} influences",
            index,
            mesh.name,
            vertex.bone_ids.len()
        ))
        .into());
    }

    if vertex.is_unweighted() {
        return match spec.unweighted {
            UnweightedPolicy::Sentinel => Ok(()),
            UnweightedPolicy::Reject => Err(InvariantViolation::UnweightedVertex {
                mesh: mesh.name.clone(),
                vertex: index,
            }
            .into()),
        };
    }

    let sum = vertex.weight_sum();
    if sum != WEIGHT_TOTAL {
        return Err(InvariantViolation::WeightSum { vertex: index, sum }.into());
    }
    Ok(())
}

/// Exactly `count` UV channels, zero-filled
pub(crate) fn pad_uvs(uvs: &[DVec2], count: usize) -> impl Iterator<Item = DVec2> + '_ {
    uvs.iter()
        .copied()
        .chain(std::iter::repeat(DVec2::ZERO))
        .take(count)
}

/// Parse every model in a file
pub fn decode_models<R: BufRead>(
    spec: &FormatSpec,
    input: R,
) -> Result<Vec<Model>, FormatError> {
    match spec.kind {
        FormatKind::Nb2 => nb2::decode(input).map(|model| vec![model]),
        FormatKind::Cn6 | FormatKind::Br2 => skeletal::decode(spec, input),
    }
}

/// Parse the first model in a file
pub fn decode<R: BufRead>(spec: &FormatSpec, input: R) -> Result<Model, FormatError> {
    decode_models(spec, input)?
        .into_iter()
        .next()
        .ok_or_else(|| FormatError::Unsupported("a file without any skeleton".into()))
}

/// Write `models` in `spec`'s layout
pub fn encode<W: Write>(spec: &FormatSpec, models: &[Model], out: W) -> Result<(), Error> {
    match spec.kind {
        FormatKind::Nb2 => match models {
            [model] => nb2::encode(model, out),
            _ => Err(FormatError::Unsupported(format!("{} models in one NB2 file", models.len())).into()),
        },
        FormatKind::Cn6 | FormatKind::Br2 => {
            let mut writer = SkeletalWriter::new(spec, out)?;
            for model in models {
                writer.write_model(model)?;
            }
            writer.finish()?;
            Ok(())
        }
    }
}
