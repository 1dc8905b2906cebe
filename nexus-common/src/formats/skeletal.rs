//! CN6 / BR2 codec
//!
//! Both formats open with a `skeleton` section of 26-field bone records and
//! differ only in vertex row layout, material names and triangle arity, all
//! of which come from the [`FormatSpec`].

use std::io::{BufRead, Write};

use glam::DQuat;
use smallvec::SmallVec;

use super::{FormatSpec, check_skin, pad_uvs};
use crate::error::{Error, FormatError};
use crate::math::{mat4_from_row_major, mat4_to_row_major};
use crate::model::{Bone, LegacyKeys, Mesh, Model, Skeleton, Triangle, Vertex};
use crate::tokenizer::{LineReader, Record, fmt_float};

const SKELETON: &str = "skeleton";
const MESHES: &str = "meshes:";
const MESH: &str = "mesh:";
const MATERIALS: &str = "materials";
const VERTICES: &str = "vertices";
const TRIANGLES: &str = "triangles";
const END: &str = "end";
const ABORTED: &str = "aborted!";

// ============================================================================
// Decode
// ============================================================================

/// Parse every `skeleton` section of a file
pub fn decode<R: BufRead>(spec: &FormatSpec, input: R) -> Result<Vec<Model>, FormatError> {
    let mut reader = LineReader::new(input);
    let mut models = Vec::new();

    loop {
        let Some(record) = reader.next_record()? else {
            return Err(FormatError::MissingEnd {
                line: reader.line(),
            });
        };
        match record.text.as_str() {
            SKELETON => models.push(decode_model(spec, &mut reader)?),
            END => break,
            ABORTED => return Err(FormatError::Aborted { line: record.line }),
            _ => {
                return Err(FormatError::MissingLiteral {
                    record: "Skeleton".into(),
                    line: record.line,
                    expected: SKELETON.into(),
                    found: record.text,
                });
            }
        }
    }

    tracing::debug!("Decoded {} model(s) from {} file", models.len(), spec.extension);
    Ok(models)
}

fn decode_model<R: BufRead>(
    spec: &FormatSpec,
    reader: &mut LineReader<R>,
) -> Result<Model, FormatError> {
    let skeleton = decode_skeleton(spec, reader)?;

    let record = reader.require("Number of meshes")?;
    let mesh_count = inline_count(&record, MESHES, "Number of meshes")?;

    let mut meshes = Vec::with_capacity(mesh_count);
    for i in 0..mesh_count {
        meshes.push(decode_mesh(spec, reader, i + 1)?);
    }

    Ok(Model {
        skeleton,
        meshes,
        ..Default::default()
    })
}

fn decode_skeleton<R: BufRead>(
    spec: &FormatSpec,
    reader: &mut LineReader<R>,
) -> Result<Skeleton, FormatError> {
    let mut bones: Vec<Bone> = Vec::new();

    loop {
        match reader.peek()? {
            None => {
                return Err(FormatError::MissingEnd {
                    line: reader.line(),
                });
            }
            Some(record) if record.starts_with(MESHES) => break,
            Some(record) if record.text == ABORTED => {
                return Err(FormatError::Aborted { line: record.line });
            }
            Some(_) => {}
        }

        let label = format!("Bone {}", bones.len() + 1);
        let fields = reader.require_fields(label, spec.bone_field_count())?;

        let name = fields.str(1)?.to_string();
        let parent_id = fields.i32(2)?;
        if let Ok(parent) = usize::try_from(parent_id)
            && parent >= bones.len()
        {
            return Err(FormatError::UnknownParent {
                bone: name,
                parent: parent_id.to_string(),
            });
        }

        let [qx, qy, qz, qw] = fields.floats::<4>(6)?;
        bones.push(Bone {
            id: fields.i32(0)?,
            name,
            parent_id,
            local_position: fields.vec3(3)?,
            local_rotation: DQuat::from_xyzw(qx, qy, qz, qw),
            inverse_world_matrix: mat4_from_row_major(&fields.floats::<16>(10)?),
            legacy_keys: LegacyKeys::default(),
        });
    }

    Ok(Skeleton { bones })
}

fn decode_mesh<R: BufRead>(
    spec: &FormatSpec,
    reader: &mut LineReader<R>,
    number: usize,
) -> Result<Mesh, FormatError> {
    let label = format!("Name of mesh {}", number);
    let record = reader.require(label.clone())?;
    let fields = record.fields_exact(label.clone(), 1)?;
    let Some(name) = fields.str(0)?.strip_prefix(MESH) else {
        return Err(FormatError::MissingLiteral {
            record: label,
            line: record.line,
            expected: MESH.into(),
            found: record.text,
        });
    };
    let mut mesh = Mesh {
        name: name.to_string(),
        ..Default::default()
    };

    if spec.has_material_names {
        reader.require_literal(MATERIALS)?;
        while !next_is(reader, |r| r.text == VERTICES)? {
            let label = format!("Material {} in mesh {}", mesh.materials.len() + 1, number);
            let record = reader.require(label.clone())?;
            mesh.materials.push(record.quoted(label)?);
        }
    }

    reader.require_literal(VERTICES)?;
    while !next_is(reader, |r| r.text == TRIANGLES)? {
        let label = format!("Vertex {} in mesh {}", mesh.vertices.len() + 1, number);
        let record = reader.require(label.clone())?;
        mesh.vertices.push(decode_vertex(spec, &record, label)?);
    }

    reader.require_literal(TRIANGLES)?;
    let mut row = 0;
    while !next_is(reader, |r| {
        r.starts_with(MESH) || r.text == END || r.text == SKELETON || r.text == ABORTED
    })? {
        row += 1;
        let label = format!("Triangle {} in mesh {}", row, number);
        let fields = reader.require_fields(label, spec.triangle_field_count())?;
        let triangle = Triangle {
            vertices: [fields.count(0)?, fields.count(1)?, fields.count(2)?],
            material_index: if spec.triangle_has_material {
                fields.count(3)?
            } else {
                0
            },
        };

        let vertex_ok = triangle.vertices.iter().all(|&v| v < mesh.vertices.len());
        let material_ok =
            mesh.materials.is_empty() || triangle.material_index < mesh.materials.len();
        if vertex_ok && material_ok {
            mesh.triangles.push(triangle);
        } else {
            tracing::warn!(
                "Dropping triangle {} in mesh `{}`: index out of range",
                row,
                mesh.name
            );
        }
    }

    tracing::debug!(
        "Mesh `{}`: {} vertices, {} triangles",
        mesh.name,
        mesh.vertices.len(),
        mesh.triangles.len()
    );
    Ok(mesh)
}

fn decode_vertex(spec: &FormatSpec, record: &Record, label: String) -> Result<Vertex, FormatError> {
    let fields = record.fields_exact(label, spec.vertex_field_count())?;
    let mut vertex = Vertex {
        position: fields.vec3(0)?,
        normal: fields.vec3(3)?,
        ..Default::default()
    };

    let mut at = 6;
    if spec.has_tangents && !spec.tangents_after_skin {
        vertex.tangent = fields.vec3(at)?;
        vertex.binormal = fields.vec3(at + 3)?;
        at += 6;
    }
    for _ in 0..spec.uv_channel_count {
        vertex.uvs.push(fields.vec2(at)?);
        at += 2;
    }
    for _ in 0..spec.influence_count {
        vertex.bone_ids.push(fields.i32(at)?);
        at += 1;
    }
    for _ in 0..spec.influence_count {
        vertex.bone_weights.push(fields.i32(at)?);
        at += 1;
    }
    if spec.has_tangents && spec.tangents_after_skin {
        vertex.tangent = fields.vec3(at)?;
        vertex.binormal = fields.vec3(at + 3)?;
    }

    Ok(vertex)
}

/// Whether the next record ends the current list; end of stream is fatal
fn next_is<R: BufRead>(
    reader: &mut LineReader<R>,
    stop: impl Fn(&Record) -> bool,
) -> Result<bool, FormatError> {
    let line = reader.line();
    match reader.peek()? {
        Some(record) if record.text == ABORTED => Err(FormatError::Aborted { line: record.line }),
        Some(record) => Ok(stop(record)),
        None => Err(FormatError::MissingEnd { line }),
    }
}

/// `key<n>` with no space between key and count, e.g. `meshes:3`
fn inline_count(record: &Record, key: &str, what: &str) -> Result<usize, FormatError> {
    let Some(rest) = record.text.strip_prefix(key) else {
        return Err(FormatError::MissingLiteral {
            record: what.to_string(),
            line: record.line,
            expected: key.to_string(),
            found: record.text.clone(),
        });
    };
    Record {
        line: record.line,
        text: rest.trim().to_string(),
    }
    .count(what)
}

// ============================================================================
// Encode
// ============================================================================

/// Streaming writer; one `skeleton` section per model, `end` on finish
pub struct SkeletalWriter<'a, W: Write> {
    spec: &'a FormatSpec,
    out: W,
}

impl<'a, W: Write> SkeletalWriter<'a, W> {
    /// Write the header comment
    pub fn new(spec: &'a FormatSpec, mut out: W) -> Result<Self, FormatError> {
        if let Some(header) = spec.header {
            writeln!(out, "{}", header)?;
        }
        Ok(Self { spec, out })
    }

    pub fn write_model(&mut self, model: &Model) -> Result<(), Error> {
        writeln!(self.out, "{}", SKELETON)?;
        for bone in &model.skeleton.bones {
            self.write_bone(bone)?;
        }

        writeln!(self.out, "{}{}", MESHES, model.meshes.len())?;
        for mesh in &model.meshes {
            self.write_mesh(mesh)?;
        }
        Ok(())
    }

    fn write_bone(&mut self, bone: &Bone) -> Result<(), FormatError> {
        let q = bone.local_rotation;
        let mut line = format!(
            "{} \"{}\" {} {} {} {} {} {} {} {}",
            bone.id,
            bone.name,
            bone.parent_id,
            fmt_float(bone.local_position.x),
            fmt_float(bone.local_position.y),
            fmt_float(bone.local_position.z),
            fmt_float(q.x),
            fmt_float(q.y),
            fmt_float(q.z),
            fmt_float(q.w),
        );
        for value in mat4_to_row_major(&bone.inverse_world_matrix) {
            line.push(' ');
            line.push_str(&fmt_float(value));
        }
        writeln!(self.out, "{}", line)?;
        Ok(())
    }

    fn write_mesh(&mut self, mesh: &Mesh) -> Result<(), Error> {
        writeln!(self.out, "{}\"{}\"", MESH, mesh.name)?;

        if self.spec.has_material_names {
            writeln!(self.out, "{}", MATERIALS)?;
            for material in &mesh.materials {
                writeln!(self.out, "\"{}\"", material)?;
            }
        }

        writeln!(self.out, "{}", VERTICES)?;
        for (index, vertex) in mesh.vertices.iter().enumerate() {
            check_skin(self.spec, mesh, index, vertex)?;
            let line = self.vertex_row(vertex);
            writeln!(self.out, "{}", line)?;
        }

        writeln!(self.out, "{}", TRIANGLES)?;
        let mut triangles: Vec<&Triangle> = mesh.triangles.iter().collect();
        if self.spec.sort_triangles_by_material {
            triangles.sort_by_key(|t| t.material_index);
        }
        for triangle in triangles {
            let [a, b, c] = triangle.vertices;
            if self.spec.triangle_has_material {
                writeln!(self.out, "{} {} {} {}", a, b, c, triangle.material_index)?;
            } else {
                writeln!(self.out, "{} {} {}", a, b, c)?;
            }
        }
        Ok(())
    }

    fn vertex_row(&self, vertex: &Vertex) -> String {
        let mut floats: SmallVec<[f64; 24]> = SmallVec::new();
        floats.extend(vertex.position.to_array());
        floats.extend(vertex.normal.to_array());
        if self.spec.has_tangents && !self.spec.tangents_after_skin {
            floats.extend(vertex.tangent.to_array());
            floats.extend(vertex.binormal.to_array());
        }
        for uv in pad_uvs(&vertex.uvs, self.spec.uv_channel_count) {
            floats.extend(uv.to_array());
        }

        let mut fields: Vec<String> = floats.iter().map(|&f| fmt_float(f)).collect();
        fields.extend(vertex.bone_ids.iter().map(|id| id.to_string()));
        fields.extend(vertex.bone_weights.iter().map(|w| w.to_string()));
        if self.spec.has_tangents && self.spec.tangents_after_skin {
            for value in vertex.tangent.to_array().into_iter().chain(vertex.binormal.to_array()) {
                fields.push(fmt_float(value));
            }
        }
        fields.join(" ")
    }

    /// Write the terminal `end` marker and hand back the stream
    pub fn finish(mut self) -> Result<W, FormatError> {
        writeln!(self.out, "{}", END)?;
        self.out.flush()?;
        Ok(self.out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InvariantViolation;
    use crate::formats::{BR2, CN6, UnweightedPolicy};
    use glam::{DMat4, DVec2, DVec3};
    use smallvec::smallvec;
    use std::io::Cursor;

    fn world_and_root() -> Skeleton {
        let mut root = Bone::world("Root");
        root.id = 1;
        root.parent_id = 0;
        root.local_position = DVec3::new(0.0, 1.0, 0.0);
        root.inverse_world_matrix = DMat4::from_translation(DVec3::new(0.0, -1.0, 0.0));
        Skeleton {
            bones: vec![Bone::world("Leader"), root],
        }
    }

    fn cn6_vertex(x: f64) -> Vertex {
        Vertex {
            position: DVec3::new(x, 0.0, 0.0),
            normal: DVec3::Z,
            tangent: DVec3::X,
            binormal: DVec3::Y,
            uvs: smallvec![DVec2::new(x, 0.5), DVec2::ZERO, DVec2::ONE],
            bone_ids: smallvec![1, 0, 1, 1, 1, 1, 1, 1],
            bone_weights: smallvec![200, 55, 0, 0, 0, 0, 0, 0],
        }
    }

    fn cn6_model() -> Model {
        Model {
            skeleton: world_and_root(),
            meshes: vec![Mesh {
                name: "Body Mesh".into(),
                materials: vec!["Skin".into(), "Cloth".into()],
                vertices: vec![cn6_vertex(0.0), cn6_vertex(1.0), cn6_vertex(2.0)],
                triangles: vec![
                    Triangle {
                        vertices: [0, 1, 2],
                        material_index: 1,
                    },
                    Triangle {
                        vertices: [2, 1, 0],
                        material_index: 0,
                    },
                ],
            }],
            ..Default::default()
        }
    }

    fn encode_to_string(spec: &FormatSpec, model: &Model) -> Result<String, Error> {
        let mut writer = SkeletalWriter::new(spec, Vec::new())?;
        writer.write_model(model)?;
        let bytes = writer.finish()?;
        Ok(String::from_utf8(bytes).unwrap())
    }

    #[test]
    fn test_cn6_layout() {
        let text = encode_to_string(&CN6, &cn6_model()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[0].starts_with("// CivNexus6 CN6"));
        assert_eq!(lines[1], "skeleton");
        assert!(lines[2].starts_with("0 \"Leader\" -1 0.00000000"));
        assert_eq!(lines[2].split_whitespace().count(), 26);
        assert_eq!(lines[4], "meshes:1");
        assert_eq!(lines[5], "mesh:\"Body Mesh\"");
        assert_eq!(&lines[6..9], &["materials", "\"Skin\"", "\"Cloth\""]);
        assert_eq!(lines[9], "vertices");
        assert_eq!(lines[10].split_whitespace().count(), 34);
        assert_eq!(lines[13], "triangles");
        // grouped by material
        assert_eq!(lines[14], "2 1 0 0");
        assert_eq!(lines[15], "0 1 2 1");
        assert_eq!(lines[16], "end");
    }

    #[test]
    fn test_cn6_decode_matches_encoded_model() {
        let model = cn6_model();
        let text = encode_to_string(&CN6, &model).unwrap();
        let decoded = decode(&CN6, Cursor::new(text)).unwrap();
        assert_eq!(decoded.len(), 1);

        let back = &decoded[0];
        assert_eq!(back.skeleton.bones.len(), 2);
        assert_eq!(back.skeleton.bones[1].parent_id, 0);
        assert!(
            back.skeleton.bones[1]
                .inverse_world_matrix
                .abs_diff_eq(model.skeleton.bones[1].inverse_world_matrix, 1e-8)
        );
        let mesh = &back.meshes[0];
        assert_eq!(mesh.name, "Body Mesh");
        assert_eq!(mesh.materials, vec!["Skin", "Cloth"]);
        assert_eq!(mesh.vertices[1], model.meshes[0].vertices[1]);
        assert_eq!(mesh.triangles[0].vertices, [2, 1, 0]);
    }

    #[test]
    fn test_br2_row_puts_tangents_last() {
        let mut model = cn6_model();
        for vertex in &mut model.meshes[0].vertices {
            vertex.uvs.truncate(1);
            vertex.bone_ids = smallvec![1, 1, 1, 1];
            vertex.bone_weights = smallvec![255, 0, 0, 0];
        }
        let text = encode_to_string(&BR2, &model).unwrap();
        assert!(text.starts_with("// Nexus Buddy BR2"));
        assert!(!text.contains("materials"));

        let row = text
            .lines()
            .skip_while(|l| *l != "vertices")
            .nth(2)
            .unwrap();
        let fields: Vec<&str> = row.split_whitespace().collect();
        assert_eq!(fields.len(), 22);
        assert_eq!(&fields[8..16], &["1", "1", "1", "1", "255", "0", "0", "0"]);
        // tangent X then binormal Y
        assert_eq!(fields[16], "1.00000000");
        assert_eq!(fields[20], "1.00000000");
        assert!(text.contains("\n0 1 2\n"));

        let decoded = decode(&BR2, Cursor::new(text)).unwrap();
        assert_eq!(decoded[0].meshes[0].vertices[1], model.meshes[0].vertices[1]);
    }

    #[test]
    fn test_missing_uv_channels_written_as_zero() {
        let mut model = cn6_model();
        model.meshes[0].vertices[0].uvs.truncate(1);
        let text = encode_to_string(&CN6, &model).unwrap();
        let decoded = decode(&CN6, Cursor::new(text)).unwrap();
        assert_eq!(decoded[0].meshes[0].vertices[0].uvs[1], DVec2::ZERO);
        assert_eq!(decoded[0].meshes[0].vertices[0].uvs[2], DVec2::ZERO);
    }

    #[test]
    fn test_short_vertex_row_names_vertex_and_mesh() {
        let text = encode_to_string(&CN6, &cn6_model()).unwrap();
        let broken: String = text
            .lines()
            .map(|line| {
                if line.split_whitespace().count() == 34 && line.starts_with("1.0") {
                    // drop the last weight
                    line.rsplit_once(' ').map(|(head, _)| head).unwrap_or(line).to_string()
                } else {
                    line.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join("\n");
        let err = decode(&CN6, Cursor::new(broken)).unwrap_err();
        assert!(matches!(
            err,
            FormatError::Arity { ref record, found: 33, .. } if record == "Vertex 2 in mesh 1"
        ));
        assert!(err.to_string().starts_with("Vertex 2 in mesh 1 is invalid!"));
    }

    #[test]
    fn test_aborted_and_truncated_files() {
        let text = "skeleton\n0 \"W\" -1 0 0 0 0 0 0 1 1 0 0 0 0 1 0 0 0 0 1 0 0 0 0 1\naborted!\n";
        assert!(matches!(
            decode(&CN6, Cursor::new(text)),
            Err(FormatError::Aborted { line: 3 })
        ));

        let text = encode_to_string(&CN6, &cn6_model()).unwrap();
        let truncated = text.trim_end().trim_end_matches("end");
        assert!(matches!(
            decode(&CN6, Cursor::new(truncated.to_string())),
            Err(FormatError::MissingEnd { .. })
        ));
    }

    #[test]
    fn test_forward_parent_rejected() {
        let text = "skeleton\n0 \"W\" -1 0 0 0 0 0 0 1 1 0 0 0 0 1 0 0 0 0 1 0 0 0 0 1\n\
                    1 \"A\" 2 0 0 0 0 0 0 1 1 0 0 0 0 1 0 0 0 0 1 0 0 0 0 1\nmeshes:0\nend\n";
        let err = decode(&BR2, Cursor::new(text)).unwrap_err();
        assert!(matches!(err, FormatError::UnknownParent { ref bone, .. } if bone == "A"));
    }

    #[test]
    fn test_out_of_range_triangles_dropped() {
        let mut model = cn6_model();
        model.meshes[0].triangles.push(Triangle {
            vertices: [0, 1, 9],
            material_index: 0,
        });
        model.meshes[0].triangles.push(Triangle {
            vertices: [0, 1, 2],
            material_index: 5,
        });
        let text = encode_to_string(&CN6, &model).unwrap();
        let decoded = decode(&CN6, Cursor::new(text)).unwrap();
        assert_eq!(decoded[0].meshes[0].triangles.len(), 2);
    }

    #[test]
    fn test_multiple_skeleton_sections() {
        let mut writer = SkeletalWriter::new(&CN6, Vec::new()).unwrap();
        writer.write_model(&cn6_model()).unwrap();
        let mut second = cn6_model();
        second.skeleton.bones[0].name = "Horse".into();
        writer.write_model(&second).unwrap();
        let text = String::from_utf8(writer.finish().unwrap()).unwrap();

        let models = decode(&CN6, Cursor::new(text)).unwrap();
        assert_eq!(models.len(), 2);
        assert_eq!(models[1].skeleton.bones[0].name, "Horse");
    }

    #[test]
    fn test_unweighted_vertex_policy() {
        let mut model = cn6_model();
        model.meshes[0].vertices[2].bone_ids = smallvec![-1; 8];
        model.meshes[0].vertices[2].bone_weights = smallvec![-1; 8];
        let text = encode_to_string(&CN6, &model).unwrap();
        assert!(text.contains("-1 -1 -1 -1 -1 -1 -1 -1 -1 -1 -1 -1 -1 -1 -1 -1"));

        let strict = FormatSpec {
            unweighted: UnweightedPolicy::Reject,
            ..CN6
        };
        let err = encode_to_string(&strict, &model).unwrap_err();
        assert!(matches!(
            err,
            Error::Invariant(InvariantViolation::UnweightedVertex { vertex: 2, .. })
        ));
    }

    #[test]
    fn test_rows_without_tangents() {
        let bare = FormatSpec {
            has_tangents: false,
            ..CN6
        };
        assert_eq!(bare.vertex_field_count(), 28);
        assert_eq!(bare.bone_field_count(), CN6.bone_field_count());

        let text = encode_to_string(&bare, &cn6_model()).unwrap();
        let models = decode(&bare, Cursor::new(text)).unwrap();
        let vertex = &models[0].meshes[0].vertices[0];
        assert_eq!(vertex.tangent, DVec3::ZERO);
        assert_eq!(vertex.binormal, DVec3::ZERO);
        assert_eq!(vertex.weight_sum(), 255);
    }

    #[test]
    fn test_bad_weight_sum_rejected() {
        let mut model = cn6_model();
        model.meshes[0].vertices[0].bone_weights[0] = 199;
        let err = encode_to_string(&CN6, &model).unwrap_err();
        assert!(matches!(
            err,
            Error::Invariant(InvariantViolation::WeightSum { vertex: 0, sum: 254 })
        ));
    }
}
