//! NB2 codec
//!
//! Layout: frame header, meshes (vertices, normals, triangles), material
//! blocks, then bones with optional position/rotation key frames. Bone
//! records reference their parent by name; vertex influences reference bones
//! by file index and carry unit-float weights.

use std::io::{BufRead, Write};

use glam::{DQuat, DVec3};
use hashbrown::HashMap;

use super::{NB2, check_skin, pad_uvs};
use crate::error::{Error, FormatError};
use crate::model::{
    Bone, FrameInfo, LegacyKeys, MaterialDef, Mesh, Model, NO_PARENT, Skeleton, Triangle, Vertex,
    WEIGHT_TOTAL,
};
use crate::tokenizer::{LineReader, fmt_float};

const NO_MATERIAL: i64 = -1;

// ============================================================================
// Decode
// ============================================================================

pub fn decode<R: BufRead>(input: R) -> Result<Model, FormatError> {
    let mut reader = LineReader::new(input);

    let frame_info = FrameInfo {
        frame_count: reader.require_keyed_int("Frames:", "Frame information")?,
        current_frame: reader.require_keyed_int("Frame:", "Frame information")?,
    };

    let mesh_count = reader.require_keyed_count("Meshes:", "Number of meshes")?;
    let mut meshes = Vec::with_capacity(mesh_count);
    let mut mesh_materials = Vec::with_capacity(mesh_count);
    for i in 0..mesh_count {
        let (mesh, material) = decode_mesh(&mut reader, i + 1)?;
        meshes.push(mesh);
        mesh_materials.push(material);
    }

    let material_count = reader.require_keyed_count("Materials:", "Number of materials")?;
    let mut materials = Vec::with_capacity(material_count);
    for i in 0..material_count {
        materials.push(decode_material(&mut reader, i + 1)?);
    }

    for (mesh, material) in meshes.iter_mut().zip(mesh_materials) {
        if material == NO_MATERIAL {
            continue;
        }
        match usize::try_from(material).ok().and_then(|m| materials.get(m)) {
            Some(def) => mesh.materials.push(def.host_name()),
            None => tracing::warn!(
                "Mesh `{}` references missing material {}",
                mesh.name,
                material
            ),
        }
    }

    let bone_count = reader.require_keyed_count("Bones:", "Number of bones")?;
    let mut bones: Vec<Bone> = Vec::with_capacity(bone_count);
    for i in 0..bone_count {
        let bone = decode_bone(&mut reader, &bones, i)?;
        bones.push(bone);
    }

    Ok(Model {
        skeleton: Skeleton { bones },
        meshes,
        materials,
        frame_info,
    })
}

fn decode_mesh<R: BufRead>(
    reader: &mut LineReader<R>,
    number: usize,
) -> Result<(Mesh, i64), FormatError> {
    let label = format!("Name, flags or material in mesh {}", number);
    let header = reader.require_fields(label, 3)?;
    let mut mesh = Mesh {
        name: header.str(0)?.to_string(),
        ..Default::default()
    };
    let material = header.int(2)?;

    let vertex_count = reader
        .require(format!("Number of vertices in mesh {}", number))?
        .count(format!("Number of vertices in mesh {}", number))?;
    for j in 0..vertex_count {
        let label = format!("Vertex {} in mesh {}", j + 1, number);
        let fields = reader.require_fields(label, NB2.vertex_field_count())?;
        let mut vertex = Vertex {
            position: fields.vec3(1)?,
            ..Default::default()
        };
        vertex.uvs.push(fields.vec2(4)?);
        for k in 0..NB2.influence_count {
            vertex.bone_ids.push(fields.i32(6 + 2 * k)?);
            let weight = fields.f64(7 + 2 * k)?;
            vertex
                .bone_weights
                .push((weight * f64::from(WEIGHT_TOTAL)).round() as i32);
        }
        mesh.vertices.push(vertex);
    }

    let normal_count = reader
        .require(format!("Number of normals in mesh {}", number))?
        .count(format!("Number of normals in mesh {}", number))?;
    let mut normals = Vec::with_capacity(normal_count);
    for j in 0..normal_count {
        let label = format!("Normal {} in mesh {}", j + 1, number);
        normals.push(reader.require_fields(label, 3)?.vec3(0)?);
    }

    let triangle_count = reader
        .require(format!("Number of triangles in mesh {}", number))?
        .count(format!("Number of triangles in mesh {}", number))?;
    let mut has_normal = vec![false; mesh.vertices.len()];
    for j in 0..triangle_count {
        let label = format!("Triangle {} in mesh {}", j + 1, number);
        let fields = reader.require_fields(label, 8)?;
        let vertices = [fields.count(1)?, fields.count(2)?, fields.count(3)?];
        let corner_normals = [fields.count(4)?, fields.count(5)?, fields.count(6)?];

        if vertices.iter().any(|&v| v >= mesh.vertices.len()) {
            tracing::warn!(
                "Dropping triangle {} in mesh `{}`: vertex out of range",
                j + 1,
                mesh.name
            );
            continue;
        }

        for (&v, &n) in vertices.iter().zip(&corner_normals) {
            if !has_normal[v]
                && let Some(normal) = normals.get(n)
            {
                mesh.vertices[v].normal = *normal;
                has_normal[v] = true;
            }
        }
        mesh.triangles.push(Triangle {
            vertices,
            material_index: 0,
        });
    }

    tracing::debug!(
        "Mesh `{}`: {} vertices, {} triangles",
        mesh.name,
        mesh.vertices.len(),
        mesh.triangles.len()
    );
    Ok((mesh, material))
}

fn decode_material<R: BufRead>(
    reader: &mut LineReader<R>,
    number: usize,
) -> Result<MaterialDef, FormatError> {
    let name = reader
        .require(format!("Name of material {}", number))?
        .quoted(format!("Name of material {}", number))?;

    let mut colour = |what: &str| -> Result<[f64; 4], FormatError> {
        let label = format!("{} color in material {}", what, number);
        reader.require_fields(label, 4)?.floats::<4>(0)
    };
    let ambient = colour("Ambient")?;
    let diffuse = colour("Diffuse")?;
    let specular = colour("Specular")?;
    let emissive = colour("Emissive")?;

    let shininess = reader
        .require_fields(format!("Shininess in material {}", number), 1)?
        .f64(0)?;
    let transparency = reader
        .require_fields(format!("Transparency in material {}", number), 1)?
        .f64(0)?;
    let texture = reader
        .require(format!("Texture map in material {}", number))?
        .quoted(format!("Texture map in material {}", number))?;
    let alpha_map = reader
        .require(format!("Alpha map in material {}", number))?
        .quoted(format!("Alpha map in material {}", number))?;

    Ok(MaterialDef {
        name,
        ambient,
        diffuse,
        specular,
        emissive,
        shininess,
        transparency,
        texture,
        alpha_map,
    })
}

fn decode_bone<R: BufRead>(
    reader: &mut LineReader<R>,
    earlier: &[Bone],
    index: usize,
) -> Result<Bone, FormatError> {
    let number = index + 1;
    let name = reader
        .require(format!("Name of bone {}", number))?
        .quoted(format!("Name of bone {}", number))?;
    let parent = reader
        .require(format!("Parent of bone {}", number))?
        .quoted(format!("Parent of bone {}", number))?;

    let parent_id = if parent.is_empty() {
        NO_PARENT
    } else {
        match earlier.iter().position(|b| b.name == parent) {
            Some(p) => p as i32,
            None => return Err(FormatError::UnknownParent { bone: name, parent }),
        }
    };

    let label = format!("Position or orientation of bone {}", number);
    let record = reader.require(label.clone())?;
    let fields = record.fields(label)?;
    fields.expect_len_in(&[8, 24])?;
    let [qx, qy, qz, qw] = fields.floats::<4>(4)?;

    let mut legacy_keys = LegacyKeys::default();
    for (what, keys) in [
        ("position", &mut legacy_keys.positions),
        ("rotation", &mut legacy_keys.rotations),
    ] {
        let count_label = format!("Number of {} key frames in bone {}", what, number);
        let count = reader.require(count_label.clone())?.count(count_label)?;
        for k in 0..count {
            let label = format!("{} key frame {} in bone {}", what, k + 1, number);
            keys.push(reader.require_fields(label, 4)?.floats::<4>(0)?);
        }
    }

    Ok(Bone {
        id: index as i32,
        name,
        parent_id,
        local_position: fields.vec3(1)?,
        local_rotation: DQuat::from_xyzw(qx, qy, qz, qw),
        inverse_world_matrix: glam::DMat4::IDENTITY,
        legacy_keys,
    })
}

// ============================================================================
// Encode
// ============================================================================

pub fn encode<W: Write>(model: &Model, mut out: W) -> Result<(), Error> {
    let materials = collect_materials(model)?;

    writeln!(out, "Frames: {}", model.frame_info.frame_count)?;
    writeln!(out, "Frame: {}", model.frame_info.current_frame)?;

    writeln!(out, "Meshes: {}", model.meshes.len())?;
    for mesh in &model.meshes {
        let material = match mesh.materials.first() {
            Some(name) => materials
                .iter()
                .position(|m| &m.host_name() == name)
                .map_or(NO_MATERIAL, |i| i as i64),
            None => NO_MATERIAL,
        };
        writeln!(out, "\"{}\" 0 {}", mesh.name, material)?;

        writeln!(out, "{}", mesh.vertices.len())?;
        for (index, vertex) in mesh.vertices.iter().enumerate() {
            check_skin(&NB2, mesh, index, vertex)?;
            let mut line = format!(
                "0 {} {} {}",
                fmt_float(vertex.position.x),
                fmt_float(vertex.position.y),
                fmt_float(vertex.position.z)
            );
            for uv in pad_uvs(&vertex.uvs, 1) {
                line.push_str(&format!(" {} {}", fmt_float(uv.x), fmt_float(uv.y)));
            }
            for (id, weight) in vertex.bone_ids.iter().zip(&vertex.bone_weights) {
                let unit = f64::from(*weight) / f64::from(WEIGHT_TOTAL);
                line.push_str(&format!(" {} {}", id, fmt_float(unit)));
            }
            writeln!(out, "{}", line)?;
        }

        writeln!(out, "{}", mesh.vertices.len())?;
        for vertex in &mesh.vertices {
            writeln!(out, "{}", fmt_vec3(vertex.normal))?;
        }

        writeln!(out, "{}", mesh.triangles.len())?;
        for triangle in &mesh.triangles {
            let [a, b, c] = triangle.vertices;
            writeln!(out, "0 {a} {b} {c} {a} {b} {c} 1")?;
        }
    }

    writeln!(out, "Materials: {}", materials.len())?;
    for material in &materials {
        writeln!(out, "\"{}\"", material.name)?;
        for colour in [
            material.ambient,
            material.diffuse,
            material.specular,
            material.emissive,
        ] {
            let fields: Vec<String> = colour.iter().map(|&c| fmt_float(c)).collect();
            writeln!(out, "{}", fields.join(" "))?;
        }
        writeln!(out, "{}", fmt_float(material.shininess))?;
        writeln!(out, "{}", fmt_float(material.transparency))?;
        writeln!(out, "\"{}\"", material.texture)?;
        writeln!(out, "\"{}\"", material.alpha_map)?;
    }

    let bones = &model.skeleton.bones;
    writeln!(out, "Bones: {}", bones.len())?;
    for bone in bones {
        let parent = bone
            .parent_index()
            .and_then(|p| bones.get(p))
            .map_or("", |p| p.name.as_str());
        let q = bone.local_rotation;
        writeln!(out, "\"{}\"", bone.name)?;
        writeln!(out, "\"{}\"", parent)?;
        writeln!(
            out,
            "0 {} {} {} {} {}",
            fmt_vec3(bone.local_position),
            fmt_float(q.x),
            fmt_float(q.y),
            fmt_float(q.z),
            fmt_float(q.w)
        )?;
        for keys in [&bone.legacy_keys.positions, &bone.legacy_keys.rotations] {
            writeln!(out, "{}", keys.len())?;
            for key in keys {
                let fields: Vec<String> = key.iter().map(|&v| fmt_float(v)).collect();
                writeln!(out, "{}", fields.join(" "))?;
            }
        }
    }

    out.flush()?;
    Ok(())
}

/// Material blocks for every mesh, reusing parsed blocks by host name
fn collect_materials(model: &Model) -> Result<Vec<MaterialDef>, FormatError> {
    let mut materials: Vec<MaterialDef> = Vec::new();
    let mut seen: HashMap<String, usize> = HashMap::new();

    for mesh in &model.meshes {
        if mesh.materials.len() > 1 {
            return Err(FormatError::Unsupported(format!(
                "mesh `{}` with {} materials",
                mesh.name,
                mesh.materials.len()
            )));
        }
        for name in &mesh.materials {
            if seen.contains_key(name) {
                continue;
            }
            let def = model
                .materials
                .iter()
                .find(|m| &m.host_name() == name)
                .cloned()
                .unwrap_or_else(|| MaterialDef::named(name));
            seen.insert(name.clone(), materials.len());
            materials.push(def);
        }
    }
    Ok(materials)
}

fn fmt_vec3(v: DVec3) -> String {
    format!("{} {} {}", fmt_float(v.x), fmt_float(v.y), fmt_float(v.z))
}
