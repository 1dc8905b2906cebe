//! File summaries for the `inspect` command

use anyhow::{Context, Result};
use nexus_common::formats::{self, na2};
use nexus_common::{Animation, Model};
use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::format_of;

pub enum Report {
    Models(Vec<Model>),
    Animation(Animation),
}

/// Decode `path` by extension; `.na2` is read as an animation
pub fn inspect(path: &Path) -> Result<Report> {
    let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    let reader = BufReader::new(file);

    let is_animation = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("na2"));
    if is_animation {
        let animation = na2::decode(reader).with_context(|| format!("Failed to load {:?}", path))?;
        return Ok(Report::Animation(animation));
    }

    let kind = format_of(path)?;
    let models = formats::decode_models(kind.spec(), reader)
        .with_context(|| format!("Failed to load {:?}", path))?;
    Ok(Report::Models(models))
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Report::Models(models) => {
                for (i, model) in models.iter().enumerate() {
                    writeln!(f, "Skeleton {}: {} bones", i + 1, model.skeleton.len())?;
                    for bone in &model.skeleton.bones {
                        writeln!(f, "  {:>3} {} (parent {})", bone.id, bone.name, bone.parent_id)?;
                    }
                    for mesh in &model.meshes {
                        writeln!(
                            f,
                            "  Mesh {}: {} vertices, {} triangles, materials [{}]",
                            mesh.name,
                            mesh.vertices.len(),
                            mesh.triangles.len(),
                            mesh.materials.join(", ")
                        )?;
                    }
                }
                Ok(())
            }
            Report::Animation(animation) => {
                for (i, set) in animation.frame_sets.iter().enumerate() {
                    writeln!(
                        f,
                        "Frame set {}: {} frames ({}..{}) at {} fps, {} bones",
                        i + 1,
                        set.frame_count,
                        set.first_frame,
                        set.last_frame,
                        set.fps,
                        set.bone_tracks.len()
                    )?;
                }
                Ok(())
            }
        }
    }
}
