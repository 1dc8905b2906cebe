//! NA2 animations on host armatures
//!
//! Applying keys one pose matrix per bone and frame into the armature's
//! action; baking turns an action back into a single NA2 frame set.

use anyhow::{Context, Result, bail};
use glam::DMat4;
use hashbrown::HashMap;
use nexus_common::basis::{frame_matrix, pose_matrix};
use nexus_common::{Animation, BoneTrack, FrameSet, NameKind};

use crate::scene::{Action, Armature, PoseKey, RenderSettings, SceneWriter};

/// Name given to actions created by [`apply_animation`]
pub const ACTION_NAME: &str = "Action";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnimationSummary {
    pub frame_sets: usize,
    pub keys: usize,
    /// Frames identical to the bone's previous key
    pub skipped: usize,
    /// Tracks naming no bone of the armature
    pub missing_bones: usize,
}

/// Key every frame set of `animation` on the armature at `armature_index`
///
/// Each frame set starts at the scene's current frame and replaces the
/// armature's action, so the last set wins. The first track of a set belongs
/// to the world bone and is not keyed.
pub fn apply_animation<S: SceneWriter>(
    scene: &mut S,
    animation: &Animation,
    armature_index: usize,
) -> Result<AnimationSummary> {
    if animation.frame_sets.len() > 1 {
        tracing::warn!(
            "{} frame sets; only the last one stays on the armature",
            animation.frame_sets.len()
        );
    }

    let mut summary = AnimationSummary::default();
    for set in &animation.frame_sets {
        let render = scene.render_mut();
        let current = render.frame_current;
        render.fps = set.fps;
        render.frame_start = 1;
        render.frame_end = current + set.last_frame;

        let armature = scene
            .armature_mut(armature_index)
            .with_context(|| format!("No armature at index {}", armature_index))?;
        let action = key_frame_set(armature, set, current, &mut summary);
        armature.action = Some(action);
        summary.frame_sets += 1;
    }

    tracing::info!(
        "Keyed {} pose matrices ({} unchanged frames skipped)",
        summary.keys,
        summary.skipped
    );
    Ok(summary)
}

fn key_frame_set(
    armature: &Armature,
    set: &FrameSet,
    current: i64,
    summary: &mut AnimationSummary,
) -> Action {
    let targets: Vec<(usize, &BoneTrack)> = set
        .bone_tracks
        .iter()
        .skip(1)
        .filter_map(|track| match find_track_bone(armature, &track.name) {
            Some(bone) => Some((bone, track)),
            None => {
                tracing::debug!("No bone for track `{}`", track.name);
                summary.missing_bones += 1;
                None
            }
        })
        .collect();

    let mut action = Action {
        name: ACTION_NAME.to_string(),
        keys: Vec::new(),
    };
    let mut previous: HashMap<usize, DMat4> = HashMap::new();
    for frame in 0..set.frame_count {
        for &(bone, track) in &targets {
            let Some(matrix) = track.frames.get(frame) else {
                continue;
            };
            let pose = pose_matrix(matrix);
            if previous.get(&bone) == Some(&pose) {
                summary.skipped += 1;
                continue;
            }
            previous.insert(bone, pose);
            action.keys.push(PoseKey {
                bone: armature.bones[bone].name.clone(),
                frame: current + frame as i64,
                matrix: pose,
            });
            summary.keys += 1;
        }
    }
    action
}

/// Bone for a track, matching the host name or the pre-shortening name
fn find_track_bone(armature: &Armature, name: &str) -> Option<usize> {
    armature.find_bone(name).or_else(|| {
        armature
            .bones
            .iter()
            .position(|b| armature.name_map.original(NameKind::Bone, &b.name) == name)
    })
}

/// Bake the armature's action into one frame set
///
/// Frames between keys hold the previous key. The range runs from the first
/// key to the later of the last key and the scene's end frame.
pub fn bake_animation(armature: &Armature, render: &RenderSettings) -> Result<Animation> {
    let Some(action) = &armature.action else {
        bail!("Armature `{}` has no action", armature.name);
    };
    let (Some(first), Some(last)) = (
        action.keys.iter().map(|k| k.frame).min(),
        action.keys.iter().map(|k| k.frame).max(),
    ) else {
        bail!("Action `{}` has no keys", action.name);
    };
    let last = last.max(render.frame_end);
    let frame_count = usize::try_from(last - first + 1)?;

    let world = BoneTrack {
        name: armature
            .name_map
            .original(NameKind::Bone, &armature.name)
            .to_string(),
        frames: vec![DMat4::IDENTITY; frame_count],
    };
    let mut bone_tracks = vec![world];

    for bone in &armature.bones {
        let mut keys: Vec<&PoseKey> = action.keys_for(&bone.name).collect();
        if keys.is_empty() {
            continue;
        }
        keys.sort_by_key(|k| k.frame);

        let mut frames = Vec::with_capacity(frame_count);
        let mut next = 0;
        let mut held = keys[0].matrix;
        for frame in first..=last {
            while next < keys.len() && keys[next].frame <= frame {
                held = keys[next].matrix;
                next += 1;
            }
            frames.push(frame_matrix(&held));
        }
        bone_tracks.push(BoneTrack {
            name: armature
                .name_map
                .original(NameKind::Bone, &bone.name)
                .to_string(),
            frames,
        });
    }

    Ok(Animation {
        frame_sets: vec![FrameSet {
            frame_count,
            first_frame: 0,
            last_frame: last - first,
            fps: render.fps,
            bone_tracks,
        }],
    })
}
