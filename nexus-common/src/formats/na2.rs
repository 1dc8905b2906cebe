//! NA2 animation codec
//!
//! A file holds frame sets; each frame set lists its bones by name (one raw
//! line each) followed by one 16-float matrix row per frame.

use std::io::{BufRead, Write};

use crate::error::FormatError;
use crate::math::{mat4_from_row_major, mat4_to_row_major};
use crate::model::{Animation, BoneTrack, FrameSet};
use crate::tokenizer::{LineReader, fmt_float};

pub fn decode<R: BufRead>(input: R) -> Result<Animation, FormatError> {
    let mut reader = LineReader::new(input);
    let set_count = reader.require_keyed_count("FrameSets:", "FrameSets")?;

    let mut frame_sets = Vec::with_capacity(set_count);
    for _ in 0..set_count {
        let frame_count = reader.require_keyed_count("FrameCount:", "FrameCount")?;
        let first_frame = reader.require_keyed_int("FirstFrame:", "FirstFrame")?;
        let last_frame = reader.require_keyed_int("LastFrame:", "LastFrame")?;
        let fps = reader.require_keyed_int("FPS:", "FPS")?;
        let bone_count = reader.require_keyed_count("Bones:", "Number of bones")?;

        let mut bone_tracks = Vec::with_capacity(bone_count);
        for b in 0..bone_count {
            let Some(name) = reader.next_raw()? else {
                return Err(FormatError::UnexpectedEof {
                    record: format!("Name of bone {}", b + 1),
                    line: reader.line(),
                });
            };

            let mut frames = Vec::with_capacity(frame_count);
            for f in 0..frame_count {
                let label = format!("Frame {} of bone `{}`", f + 1, name.text);
                let fields = reader.require_fields(label, 16)?;
                frames.push(mat4_from_row_major(&fields.floats::<16>(0)?));
            }
            bone_tracks.push(BoneTrack {
                name: name.text,
                frames,
            });
        }

        frame_sets.push(FrameSet {
            frame_count,
            first_frame,
            last_frame,
            fps,
            bone_tracks,
        });
    }

    Ok(Animation { frame_sets })
}

pub fn encode<W: Write>(animation: &Animation, mut out: W) -> Result<(), FormatError> {
    writeln!(out, "FrameSets: {}", animation.frame_sets.len())?;
    for set in &animation.frame_sets {
        writeln!(out, "FrameCount: {}", set.frame_count)?;
        writeln!(out, "FirstFrame: {}", set.first_frame)?;
        writeln!(out, "LastFrame: {}", set.last_frame)?;
        writeln!(out, "FPS: {}", set.fps)?;
        writeln!(out, "Bones: {}", set.bone_tracks.len())?;
        for track in &set.bone_tracks {
            if track.frames.len() != set.frame_count {
                return Err(FormatError::Unsupported(format!(
                    "bone track `{}` with {} of {} frames",
                    track.name,
                    track.frames.len(),
                    set.frame_count
                )));
            }
            writeln!(out, "{}", track.name)?;
            for frame in &track.frames {
                let fields: Vec<String> = mat4_to_row_major(frame)
                    .iter()
                    .map(|&v| fmt_float(v))
                    .collect();
                writeln!(out, "{}", fields.join(" "))?;
            }
        }
    }
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{DMat4, DVec3};
    use std::io::Cursor;

    const WALK: &str = "FrameSets: 1
FrameCount: 2
FirstFrame: 0
LastFrame: 1
FPS: 30
Bones: 2
Leader
1 0 0 0 0 1 0 0 0 0 1 0 0 0 0 1
1 0 0 0 0 1 0 0 0 0 1 0 0 0 0 1
Bip01 Pelvis
1 0 0 0 0 1 0 0 0 0 1 0 0 0 0 1
1 0 0 0 0 1 0 0 0 0 1 0 2 3 4 1
";

    #[test]
    fn test_decode_walk() {
        let animation = decode(Cursor::new(WALK)).unwrap();
        let set = &animation.frame_sets[0];
        assert_eq!((set.frame_count, set.first_frame, set.last_frame, set.fps), (2, 0, 1, 30));
        assert_eq!(set.bone_tracks[1].name, "Bip01 Pelvis");
        // file rows are matrix rows
        assert_eq!(set.bone_tracks[1].frames[1].row(3).truncate(), DVec3::new(2.0, 3.0, 4.0));
        assert_eq!(set.bone_tracks[0].frames[0], DMat4::IDENTITY);
    }

    #[test]
    fn test_short_matrix_row() {
        let text = WALK.replace("0 0 1 0 2 3 4 1", "0 0 1 0 2 3 4");
        let err = decode(Cursor::new(text)).unwrap_err();
        assert!(err.to_string().starts_with("Frame 2 of bone `Bip01 Pelvis` is invalid!"));
    }

    #[test]
    fn test_missing_header() {
        let err = decode(Cursor::new("FrameSet: 1\n")).unwrap_err();
        assert!(matches!(err, FormatError::MissingLiteral { .. }));
    }

    #[test]
    fn test_encode_then_decode() {
        let animation = decode(Cursor::new(WALK)).unwrap();
        let mut out = Vec::new();
        encode(&animation, &mut out).unwrap();
        assert_eq!(decode(Cursor::new(out)).unwrap(), animation);
    }
}
