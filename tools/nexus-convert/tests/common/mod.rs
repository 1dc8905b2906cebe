//! Test assets shared by the integration tests

#![allow(dead_code)]

use std::path::{Path, PathBuf};

/// Two-bone quad: vertex 2 is split between both bones, vertex 3 belongs to
/// `Child`
pub const LEADER_NB2: &str = r#"// leader test model
Frames: 0
Frame: 1
Meshes: 1
"Body" 0 0
4
0 0.0 0.0 0.0 0.0 0.0 0 1.0 -1 0.0 -1 0.0 -1 0.0
0 1.0 0.0 0.0 1.0 0.0 0 1.0 -1 0.0 -1 0.0 -1 0.0
0 1.0 1.0 0.0 1.0 1.0 0 0.5 1 0.5 -1 0.0 -1 0.0
0 0.0 1.0 0.0 0.0 1.0 1 1.0 -1 0.0 -1 0.0 -1 0.0
4
0.0 0.0 1.0
0.0 0.0 1.0
0.0 0.0 1.0
0.0 0.0 1.0
2
0 0 1 2 0 1 2 1
0 0 2 3 0 2 3 1
Materials: 1
"Skin"
0.2 0.2 0.2 1.0
0.8 0.8 0.8 1.0
0.0 0.0 0.0 1.0
0.0 0.0 0.0 1.0
0.0
1.0
"Leader_Skin.dds"
""
Bones: 2
"Root"
""
0 0.0 0.0 0.0 0.0 0.0 0.0 1.0
0
0
"Child"
"Root"
0 0.0 1.0 0.0 0.0 0.0 0.70710678 0.70710678
0
0
"#;

/// Two frames; `Child` moves on the second one
pub const WALK_NA2: &str = "FrameSets: 1
FrameCount: 2
FirstFrame: 0
LastFrame: 1
FPS: 30
Bones: 3
leader
1 0 0 0 0 1 0 0 0 0 1 0 0 0 0 1
1 0 0 0 0 1 0 0 0 0 1 0 0 0 0 1
Root
1 0 0 0 0 1 0 0 0 0 1 0 0 0 0 1
1 0 0 0 0 1 0 0 0 0 1 0 0 0 0 1
Child
1 0 0 0 0 1 0 0 0 0 1 0 0 1 0 1
1 0 0 0 0 1 0 0 0 0 1 0 0 2 0 1
";

pub fn write_asset(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).expect("Failed to write test asset");
    path
}

/// Vertex rows of the first mesh in a BR2/CN6 text, split into fields
pub fn vertex_rows(text: &str) -> Vec<Vec<String>> {
    text.lines()
        .skip_while(|l| *l != "vertices")
        .skip(1)
        .take_while(|l| *l != "triangles")
        .map(|l| l.split_whitespace().map(str::to_string).collect())
        .collect()
}
