//! Vertex/UV deduplication
//!
//! The host shares one vertex between triangles and stores UVs per corner.
//! The formats store one UV set per emitted vertex, so every distinct
//! (vertex, UV channels) combination becomes its own output slot.
//!
//! Keys compare UVs by their eight-decimal rendering, never by raw float
//! equality.

use glam::DVec2;
use hashbrown::HashMap;
use smallvec::SmallVec;

/// One triangle corner as seen by the host
#[derive(Debug, Clone, PartialEq)]
pub struct Corner {
    pub vertex: usize,
    pub uvs: SmallVec<[DVec2; 3]>,
}

/// Emitted vertex slot: the host vertex it came from plus its UVs
pub type Slot = Corner;

/// Composite key of a corner
pub fn corner_key(vertex: usize, uvs: &[DVec2]) -> String {
    let mut key = vertex.to_string();
    for uv in uvs {
        key.push_str(&format!("|{:.8}|{:.8}", uv.x, uv.y));
    }
    key
}

/// Incremental deduplicator; slots are numbered in first-seen order
#[derive(Debug, Default)]
pub struct VertexDedup {
    index: HashMap<String, usize>,
    slots: Vec<Slot>,
}

impl VertexDedup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Slot for a corner, allocating one on first sight
    pub fn insert(&mut self, corner: &Corner) -> usize {
        let key = corner_key(corner.vertex, &corner.uvs);
        if let Some(&slot) = self.index.get(&key) {
            return slot;
        }
        let slot = self.slots.len();
        self.index.insert(key, slot);
        self.slots.push(corner.clone());
        slot
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn into_slots(self) -> Vec<Slot> {
        self.slots
    }
}

/// Deduplicate triangles in list order, corners in triangle order
pub fn dedup_triangles(triangles: &[[Corner; 3]]) -> (Vec<Slot>, Vec<[usize; 3]>) {
    let mut dedup = VertexDedup::new();
    let remapped = triangles
        .iter()
        .map(|tri| {
            [
                dedup.insert(&tri[0]),
                dedup.insert(&tri[1]),
                dedup.insert(&tri[2]),
            ]
        })
        .collect();
    (dedup.into_slots(), remapped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    fn corner(vertex: usize, u: f64, v: f64) -> Corner {
        Corner {
            vertex,
            uvs: smallvec![DVec2::new(u, v)],
        }
    }

    fn quad_with_seam() -> Vec<[Corner; 3]> {
        vec![
            [corner(0, 0.0, 0.0), corner(1, 1.0, 0.0), corner(2, 1.0, 1.0)],
            // vertex 2 is shared with the same UV, vertex 0 sits on a seam
            [corner(2, 1.0, 1.0), corner(3, 0.0, 1.0), corner(0, 0.5, 0.0)],
        ]
    }

    #[test]
    fn test_shared_corners_reuse_slots() {
        let (slots, tris) = dedup_triangles(&quad_with_seam());
        assert_eq!(tris, vec![[0, 1, 2], [2, 3, 4]]);
        assert_eq!(slots.len(), 5);
        assert_eq!(slots[4].vertex, 0);
        assert_eq!(slots[4].uvs[0], DVec2::new(0.5, 0.0));
    }

    #[test]
    fn test_dedup_is_deterministic() {
        let input = quad_with_seam();
        assert_eq!(dedup_triangles(&input), dedup_triangles(&input));
    }

    #[test]
    fn test_sub_precision_noise_collapses() {
        let mut dedup = VertexDedup::new();
        let a = dedup.insert(&corner(4, 0.1, 0.2));
        let b = dedup.insert(&corner(4, 0.1 + 1e-12, 0.2));
        let c = dedup.insert(&corner(4, 0.1 + 1e-6, 0.2));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(dedup.len(), 2);
    }

    #[test]
    fn test_every_channel_must_match() {
        let mut dedup = VertexDedup::new();
        let first = Corner {
            vertex: 0,
            uvs: smallvec![DVec2::ZERO, DVec2::ONE, DVec2::ZERO],
        };
        let mut second = first.clone();
        second.uvs[2] = DVec2::new(0.0, 0.25);
        assert_eq!(dedup.insert(&first), 0);
        assert_eq!(dedup.insert(&second), 1);
        assert_eq!(dedup.insert(&first), 0);
        assert_eq!(corner_key(0, &first.uvs), "0|0.00000000|0.00000000|1.00000000|1.00000000|0.00000000|0.00000000");
    }
}
