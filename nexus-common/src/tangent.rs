//! Per-vertex tangent space averaging
//!
//! The host supplies one normal/tangent/bitangent triple per loop. Vertices
//! get the plain arithmetic mean of the loops that touch them. A mesh may
//! carry preserved triples from an earlier import; those win over the mean.

use glam::DVec3;
use hashbrown::HashMap;

/// Component tolerance when testing for a degenerate (all-equal) triple
pub const DEGENERATE_EPSILON: f64 = 1e-6;

/// Vertices inspected when deciding whether a file carries real tangents
pub const DEGENERATE_SAMPLE: usize = 10;

/// Orthogonal basis at a vertex used for normal mapping
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TangentSpace {
    pub normal: DVec3,
    pub tangent: DVec3,
    pub binormal: DVec3,
}

/// Explicit side table of original triples, keyed by host vertex index
pub type PreservedTangents = HashMap<usize, TangentSpace>;

impl TangentSpace {
    pub fn new(normal: DVec3, tangent: DVec3, binormal: DVec3) -> Self {
        Self {
            normal,
            tangent,
            binormal,
        }
    }

    /// Normal, tangent and binormal all equal: no authored tangent data
    pub fn is_degenerate(&self) -> bool {
        self.normal.abs_diff_eq(self.tangent, DEGENERATE_EPSILON)
            && self.normal.abs_diff_eq(self.binormal, DEGENERATE_EPSILON)
    }

    fn add(&mut self, other: &TangentSpace) {
        self.normal += other.normal;
        self.tangent += other.tangent;
        self.binormal += other.binormal;
    }

    fn scale(&self, factor: f64) -> Self {
        Self::new(
            self.normal * factor,
            self.tangent * factor,
            self.binormal * factor,
        )
    }
}

/// Mean triple per vertex; untouched vertices stay zero
pub fn average_per_vertex(
    vertex_count: usize,
    loops: impl IntoIterator<Item = (usize, TangentSpace)>,
) -> Vec<TangentSpace> {
    let mut sums = vec![(TangentSpace::default(), 0usize); vertex_count];
    for (vertex, space) in loops {
        if let Some((sum, count)) = sums.get_mut(vertex) {
            sum.add(&space);
            *count += 1;
        }
    }
    sums.into_iter()
        .map(|(sum, count)| {
            if count == 0 {
                sum
            } else {
                sum.scale(1.0 / count as f64)
            }
        })
        .collect()
}

/// Averaged triples with preserved ones substituted
///
/// Returns the per-vertex triples and how many came from the side table.
pub fn select(
    averaged: Vec<TangentSpace>,
    preserved: Option<&PreservedTangents>,
) -> (Vec<TangentSpace>, usize) {
    let Some(preserved) = preserved else {
        return (averaged, 0);
    };
    let mut matched = 0;
    let spaces = averaged
        .into_iter()
        .enumerate()
        .map(|(vertex, space)| match preserved.get(&vertex) {
            Some(original) => {
                matched += 1;
                *original
            }
            None => space,
        })
        .collect();
    (spaces, matched)
}

/// Whether imported triples are worth preserving
///
/// Looks at the first [`DEGENERATE_SAMPLE`] vertices; any non-degenerate one
/// means the file carries authored tangents.
pub fn has_authored_tangents(spaces: &[TangentSpace]) -> bool {
    spaces
        .iter()
        .take(DEGENERATE_SAMPLE)
        .any(|space| !space.is_degenerate())
}
