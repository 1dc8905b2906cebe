//! Skinning resolver
//!
//! Turns the sparse (bone id, weight) list of a vertex into the fixed-width,
//! rank-sorted influence slots of a format. Quantized weights always total
//! exactly [`WEIGHT_TOTAL`].

use serde::Deserialize;
use smallvec::SmallVec;

use crate::error::InvariantViolation;
use crate::model::{UNWEIGHTED_SENTINEL, WEIGHT_TOTAL};

/// How rounding drift is folded back into the quantized weights
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightRounding {
    /// NB2/BR2: the first weight that pushes the running total past 255 loses
    /// one, then any shortfall goes to the first slot
    ClampOverflow,
    /// CN6: the whole excess or shortfall goes to the first slot
    DumpRemainder,
}

impl WeightRounding {
    /// Whether every vertex resolved into `count` slots totals 255
    ///
    /// `ClampOverflow` trims a single unit, so it only holds while rounding
    /// can overshoot by at most one, which is four slots or fewer.
    pub fn supports(self, count: usize) -> bool {
        match self {
            WeightRounding::ClampOverflow => count <= 4,
            WeightRounding::DumpRemainder => true,
        }
    }
}

/// Fixed-width influence slots of one vertex
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkinWeights {
    pub bone_ids: SmallVec<[i32; 8]>,
    pub weights: SmallVec<[i32; 8]>,
}

impl SkinWeights {
    /// `-1` ids and weights for a vertex without influences
    pub fn sentinel(count: usize) -> Self {
        Self {
            bone_ids: SmallVec::from_elem(UNWEIGHTED_SENTINEL, count),
            weights: SmallVec::from_elem(UNWEIGHTED_SENTINEL, count),
        }
    }

    pub fn total(&self) -> i32 {
        self.weights.iter().sum()
    }
}

/// Drop non-positive weights and scale the rest to sum to 1
///
/// Input order is preserved. A vertex with no positive weight yields an
/// empty list.
pub fn normalize(influences: &[(i32, f64)]) -> Vec<(i32, f64)> {
    let total: f64 = influences.iter().map(|&(_, w)| w.max(0.0)).sum();
    if total <= 0.0 {
        return Vec::new();
    }
    influences
        .iter()
        .filter(|&&(_, w)| w > 0.0)
        .map(|&(id, w)| (id, w / total))
        .collect()
}

/// Resolve one vertex into `count` influence slots
///
/// `influences` is in bone-id order; equal weights keep that order after
/// ranking. Returns `Ok(None)` when the vertex has no positive weight.
pub fn resolve(
    vertex: usize,
    influences: &[(i32, f64)],
    count: usize,
    rounding: WeightRounding,
) -> Result<Option<SkinWeights>, InvariantViolation> {
    let mut ranked = normalize(influences);
    if ranked.is_empty() || count == 0 {
        return Ok(None);
    }

    // stable, so ties keep bone-id order
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    let first_id = ranked[0].0;
    ranked.truncate(count);
    ranked.resize(count, (first_id, 0.0));

    let top_total: f64 = ranked.iter().map(|&(_, w)| w).sum();
    let mut weights: SmallVec<[i32; 8]> = ranked
        .iter()
        .map(|&(_, w)| (f64::from(WEIGHT_TOTAL) * w / top_total).round_ties_even() as i32)
        .collect();

    match rounding {
        WeightRounding::ClampOverflow => {
            let mut running = 0;
            for w in weights.iter_mut() {
                running += *w;
                if running > WEIGHT_TOTAL {
                    *w -= 1;
                    break;
                }
            }
            let total: i32 = weights.iter().sum();
            if total < WEIGHT_TOTAL {
                weights[0] += WEIGHT_TOTAL - total;
            }
        }
        WeightRounding::DumpRemainder => {
            let total: i32 = weights.iter().sum();
            weights[0] += WEIGHT_TOTAL - total;
        }
    }

    let sum: i32 = weights.iter().sum();
    if sum != WEIGHT_TOTAL {
        return Err(InvariantViolation::WeightSum { vertex, sum });
    }

    Ok(Some(SkinWeights {
        bone_ids: ranked.iter().map(|&(id, _)| id).collect(),
        weights,
    }))
}
