//! Shared model types and codecs for the Nexus Buddy / CivNexus6 formats
//!
//! This crate holds everything that does not depend on the hosting 3D editor:
//! - `nexus-convert` (host scene, import/export pipelines, batch tool)
//! - tests that exercise the codecs directly
//!
//! # Modules
//!
//! - [`tokenizer`] - Line reader with comment skipping and quote-aware fields
//! - [`formats`] - NB2, CN6, BR2 and NA2 codecs
//! - [`basis`] - Edit-bone matrix <-> local quaternion / inverse world matrix
//! - [`skinning`] - Top-N influence selection with exact 255 weight sums
//! - [`dedup`] - Vertex/UV combination deduplication
//! - [`tangent`] - Per-vertex tangent space averaging
//! - [`names`] - Fixed-width name shortening with a reversible side table

pub mod basis;
pub mod dedup;
pub mod error;
pub mod formats;
pub mod math;
pub mod model;
pub mod names;
pub mod skinning;
pub mod tangent;
pub mod tokenizer;

pub use error::{Error, FormatError, InvariantViolation};

pub use model::{
    Animation, Bone, BoneTrack, FrameInfo, FrameSet, LegacyKeys, MaterialDef, Mesh, Model, Skeleton,
    Triangle, Vertex,
};

pub use formats::{
    BR2, CN6, FormatKind, FormatSpec, NB2, TangentConvention, UnweightedPolicy,
};

pub use skinning::WeightRounding;

pub use names::{NameKind, NameMap, NameShortener};
