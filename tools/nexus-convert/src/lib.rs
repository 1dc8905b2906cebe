//! Nexus model converter
//!
//! Imports NB2, CN6 and BR2 models into an in-memory host scene, applies NA2
//! animations, and exports the scene back out in any of the three layouts.

pub mod animation;
pub mod batch;
pub mod config;
pub mod export;
pub mod import;
pub mod inspect;
pub mod scene;

use anyhow::{Result, bail};
use nexus_common::FormatKind;
use std::path::Path;

/// Model format of a file, from its extension
pub fn format_of(path: &Path) -> Result<FormatKind> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    match FormatKind::from_extension(extension) {
        Some(kind) => Ok(kind),
        None => bail!("Unsupported file type: {:?}", path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_of() {
        assert_eq!(format_of(Path::new("a/leader.CN6")).unwrap(), FormatKind::Cn6);
        assert_eq!(format_of(Path::new("unit.nb2")).unwrap(), FormatKind::Nb2);
        assert!(format_of(Path::new("unit.na2")).is_err());
        assert!(format_of(Path::new("unit")).is_err());
    }
}
