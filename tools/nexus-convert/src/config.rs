//! nexus.toml configuration
//!
//! Every section and key is optional.

use anyhow::{Context, Result, bail};
use nexus_common::basis::BONE_LENGTH;
use nexus_common::{FormatKind, FormatSpec, UnweightedPolicy, WeightRounding};
use serde::Deserialize;
use std::path::Path;

/// Default config file looked up next to the working directory
pub const DEFAULT_CONFIG: &str = "nexus.toml";

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub import: ImportSection,
    #[serde(default)]
    pub export: ExportSection,
    #[serde(default)]
    pub batch: BatchSection,
}

/// Import options
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImportSection {
    /// Remove the top bone of the first bone's chain and rename the armature
    /// after it
    #[serde(default)]
    pub delete_top_bone: bool,

    /// Shorten bone and mesh names to the legacy 31/21 character widths
    #[serde(default = "default_true")]
    pub shorten_names: bool,

    /// Edit-bone length for imported bones
    #[serde(default = "default_bone_length")]
    pub bone_length: f64,
}

impl Default for ImportSection {
    fn default() -> Self {
        Self {
            delete_top_bone: false,
            shorten_names: true,
            bone_length: BONE_LENGTH,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_bone_length() -> f64 {
    BONE_LENGTH
}

/// How vertices without skin weight are exported
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnweightedSetting {
    /// Whatever the target format does
    #[default]
    Format,
    /// Always fail the export
    Error,
    /// Always write the -1 sentinel
    Sentinel,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExportSection {
    #[serde(default)]
    pub unweighted: UnweightedSetting,

    /// Weight rounding for every format; unset keeps each format's own
    #[serde(default)]
    pub weight_rounding: Option<WeightRounding>,
}

impl ExportSection {
    /// Target format layout with the configured overrides applied
    pub fn format_spec(&self, kind: FormatKind) -> Result<FormatSpec> {
        let mut spec = kind.spec().clone();
        spec.unweighted = match self.unweighted {
            UnweightedSetting::Format => spec.unweighted,
            UnweightedSetting::Error => UnweightedPolicy::Reject,
            UnweightedSetting::Sentinel => UnweightedPolicy::Sentinel,
        };
        if let Some(rounding) = self.weight_rounding {
            if !rounding.supports(spec.influence_count) {
                bail!(
                    "Weight rounding {:?} cannot be used for {} ({} influences per vertex)",
                    rounding,
                    spec.extension,
                    spec.influence_count
                );
            }
            spec.weight_rounding = rounding;
        }
        Ok(spec)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatchSection {
    /// Source file extension for manifest conversion
    #[serde(default = "default_source")]
    pub source: String,
    /// Target file extension for manifest conversion
    #[serde(default = "default_target")]
    pub target: String,
}

impl Default for BatchSection {
    fn default() -> Self {
        Self {
            source: default_source(),
            target: default_target(),
        }
    }
}

fn default_source() -> String {
    "nb2".to_string()
}

fn default_target() -> String {
    "cn6".to_string()
}

impl Config {
    /// Load from `path`
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Load from `path` when given, else `nexus.toml` if present, else defaults
    pub fn discover(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let default = Path::new(DEFAULT_CONFIG);
                if default.exists() {
                    tracing::debug!("Using {}", DEFAULT_CONFIG);
                    Self::load(default)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}
