//! Fixed-width name shortening
//!
//! Names longer than the legacy field width keep a head and a tail slice with
//! a two-digit counter between them. Counters are scoped per head/tail pair,
//! so different long names that truncate alike still get distinct short
//! names. Every rename is recorded in a [`NameMap`] so export can restore the
//! original.

use hashbrown::HashMap;

use crate::error::InvariantViolation;

/// Largest two-digit counter
const MAX_COUNTER: u32 = 99;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NameKind {
    Bone,
    Mesh,
}

impl NameKind {
    /// Field width enforced by the external tool
    pub const fn max_len(self) -> usize {
        match self {
            NameKind::Bone => 31,
            NameKind::Mesh => 21,
        }
    }

    pub const fn prefix_len(self) -> usize {
        match self {
            NameKind::Bone => 14,
            NameKind::Mesh => 9,
        }
    }

    pub const fn suffix_len(self) -> usize {
        match self {
            NameKind::Bone => 13,
            NameKind::Mesh => 8,
        }
    }

    /// Property-style tag the mapping is stored under
    pub const fn tag(self) -> &'static str {
        match self {
            NameKind::Bone => "B_",
            NameKind::Mesh => "M_",
        }
    }
}

/// Shortened -> original names, attached to an armature
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NameMap {
    entries: HashMap<String, String>,
}

impl NameMap {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(kind: NameKind, short: &str) -> String {
        format!("{}{}", kind.tag(), short)
    }

    pub fn insert(&mut self, kind: NameKind, short: &str, original: &str) {
        self.entries
            .insert(Self::key(kind, short), original.to_string());
    }

    /// Original name for `name`, or `name` itself when it was never shortened
    pub fn original<'a>(&'a self, kind: NameKind, name: &'a str) -> &'a str {
        self.entries
            .get(&Self::key(kind, name))
            .map(String::as_str)
            .unwrap_or(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// (tagged short name, original) pairs
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Drop every entry of `kind` whose short name is not in `keep`
    pub fn retain(&mut self, kind: NameKind, keep: impl Fn(&str) -> bool) {
        let tag = kind.tag();
        self.entries.retain(|key, _| match key.strip_prefix(tag) {
            Some(short) => keep(short),
            None => true,
        });
    }
}

/// Allocates short names; one instance per import
#[derive(Debug, Default)]
pub struct NameShortener {
    counters: HashMap<(NameKind, String, String), u32>,
    assigned: HashMap<(NameKind, String), String>,
}

impl NameShortener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Short form of `name`, recording any rename in `map`
    ///
    /// Names within the field width are returned unchanged. The same long
    /// name always maps to the same short name.
    pub fn shorten(
        &mut self,
        kind: NameKind,
        name: &str,
        map: &mut NameMap,
    ) -> Result<String, InvariantViolation> {
        let chars: Vec<char> = name.chars().collect();
        if chars.len() <= kind.max_len() {
            return Ok(name.to_string());
        }
        if let Some(short) = self.assigned.get(&(kind, name.to_string())) {
            return Ok(short.clone());
        }

        let prefix: String = chars[..kind.prefix_len()].iter().collect();
        let suffix: String = chars[chars.len() - kind.suffix_len()..].iter().collect();

        let counter = self
            .counters
            .entry((kind, prefix.clone(), suffix.clone()))
            .or_insert(0);
        if *counter > MAX_COUNTER {
            return Err(InvariantViolation::NameCounterExhausted { prefix, suffix });
        }
        let short = format!("{}{:02}{}", prefix, *counter, suffix);
        *counter += 1;

        tracing::info!("{:?} Rename: \"{}\" > \"{}\"", kind, name, short);
        map.insert(kind, &short, name);
        self.assigned.insert((kind, name.to_string()), short.clone());
        Ok(short)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_names_untouched() {
        let mut shortener = NameShortener::new();
        let mut map = NameMap::new();
        let name = "Bip01 L Forearm";
        assert_eq!(shortener.shorten(NameKind::Bone, name, &mut map).unwrap(), name);
        assert!(map.is_empty());
    }

    #[test]
    fn test_bone_name_layout() {
        let mut shortener = NameShortener::new();
        let mut map = NameMap::new();
        let long = "Leader_Spearman_Left_Shoulder_Pad_Twist";
        let short = shortener.shorten(NameKind::Bone, long, &mut map).unwrap();
        assert_eq!(short, "Leader_Spearma00der_Pad_Twist");
        assert_eq!(short.len(), 29);
        assert_eq!(map.original(NameKind::Bone, &short), long);
    }

    #[test]
    fn test_colliding_mesh_names_get_distinct_counters() {
        let mut shortener = NameShortener::new();
        let mut map = NameMap::new();
        let first = "Leader_Bo_Armor_Left_Variant_Mesh";
        let second = "Leader_Bo_Cloth_Right_Variant_Mesh";
        let a = shortener.shorten(NameKind::Mesh, first, &mut map).unwrap();
        let b = shortener.shorten(NameKind::Mesh, second, &mut map).unwrap();
        assert_eq!(a, "Leader_Bo00ant_Mesh");
        assert_eq!(b, "Leader_Bo01ant_Mesh");
        assert_eq!(a.chars().count(), 19);
        assert_eq!(map.original(NameKind::Mesh, &a), first);
        assert_eq!(map.original(NameKind::Mesh, &b), second);
    }

    #[test]
    fn test_same_name_is_stable() {
        let mut shortener = NameShortener::new();
        let mut map = NameMap::new();
        let long = "Leader_Bo_Armor_Left_Variant_Mesh";
        let a = shortener.shorten(NameKind::Mesh, long, &mut map).unwrap();
        let b = shortener.shorten(NameKind::Mesh, long, &mut map).unwrap();
        assert_eq!(a, b);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_kinds_do_not_share_counters_or_entries() {
        let mut shortener = NameShortener::new();
        let mut map = NameMap::new();
        let long = "Leader_Spearman_Head_Helmet_Plume_Tip";
        let bone = shortener.shorten(NameKind::Bone, long, &mut map).unwrap();
        let mesh = shortener.shorten(NameKind::Mesh, long, &mut map).unwrap();
        assert!(bone.contains("00"));
        assert!(mesh.contains("00"));
        assert_eq!(map.original(NameKind::Mesh, &bone), bone);
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_multibyte_names_sliced_by_char() {
        let mut shortener = NameShortener::new();
        let mut map = NameMap::new();
        let long = "Ä".repeat(25);
        let short = shortener.shorten(NameKind::Mesh, &long, &mut map).unwrap();
        assert_eq!(short, format!("{}00{}", "Ä".repeat(9), "Ä".repeat(8)));
    }

    #[test]
    fn test_counter_exhaustion() {
        let mut shortener = NameShortener::new();
        let mut map = NameMap::new();
        for i in 0..100 {
            let name = format!("Leader_Bo_{:03}_padding_Variant_Mesh", i);
            shortener.shorten(NameKind::Mesh, &name, &mut map).unwrap();
        }
        let err = shortener
            .shorten(NameKind::Mesh, "Leader_Bo_overflow_Variant_Mesh", &mut map)
            .unwrap_err();
        assert!(matches!(err, InvariantViolation::NameCounterExhausted { .. }));
    }
}
