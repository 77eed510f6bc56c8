//! Dotted field paths
//!
//! A [`FieldPath`] names one field of a nested record as a list of segments,
//! e.g. `session.keys.f_nwk_s_int_key.key`. Containment is segment-wise:
//! - `a.b` covers itself and every descendant such as `a.b.c`
//! - `a.b` does NOT cover its ancestor `a` or a sibling like `a.bc`
//!
//! [`PathSet`] is an insertion-ordered set of paths with idempotent insertion.

use core::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Path separator
pub const SEPARATOR: char = '.';

/// Field path made of non-empty segments
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct FieldPath {
    segments: Vec<String>,
}

impl FieldPath {
    /// Parse a dotted path, ignoring empty segments
    pub fn parse(s: &str) -> Self {
        Self {
            segments: s
                .split(SEPARATOR)
                .filter(|seg| !seg.is_empty())
                .map(str::to_owned)
                .collect(),
        }
    }

    /// Root path (no segments)
    pub fn root() -> Self {
        Self::default()
    }

    /// Path segments
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Number of segments
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Whether this is the root path
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Child path `self.segment`
    pub fn child(&self, segment: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.extend(Self::parse(segment).segments);
        Self { segments }
    }

    /// Whether `self` equals `other` or is one of its ancestors
    pub fn covers(&self, other: &FieldPath) -> bool {
        self.segments.len() <= other.segments.len()
            && self.segments.iter().zip(&other.segments).all(|(a, b)| a == b)
    }

    /// Remainder of `self` below `prefix`, if `prefix` covers it
    pub fn strip_prefix(&self, prefix: &FieldPath) -> Option<FieldPath> {
        prefix.covers(self).then(|| FieldPath {
            segments: self.segments[prefix.len()..].to_vec(),
        })
    }

    /// First segment, if any
    pub fn head(&self) -> Option<&str> {
        self.segments.first().map(String::as_str)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, seg) in self.segments.iter().enumerate() {
            if i > 0 {
                write!(f, "{}", SEPARATOR)?;
            }
            f.write_str(seg)?;
        }
        Ok(())
    }
}

impl fmt::Debug for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "`{}`", self)
    }
}

impl From<&str> for FieldPath {
    fn from(s: &str) -> Self {
        Self::parse(s)
    }
}

impl From<String> for FieldPath {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl From<&FieldPath> for FieldPath {
    fn from(p: &FieldPath) -> Self {
        p.clone()
    }
}

impl FromStr for FieldPath {
    type Err = core::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl Serialize for FieldPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for FieldPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::parse(&s))
    }
}

/// Whether any path in `set` covers `path`
pub fn has_any_field<'a>(set: impl IntoIterator<Item = &'a FieldPath>, path: &FieldPath) -> bool {
    set.into_iter().any(|p| p.covers(path))
}

/// Insertion-ordered set of field paths
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PathSet {
    paths: Vec<FieldPath>,
}

impl PathSet {
    /// Empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Set from string literals, keeping duplicates out
    pub fn from_strs(paths: &[&str]) -> Self {
        let mut set = Self::new();
        for p in paths {
            set.insert(FieldPath::parse(p));
        }
        set
    }

    /// Insert `path` unless an identical path is present
    pub fn insert(&mut self, path: FieldPath) -> bool {
        if self.paths.contains(&path) {
            return false;
        }
        self.paths.push(path);
        true
    }

    /// Insert every path not already covered by a member
    pub fn add_fields<I, P>(&mut self, paths: I)
    where
        I: IntoIterator<Item = P>,
        P: Into<FieldPath>,
    {
        for p in paths {
            let p = p.into();
            if !self.has_field(&p) {
                self.paths.push(p);
            }
        }
    }

    /// Whether a member covers `path`
    pub fn has_field(&self, path: &FieldPath) -> bool {
        has_any_field(&self.paths, path)
    }

    /// Whether a member covers any of `paths`
    pub fn has_any<'a>(&self, paths: impl IntoIterator<Item = &'a FieldPath>) -> bool {
        paths.into_iter().any(|p| self.has_field(p))
    }

    /// Whether a member equals `path` exactly
    pub fn contains(&self, path: &FieldPath) -> bool {
        self.paths.contains(path)
    }

    /// Whether any member lies under `prefix` (or is `prefix` itself)
    pub fn touches(&self, prefix: &FieldPath) -> bool {
        self.paths.iter().any(|p| prefix.covers(p) || p.covers(prefix))
    }

    /// Union of both sets, preserving `self`'s order first
    pub fn union(&self, other: &PathSet) -> PathSet {
        let mut out = self.clone();
        for p in &other.paths {
            out.insert(p.clone());
        }
        out
    }

    /// Iterate over members
    pub fn iter(&self) -> impl Iterator<Item = &FieldPath> {
        self.paths.iter()
    }

    /// Number of members
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

impl<P: Into<FieldPath>> FromIterator<P> for PathSet {
    fn from_iter<I: IntoIterator<Item = P>>(iter: I) -> Self {
        let mut set = Self::new();
        for p in iter {
            set.insert(p.into());
        }
        set
    }
}

impl<'a> IntoIterator for &'a PathSet {
    type Item = &'a FieldPath;
    type IntoIter = core::slice::Iter<'a, FieldPath>;

    fn into_iter(self) -> Self::IntoIter {
        self.paths.iter()
    }
}

impl IntoIterator for PathSet {
    type Item = FieldPath;
    type IntoIter = std::vec::IntoIter<FieldPath>;

    fn into_iter(self) -> Self::IntoIter {
        self.paths.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_covers_descendants_only() {
        let ab = FieldPath::from("a.b");
        assert!(ab.covers(&"a.b".into()));
        assert!(ab.covers(&"a.b.c".into()));
        assert!(!ab.covers(&"a".into()));
        assert!(!ab.covers(&"a.bc".into()));
    }

    #[test]
    fn test_add_fields_skips_covered() {
        let mut set = PathSet::new();
        set.add_fields(["session"]);
        set.add_fields(["session.dev_addr", "mac_state"]);
        assert_eq!(set.len(), 2);
        assert!(set.has_field(&"session.keys.f_nwk_s_int_key.key".into()));
        assert!(!set.has_field(&"pending_session".into()));
    }

    #[test]
    fn test_display_round_trip() {
        let p = FieldPath::from("mac_state.current_parameters.channels");
        assert_eq!(p.to_string(), "mac_state.current_parameters.channels");
        assert_eq!(p.child("x.y").len(), 5);
        assert_eq!(
            p.strip_prefix(&"mac_state".into()),
            Some(FieldPath::from("current_parameters.channels"))
        );
    }
}
