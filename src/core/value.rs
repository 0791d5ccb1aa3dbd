//! Structurally comparable values for cached procedure calls.
//!
//! Bound arguments and results of cached procedures are drawn from a
//! closed tagged-variant domain so they can be compared structurally and
//! persisted in the memoization database. Anything outside this domain is
//! rejected when a procedure is registered, not at save time.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// A structurally comparable, serializable value.
///
/// Paths are distinct from strings: a path participates in source and
/// destination digest tracking, a plain string never does. Mappings use
/// `BTreeMap` so two maps with the same entries always compare and
/// serialize identically regardless of insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    /// Boolean scalar.
    Bool(bool),
    /// Integer scalar.
    Int(i64),
    /// Plain string.
    Str(String),
    /// Filesystem path.
    Path(PathBuf),
    /// Ordered sequence; order is significant.
    Seq(Vec<Value>),
    /// String-keyed mapping; key order is not significant.
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Collect every path contained in this value, depth first.
    ///
    /// Used to find the destinations carried by a procedure's result and
    /// the files named by a source- or destination-classified parameter.
    pub fn collect_paths(&self, out: &mut Vec<PathBuf>) {
        match self {
            Value::Path(p) => out.push(p.clone()),
            Value::Seq(items) => {
                for item in items {
                    item.collect_paths(out);
                }
            }
            Value::Map(entries) => {
                for item in entries.values() {
                    item.collect_paths(out);
                }
            }
            Value::Bool(_) | Value::Int(_) | Value::Str(_) => {}
        }
    }

    /// Convenience wrapper returning the collected paths.
    pub fn paths(&self) -> Vec<PathBuf> {
        let mut out = Vec::new();
        self.collect_paths(&mut out);
        out
    }

    /// Build a sequence-of-paths value.
    pub fn path_seq<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Value::Seq(paths.into_iter().map(|p| Value::Path(p.into())).collect())
    }

    /// Build a sequence-of-strings value.
    pub fn str_seq<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Value::Seq(items.into_iter().map(|s| Value::Str(s.into())).collect())
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<PathBuf> for Value {
    fn from(v: PathBuf) -> Self {
        Value::Path(v)
    }
}

impl From<&Path> for Value {
    fn from(v: &Path) -> Self {
        Value::Path(v.to_path_buf())
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Seq(v)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(v: BTreeMap<String, Value>) -> Self {
        Value::Map(v)
    }
}

/// Render a path as the string key used by the memoization database.
///
/// Database relations are keyed by strings; this is the single conversion
/// point so every component agrees on the representation.
pub fn path_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structural_equality() {
        let mut a = BTreeMap::new();
        a.insert("flags".to_string(), Value::str_seq(["-g", "-w"]));
        a.insert("src".to_string(), Value::Path("lib.ml".into()));

        let mut b = BTreeMap::new();
        b.insert("src".to_string(), Value::Path("lib.ml".into()));
        b.insert("flags".to_string(), Value::str_seq(["-g", "-w"]));

        assert_eq!(Value::Map(a), Value::Map(b));
    }

    #[test]
    fn test_collect_paths_depth_first() {
        let mut map = BTreeMap::new();
        map.insert("dst".to_string(), Value::Path("build/lib.cmo".into()));
        let value = Value::Seq(vec![
            Value::Path("lib.ml".into()),
            Value::Map(map),
            Value::Str("not-a-path".into()),
        ]);

        let paths = value.paths();
        assert_eq!(
            paths,
            vec![PathBuf::from("lib.ml"), PathBuf::from("build/lib.cmo")]
        );
    }

    #[test]
    fn test_path_is_not_string() {
        assert_ne!(Value::Path("a".into()), Value::Str("a".into()));
    }

    #[test]
    fn test_scalar_conversions() {
        assert_eq!(Value::from(true), Value::Bool(true));
        assert_eq!(Value::from(3i64), Value::Int(3));
        assert_eq!(Value::from("x"), Value::Str("x".into()));
        assert_eq!(
            Value::from(Path::new("a/b")),
            Value::Path(PathBuf::from("a/b"))
        );
    }
}
