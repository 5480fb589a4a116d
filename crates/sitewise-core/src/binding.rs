//! Runtime parameter assignments.
//!
//! A `BindingMap` assigns a `Binding` to each choice id of a plan. The same
//! compiled plan is re-executed with different maps. Maps are compared and
//! hashed structurally; the hash is the key of the static cache.
//!
//! Wire/document form: `{"<choice id>": {"type": "Int", "value": 3}, ...}`.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::hash::Fnv64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Binding {
    /// Position of the chosen alternative of an `AnyExpr`/`AnyPlan`.
    Index(i64),
    Int(i64),
    Float(f64),
    Bool(bool),
    String(String),
    /// One sub-map per repetition of a `MultiExpr` template.
    Multi(Vec<BindingMap>),
}

impl Binding {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Binding::Index(_) => "Index",
            Binding::Int(_) => "Int",
            Binding::Float(_) => "Float",
            Binding::Bool(_) => "Bool",
            Binding::String(_) => "String",
            Binding::Multi(_) => "Multi",
        }
    }

    pub fn get_index(&self) -> Result<i64> {
        match self {
            Binding::Index(v) => Ok(*v),
            other => Err(other.wrong_kind("get_index")),
        }
    }

    pub fn get_int(&self) -> Result<i64> {
        match self {
            Binding::Int(v) => Ok(*v),
            other => Err(other.wrong_kind("get_int")),
        }
    }

    pub fn get_float(&self) -> Result<f64> {
        match self {
            Binding::Float(v) => Ok(*v),
            other => Err(other.wrong_kind("get_float")),
        }
    }

    pub fn get_bool(&self) -> Result<bool> {
        match self {
            Binding::Bool(v) => Ok(*v),
            other => Err(other.wrong_kind("get_bool")),
        }
    }

    pub fn get_string(&self) -> Result<&str> {
        match self {
            Binding::String(v) => Ok(v.as_str()),
            other => Err(other.wrong_kind("get_string")),
        }
    }

    pub fn sub_bindings(&self) -> Result<&[BindingMap]> {
        match self {
            Binding::Multi(v) => Ok(v.as_slice()),
            other => Err(other.wrong_kind("sub_bindings")),
        }
    }

    fn wrong_kind(&self, accessor: &str) -> Error {
        Error::Binding(format!("{accessor} on a {} binding", self.kind_name()))
    }

    fn hash_into(&self, h: &mut Fnv64) {
        h.write_part(self.kind_name().as_bytes());
        match self {
            Binding::Index(v) | Binding::Int(v) => h.write(&v.to_le_bytes()),
            Binding::Float(v) => h.write(&canonical_bits(*v).to_le_bytes()),
            Binding::Bool(v) => h.write(&[*v as u8]),
            Binding::String(s) => h.write_part(s.as_bytes()),
            Binding::Multi(maps) => {
                h.write_u64(maps.len() as u64);
                for m in maps {
                    h.write_u64(m.structural_hash());
                }
            }
        }
    }
}

/// Bits of `v` with `-0.0` folded into `0.0` and every NaN into one, so
/// values that compare equal hash equal.
fn canonical_bits(v: f64) -> u64 {
    if v == 0.0 {
        0.0f64.to_bits()
    } else if v.is_nan() {
        f64::NAN.to_bits()
    } else {
        v.to_bits()
    }
}

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Binding::Index(v) => write!(f, "Index: {v}"),
            Binding::Int(v) => write!(f, "Int: {v}"),
            Binding::Float(v) => write!(f, "Float: {v}"),
            Binding::Bool(v) => write!(f, "Bool: {v}"),
            Binding::String(v) => write!(f, "String: {v}"),
            Binding::Multi(maps) => {
                write!(f, "Multi: [")?;
                for (i, m) in maps.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{m}")?;
                }
                write!(f, "]")
            }
        }
    }
}

/// Choice id -> binding. Keys are kept sorted, so iteration and hashing are
/// independent of insertion order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BindingMap(BTreeMap<String, Binding>);

impl BindingMap {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Look up a choice id; a missing id is a binding error.
    pub fn get(&self, id: &str) -> Result<&Binding> {
        self.0
            .get(id)
            .ok_or_else(|| Error::Binding(format!("no binding for choice '{id}'")))
    }

    pub fn try_get(&self, id: &str) -> Option<&Binding> {
        self.0.get(id)
    }

    pub fn insert(&mut self, id: impl Into<String>, binding: Binding) -> Option<Binding> {
        self.0.insert(id.into(), binding)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.0.contains_key(id)
    }

    /// Copy the binding for `id` from `full` into `self`.
    pub fn copy_from(&mut self, full: &BindingMap, id: &str) -> Result<()> {
        let b = full.get(id)?.clone();
        self.0.insert(id.to_string(), b);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Binding)> {
        self.0.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    /// Structural hash: sorted keys, each key followed by its value.
    pub fn structural_hash(&self) -> u64 {
        let mut h = Fnv64::new();
        h.write_u64(self.0.len() as u64);
        for (k, v) in &self.0 {
            h.write_part(k.as_bytes());
            v.hash_into(&mut h);
        }
        h.finish()
    }
}

impl fmt::Display for BindingMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (k, v)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{k} -> {v}")?;
        }
        write!(f, "}}")
    }
}

impl FromIterator<(String, Binding)> for BindingMap {
    fn from_iter<T: IntoIterator<Item = (String, Binding)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<const N: usize> From<[(&str, Binding); N]> for BindingMap {
    fn from(pairs: [(&str, Binding); N]) -> Self {
        pairs
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accessors_check_kind() {
        let b = Binding::String("x".into());
        assert_eq!(b.get_string().unwrap(), "x");
        assert!(matches!(b.get_int(), Err(Error::Binding(_))));
        assert!(Binding::Index(2).get_int().is_err());
        assert_eq!(Binding::Index(2).get_index().unwrap(), 2);
    }

    #[test]
    fn json_document_round_trip() {
        let text = r#"{
            "c1": {"type": "Index", "value": 1},
            "v":  {"type": "Float", "value": 2.5},
            "m":  {"type": "Multi", "value": [{"k": {"type": "String", "value": "a"}}]}
        }"#;
        let map = BindingMap::from_json(text).unwrap();
        assert_eq!(map.get("c1").unwrap(), &Binding::Index(1));
        assert_eq!(map.get("v").unwrap().get_float().unwrap(), 2.5);
        let subs = map.get("m").unwrap().sub_bindings().unwrap();
        assert_eq!(subs[0].get("k").unwrap().get_string().unwrap(), "a");

        let again = BindingMap::from_json(&map.to_json().unwrap()).unwrap();
        assert_eq!(again, map);
    }

    #[test]
    fn hash_ignores_insertion_order() {
        let mut a = BindingMap::new();
        a.insert("x", Binding::Int(1));
        a.insert("y", Binding::String("s".into()));
        let mut b = BindingMap::new();
        b.insert("y", Binding::String("s".into()));
        b.insert("x", Binding::Int(1));
        assert_eq!(a.structural_hash(), b.structural_hash());

        b.insert("x", Binding::Int(2));
        assert_ne!(a.structural_hash(), b.structural_hash());
    }

    #[test]
    fn kind_participates_in_hash() {
        let a = BindingMap::from([("x", Binding::Int(1))]);
        let b = BindingMap::from([("x", Binding::Index(1))]);
        assert_ne!(a.structural_hash(), b.structural_hash());
    }

    #[test]
    fn missing_id_is_binding_error() {
        let m = BindingMap::new();
        assert!(matches!(m.get("nope"), Err(Error::Binding(_))));
    }
}
