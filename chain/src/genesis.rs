//! Mutable genesis documents and chain specs.
//!
//! A [Document] wraps a JSON tree and exposes a path-based setter that creates
//! intermediate objects and arrays on demand. The same setter is used on
//! tendermint's `config.toml` after converting it with [Document::from_toml].

use crate::Error;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::{fmt, path::Path};
use thiserror::Error as ThisError;

/// One step of a path into a [Document].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Segment {
    Key(String),
    Index(usize),
}

impl From<&str> for Segment {
    fn from(key: &str) -> Self {
        Segment::Key(key.to_string())
    }
}

impl From<String> for Segment {
    fn from(key: String) -> Self {
        Segment::Key(key)
    }
}

impl From<usize> for Segment {
    fn from(index: usize) -> Self {
        Segment::Index(index)
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Key(key) => f.write_str(key),
            Segment::Index(index) => write!(f, "{index}"),
        }
    }
}

/// Build a path from keys and indices.
///
/// ```rust
/// use ibctest_chain::{path, genesis::Segment};
///
/// let path = path!["paras", "paras", 0usize];
/// assert_eq!(path[2], Segment::Index(0));
/// ```
#[macro_export]
macro_rules! path {
    ($($segment:expr),* $(,)?) => {
        vec![$($crate::genesis::Segment::from($segment)),*]
    };
}

/// Path of only object keys.
pub fn keys<const N: usize>(keys: [&str; N]) -> Vec<Segment> {
    keys.iter().map(|k| Segment::from(*k)).collect()
}

/// Parse a dotted path. Segments made only of digits address array elements.
pub fn parse_path(dotted: &str) -> Vec<Segment> {
    dotted
        .split('.')
        .filter(|s| !s.is_empty())
        .map(|s| match s.parse::<usize>() {
            Ok(index) => Segment::Index(index),
            Err(_) => Segment::Key(s.to_string()),
        })
        .collect()
}

fn render(path: &[Segment]) -> String {
    path.iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join(".")
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Errors that can occur when addressing a [Document].
#[derive(ThisError, Debug, PartialEq, Eq)]
pub enum PathError {
    #[error("empty path")]
    Empty,
    #[error("type conflict at {at}: expected {expected}, found {found}")]
    TypeConflict {
        at: String,
        expected: &'static str,
        found: &'static str,
    },
}

/// A genesis document or chain spec.
#[derive(Clone, Debug, PartialEq)]
pub struct Document {
    root: Value,
}

impl Document {
    pub fn new(root: Value) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Value {
        &self.root
    }

    pub fn into_value(self) -> Value {
        self.root
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, Error> {
        Ok(Self::new(serde_json::from_slice(bytes)?))
    }

    pub fn read(path: &Path) -> Result<Self, Error> {
        Self::parse(&std::fs::read(path)?)
    }

    /// Serialize as indented JSON.
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        Ok(serde_json::to_vec_pretty(&self.root)?)
    }

    pub fn write(&self, path: &Path) -> Result<(), Error> {
        std::fs::write(path, self.to_bytes()?)?;
        Ok(())
    }

    pub fn from_toml(raw: &str) -> Result<Self, Error> {
        let root: Value = toml::from_str(raw).map_err(|e| Error::Toml(e.to_string()))?;
        Ok(Self::new(root))
    }

    pub fn to_toml(&self) -> Result<String, Error> {
        toml::to_string(&self.root).map_err(|e| Error::Toml(e.to_string()))
    }

    /// Set `value` at `path`, creating missing objects and arrays along the way.
    ///
    /// Arrays are extended with `null` up to the addressed index. Existing
    /// scalars (or containers of the wrong kind) along the path are never
    /// replaced.
    pub fn set(&mut self, path: &[Segment], value: impl Into<Value>) -> Result<(), PathError> {
        let Some((last, parents)) = path.split_last() else {
            return Err(PathError::Empty);
        };
        let mut current = &mut self.root;
        for (depth, segment) in parents.iter().enumerate() {
            current = child(current, segment, &path[..=depth])?;
        }
        *child(current, last, path)? = value.into();
        Ok(())
    }

    /// Value at `path`, if present.
    pub fn get(&self, path: &[Segment]) -> Option<&Value> {
        path.iter().try_fold(&self.root, |current, segment| match segment {
            Segment::Key(key) => current.as_object()?.get(key),
            Segment::Index(index) => current.as_array()?.get(*index),
        })
    }

    /// Value at `path`, failing if absent or null.
    pub fn require(&self, path: &[Segment]) -> Result<&Value, Error> {
        match self.get(path) {
            Some(value) if !value.is_null() => Ok(value),
            _ => Err(Error::MissingField(render(path))),
        }
    }

    /// Hex-encoded sha256 of the serialized document.
    pub fn sha256(&self) -> Result<String, Error> {
        Ok(hex::encode(Sha256::digest(self.to_bytes()?)))
    }
}

/// Descend into (and if needed create) the child of `current` addressed by `segment`.
fn child<'a>(
    current: &'a mut Value,
    segment: &Segment,
    at: &[Segment],
) -> Result<&'a mut Value, PathError> {
    if current.is_null() {
        *current = match segment {
            Segment::Key(_) => Value::Object(Map::new()),
            Segment::Index(_) => Value::Array(Vec::new()),
        };
    }
    let found = kind(current);
    match (segment, current) {
        (Segment::Key(key), Value::Object(map)) => Ok(map.entry(key.clone()).or_insert(Value::Null)),
        (Segment::Index(index), Value::Array(items)) => {
            if items.len() <= *index {
                items.resize(*index + 1, Value::Null);
            }
            Ok(&mut items[*index])
        }
        (Segment::Key(_), _) => Err(PathError::TypeConflict {
            at: render(at),
            expected: "object",
            found,
        }),
        (Segment::Index(_), _) => Err(PathError::TypeConflict {
            at: render(at),
            expected: "array",
            found,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_creates_intermediates() {
        let mut doc = Document::new(json!({}));
        doc.set(
            &keys(["genesis", "runtime", "runtime_genesis_config", "sudo", "key"]),
            "5Grw",
        )
        .unwrap();
        assert_eq!(
            doc.root(),
            &json!({"genesis": {"runtime": {"runtime_genesis_config": {"sudo": {"key": "5Grw"}}}}})
        );
    }

    #[test]
    fn test_set_extends_arrays() {
        let mut doc = Document::new(Value::Null);
        doc.set(&path!["items", 2usize, "name"], "c").unwrap();
        assert_eq!(doc.root(), &json!({"items": [null, null, {"name": "c"}]}));
        doc.set(&path!["items", 0usize], 1).unwrap();
        assert_eq!(doc.get(&path!["items", 0usize]), Some(&json!(1)));
    }

    #[test]
    fn test_set_replaces_leaf() {
        let mut doc = Document::new(json!({"a": {"b": [1, 2]}}));
        doc.set(&keys(["a", "b"]), json!("flat")).unwrap();
        assert_eq!(doc.root(), &json!({"a": {"b": "flat"}}));
    }

    #[test]
    fn test_set_type_conflict() {
        let mut doc = Document::new(json!({"a": "scalar", "list": []}));
        assert_eq!(
            doc.set(&keys(["a", "b"]), 1),
            Err(PathError::TypeConflict {
                at: "a.b".to_string(),
                expected: "object",
                found: "string",
            })
        );
        assert_eq!(
            doc.set(&keys(["list", "x"]), 1),
            Err(PathError::TypeConflict {
                at: "list.x".to_string(),
                expected: "object",
                found: "array",
            })
        );
        assert_eq!(doc.set(&[], 1), Err(PathError::Empty));

        // The document is untouched by failed writes
        assert_eq!(doc.root(), &json!({"a": "scalar", "list": []}));
    }

    #[test]
    fn test_require() {
        let doc = Document::new(json!({"a": {"b": null, "c": 0}}));
        assert!(doc.require(&keys(["a", "c"])).is_ok());
        assert!(matches!(
            doc.require(&keys(["a", "b"])),
            Err(Error::MissingField(field)) if field == "a.b"
        ));
        assert!(doc.require(&keys(["a", "d"])).is_err());
    }

    #[test]
    fn test_parse_path() {
        assert_eq!(
            parse_path("app_state.bank.balances.0.address"),
            path!["app_state", "bank", "balances", 0usize, "address"]
        );
        assert!(parse_path("").is_empty());
    }

    #[test]
    fn test_toml_round_trip() {
        let raw = "[p2p]\npersistent_peers = \"\"\n\n[rpc]\nladdr = \"tcp://127.0.0.1:26657\"\n";
        let mut doc = Document::from_toml(raw).unwrap();
        doc.set(&keys(["p2p", "persistent_peers"]), "a@b:26656").unwrap();
        let rendered = doc.to_toml().unwrap();
        let reparsed = Document::from_toml(&rendered).unwrap();
        assert_eq!(
            reparsed.get(&keys(["p2p", "persistent_peers"])),
            Some(&json!("a@b:26656"))
        );
        assert_eq!(
            reparsed.get(&keys(["rpc", "laddr"])),
            Some(&json!("tcp://127.0.0.1:26657"))
        );
    }

    #[test]
    fn test_sha256_stable() {
        let a = Document::new(json!({"chain_id": "gaia-1"}));
        let b = Document::parse(&a.to_bytes().unwrap()).unwrap();
        assert_eq!(a.sha256().unwrap(), b.sha256().unwrap());
        assert_eq!(a.sha256().unwrap().len(), 64);
    }
}
