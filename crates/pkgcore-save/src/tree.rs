//! `DataNode`: a small schema-free, dynamically-typed tree (spec §4.6),
//! used for the save checkpoint and the pending delta alike. Encoded to
//! bytes via [`pkgcore_bytestream::ByteStream`] rather than JSON-on-wire,
//! so the save blob stays a single flat binary region the container can
//! checksum and encrypt as one unit; `serde` is derived only so callers can
//! build or inspect trees from JSON fixtures in tests.

use std::collections::BTreeMap;

use pkgcore_bytestream::ByteStream;
use serde::{Deserialize, Serialize};

use crate::error::{SaveError, SaveResult};

/// One node of a save tree. `Table` uses a `BTreeMap` (not a `HashMap`) so
/// encoding is deterministic and two trees with the same contents always
/// produce byte-identical output, which delta computation depends on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub enum DataNode {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Array(Vec<DataNode>),
    Table(BTreeMap<String, DataNode>),
}

const TAG_NULL: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_INT: u8 = 2;
const TAG_FLOAT: u8 = 3;
const TAG_STR: u8 = 4;
const TAG_BYTES: u8 = 5;
const TAG_ARRAY: u8 = 6;
const TAG_TABLE: u8 = 7;

impl DataNode {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn encode(&self, stream: &mut ByteStream) {
        match self {
            Self::Null => stream.write::<u8>(TAG_NULL),
            Self::Bool(value) => {
                stream.write::<u8>(TAG_BOOL);
                stream.write::<u8>(u8::from(*value));
            }
            Self::Int(value) => {
                stream.write::<u8>(TAG_INT);
                stream.write::<i64>(*value);
            }
            Self::Float(value) => {
                stream.write::<u8>(TAG_FLOAT);
                stream.write::<f64>(*value);
            }
            Self::Str(value) => {
                stream.write::<u8>(TAG_STR);
                write_bytes(stream, value.as_bytes());
            }
            Self::Bytes(value) => {
                stream.write::<u8>(TAG_BYTES);
                write_bytes(stream, value);
            }
            Self::Array(items) => {
                stream.write::<u8>(TAG_ARRAY);
                stream.write::<u32>(items.len() as u32);
                for item in items {
                    item.encode(stream);
                }
            }
            Self::Table(entries) => {
                stream.write::<u8>(TAG_TABLE);
                stream.write::<u32>(entries.len() as u32);
                for (key, value) in entries {
                    write_bytes(stream, key.as_bytes());
                    value.encode(stream);
                }
            }
        }
    }

    pub fn decode(stream: &mut ByteStream) -> SaveResult<Self> {
        let tag = stream.read::<u8>()?;
        let node = match tag {
            TAG_NULL => Self::Null,
            TAG_BOOL => Self::Bool(stream.read::<u8>()? != 0),
            TAG_INT => Self::Int(stream.read::<i64>()?),
            TAG_FLOAT => Self::Float(stream.read::<f64>()?),
            TAG_STR => Self::Str(String::from_utf8(read_bytes(stream)?).map_err(|_| SaveError::Deserialization)?),
            TAG_BYTES => Self::Bytes(read_bytes(stream)?),
            TAG_ARRAY => {
                let count = stream.read::<u32>()?;
                let mut items = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    items.push(Self::decode(stream)?);
                }
                Self::Array(items)
            }
            TAG_TABLE => {
                let count = stream.read::<u32>()?;
                let mut entries = BTreeMap::new();
                for _ in 0..count {
                    let key = String::from_utf8(read_bytes(stream)?).map_err(|_| SaveError::Deserialization)?;
                    entries.insert(key, Self::decode(stream)?);
                }
                Self::Table(entries)
            }
            other => return Err(SaveError::UnknownDataNodeTag(other)),
        };
        Ok(node)
    }
}

fn write_bytes(stream: &mut ByteStream, bytes: &[u8]) {
    stream.write::<u32>(bytes.len() as u32);
    stream.write_bytes(bytes);
}

fn read_bytes(stream: &mut ByteStream) -> SaveResult<Vec<u8>> {
    let len = stream.read::<u32>()? as usize;
    Ok(stream.read_bytes(len)?.to_vec())
}

/// Compute the minimal additive delta from `base` to `target`: for each
/// table key present in `target` but absent or different in `base`,
/// include it; keys removed from `target` are recorded as `Null` so the
/// server can apply the removal (spec §4.7: "compute a minimal `delta`
/// against the last known server checkpoint").
pub fn diff(base: Option<&DataNode>, target: &DataNode) -> DataNode {
    match (base, target) {
        (Some(base), target) if base == target => DataNode::Null,
        (Some(DataNode::Table(base_entries)), DataNode::Table(target_entries)) => {
            let mut delta = BTreeMap::new();
            for (key, target_value) in target_entries {
                let base_value = base_entries.get(key);
                let changed = diff(base_value, target_value);
                if !(base_value.is_none() && changed.is_null()) && base_value != Some(target_value) {
                    delta.insert(key.clone(), changed);
                }
            }
            for key in base_entries.keys() {
                if !target_entries.contains_key(key) {
                    delta.insert(key.clone(), DataNode::Null);
                }
            }
            DataNode::Table(delta)
        }
        (_, target) => target.clone(),
    }
}

/// Apply a delta produced by [`diff`] on top of `base`, recursively.
pub fn apply_delta(base: &DataNode, delta: &DataNode) -> DataNode {
    match (base, delta) {
        (DataNode::Table(base_entries), DataNode::Table(delta_entries)) => {
            let mut merged = base_entries.clone();
            for (key, delta_value) in delta_entries {
                match delta_value {
                    DataNode::Null => {
                        merged.remove(key);
                    }
                    DataNode::Table(_) if matches!(merged.get(key), Some(DataNode::Table(_))) => {
                        let existing = merged.get(key).expect("checked Some above");
                        merged.insert(key.clone(), apply_delta(existing, delta_value));
                    }
                    other => {
                        merged.insert(key.clone(), other.clone());
                    }
                }
            }
            DataNode::Table(merged)
        }
        (_, delta) => delta.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(pairs: &[(&str, DataNode)]) -> DataNode {
        DataNode::Table(pairs.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect())
    }

    #[test]
    fn encode_then_decode_round_trips_nested_tree() {
        let tree = table(&[
            ("level", DataNode::Int(42)),
            ("name", DataNode::Str("hero".to_string())),
            ("active", DataNode::Bool(true)),
            ("inventory", DataNode::Array(vec![DataNode::Int(1), DataNode::Int(2)])),
            ("position", table(&[("x", DataNode::Float(1.5)), ("y", DataNode::Float(-2.0))])),
        ]);

        let mut stream = ByteStream::new();
        tree.encode(&mut stream);
        stream.seek(0).unwrap();
        let decoded = DataNode::decode(&mut stream).unwrap();

        assert_eq!(tree, decoded);
    }

    #[test]
    fn diff_only_includes_changed_keys() {
        let base = table(&[("level", DataNode::Int(1)), ("gold", DataNode::Int(100))]);
        let updated = table(&[("level", DataNode::Int(2)), ("gold", DataNode::Int(100))]);

        let delta = diff(Some(&base), &updated);
        assert_eq!(delta, table(&[("level", DataNode::Int(2))]));
    }

    #[test]
    fn diff_records_removed_keys_as_null() {
        let base = table(&[("level", DataNode::Int(1)), ("temp_buff", DataNode::Int(5))]);
        let updated = table(&[("level", DataNode::Int(1))]);

        let delta = diff(Some(&base), &updated);
        assert_eq!(delta, table(&[("temp_buff", DataNode::Null)]));
    }

    #[test]
    fn apply_delta_reconstructs_target() {
        let base = table(&[("level", DataNode::Int(1)), ("gold", DataNode::Int(100))]);
        let updated = table(&[("level", DataNode::Int(2)), ("gold", DataNode::Int(100))]);

        let delta = diff(Some(&base), &updated);
        assert_eq!(apply_delta(&base, &delta), updated);
    }

    #[test]
    fn no_base_diff_is_full_target() {
        let target = table(&[("level", DataNode::Int(1))]);
        assert_eq!(diff(None, &target), target);
    }
}
