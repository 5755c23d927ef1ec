//! Manifest documents and the pairs they carry.
//!
//! A manifest is a flat JSON object. Two of its keys hold ordered lists of
//! primary and secondary object references; every other key is passthrough
//! configuration that must reach the filtered output untouched.

use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::ObjectRef;

pub const DEFAULT_PRIMARY_KEY: &str = "SplicingAnalysis.bam_files";
pub const DEFAULT_SECONDARY_KEY: &str = "SplicingAnalysis.bai_files";

/// Key of the provenance block written into filtered manifests.
pub const VALIDATION_METADATA_KEY: &str = "_validation_metadata";

/// Document keys holding the primary and secondary reference lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestKeys {
    pub primary: String,
    pub secondary: String,
}

impl Default for ManifestKeys {
    fn default() -> Self {
        Self {
            primary: DEFAULT_PRIMARY_KEY.to_string(),
            secondary: DEFAULT_SECONDARY_KEY.to_string(),
        }
    }
}

/// How to handle manifests whose primary and secondary lists differ in length.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PairingMode {
    /// Reject the manifest outright.
    #[default]
    Strict,
    /// Pair the first `min(len)` entries and drop the rest.
    Truncate,
}

/// One primary/secondary pair at its position in the input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pair {
    pub index: usize,
    pub primary: ObjectRef,
    pub secondary: ObjectRef,
    pub sample_id: String,
}

impl Pair {
    pub fn new(index: usize, primary: ObjectRef, secondary: ObjectRef) -> Self {
        let sample_id = primary.sample_id().to_string();
        Self {
            index,
            primary,
            secondary,
            sample_id,
        }
    }
}

/// Raw manifest as read from disk, before pairing.
#[derive(Debug, Clone)]
pub struct ManifestDocument {
    pub name: String,
    pub primary: Vec<ObjectRef>,
    pub secondary: Vec<ObjectRef>,
    /// The whole input object minus any prior provenance block.
    pub passthrough: Map<String, Value>,
    pub keys: ManifestKeys,
}

/// Count mismatch between the two reference lists under [`PairingMode::Strict`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingMismatch {
    pub primary: usize,
    pub secondary: usize,
}

impl fmt::Display for PairingMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "primary/secondary count mismatch: {} primary vs {} secondary",
            self.primary, self.secondary
        )
    }
}

impl std::error::Error for PairingMismatch {}

impl ManifestDocument {
    /// Split a parsed JSON document into reference lists and passthrough.
    ///
    /// Missing list keys are read as empty lists. Any non-string entry is an
    /// error naming the offending key and position.
    pub fn from_value(name: impl Into<String>, value: Value, keys: ManifestKeys) -> Result<Self> {
        let Value::Object(mut passthrough) = value else {
            bail!("manifest is not a JSON object");
        };
        passthrough.shift_remove(VALIDATION_METADATA_KEY);
        let primary = read_ref_list(&passthrough, &keys.primary)?;
        let secondary = read_ref_list(&passthrough, &keys.secondary)?;
        Ok(Self {
            name: name.into(),
            primary,
            secondary,
            passthrough,
            keys,
        })
    }

    /// Pair the two lists by position.
    pub fn into_manifest(self, mode: PairingMode) -> Result<Manifest, PairingMismatch> {
        let (np, ns) = (self.primary.len(), self.secondary.len());
        if np != ns && mode == PairingMode::Strict {
            return Err(PairingMismatch {
                primary: np,
                secondary: ns,
            });
        }
        let pairs = self
            .primary
            .into_iter()
            .zip(self.secondary)
            .enumerate()
            .map(|(i, (p, s))| Pair::new(i, p, s))
            .collect();
        Ok(Manifest {
            name: self.name,
            pairs,
            passthrough: self.passthrough,
            keys: self.keys,
        })
    }
}

fn read_ref_list(doc: &Map<String, Value>, key: &str) -> Result<Vec<ObjectRef>> {
    let Some(value) = doc.get(key) else {
        return Ok(Vec::new());
    };
    let Value::Array(items) = value else {
        bail!("'{}' is not a list", key);
    };
    items
        .iter()
        .enumerate()
        .map(|(i, v)| {
            v.as_str()
                .map(ObjectRef::from)
                .ok_or_else(|| anyhow!("'{}'[{}] is not a string", key, i))
        })
        .collect()
}

/// A paired manifest ready for validation.
#[derive(Debug, Clone)]
pub struct Manifest {
    pub name: String,
    pub pairs: Vec<Pair>,
    pub passthrough: Map<String, Value>,
    pub keys: ManifestKeys,
}

impl Manifest {
    /// Every object the manifest references, primaries first, in pair order.
    pub fn object_refs(&self) -> Vec<ObjectRef> {
        let mut refs: Vec<ObjectRef> = self.pairs.iter().map(|p| p.primary.clone()).collect();
        refs.extend(self.pairs.iter().map(|p| p.secondary.clone()));
        refs
    }

    /// First remote-style reference, used to infer an index prefix.
    pub fn first_remote_ref(&self) -> Option<&ObjectRef> {
        self.pairs
            .iter()
            .flat_map(|p| [&p.primary, &p.secondary])
            .find(|r| r.is_remote())
    }

    /// Passthrough document with the reference lists replaced by `pairs`.
    pub fn document_with_pairs<'a>(&self, pairs: impl IntoIterator<Item = &'a Pair>) -> Map<String, Value> {
        let (primary, secondary): (Vec<Value>, Vec<Value>) = pairs
            .into_iter()
            .map(|p| {
                (
                    Value::String(p.primary.to_string()),
                    Value::String(p.secondary.to_string()),
                )
            })
            .unzip();
        let mut doc = self.passthrough.clone();
        doc.insert(self.keys.primary.clone(), Value::Array(primary));
        doc.insert(self.keys.secondary.clone(), Value::Array(secondary));
        doc
    }
}
