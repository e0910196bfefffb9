use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identifier for one open document instance.
///
/// Minted once when the host first recognizes a document and retired when it
/// closes. Ids are never reused, even when the same file is reopened.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EditorId(String);

impl EditorId {
    /// Mint a fresh, globally unique id.
    pub fn generate() -> Self {
        Self(format!("editor-{}", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EditorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EditorId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for EditorId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// GeoJSON feature id: either a string or a number on the wire.
///
/// Selection and lookups compare ids by their display form, so `7` and `"7"`
/// address the same feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureId {
    Text(String),
    Number(serde_json::Number),
}

impl FeatureId {
    /// Canonical string key used for selection and matching.
    pub fn key(&self) -> String {
        match self {
            FeatureId::Text(s) => s.clone(),
            FeatureId::Number(n) => n.to_string(),
        }
    }
}

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureId::Text(s) => f.write_str(s),
            FeatureId::Number(n) => write!(f, "{}", n),
        }
    }
}

impl From<&str> for FeatureId {
    fn from(s: &str) -> Self {
        FeatureId::Text(s.to_string())
    }
}

impl From<String> for FeatureId {
    fn from(s: String) -> Self {
        FeatureId::Text(s)
    }
}

impl From<u64> for FeatureId {
    fn from(n: u64) -> Self {
        FeatureId::Number(n.into())
    }
}
