//! Bundle manifest schema (§3 "Bundle manifest", §6).

use serde::{Deserialize, Serialize};

/// Manifest schema major version this codec understands.
///
/// Readers reject archives whose `manifestVersion` major differs; unknown
/// minors are tolerated (§6).
pub const MANIFEST_VERSION: u32 = 1;

/// Tonk bundle format version, independent of `manifestVersion`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatVersion {
    /// Incremented for breaking format changes.
    pub major: u32,
    /// Incremented for backward-compatible additions.
    pub minor: u32,
}

impl Default for FormatVersion {
    fn default() -> Self {
        Self { major: 1, minor: 0 }
    }
}

/// The `manifest.json` entry of a bundle archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// Schema major version. Archives with an unrecognized major are
    /// rejected by [`super::Bundle::from_bytes`].
    pub manifest_version: u32,
    /// Tonk format version.
    pub version: FormatVersion,
    /// `DocumentId` of the bundle's PathIndex document.
    pub root_id: String,
    /// Absolute paths designated as defaults for host UIs.
    #[serde(default)]
    pub entrypoints: Vec<String>,
    /// Preferred relay URIs, in preference order.
    #[serde(default)]
    pub network_uris: Vec<String>,
    /// Opaque extension slot for implementation-specific notes.
    #[serde(default)]
    pub x_notes: serde_json::Value,
    /// Opaque extension slot for vendor-specific metadata.
    #[serde(default)]
    pub x_vendor: serde_json::Value,
}

impl Manifest {
    /// Build a fresh manifest rooted at `root_id`.
    pub fn new(root_id: String) -> Self {
        Self {
            manifest_version: MANIFEST_VERSION,
            version: FormatVersion::default(),
            root_id,
            entrypoints: Vec::new(),
            network_uris: Vec::new(),
            x_notes: serde_json::Value::Null,
            x_vendor: serde_json::Value::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_serializes_with_camel_case_keys() {
        let manifest = Manifest::new("abc".to_string());
        let json = serde_json::to_value(&manifest).unwrap();
        assert_eq!(json["manifestVersion"], serde_json::json!(1));
        assert_eq!(json["rootId"], serde_json::json!("abc"));
        assert_eq!(json["networkUris"], serde_json::json!([]));
    }

    #[test]
    fn manifest_round_trips_through_json() {
        let manifest = Manifest::new("root-1".to_string());
        let text = serde_json::to_string(&manifest).unwrap();
        let restored: Manifest = serde_json::from_str(&text).unwrap();
        assert_eq!(manifest, restored);
    }
}
