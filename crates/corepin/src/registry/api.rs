//! Registry API types
//!
//! Response shapes for the npm registry and helpers for the generic
//! URL+JSON registries.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Accept header for the abbreviated npm metadata document
pub const NPM_ABBREVIATED_ACCEPT: &str =
    "application/vnd.npm.install-v1+json; q=1.0, application/json; q=0.8, */*";

/// Abbreviated package document
///
/// Response from GET {registry}/{name}
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Packument {
    /// Package name
    pub name: String,

    /// Tag → version (`latest`, `next`, ...)
    #[serde(rename = "dist-tags", default)]
    pub dist_tags: HashMap<String, String>,

    /// Published versions keyed by version string
    #[serde(default)]
    pub versions: HashMap<String, serde_json::Value>,
}

impl Packument {
    /// Published version strings
    pub fn version_list(&self) -> Vec<String> {
        self.versions.keys().cloned().collect()
    }
}

/// Follow a dotted path (`latest`, `data.tags`) into a JSON document
pub fn json_path<'a>(value: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
    if path.is_empty() {
        return Some(value);
    }
    path.split('.').try_fold(value, |node, key| node.get(key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_packument() {
        let json = r#"{
            "name": "yarn",
            "dist-tags": { "latest": "1.22.22" },
            "versions": {
                "1.22.4": { "dist": { "shasum": "abc" } },
                "1.22.22": {}
            }
        }"#;

        let doc: Packument = serde_json::from_str(json).unwrap();
        assert_eq!(doc.name, "yarn");
        assert_eq!(doc.dist_tags.get("latest"), Some(&"1.22.22".to_string()));
        let mut versions = doc.version_list();
        versions.sort();
        assert_eq!(versions, vec!["1.22.22", "1.22.4"]);
    }

    #[test]
    fn test_json_path() {
        let doc = serde_json::json!({ "latest": { "stable": "4.1.0" }, "tags": ["4.1.0"] });
        assert_eq!(
            json_path(&doc, "latest.stable").and_then(|v| v.as_str()),
            Some("4.1.0")
        );
        assert!(json_path(&doc, "tags").unwrap().is_array());
        assert!(json_path(&doc, "missing.key").is_none());
    }
}
