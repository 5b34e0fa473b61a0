//! Pod manifests.
//!
//! A manifest describes everything a node agent needs to launch a pod: the
//! pod id, the launchable artifacts to install, and shared runtime
//! configuration. The controller treats the contents as opaque; all it
//! relies on is the id and the content hash.
//!
//! Two manifests are equivalent iff their SHA-1 content hashes agree. The
//! hash is computed over the canonical serialized form (sorted keys, no
//! extra whitespace), so key order in the source never affects it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use thiserror::Error;

use herd_id::PodId;

/// Errors produced while encoding or decoding manifests.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// The manifest could not be serialized.
    #[error("could not serialize manifest '{pod_id}': {source}")]
    Serialize {
        pod_id: PodId,
        #[source]
        source: serde_json::Error,
    },

    /// The stored bytes do not parse as a manifest.
    #[error("could not decode stored manifest: {0}")]
    Decode(#[source] serde_json::Error),
}

/// One launchable artifact within a pod.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchableStanza {
    /// How the artifact is launched (e.g. `hoist`).
    pub launchable_type: String,

    /// Identifier of the artifact within the pod.
    pub launchable_id: String,

    /// Where the artifact is fetched from.
    pub location: String,
}

/// A pod manifest.
///
/// Field maps are `BTreeMap`s so the serialized form is canonical and the
/// content hash is stable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    id: PodId,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    launchables: BTreeMap<String, LaunchableStanza>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    config: BTreeMap<String, serde_json::Value>,
}

impl Manifest {
    /// Creates an empty manifest for the given pod.
    #[must_use]
    pub fn new(id: PodId) -> Self {
        Self {
            id,
            launchables: BTreeMap::new(),
            config: BTreeMap::new(),
        }
    }

    /// Returns the pod id this manifest describes.
    #[must_use]
    pub fn id(&self) -> &PodId {
        &self.id
    }

    /// Adds a launchable stanza, replacing any previous stanza under the
    /// same key.
    #[must_use]
    pub fn with_launchable(mut self, key: impl Into<String>, stanza: LaunchableStanza) -> Self {
        self.launchables.insert(key.into(), stanza);
        self
    }

    /// Sets a runtime configuration value.
    #[must_use]
    pub fn with_config(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.config.insert(key.into(), value);
        self
    }

    /// Serializes the manifest to its canonical byte form.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, ManifestError> {
        serde_json::to_vec(self).map_err(|source| ManifestError::Serialize {
            pod_id: self.id.clone(),
            source,
        })
    }

    /// Parses a manifest from stored bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ManifestError> {
        serde_json::from_slice(bytes).map_err(ManifestError::Decode)
    }

    /// Returns the hex-encoded SHA-1 checksum of the canonical serialized
    /// manifest.
    pub fn sha(&self) -> Result<String, ManifestError> {
        let bytes = self.canonical_bytes()?;
        let mut hasher = Sha1::new();
        hasher.update(&bytes);
        Ok(hex::encode(hasher.finalize()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pod(id: &str) -> PodId {
        PodId::new(id).unwrap()
    }

    fn sample() -> Manifest {
        Manifest::new(pod("web"))
            .with_launchable(
                "app",
                LaunchableStanza {
                    launchable_type: "hoist".to_string(),
                    launchable_id: "app".to_string(),
                    location: "https://artifacts.example.com/web_abc123.tar.gz".to_string(),
                },
            )
            .with_config("port", serde_json::json!(8080))
    }

    #[test]
    fn sha_is_deterministic() {
        assert_eq!(sample().sha().unwrap(), sample().sha().unwrap());
    }

    #[test]
    fn sha_changes_with_content() {
        let a = sample();
        let b = sample().with_config("port", serde_json::json!(9090));
        assert_ne!(a.sha().unwrap(), b.sha().unwrap());
    }

    #[test]
    fn roundtrips_through_stored_bytes() {
        let manifest = sample();
        let bytes = manifest.canonical_bytes().unwrap();
        let back = Manifest::from_slice(&bytes).unwrap();
        assert_eq!(manifest, back);
        assert_eq!(manifest.sha().unwrap(), back.sha().unwrap());
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(matches!(
            Manifest::from_slice(b"not json"),
            Err(ManifestError::Decode(_))
        ));
    }
}
