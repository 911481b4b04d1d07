use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Opaque locator of an uploaded grid model (e.g. `scenarios/berlin_grid.json`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelReference(String);

impl ModelReference {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModelReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// SHA-256 digest of the raw model bytes, hex encoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentFingerprint(String);

impl ContentFingerprint {
    pub fn of(content: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(content)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sha256:{}", self.0)
    }
}

/// Primary key of a scenario in the audit store.
///
/// Rendered as `<model_reference>@sha256:<digest>`, using the reference exactly
/// as the model stores resolve it. Identical content uploaded to
/// the same location always maps to the same key; any byte change in the content
/// produces a new key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScenarioKey(String);

impl ScenarioKey {
    pub fn derive(reference: &ModelReference, fingerprint: &ContentFingerprint) -> Self {
        Self(format!("{}@{}", reference.as_str(), fingerprint))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true when this key was derived from `fingerprint`.
    pub fn matches(&self, fingerprint: &ContentFingerprint) -> bool {
        self.0
            .rsplit_once("@sha256:")
            .map(|(_, digest)| digest == fingerprint.as_str())
            .unwrap_or(false)
    }
}

impl fmt::Display for ScenarioKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One submitted grid model instance awaiting evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridScenario {
    pub scenario_key: ScenarioKey,
    pub model_reference: ModelReference,
    pub submitted_at: DateTime<Utc>,
}

impl GridScenario {
    /// Build a scenario from the raw bytes of an upload, as seen by the trigger.
    pub fn from_upload(
        model_reference: ModelReference,
        content: &[u8],
        submitted_at: DateTime<Utc>,
    ) -> Self {
        let fingerprint = ContentFingerprint::of(content);
        Self {
            scenario_key: ScenarioKey::derive(&model_reference, &fingerprint),
            model_reference,
            submitted_at,
        }
    }
}
