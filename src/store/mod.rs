/// Durable artifact cache for trained models.
///
/// One JSON document per `(entity, metric, variant)` key, named
/// deterministically from the key so lookups are purely computed with
/// no catalog file. Writes publish atomically (temp file + rename), so
/// a reader never observes a torn model/scaler pair.
use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Composite key identifying one trained artifact. `variant` is the
/// model kind for forecasting and the detection method for anomalies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelKey {
    pub entity_id: String,
    pub metric: String,
    pub variant: String,
}

impl ModelKey {
    pub fn new<E, M, V>(entity_id: E, metric: M, variant: V) -> Self
    where
        E: Into<String>,
        M: Into<String>,
        V: Into<String>,
    {
        Self {
            entity_id: entity_id.into(),
            metric: metric.into(),
            variant: variant.into(),
        }
    }

    /// Deterministic file stem. Components are folded to `[A-Za-z0-9-]`
    /// and joined with `_`, so the stem always parses back into exactly
    /// three components.
    pub fn file_stem(&self) -> String {
        format!(
            "{}_{}_{}",
            sanitize(&self.entity_id),
            sanitize(&self.metric),
            sanitize(&self.variant)
        )
    }

    pub fn from_file_stem(stem: &str) -> Option<Self> {
        let mut parts = stem.splitn(3, '_');
        let entity_id = parts.next()?;
        let metric = parts.next()?;
        let variant = parts.next()?;
        if entity_id.is_empty() || metric.is_empty() || variant.is_empty() {
            return None;
        }
        Some(Self::new(entity_id, metric, variant))
    }
}

impl fmt::Display for ModelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.entity_id, self.metric, self.variant)
    }
}

fn sanitize(component: &str) -> String {
    component
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect()
}

/// Artifact families sharing one cache root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactClass {
    Forecast,
    Anomaly,
}

impl ArtifactClass {
    fn extension(&self) -> &'static str {
        match self {
            ArtifactClass::Forecast => "forecast.json",
            ArtifactClass::Anomaly => "anomaly.json",
        }
    }
}

/// Filesystem-backed artifact store rooted at a configurable directory.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &ModelKey, class: ArtifactClass) -> PathBuf {
        self.root
            .join(format!("{}.{}", key.file_stem(), class.extension()))
    }

    /// Persist an artifact, overwriting any prior artifact for the key.
    pub fn save<T: Serialize>(&self, key: &ModelKey, class: ArtifactClass, artifact: &T) -> Result<()> {
        let path = self.path_for(key, class);
        let tmp = self.root.join(format!(".{}.tmp", key.file_stem()));

        let payload = serde_json::to_vec(artifact)?;
        fs::write(&tmp, payload)?;
        fs::rename(&tmp, &path)?;

        log::info!("saved artifact {} to {}", key, path.display());
        Ok(())
    }

    /// Whether an artifact has been persisted for the key.
    pub fn exists(&self, key: &ModelKey, class: ArtifactClass) -> bool {
        self.path_for(key, class).exists()
    }

    /// Load an artifact if one has been persisted for the key.
    pub fn load<T: DeserializeOwned>(&self, key: &ModelKey, class: ArtifactClass) -> Result<Option<T>> {
        let path = self.path_for(key, class);
        if !path.exists() {
            return Ok(None);
        }
        let payload = fs::read(&path)?;
        let artifact = serde_json::from_slice(&payload)?;
        log::info!("loaded artifact {} from {}", key, path.display());
        Ok(Some(artifact))
    }

    /// Remove a persisted artifact; absent artifacts are not an error.
    pub fn evict(&self, key: &ModelKey, class: ArtifactClass) -> Result<()> {
        let path = self.path_for(key, class);
        if path.exists() {
            fs::remove_file(&path)?;
        }
        Ok(())
    }

    /// All keys with a persisted artifact of the given class, recovered
    /// from file names.
    pub fn list(&self, class: ArtifactClass) -> Result<Vec<ModelKey>> {
        let suffix = format!(".{}", class.extension());
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(stem) = name.strip_suffix(suffix.as_str()) {
                if let Some(key) = ModelKey::from_file_stem(stem) {
                    keys.push(key);
                }
            }
        }
        keys.sort_by(|a, b| a.file_stem().cmp(&b.file_stem()));
        Ok(keys)
    }
}

/// Outcome of a batch retrain sweep. A sweep never aborts on a per-key
/// failure; failed keys are reported alongside the keys that completed.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RetrainReport {
    pub succeeded: Vec<ModelKey>,
    pub failed: Vec<(ModelKey, String)>,
    pub cancelled: bool,
}

impl RetrainReport {
    pub fn attempted(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Payload {
        weights: Vec<f64>,
        label: String,
    }

    fn sample_key() -> ModelKey {
        ModelKey::new("moonbeam", "tvl", "gradient-boosted")
    }

    #[test]
    fn test_file_stem_round_trip() {
        let key = ModelKey::new("para_chain 2004", "tvl/usd", "linear");
        let stem = key.file_stem();
        assert_eq!(stem, "para-chain-2004_tvl-usd_linear");

        let parsed = ModelKey::from_file_stem(&stem).unwrap();
        assert_eq!(parsed.entity_id, "para-chain-2004");
        assert_eq!(parsed.metric, "tvl-usd");
        assert_eq!(parsed.variant, "linear");
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path()).unwrap();
        let payload = Payload {
            weights: vec![1.5, -2.25],
            label: "fitted".to_string(),
        };

        store
            .save(&sample_key(), ArtifactClass::Forecast, &payload)
            .unwrap();
        let restored: Payload = store
            .load(&sample_key(), ArtifactClass::Forecast)
            .unwrap()
            .unwrap();
        assert_eq!(payload, restored);
    }

    #[test]
    fn test_missing_artifact_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path()).unwrap();
        let loaded: Option<Payload> = store.load(&sample_key(), ArtifactClass::Anomaly).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_classes_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path()).unwrap();
        let payload = Payload {
            weights: vec![1.0],
            label: "forecast".to_string(),
        };
        store
            .save(&sample_key(), ArtifactClass::Forecast, &payload)
            .unwrap();

        let other: Option<Payload> = store.load(&sample_key(), ArtifactClass::Anomaly).unwrap();
        assert!(other.is_none());
    }

    #[test]
    fn test_list_recovers_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path()).unwrap();
        let payload = Payload {
            weights: vec![],
            label: String::new(),
        };

        let a = ModelKey::new("acala", "tvl", "linear");
        let b = ModelKey::new("moonbeam", "users", "statistical");
        store.save(&a, ArtifactClass::Forecast, &payload).unwrap();
        store.save(&b, ArtifactClass::Anomaly, &payload).unwrap();

        assert_eq!(store.list(ArtifactClass::Forecast).unwrap(), vec![a]);
        assert_eq!(store.list(ArtifactClass::Anomaly).unwrap(), vec![b]);
    }

    #[test]
    fn test_evict_removes_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path()).unwrap();
        let payload = Payload {
            weights: vec![1.0],
            label: "x".to_string(),
        };
        store
            .save(&sample_key(), ArtifactClass::Forecast, &payload)
            .unwrap();
        store.evict(&sample_key(), ArtifactClass::Forecast).unwrap();
        let loaded: Option<Payload> = store.load(&sample_key(), ArtifactClass::Forecast).unwrap();
        assert!(loaded.is_none());
    }
}
