//! Index artifact loading, validation, and atomic publication.
//!
//! The cold path exports a self-describing JSON artifact: a header naming
//! the schema version, model descriptor, vector dimension, and record
//! count, followed by one record per pattern. The loader validates the
//! whole artifact, builds a complete [`IndexSnapshot`], and only then
//! swaps it into the [`Classifier`]. On any failure the previously
//! published snapshot is left untouched — the engine never serves a
//! partially built index.
//!
//! # Artifact shape
//!
//! ```json
//! {
//!   "header": {
//!     "schemaVersion": 1,
//!     "modelDescriptor": "hashed-bow/d384/1a2b3c4d/desc+samples",
//!     "vectorDim": 384,
//!     "count": 2,
//!     "embeddingSource": "precomputed",
//!     "renormalize": true
//!   },
//!   "patterns": [
//!     { "patternId": "health/meals", "pattern": {... }, "vector": [ ... ] }
//!   ]
//! }
//! ```
//!
//! # Embedding source
//!
//! `embeddingSource` selects how vectors are obtained:
//! - `"precomputed"` — every record must carry a `vector` of `vectorDim`
//!   entries with L2 norm within `1e-3` of 1.0. Out-of-tolerance vectors
//!   are renormalised when the header sets `renormalize`, rejected
//!   otherwise.
//! - `"reembed"` — record vectors are ignored; the running provider
//!   re-embeds each pattern's description and sample texts at load time.
//!
//! Either way, the header's `modelDescriptor` must match the running
//! provider exactly; an artifact built under a different model,
//! dimension, or preprocessing policy is rejected as `incompatible_model`.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::classifier::Classifier;
use crate::embedding::{l2_norm, l2_normalize, EmbeddingProvider};
use crate::error::EngineError;
use crate::index::IndexSnapshot;
use crate::models::Pattern;

/// Artifact schema version this loader understands.
pub const SCHEMA_VERSION: u32 = 1;

/// Accepted deviation of a precomputed vector's L2 norm from 1.0.
pub const NORM_TOLERANCE: f32 = 1e-3;

/// A parsed index artifact: header plus pattern records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub header: ArtifactHeader,
    pub patterns: Vec<ArtifactRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactHeader {
    pub schema_version: u32,
    /// Descriptor of the provider the vectors were built under.
    pub model_descriptor: String,
    pub vector_dim: usize,
    /// Declared record count; must agree with the records present.
    pub count: usize,
    #[serde(default)]
    pub embedding_source: EmbeddingSource,
    /// Whether out-of-tolerance vectors are renormalised instead of
    /// rejected. Applies to `precomputed` artifacts only.
    #[serde(default = "default_renormalize")]
    pub renormalize: bool,
}

fn default_renormalize() -> bool {
    true
}

/// How the loader obtains vectors for an artifact's patterns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingSource {
    /// Trust the vectors stored in the records.
    #[default]
    Precomputed,
    /// Recompute vectors from pattern texts through the provider.
    Reembed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactRecord {
    pub pattern_id: String,
    pub pattern: Pattern,
    /// Present and required for `precomputed` artifacts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,
}

/// Summary of a successful reload, shaped for the wire.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReloadOutcome {
    pub pattern_count: usize,
    pub load_time_ms: f64,
    pub snapshot_id: Uuid,
}

/// The text a pattern is embedded from at index-build time: description
/// and all sample texts, newline-joined. This policy is part of the
/// provider descriptor (`…/desc+samples`), so descriptor equality implies
/// text-policy equality.
pub fn embedding_text(pattern: &Pattern) -> String {
    let mut parts = Vec::with_capacity(1 + pattern.sample_texts.len());
    parts.push(pattern.description.as_str());
    parts.extend(pattern.sample_texts.iter().map(String::as_str));
    parts.join("\n")
}

/// Builds snapshots from artifacts and publishes them into a classifier.
pub struct IndexLoader {
    provider: Arc<dyn EmbeddingProvider>,
}

impl IndexLoader {
    pub fn new(provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self { provider }
    }

    /// Reads and parses an artifact file.
    pub fn read_artifact(&self, path: &Path) -> Result<Artifact, EngineError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            EngineError::Load(format!("failed to read artifact {}: {e}", path.display()))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            EngineError::Load(format!("failed to parse artifact {}: {e}", path.display()))
        })
    }

    /// Validates an artifact end to end and builds an immutable snapshot.
    ///
    /// Nothing is published here; the caller decides what to do with the
    /// snapshot (publish it, inspect it, throw it away).
    pub fn build_snapshot(&self, artifact: &Artifact) -> Result<IndexSnapshot, EngineError> {
        let header = &artifact.header;

        if header.schema_version != SCHEMA_VERSION {
            return Err(EngineError::Load(format!(
                "unsupported artifact schema version {} (expected {SCHEMA_VERSION})",
                header.schema_version
            )));
        }
        if header.count != artifact.patterns.len() {
            return Err(EngineError::Load(format!(
                "header declares {} records but {} are present",
                header.count,
                artifact.patterns.len()
            )));
        }
        if header.model_descriptor != self.provider.descriptor() {
            return Err(EngineError::IncompatibleModel {
                artifact: header.model_descriptor.clone(),
                provider: self.provider.descriptor().to_string(),
            });
        }
        if header.vector_dim != self.provider.dimension() {
            return Err(EngineError::Load(format!(
                "artifact vector dimension {} does not match provider dimension {}",
                header.vector_dim,
                self.provider.dimension()
            )));
        }

        for record in &artifact.patterns {
            if record.pattern_id != record.pattern.id {
                return Err(EngineError::Load(format!(
                    "record id `{}` disagrees with pattern id `{}`",
                    record.pattern_id, record.pattern.id
                )));
            }
            record.pattern.validate()?;
        }

        let rows = match header.embedding_source {
            EmbeddingSource::Precomputed => self.precomputed_rows(artifact)?,
            EmbeddingSource::Reembed => self.reembedded_rows(artifact)?,
        };

        IndexSnapshot::build(header.model_descriptor.clone(), header.vector_dim, rows)
    }

    fn precomputed_rows(
        &self,
        artifact: &Artifact,
    ) -> Result<Vec<(Vec<f32>, Pattern)>, EngineError> {
        let header = &artifact.header;
        let mut rows = Vec::with_capacity(artifact.patterns.len());
        for record in &artifact.patterns {
            let mut vector = record.vector.clone().ok_or_else(|| {
                EngineError::Load(format!(
                    "pattern `{}` has no vector in a precomputed artifact",
                    record.pattern_id
                ))
            })?;
            if vector.len() != header.vector_dim {
                return Err(EngineError::Load(format!(
                    "pattern `{}` has vector dimension {}, expected {}",
                    record.pattern_id,
                    vector.len(),
                    header.vector_dim
                )));
            }

            let norm = l2_norm(&vector);
            if (norm - 1.0).abs() > NORM_TOLERANCE {
                if header.renormalize && norm > 0.0 {
                    l2_normalize(&mut vector);
                } else {
                    return Err(EngineError::Load(format!(
                        "pattern `{}` has L2 norm {norm}, outside tolerance {NORM_TOLERANCE}",
                        record.pattern_id
                    )));
                }
            }
            rows.push((vector, record.pattern.clone()));
        }
        Ok(rows)
    }

    fn reembedded_rows(
        &self,
        artifact: &Artifact,
    ) -> Result<Vec<(Vec<f32>, Pattern)>, EngineError> {
        let texts: Vec<String> = artifact
            .patterns
            .iter()
            .map(|record| embedding_text(&record.pattern))
            .collect();
        let vectors = self.provider.embed_batch(&texts)?;
        Ok(vectors
            .into_iter()
            .zip(artifact.patterns.iter())
            .map(|(vector, record)| (vector, record.pattern.clone()))
            .collect())
    }

    /// Loads an artifact file into a validated snapshot.
    pub fn load_from_path(&self, path: &Path) -> Result<IndexSnapshot, EngineError> {
        let artifact = self.read_artifact(path)?;
        self.build_snapshot(&artifact)
    }

    /// Loads an artifact and atomically publishes the resulting snapshot.
    ///
    /// The swap happens only after the snapshot is fully built; in-flight
    /// queries keep the snapshot they started with, and on any failure
    /// the active snapshot is unchanged.
    pub fn load_and_publish(
        &self,
        path: &Path,
        classifier: &Classifier,
    ) -> Result<ReloadOutcome, EngineError> {
        let started = Instant::now();
        let snapshot = match self.load_from_path(path) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(artifact = %path.display(), error = %e, "index reload rejected");
                return Err(e);
            }
        };

        let outcome = ReloadOutcome {
            pattern_count: snapshot.len(),
            load_time_ms: started.elapsed().as_secs_f64() * 1000.0,
            snapshot_id: snapshot.id(),
        };
        classifier.publish(Arc::new(snapshot));
        info!(
            artifact = %path.display(),
            patterns = outcome.pattern_count,
            snapshot = %outcome.snapshot_id,
            "index snapshot published"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{HashedEmbedder, Preprocessing};
    use std::collections::HashMap;

    fn provider() -> Arc<dyn EmbeddingProvider> {
        Arc::new(HashedEmbedder::new(64, Preprocessing::default()))
    }

    fn pattern(id: &str) -> Pattern {
        Pattern {
            id: id.to_string(),
            description: format!("description of {id}"),
            domain: None,
            area: None,
            topic: None,
            theme: None,
            focus: None,
            form: None,
            mixins: Vec::new(),
            sample_texts: vec![format!("sample text for {id}")],
            metadata: HashMap::new(),
        }
    }

    fn record(p: &dyn EmbeddingProvider, id: &str) -> ArtifactRecord {
        let pattern = pattern(id);
        let vector = p.embed(&embedding_text(&pattern)).unwrap();
        ArtifactRecord {
            pattern_id: id.to_string(),
            pattern,
            vector: Some(vector),
        }
    }

    fn artifact(p: &dyn EmbeddingProvider, ids: &[&str]) -> Artifact {
        let patterns: Vec<ArtifactRecord> = ids.iter().map(|id| record(p, id)).collect();
        Artifact {
            header: ArtifactHeader {
                schema_version: SCHEMA_VERSION,
                model_descriptor: p.descriptor().to_string(),
                vector_dim: p.dimension(),
                count: patterns.len(),
                embedding_source: EmbeddingSource::Precomputed,
                renormalize: true,
            },
            patterns,
        }
    }

    #[test]
    fn precomputed_artifact_builds_a_snapshot() {
        let provider = provider();
        let loader = IndexLoader::new(Arc::clone(&provider));
        let artifact = artifact(provider.as_ref(), &["health/meals", "naps/crib"]);
        let snapshot = loader.build_snapshot(&artifact).unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.dim(), 64);
        assert!(snapshot.catalogue().lookup("health/meals").is_ok());
    }

    #[test]
    fn reembed_artifact_ignores_stored_vectors() {
        let provider = provider();
        let loader = IndexLoader::new(Arc::clone(&provider));
        let mut artifact = artifact(provider.as_ref(), &["health/meals"]);
        artifact.header.embedding_source = EmbeddingSource::Reembed;
        // Garbage vectors must not matter in reembed mode.
        artifact.patterns[0].vector = Some(vec![9.0; 64]);

        let snapshot = loader.build_snapshot(&artifact).unwrap();
        let expected = provider
            .embed(&embedding_text(&artifact.patterns[0].pattern))
            .unwrap();
        assert_eq!(snapshot.row_vector(0), expected.as_slice());
    }

    #[test]
    fn descriptor_mismatch_is_incompatible_model() {
        let provider = provider();
        let loader = IndexLoader::new(Arc::clone(&provider));
        let mut artifact = artifact(provider.as_ref(), &["health/meals"]);
        artifact.header.model_descriptor = "other-model/d64/deadbeef/desc+samples".to_string();
        assert!(matches!(
            loader.build_snapshot(&artifact),
            Err(EngineError::IncompatibleModel { .. })
        ));
    }

    #[test]
    fn unsupported_schema_version_is_rejected() {
        let provider = provider();
        let loader = IndexLoader::new(Arc::clone(&provider));
        let mut artifact = artifact(provider.as_ref(), &["health/meals"]);
        artifact.header.schema_version = 99;
        assert!(matches!(
            loader.build_snapshot(&artifact),
            Err(EngineError::Load(_))
        ));
    }

    #[test]
    fn header_record_count_must_agree() {
        let provider = provider();
        let loader = IndexLoader::new(Arc::clone(&provider));
        let mut artifact = artifact(provider.as_ref(), &["health/meals", "naps/crib"]);
        artifact.header.count = 1;
        assert!(matches!(
            loader.build_snapshot(&artifact),
            Err(EngineError::Load(_))
        ));
    }

    #[test]
    fn missing_vector_in_precomputed_mode_is_rejected() {
        let provider = provider();
        let loader = IndexLoader::new(Arc::clone(&provider));
        let mut artifact = artifact(provider.as_ref(), &["health/meals"]);
        artifact.patterns[0].vector = None;
        assert!(matches!(
            loader.build_snapshot(&artifact),
            Err(EngineError::Load(_))
        ));
    }

    #[test]
    fn wrong_record_dimension_is_rejected() {
        let provider = provider();
        let loader = IndexLoader::new(Arc::clone(&provider));
        let mut artifact = artifact(provider.as_ref(), &["health/meals"]);
        artifact.patterns[0].vector = Some(vec![1.0, 0.0]);
        assert!(matches!(
            loader.build_snapshot(&artifact),
            Err(EngineError::Load(_))
        ));
    }

    #[test]
    fn norm_tolerance_respects_the_renormalize_flag() {
        let provider = provider();
        let loader = IndexLoader::new(Arc::clone(&provider));

        // Scaled well out of tolerance.
        let mut artifact = artifact(provider.as_ref(), &["health/meals"]);
        let scaled: Vec<f32> = artifact.patterns[0]
            .vector
            .as_ref()
            .unwrap()
            .iter()
            .map(|x| x * 3.0)
            .collect();
        artifact.patterns[0].vector = Some(scaled.clone());

        // renormalize=true repairs the row.
        let snapshot = loader.build_snapshot(&artifact).unwrap();
        let norm = l2_norm(snapshot.row_vector(0));
        assert!((norm - 1.0).abs() < 1e-5);

        // renormalize=false rejects it.
        artifact.header.renormalize = false;
        assert!(matches!(
            loader.build_snapshot(&artifact),
            Err(EngineError::Load(_))
        ));
    }

    #[test]
    fn duplicate_pattern_ids_are_rejected() {
        let provider = provider();
        let loader = IndexLoader::new(Arc::clone(&provider));
        let artifact = artifact(provider.as_ref(), &["health/meals", "health/meals"]);
        assert!(matches!(
            loader.build_snapshot(&artifact),
            Err(EngineError::Load(_))
        ));
    }

    #[test]
    fn record_and_pattern_ids_must_agree() {
        let provider = provider();
        let loader = IndexLoader::new(Arc::clone(&provider));
        let mut artifact = artifact(provider.as_ref(), &["health/meals"]);
        artifact.patterns[0].pattern_id = "health/other".to_string();
        assert!(matches!(
            loader.build_snapshot(&artifact),
            Err(EngineError::Load(_))
        ));
    }

    #[test]
    fn malformed_pattern_ids_are_rejected() {
        let provider = provider();
        let loader = IndexLoader::new(Arc::clone(&provider));
        let mut artifact = artifact(provider.as_ref(), &["health/meals"]);
        artifact.patterns[0].pattern_id = "single_segment".to_string();
        artifact.patterns[0].pattern.id = "single_segment".to_string();
        assert!(matches!(
            loader.build_snapshot(&artifact),
            Err(EngineError::Load(_))
        ));
    }

    #[test]
    fn failed_load_keeps_the_active_snapshot() {
        let provider = provider();
        let loader = IndexLoader::new(Arc::clone(&provider));
        let classifier = Classifier::new(Arc::clone(&provider));

        let good = artifact(provider.as_ref(), &["health/meals"]);
        let snapshot = loader.build_snapshot(&good).unwrap();
        let published_id = snapshot.id();
        classifier.publish(Arc::new(snapshot));

        // A bogus path fails before anything can be published.
        let err = loader
            .load_and_publish(Path::new("/nonexistent/artifact.json"), &classifier)
            .unwrap_err();
        assert!(matches!(err, EngineError::Load(_)));
        assert_eq!(classifier.snapshot().unwrap().id(), published_id);
    }

    #[test]
    fn embedding_text_joins_description_and_samples() {
        let mut p = pattern("health/meals");
        p.description = "lunch outdoors".to_string();
        p.sample_texts = vec!["a picnic".to_string(), "by the lake".to_string()];
        assert_eq!(embedding_text(&p), "lunch outdoors\na picnic\nby the lake");
    }
}
